fn main() -> anyhow::Result<()> {
    graphql_gateway::main()
}
