//! Main entry point for CLI command to start server.

use std::ffi::OsString;
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::CommandFactory;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::configuration::Configuration;
use crate::configuration::generate_config_schema;
use crate::server::GatewayServer;
use crate::server::ShutdownSource;
use crate::starter::starter_schema;

/// Options for the gateway
#[derive(Parser, Debug)]
#[command(
    name = "gateway",
    about = "GraphQL gateway with session-aware execution",
    disable_version_flag = true
)]
pub(crate) struct Opt {
    /// Log level (off|error|warn|info|debug|trace).
    #[arg(
        long = "log",
        default_value = "info",
        alias = "log-level",
        env = "GATEWAY_LOG"
    )]
    log_level: String,

    /// Configuration location relative to the current directory.
    #[arg(short, long = "config", env = "GATEWAY_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Listen address, overrides `server.listen`.
    #[arg(long = "listen", env = "GATEWAY_LISTEN")]
    listen: Option<SocketAddr>,

    /// `.env` file to load before reading the configuration. Defaults to `.env` in the current
    /// directory, if present.
    #[arg(long = "dotenv")]
    dotenv: Option<PathBuf>,

    /// Prints the configuration schema.
    #[arg(long)]
    schema: bool,

    /// Display version and exit.
    #[arg(long, short = 'V')]
    version: bool,
}

/// This is the main gateway entrypoint.
///
/// Exits with `0` after a completed drain, and with `1` when the gateway cannot start or when
/// the drain deadline is exceeded.
pub fn main() -> Result<()> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(nb) = std::env::var("GATEWAY_NUM_CORES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        builder.worker_threads(nb);
    }
    let runtime = builder.build()?;
    runtime.block_on(start())
}

async fn start() -> Result<()> {
    // loaded before parsing so that the `.env` file can hold `GATEWAY_*` options
    let dotenv_path = dotenv_path_from_args(std::env::args_os());
    let dotenv = match &dotenv_path {
        Some(path) => dotenv::from_path(path)
            .with_context(|| format!("could not load {}", path.display()))
            .map(|_| Some(path.clone()))?,
        None => dotenv::dotenv().ok(),
    };

    let opt = Opt::parse();

    if opt.version {
        println!("{}", std::env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if opt.schema {
        let schema = generate_config_schema();
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let builder = tracing_subscriber::fmt::fmt().with_env_filter(
        EnvFilter::try_new(&opt.log_level).context("could not parse log configuration")?,
    );
    if std::io::stdout().is_terminal() {
        builder.init();
    } else {
        builder.json().init();
    }
    setup_panic_handler();

    tracing::info!(
        "GraphQL gateway v{} starting",
        std::env!("CARGO_PKG_VERSION")
    );
    if let Some(path) = dotenv.or(opt.dotenv) {
        tracing::debug!("loaded environment from {}", path.display());
    }

    let current_directory = std::env::current_dir()?;
    let mut configuration = match opt.config_path {
        Some(path) => {
            let path = if path.is_relative() {
                current_directory.join(path)
            } else {
                path
            };
            Configuration::read(&path)
                .with_context(|| format!("could not load configuration from {}", path.display()))?
        }
        None => Configuration::default(),
    };
    if let Some(listen) = opt.listen {
        configuration.set_listen(listen);
    }

    let schema = starter_schema().context("could not assemble the starter schema")?;

    let server = GatewayServer::builder()
        .configuration(configuration)
        .schema(schema)
        .shutdown(ShutdownSource::CtrlC)
        .build()?;

    if let Err(err) = server.serve().await {
        tracing::error!("{}", err);
        return Err(err.into());
    }
    tracing::info!("gateway stopped");
    Ok(())
}

/// `--dotenv` has to be known before clap parses the options that `.env` may define.
fn dotenv_path_from_args<I, T>(args: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Opt::command()
        .ignore_errors(true)
        .try_get_matches_from(args)
        .ok()?
        .get_one::<PathBuf>("dotenv")
        .cloned()
}

fn setup_panic_handler() {
    // Redirect panics to the logs.
    let backtrace_env = std::env::var("RUST_BACKTRACE");
    let show_backtraces =
        backtrace_env.as_deref() == Ok("1") || backtrace_env.as_deref() == Ok("full");
    if show_backtraces {
        tracing::warn!(
            "RUST_BACKTRACE={} detected. This is useful for diagnostics but will have a performance impact and may leak sensitive information",
            backtrace_env.as_deref().unwrap_or_default()
        );
    }
    std::panic::set_hook(Box::new(move |e| {
        if show_backtraces {
            let backtrace = backtrace::Backtrace::new();
            tracing::error!("{}\n{:?}", e, backtrace)
        } else {
            tracing::error!("{}", e)
        }
    }));
}
