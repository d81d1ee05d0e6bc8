//! The landing page served to browsers on the GraphQL route.

use bytes::Bytes;
use http::HeaderMap;
use mediatype::MediaType;
use mediatype::MediaTypeList;
use mediatype::names::HTML;
use mediatype::names::TEXT;

pub(crate) fn landing_page_content(graphql_path: &str) -> Bytes {
    const TEMPLATE: &str = include_str!("../templates/landing_page.html");
    let graphql_path = serde_json::to_string(graphql_path)
        .unwrap_or_else(|_| "\"/graphql\"".to_string())
        .replace('<', "\\u003c");
    Bytes::from(
        TEMPLATE
            .replace("{{GATEWAY_VERSION}}", std::env!("CARGO_PKG_VERSION"))
            .replace("{{GRAPHQL_PATH}}", &graphql_path),
    )
}

/// `true` when the `accept` header lists `text/html`, which is how browsers navigate.
pub(crate) fn prefers_html(headers: &HeaderMap) -> bool {
    let text_html = MediaType::new(TEXT, HTML);

    headers.get_all(http::header::ACCEPT).iter().any(|value| {
        value
            .to_str()
            .map(|accept_str| {
                let mut list = MediaTypeList::new(accept_str);

                list.any(|mime| mime.as_ref() == Ok(&text_html))
            })
            .unwrap_or(false)
    })
}
