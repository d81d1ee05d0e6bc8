//! Cross Site Request Forgery (CSRF) prevention.
//!
//! A request is only executed if a browser would have preflighted it, so that the CORS policy
//! is evaluated before the context factory runs or any resolver executes.
//! See <https://owasp.org/www-community/attacks/csrf>.

use http::HeaderMap;
use http::header;

use crate::configuration::Csrf;
use crate::graphql;

static NON_PREFLIGHTED_CONTENT_TYPES: &[&str] = &[
    "application/x-www-form-urlencoded",
    "multipart/form-data",
    "text/plain",
];

#[derive(Debug, Clone)]
pub(crate) struct CsrfCheck {
    enabled: bool,
    required_headers: Vec<String>,
}

impl CsrfCheck {
    pub(crate) fn new(configuration: &Csrf) -> Self {
        Self {
            enabled: !configuration.unsafe_disabled,
            required_headers: configuration.required_headers.clone(),
        }
    }

    /// `Err` with the error to send back when the request must be blocked.
    pub(crate) fn check(&self, headers: &HeaderMap) -> Result<(), graphql::Error> {
        if !self.enabled || is_preflighted(headers, &self.required_headers) {
            return Ok(());
        }
        Err(graphql::Error::builder()
            .message(format!(
                "This operation has been blocked as a potential Cross-Site Request Forgery (CSRF). \
                 Please either specify a 'content-type' header (with a mime-type that is not one of {}) \
                 or provide one of the following headers: {}",
                NON_PREFLIGHTED_CONTENT_TYPES.join(", "),
                self.required_headers.join(", ")
            ))
            .extension_code("CSRF_ERROR")
            .build())
    }
}

// A preflighted request is the opposite of a simple request. A simple request:
// - has method GET, POST or HEAD,
// - has no content-type, or one of the non preflighted content types,
// - only carries CORS safelisted headers.
// Methods are left to the routing layer, the two other conditions are checked here.
fn is_preflighted(headers: &HeaderMap, required_headers: &[String]) -> bool {
    content_type_requires_preflight(headers) || required_header_is_provided(headers, required_headers)
}

// https://fetch.spec.whatwg.org/#cors-safelisted-request-header
fn content_type_requires_preflight(headers: &HeaderMap) -> bool {
    let Ok(values) = headers
        .get_all(header::CONTENT_TYPE)
        .iter()
        .map(|value| {
            value
                .to_str()
                .map(|value| value.trim().replace('\u{0009}', "\u{0020}"))
        })
        .collect::<Result<Vec<_>, _>>()
    else {
        // an unreadable header value cannot prove a preflight happened
        return false;
    };
    if values.is_empty() {
        return false;
    }

    // https://fetch.spec.whatwg.org/#concept-header-list-combine
    match values.join("\u{002C}\u{0020}").parse::<mime::Mime>() {
        Ok(mime_type) => !NON_PREFLIGHTED_CONTENT_TYPES.contains(&mime_type.essence_str()),
        Err(_) => false,
    }
}

fn required_header_is_provided(headers: &HeaderMap, required_headers: &[String]) -> bool {
    required_headers.iter().any(|name| {
        headers
            .get(name.as_str())
            .is_some_and(|value| !value.as_bytes().is_empty())
    })
}
