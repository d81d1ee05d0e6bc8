//! Which browser origins may call the gateway.

use std::fmt::Display;
use std::str::FromStr;

use http::HeaderValue;
use http::request::Parts;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use tower_http::cors;
use tower_http::cors::CorsLayer;

/// The `cors` section.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Cors {
    /// Answer `Access-Control-Allow-Origin: *`. The only setting that admits `Origin: null`.
    #[serde(default)]
    pub(crate) allow_any_origin: bool,

    /// Answer `Access-Control-Allow-Credentials: true`.
    #[serde(default)]
    pub(crate) allow_credentials: bool,

    /// Request headers browsers may send. When empty the preflight's
    /// `Access-Control-Request-Headers` is echoed back.
    ///
    /// A non-empty list must include the headers listed in `csrf.required_headers`, or
    /// browsers will be unable to send non-simple requests.
    #[serde(default)]
    pub(crate) allow_headers: Vec<String>,

    /// Response headers readable by browser scripts.
    #[serde(default)]
    pub(crate) expose_headers: Option<Vec<String>>,

    /// Exact origins to allow.
    #[serde(default = "default_origins")]
    pub(crate) origins: Vec<String>,

    /// Regular expressions tried against origins missing from `origins`.
    #[serde(default)]
    pub(crate) match_origins: Option<Vec<String>>,

    #[serde(default = "default_methods")]
    pub(crate) methods: Vec<String>,
}

impl Default for Cors {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn default_origins() -> Vec<String> {
    vec!["https://studio.apollographql.com".into()]
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "OPTIONS"].map(String::from).to_vec()
}

#[buildstructor::buildstructor]
impl Cors {
    #[builder(visibility = "pub")]
    fn new(
        allow_any_origin: Option<bool>,
        allow_credentials: Option<bool>,
        allow_headers: Option<Vec<String>>,
        expose_headers: Option<Vec<String>>,
        origins: Option<Vec<String>>,
        match_origins: Option<Vec<String>>,
        methods: Option<Vec<String>>,
    ) -> Self {
        Self {
            allow_any_origin: allow_any_origin.unwrap_or_default(),
            allow_credentials: allow_credentials.unwrap_or_default(),
            allow_headers: allow_headers.unwrap_or_default(),
            expose_headers,
            origins: origins.unwrap_or_else(default_origins),
            match_origins,
            methods: methods.unwrap_or_else(default_methods),
        }
    }
}

/// Parses every entry, logging and skipping the ones that are not valid `T`.
fn parse_valid<'a, T>(kind: &'static str, entries: &'a [String]) -> impl Iterator<Item = T> + 'a
where
    T: FromStr + 'a,
    T::Err: Display,
{
    entries.iter().filter_map(move |entry| match entry.parse() {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            tracing::error!(%error, "ignoring invalid CORS {kind} '{entry}'");
            None
        }
    })
}

impl Cors {
    pub(crate) fn into_layer(self) -> Result<CorsLayer, String> {
        self.ensure_usable_cors_rules()?;

        let allow_headers = if self.allow_headers.is_empty() {
            cors::AllowHeaders::mirror_request()
        } else {
            cors::AllowHeaders::list(parse_valid::<http::HeaderName>(
                "header",
                &self.allow_headers,
            ))
        };
        let expose_headers = cors::ExposeHeaders::list(parse_valid::<http::HeaderName>(
            "header",
            self.expose_headers.as_deref().unwrap_or_default(),
        ));
        let methods = cors::AllowMethods::list(parse_valid::<http::Method>(
            "method",
            &self.methods,
        ));

        let layer = CorsLayer::new()
            .vary([])
            .allow_credentials(self.allow_credentials)
            .allow_headers(allow_headers)
            .expose_headers(expose_headers)
            .allow_methods(methods);

        let allow_origin = match (self.allow_any_origin, self.match_origins) {
            (true, _) => cors::AllowOrigin::any(),
            (false, Some(patterns)) => {
                let patterns: Vec<Regex> = parse_valid("origin pattern", &patterns).collect();
                let origins = self.origins;
                cors::AllowOrigin::predicate(move |origin: &HeaderValue, _: &Parts| {
                    let Ok(origin) = origin.to_str() else {
                        return false;
                    };
                    origins.iter().any(|allowed| allowed == origin)
                        || patterns.iter().any(|pattern| pattern.is_match(origin))
                })
            }
            (false, None) => {
                cors::AllowOrigin::list(parse_valid::<HeaderValue>("origin", &self.origins))
            }
        };
        Ok(layer.allow_origin(allow_origin))
    }

    /// Rejects combinations that browsers refuse and that tower-http would panic on.
    pub(crate) fn ensure_usable_cors_rules(&self) -> Result<(), &'static str> {
        let wildcard = |values: &[String]| values.iter().any(|value| value == "*");

        if wildcard(&self.origins) {
            return Err("'*' is not a valid origin, set `allow_any_origin: true` instead");
        }
        if !self.allow_credentials {
            return Ok(());
        }
        if self.allow_any_origin {
            return Err("`allow_credentials` cannot be combined with `allow_any_origin`");
        }
        if wildcard(&self.allow_headers) {
            return Err("`allow_credentials` cannot be combined with a '*' in `allow_headers`");
        }
        if wildcard(&self.methods) {
            return Err("`allow_credentials` cannot be combined with a '*' in `methods`");
        }
        if wildcard(self.expose_headers.as_deref().unwrap_or_default()) {
            return Err("`allow_credentials` cannot be combined with a '*' in `expose_headers`");
        }
        Ok(())
    }
}
