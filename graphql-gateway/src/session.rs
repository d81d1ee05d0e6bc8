//! Sessions and the resolvers that turn a request into one.

use std::fmt;

use async_trait::async_trait;
use http::StatusCode;
use http::header;
use http::request::Parts;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

use crate::configuration::SessionConfig;
use crate::error::SessionError;
use crate::json_ext::Value;

/// An authenticated session, as returned by the identity provider.
///
/// The gateway never looks inside it; resolvers do. `Debug` does not print the content.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session(Value);

impl Session {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Session(..)")
    }
}

/// Resolves the session a request carries.
///
/// `Ok(None)` means the request is anonymous. Errors are not fatal to the request: the
/// [`ContextFactory`](crate::context::ContextFactory) logs them and continues anonymously.
#[async_trait]
pub trait SessionResolver: Send + Sync + 'static {
    async fn resolve(&self, request: &Parts) -> Result<Option<Session>, SessionError>;
}

/// Every request is anonymous.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSessionResolver;

#[async_trait]
impl SessionResolver for NoSessionResolver {
    async fn resolve(&self, _request: &Parts) -> Result<Option<Session>, SessionError> {
        Ok(None)
    }
}

/// Forwards the session cookie to an identity provider endpoint.
///
/// The endpoint receives `GET <endpoint>` with `Cookie: <cookie_name>=<value>` and answers:
///
/// * 2xx with the session as a JSON body (`null` for no session),
/// * 401, 403 or 404 when the cookie does not identify a session.
///
/// Requests without the cookie never reach the endpoint.
#[derive(Clone, Debug)]
pub struct CookieSessionResolver {
    client: reqwest::Client,
    endpoint: Url,
    cookie_name: String,
}

#[buildstructor::buildstructor]
impl CookieSessionResolver {
    #[builder(visibility = "pub")]
    fn new(endpoint: Url, cookie_name: Option<String>) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            cookie_name: cookie_name.unwrap_or_else(|| "session".to_string()),
        })
    }
}

impl CookieSessionResolver {
    /// `None` when no identity provider endpoint is configured.
    pub(crate) fn from_configuration(
        configuration: &SessionConfig,
    ) -> Result<Option<Self>, SessionError> {
        configuration
            .endpoint
            .clone()
            .map(|endpoint| {
                Self::builder()
                    .endpoint(endpoint)
                    .cookie_name(configuration.cookie_name.clone())
                    .build()
            })
            .transpose()
    }

    fn session_cookie(&self, request: &Parts) -> Option<String> {
        request
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(cookie::Cookie::split_parse)
            .filter_map(Result::ok)
            .find(|cookie| cookie.name() == self.cookie_name)
            .map(|cookie| cookie.value().to_string())
    }
}

#[async_trait]
impl SessionResolver for CookieSessionResolver {
    async fn resolve(&self, request: &Parts) -> Result<Option<Session>, SessionError> {
        let Some(token) = self.session_cookie(request) else {
            return Ok(None);
        };

        let response = self
            .client
            .get(self.endpoint.clone())
            .header(header::COOKIE, format!("{}={}", self.cookie_name, token))
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let body = response.bytes().await?;
                let value: Value = serde_json::from_slice(&body)
                    .map_err(|error| SessionError::InvalidPayload(error.to_string()))?;
                Ok((!value.is_null()).then(|| Session(value)))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
            status => Err(SessionError::UnexpectedStatus(status)),
        }
    }
}
