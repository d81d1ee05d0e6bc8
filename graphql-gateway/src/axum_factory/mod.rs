//! axum factory is useful to create an [`AxumHttpServerFactory`] which implements [`crate::http_server_factory::HttpServerFactory`]
mod axum_http_server_factory;
mod listeners;
#[cfg(test)]
mod tests;

pub(crate) use axum_http_server_factory::AxumHttpServerFactory;
#[cfg(test)]
pub(crate) use axum_http_server_factory::make_axum_router;
