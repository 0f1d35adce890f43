use axum::extract::Query;
use axum::http::request::Parts;
use thiserror::Error;

pub const DRAIN_TOKEN_HEADER: &str = "Logplex-Drain-Token";
pub const APP_NAME_PARAM: &str = "app";

/// Why a request was refused before decoding; the message becomes the
/// response body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ContextError(String);

impl ContextError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Derives per-request context that is attached to every record decoded
/// from that request.
pub trait ContextResolver: Send + Sync {
    type Context: Clone + Send + Sync + 'static;

    fn resolve(&self, request: &Parts) -> Result<Self::Context, ContextError>;
}

/// No context; records carry `()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ContextResolver for NoContext {
    type Context = ();

    fn resolve(&self, _request: &Parts) -> Result<(), ContextError> {
        Ok(())
    }
}

/// The drain token Logplex sends with each request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainToken;

impl ContextResolver for DrainToken {
    type Context = String;

    fn resolve(&self, request: &Parts) -> Result<String, ContextError> {
        request
            .headers
            .get(DRAIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ContextError::new(format!("request header '{DRAIN_TOKEN_HEADER}' is missing"))
            })
    }
}

/// The `app` query string argument, for drains registered per application
/// (e.g. `https://drain.example.com/?app=myapp`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AppName;

impl ContextResolver for AppName {
    type Context = String;

    /// First `app` pair wins when the argument repeats.
    fn resolve(&self, request: &Parts) -> Result<String, ContextError> {
        Query::<Vec<(String, String)>>::try_from_uri(&request.uri)
            .ok()
            .and_then(|Query(pairs)| {
                pairs
                    .into_iter()
                    .find_map(|(key, value)| (key == APP_NAME_PARAM).then_some(value))
            })
            .filter(|app| !app.is_empty())
            .ok_or_else(|| {
                ContextError::new(format!("query string argument '{APP_NAME_PARAM}' is missing"))
            })
    }
}

/// Adapter to use an ordinary function or closure as a `ContextResolver`.
#[derive(Debug, Clone, Copy)]
pub struct ContextFn<F>(pub F);

impl<F, C> ContextResolver for ContextFn<F>
where
    F: Fn(&Parts) -> Result<C, ContextError> + Send + Sync,
    C: Clone + Send + Sync + 'static,
{
    type Context = C;

    fn resolve(&self, request: &Parts) -> Result<C, ContextError> {
        (self.0)(request)
    }
}
