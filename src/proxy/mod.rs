//! Runs ordinary synchronous HTTP handlers behind the invocation dispatcher.
//!
//! Each invocation payload is an API Gateway proxy event. The adapter turns it
//! into an [`http::Request`](axum::http::Request), hands that to a
//! [`ServeHttp`] implementation together with a [`ResponseCollector`], and
//! returns the collected [`ProxyResponse`] as the invocation result.

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::Request;
use log::debug;
use thiserror::Error;

use crate::config::TextContentTypes;
use crate::types::{Context, Payload};
use crate::{Handler, HandlerError};

pub mod event;
pub mod request;
pub mod response;

pub use event::{ProxyEvent, ProxyIdentity, ProxyRequestContext};
pub use request::{CONTEXT_HEADER, EVENT_HEADER, build_request};
pub use response::{DEFAULT_CONTENT_TYPE, ProxyResponse, ResponseCollector};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("parse proxy event: {0}")]
    Event(#[source] serde_json::Error),
    #[error("parse request path: {0}")]
    Path(#[source] url::ParseError),
    #[error("decode base64 request body: {0}")]
    Base64(#[source] base64::DecodeError),
    #[error("invalid http method {0:?}")]
    Method(String),
    #[error("invalid header name {0:?}")]
    HeaderName(String),
    #[error("invalid value for header {0:?}")]
    HeaderValue(String),
    #[error("marshal proxy event: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("create request: {0}")]
    Request(#[source] axum::http::Error),
}

/// Synchronous HTTP request handling.
pub trait ServeHttp: Send + Sync + 'static {
    fn serve(&self, request: Request<Bytes>, response: &mut ResponseCollector);
}

impl<F> ServeHttp for F
where
    F: Fn(Request<Bytes>, &mut ResponseCollector) + Send + Sync + 'static,
{
    fn serve(&self, request: Request<Bytes>, response: &mut ResponseCollector) {
        self(request, response)
    }
}

/// [`Handler`] that adapts a [`ServeHttp`] implementation to proxy events.
pub struct ProxyHandler<S> {
    service: Arc<S>,
    text_types: Arc<TextContentTypes>,
}

/// Adapts `service` with the default text content types.
pub fn serve<S: ServeHttp>(service: S) -> ProxyHandler<S> {
    ProxyHandler::new(service, TextContentTypes::default())
}

impl<S: ServeHttp> ProxyHandler<S> {
    pub fn new(service: S, text_types: TextContentTypes) -> Self {
        Self {
            service: Arc::new(service),
            text_types: Arc::new(text_types),
        }
    }

    /// Runs one proxy event through the service synchronously.
    pub fn call(&self, payload: &Payload, context: &Context) -> Result<ProxyResponse, ProxyError> {
        handle_event(&*self.service, &self.text_types, payload, context)
    }
}

impl<S: ServeHttp> Handler for ProxyHandler<S> {
    type Output = ProxyResponse;

    async fn handle(&self, payload: Payload, context: Context) -> Result<ProxyResponse, HandlerError> {
        let service = Arc::clone(&self.service);
        let text_types = Arc::clone(&self.text_types);
        // the service may block, so keep it off the async workers
        let response = tokio::task::spawn_blocking(move || {
            handle_event(&*service, &text_types, &payload, &context)
        })
        .await?;
        Ok(response?)
    }
}

fn handle_event<S: ServeHttp>(
    service: &S,
    text_types: &TextContentTypes,
    payload: &Payload,
    context: &Context,
) -> Result<ProxyResponse, ProxyError> {
    let event: ProxyEvent = serde_json::from_str(payload.get()).map_err(ProxyError::Event)?;
    debug!("proxying {} {}", event.http_method, event.path);

    let request = build_request(event, context)?;
    let mut collector = ResponseCollector::new();
    service.serve(request, &mut collector);
    Ok(collector.finish(text_types))
}
