use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::http::header::HOST;
use axum::http::{HeaderName, HeaderValue, Method, Request};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use url::{Position, Url};

use super::ProxyError;
use super::event::ProxyEvent;
use crate::types::Context;

/// Serialized event, minus its body, for handlers that need the raw event.
pub const EVENT_HEADER: &str = "x-apigatewayproxy-event";
/// The invocation's client context as JSON text.
pub const CONTEXT_HEADER: &str = "x-apigatewayproxy-context";

const TRUNCATED_BODY: &str = "... truncated";

/// Builds an HTTP request from a proxy event.
///
/// The decoded event (with its body replaced) is also attached as a request
/// extension.
pub fn build_request(mut event: ProxyEvent, context: &Context) -> Result<Request<Bytes>, ProxyError> {
    let uri = request_uri(&event.path, event.query_string_parameters.as_ref())?;

    let body = match event.body.take() {
        Some(body) if event.is_base64_encoded => {
            Bytes::from(STANDARD.decode(body.as_bytes()).map_err(ProxyError::Base64)?)
        }
        Some(body) => Bytes::from(body),
        None => Bytes::new(),
    };

    let method = match event.http_method.as_str() {
        "" => Method::GET,
        name => Method::from_bytes(name.as_bytes())
            .map_err(|_| ProxyError::Method(event.http_method.clone()))?,
    };

    let mut request = Request::builder()
        .method(method)
        .uri(uri.as_str())
        .body(body)
        .map_err(ProxyError::Request)?;

    let headers = request.headers_mut();
    for (name, value) in event.headers.iter().flatten() {
        headers.insert(header_name(name)?, header_value(name, value)?);
    }

    event.body = Some(TRUNCATED_BODY.to_string());
    let serialized = serde_json::to_string(&event).map_err(ProxyError::Serialize)?;
    headers.insert(
        HeaderName::from_static(EVENT_HEADER),
        header_value(EVENT_HEADER, &serialized)?,
    );
    headers.insert(
        HeaderName::from_static(CONTEXT_HEADER),
        header_value(CONTEXT_HEADER, &client_context(context))?,
    );

    if let Some(host) = event.header("host") {
        headers.insert(HOST, header_value("host", host)?);
    }

    request.extensions_mut().insert(event);
    Ok(request)
}

/// Joins the event path with its query parameters. An event parameter
/// replaces every value of the same name already in the path; other path
/// parameters keep all their values. The query is re-encoded in key order.
fn request_uri(
    path: &str,
    params: Option<&BTreeMap<String, String>>,
) -> Result<String, ProxyError> {
    let base = Url::parse("http://localhost/").map_err(ProxyError::Path)?;
    let mut url = Url::options()
        .base_url(Some(&base))
        .parse(path)
        .map_err(ProxyError::Path)?;

    let params = params.into_iter().flatten();
    let mut query: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .filter(|(key, _)| !params.clone().any(|(name, _)| name == key))
        .collect();
    query.extend(params.map(|(k, v)| (k.clone(), v.clone())));
    // stable, so repeated keys keep their order
    query.sort_by(|a, b| a.0.cmp(&b.0));

    url.set_query(None);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(&query);
    }
    url.set_fragment(None);

    Ok(url[Position::BeforePath..].to_string())
}

/// Client context as compact JSON, empty when absent.
fn client_context(context: &Context) -> String {
    let raw = context.client_context_json();
    serde_json::from_str::<serde_json::Value>(raw)
        .map(|value| value.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn header_name(name: &str) -> Result<HeaderName, ProxyError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| ProxyError::HeaderName(name.to_string()))
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, ProxyError> {
    HeaderValue::from_str(value).map_err(|_| ProxyError::HeaderValue(name.to_string()))
}
