use std::collections::BTreeMap;
use std::io;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::ProxyError;
use crate::config::TextContentTypes;

pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Reply shape the proxy host expects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

impl ProxyResponse {
    /// The raw body bytes, undoing base64 when it was applied.
    pub fn decoded_body(&self) -> Result<Vec<u8>, ProxyError> {
        if self.is_base64_encoded {
            STANDARD.decode(&self.body).map_err(ProxyError::Base64)
        } else {
            Ok(self.body.clone().into_bytes())
        }
    }
}

/// Header snapshot taken when the response is committed.
#[derive(Debug)]
struct Committed {
    status: StatusCode,
    headers: BTreeMap<String, String>,
}

/// Response sink handed to HTTP handlers.
///
/// Headers may be changed until the first body write or an explicit
/// [`write_header`](Self::write_header); after that the snapshot is fixed and
/// further header changes have no effect.
#[derive(Debug, Default)]
pub struct ResponseCollector {
    headers: HeaderMap,
    committed: Option<Committed>,
    body: Vec<u8>,
}

impl ResponseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_committed(&self) -> bool {
        self.committed.is_some()
    }

    /// Commits the status and headers. Only the first call has any effect.
    pub fn write_header(&mut self, status: StatusCode) {
        if self.committed.is_some() {
            return;
        }

        let mut headers = BTreeMap::new();
        for name in self.headers.keys() {
            // last value wins; multi-valued headers are not representable
            if let Some(value) = self.headers.get_all(name).iter().last() {
                headers.insert(
                    canonical_header_key(name.as_str()),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                );
            }
        }
        let content_type = canonical_header_key(CONTENT_TYPE.as_str());
        if headers.get(&content_type).is_none_or(|v| v.is_empty()) {
            headers.insert(content_type, DEFAULT_CONTENT_TYPE.to_string());
        }

        self.committed = Some(Committed { status, headers });
    }

    /// Appends to the body, committing a 200 response first if needed.
    pub fn write_body(&mut self, data: &[u8]) {
        if self.committed.is_none() {
            self.write_header(StatusCode::OK);
        }
        self.body.extend_from_slice(data);
    }

    /// Produces the final response, encoding the body as base64 unless the
    /// committed content type is text-like.
    pub fn finish(mut self, text_types: &TextContentTypes) -> ProxyResponse {
        if self.committed.is_none() {
            self.write_header(StatusCode::OK);
        }
        let Committed { status, headers } = self.committed.unwrap_or_else(|| Committed {
            status: StatusCode::OK,
            headers: BTreeMap::new(),
        });

        let content_type = headers
            .get(&canonical_header_key(CONTENT_TYPE.as_str()))
            .map(String::as_str)
            .unwrap_or_default();
        let is_base64_encoded = !text_types.is_text(content_type);
        let body = if is_base64_encoded {
            STANDARD.encode(&self.body)
        } else {
            String::from_utf8_lossy(&self.body).into_owned()
        };

        ProxyResponse {
            status_code: status.as_u16(),
            headers,
            body,
            is_base64_encoded,
        }
    }
}

impl io::Write for ResponseCollector {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_body(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// `content-type` -> `Content-Type`.
fn canonical_header_key(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
