use std::fmt;
use std::future::Future;

use serde::Serialize;

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod proxy;
pub mod types;

pub use codec::{CodecError, FrameReader, FrameWriter};
pub use config::{Concurrency, Config, ConfigError, TextContentTypes};
pub use dispatcher::{DispatchError, Dispatcher};
pub use types::{Context, Identity, InvocationError, InvocationRequest, InvocationResult, Payload};

/// Failure returned by a [`Handler`].
///
/// `Structured` carries a machine-readable type the host can branch on,
/// `Plain` is rendered as a bare message. Any `std::error::Error` converts
/// into `Plain`, so handlers can use `?` freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    Plain(String),
    Structured {
        error_type: String,
        error_message: String,
    },
}

impl HandlerError {
    pub fn plain(message: impl Into<String>) -> Self {
        HandlerError::Plain(message.into())
    }

    pub fn structured(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        HandlerError::Structured {
            error_type: error_type.into(),
            error_message: error_message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Plain(message) => f.write_str(message),
            HandlerError::Structured {
                error_type,
                error_message,
            } => write!(f, "{}: {}", error_type, error_message),
        }
    }
}

impl<E: std::error::Error> From<E> for HandlerError {
    fn from(err: E) -> Self {
        HandlerError::Plain(err.to_string())
    }
}

/// Application logic behind the dispatcher.
///
/// One call per decoded request. Calls may overlap, so implementations
/// must not keep per-invocation state on `self`.
pub trait Handler: Send + Sync + 'static {
    type Output: Serialize + Send + 'static;

    fn handle(
        &self,
        payload: Payload,
        context: Context,
    ) -> impl Future<Output = Result<Self::Output, HandlerError>> + Send;
}

/// Handler backed by an async function. See [`handler_fn`].
#[derive(Debug, Clone, Copy)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps an async function or closure as a [`Handler`].
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn { f }
}

impl<F, Fut, T> Handler for HandlerFn<F>
where
    F: Fn(Payload, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, HandlerError>> + Send,
    T: Serialize + Send + 'static,
{
    type Output = T;

    fn handle(
        &self,
        payload: Payload,
        context: Context,
    ) -> impl Future<Output = Result<T, HandlerError>> + Send {
        (self.f)(payload, context)
    }
}

/// Runs `handler` against the process's stdin and stdout until stdin ends.
pub async fn run_stdio<H: Handler>(handler: H, config: &Config) -> Result<(), DispatchError> {
    Dispatcher::new(tokio::io::stdin(), tokio::io::stdout())
        .with_config(config)
        .run(handler)
        .await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_std_errors_become_plain() {
        fn parse(input: &str) -> Result<u32, HandlerError> {
            Ok(input.parse::<u32>()?)
        }
        assert_eq!(
            parse("x"),
            Err(HandlerError::plain("invalid digit found in string"))
        );
    }

    #[test]
    fn test_structured_display() {
        let err = HandlerError::structured("NotFound", "no such user");
        assert_eq!(err.to_string(), "NotFound: no such user");
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let handler = handler_fn(|payload: Payload, context: Context| async move {
            let event: serde_json::Value = payload.parse()?;
            Ok::<_, HandlerError>(json!({"event": event, "invokeid": context.invoke_id}))
        });
        let context = Context {
            invoke_id: "abc".to_string(),
            ..Default::default()
        };
        let output = handler
            .handle(Payload::from_json(r#"{"k":1}"#).unwrap(), context)
            .await
            .unwrap();
        assert_eq!(output, json!({"event": {"k": 1}, "invokeid": "abc"}));
    }
}
