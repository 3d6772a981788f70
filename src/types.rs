use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::HandlerError;

/// Opaque event body of one invocation, kept byte-for-byte as the host sent it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Box<RawValue>);

impl Payload {
    pub fn from_raw(raw: Box<RawValue>) -> Self {
        Self(raw)
    }

    /// Wraps a JSON text. Fails when the text is not a single JSON value.
    pub fn from_json(json: impl Into<String>) -> Result<Self, serde_json::Error> {
        RawValue::from_string(json.into()).map(Self)
    }

    pub fn null() -> Self {
        // "null" is always a valid JSON value
        Self(RawValue::NULL.to_owned())
    }

    pub fn get(&self) -> &str {
        self.0.get()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.get().as_bytes()
    }

    /// Decodes the payload into an event-specific type.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_str(self.0.get()).map_err(|e| HandlerError::plain(e.to_string()))
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::null()
    }
}

/// Reads an explicit `null` as the field's default value.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Federated identity of the caller, present when the invocation was made through Cognito.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default, deserialize_with = "null_as_default")]
    pub cognito_identity_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cognito_identity_pool_id: String,
}

/// Invocation context delivered with every request.
///
/// Missing or `null` fields take their default value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Context {
    #[serde(rename = "invokeid", deserialize_with = "null_as_default")]
    pub invoke_id: String,
    #[serde(rename = "awsRequestId", deserialize_with = "null_as_default")]
    pub request_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub function_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub function_version: String,
    #[serde(deserialize_with = "null_as_default")]
    pub log_group_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub log_stream_name: String,
    #[serde(rename = "memoryLimitInMB", deserialize_with = "null_as_default")]
    pub memory_limit_in_mb: String,
    #[serde(deserialize_with = "null_as_default")]
    pub is_default_function_version: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_context: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(deserialize_with = "null_as_default")]
    pub invoked_function_arn: String,
}

impl Context {
    /// Raw client context text, empty when the host sent none.
    pub fn client_context_json(&self) -> &str {
        self.client_context.as_deref().map(RawValue::get).unwrap_or("")
    }
}

/// One decoded request frame.
#[derive(Debug, Clone, Deserialize)]
pub struct InvocationRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub event: Payload,
    #[serde(default)]
    pub context: Option<Context>,
}

/// Error rendered into a response frame.
///
/// `Plain` serializes as a bare string, `Structured` as `{"errorType", "errorMessage"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvocationError {
    Plain(String),
    #[serde(rename_all = "camelCase")]
    Structured {
        error_type: String,
        error_message: String,
    },
}

impl From<HandlerError> for InvocationError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Plain(message) => InvocationError::Plain(message),
            HandlerError::Structured {
                error_type,
                error_message,
            } => InvocationError::Structured {
                error_type,
                error_message,
            },
        }
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationError::Plain(message) => f.write_str(message),
            InvocationError::Structured {
                error_type,
                error_message,
            } => write!(f, "{}: {}", error_type, error_message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Value(Value),
    Error(InvocationError),
}

/// One response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl InvocationResult {
    pub fn value(id: Option<String>, value: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Value(value),
        }
    }

    pub fn error(id: Option<String>, error: impl Into<InvocationError>) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_structured_error_is_not_flattened() {
        let result = InvocationResult::error(
            Some("7".to_string()),
            HandlerError::structured("X", "Y"),
        );
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"id": "7", "error": {"errorType": "X", "errorMessage": "Y"}})
        );
    }

    #[test]
    fn test_plain_error_is_a_string() {
        let result = InvocationResult::error(None, HandlerError::plain("boom"));
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"error": "boom"})
        );
    }

    #[test]
    fn test_null_value_is_still_emitted() {
        let result = InvocationResult::value(None, Value::Null);
        assert_eq!(serde_json::to_string(&result).unwrap(), r#"{"value":null}"#);
    }

    #[test]
    fn test_request_keeps_event_text_verbatim() {
        let frame = r#"{"id":"a","event":{ "foo" :  "bar" },"context":{"invokeid":"test","memoryLimitInMB":"128","identity":{"cognitoIdentityId":"i","cognitoIdentityPoolId":"p"}}}"#;
        let request: InvocationRequest = serde_json::from_str(frame).unwrap();
        assert_eq!(request.id.as_deref(), Some("a"));
        assert_eq!(request.event.get(), r#"{ "foo" :  "bar" }"#);
        let context = request.context.unwrap();
        assert_eq!(context.invoke_id, "test");
        assert_eq!(context.memory_limit_in_mb, "128");
        assert_eq!(
            context.identity,
            Some(Identity {
                cognito_identity_id: "i".to_string(),
                cognito_identity_pool_id: "p".to_string(),
            })
        );
    }

    #[test]
    fn test_null_context_fields_take_defaults() {
        let frame = r#"{"id":"n","event":1,"context":{"invokeid":"inv","functionVersion":null,"logStreamName":null,"isDefaultFunctionVersion":null,"clientContext":null,"identity":{"cognitoIdentityId":null}}}"#;
        let request: InvocationRequest = serde_json::from_str(frame).unwrap();
        let context = request.context.unwrap();
        assert_eq!(context.invoke_id, "inv");
        assert_eq!(context.function_version, "");
        assert_eq!(context.log_stream_name, "");
        assert!(!context.is_default_function_version);
        assert_eq!(context.client_context_json(), "");
        assert_eq!(context.identity, Some(Identity::default()));
    }

    #[test]
    fn test_request_without_event_or_context() {
        let request: InvocationRequest = serde_json::from_str("{}").unwrap();
        assert!(request.id.is_none());
        assert_eq!(request.event.get(), "null");
        assert!(request.context.is_none());
    }

    #[test]
    fn test_payload_parse_failure_is_plain() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Event {
            name: String,
        }
        let payload = Payload::from_json(r#"{"name": 3}"#).unwrap();
        match payload.parse::<Event>() {
            Err(HandlerError::Plain(message)) => assert!(message.contains("invalid type")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
