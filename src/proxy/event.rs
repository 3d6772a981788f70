use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::types::null_as_default;

/// API caller identification information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyIdentity {
    pub api_key: Option<String>,
    pub account_id: Option<String>,
    pub user_agent: Option<String>,
    pub source_ip: Option<String>,
    pub access_key: Option<String>,
    pub caller: Option<String>,
    pub user: Option<String>,
    pub user_arn: Option<String>,
    pub cognito_identity_id: Option<String>,
    pub cognito_identity_pool_id: Option<String>,
    pub cognito_authentication_type: Option<String>,
    pub cognito_authentication_provider: Option<String>,
}

/// Contextual information about one proxied API call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyRequestContext {
    #[serde(deserialize_with = "null_as_default")]
    pub api_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub resource_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub request_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub http_method: String,
    #[serde(deserialize_with = "null_as_default")]
    pub resource_path: String,
    #[serde(deserialize_with = "null_as_default")]
    pub account_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub stage: String,
    pub identity: Option<ProxyIdentity>,
    /// Cognito user-pool claims, or the context map of a custom authorizer.
    #[serde(deserialize_with = "deserialize_authorizer")]
    pub authorizer: BTreeMap<String, String>,
}

/// An inbound HTTP call delivered as an invocation payload.
///
/// `null` reads the same as a missing field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyEvent {
    #[serde(deserialize_with = "null_as_default")]
    pub http_method: String,
    /// Single-valued; duplicates cannot be represented.
    pub headers: Option<BTreeMap<String, String>>,
    /// Resource template with raw placeholders, e.g. `/users/{id}`.
    #[serde(deserialize_with = "null_as_default")]
    pub resource: String,
    pub path_parameters: Option<BTreeMap<String, String>>,
    /// Concrete path with the placeholders filled in.
    #[serde(deserialize_with = "null_as_default")]
    pub path: String,
    pub query_string_parameters: Option<BTreeMap<String, String>>,
    pub body: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub is_base64_encoded: bool,
    pub stage_variables: Option<BTreeMap<String, String>>,
    pub request_context: Option<ProxyRequestContext>,
}

impl ProxyEvent {
    /// Looks up a request header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.as_ref().and_then(|headers| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        })
    }
}

/// The authorizer object is either `{"claims": {...}}` from a Cognito user pool
/// or a flat map from a custom authorizer. Non-string scalars in a custom map
/// keep their JSON text.
fn deserialize_authorizer<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();

    let claims = raw
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("claims"))
        .and_then(|(_, value)| value.as_object())
        .cloned();
    let entries: BTreeMap<String, Value> = match claims {
        Some(claims) => claims.into_iter().collect(),
        None => raw,
    };

    Ok(entries
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn context_with(authorizer: Value) -> ProxyRequestContext {
        serde_json::from_value(json!({
            "apiId": "api",
            "requestId": "req",
            "stage": "prod",
            "authorizer": authorizer,
        }))
        .unwrap()
    }

    #[test]
    fn test_cognito_claims_authorizer() {
        let context = context_with(json!({"claims": {"sub": "u-1", "email": "a@b.c"}}));
        assert_eq!(context.api_id, "api");
        assert_eq!(
            context.authorizer,
            BTreeMap::from([
                ("email".to_string(), "a@b.c".to_string()),
                ("sub".to_string(), "u-1".to_string()),
            ])
        );
    }

    #[test]
    fn test_custom_authorizer() {
        let context = context_with(json!({"principalId": "me", "scope": "read", "ttl": 30}));
        assert_eq!(
            context.authorizer,
            BTreeMap::from([
                ("principalId".to_string(), "me".to_string()),
                ("scope".to_string(), "read".to_string()),
                ("ttl".to_string(), "30".to_string()),
            ])
        );
    }

    #[test]
    fn test_missing_and_null_authorizer() {
        let missing: ProxyRequestContext = serde_json::from_value(json!({})).unwrap();
        assert!(missing.authorizer.is_empty());
        let null = context_with(Value::Null);
        assert!(null.authorizer.is_empty());
    }

    #[test]
    fn test_api_gateway_event() {
        let event: ProxyEvent = serde_json::from_value(json!({
            "resource": "/users/{id}",
            "path": "/users/42",
            "httpMethod": "GET",
            "headers": {"Host": "example.com", "Accept": "*/*"},
            "queryStringParameters": null,
            "pathParameters": {"id": "42"},
            "stageVariables": null,
            "requestContext": {
                "accountId": "123",
                "resourceId": "r",
                "stage": "prod",
                "requestId": "req",
                "identity": {"sourceIp": "10.0.0.1", "userAgent": "curl"},
                "resourcePath": "/users/{id}",
                "httpMethod": "GET",
                "apiId": "api"
            },
            "body": null,
            "isBase64Encoded": false
        }))
        .unwrap();
        assert_eq!(event.header("host"), Some("example.com"));
        assert!(event.query_string_parameters.is_none());
        assert_eq!(event.body, None);
        let context = event.request_context.unwrap();
        assert_eq!(context.resource_path, "/users/{id}");
        assert_eq!(
            context.identity.unwrap().source_ip.as_deref(),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn test_null_fields_read_as_missing() {
        let event: ProxyEvent = serde_json::from_value(json!({
            "httpMethod": null,
            "resource": null,
            "path": "/x",
            "isBase64Encoded": null,
            "requestContext": {"apiId": null, "stage": "prod", "resourcePath": null}
        }))
        .unwrap();
        assert_eq!(event.http_method, "");
        assert_eq!(event.resource, "");
        assert!(!event.is_base64_encoded);
        let context = event.request_context.unwrap();
        assert_eq!(context.api_id, "");
        assert_eq!(context.stage, "prod");
    }
}
