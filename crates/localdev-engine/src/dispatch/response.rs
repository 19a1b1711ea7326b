//! Outcome-to-response translation.

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use serde_json::Value;

use crate::errors::TranslationError;
use crate::types::ResponseMode;

/// Turn a successful outcome value into a response for `mode`.
pub fn translate(mode: ResponseMode, value: Value) -> Result<Response, TranslationError> {
    match mode {
        ResponseMode::Echo => Ok(echo(value)),
        ResponseMode::FixedAcknowledge => Ok(StatusCode::NO_CONTENT.into_response()),
        ResponseMode::StatusCodeBody => status_code_body(value),
    }
}

/// A 500 carrying the failure message as plain text.
pub fn failure_response(message: &str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()).into_response()
}

fn echo(value: Value) -> Response {
    match value {
        Value::Null => StatusCode::OK.into_response(),
        Value::String(text) => (StatusCode::OK, text).into_response(),
        other => (StatusCode::OK, axum::Json(other)).into_response(),
    }
}

fn status_code_body(value: Value) -> Result<Response, TranslationError> {
    let Value::Object(mut fields) = value else {
        return Err(TranslationError::NotAnObject);
    };

    let status = match fields.get("statusCode") {
        None | Some(Value::Null) => StatusCode::OK,
        Some(raw) => {
            let code = raw
                .as_u64()
                .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
                .and_then(|n| u16::try_from(n).ok());
            code.and_then(|c| StatusCode::from_u16(c).ok())
                .ok_or_else(|| TranslationError::InvalidStatus {
                    value: raw.to_string(),
                })?
        }
    };

    let encoded = fields
        .get("isBase64Encoded")
        .is_some_and(|v| v.as_bool().unwrap_or(false) || v.as_str() == Some("true"));

    let mut json_body = false;
    let body = match fields.remove("body") {
        None | Some(Value::Null) => {
            if encoded {
                return Err(TranslationError::EncodedBodyNotString);
            }
            Body::empty()
        }
        Some(Value::String(text)) if encoded => Body::from(
            base64::engine::general_purpose::STANDARD.decode(text.trim())?,
        ),
        Some(_) if encoded => return Err(TranslationError::EncodedBodyNotString),
        Some(Value::String(text)) => Body::from(text),
        Some(other) => {
            json_body = true;
            Body::from(other.to_string())
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;

    if let Some(Value::Object(headers)) = fields.get("headers") {
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TranslationError::InvalidHeader { name: name.clone() })?;
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            let header_value = HeaderValue::from_str(&text)
                .map_err(|_| TranslationError::InvalidHeader { name: name.clone() })?;
            response.headers_mut().insert(header_name, header_value);
        }
    }
    if json_body && !response.headers().contains_key(CONTENT_TYPE) {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::json;

    async fn body_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn test_status_headers_body() {
        let response = translate(
            ResponseMode::StatusCodeBody,
            json!({"statusCode": 201, "headers": {"x-trace": "abc", "x-count": 3}, "body": "made"}),
        )
        .expect("translates");
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-trace"], "abc");
        assert_eq!(response.headers()["x-count"], "3");
        assert_eq!(body_bytes(response).await, b"made");
    }

    #[tokio::test]
    async fn test_base64_body_decoded() {
        let response = translate(
            ResponseMode::StatusCodeBody,
            json!({"statusCode": 200, "body": "aGVsbG8=", "isBase64Encoded": true}),
        )
        .expect("translates");
        assert_eq!(body_bytes(response).await, b"hello");
    }

    #[test]
    fn test_base64_flag_requires_string_body() {
        let err = translate(
            ResponseMode::StatusCodeBody,
            json!({"statusCode": 200, "body": {"not": "a string"}, "isBase64Encoded": true}),
        )
        .expect_err("non-string encoded body");
        assert!(matches!(err, TranslationError::EncodedBodyNotString));
    }

    #[test]
    fn test_non_object_and_bad_status() {
        assert!(matches!(
            translate(ResponseMode::StatusCodeBody, json!("plain")),
            Err(TranslationError::NotAnObject)
        ));
        assert!(matches!(
            translate(ResponseMode::StatusCodeBody, json!({"statusCode": 42})),
            Err(TranslationError::InvalidStatus { .. })
        ));
    }

    #[tokio::test]
    async fn test_object_body_serialized_as_json() {
        let response = translate(
            ResponseMode::StatusCodeBody,
            json!({"statusCode": "202", "body": {"ok": true}}),
        )
        .expect("translates");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(body_bytes(response).await, br#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_echo_and_acknowledge() {
        let echoed = translate(ResponseMode::Echo, json!({"a": 1})).expect("translates");
        assert_eq!(echoed.status(), StatusCode::OK);
        assert_eq!(body_bytes(echoed).await, br#"{"a":1}"#);

        let empty = translate(ResponseMode::Echo, Value::Null).expect("translates");
        assert!(body_bytes(empty).await.is_empty());

        let ack = translate(ResponseMode::FixedAcknowledge, json!("ignored")).expect("translates");
        assert_eq!(ack.status(), StatusCode::NO_CONTENT);
    }
}
