//! Usage: Token endpoint calls (authorization_code + refresh_token grants).

use crate::shared::error::{AppError, AppResult};
use crate::shared::security::mask_token;
use serde_json::Value;

const ERROR_BODY_SNIPPET_CHARS: usize = 500;

#[derive(Clone)]
pub struct TokenExchangeRequest {
    pub token_endpoint: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub code: String,
    pub code_verifier: String,
}

#[derive(Clone)]
pub struct TokenRefreshRequest {
    pub token_endpoint: String,
    pub client_id: String,
    pub refresh_token: String,
}

/// Partial population is legal: providers may omit the refresh token or expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenExchangeResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_seconds: Option<i64>,
}

impl std::fmt::Debug for TokenExchangeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeResult")
            .field("access_token", &mask_token(&self.access_token))
            .field(
                "refresh_token",
                &self.refresh_token.as_deref().map(mask_token),
            )
            .field("expires_in_seconds", &self.expires_in_seconds)
            .finish()
    }
}

/// Single form POST; never retried.
pub async fn exchange(
    client: &reqwest::Client,
    req: &TokenExchangeRequest,
) -> AppResult<TokenExchangeResult> {
    let form = [
        ("grant_type", "authorization_code"),
        ("client_id", req.client_id.trim()),
        ("code", req.code.trim()),
        ("redirect_uri", req.redirect_uri.trim()),
        ("code_verifier", req.code_verifier.trim()),
    ];
    post_form(client, req.token_endpoint.trim(), &form, "token exchange").await
}

pub async fn refresh(
    client: &reqwest::Client,
    req: &TokenRefreshRequest,
) -> AppResult<TokenExchangeResult> {
    let refresh_token = req.refresh_token.trim();
    if refresh_token.is_empty() {
        return Err("SEC_INVALID_INPUT: refresh token is required".into());
    }
    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", req.client_id.trim()),
        ("refresh_token", refresh_token),
    ];
    post_form(client, req.token_endpoint.trim(), &form, "token refresh").await
}

async fn post_form(
    client: &reqwest::Client,
    endpoint: &str,
    form: &[(&str, &str)],
    what: &str,
) -> AppResult<TokenExchangeResult> {
    if endpoint.is_empty() {
        return Err("SEC_INVALID_INPUT: token endpoint is required".into());
    }

    let response = client
        .post(endpoint)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| {
            AppError::with_source(
                "OAUTH_TOKEN_REQUEST",
                format!("{what} request failed: {e}"),
                e,
            )
        })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| {
        AppError::new(
            "OAUTH_TOKEN_REQUEST",
            format!("{what} response read failed: {e}"),
        )
    })?;

    if !status.is_success() {
        tracing::warn!(status = status.as_u16(), "{what} rejected by token endpoint");
        return Err(AppError::new(
            "OAUTH_TOKEN_HTTP",
            format!(
                "status={} body={}",
                status.as_u16(),
                sanitize_error_body_snippet(&body)
            ),
        ));
    }

    parse_token_body(&body)
}

pub(crate) fn parse_token_body(body: &str) -> AppResult<TokenExchangeResult> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        AppError::new(
            "OAUTH_TOKEN_RESPONSE",
            format!("token response json invalid: {e}"),
        )
    })?;

    let access_token = non_empty_str(&value, "access_token").ok_or_else(|| {
        AppError::new(
            "OAUTH_TOKEN_RESPONSE",
            "token response missing access_token",
        )
    })?;

    Ok(TokenExchangeResult {
        access_token,
        refresh_token: non_empty_str(&value, "refresh_token"),
        expires_in_seconds: value.get("expires_in").and_then(parse_i64_lossy),
    })
}

fn non_empty_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_i64_lossy(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lc = key.trim().to_ascii_lowercase();
    key_lc.contains("token") || key_lc.contains("secret") || key_lc == "authorization"
}

fn redact_sensitive_json_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if is_sensitive_key(key) {
                    if let Some(raw) = nested.as_str() {
                        *nested = Value::String(mask_token(raw));
                        continue;
                    }
                }
                redact_sensitive_json_fields(nested);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_sensitive_json_fields),
        _ => {}
    }
}

/// JSON bodies keep their shape with token-like fields masked; anything else is truncated as-is.
fn sanitize_error_body_snippet(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(body) {
        if value.is_object() || value.is_array() {
            redact_sensitive_json_fields(&mut value);
            if let Ok(encoded) = serde_json::to_string(&value) {
                return encoded.chars().take(ERROR_BODY_SNIPPET_CHARS).collect();
            }
        }
    }
    body.trim().chars().take(ERROR_BODY_SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_and_partial_bodies() {
        let full = parse_token_body(
            r#"{"access_token":"tok","refresh_token":"ref","expires_in":3600,"token_type":"Bearer"}"#,
        )
        .expect("full");
        assert_eq!(full.access_token, "tok");
        assert_eq!(full.refresh_token.as_deref(), Some("ref"));
        assert_eq!(full.expires_in_seconds, Some(3600));

        let partial = parse_token_body(r#"{"access_token":"tok","expires_in":"120"}"#)
            .expect("partial");
        assert_eq!(partial.refresh_token, None);
        assert_eq!(partial.expires_in_seconds, Some(120));
    }

    #[test]
    fn malformed_or_tokenless_bodies_are_response_errors() {
        let err = parse_token_body("<html>oops</html>").expect_err("not json");
        assert_eq!(err.code(), "OAUTH_TOKEN_RESPONSE");
        let err = parse_token_body(r#"{"token_type":"Bearer"}"#).expect_err("no token");
        assert_eq!(err.code(), "OAUTH_TOKEN_RESPONSE");
    }

    #[test]
    fn parse_i64_lossy_supports_number_and_string() {
        assert_eq!(parse_i64_lossy(&Value::from(1200)), Some(1200));
        assert_eq!(parse_i64_lossy(&Value::from("3600")), Some(3600));
        assert_eq!(parse_i64_lossy(&Value::from("x")), None);
    }

    #[test]
    fn error_snippet_masks_token_fields() {
        let raw = r#"{"error":"invalid_grant","refresh_token":"abcd1234xyz9876"}"#;
        let snippet = sanitize_error_body_snippet(raw);
        assert!(snippet.contains("invalid_grant"));
        assert!(snippet.contains(&mask_token("abcd1234xyz9876")));
        assert!(!snippet.contains("abcd1234xyz9876"));

        assert_eq!(sanitize_error_body_snippet("\"invalid_grant\""), "\"invalid_grant\"");
        assert_eq!(sanitize_error_body_snippet("invalid_grant\n"), "invalid_grant");
    }

    #[test]
    fn debug_masks_tokens() {
        let result = TokenExchangeResult {
            access_token: "access-token-value-123".to_string(),
            refresh_token: Some("refresh-token-value-456".to_string()),
            expires_in_seconds: None,
        };
        let rendered = format!("{result:?}");
        assert!(!rendered.contains("access-token-value-123"));
        assert!(!rendered.contains("refresh-token-value-456"));
    }

    #[tokio::test]
    async fn transport_failure_is_request_error() {
        let client = reqwest::Client::new();
        let unused = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = unused.local_addr().expect("addr");
        drop(unused);

        let err = exchange(
            &client,
            &TokenExchangeRequest {
                token_endpoint: format!("http://{addr}/token"),
                client_id: "cli".to_string(),
                redirect_uri: "http://127.0.0.1/callback".to_string(),
                code: "abc".to_string(),
                code_verifier: "v".to_string(),
            },
        )
        .await
        .expect_err("nothing listening");
        assert_eq!(err.code(), "OAUTH_TOKEN_REQUEST");
    }
}
