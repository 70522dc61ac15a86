//! Usage: Authorization endpoint URL assembly (PKCE + state).

use crate::shared::error::AppResult;
use reqwest::Url;

const FIXED_PARAMS: [&str; 7] = [
    "response_type",
    "client_id",
    "redirect_uri",
    "scope",
    "state",
    "code_challenge",
    "code_challenge_method",
];

#[derive(Debug, Clone, Default)]
pub struct AuthorizationRequest {
    pub authorization_endpoint: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: String,
    pub challenge: String,
    /// Provider-specific extras; keys colliding with the fixed set are dropped.
    pub extra_params: Vec<(String, String)>,
}

fn is_fixed(key: &str) -> bool {
    FIXED_PARAMS.contains(&key)
}

/// Pure: no I/O. Query keys already on the endpoint survive unless they collide with the fixed set.
pub fn build(req: &AuthorizationRequest) -> AppResult<String> {
    let mut url = Url::parse(req.authorization_endpoint.trim())
        .map_err(|e| format!("SEC_INVALID_INPUT: invalid authorization endpoint: {e}"))?;

    let existing: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_fixed(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.set_query(None);

    {
        let mut query = url.query_pairs_mut();
        for (k, v) in &existing {
            query.append_pair(k, v);
        }
        query.append_pair("response_type", "code");
        query.append_pair("client_id", req.client_id.trim());
        query.append_pair("redirect_uri", req.redirect_uri.trim());
        query.append_pair("scope", req.scope.trim());
        query.append_pair("state", &req.state);
        query.append_pair("code_challenge", &req.challenge);
        query.append_pair("code_challenge_method", "S256");

        let mut seen: Vec<&str> = existing.iter().map(|(k, _)| k.as_str()).collect();
        for (k, v) in &req.extra_params {
            if is_fixed(k) || seen.contains(&k.as_str()) {
                tracing::debug!(param = %k, "authorization url: ignoring duplicate extra param");
                continue;
            }
            query.append_pair(k, v);
            seen.push(k.as_str());
        }
    }

    Ok(url.into())
}
