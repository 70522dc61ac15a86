//! Usage: Environment login / token refresh, persisting the merged tokens.

use crate::app_state::AppContext;
use crate::environments::{self, Environment};
use crate::oauth::browser::BrowserOpener;
use crate::oauth::flow::{self, FlowConfig, FlowObserver, FlowTokens, NoopObserver};
use crate::oauth::token_exchange::{self, TokenRefreshRequest};
use crate::settings::AppSettings;
use crate::shared::error::{AppError, AppResult};

const SCOPE_VARIABLE: &str = "scope";

/// `variables["scope"]`, then the environment's own scope, then the configured default.
pub(crate) fn resolve_scope(env: &Environment, settings: &AppSettings) -> String {
    let from_vars = env
        .variables
        .get(SCOPE_VARIABLE)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty());
    let from_env = Some(env.scope.trim()).filter(|v| !v.is_empty());
    from_vars
        .or(from_env)
        .unwrap_or(settings.default_scope.as_str())
        .to_string()
}

pub(crate) fn flow_config(env: &Environment, settings: &AppSettings) -> AppResult<FlowConfig> {
    let required = [
        ("client_id", env.client_id.trim()),
        ("auth_url", env.auth_url.trim()),
        ("token_url", env.token_url.trim()),
    ];
    if let Some((field, _)) = required.iter().find(|(_, v)| v.is_empty()) {
        return Err(format!(
            "SEC_INVALID_INPUT: environment {} has no {field}",
            env.name
        )
        .into());
    }

    Ok(FlowConfig {
        client_id: env.client_id.trim().to_string(),
        authorization_endpoint: env.auth_url.trim().to_string(),
        token_endpoint: env.token_url.trim().to_string(),
        redirect_uri: env.redirect_uri.trim().to_string(),
        scope: resolve_scope(env, settings),
        extra_params: Vec::new(),
        fallback_bind_address: settings.callback_bind_address.clone(),
        callback_timeout: settings.callback_timeout(),
    })
}

fn merge_tokens(env: &mut Environment, tokens: &FlowTokens) {
    env.apply_tokens(
        &tokens.access_token,
        tokens.refresh_token.as_deref(),
        tokens.expires_at.clone(),
    );
}

/// Run the authorization code flow for `env` and persist the result.
pub async fn environment_oauth_login(
    ctx: &AppContext,
    env: Environment,
    browser: &dyn BrowserOpener,
) -> AppResult<Environment> {
    environment_oauth_login_observed(ctx, env, browser, &NoopObserver).await
}

pub async fn environment_oauth_login_observed(
    ctx: &AppContext,
    mut env: Environment,
    browser: &dyn BrowserOpener,
    observer: &dyn FlowObserver,
) -> AppResult<Environment> {
    let config = flow_config(&env, ctx.settings())?;
    tracing::info!(env = %env.name, scope = %config.scope, "starting oauth login");

    let tokens = flow::run(ctx.http(), &config, browser, observer).await?;
    merge_tokens(&mut env, &tokens);

    environments::save_environment(ctx.db(), &env)
        .await
        .map_err(|e| AppError::new(e.code(), format!("failed to save tokens: {}", e.message())))?;
    tracing::info!(env = %env.name, "oauth tokens saved");
    Ok(env)
}

/// Manual refresh-token grant; nothing schedules this automatically.
pub async fn environment_refresh_token(
    ctx: &AppContext,
    mut env: Environment,
) -> AppResult<Environment> {
    if env.refresh_token.trim().is_empty() {
        return Err(format!(
            "SEC_INVALID_INPUT: environment {} has no refresh token",
            env.name
        )
        .into());
    }
    if env.token_url.trim().is_empty() {
        return Err(format!("SEC_INVALID_INPUT: environment {} has no token_url", env.name).into());
    }

    let result = token_exchange::refresh(
        ctx.http(),
        &TokenRefreshRequest {
            token_endpoint: env.token_url.clone(),
            client_id: env.client_id.clone(),
            refresh_token: env.refresh_token.clone(),
        },
    )
    .await?;
    merge_tokens(&mut env, &FlowTokens::from_exchange(result));

    environments::save_environment(ctx.db(), &env).await?;
    tracing::info!(env = %env.name, "oauth tokens refreshed");
    Ok(env)
}
