//! Usage: Named environments (base URL, OAuth client settings, tokens, variables).

use crate::db::{BindValue, Db};
use crate::domain::request_data::null_as_default;
use crate::shared::error::{db_err, AppResult};
use crate::shared::time::now_rfc3339;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub name: String,
    pub base_url: String,
    pub access_token: String,
    pub refresh_token: String,
    /// RFC 3339; empty when unknown.
    pub expires_at: String,
    pub auth_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
    #[serde(deserialize_with = "null_as_default")]
    pub variables: BTreeMap<String, String>,
    pub created_at: String,
    pub last_used: String,
    /// Opaque JSON blob owned by the UI; only its `accessToken` key is maintained here.
    pub oauth2_config: String,
}

impl Environment {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Merge freshly issued tokens. A missing refresh token keeps the stored one.
    pub fn apply_tokens(
        &mut self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<String>,
    ) {
        self.access_token = access_token.to_string();
        if let Some(refresh) = refresh_token.filter(|v| !v.trim().is_empty()) {
            self.refresh_token = refresh.to_string();
        }
        if let Some(expires_at) = expires_at {
            self.expires_at = expires_at;
        }
        self.rewrite_oauth2_config_token();
    }

    fn rewrite_oauth2_config_token(&mut self) {
        if self.oauth2_config.trim().is_empty() {
            return;
        }
        let mut value = match serde_json::from_str::<serde_json::Value>(&self.oauth2_config) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(env = %self.name, "oauth2_config is not valid json; left unchanged: {err}");
                return;
            }
        };
        let Some(obj) = value.as_object_mut() else {
            tracing::warn!(env = %self.name, "oauth2_config is not a json object; left unchanged");
            return;
        };
        obj.insert(
            "accessToken".to_string(),
            serde_json::Value::String(self.access_token.clone()),
        );
        self.oauth2_config = value.to_string();
    }
}

fn normalize_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("SEC_INVALID_INPUT: environment name is required".into());
    }
    Ok(name.to_string())
}

fn opt_text(row: &Row<'_>, col: &str) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(col)?.unwrap_or_default())
}

const SELECT_COLUMNS: &str = "name, base_url, access_token, refresh_token, expires_at, auth_url, \
token_url, client_id, client_secret, redirect_uri, scope, variables, created_at, last_used, oauth2_config";

/// Columns decode first; a bad `variables` blob is reported separately so the caller can skip the row.
fn row_to_parts(row: &Row<'_>) -> rusqlite::Result<(Environment, String)> {
    let env = Environment {
        name: row.get("name")?,
        base_url: opt_text(row, "base_url")?,
        access_token: opt_text(row, "access_token")?,
        refresh_token: opt_text(row, "refresh_token")?,
        expires_at: opt_text(row, "expires_at")?,
        auth_url: opt_text(row, "auth_url")?,
        token_url: opt_text(row, "token_url")?,
        client_id: opt_text(row, "client_id")?,
        client_secret: opt_text(row, "client_secret")?,
        redirect_uri: opt_text(row, "redirect_uri")?,
        scope: opt_text(row, "scope")?,
        variables: BTreeMap::new(),
        created_at: opt_text(row, "created_at")?,
        last_used: opt_text(row, "last_used")?,
        oauth2_config: opt_text(row, "oauth2_config")?,
    };
    let variables = opt_text(row, "variables")?;
    Ok((env, variables))
}

fn decode_variables(raw: &str) -> Result<BTreeMap<String, String>, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str::<Option<BTreeMap<String, String>>>(raw)?.unwrap_or_default())
}

pub async fn save_environment(db: &Db, env: &Environment) -> AppResult<()> {
    let name = normalize_name(&env.name)?;
    let variables = serde_json::to_string(&env.variables)
        .map_err(|e| format!("SYSTEM_ERROR: failed to encode environment variables: {e}"))?;

    let text = |v: &str| BindValue::Text(v.to_string());
    db.execute(
        r#"
INSERT INTO environments (
  name, base_url, access_token, refresh_token, expires_at, auth_url, token_url,
  client_id, client_secret, redirect_uri, scope, variables, oauth2_config, last_used
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
ON CONFLICT(name) DO UPDATE SET
  base_url = excluded.base_url,
  access_token = excluded.access_token,
  refresh_token = excluded.refresh_token,
  expires_at = excluded.expires_at,
  auth_url = excluded.auth_url,
  token_url = excluded.token_url,
  client_id = excluded.client_id,
  client_secret = excluded.client_secret,
  redirect_uri = excluded.redirect_uri,
  scope = excluded.scope,
  variables = excluded.variables,
  oauth2_config = excluded.oauth2_config,
  last_used = excluded.last_used
"#,
        vec![
            BindValue::Text(name),
            text(&env.base_url),
            text(&env.access_token),
            text(&env.refresh_token),
            text(&env.expires_at),
            text(&env.auth_url),
            text(&env.token_url),
            text(&env.client_id),
            text(&env.client_secret),
            text(&env.redirect_uri),
            text(&env.scope),
            BindValue::Text(variables),
            text(&env.oauth2_config),
            BindValue::Text(now_rfc3339()),
        ],
    )
    .await?;
    Ok(())
}

/// All environments ordered by name; rows whose variables fail to decode are skipped.
pub async fn get_environments(db: &Db) -> AppResult<Vec<Environment>> {
    let rows = db
        .read("environments_list", |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM environments ORDER BY name"
                ))
                .map_err(|e| db_err!("failed to prepare environments query: {e}"))?;
            let rows = stmt
                .query_map([], |row| Ok(row_to_parts(row)))
                .map_err(|e| db_err!("failed to query environments: {e}"))?;

            let mut out = Vec::new();
            for row in rows {
                let row = row.map_err(|e| db_err!("failed to read environment row: {e}"))?;
                match row {
                    Ok(parts) => out.push(parts),
                    Err(err) => tracing::warn!("skipping undecodable environment row: {err}"),
                }
            }
            Ok(out)
        })
        .await?;

    let mut environments = Vec::with_capacity(rows.len());
    for (mut env, raw_variables) in rows {
        match decode_variables(&raw_variables) {
            Ok(variables) => {
                env.variables = variables;
                environments.push(env);
            }
            Err(err) => {
                tracing::warn!(env = %env.name, "skipping environment with invalid variables json: {err}");
            }
        }
    }
    Ok(environments)
}

pub async fn get_environment(db: &Db, name: &str) -> AppResult<Option<Environment>> {
    let name = normalize_name(name)?;
    let row = db
        .read("environment_get", move |conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM environments WHERE name = ?1"),
                params![name],
                row_to_parts,
            )
            .optional()
            .map_err(|e| db_err!("failed to query environment: {e}"))
        })
        .await?;

    let Some((mut env, raw_variables)) = row else {
        return Ok(None);
    };
    env.variables = decode_variables(&raw_variables).map_err(|e| {
        format!(
            "SYSTEM_ERROR: environment {} has invalid variables json: {e}",
            env.name
        )
    })?;
    Ok(Some(env))
}

pub async fn delete_environment(db: &Db, name: &str) -> AppResult<bool> {
    let name = normalize_name(name)?;
    let changed = db
        .execute(
            "DELETE FROM environments WHERE name = ?1",
            vec![BindValue::Text(name.clone())],
        )
        .await?;
    tracing::info!(env = %name, changed, "environment deleted");
    Ok(changed > 0)
}
