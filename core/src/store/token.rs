use super::CrmStore;
use crate::error::{CrmError, CrmResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

/// The authoritative record of an issued bearer credential. This core only
/// reads it; issuance belongs to the external authorization flow.
#[derive(Debug, Clone)]
pub struct AccessTokenRow {
    pub token_id: String,
    pub token: String,
    pub subject_id: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl CrmStore {
    pub fn insert_access_token(&self, row: &AccessTokenRow) -> CrmResult<()> {
        let scopes_json = serde_json::to_string(&row.scopes)?;
        self.conn().execute(
            "INSERT INTO access_token (
                token_id, token, subject_id, client_id, scopes, expires_at, revoked
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.token_id,
                row.token,
                row.subject_id,
                row.client_id,
                scopes_json,
                row.expires_at,
                row.revoked as i64,
            ],
        )?;
        Ok(())
    }

    pub fn access_token_by_token(&self, token: &str) -> CrmResult<Option<AccessTokenRow>> {
        let row = self
            .conn()
            .query_row(
                "SELECT token_id, token, subject_id, client_id, scopes, expires_at, revoked
                 FROM access_token WHERE token = ?1",
                params![token],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, DateTime<Utc>>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((token_id, token, subject_id, client_id, scopes_json, expires_at, revoked)) => {
                let scopes: Vec<String> = serde_json::from_str(&scopes_json)?;
                Ok(Some(AccessTokenRow {
                    token_id,
                    token,
                    subject_id,
                    client_id,
                    scopes,
                    expires_at,
                    revoked: revoked != 0,
                }))
            }
        }
    }

    pub fn revoke_access_token(&self, token_id: &str) -> CrmResult<()> {
        let changed = self.conn().execute(
            "UPDATE access_token SET revoked = 1 WHERE token_id = ?1",
            params![token_id],
        )?;
        if changed == 0 {
            return Err(CrmError::NotFound(format!("access token {token_id}")));
        }
        Ok(())
    }
}
