//! Bearer-token validation gate for every mutating call.
//!
//! Two-phase check, in this order:
//!   (a) structural + signature validation of the self-contained credential
//!       — rejects garbage cheaply, without touching the store;
//!   (b) authoritative lookup in the revocable token store — always runs
//!       after (a) succeeds, because a well-signed token may have been
//!       revoked or expired server-side since issuance.
//!
//! No validation state is cached between calls; revocation is re-checked
//! every time. Failures carry no detail about whether the account exists.
//!
//! Token format: `hex(claims JSON) + "." + hex(HMAC-SHA256(claims JSON))`.

use crate::{
    config::AuthConfig,
    error::{CrmError, CrmResult},
    store::CrmStore,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Claims embedded in the credential itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub subject_id: String,
    pub client_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Unix timestamp, seconds.
    pub expires_at: i64,
}

/// What a successful validation attaches to the call context. Downstream
/// authorization maps scopes to operations; this gate does not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub token_id: String,
    pub subject_id: String,
    pub client_id: String,
    pub scopes: Vec<String>,
}

/// Serialize and sign claims into a bearer credential. Issuance itself is
/// an external flow; this helper exists for the token store's tooling and
/// for tests.
pub fn issue_token(claims: &AccessClaims, secret: &[u8]) -> CrmResult<String> {
    let body = serde_json::to_vec(claims)?;
    let mut mac = HmacSha256::new_from_slice(secret)
        .expect("HMAC accepts keys of any length");
    mac.update(&body);
    let tag = mac.finalize().into_bytes();
    Ok(format!("{}.{}", hex::encode(body), hex::encode(tag)))
}

pub struct TokenValidator {
    secret: Vec<u8>,
}

impl TokenValidator {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            secret: config.token_secret.as_bytes().to_vec(),
        }
    }

    /// Validate the Authorization header value for a protected call.
    pub fn validate(
        &self,
        store: &CrmStore,
        authorization: Option<&str>,
        now: DateTime<Utc>,
    ) -> CrmResult<AuthContext> {
        let header = authorization.ok_or(CrmError::Unauthorized)?;
        let token = header.strip_prefix("Bearer ").ok_or(CrmError::Unauthorized)?;
        if token.is_empty() {
            return Err(CrmError::Unauthorized);
        }

        // Phase (a): structure and signature.
        let claims = self.decode_claims(token)?;
        if claims.expires_at < now.timestamp() {
            return Err(CrmError::TokenExpiredOrRevoked);
        }

        // Phase (b): the store is the source of truth for revocation and
        // externally adjusted expiry.
        let row = store
            .access_token_by_token(token)?
            .ok_or(CrmError::TokenExpiredOrRevoked)?;
        if row.revoked || row.expires_at < now {
            return Err(CrmError::TokenExpiredOrRevoked);
        }

        Ok(AuthContext {
            token_id: row.token_id,
            subject_id: row.subject_id,
            client_id: row.client_id,
            scopes: row.scopes,
        })
    }

    fn decode_claims(&self, token: &str) -> CrmResult<AccessClaims> {
        let (body_hex, tag_hex) = token.split_once('.').ok_or(CrmError::InvalidToken)?;
        let body = hex::decode(body_hex).map_err(|_| CrmError::InvalidToken)?;
        let tag = hex::decode(tag_hex).map_err(|_| CrmError::InvalidToken)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(&body);
        mac.verify_slice(&tag).map_err(|_| CrmError::InvalidToken)?;

        serde_json::from_slice(&body).map_err(|_| CrmError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(expires_at: i64) -> AccessClaims {
        AccessClaims {
            subject_id: "user-1".into(),
            client_id: "client-1".into(),
            scopes: vec!["sales:write".into()],
            expires_at,
        }
    }

    #[test]
    fn issued_token_decodes_back() {
        let secret = b"top-secret";
        let validator = TokenValidator {
            secret: secret.to_vec(),
        };
        let token = issue_token(&claims(2_000_000_000), secret).unwrap();
        let decoded = validator.decode_claims(&token).unwrap();
        assert_eq!(decoded.subject_id, "user-1");
        assert_eq!(decoded.scopes, vec!["sales:write".to_string()]);
    }

    #[test]
    fn tampering_breaks_the_signature() {
        let secret = b"top-secret";
        let validator = TokenValidator {
            secret: secret.to_vec(),
        };
        let token = issue_token(&claims(2_000_000_000), secret).unwrap();

        // Flip one hex digit of the body.
        let mut tampered: Vec<char> = token.chars().collect();
        tampered[0] = if tampered[0] == 'a' { 'b' } else { 'a' };
        let tampered: String = tampered.into_iter().collect();

        assert!(matches!(
            validator.decode_claims(&tampered),
            Err(CrmError::InvalidToken)
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token(&claims(2_000_000_000), b"secret-a").unwrap();
        let validator = TokenValidator {
            secret: b"secret-b".to_vec(),
        };
        assert!(matches!(
            validator.decode_claims(&token),
            Err(CrmError::InvalidToken)
        ));
    }
}
