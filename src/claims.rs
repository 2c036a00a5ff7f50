use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::Error;
use crate::types::UserId;

/// Claims decoded from an Opsboard access token.
///
/// Decoding is **structural only**: the claims segment is base64url-decoded
/// and parsed, the signature is never checked. Client-side decoding is
/// informational: it feeds expiry scheduling and display, nothing more.
/// The backend that issued the token is the trust boundary, and every
/// authorization decision stays there.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Claims {
    /// Username the token was issued to (`sub`).
    pub subject: String,
    /// Backend user id (`uid`; falls back to `sub` when absent).
    pub user_id: UserId,
    /// Issuing authority (`iss`).
    pub issuer: String,
    /// Intended consumer (`aud`).
    pub audience: String,
    /// Issuance instant (`iat`).
    pub issued_at: OffsetDateTime,
    /// Expiry instant (`exp`).
    pub expires_at: OffsetDateTime,
    /// Unique token id (`jti`).
    pub token_id: String,
}

#[derive(Deserialize)]
struct RawClaims {
    sub: String,
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    iss: String,
    #[serde(default)]
    aud: String,
    iat: i64,
    exp: i64,
    #[serde(default)]
    jti: String,
}

/// Decodes the claims segment of an access token.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the token is not three dot-separated
/// segments, the claims segment is not valid base64url JSON, a required
/// claim (`sub`, `iat`, `exp`) is missing, or the expiry does not postdate
/// issuance. No other error kind escapes this function.
pub fn decode(token: &str) -> Result<Claims, Error> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(Error::Decode("expected three token segments".into()));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|_| Error::Decode("claims segment is not valid base64url".into()))?;

    let raw: RawClaims =
        serde_json::from_slice(&payload).map_err(|e| Error::Decode(format!("claims JSON: {e}")))?;

    let issued_at = OffsetDateTime::from_unix_timestamp(raw.iat)
        .map_err(|_| Error::Decode(format!("iat out of range: {}", raw.iat)))?;
    let expires_at = OffsetDateTime::from_unix_timestamp(raw.exp)
        .map_err(|_| Error::Decode(format!("exp out of range: {}", raw.exp)))?;
    if expires_at <= issued_at {
        return Err(Error::Decode("expiry does not postdate issuance".into()));
    }

    let user_id = raw.uid.unwrap_or_else(|| raw.sub.clone());

    Ok(Claims {
        subject: raw.sub,
        user_id: UserId(user_id),
        issuer: raw.iss,
        audience: raw.aud,
        issued_at,
        expires_at,
        token_id: raw.jti,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Builds an unsigned token whose claims segment carries the given
    /// timestamps. The signature segment is filler; decoding never reads it.
    pub(crate) fn token(iat: i64, exp: i64) -> String {
        token_for("alice", "user-1", iat, exp)
    }

    pub(crate) fn token_for(sub: &str, uid: &str, iat: i64, exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"EdDSA","typ":"JWT"}"#);
        let claims = serde_json::json!({
            "sub": sub,
            "uid": uid,
            "iss": "opsboard",
            "aud": "console",
            "iat": iat,
            "exp": exp,
            "jti": format!("tok-{iat}-{exp}"),
        });
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.sig")
    }
}
