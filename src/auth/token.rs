//! Compact signed tokens (`header.claims.signature`, base64url, HS256).
//!
//! Access and refresh credentials use two independent [`TokenCodec`]s so a
//! leaked key for one class cannot mint the other.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use super::store::Role;

type HmacSha256 = Hmac<Sha256>;

const ALG: &str = "HS256";
const TYP: &str = "JWT";
pub const MIN_KEY_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid expiration")]
    InvalidExp,
    #[error("token expired")]
    Expired,
    #[error("signing key must be at least {MIN_KEY_BYTES} bytes")]
    WeakKey,
}

impl TokenError {
    /// Expiry is the only failure a client can recover from by refreshing.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Registered<C> {
    iat: i64,
    exp: i64,
    #[serde(flatten)]
    claims: C,
}

/// Claims carried by an access credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub jti: String,
}

/// Claims carried by a refresh credential.
///
/// `abs_exp` is fixed at login and copied verbatim into every rotated successor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub abs_exp: i64,
    pub jti: String,
}

/// Claims plus the registered timestamps, after a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified<C> {
    pub claims: C,
    pub issued_at: i64,
    pub expires_at: i64,
}

pub struct TokenCodec {
    key: SecretString,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").field("key", &"***").finish()
    }
}

impl TokenCodec {
    /// # Errors
    /// Returns [`TokenError::WeakKey`] if the key is shorter than [`MIN_KEY_BYTES`].
    pub fn new(key: SecretString) -> Result<Self, TokenError> {
        if key.expose_secret().len() < MIN_KEY_BYTES {
            return Err(TokenError::WeakKey);
        }
        Ok(Self { key })
    }

    /// Sign `claims` with `iat = issued_at` and `exp = issued_at + ttl`.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue<C: Serialize>(
        &self,
        claims: &C,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let iat = issued_at.timestamp();
        let header = Header {
            alg: ALG.to_string(),
            typ: TYP.to_string(),
        };
        let body = Registered {
            iat,
            exp: iat + ttl.num_seconds(),
            claims,
        };

        let header_b64 = b64e_json(&header)?;
        let claims_b64 = b64e_json(&body)?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature = self.mac()?.chain_update(signing_input.as_bytes()).finalize();
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature.into_bytes());

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify signature and expiry, returning the decoded claims.
    ///
    /// A token is expired from the instant `now >= exp`.
    ///
    /// # Errors
    /// Returns [`TokenError::Expired`] for a well-signed but stale token, or one
    /// of the malformed variants for anything else.
    pub fn verify<C: DeserializeOwned>(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Verified<C>, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        if parts.next().is_some() {
            return Err(TokenError::TokenFormat);
        }

        let header: Header = b64d_json(header_b64)?;
        if header.alg != ALG {
            return Err(TokenError::UnsupportedAlg(header.alg));
        }

        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Base64)?;
        self.mac()?
            .chain_update(format!("{header_b64}.{claims_b64}").as_bytes())
            .verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let body: Registered<C> = b64d_json(claims_b64)?;
        if body.exp <= body.iat {
            return Err(TokenError::InvalidExp);
        }
        if body.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(Verified {
            claims: body.claims,
            issued_at: body.iat,
            expires_at: body.exp,
        })
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .map_err(|_| TokenError::WeakKey)
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: DeserializeOwned>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}
