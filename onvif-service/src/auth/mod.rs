//! Authentication and authorization of SOAP calls.
//!
//! A call is authenticated with HTTP Digest or a WS-Security `UsernameToken`,
//! then authorized against the ONVIF access class of the operation.

use std::sync::Arc;

use chrono::Utc;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::model::UserLevel;
use crate::repository::UserRepository;
use crate::soap::Envelope;

pub mod digest;
pub mod username_token;

pub use digest::{DigestCredentials, NonceIssuer, REALM};
pub use username_token::UsernameToken;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    #[error("authorization scheme is not Digest")]
    UnsupportedScheme,

    #[error("missing parameter {0}")]
    MissingParameter(&'static str),

    #[error("unsupported digest algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("unsupported qop {0}")]
    UnsupportedQop(String),

    #[error("realm mismatch")]
    RealmMismatch,

    #[error("digest uri does not match the request")]
    UriMismatch,

    #[error("invalid nonce")]
    InvalidNonce,

    #[error("stale nonce")]
    StaleNonce,

    #[error("timestamp outside the accepted window")]
    InvalidTimestamp,

    #[error("unknown user")]
    UnknownUser,

    #[error("bad credentials")]
    BadCredentials,

    #[error("credentials required")]
    Unauthenticated,

    #[error("{0} may not perform this operation")]
    Forbidden(String),
}

impl AuthError {
    /// Whether the client should be sent a new digest challenge (HTTP 401).
    pub fn is_challenge(&self) -> bool {
        !matches!(self, AuthError::Forbidden(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, AuthError::StaleNonce)
    }
}

/// Compares secrets in time independent of where they differ.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    let len = a.len().max(b.len());
    let mut left = vec![0u8; len];
    let mut right = vec![0xffu8; len];
    left[..a.len()].copy_from_slice(a.as_bytes());
    right[..b.len()].copy_from_slice(b.as_bytes());

    (a.len().ct_eq(&b.len()) & left.ct_eq(&right)).into()
}

/// Path and query of a digest `uri`, which clients send either as given in
/// the request line or as an absolute URI.
fn request_target(uri: &str) -> &str {
    match uri.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |i| &rest[i..]),
        None => uri,
    }
}

/// ONVIF access classes, ordered by the privilege they demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    PreAuth,
    ReadSystem,
    ReadMedia,
    Actuate,
    ReadSystemSecret,
    Unrecoverable,
}

impl Access {
    pub fn required_level(&self) -> UserLevel {
        match self {
            Access::PreAuth => UserLevel::Anonymous,
            Access::ReadSystem | Access::ReadMedia => UserLevel::User,
            Access::Actuate => UserLevel::Operator,
            Access::ReadSystemSecret | Access::Unrecoverable => UserLevel::Administrator,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub user_name: Option<String>,
    pub level: UserLevel,
}

impl Principal {
    pub fn anonymous() -> Principal {
        Principal {
            user_name: None,
            level: UserLevel::Anonymous,
        }
    }
}

/// HTTP-level inputs to authentication.
#[derive(Debug, Clone, Default)]
pub struct HttpCredentials {
    pub method: String,
    pub uri: String,
    pub authorization: Option<String>,
}

pub struct Authenticator {
    users: Arc<dyn UserRepository>,
    nonces: NonceIssuer,
    max_skew: chrono::Duration,
}

impl Authenticator {
    pub fn new(users: Arc<dyn UserRepository>) -> crate::Result<Authenticator> {
        Ok(Authenticator {
            users,
            nonces: NonceIssuer::new(chrono::Duration::minutes(5))?,
            max_skew: chrono::Duration::minutes(5),
        })
    }

    pub fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }

    pub fn nonces(&self) -> &NonceIssuer {
        &self.nonces
    }

    pub fn challenge(&self, stale: bool) -> String {
        self.nonces.challenge(Utc::now(), stale)
    }

    /// Authenticates the caller unless `access` is pre-auth, then checks the
    /// caller's level against `access`.
    pub async fn check(&self, access: Access, http: &HttpCredentials, envelope: &Envelope) -> Result<Principal, AuthError> {
        if access == Access::PreAuth {
            return Ok(Principal::anonymous());
        }

        let principal = self.authenticate(http, envelope).await?;
        if principal.level < access.required_level() {
            let name = principal.user_name.unwrap_or_default();
            tracing::info!("user {} denied, requires {}", name, access.required_level().as_str());
            return Err(AuthError::Forbidden(name));
        }
        Ok(principal)
    }

    pub async fn authenticate(&self, http: &HttpCredentials, envelope: &Envelope) -> Result<Principal, AuthError> {
        if let Some(header) = http.authorization.as_deref() {
            if header.trim_start().get(..6).map_or(false, |scheme| scheme.eq_ignore_ascii_case("digest")) {
                return self.authenticate_digest(header, http).await;
            }
        }

        match UsernameToken::from_envelope(envelope) {
            Some(token) => self.authenticate_token(token?).await,
            None => Err(AuthError::Unauthenticated),
        }
    }

    async fn authenticate_digest(&self, header: &str, http: &HttpCredentials) -> Result<Principal, AuthError> {
        let credentials = DigestCredentials::parse(header)?;
        if credentials.realm != REALM {
            return Err(AuthError::RealmMismatch);
        }
        if request_target(&credentials.uri) != http.uri {
            return Err(AuthError::UriMismatch);
        }

        let user = self.users.get_user(&credentials.username).await.ok_or(AuthError::UnknownUser)?;
        if !constant_time_compare(&credentials.expected_response(&user.password, &http.method), &credentials.response) {
            tracing::debug!("digest mismatch for {}", credentials.username);
            return Err(AuthError::BadCredentials);
        }
        // Checked last so a correct response over an old nonce yields stale=true.
        self.nonces.validate(&credentials.nonce, Utc::now())?;

        Ok(Principal {
            user_name: Some(user.user_name),
            level: user.level,
        })
    }

    async fn authenticate_token(&self, token: UsernameToken) -> Result<Principal, AuthError> {
        let user = self.users.get_user(&token.username).await.ok_or(AuthError::UnknownUser)?;
        token.verify(&user.password, Utc::now(), self.max_skew)?;

        Ok(Principal {
            user_name: Some(user.user_name),
            level: user.level,
        })
    }
}
