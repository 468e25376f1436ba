//! Access-token verification and identity resolution.
//!
//! Tokens are issued by the main backend (HS256, `user_id` claim). This
//! module only verifies them; it never mints production tokens.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::db::users::UserDirectory;
use crate::error::ApiError;
use crate::models::user::{User, UserId};

/// The `user_id` claim, which issuers encode either as a number or a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UserIdClaim {
    Number(i64),
    Text(String),
}

impl UserIdClaim {
    fn to_user_id(&self) -> Option<UserId> {
        match self {
            Self::Number(n) => UserId::try_from(*n).ok(),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Claims read from an access token. Anything else in the payload is ignored.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserIdClaim>,
    pub exp: i64,
}

/// Who is on the other end of a request or connection.
#[derive(Debug, Clone)]
pub enum Identity {
    User(User),
    Anonymous,
}

/// Verifies HS256 access tokens against the server secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify signature and expiry, and extract the user id claim.
    ///
    /// Returns `None` for every kind of bad token. Expired and invalid
    /// signatures are logged differently but treated the same.
    pub fn verify(&self, token: &str) -> Option<UserId> {
        if token.is_empty() {
            tracing::debug!("empty access token");
            return None;
        }

        let data = match jsonwebtoken::decode::<AccessClaims>(token, &self.key, &self.validation) {
            Ok(data) => data,
            Err(err) => {
                match err.kind() {
                    ErrorKind::ExpiredSignature => tracing::info!("access token expired"),
                    ErrorKind::InvalidSignature => {
                        tracing::warn!("access token has an invalid signature")
                    }
                    _ => tracing::warn!(?err, "malformed access token"),
                }
                return None;
            }
        };

        let Some(claim) = data.claims.user_id else {
            tracing::warn!("access token has no user_id claim");
            return None;
        };

        let user_id = claim.to_user_id();
        if user_id.is_none() {
            tracing::warn!(?claim, "access token user_id claim is not a valid id");
        }
        user_id
    }

    /// Resolve a token to an identity.
    ///
    /// Bad tokens and unknown users degrade to [`Identity::Anonymous`]. Only a
    /// failing user directory is reported as an error.
    pub async fn authenticate(
        &self,
        users: &dyn UserDirectory,
        token: Option<&str>,
    ) -> Result<Identity, ApiError> {
        let Some(user_id) = token.and_then(|t| self.verify(t)) else {
            return Ok(Identity::Anonymous);
        };

        match users.find(user_id).await? {
            Some(user) => Ok(Identity::User(user)),
            None => {
                tracing::info!(user_id, "access token names an unknown user");
                Ok(Identity::Anonymous)
            }
        }
    }
}
