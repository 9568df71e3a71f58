//! HS256 access tokens.

use chrono::Duration;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::{shifted, Clock};
use crate::email::valid_email;
use crate::model::ApiToken;
use crate::{Error, Result};

const DEFAULT_EXPIRES_IN_MINUTES: i64 = 15;

#[derive(Clone, Debug)]
pub struct JwtSettings {
    key: SecretString,
    issuer: String,
    audience: String,
    expires_in_minutes: i64,
}

impl JwtSettings {
    #[must_use]
    pub fn new(key: SecretString, issuer: String, audience: String) -> Self {
        Self {
            key,
            issuer,
            audience,
            expires_in_minutes: DEFAULT_EXPIRES_IN_MINUTES,
        }
    }

    #[must_use]
    pub fn with_expires_in_minutes(mut self, minutes: i64) -> Self {
        self.expires_in_minutes = minutes;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub fn expires_in_minutes(&self) -> i64 {
        self.expires_in_minutes
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl Claims {
    /// Subject as a user id.
    ///
    /// # Errors
    /// `InvalidArgument` when `sub` is not a UUID.
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| Error::InvalidArgument("token subject is not a user id".to_string()))
    }
}

/// Whether `exp`/`nbf` are checked when decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifetime {
    Enforced,
    /// Only for the refresh endpoint, where an expired access token still names the caller.
    Relaxed,
}

pub trait AccessTokenIssuer: Send + Sync {
    /// Sign a new access token for `user_id`.
    ///
    /// # Errors
    /// `InvalidArgument` for a nil user id or malformed email, `InvalidState` if the
    /// encoder returns nothing.
    fn generate_token(&self, user_id: Uuid, email: &str) -> Result<ApiToken>;
}

pub struct JwtIssuer {
    settings: JwtSettings,
    clock: Arc<dyn Clock>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtIssuer {
    #[must_use]
    pub fn new(settings: JwtSettings, clock: Arc<dyn Clock>) -> Self {
        let secret = settings.key.expose_secret().as_bytes();
        let encoding_key = EncodingKey::from_secret(secret);
        let decoding_key = DecodingKey::from_secret(secret);
        Self {
            settings,
            clock,
            encoding_key,
            decoding_key,
        }
    }

    /// Verify signature, issuer and audience, and optionally the lifetime.
    ///
    /// Lifetime is checked against the injected clock with zero leeway.
    ///
    /// # Errors
    /// Returns the underlying `jsonwebtoken` error for any failed check.
    pub fn decode(&self, token: &str, lifetime: Lifetime) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.settings.issuer.as_str()]);
        validation.set_audience(&[self.settings.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss", "aud"]);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_nbf = false;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)?.claims;

        if lifetime == Lifetime::Enforced {
            let now = self.clock.now().timestamp();
            if claims.exp < now {
                return Err(Error::Jwt(ErrorKind::ExpiredSignature.into()));
            }
            if claims.nbf > now {
                return Err(Error::Jwt(ErrorKind::ImmatureSignature.into()));
            }
        }

        Ok(claims)
    }
}

impl AccessTokenIssuer for JwtIssuer {
    fn generate_token(&self, user_id: Uuid, email: &str) -> Result<ApiToken> {
        if user_id.is_nil() {
            return Err(Error::InvalidArgument("user id can't be empty".to_string()));
        }
        if !valid_email(email) {
            return Err(Error::InvalidArgument("email is not valid".to_string()));
        }

        let now = self.clock.now();
        let expires_at = shifted(
            now,
            Duration::try_minutes(self.settings.expires_in_minutes),
            "access token lifetime",
        )?;
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            jti: Uuid::new_v4().to_string(),
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        if token.is_empty() {
            return Err(Error::InvalidState("signed access token is empty".to_string()));
        }

        Ok(ApiToken::new(token, expires_at))
    }
}
