//! `/v1/auth/*` routes.
//!
//! Each route runs its handler under a child of the server's shutdown token. Login
//! failures answer the same `401`, and the resend/reset-request routes answer `204`
//! whether or not the account exists.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{bearer_claims, failure, message};
use crate::crypto::{JwtIssuer, Lifetime};
use crate::handlers::{
    AuthHandlers, LoginOutcome, LoginRequest, LogoutOutcome, LogoutRequest, RefreshOutcome,
    RefreshRequest, RegisterOutcome, RegisterRequest, ResendVerificationOutcome,
    ResendVerificationRequest, ResetPasswordOutcome, ResetPasswordRequest,
    SendResetPasswordEmailOutcome, SendResetPasswordEmailRequest, VerifyEmailOutcome,
    VerifyEmailRequest,
};
use crate::model::ApiToken;

const INVALID_CREDENTIALS: &str = "Invalid credentials";
const INVALID_LINK: &str = "Invalid verification link";
const EXPIRED_LINK: &str = "Verification link expired.";

#[derive(Serialize, Debug)]
pub struct TokenPair {
    access_token: ApiToken,
    refresh_token: ApiToken,
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    error: String,
    message: String,
}

fn tokens(access_token: ApiToken, refresh_token: ApiToken) -> Response {
    (
        StatusCode::OK,
        Json(TokenPair {
            access_token,
            refresh_token,
        }),
    )
        .into_response()
}

fn missing_payload() -> Response {
    message(StatusCode::BAD_REQUEST, "Missing payload")
}

#[instrument(skip_all)]
pub async fn register(
    handlers: Extension<AuthHandlers>,
    shutdown: Extension<CancellationToken>,
    payload: Option<Json<RegisterRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match handlers.register(request, &shutdown.child_token()).await {
        Ok(RegisterOutcome::Success) => {
            message(StatusCode::CREATED, "User registered successfully")
        }
        Ok(RegisterOutcome::BadRequest(reason)) => message(StatusCode::BAD_REQUEST, reason),
        Ok(RegisterOutcome::EmailAlreadyExists) => {
            message(StatusCode::CONFLICT, "Email already exists")
        }
        Ok(RegisterOutcome::EmailExistsButEmailNotVerified) => message(
            StatusCode::CONFLICT,
            "User already exists, but email isn't verified. A new verification email has been sent, please check your inbox and spam folders.",
        ),
        Err(err) => failure(&err, "Registration"),
    }
}

#[instrument(skip_all)]
pub async fn login(
    handlers: Extension<AuthHandlers>,
    shutdown: Extension<CancellationToken>,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match handlers.login(request, &shutdown.child_token()).await {
        Ok(LoginOutcome::Success {
            access_token,
            refresh_token,
        }) => tokens(access_token, refresh_token),
        Ok(LoginOutcome::BadRequest(reason)) => message(StatusCode::BAD_REQUEST, reason),
        Ok(LoginOutcome::UsernameNotFound | LoginOutcome::InvalidPassword) => {
            message(StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS)
        }
        Ok(LoginOutcome::EmailNotVerified) => (
            StatusCode::FORBIDDEN,
            Json(ErrorBody {
                error: "email_not_verified".to_string(),
                message: "Your email has not been verified yet. A verification link has been sent to your email, which will automatically log you in.".to_string(),
            }),
        )
            .into_response(),
        Ok(LoginOutcome::ServerError) => {
            message(StatusCode::INTERNAL_SERVER_ERROR, "Login failed.")
        }
        Err(err) => failure(&err, "Login"),
    }
}

#[instrument(skip_all)]
pub async fn verify_email(
    handlers: Extension<AuthHandlers>,
    shutdown: Extension<CancellationToken>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match handlers.verify_email(request, &shutdown.child_token()).await {
        Ok(VerifyEmailOutcome::Success {
            access_token,
            refresh_token,
        }) => tokens(access_token, refresh_token),
        Ok(VerifyEmailOutcome::BadRequest(reason)) => message(StatusCode::BAD_REQUEST, reason),
        Ok(VerifyEmailOutcome::LinkExpired) => message(StatusCode::BAD_REQUEST, EXPIRED_LINK),
        Ok(VerifyEmailOutcome::LinkNotFound | VerifyEmailOutcome::LinkInvalid) => {
            message(StatusCode::BAD_REQUEST, INVALID_LINK)
        }
        Err(err) => failure(&err, "Email verification"),
    }
}

#[instrument(skip_all)]
pub async fn resend_verification(
    handlers: Extension<AuthHandlers>,
    shutdown: Extension<CancellationToken>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match handlers
        .resend_verification(request, &shutdown.child_token())
        .await
    {
        Ok(ResendVerificationOutcome::BadRequest(reason)) => {
            message(StatusCode::BAD_REQUEST, reason)
        }
        Ok(outcome) => {
            debug!(?outcome, "verification resend handled");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => failure(&err, "Resending verification email"),
    }
}

#[instrument(skip_all)]
pub async fn send_reset_password_email(
    handlers: Extension<AuthHandlers>,
    shutdown: Extension<CancellationToken>,
    payload: Option<Json<SendResetPasswordEmailRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match handlers
        .send_reset_password_email(request, &shutdown.child_token())
        .await
    {
        Ok(SendResetPasswordEmailOutcome::BadRequest(reason)) => {
            message(StatusCode::BAD_REQUEST, reason)
        }
        Ok(outcome) => {
            debug!(?outcome, "password reset request handled");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => failure(&err, "Sending password reset email"),
    }
}

#[instrument(skip_all)]
pub async fn reset_password(
    handlers: Extension<AuthHandlers>,
    shutdown: Extension<CancellationToken>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match handlers.reset_password(request, &shutdown.child_token()).await {
        Ok(ResetPasswordOutcome::Success) => StatusCode::NO_CONTENT.into_response(),
        Ok(ResetPasswordOutcome::BadRequest(reason)) => message(StatusCode::BAD_REQUEST, reason),
        Ok(ResetPasswordOutcome::LinkExpired) => message(StatusCode::BAD_REQUEST, EXPIRED_LINK),
        Ok(ResetPasswordOutcome::LinkNotFound | ResetPasswordOutcome::LinkInvalid) => {
            message(StatusCode::BAD_REQUEST, INVALID_LINK)
        }
        Err(err) => failure(&err, "Password reset"),
    }
}

/// Accepts an expired access token: it only names the caller, the refresh token
/// proves the session.
#[instrument(skip_all)]
pub async fn refresh(
    handlers: Extension<AuthHandlers>,
    access_tokens: Extension<Arc<JwtIssuer>>,
    shutdown: Extension<CancellationToken>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> Response {
    let claims = match bearer_claims(&headers, &access_tokens, Lifetime::Relaxed) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    let Ok(user_id) = claims.user_id() else {
        warn!("bearer token subject is not a user id");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match handlers
        .refresh(request, user_id, &shutdown.child_token())
        .await
    {
        Ok(RefreshOutcome::Success {
            access_token,
            refresh_token,
        }) => tokens(access_token, refresh_token),
        Ok(outcome) => {
            debug!(?outcome, "refresh rejected");
            StatusCode::UNAUTHORIZED.into_response()
        }
        Err(err) => failure(&err, "Token refresh"),
    }
}

#[instrument(skip_all)]
pub async fn logout(
    handlers: Extension<AuthHandlers>,
    access_tokens: Extension<Arc<JwtIssuer>>,
    shutdown: Extension<CancellationToken>,
    headers: HeaderMap,
    payload: Option<Json<LogoutRequest>>,
) -> Response {
    let claims = match bearer_claims(&headers, &access_tokens, Lifetime::Enforced) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    let Ok(user_id) = claims.user_id() else {
        warn!("bearer token subject is not a user id");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match handlers
        .logout(request, user_id, &shutdown.child_token())
        .await
    {
        Ok(LogoutOutcome::BadRequest(reason)) => message(StatusCode::BAD_REQUEST, reason),
        Ok(outcome) => {
            debug!(?outcome, "logout handled");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => failure(&err, "Logout"),
    }
}
