//! Caller identity guard.
//!
//! Authentication itself lives in the HTTP gateway; the core only consumes
//! an authenticated caller identity. This guard validates the HS256 bearer
//! token the gateway mints and exposes the subject to handlers.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use rocket::Request;
use rocket::State;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket_okapi::request::OpenApiFromRequest;
use serde::Deserialize;
use thiserror::Error;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("configuration missing")]
    Config,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// The authenticated caller, by token subject (an email).
#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct AuthenticatedUser {
    pub subject: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthenticatedUser {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match request.guard::<&State<AppConfig>>().await {
            Outcome::Success(config) => config,
            _ => return Outcome::Error((Status::InternalServerError, AuthError::Config)),
        };

        let Some(header) = request.headers().get_one("Authorization") else {
            return Outcome::Error((Status::Unauthorized, AuthError::MissingToken));
        };
        let Some(token) = header.strip_prefix("Bearer ") else {
            return Outcome::Error((Status::Unauthorized, AuthError::MissingToken));
        };

        let key = DecodingKey::from_secret(config.secret_key.as_bytes());
        match decode::<Claims>(token, &key, &Validation::new(Algorithm::HS256)) {
            Ok(data) => Outcome::Success(AuthenticatedUser {
                subject: data.claims.sub,
            }),
            Err(e) => {
                log::debug!("token rejected: {}", e);
                Outcome::Error((Status::Unauthorized, AuthError::InvalidToken))
            }
        }
    }
}
