//! Authentication middleware for the playback routes.

use crate::config::AuthConfig;
use crate::server::AppContext;
use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{
        authorization::{Basic, Bearer},
        Authorization,
    },
    typed_header::TypedHeader,
};

const REALM: &str = "Basic realm=\"tapedeck\"";

/// Rejection for requests without valid credentials.
#[derive(Debug, PartialEq, Eq)]
pub struct Unauthorized;

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, REALM)],
            "Authentication required",
        )
            .into_response()
    }
}

/// Check if authentication is required and valid
pub fn check_auth(
    auth_config: &AuthConfig,
    bearer_token: Option<&str>,
    basic: Option<(&str, &str)>,
) -> Result<(), Unauthorized> {
    if !auth_config.enabled {
        return Ok(());
    }

    if let (Some(token), Some(api_key)) = (bearer_token, &auth_config.api_key) {
        if token == api_key {
            return Ok(());
        }
    }

    if let (Some((user, password)), Some(expected), Some(hash)) =
        (basic, &auth_config.username, &auth_config.password_hash)
    {
        if user == expected && bcrypt::verify(password, hash).unwrap_or(false) {
            return Ok(());
        }
    }

    Err(Unauthorized)
}

/// Middleware gating the playback routes.
pub async fn playback_auth_middleware(
    State(ctx): State<AppContext>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    basic: Option<TypedHeader<Authorization<Basic>>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Unauthorized> {
    let bearer_token = bearer.as_ref().map(|b| b.token());
    let credentials = basic.as_ref().map(|b| (b.username(), b.password()));

    if let Err(rejected) = check_auth(&ctx.config.server.auth, bearer_token, credentials) {
        tracing::debug!(uri = %request.uri(), "rejecting unauthenticated request");
        return Err(rejected);
    }

    Ok(next.run(request).await)
}

/// Generate a bcrypt password hash
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}

/// Generate a random API key
pub fn generate_api_key() -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    URL_SAFE_NO_PAD.encode(bytes)
}
