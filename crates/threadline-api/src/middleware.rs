use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use threadline_types::api::Claims;
use threadline_types::models::PrincipalId;

use crate::AppState;

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = validate_token(&state.jwt_secret, token).map_err(|_| StatusCode::UNAUTHORIZED)?;
    if claims.sub.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn validate_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

/// Sign a token for `principal`. Identity providers in front of the server
/// issue the same shape.
pub fn create_token(
    secret: &str,
    principal: &PrincipalId,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: principal.clone(),
        exp: (Utc::now() + ttl).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_principal() {
        let token = create_token("secret", &PrincipalId::new("alice"), Duration::hours(1)).unwrap();
        let claims = validate_token("secret", &token).unwrap();
        assert_eq!(claims.sub, PrincipalId::new("alice"));
        assert!(validate_token("other-secret", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token =
            create_token("secret", &PrincipalId::new("alice"), Duration::hours(-2)).unwrap();
        assert!(validate_token("secret", &token).is_err());
    }
}
