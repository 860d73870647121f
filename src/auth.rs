use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{Role, User};

pub const BCRYPT_COST: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
    pub jti: String,
}

/// Authenticated caller, placed in request extensions by
/// [`jwt_auth_middleware`].
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
}

impl AuthSession {
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expires_in: Duration,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("keys", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expires_in: Duration::days(7),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            exp: (now + self.expires_in).timestamp() as usize,
            iat: now.timestamp() as usize,
            jti: Uuid::new_v4().to_string(),
        };

        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    pub fn verify(&self, token: &str) -> Result<AuthSession, ApiError> {
        let validation = Validation::new(Algorithm::HS256);
        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::InvalidToken)?;
        let user_id = claims.sub.parse().map_err(|_| ApiError::InvalidToken)?;

        Ok(AuthSession {
            user_id,
            email: claims.email,
            name: claims.name,
            role: claims.role,
        })
    }
}

pub fn extract_bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, BCRYPT_COST)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

pub async fn jwt_auth_middleware(
    State(jwt): State<JwtService>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
        .ok_or(ApiError::MissingToken)?;

    let session = jwt.verify(token)?;
    tracing::debug!(user_id = session.user_id, role = session.role.as_str(), "authenticated");
    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user(role: Role) -> User {
        User {
            id: 7,
            name: "Asha Rao".to_string(),
            email: "asha@example.com".to_string(),
            role,
            is_data_added: false,
        }
    }

    #[test]
    fn issued_tokens_verify() {
        let jwt = JwtService::new("test_secret");
        let token = jwt.issue(&sample_user(Role::Mentor)).unwrap();
        let session = jwt.verify(&token).unwrap();

        assert_eq!(session.user_id, 7);
        assert_eq!(session.email, "asha@example.com");
        assert_eq!(session.role, Role::Mentor);
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let token = JwtService::new("one").issue(&sample_user(Role::Admin)).unwrap();
        let err = JwtService::new("two").verify(&token).unwrap_err();
        assert!(matches!(err, ApiError::InvalidToken));
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Token abc"), None);
    }

    #[test]
    fn role_checks() {
        let session = AuthSession {
            user_id: 1,
            email: "m@example.com".to_string(),
            name: "M".to_string(),
            role: Role::Mentor,
        };
        assert!(session.require_role(&[Role::Admin, Role::Mentor]).is_ok());
        assert!(matches!(
            session.require_role(&[Role::Admin]),
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("s3cret").unwrap();
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret", "not-a-hash"));
    }
}
