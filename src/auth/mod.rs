use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod password;
pub mod secrets;

/// Access-token claims: subject is the user id, role and audience are fixed
/// platform strings.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, role: String, aud: String, expiry_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id,
            role,
            aud,
            exp: (now + Duration::seconds(expiry_secs as i64)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT secret")]
    InvalidSecret,

    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),
}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key)
        .map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

pub fn validate_jwt(token: &str, secret: &str, audience: &str) -> Result<Claims, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::default();
    validation.set_audience(&[audience]);

    let data = decode::<Claims>(token, &decoding_key, &validation)
        .map_err(|e| JwtError::InvalidToken(e.to_string()))?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trip() {
        let user_id = Uuid::new_v4();
        let claims = Claims::new(
            user_id,
            "authenticated".to_string(),
            "authenticated".to_string(),
            3600,
        );
        let token = generate_jwt(&claims, "test-secret").unwrap();
        let decoded = validate_jwt(&token, "test-secret", "authenticated").unwrap();
        assert_eq!(decoded.sub, user_id);
        assert_eq!(decoded.role, "authenticated");
        assert!(decoded.exp > decoded.iat);
    }

    #[test]
    fn jwt_rejects_wrong_secret() {
        let claims = Claims::new(
            Uuid::new_v4(),
            "authenticated".to_string(),
            "authenticated".to_string(),
            3600,
        );
        let token = generate_jwt(&claims, "secret-a").unwrap();
        assert!(validate_jwt(&token, "secret-b", "authenticated").is_err());
    }

    #[test]
    fn jwt_rejects_wrong_audience() {
        let claims = Claims::new(
            Uuid::new_v4(),
            "authenticated".to_string(),
            "authenticated".to_string(),
            3600,
        );
        let token = generate_jwt(&claims, "secret").unwrap();
        assert!(validate_jwt(&token, "secret", "other-audience").is_err());
    }

    #[test]
    fn empty_secret_is_refused() {
        let claims = Claims::new(
            Uuid::new_v4(),
            "authenticated".to_string(),
            "authenticated".to_string(),
            3600,
        );
        assert!(matches!(
            generate_jwt(&claims, ""),
            Err(JwtError::InvalidSecret)
        ));
    }
}
