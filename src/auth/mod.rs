use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{Claims, Identity, Role};

/// Connection authenticator.
///
/// Credentials are bearer JWTs issued by the external identity
/// service; this service only verifies them and extracts the identity
/// and role. `generate_token` exists for local development and tests.
#[derive(Clone)]
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_seconds: u64,
}

impl AuthService {
    pub fn new(config: &Config) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            expiry_seconds: config.jwt_expiry_seconds,
        }
    }

    /// Generate a JWT for a user with a given role
    pub fn generate_token(&self, user_id: &str, role: Role, display: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        let exp = now + self.expiry_seconds as i64;

        let claims = Claims {
            sub: user_id.to_string(),
            role,
            display: display.to_string(),
            iat: now,
            exp,
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Verify a credential and return the identity it carries
    pub fn verify(&self, token: &str) -> Result<Identity> {
        let validation = Validation::default();
        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| AppError::NotAuthenticated(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_roundtrip() {
        let auth = AuthService::new(&Config::for_tests());

        let token = auth
            .generate_token("user-123", Role::Doctor, "Dr. Alice")
            .expect("Should generate token");

        let identity = auth.verify(&token).expect("Should verify token");

        assert_eq!(identity.id, "user-123");
        assert_eq!(identity.role, Role::Doctor);
        assert_eq!(identity.display_name, "Dr. Alice");
    }

    #[test]
    fn garbage_token_is_rejected() {
        let auth = AuthService::new(&Config::for_tests());

        let result = auth.verify("not-a-token");
        assert!(matches!(result, Err(AppError::NotAuthenticated(_))));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let auth = AuthService::new(&Config::for_tests());
        let mut other_config = Config::for_tests();
        other_config.jwt_secret = "some-other-secret".to_string();
        let other = AuthService::new(&other_config);

        let token = other
            .generate_token("user-123", Role::Patient, "Bob")
            .unwrap();

        assert!(auth.verify(&token).is_err());
    }
}
