use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::JwtConfig;
use crate::error::AppError;
use crate::hub::UserId;

use super::Claims;

/// Resolves a bearer credential to the user it was issued for
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<UserId, AppError>;
}

pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();
        validation.set_required_spec_claims(&["exp"]);

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}

impl TokenVerifier for JwtValidator {
    fn verify(&self, token: &str) -> Result<UserId, AppError> {
        Ok(self.validate(token)?.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn create_test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing".to_string(),
            issuer: None,
            audience: None,
        }
    }

    fn create_test_token(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims_for(user_id: UserId, ttl_secs: i64) -> Claims {
        let now = chrono::Utc::now().timestamp();
        Claims {
            user_id,
            username: "octocat".to_string(),
            exp: now + ttl_secs,
            iat: now,
        }
    }

    #[test]
    fn test_valid_token() {
        let config = create_test_config();
        let validator = JwtValidator::new(&config);

        let token = create_test_token(&claims_for(42, 3600), &config.secret);
        let claims = validator.validate(&token).unwrap();

        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.username, "octocat");
        assert_eq!(validator.verify(&token).unwrap(), 42);
    }

    #[test]
    fn test_invalid_token() {
        let validator = JwtValidator::new(&create_test_config());

        assert!(matches!(validator.verify("garbage"), Err(AppError::Auth(_))));
    }

    #[test]
    fn test_wrong_secret() {
        let validator = JwtValidator::new(&create_test_config());
        let token = create_test_token(&claims_for(42, 3600), "another-secret");

        assert!(validator.verify(&token).is_err());
    }

    #[test]
    fn test_expired_token() {
        let validator = JwtValidator::new(&create_test_config());
        let config = create_test_config();
        // Well past the default 60s leeway
        let token = create_test_token(&claims_for(42, -3600), &config.secret);

        assert!(validator.verify(&token).is_err());
    }
}
