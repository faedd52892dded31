use async_trait::async_trait;
use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::JwtConfig;

use super::{Claims, Identity, IdentityProvider, ProviderError};

/// Identity provider backed by HS256 JWTs signed with a shared secret.
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();

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

    pub fn decode_claims(&self, token: &str) -> Result<Claims, ProviderError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| ProviderError::Rejected(e.to_string()))?;

        Ok(token_data.claims)
    }
}

#[async_trait]
impl IdentityProvider for JwtValidator {
    async fn validate(&self, credential: &str) -> Result<Identity, ProviderError> {
        self.decode_claims(credential).map(Claims::into_identity)
    }
}
