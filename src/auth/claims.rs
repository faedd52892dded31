use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::Identity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    /// Provider-specific claims such as `custom:restaurant_id`
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    /// Convert to an identity. Only string-valued claims become attributes.
    pub fn into_identity(self) -> Identity {
        let attributes = self
            .extra
            .into_iter()
            .filter_map(|(key, value)| match value {
                serde_json::Value::String(s) => Some((key, s)),
                _ => None,
            })
            .collect();

        Identity {
            subject: self.sub,
            attributes,
        }
    }
}
