mod claims;
mod gate;
mod jwt;

pub use claims::Claims;
pub use gate::{extract_credential, AuthError, AuthGate, Identity, IdentityProvider, ProviderError};
pub use jwt::JwtValidator;
