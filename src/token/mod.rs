//! Authorization codes: HMAC-signed claims sealed by envelope encryption

mod parts;
mod issuer;

pub use parts::{PartsError, SignedTokenParts};
pub use issuer::{
    TokenIssuer, OpaqueCode, IssueError, VerifyCodeError, SecretError,
    DEFAULT_TTL_SECONDS, ENCRYPTION_CONTEXT_TYPE, MIN_SECRET_LEN,
};
