use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::{self, Future};
use ring::{digest, hmac};
use serde_json::{json, Value};

use crate::claims::{AuthorizationClaims, EXPORT_CLAIM_KEY};
use crate::envelope::{EncryptionContext, EnvelopeEncryption, EnvelopeError};
use crate::error::ErrorCode;
use crate::misc::{b64url_decode, b64url_encode, timestamp_to_datetime};
use crate::token::parts::SignedTokenParts;

pub const DEFAULT_TTL_SECONDS: i64 = 60;
pub const ENCRYPTION_CONTEXT_TYPE: &str = "STATE-API";
/// HS256 keys shorter than the digest output are refused.
pub const MIN_SECRET_LEN: usize = 32;

static ALGORITHM: &str = "HS256";

define_error!(SecretError = "signing secret must be at least 32 bytes");
define_error!(IssueError; InvalidClaims="invalid authorization claims", Signing="cannot sign authorization code", Encryption="cannot encrypt authorization code");
define_error!(VerifyCodeError; Malformed="malformed authorization code", Decryption="cannot decrypt authorization code", Unavailable="encryption backend unavailable", SignatureInvalid="authorization code signature invalid", Expired="authorization code expired", Integrity="authorization code claims incomplete");

impl From<IssueError> for ErrorCode {
    fn from(err: IssueError) -> ErrorCode {
        match err {
            IssueError::InvalidClaims => ErrorCode::InvalidRequest,
            IssueError::Signing | IssueError::Encryption => ErrorCode::InternalError,
        }
    }
}

impl From<VerifyCodeError> for ErrorCode {
    fn from(err: VerifyCodeError) -> ErrorCode {
        match err {
            VerifyCodeError::Malformed => ErrorCode::AuthorizationCodeMalformed,
            VerifyCodeError::Decryption | VerifyCodeError::SignatureInvalid => ErrorCode::SignatureInvalid,
            VerifyCodeError::Expired => ErrorCode::TokenExpired,
            VerifyCodeError::Unavailable | VerifyCodeError::Integrity => ErrorCode::InternalError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueCode {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

pub type IssueFuture = Box<dyn Future<Item=OpaqueCode, Error=IssueError> + Send>;
pub type VerifyFuture = Box<dyn Future<Item=AuthorizationClaims, Error=VerifyCodeError> + Send>;

/// Mints and opens opaque authorization codes.
///
/// A code is the base64url envelope encryption of the `SignedTokenParts` of an HS256-signed
/// structure carrying the claims plus `iat` and `exp`. The issuer holds no mutable state.
pub struct TokenIssuer {
    signing_key: Arc<hmac::SigningKey>,
    envelope: Arc<dyn EnvelopeEncryption>,
    ttl: Duration,
    context: EncryptionContext,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], envelope: Arc<dyn EnvelopeEncryption>, ttl: Duration, system: &str) -> Result<TokenIssuer, SecretError> {
        if secret.len() < MIN_SECRET_LEN {
            error!("Signing secret has {} bytes, at least {} required", secret.len(), MIN_SECRET_LEN);
            return Err(SecretError);
        }
        let mut context = EncryptionContext::new();
        context.insert("system".to_owned(), system.to_owned());
        context.insert("type".to_owned(), ENCRYPTION_CONTEXT_TYPE.to_owned());
        Ok(TokenIssuer {
            signing_key: Arc::new(hmac::SigningKey::new(&digest::SHA256, secret)),
            envelope,
            ttl,
            context,
        })
    }

    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, claims: &AuthorizationClaims) -> IssueFuture {
        self.issue_at(claims, Utc::now())
    }

    pub fn issue_at(&self, claims: &AuthorizationClaims, now: DateTime<Utc>) -> IssueFuture {
        if let Err(e) = claims.validate() {
            warn!("Refusing to sign claims for tax return {}: {}", claims.tax_return_id, e);
            return Box::new(future::err(IssueError::InvalidClaims));
        }
        let expires_at = match now.checked_add_signed(self.ttl) {
            Some(expires_at) => expires_at,
            None => {
                error!("Authorization code lifetime of {} overflows, check signing configuration", self.ttl);
                return Box::new(future::err(IssueError::Signing));
            },
        };
        let payload = json!({
            EXPORT_CLAIM_KEY: claims,
            "iat": now.timestamp(),
            "exp": expires_at.timestamp(),
        });
        let buffer = match self.sign(&payload).and_then(|parts| parts.to_bytes().or(Err(IssueError::Signing))) {
            Ok(buffer) => buffer,
            Err(e) => {
                error!("Cannot sign authorization code, check signing configuration: {}", e);
                return Box::new(future::err(e));
            },
        };
        Box::new(
            self.envelope.encrypt(buffer, &self.context)
                .map(move |sealed| OpaqueCode { value: b64url_encode(sealed), expires_at })
                .map_err(|e| {
                    error!("Cannot encrypt authorization code: {}", e);
                    IssueError::Encryption
                })
        )
    }

    pub fn decrypt_and_verify(&self, code: &str) -> VerifyFuture {
        self.decrypt_and_verify_at(code, Utc::now())
    }

    /// Reverses `issue_at`; a code is expired once `now` reaches its `exp`.
    pub fn decrypt_and_verify_at(&self, code: &str, now: DateTime<Utc>) -> VerifyFuture {
        let sealed = match b64url_decode(code.trim()) {
            Ok(sealed) => sealed,
            Err(_) => return Box::new(future::err(VerifyCodeError::Malformed)),
        };
        let signing_key = Arc::clone(&self.signing_key);
        Box::new(
            self.envelope.decrypt(sealed, &self.context)
                .map_err(|e| {
                    match e {
                        EnvelopeError::Unavailable => {
                            error!("Cannot decrypt authorization code: {}", e);
                            VerifyCodeError::Unavailable
                        },
                        _ => {
                            warn!("Authorization code rejected by envelope: {}", e);
                            VerifyCodeError::Decryption
                        },
                    }
                })
                .and_then(move |buffer| verify_buffer(&signing_key, &buffer, now))
        )
    }

    fn sign(&self, payload: &Value) -> Result<SignedTokenParts, IssueError> {
        let signing_key = &self.signing_key;
        SignedTokenParts::new(&json!({"alg": ALGORITHM}), payload, |input| {
            hmac::sign(signing_key, input).as_ref().to_vec()
        }).or(Err(IssueError::Signing))
    }
}

fn verify_buffer(signing_key: &hmac::SigningKey, buffer: &[u8], now: DateTime<Utc>) -> Result<AuthorizationClaims, VerifyCodeError> {
    let parts = SignedTokenParts::from_bytes(buffer)
        .or(Err(VerifyCodeError::Malformed))?;
    let signature = parts.signature()
        .or(Err(VerifyCodeError::Malformed))?;
    hmac::verify_with_own_key(signing_key, parts.signing_input().as_bytes(), &signature)
        .map_err(|_| {
            warn!("Authorization code signature mismatch");
            VerifyCodeError::SignatureInvalid
        })?;

    let header: Value = parts.header()
        .or(Err(VerifyCodeError::Malformed))?;
    if header.get("alg").and_then(Value::as_str) != Some(ALGORITHM) {
        return Err(VerifyCodeError::Malformed);
    }
    let payload: Value = parts.payload()
        .or(Err(VerifyCodeError::Integrity))?;
    let expires_at = payload.get("exp")
        .and_then(Value::as_i64)
        .and_then(timestamp_to_datetime)
        .ok_or_else(|| {
            error!("Integrity failure: verified authorization code has no expiry");
            VerifyCodeError::Integrity
        })?;
    if now >= expires_at {
        info!("Authorization code expired at {}", expires_at);
        return Err(VerifyCodeError::Expired);
    }
    AuthorizationClaims::from_payload(&payload)
        .map_err(|e| {
            error!("Integrity failure: verified authorization code claims unusable: {}", e);
            VerifyCodeError::Integrity
        })
}

impl Debug for TokenIssuer {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "TokenIssuer({} ttl {}s)", self.envelope.name(), self.ttl.num_seconds())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SeededRandomSource;
    use crate::envelope::LocalEnvelope;
    use crate::test_support::scenario_claims;

    static K1: &[u8] = b"GTc+SlI7C7ECPHAhAvIWqn2yAvzAGMVj";
    static K2: &[u8] = b"HTc+SlI7C7ECPHAhAvIWqn2yAvzAGMVj";

    fn envelope() -> Arc<dyn EnvelopeEncryption> {
        Arc::new(LocalEnvelope::new(*b"12345678901234567890123456789012", Arc::new(SeededRandomSource::new(7))))
    }

    fn issuer(secret: &[u8], envelope: Arc<dyn EnvelopeEncryption>) -> TokenIssuer {
        TokenIssuer::new(secret, envelope, Duration::seconds(DEFAULT_TTL_SECONDS), "DIRECT-FILE").unwrap()
    }

    fn now() -> DateTime<Utc> {
        timestamp_to_datetime(1_700_000_000).unwrap()
    }

    #[test]
    fn scenario_round_trip_and_expiry() {
        let issuer = issuer(K1, envelope());
        let code = issuer.issue_at(&scenario_claims(), now()).wait().unwrap();
        assert_eq!(code.expires_at, now() + Duration::seconds(60));
        assert!(!code.value.contains('='));

        let claims = issuer.decrypt_and_verify_at(&code.value, now()).wait().unwrap();
        assert_eq!(claims, scenario_claims());
        assert_eq!(claims.taxpayer_identifier, "123004567");

        let claims = issuer.decrypt_and_verify_at(&code.value, now() + Duration::seconds(59)).wait();
        assert_eq!(claims, Ok(scenario_claims()));
        let expired = issuer.decrypt_and_verify_at(&code.value, now() + Duration::seconds(61)).wait();
        assert_eq!(expired, Err(VerifyCodeError::Expired));
        assert_eq!(ErrorCode::from(VerifyCodeError::Expired), ErrorCode::TokenExpired);
        let boundary = issuer.decrypt_and_verify_at(&code.value, now() + Duration::seconds(60)).wait();
        assert_eq!(boundary, Err(VerifyCodeError::Expired));
    }

    #[test]
    fn codes_differ_per_issue() {
        let issuer = issuer(K1, envelope());
        let first = issuer.issue_at(&scenario_claims(), now()).wait().unwrap();
        let second = issuer.issue_at(&scenario_claims(), now()).wait().unwrap();
        assert_ne!(first.value, second.value);
    }

    #[test]
    fn signature_binding() {
        let envelope = envelope();
        let first = issuer(K1, Arc::clone(&envelope));
        let second = issuer(K2, envelope);
        let code = first.issue_at(&scenario_claims(), now()).wait().unwrap();
        assert_eq!(second.decrypt_and_verify_at(&code.value, now()).wait(), Err(VerifyCodeError::SignatureInvalid));
    }

    #[test]
    fn context_binding() {
        let envelope = envelope();
        let first = issuer(K1, Arc::clone(&envelope));
        let other_system = TokenIssuer::new(K1, envelope, Duration::seconds(60), "OTHER").unwrap();
        let code = first.issue_at(&scenario_claims(), now()).wait().unwrap();
        assert_eq!(other_system.decrypt_and_verify_at(&code.value, now()).wait(), Err(VerifyCodeError::Decryption));
    }

    #[test]
    fn tampered_and_malformed_codes() {
        let issuer = issuer(K1, envelope());
        let code = issuer.issue_at(&scenario_claims(), now()).wait().unwrap();
        let mut sealed = b64url_decode(&code.value).unwrap();
        sealed[3] ^= 1;
        let tampered = b64url_encode(sealed);
        assert_eq!(issuer.decrypt_and_verify_at(&tampered, now()).wait(), Err(VerifyCodeError::Decryption));
        assert_eq!(issuer.decrypt_and_verify_at("not/base64url!", now()).wait(), Err(VerifyCodeError::Malformed));
    }

    #[test]
    fn invalid_claims_never_signed() {
        let issuer = issuer(K1, envelope());
        let mut claims = scenario_claims();
        claims.state_code = "XX".to_owned();
        assert_eq!(issuer.issue_at(&claims, now()).wait(), Err(IssueError::InvalidClaims));
    }

    #[test]
    fn signed_but_incomplete_claims() {
        let issuer = issuer(K1, envelope());
        let payload = json!({"iat": now().timestamp(), "exp": now().timestamp() + 60});
        let buffer = issuer.sign(&payload).unwrap().to_bytes().unwrap();
        let sealed = issuer.envelope.encrypt(buffer, &issuer.context).wait().unwrap();
        let result = issuer.decrypt_and_verify_at(&b64url_encode(sealed), now()).wait();
        assert_eq!(result, Err(VerifyCodeError::Integrity));
        assert_eq!(ErrorCode::from(VerifyCodeError::Integrity), ErrorCode::InternalError);
    }

    #[test]
    fn unrepresentable_expiry() {
        let issuer = TokenIssuer::new(K1, envelope(), Duration::seconds(1_000_000_000_000_000), "DIRECT-FILE").unwrap();
        assert_eq!(issuer.issue_at(&scenario_claims(), now()).wait().err(), Some(IssueError::Signing));
        assert_eq!(ErrorCode::from(IssueError::Signing), ErrorCode::InternalError);
    }

    #[test]
    fn weak_secret() {
        assert_eq!(TokenIssuer::new(b"short", envelope(), Duration::seconds(60), "DIRECT-FILE").err(), Some(SecretError));
    }
}
