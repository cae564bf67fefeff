//! Authenticates a state from its RS256-signed bearer token.
//!
//! The verification key depends on the issuer, so the token is read twice: an unverified peek
//! at `iss` selects the credential, then the claims are read again from the verified token and
//! `iss` must name the account whose key proved the signature.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, Public};
use openssl::sign::Verifier;
use serde::Deserialize;
use uuid::Uuid;

use crate::credentials::{CredentialCache, CredentialError, StateCredential};
use crate::error::ErrorCode;
use crate::misc::timestamp_to_datetime;
use crate::token::SignedTokenParts;

static BEARER_PREFIX: &str = "Bearer ";
static ALGORITHM: &str = "RS256";

#[derive(Deserialize, Debug)]
struct BearerHeader {
    alg: String,
}

#[derive(Deserialize, Debug)]
struct BearerClaims {
    iss: Option<String>,
    sub: Option<String>,
    // NumericDate, which may carry a fraction
    exp: Option<f64>,
}

pub struct VerifiedState {
    pub account_id: String,
    pub authorization_code: Uuid,
    pub credential: Arc<StateCredential>,
    pub public_key: PKey<Public>,
}

/// A token that has been split and whose header names RS256, but is not yet trusted.
struct PresentedToken {
    parts: SignedTokenParts,
    claimed_issuer: String,
}

pub struct StateIdentityVerifier {
    credentials: Arc<CredentialCache>,
}

impl StateIdentityVerifier {
    pub fn new(credentials: Arc<CredentialCache>) -> StateIdentityVerifier {
        StateIdentityVerifier { credentials }
    }

    pub fn verify_bearer(&self, authorization: Option<&str>) -> Result<VerifiedState, ErrorCode> {
        self.verify_bearer_at(authorization, Utc::now())
    }

    pub fn verify_bearer_at(&self, authorization: Option<&str>, now: DateTime<Utc>) -> Result<VerifiedState, ErrorCode> {
        let token = bearer_token(authorization)?;
        let presented = peek(token)?;

        let credential = self.credentials.by_account_id(&presented.claimed_issuer, now)
            .map_err(|e| match e {
                CredentialError::NotFound => {
                    warn!("Bearer token issued by unknown account {}", presented.claimed_issuer);
                    ErrorCode::IssuerUnknown
                },
                e => {
                    error!("Cannot resolve credential for account {}: {}", presented.claimed_issuer, e);
                    ErrorCode::InternalError
                },
            })?;
        if credential.archived {
            warn!("Bearer token issued by archived account {}", credential.account_id);
            return Err(ErrorCode::AccountArchived);
        }
        let public_key = credential.public_key(now)
            .map_err(|e| {
                error!("Unusable certificate for account {} ({}): {}", credential.account_id, credential.state_code, e);
                match e {
                    CredentialError::Expired => ErrorCode::CertificateExpired,
                    _ => ErrorCode::CertificateNotFound,
                }
            })?;

        verify_signature(&presented.parts, &public_key)?;
        let claims = confirm_issuer(&presented.parts, &credential)?;

        if let Some(exp) = claims.exp {
            let expires_at = Some(exp.floor())
                .filter(|exp| exp.is_finite())
                .and_then(|exp| timestamp_to_datetime(exp as i64))
                .ok_or(ErrorCode::BearerTokenMalformed)?;
            if now >= expires_at {
                info!("Bearer token for account {} expired at {}", credential.account_id, expires_at);
                return Err(ErrorCode::TokenExpired);
            }
        }

        let authorization_code = claims.sub.as_ref()
            .and_then(|sub| Uuid::parse_str(sub).ok())
            .ok_or_else(|| {
                warn!("Bearer token for account {} carries no authorization code id", credential.account_id);
                ErrorCode::AuthorizationCodeMalformed
            })?;

        Ok(VerifiedState {
            account_id: credential.account_id.clone(),
            authorization_code,
            credential,
            public_key,
        })
    }
}

fn bearer_token(authorization: Option<&str>) -> Result<&str, ErrorCode> {
    match authorization {
        Some(header) if header.starts_with(BEARER_PREFIX) => Ok(header[BEARER_PREFIX.len()..].trim()),
        _ => Err(ErrorCode::MissingBearerToken),
    }
}

// unverified: nothing read here may be trusted beyond choosing a key
fn peek(token: &str) -> Result<PresentedToken, ErrorCode> {
    let parts = SignedTokenParts::split(token)
        .or(Err(ErrorCode::BearerTokenMalformed))?;
    let header: BearerHeader = parts.header()
        .or(Err(ErrorCode::BearerTokenMalformed))?;
    if header.alg != ALGORITHM {
        warn!("Bearer token uses unsupported algorithm {}", header.alg);
        return Err(ErrorCode::BearerTokenMalformed);
    }
    let claims: BearerClaims = parts.payload()
        .or(Err(ErrorCode::BearerTokenMalformed))?;
    let claimed_issuer = claims.iss.ok_or(ErrorCode::BearerTokenMalformed)?;
    Ok(PresentedToken { parts, claimed_issuer })
}

fn verify_signature(parts: &SignedTokenParts, public_key: &PKey<Public>) -> Result<(), ErrorCode> {
    if public_key.id() != Id::RSA {
        error!("State certificate does not hold an RSA key");
        return Err(ErrorCode::CertificateNotFound);
    }
    let signature = parts.signature()
        .or(Err(ErrorCode::BearerTokenMalformed))?;
    let verified = Verifier::new(MessageDigest::sha256(), public_key)
        .and_then(|mut verifier| {
            verifier.update(parts.signing_input().as_bytes())?;
            verifier.verify(&signature)
        });
    match verified {
        Ok(true) => Ok(()),
        Ok(false) => Err(ErrorCode::SignatureInvalid),
        Err(e) => {
            // malformed signatures surface as openssl errors
            debug!("Bearer signature rejected: {}", e);
            Err(ErrorCode::SignatureInvalid)
        },
    }
}

/// Claims re-read from the verified token; `iss` must name the account whose key verified it.
fn confirm_issuer(parts: &SignedTokenParts, credential: &StateCredential) -> Result<BearerClaims, ErrorCode> {
    let claims: BearerClaims = parts.payload()
        .or(Err(ErrorCode::BearerTokenMalformed))?;
    match claims.iss {
        Some(ref iss) if iss == &credential.account_id => Ok(claims),
        _ => {
            error!("Verified bearer issuer does not match signing account {}", credential.account_id);
            Err(ErrorCode::SignatureInvalid)
        },
    }
}
