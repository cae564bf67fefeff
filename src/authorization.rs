use std::sync::Arc;

use chrono::Utc;
use futures::future::{self, Future};
use uuid::Uuid;

use crate::claims::AuthorizationClaims;
use crate::credentials::{CredentialCache, CredentialError};
use crate::error::ErrorCode;
use crate::records::{AuthorizationCodeStore, RecordError, SubmissionStatus, TaxReturnSource};
use crate::token::TokenIssuer;

pub type CreateFuture = Box<dyn Future<Item=Uuid, Error=ErrorCode> + Send>;

/// Handles `POST /authorization-code`: checks the return may be exported, mints an opaque code
/// and registers it under a fresh identifier.
pub struct AuthorizationCodeService {
    issuer: Arc<TokenIssuer>,
    codes: Arc<dyn AuthorizationCodeStore>,
    tax_returns: Arc<dyn TaxReturnSource>,
    credentials: Arc<CredentialCache>,
}

impl AuthorizationCodeService {
    pub fn new(issuer: Arc<TokenIssuer>, codes: Arc<dyn AuthorizationCodeStore>, tax_returns: Arc<dyn TaxReturnSource>, credentials: Arc<CredentialCache>) -> AuthorizationCodeService {
        AuthorizationCodeService { issuer, codes, tax_returns, credentials }
    }

    pub fn create(&self, claims: AuthorizationClaims) -> CreateFuture {
        if let Err(e) = claims.validate() {
            warn!("Invalid authorization code request for tax return {}: {}", claims.tax_return_id, e);
            return Box::new(future::err(ErrorCode::InvalidRequest));
        }
        let accepted_only = match self.credentials.by_state_code(&claims.state_code, Utc::now()) {
            Ok(ref credential) if credential.archived => {
                warn!("Account {} for state {} is archived", credential.account_id, claims.state_code);
                return Box::new(future::err(ErrorCode::AccountArchived));
            },
            Ok(credential) => credential.accepted_only,
            Err(CredentialError::NotFound) => {
                error!("No credential configured for state {}", claims.state_code);
                return Box::new(future::err(ErrorCode::CertificateNotFound));
            },
            Err(e) => {
                error!("Cannot resolve credential for state {}: {}", claims.state_code, e);
                return Box::new(future::err(ErrorCode::InternalError));
            },
        };

        let issuer = Arc::clone(&self.issuer);
        let codes = Arc::clone(&self.codes);
        let tax_return_id = claims.tax_return_id;
        let state_code = claims.state_code.clone();
        let submission_id = claims.submission_id.clone();
        let tax_year = claims.tax_year;
        Box::new(
            self.tax_returns.status(claims.tax_year, &claims.tax_return_id, &claims.submission_id)
                .map_err(move |e| match e {
                    RecordError::NotFound => {
                        error!("Tax return {} submission {} ({}) not found", tax_return_id, submission_id, tax_year);
                        ErrorCode::TaxReturnNotFound
                    },
                    RecordError::Unavailable => ErrorCode::InternalError,
                })
                .and_then(move |status| {
                    match status {
                        SubmissionStatus::Accepted => Ok(()),
                        SubmissionStatus::Pending if !accepted_only => Ok(()),
                        status => {
                            warn!("Tax return {} is {}, not exportable to {}", tax_return_id, status, state_code);
                            Err(ErrorCode::TaxReturnNotAccepted)
                        },
                    }
                })
                .and_then(move |_| issuer.issue(&claims).map_err(ErrorCode::from))
                .and_then(move |code| {
                    codes.register(code)
                        .map(|id| {
                            info!("Issued authorization code {} for tax return {}", id, tax_return_id);
                            id
                        })
                        .or(Err(ErrorCode::InternalError))
                })
        )
    }
}
