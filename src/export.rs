//! The export protocol for `GET /export-return`.
//!
//! Each request walks the stages of `ExportStage` in order and stops at the first failure. Every
//! failure becomes exactly one `ErrorCode`; codes that would let a caller tell a missing return
//! from a missing certificate are collapsed before they leave this module. Transitions are
//! logged with the identifiers in `ExportTrail` and nothing else.

use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{self, Future};
use serde::Serialize;
use uuid::Uuid;

use crate::claims::AuthorizationClaims;
use crate::crypto::{HybridEncryptionResult, RandomSource, hybrid_encrypt};
use crate::error::ErrorCode;
use crate::identity::StateIdentityVerifier;
use crate::records::{
    AuthorizationCodeStore, ExportedFacts, ExportedFactsSource, RecordError, SubmissionStatus, TaxReturnRecord, TaxReturnSource,
};
use crate::sanitizer::Sanitizer;
use crate::token::TokenIssuer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Start,
    FeatureEnabledCheck,
    BearerPresent,
    IdentityVerified,
    RecordResolved,
    FactsRetrieved,
    Sanitized,
    Encrypted,
    Responded,
}

/// Identifiers that may appear in export logs.
#[derive(Debug, Clone, Default)]
pub struct ExportTrail {
    pub account_id: Option<String>,
    pub state_code: Option<String>,
    pub tax_year: Option<u16>,
    pub tax_return_id: Option<Uuid>,
    pub submission_id: Option<String>,
}

impl ExportTrail {
    fn with_claims(mut self, claims: &AuthorizationClaims) -> ExportTrail {
        self.tax_year = Some(claims.tax_year);
        self.tax_return_id = Some(claims.tax_return_id);
        self.submission_id = Some(claims.submission_id.clone());
        self
    }
}

impl Display for ExportTrail {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        fn field<T: Display>(value: &Option<T>) -> String {
            value.as_ref().map_or_else(|| "-".to_owned(), ToString::to_string)
        }
        write!(
            f, "accountId={} stateCode={} taxYear={} taxReturnId={} submissionId={}",
            field(&self.account_id), field(&self.state_code), field(&self.tax_year),
            field(&self.tax_return_id), field(&self.submission_id),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportResult {
    Success(HybridEncryptionResult),
    Error(ErrorCode),
}

#[derive(Debug, Clone, Copy)]
pub struct ExportSettings {
    pub export_enabled: bool,
    pub exported_facts_enabled: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings { export_enabled: true, exported_facts_enabled: false }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ExportPayload<'a> {
    status: SubmissionStatus,
    submission_id: &'a str,
    xml: String,
    exported_facts: ExportedFacts,
}

#[derive(Debug)]
struct Failure {
    code: ErrorCode,
    stage: ExportStage,
    trail: ExportTrail,
}

impl Failure {
    fn new(code: ErrorCode, stage: ExportStage, trail: ExportTrail) -> Failure {
        Failure { code, stage, trail }
    }
}

type StageFuture<T> = Box<dyn Future<Item=(T, ExportTrail), Error=Failure> + Send>;

fn transition(stage: ExportStage, trail: &ExportTrail) {
    info!("Export {:?}: {}", stage, trail);
}

fn fail<T>(code: ErrorCode, stage: ExportStage, trail: ExportTrail) -> StageFuture<T> where T: Send + 'static {
    Box::new(future::err(Failure::new(code, stage, trail)))
}

fn record_error(e: RecordError, not_found: ErrorCode) -> ErrorCode {
    match e {
        RecordError::NotFound => not_found,
        RecordError::Unavailable => ErrorCode::InternalError,
    }
}

pub struct ExportOrchestrator {
    settings: ExportSettings,
    verifier: Arc<StateIdentityVerifier>,
    issuer: Arc<TokenIssuer>,
    codes: Arc<dyn AuthorizationCodeStore>,
    tax_returns: Arc<dyn TaxReturnSource>,
    facts: Arc<dyn ExportedFactsSource>,
    sanitizer: Arc<Sanitizer>,
    random: Arc<dyn RandomSource>,
}

impl ExportOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: ExportSettings,
        verifier: Arc<StateIdentityVerifier>,
        issuer: Arc<TokenIssuer>,
        codes: Arc<dyn AuthorizationCodeStore>,
        tax_returns: Arc<dyn TaxReturnSource>,
        facts: Arc<dyn ExportedFactsSource>,
        sanitizer: Arc<Sanitizer>,
        random: Arc<dyn RandomSource>,
    ) -> ExportOrchestrator {
        ExportOrchestrator { settings, verifier, issuer, codes, tax_returns, facts, sanitizer, random }
    }

    pub fn export<E>(&self, authorization: Option<&str>) -> Box<dyn Future<Item=ExportResult, Error=E> + Send> where E: Send + 'static {
        self.export_at(authorization, Utc::now())
    }

    /// Never fails: every outcome, including internal errors, is an `ExportResult`.
    pub fn export_at<E>(&self, authorization: Option<&str>, now: DateTime<Utc>) -> Box<dyn Future<Item=ExportResult, Error=E> + Send> where E: Send + 'static {
        Box::new(
            self.run(authorization, now)
                .then(|outcome| Ok(conclude(outcome)))
        )
    }

    fn run(&self, authorization: Option<&str>, now: DateTime<Utc>) -> StageFuture<HybridEncryptionResult> {
        let mut trail = ExportTrail::default();
        transition(ExportStage::Start, &trail);

        if !self.settings.export_enabled {
            return fail(ErrorCode::FeatureDisabled, ExportStage::FeatureEnabledCheck, trail);
        }
        transition(ExportStage::FeatureEnabledCheck, &trail);

        if authorization.is_none() {
            return fail(ErrorCode::MissingBearerToken, ExportStage::BearerPresent, trail);
        }
        transition(ExportStage::BearerPresent, &trail);

        let verified = match self.verifier.verify_bearer_at(authorization, now) {
            Ok(verified) => verified,
            Err(code) => return fail(code, ExportStage::IdentityVerified, trail),
        };
        trail.account_id = Some(verified.account_id.clone());
        trail.state_code = Some(verified.credential.state_code.clone());
        if !verified.credential.export_enabled {
            return fail(ErrorCode::FeatureDisabled, ExportStage::IdentityVerified, trail);
        }
        transition(ExportStage::IdentityVerified, &trail);

        let code = match self.codes.lookup(&verified.authorization_code) {
            Ok(code) => code,
            Err(e) => {
                let code = record_error(e, ErrorCode::AuthorizationCodeNotFound);
                return fail(code, ExportStage::RecordResolved, trail);
            },
        };

        let tax_returns = Arc::clone(&self.tax_returns);
        let facts = Arc::clone(&self.facts);
        let sanitizer = Arc::clone(&self.sanitizer);
        let random = Arc::clone(&self.random);
        let settings = self.settings;
        let state_code = verified.credential.state_code.clone();
        let accepted_only = verified.credential.accepted_only;
        let account_id = verified.account_id;
        let public_key = verified.public_key;

        let claims_trail = trail.clone();
        let claims = self.issuer.decrypt_and_verify_at(&code, now)
            .map_err(move |e| Failure::new(ErrorCode::from(e), ExportStage::RecordResolved, claims_trail))
            .and_then(move |claims| {
                let trail = trail.with_claims(&claims);
                if claims.state_code != state_code {
                    warn!("Authorization code minted for another state than {}", state_code);
                    return Err(Failure::new(ErrorCode::StateCodeMismatch, ExportStage::RecordResolved, trail));
                }
                Ok((claims, trail))
            });

        let record = claims.and_then(move |(claims, trail)| {
            let lookup_trail = trail.clone();
            tax_returns.tax_return(claims.tax_year, &claims.tax_return_id, &claims.submission_id)
                .map_err(move |e| {
                    let code = record_error(e, ErrorCode::TaxReturnNotFound);
                    Failure::new(code, ExportStage::RecordResolved, lookup_trail)
                })
                .and_then(move |record| {
                    let code = match record.status {
                        SubmissionStatus::Accepted => None,
                        SubmissionStatus::Pending if !accepted_only => None,
                        SubmissionStatus::Pending | SubmissionStatus::Rejected => Some(ErrorCode::TaxReturnNotAccepted),
                        SubmissionStatus::Error => Some(ErrorCode::InternalError),
                    };
                    match code {
                        Some(code) => {
                            warn!("Tax return is {}, cannot export", record.status);
                            Err(Failure::new(code, ExportStage::RecordResolved, trail))
                        },
                        None => {
                            transition(ExportStage::RecordResolved, &trail);
                            Ok((record, trail))
                        },
                    }
                })
        });

        let with_facts = record.and_then(move |(record, trail)| -> StageFuture<(TaxReturnRecord, ExportedFacts)> {
            if !settings.exported_facts_enabled {
                transition(ExportStage::FactsRetrieved, &trail);
                return Box::new(future::ok(((record, ExportedFacts::new()), trail)));
            }
            let state_code = trail.state_code.clone().unwrap_or_default();
            let facts_trail = trail.clone();
            Box::new(
                facts.exported_facts(&record.submission_id, &state_code, &account_id)
                    .map_err(move |e| {
                        error!("Cannot retrieve exported facts: {}", e);
                        Failure::new(ErrorCode::InternalError, ExportStage::FactsRetrieved, facts_trail)
                    })
                    .map(move |facts| {
                        transition(ExportStage::FactsRetrieved, &trail);
                        ((record, facts), trail)
                    })
            )
        });

        Box::new(with_facts.and_then(move |((record, facts), trail)| {
            let xml = sanitizer.sanitize(&record.xml);
            transition(ExportStage::Sanitized, &trail);
            let payload = ExportPayload {
                status: record.status,
                submission_id: &record.submission_id,
                xml,
                exported_facts: facts,
            };
            let payload = match serde_json::to_vec(&payload) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Cannot serialise export payload: {}", e);
                    return Err(Failure::new(ErrorCode::InternalError, ExportStage::Encrypted, trail));
                },
            };
            match hybrid_encrypt(&payload, &public_key, random.as_ref()) {
                Ok(result) => {
                    transition(ExportStage::Encrypted, &trail);
                    Ok((result, trail))
                },
                Err(e) => {
                    error!("Cannot encrypt export: {}", e);
                    Err(Failure::new(ErrorCode::InternalError, ExportStage::Encrypted, trail))
                },
            }
        }))
    }
}

fn conclude(outcome: Result<(HybridEncryptionResult, ExportTrail), Failure>) -> ExportResult {
    match outcome {
        Ok((result, trail)) => {
            transition(ExportStage::Responded, &trail);
            ExportResult::Success(result)
        },
        Err(failure) => {
            let code = failure.code.client_facing();
            if code != failure.code {
                error!("Export failed at {:?} with {}, reported as {}: {}", failure.stage, failure.code, code, failure.trail);
            } else {
                error!("Export failed at {:?} with {}: {}", failure.stage, failure.code, failure.trail);
            }
            ExportResult::Error(code)
        },
    }
}
