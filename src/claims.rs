use std::fmt::{Debug, Formatter, Result as FormatResult};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Payload key under which claims are embedded in a signed authorization code.
pub const EXPORT_CLAIM_KEY: &str = "tax-return-export-metadata";

pub const MIN_TAX_YEAR: u16 = 2000;
pub const MAX_TAX_YEAR: u16 = 2100;

static STATE_CODES: [&str; 51] = [
    "AK", "AL", "AR", "AZ", "CA", "CO", "CT", "DC", "DE", "FL", "GA", "HI", "IA", "ID", "IL", "IN", "KS",
    "KY", "LA", "MA", "MD", "ME", "MI", "MN", "MO", "MS", "MT", "NC", "ND", "NE", "NH", "NJ", "NM", "NV",
    "NY", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VA", "VT", "WA", "WI", "WV", "WY",
];

define_error!(ClaimsError; Missing="required claim missing", TaxYear="implausible tax year", StateCode="unrecognised state code");

pub fn is_state_code(code: &str) -> bool {
    STATE_CODES.binary_search(&code).is_ok()
}

/// Facts about one filed return that a state is authorised to export.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthorizationClaims {
    pub tax_return_id: Uuid,
    pub taxpayer_identifier: String,
    pub tax_year: u16,
    pub state_code: String,
    pub submission_id: String,
}

impl AuthorizationClaims {
    pub fn validate(&self) -> Result<(), ClaimsError> {
        if self.taxpayer_identifier.trim().is_empty() || self.submission_id.trim().is_empty() {
            return Err(ClaimsError::Missing);
        }
        if self.tax_year < MIN_TAX_YEAR || self.tax_year > MAX_TAX_YEAR {
            return Err(ClaimsError::TaxYear);
        }
        if !is_state_code(&self.state_code) {
            return Err(ClaimsError::StateCode);
        }
        Ok(())
    }

    /// Recovers claims from a verified payload; any failure here means the code was minted
    /// without complete claims, which callers must treat as an integrity problem.
    pub fn from_payload(payload: &Value) -> Result<AuthorizationClaims, ClaimsError> {
        let embedded = payload.get(EXPORT_CLAIM_KEY)
            .ok_or(ClaimsError::Missing)?;
        let claims: AuthorizationClaims = serde_json::from_value(embedded.clone())
            .or(Err(ClaimsError::Missing))?;
        claims.validate()?;
        Ok(claims)
    }
}

// taxpayer identifier never reaches logs
impl Debug for AuthorizationClaims {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        f.debug_struct("AuthorizationClaims")
            .field("tax_return_id", &self.tax_return_id)
            .field("taxpayer_identifier", &"<redacted>")
            .field("tax_year", &self.tax_year)
            .field("state_code", &self.state_code)
            .field("submission_id", &self.submission_id)
            .finish()
    }
}
