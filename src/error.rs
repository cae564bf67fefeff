use std::error::Error;
use std::fmt::{Display, Formatter, Result as FormatResult};

/// Closed set of failures the export protocol can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FeatureDisabled,
    MissingBearerToken,
    BearerTokenMalformed,
    IssuerUnknown,
    AccountArchived,
    SignatureInvalid,
    AuthorizationCodeMalformed,
    AuthorizationCodeNotFound,
    TokenExpired,
    StateCodeMismatch,
    CertificateNotFound,
    CertificateExpired,
    TaxReturnNotFound,
    TaxReturnNotAccepted,
    InvalidRequest,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::FeatureDisabled => "E_STATE_API_DISABLED",
            ErrorCode::MissingBearerToken => "E_BEARER_TOKEN_MISSING",
            ErrorCode::BearerTokenMalformed => "E_BAD_JWT_BEARER_TOKEN",
            ErrorCode::IssuerUnknown => "E_ACCOUNT_ID_NOT_EXIST",
            ErrorCode::AccountArchived => "E_ACCOUNT_ARCHIVED",
            ErrorCode::SignatureInvalid => "E_JWT_VERIFICATION_FAILED",
            ErrorCode::AuthorizationCodeMalformed => "E_AUTHORIZATION_CODE_INVALID_FORMAT",
            ErrorCode::AuthorizationCodeNotFound => "E_AUTHORIZATION_CODE_NOT_EXIST",
            ErrorCode::TokenExpired => "E_AUTHORIZATION_CODE_EXPIRED",
            ErrorCode::StateCodeMismatch => "E_MISMATCHED_STATE_CODE",
            ErrorCode::CertificateNotFound => "E_CERTIFICATE_NOT_FOUND",
            ErrorCode::CertificateExpired => "E_CERTIFICATE_EXPIRED",
            ErrorCode::TaxReturnNotFound => "E_TAX_RETURN_NOT_FOUND",
            ErrorCode::TaxReturnNotAccepted => "E_TAX_RETURN_NOT_ACCEPTED_OR_PENDING",
            ErrorCode::InvalidRequest => "E_INVALID_REQUEST",
            ErrorCode::InternalError => "E_INTERNAL_SERVER_ERROR",
        }
    }

    /// Code reported to an export client; some failures must not be distinguishable from outside.
    pub fn client_facing(self) -> ErrorCode {
        match self {
            ErrorCode::CertificateNotFound | ErrorCode::TaxReturnNotFound => ErrorCode::InternalError,
            code => code,
        }
    }
}

impl Error for ErrorCode {}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        f.write_str(self.as_str())
    }
}
