use std::sync::Arc;

use futures::future::{self, Future, FutureResult};
use hyper::{Body, Method, Request, StatusCode};
use hyper::service::{NewService, Service};
use serde_json::json;

use state_export::authorization::AuthorizationCodeService;
use state_export::claims::AuthorizationClaims;
use state_export::error::ErrorCode;
use state_export::export::ExportOrchestrator;
use state_export::requests::{ApiRequest, ApiResponse, FutureResponse, ServerError};

static AUTHORIZATION_CODE_PATH: &str = "/authorization-code";
static EXPORT_RETURN_PATH: &str = "/export-return";

enum Route {
    CreateAuthorizationCode,
    ExportReturn,
    MethodNotAllowed,
    NotFound,
}

fn route(method: &Method, path: &str) -> Route {
    match (method, path) {
        (&Method::POST, path) if path == AUTHORIZATION_CODE_PATH => Route::CreateAuthorizationCode,
        (&Method::GET, path) if path == EXPORT_RETURN_PATH => Route::ExportReturn,
        (_, path) if path == AUTHORIZATION_CODE_PATH || path == EXPORT_RETURN_PATH => Route::MethodNotAllowed,
        _ => Route::NotFound,
    }
}

pub struct ExportNewService {
    authorization: Arc<AuthorizationCodeService>,
    export: Arc<ExportOrchestrator>,
}

impl ExportNewService {
    pub fn new(authorization: Arc<AuthorizationCodeService>, export: Arc<ExportOrchestrator>) -> ExportNewService {
        ExportNewService { authorization, export }
    }
}

impl NewService for ExportNewService {
    type ReqBody = Body;
    type ResBody = Body;
    type Error = ServerError;
    type Service = ExportService;
    type Future = FutureResult<ExportService, ServerError>;
    type InitError = ServerError;

    fn new_service(&self) -> Self::Future {
        let service = ExportService::new(
            Arc::clone(&self.authorization),
            Arc::clone(&self.export),
        );
        future::ok(service)
    }
}

pub struct ExportService {
    authorization: Arc<AuthorizationCodeService>,
    export: Arc<ExportOrchestrator>,
}

impl ExportService {
    pub fn new(authorization: Arc<AuthorizationCodeService>, export: Arc<ExportOrchestrator>) -> ExportService {
        ExportService { authorization, export }
    }

    fn create_authorization_code(&self, request: ApiRequest, response: ApiResponse) -> FutureResponse {
        let authorization = Arc::clone(&self.authorization);
        Box::new(
            request.body_loaded()
                .and_then(move |body| -> FutureResponse {
                    let claims: AuthorizationClaims = match serde_json::from_slice(&body) {
                        Ok(claims) => claims,
                        Err(e) => {
                            warn!("Cannot parse authorization code request: {}", e);
                            return Box::new(response.send_error(StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest));
                        },
                    };
                    Box::new(
                        authorization.create(claims)
                            .then(move |result| match result {
                                Ok(id) => response.send(StatusCode::CREATED, &json!({"authorizationCode": id.to_string()})),
                                Err(ErrorCode::InvalidRequest) => response.send_error(StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest),
                                Err(code) => response.send_error(StatusCode::INTERNAL_SERVER_ERROR, code),
                            })
                    )
                })
        )
    }

    fn export_return(&self, request: ApiRequest, response: ApiResponse) -> FutureResponse {
        Box::new(
            self.export.export::<ServerError>(request.authorization())
                .and_then(move |result| response.send_export(result))
        )
    }
}

impl Service for ExportService {
    type ReqBody = Body;
    type ResBody = Body;
    type Error = ServerError;
    type Future = FutureResponse;

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let request = ApiRequest::new(request);
        let uuid = *request.uuid();
        match route(request.method(), request.uri().path()) {
            Route::CreateAuthorizationCode => {
                let response = ApiResponse::new(uuid, "CreateAuthorizationCode");
                self.create_authorization_code(request, response)
            },
            Route::ExportReturn => {
                let response = ApiResponse::new(uuid, "ExportReturn");
                self.export_return(request, response)
            },
            Route::MethodNotAllowed => Box::new(
                ApiResponse::new(uuid, "Unknown").send_message(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
            ),
            Route::NotFound => Box::new(
                ApiResponse::new(uuid, "Unknown").send_message(StatusCode::NOT_FOUND, "Not found")
            ),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use futures::Stream;
    use hyper::Response;
    use openssl::hash::MessageDigest;
    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::sign::Signer;
    use serde_json::Value;

    use state_export::credentials::{CredentialCache, StateCredential, StaticCredentialSource};
    use state_export::crypto::{HybridEncryptionResult, RandomSource, SeededRandomSource, hybrid_decrypt};
    use state_export::envelope::LocalEnvelope;
    use state_export::export::ExportSettings;
    use state_export::identity::StateIdentityVerifier;
    use state_export::misc::b64url_encode;
    use state_export::records::{
        AuthorizationCodeStore, MemoryAuthorizationCodeStore, MemoryExportedFacts, MemoryTaxReturns, SubmissionStatus,
        TaxReturnRecord, TaxReturnSource,
    };
    use state_export::sanitizer::Sanitizer;
    use state_export::token::TokenIssuer;

    static CLAIMS: &str = r#"{
        "taxReturnId": "11111111-1111-1111-1111-111111111111",
        "taxpayerIdentifier": "123004567",
        "taxYear": 2023,
        "stateCode": "MA",
        "submissionId": "123456789AB"
    }"#;

    fn service() -> (ExportService, PKey<Private>) {
        let private_key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let credential = StateCredential::new("MA", "ma-account", &private_key.public_key_to_pem().unwrap());
        let credentials = CredentialCache::new(Box::new(StaticCredentialSource::new(vec![credential])), Duration::hours(2)).unwrap();
        let credentials = Arc::new(credentials);

        let random: Arc<dyn RandomSource> = Arc::new(SeededRandomSource::new(17));
        let envelope = Arc::new(LocalEnvelope::new(*b"12345678901234567890123456789012", Arc::clone(&random)));
        let issuer = Arc::new(TokenIssuer::new(b"GTc+SlI7C7ECPHAhAvIWqn2yAvzAGMVj", envelope, Duration::seconds(60), "DIRECT-FILE").unwrap());

        let tax_returns = MemoryTaxReturns::new();
        tax_returns.insert(TaxReturnRecord {
            tax_return_id: "11111111-1111-1111-1111-111111111111".parse().unwrap(),
            tax_year: 2023,
            submission_id: "123456789AB".to_owned(),
            status: SubmissionStatus::Accepted,
            xml: "<Return><SSN>123004567</SSN></Return>".to_owned(),
        });
        let tax_returns: Arc<dyn TaxReturnSource> = Arc::new(tax_returns);
        let codes: Arc<dyn AuthorizationCodeStore> = Arc::new(MemoryAuthorizationCodeStore::new());

        let authorization = AuthorizationCodeService::new(
            Arc::clone(&issuer),
            Arc::clone(&codes),
            Arc::clone(&tax_returns),
            Arc::clone(&credentials),
        );
        let export = ExportOrchestrator::new(
            ExportSettings::default(),
            Arc::new(StateIdentityVerifier::new(credentials)),
            issuer,
            codes,
            tax_returns,
            Arc::new(MemoryExportedFacts::new()),
            Arc::new(Sanitizer::new(vec!["SSN"]).unwrap()),
            random,
        );
        (ExportService::new(Arc::new(authorization), Arc::new(export)), private_key)
    }

    fn bearer(private_key: &PKey<Private>, subject: &str) -> String {
        let header = b64url_encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = b64url_encode(json!({"iss": "ma-account", "sub": subject, "exp": (Utc::now() + Duration::minutes(5)).timestamp()}).to_string());
        let signing_input = format!("{}.{}", header, payload);
        let mut signer = Signer::new(MessageDigest::sha256(), private_key).unwrap();
        signer.update(signing_input.as_bytes()).unwrap();
        format!("Bearer {}.{}", signing_input, b64url_encode(signer.sign_to_vec().unwrap()))
    }

    fn call(service: &mut ExportService, request: Request<Body>) -> (Response<Body>, Value) {
        let response = service.call(request).wait().unwrap();
        let (parts, body) = response.into_parts();
        let body = body.concat2().wait().unwrap();
        let body = serde_json::from_slice(&body).unwrap();
        (Response::from_parts(parts, Body::empty()), body)
    }

    fn header(response: &Response<Body>, name: &str) -> String {
        response.headers()[name].to_str().unwrap().to_owned()
    }

    #[test]
    fn authorize_then_export() {
        let (mut service, private_key) = service();

        let request = Request::post(AUTHORIZATION_CODE_PATH).body(Body::from(CLAIMS)).unwrap();
        let (response, body) = call(&mut service, request);
        assert_eq!(response.status(), StatusCode::CREATED);
        let authorization_code = body["authorizationCode"].as_str().unwrap().to_owned();

        let request = Request::get(EXPORT_RETURN_PATH)
            .header("Authorization", bearer(&private_key, &authorization_code))
            .body(Body::empty()).unwrap();
        let (response, body) = call(&mut service, request);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body["status"], "success");

        let result = HybridEncryptionResult {
            cipher_text: body["taxReturn"].as_str().unwrap().to_owned(),
            authentication_tag: header(&response, "AUTHENTICATION-TAG"),
            encoded_encrypted_symmetric_key: header(&response, "SESSION-KEY"),
            encoded_iv: header(&response, "INITIALIZATION-VECTOR"),
        };
        let payload: Value = serde_json::from_slice(&hybrid_decrypt(&result, &private_key).unwrap()).unwrap();
        assert_eq!(payload["status"], "accepted");
        assert_eq!(payload["xml"], "<Return></Return>");
    }

    #[test]
    fn export_errors_are_ok() {
        let (mut service, _) = service();
        let request = Request::get(EXPORT_RETURN_PATH).body(Body::empty()).unwrap();
        let (response, body) = call(&mut service, request);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body, json!({"status": "error", "error": "E_BEARER_TOKEN_MISSING"}));
    }

    #[test]
    fn authorization_code_errors() {
        let (mut service, _) = service();

        let request = Request::post(AUTHORIZATION_CODE_PATH).body(Body::from("{")).unwrap();
        let (response, body) = call(&mut service, request);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"errorCode": "E_INVALID_REQUEST"}));

        let request = Request::post(AUTHORIZATION_CODE_PATH).body(Body::from(CLAIMS.replace("2023", "2022"))).unwrap();
        let (response, body) = call(&mut service, request);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"errorCode": "E_TAX_RETURN_NOT_FOUND"}));
    }

    #[test]
    fn routing() {
        let (mut service, _) = service();
        let (response, _) = call(&mut service, Request::get("/").body(Body::empty()).unwrap());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let (response, _) = call(&mut service, Request::get(AUTHORIZATION_CODE_PATH).body(Body::empty()).unwrap());
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let (response, _) = call(&mut service, Request::post(EXPORT_RETURN_PATH).body(Body::empty()).unwrap());
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
