use futures::future::{self, Future, FutureResult};
use http::response::Builder;
use hyper::{Response, StatusCode, Body};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::export::ExportResult;
use crate::requests::ServerError;

pub type FutureResponse = Box<dyn Future<Item=Response<Body>, Error=ServerError> + Send>;

pub static SESSION_KEY: &str = "SESSION-KEY";
pub static INITIALIZATION_VECTOR: &str = "INITIALIZATION-VECTOR";
pub static AUTHENTICATION_TAG: &str = "AUTHENTICATION-TAG";

pub struct ApiResponse {
    uuid: Uuid,
    action: &'static str,
    builder: Builder,
}

impl ApiResponse {
    pub fn new(uuid: Uuid, action: &'static str) -> ApiResponse {
        let mut builder = Response::builder();
        builder
            .header(hyper::header::SERVER, format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .header("X-Request-Id", uuid.to_string());
        ApiResponse { uuid, action, builder }
    }

    fn respond(mut self, status: StatusCode, body: Vec<u8>) -> FutureResult<Response<Body>, ServerError> {
        let response = match self.builder.status(status).body(Body::from(body)) {
            Ok(response) => response,
            Err(e) => {
                error!("Cannot build response: {} [{}]", e, self.uuid);
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            },
        };
        info!("{} => {} [{}]", self.action, response.status(), self.uuid);
        future::ok(response)
    }

    pub fn send<T>(self, status: StatusCode, body: &T) -> FutureResult<Response<Body>, ServerError> where T: Serialize {
        match serde_json::to_vec(body) {
            Ok(body) => self.respond(status, body),
            Err(e) => {
                error!("Cannot serialise response, {} [{}]", ServerError::from(e), self.uuid);
                self.send_error(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError)
            },
        }
    }

    pub fn send_error(self, status: StatusCode, code: ErrorCode) -> FutureResult<Response<Body>, ServerError> {
        let body = format!(r#"{{"errorCode": "{}"}}"#, code);
        self.respond(status, body.into_bytes())
    }

    pub fn send_message(self, status: StatusCode, message: &str) -> FutureResult<Response<Body>, ServerError> {
        let body = json!({"message": message}).to_string();
        self.respond(status, body.into_bytes())
    }

    /// Export outcomes are always `200 OK`; key material travels in headers next to the body.
    pub fn send_export(mut self, result: ExportResult) -> FutureResult<Response<Body>, ServerError> {
        let body = match result {
            ExportResult::Success(result) => {
                self.builder
                    .header(SESSION_KEY, result.encoded_encrypted_symmetric_key.as_str())
                    .header(INITIALIZATION_VECTOR, result.encoded_iv.as_str())
                    .header(AUTHENTICATION_TAG, result.authentication_tag.as_str());
                json!({"status": "success", "taxReturn": result.cipher_text})
            },
            ExportResult::Error(code) => json!({"status": "error", "error": code.as_str()}),
        };
        self.respond(StatusCode::OK, body.to_string().into_bytes())
    }
}
