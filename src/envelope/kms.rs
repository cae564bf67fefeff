#![allow(non_snake_case)]

use std::fmt::{Debug, Formatter, Result as FormatResult};

use base64::{decode as b64decode, encode as b64encode};
use chrono::Utc;
use futures::Stream;
use futures::future::{self, Future};
use hyper::{Body, Client, Method, Request, Uri};
use hyper::client::HttpConnector;
use serde::{Deserialize, Serialize};

use crate::envelope::*;
use crate::envelope::sigv4::{CONTENT_TYPE, amz_date, sign_request};

#[derive(Serialize, Debug)]
struct EncryptRequest<'a> {
    KeyId: &'a str,
    Plaintext: String,
    EncryptionContext: &'a EncryptionContext,
}

#[derive(Deserialize, Debug)]
struct EncryptResponse {
    CiphertextBlob: String,
}

#[derive(Serialize, Debug)]
struct DecryptRequest<'a> {
    KeyId: &'a str,
    CiphertextBlob: String,
    EncryptionContext: &'a EncryptionContext,
}

#[derive(Deserialize, Debug)]
struct DecryptResponse {
    Plaintext: String,
}

/// Delegates envelope encryption to a KMS-compatible service speaking the `TrentService` JSON protocol.
pub struct KmsEnvelope {
    endpoint: Uri,
    host: String,
    key_id: String,
    region: String,
    credentials: Option<SigningCredentials>,
    client: Client<HttpConnector>,
}

impl KmsEnvelope {
    pub fn new(endpoint: &str, key_id: &str, region: &str, credentials: Option<SigningCredentials>) -> Result<KmsEnvelope, EnvelopeError> {
        let endpoint: Uri = endpoint.parse()
            .map_err(|e| {
                error!("Invalid KMS endpoint {}: {}", endpoint, e);
                EnvelopeError::InvalidKey
            })?;
        let host = match endpoint.authority_part() {
            Some(authority) => authority.as_str().to_owned(),
            None => {
                error!("KMS endpoint {} has no host", endpoint);
                return Err(EnvelopeError::InvalidKey);
            },
        };
        if key_id.is_empty() {
            error!("KMS key id must be configured");
            return Err(EnvelopeError::InvalidKey);
        }
        if credentials.is_none() {
            warn!("KMS requests will not be signed");
        }
        Ok(KmsEnvelope {
            endpoint,
            host,
            key_id: key_id.to_owned(),
            region: region.to_owned(),
            credentials,
            client: Client::new(),
        })
    }

    fn build_request(&self, target: &str, body: Vec<u8>) -> Result<Request<Body>, EnvelopeError> {
        let now = Utc::now();
        let mut builder = Request::builder();
        builder
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(hyper::header::HOST, self.host.as_str())
            .header(hyper::header::CONTENT_TYPE, CONTENT_TYPE)
            .header("X-Amz-Target", target);
        match self.credentials {
            Some(ref credentials) => {
                let signed = sign_request(credentials, &self.region, &now, &self.host, target, &body);
                builder
                    .header("X-Amz-Date", signed.amz_date.as_str())
                    .header(hyper::header::AUTHORIZATION, signed.authorization.as_str());
            },
            None => {
                builder.header("X-Amz-Date", amz_date(&now).as_str());
            },
        }
        builder.body(Body::from(body))
            .map_err(|e| {
                error!("Cannot build KMS request: {}", e);
                EnvelopeError::Error
            })
    }

    fn call(&self, target: &'static str, body: Vec<u8>) -> Box<dyn Future<Item=Vec<u8>, Error=EnvelopeError> + Send> {
        let request = match self.build_request(target, body) {
            Ok(request) => request,
            Err(e) => return Box::new(future::err(e)),
        };
        Box::new(
            self.client.request(request)
                .map_err(move |e| {
                    error!("{} unavailable: {}", target, e);
                    EnvelopeError::Unavailable
                })
                .and_then(move |response| {
                    let status = response.status();
                    response.into_body().concat2()
                        .map_err(move |e| {
                            error!("{} response unreadable: {}", target, e);
                            EnvelopeError::Unavailable
                        })
                        .and_then(move |body| {
                            if status.is_success() {
                                Ok(body.to_vec())
                            } else if status.is_client_error() {
                                warn!("{} refused with {}: {}", target, status, String::from_utf8_lossy(&body));
                                Err(EnvelopeError::InvalidCipherText)
                            } else {
                                error!("{} failed with {}", target, status);
                                Err(EnvelopeError::Unavailable)
                            }
                        })
                })
        )
    }
}

fn encode_json<T>(request: &T) -> Result<Vec<u8>, EnvelopeError> where T: Serialize {
    serde_json::to_vec(request)
        .map_err(|e| {
            error!("Cannot serialise KMS request: {}", e);
            EnvelopeError::Error
        })
}

fn decode_blob(encoded: &str) -> Result<Vec<u8>, EnvelopeError> {
    b64decode(encoded)
        .map_err(|e| {
            error!("KMS returned invalid base64: {}", e);
            EnvelopeError::Unavailable
        })
}

fn parse_encrypt_response(body: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let response: EncryptResponse = serde_json::from_slice(body)
        .map_err(|e| {
            error!("Unexpected KMS encrypt response: {}", e);
            EnvelopeError::Unavailable
        })?;
    decode_blob(&response.CiphertextBlob)
}

fn parse_decrypt_response(body: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let response: DecryptResponse = serde_json::from_slice(body)
        .map_err(|e| {
            error!("Unexpected KMS decrypt response: {}", e);
            EnvelopeError::Unavailable
        })?;
    decode_blob(&response.Plaintext)
}

impl EnvelopeEncryption for KmsEnvelope {
    fn name(&self) -> &'static str {
        "KMS"
    }

    fn encrypt(&self, data: Vec<u8>, context: &EncryptionContext) -> EnvelopeFuture {
        let request = EncryptRequest { KeyId: &self.key_id, Plaintext: b64encode(&data), EncryptionContext: context };
        let body = match encode_json(&request) {
            Ok(body) => body,
            Err(e) => return Box::new(future::err(e)),
        };
        Box::new(
            self.call("TrentService.Encrypt", body)
                .and_then(|body| parse_encrypt_response(&body))
        )
    }

    fn decrypt(&self, data: Vec<u8>, context: &EncryptionContext) -> EnvelopeFuture {
        let request = DecryptRequest { KeyId: &self.key_id, CiphertextBlob: b64encode(&data), EncryptionContext: context };
        let body = match encode_json(&request) {
            Ok(body) => body,
            Err(e) => return Box::new(future::err(e)),
        };
        Box::new(
            self.call("TrentService.Decrypt", body)
                .and_then(|body| parse_decrypt_response(&body))
        )
    }
}

impl Debug for KmsEnvelope {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "KmsEnvelope({} {})", &self.endpoint, &self.key_id)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(credentials: Option<SigningCredentials>) -> KmsEnvelope {
        KmsEnvelope::new("http://127.0.0.1:1/", "alias/state-export", "eu-west-2", credentials).unwrap()
    }

    #[test]
    fn endpoint_validation() {
        assert_eq!(KmsEnvelope::new("not a uri", "alias/state-export", "eu-west-2", None).err(), Some(EnvelopeError::InvalidKey));
        assert_eq!(KmsEnvelope::new("/relative", "alias/state-export", "eu-west-2", None).err(), Some(EnvelopeError::InvalidKey));
        assert_eq!(KmsEnvelope::new("http://127.0.0.1:6767/", "", "eu-west-2", None).err(), Some(EnvelopeError::InvalidKey));
    }

    #[test]
    fn request_headers() {
        let envelope = envelope(Some(SigningCredentials::new("AAAAAAAAAAAAAAAAAAAAA", "ZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZ")));
        let request = envelope.build_request("TrentService.Encrypt", b"{}".to_vec()).unwrap();
        assert_eq!(request.method(), &Method::POST);
        assert_eq!(request.headers().get("x-amz-target").unwrap(), "TrentService.Encrypt");
        assert_eq!(request.headers().get("content-type").unwrap(), CONTENT_TYPE);
        assert_eq!(request.headers().get("host").unwrap(), "127.0.0.1:1");
        let authorization = request.headers().get("authorization").unwrap().to_str().unwrap();
        assert!(authorization.starts_with("AWS4-HMAC-SHA256 Credential=AAAAAAAAAAAAAAAAAAAAA/"));

        let request = self::envelope(None).build_request("TrentService.Encrypt", b"{}".to_vec()).unwrap();
        assert!(request.headers().get("authorization").is_none());
        assert!(request.headers().get("x-amz-date").is_some());
    }

    #[test]
    fn request_body() {
        let mut context = EncryptionContext::new();
        context.insert("type".to_owned(), "STATE-API".to_owned());
        let request = EncryptRequest { KeyId: "alias/state-export", Plaintext: b64encode(b"parts"), EncryptionContext: &context };
        let value: serde_json::Value = serde_json::from_slice(&encode_json(&request).unwrap()).unwrap();
        assert_eq!(value["KeyId"], "alias/state-export");
        assert_eq!(value["Plaintext"], "cGFydHM=");
        assert_eq!(value["EncryptionContext"]["type"], "STATE-API");
    }

    #[test]
    fn responses() {
        assert_eq!(parse_encrypt_response(br#"{"KeyId":"arn","CiphertextBlob":"cGFydHM="}"#), Ok(b"parts".to_vec()));
        assert_eq!(parse_decrypt_response(br#"{"KeyId":"arn","Plaintext":"cGFydHM="}"#), Ok(b"parts".to_vec()));
        assert_eq!(parse_encrypt_response(b"{}"), Err(EnvelopeError::Unavailable));
        assert_eq!(parse_decrypt_response(br#"{"Plaintext":"!!"}"#), Err(EnvelopeError::Unavailable));
    }

    #[test]
    fn unreachable_service() {
        let mut runtime = tokio::runtime::Runtime::new().unwrap();
        let result = runtime.block_on(envelope(None).encrypt(b"parts".to_vec(), &EncryptionContext::new()));
        assert_eq!(result, Err(EnvelopeError::Unavailable));
    }
}
