//! Signs outgoing KMS requests with an AWS Signature Version 4 `Authorization` header

use std::fmt::{Debug, Formatter, Result as FormatResult};

use chrono::{DateTime, Utc};
use ring::digest::{self, digest};
use ring::hmac;

static SIGNATURE_PREFIX: &str = "AWS4-HMAC-SHA256";
static SERVICE: &str = "kms";
static SIGNED_HEADERS: &str = "content-type;host;x-amz-date;x-amz-target";
pub static CONTENT_TYPE: &str = "application/x-amz-json-1.1";

pub struct SigningCredentials {
    access_key: String,
    secret_key: String,
}

impl SigningCredentials {
    pub fn new<K, S>(access_key: K, secret_key: S) -> SigningCredentials where K: Into<String>, S: Into<String> {
        SigningCredentials { access_key: access_key.into(), secret_key: secret_key.into() }
    }

    #[inline]
    pub fn access_key(&self) -> &str {
        &self.access_key
    }
}

impl Debug for SigningCredentials {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "SigningCredentials({})", &self.access_key)
    }
}

pub struct SignedHeaders {
    pub amz_date: String,
    pub authorization: String,
}

pub fn amz_date(date: &DateTime<Utc>) -> String {
    date.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn sign_request(credentials: &SigningCredentials, region: &str, date: &DateTime<Utc>, host: &str, target: &str, body: &[u8]) -> SignedHeaders {
    let amz_date = amz_date(date);
    let short_date = &amz_date[..8];
    let scope = format!("{}/{}/{}/aws4_request", short_date, region, SERVICE);

    let body_digest = hex::encode(digest(&digest::SHA256, body).as_ref());
    let canonical_request = format!(
        "POST\n/\n\ncontent-type:{}\nhost:{}\nx-amz-date:{}\nx-amz-target:{}\n\n{}\n{}",
        CONTENT_TYPE, host.trim(), amz_date, target.trim(), SIGNED_HEADERS, body_digest,
    );
    let canonical_digest = hex::encode(digest(&digest::SHA256, canonical_request.as_bytes()).as_ref());
    let str_to_sign = format!("{}\n{}\n{}\n{}", SIGNATURE_PREFIX, amz_date, scope, canonical_digest);

    let prefixed_secret_key = format!("AWS4{}", credentials.secret_key).into_bytes();
    let partial_signature = hmac_sign(prefixed_secret_key.as_slice(), short_date.as_bytes());
    let partial_signature = hmac_sign(partial_signature.as_ref(), region.as_bytes());
    let partial_signature = hmac_sign(partial_signature.as_ref(), SERVICE.as_bytes());
    let partial_signature = hmac_sign(partial_signature.as_ref(), b"aws4_request");
    let signature = hmac_sign(partial_signature.as_ref(), str_to_sign.as_bytes());

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        SIGNATURE_PREFIX, credentials.access_key, scope, SIGNED_HEADERS, hex::encode(signature.as_ref()),
    );
    SignedHeaders { amz_date, authorization }
}

fn hmac_sign(key_bytes: &[u8], data: &[u8]) -> hmac::Signature {
    let key = hmac::SigningKey::new(&digest::SHA256, key_bytes);
    hmac::sign(&key, data)
}
