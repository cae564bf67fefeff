//! Fixtures shared by unit tests

use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::{X509, X509NameBuilder};
use serde_json::{json, Value};

use crate::claims::AuthorizationClaims;
use crate::misc::b64url_encode;

pub fn scenario_claims() -> AuthorizationClaims {
    AuthorizationClaims {
        tax_return_id: "11111111-1111-1111-1111-111111111111".parse().unwrap(),
        taxpayer_identifier: "123004567".to_owned(),
        tax_year: 2023,
        state_code: "MA".to_owned(),
        submission_id: "123456789AB".to_owned(),
    }
}

pub fn key_pair() -> (PKey<Private>, PKey<Public>) {
    let private_key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let public_key = PKey::public_key_from_pem(&private_key.public_key_to_pem().unwrap()).unwrap();
    (private_key, public_key)
}

/// Self-signed PEM certificate for `private_key` valid between the given instants.
pub fn certificate_pem(private_key: &PKey<Private>, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Vec<u8> {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "state-export test").unwrap();
    let name = name.build();
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(private_key).unwrap();
    builder.set_not_before(&Asn1Time::from_unix(not_before.timestamp()).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::from_unix(not_after.timestamp()).unwrap()).unwrap();
    builder.sign(private_key, MessageDigest::sha256()).unwrap();
    builder.build().to_pem().unwrap()
}

/// Compact RS256 structure as a state would present it.
pub fn sign_rs256(private_key: &PKey<Private>, header: &Value, payload: &Value) -> String {
    let signing_input = format!(
        "{}.{}",
        b64url_encode(serde_json::to_vec(header).unwrap()),
        b64url_encode(serde_json::to_vec(payload).unwrap()),
    );
    let mut signer = Signer::new(MessageDigest::sha256(), private_key).unwrap();
    signer.update(signing_input.as_bytes()).unwrap();
    let signature = signer.sign_to_vec().unwrap();
    format!("{}.{}", signing_input, b64url_encode(signature))
}

pub fn state_bearer(private_key: &PKey<Private>, account_id: &str, subject: &str) -> String {
    let token = sign_rs256(private_key, &json!({"alg": "RS256", "typ": "JWT"}), &json!({"iss": account_id, "sub": subject}));
    format!("Bearer {}", token)
}
