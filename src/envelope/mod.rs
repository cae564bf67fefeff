//! Envelope encryption used to seal authorization codes.
//!
//! A backend is chosen once at start-up: `LocalEnvelope` keeps a symmetric wrapping key in
//! process, `KmsEnvelope` delegates to a KMS-compatible service.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::Future;

mod local;
mod kms;
mod sigv4;

pub use local::LocalEnvelope;
pub use kms::KmsEnvelope;
pub use sigv4::SigningCredentials;

use crate::config::EncryptionProfile;
use crate::crypto::RandomSource;

pub type EncryptionContext = HashMap<String, String>;

define_error!(EnvelopeError; Unavailable="encryption backend unavailable", InvalidCipherText="invalid envelope cipher text", InvalidKey="invalid wrapping key", Error="envelope encryption failed");

pub type EnvelopeFuture = Box<dyn Future<Item=Vec<u8>, Error=EnvelopeError> + Send>;

pub trait EnvelopeEncryption: Send + Sync {
    fn name(&self) -> &'static str;

    fn encrypt(&self, data: Vec<u8>, context: &EncryptionContext) -> EnvelopeFuture;

    fn decrypt(&self, data: Vec<u8>, context: &EncryptionContext) -> EnvelopeFuture;
}

pub fn backend_for(profile: &EncryptionProfile, random: Arc<dyn RandomSource>) -> Result<Arc<dyn EnvelopeEncryption>, EnvelopeError> {
    let backend: Arc<dyn EnvelopeEncryption> = match profile {
        EncryptionProfile::Local { wrapping_key } => Arc::new(LocalEnvelope::from_base64(wrapping_key, random)?),
        EncryptionProfile::Kms { endpoint, key_id, region, access_key, secret_key } => {
            let credentials = match (access_key, secret_key) {
                (Some(access_key), Some(secret_key)) => Some(SigningCredentials::new(access_key.as_str(), secret_key.as_str())),
                (None, None) => None,
                _ => {
                    error!("KMS access and secret keys must be configured together");
                    return Err(EnvelopeError::InvalidKey);
                },
            };
            Arc::new(KmsEnvelope::new(endpoint, key_id.as_str(), region.as_str(), credentials)?)
        },
    };
    info!("Using {} envelope encryption", backend.name());
    Ok(backend)
}

/// Serialises the context into AEAD additional data, independent of map ordering.
pub fn aad_from_context(context: &EncryptionContext) -> Vec<u8> {
    if context.is_empty() {
        return Vec::new();
    }
    let mut capacity: usize = 0;
    let mut context: Vec<(&[u8], &[u8])> = context.iter()
        .map(|(k, v)| {
            let k = k.as_bytes();
            let v = v.as_bytes();
            capacity += 2 + k.len() + v.len();
            (k, v)
        })
        .collect();
    context.sort_by(|&(k1, _), &(k2, _)| k1.cmp(&k2));
    context.iter()
        .fold(Vec::with_capacity(capacity), |mut context, &(k, v)| {
            context.push(b'\x01');
            context.extend_from_slice(k);
            context.push(b'\x02');
            context.extend_from_slice(v);
            context
        })
}
