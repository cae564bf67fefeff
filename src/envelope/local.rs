use std::convert::TryInto;
use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::sync::Arc;

use base64::decode as b64decode;
use futures::future;

use crate::crypto::*;
use crate::envelope::*;

/*
envelope cipher text shape:
[ encrypted data: [u8;?] | tag: [u8;16] | nonce: [u8;12] ]
*/

pub const MIN_ENVELOPE_LEN: usize = TAG_LEN + NONCE_LEN;

/// In-process wrapping key; intended for local development and tests only.
pub struct LocalEnvelope {
    key: SymmetricKey,
    random: Arc<dyn RandomSource>,
}

impl LocalEnvelope {
    pub fn new(key: SymmetricKey, random: Arc<dyn RandomSource>) -> LocalEnvelope {
        warn!("Using local envelope encryption without KMS, not appropriate for deployed environments");
        LocalEnvelope { key, random }
    }

    pub fn from_base64(encoded_key: &str, random: Arc<dyn RandomSource>) -> Result<LocalEnvelope, EnvelopeError> {
        let key = b64decode(encoded_key.trim())
            .map_err(|e| {
                error!("Local wrapping key is not valid base64: {}", e);
                EnvelopeError::InvalidKey
            })?;
        let key: SymmetricKey = key.as_slice().try_into()
            .map_err(|_| {
                error!("Local wrapping key must be {} bytes, found {}", KEY_LEN, key.len());
                EnvelopeError::InvalidKey
            })?;
        Ok(LocalEnvelope::new(key, random))
    }

    pub fn seal(&self, data: &[u8], context: &EncryptionContext) -> Result<Vec<u8>, EnvelopeError> {
        let nonce = generate_nonce(self.random.as_ref())
            .map_err(|e| {
                error!("Cannot generate nonce: {}", e);
                EnvelopeError::Error
            })?;
        let aad = aad_from_context(context);
        let (mut sealed, tag) = aes_gcm_seal(data, &self.key, &nonce, &aad)
            .map_err(|e| {
                error!("Local envelope encryption error: {}", e);
                EnvelopeError::Error
            })?;
        sealed.reserve(TAG_LEN + NONCE_LEN);
        sealed.extend_from_slice(&tag);
        sealed.extend_from_slice(&nonce);
        Ok(sealed)
    }

    pub fn open(&self, data: &[u8], context: &EncryptionContext) -> Result<Vec<u8>, EnvelopeError> {
        let len = data.len();
        if len < MIN_ENVELOPE_LEN {
            return Err(EnvelopeError::InvalidCipherText);
        }
        let nonce_offset = len - NONCE_LEN;
        let tag_offset = nonce_offset - TAG_LEN;
        let nonce: NonceBytes = data[nonce_offset..].try_into()
            .or(Err(EnvelopeError::InvalidCipherText))?;
        let aad = aad_from_context(context);
        aes_gcm_open(&data[..tag_offset], &self.key, &nonce, &data[tag_offset..nonce_offset], &aad)
            .or(Err(EnvelopeError::InvalidCipherText))
    }
}

impl EnvelopeEncryption for LocalEnvelope {
    fn name(&self) -> &'static str {
        "local"
    }

    fn encrypt(&self, data: Vec<u8>, context: &EncryptionContext) -> EnvelopeFuture {
        Box::new(future::result(self.seal(&data, context)))
    }

    fn decrypt(&self, data: Vec<u8>, context: &EncryptionContext) -> EnvelopeFuture {
        Box::new(future::result(self.open(&data, context)))
    }
}

impl Debug for LocalEnvelope {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "LocalEnvelope")
    }
}
