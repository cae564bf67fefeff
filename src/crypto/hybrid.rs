use std::convert::TryInto;

use base64::{decode as b64decode, encode as b64encode};
use openssl::pkey::{HasPrivate, HasPublic, PKeyRef};

use crate::crypto::aead::*;
use crate::crypto::random::RandomSource;
use crate::crypto::rsa::{rsa_oaep_decrypt, rsa_oaep_encrypt};

define_error!(HybridEncryptError; Random="cannot generate session key material", Encryption="cannot encrypt payload", KeyWrap="cannot wrap session key");
define_error!(HybridDecryptError; Encoding="invalid base64 field", KeyUnwrap="cannot unwrap session key", AuthenticationFailed="payload authentication failed");

/// Transport form of one export: every field is standard base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HybridEncryptionResult {
    pub cipher_text: String,
    pub authentication_tag: String,
    pub encoded_encrypted_symmetric_key: String,
    pub encoded_iv: String,
}

/// Encrypts `payload` under a fresh AES-256-GCM key and nonce, then wraps that key for the state.
///
/// Key and nonce are drawn from `random` on every call, so retrying always produces new material.
pub fn hybrid_encrypt<T>(payload: &[u8], public_key: &PKeyRef<T>, random: &dyn RandomSource) -> Result<HybridEncryptionResult, HybridEncryptError> where T: HasPublic {
    let symmetric_key = generate_symmetric_key(random)
        .or(Err(HybridEncryptError::Random))?;
    let nonce = generate_nonce(random)
        .or(Err(HybridEncryptError::Random))?;
    let (cipher_text, tag) = aes_gcm_encrypt(payload, &symmetric_key, &nonce)
        .or(Err(HybridEncryptError::Encryption))?;
    let wrapped_key = rsa_oaep_encrypt(&symmetric_key, public_key)
        .or(Err(HybridEncryptError::KeyWrap))?;
    Ok(HybridEncryptionResult {
        cipher_text: b64encode(&cipher_text),
        authentication_tag: b64encode(&tag),
        encoded_encrypted_symmetric_key: b64encode(&wrapped_key),
        encoded_iv: b64encode(&nonce),
    })
}

/// Receiving-side counterpart of `hybrid_encrypt`.
pub fn hybrid_decrypt<T>(result: &HybridEncryptionResult, private_key: &PKeyRef<T>) -> Result<Vec<u8>, HybridDecryptError> where T: HasPrivate + HasPublic {
    let cipher_text = b64decode(&result.cipher_text)
        .or(Err(HybridDecryptError::Encoding))?;
    let tag = b64decode(&result.authentication_tag)
        .or(Err(HybridDecryptError::Encoding))?;
    let wrapped_key = b64decode(&result.encoded_encrypted_symmetric_key)
        .or(Err(HybridDecryptError::Encoding))?;
    let nonce = b64decode(&result.encoded_iv)
        .or(Err(HybridDecryptError::Encoding))?;
    let nonce: NonceBytes = nonce.as_slice().try_into()
        .or(Err(HybridDecryptError::Encoding))?;
    let symmetric_key = rsa_oaep_decrypt(&wrapped_key, private_key)
        .or(Err(HybridDecryptError::KeyUnwrap))?;
    let symmetric_key: SymmetricKey = symmetric_key.as_slice().try_into()
        .or(Err(HybridDecryptError::KeyUnwrap))?;
    aes_gcm_decrypt(&cipher_text, &symmetric_key, &nonce, &tag)
        .or(Err(HybridDecryptError::AuthenticationFailed))
}
