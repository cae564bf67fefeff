use ring::aead::{SealingKey, seal_in_place, OpeningKey, open_in_place, AES_256_GCM, Nonce, Aad};

use crate::crypto::random::{RandomError, RandomSource};

// length of key material for AES_256_GCM
pub const KEY_LEN: usize = 32;  // AES_256_GCM.key_len()
// length of AES_256_GCM nonce
pub const NONCE_LEN: usize = 12;  // AES_256_GCM.nonce_len()
// length of AES_256_GCM authentication tag
pub const TAG_LEN: usize = 16;  // AES_256_GCM.tag_len()

pub type SymmetricKey = [u8; KEY_LEN];
pub type NonceBytes = [u8; NONCE_LEN];
pub type Tag = [u8; TAG_LEN];

define_error!(AeadError; InvalidKey="invalid key", AuthenticationFailed="authentication failed", Error="cannot encrypt");

pub fn generate_symmetric_key(random: &dyn RandomSource) -> Result<SymmetricKey, RandomError> {
    let mut key = [0u8; KEY_LEN];
    random.fill(&mut key)?;
    Ok(key)
}

pub fn generate_nonce(random: &dyn RandomSource) -> Result<NonceBytes, RandomError> {
    let mut nonce = [0u8; NONCE_LEN];
    random.fill(&mut nonce)?;
    Ok(nonce)
}

/// AES-256-GCM without additional data, returning cipher text and detached tag.
pub fn aes_gcm_encrypt(plain_text: &[u8], key: &SymmetricKey, nonce: &NonceBytes) -> Result<(Vec<u8>, Tag), AeadError> {
    aes_gcm_seal(plain_text, key, nonce, &[])
}

pub fn aes_gcm_decrypt(cipher_text: &[u8], key: &SymmetricKey, nonce: &NonceBytes, tag: &[u8]) -> Result<Vec<u8>, AeadError> {
    aes_gcm_open(cipher_text, key, nonce, tag, &[])
}

pub fn aes_gcm_seal(plain_text: &[u8], key: &SymmetricKey, nonce: &NonceBytes, aad: &[u8]) -> Result<(Vec<u8>, Tag), AeadError> {
    static TAG_SPACE: [u8; TAG_LEN] = [0u8; TAG_LEN];
    let sealing_key = SealingKey::new(&AES_256_GCM, key)
        .or(Err(AeadError::InvalidKey))?;
    let mut data = Vec::with_capacity(plain_text.len() + TAG_LEN);
    data.extend_from_slice(plain_text);
    data.extend_from_slice(&TAG_SPACE);
    let len = seal_in_place(&sealing_key, Nonce::assume_unique_for_key(*nonce), Aad::from(aad), &mut data, TAG_LEN)
        .or(Err(AeadError::Error))?;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&data[len - TAG_LEN..len]);
    data.truncate(len - TAG_LEN);
    Ok((data, tag))
}

pub fn aes_gcm_open(cipher_text: &[u8], key: &SymmetricKey, nonce: &NonceBytes, tag: &[u8], aad: &[u8]) -> Result<Vec<u8>, AeadError> {
    // NB: tag is checked before any plain text is released
    if tag.len() != TAG_LEN {
        return Err(AeadError::AuthenticationFailed);
    }
    let opening_key = OpeningKey::new(&AES_256_GCM, key)
        .or(Err(AeadError::InvalidKey))?;
    let mut data = Vec::with_capacity(cipher_text.len() + TAG_LEN);
    data.extend_from_slice(cipher_text);
    data.extend_from_slice(tag);
    let plain_text_len = match open_in_place(&opening_key, Nonce::assume_unique_for_key(*nonce), Aad::from(aad), 0, &mut data) {
        Ok(plain_text) => plain_text.len(),
        Err(_) => return Err(AeadError::AuthenticationFailed),
    };
    data.truncate(plain_text_len);
    Ok(data)
}
