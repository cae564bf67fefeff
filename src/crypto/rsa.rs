use openssl::encrypt::{Decrypter, Encrypter};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{HasPrivate, HasPublic, Id, PKeyRef};
use openssl::rsa::Padding;

pub const MIN_MODULUS_BITS: u32 = 2048;

define_error!(KeyWrapError; InvalidKey="RSA key of at least 2048 bits required", Error="key wrapping failed");

fn check_key<T>(key: &PKeyRef<T>) -> Result<(), KeyWrapError> where T: HasPublic {
    if key.id() != Id::RSA || key.bits() < MIN_MODULUS_BITS {
        error!("Unsuitable key for wrapping: {:?} with {} bits", key.id(), key.bits());
        return Err(KeyWrapError::InvalidKey);
    }
    Ok(())
}

fn wrap_error(e: ErrorStack) -> KeyWrapError {
    error!("Key wrapping error: {}", e);
    KeyWrapError::Error
}

/// Wraps a symmetric key with RSA-OAEP using SHA-256 for both digest and MGF1.
pub fn rsa_oaep_encrypt<T>(symmetric_key: &[u8], public_key: &PKeyRef<T>) -> Result<Vec<u8>, KeyWrapError> where T: HasPublic {
    check_key(public_key)?;
    let mut encrypter = Encrypter::new(public_key).map_err(wrap_error)?;
    encrypter.set_rsa_padding(Padding::PKCS1_OAEP).map_err(wrap_error)?;
    encrypter.set_rsa_oaep_md(MessageDigest::sha256()).map_err(wrap_error)?;
    encrypter.set_rsa_mgf1_md(MessageDigest::sha256()).map_err(wrap_error)?;
    let len = encrypter.encrypt_len(symmetric_key).map_err(wrap_error)?;
    let mut wrapped_key = vec![0u8; len];
    let len = encrypter.encrypt(symmetric_key, &mut wrapped_key).map_err(wrap_error)?;
    wrapped_key.truncate(len);
    Ok(wrapped_key)
}

/// Unwraps a key produced by `rsa_oaep_encrypt`; only the receiving state holds the private half.
pub fn rsa_oaep_decrypt<T>(wrapped_key: &[u8], private_key: &PKeyRef<T>) -> Result<Vec<u8>, KeyWrapError> where T: HasPrivate + HasPublic {
    check_key(private_key)?;
    let mut decrypter = Decrypter::new(private_key).map_err(wrap_error)?;
    decrypter.set_rsa_padding(Padding::PKCS1_OAEP).map_err(wrap_error)?;
    decrypter.set_rsa_oaep_md(MessageDigest::sha256()).map_err(wrap_error)?;
    decrypter.set_rsa_mgf1_md(MessageDigest::sha256()).map_err(wrap_error)?;
    let len = decrypter.decrypt_len(wrapped_key).map_err(wrap_error)?;
    let mut symmetric_key = vec![0u8; len];
    let len = decrypter.decrypt(wrapped_key, &mut symmetric_key).map_err(wrap_error)?;
    symmetric_key.truncate(len);
    Ok(symmetric_key)
}
