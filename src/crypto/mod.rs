mod random;
mod aead;
mod rsa;
mod hybrid;

pub use random::{RandomError, RandomSource, SystemRandomSource, SeededRandomSource};
pub use aead::{
    AeadError, SymmetricKey, NonceBytes, Tag, KEY_LEN, NONCE_LEN, TAG_LEN,
    generate_symmetric_key, generate_nonce, aes_gcm_encrypt, aes_gcm_decrypt, aes_gcm_seal, aes_gcm_open,
};
pub use rsa::{KeyWrapError, MIN_MODULUS_BITS, rsa_oaep_encrypt, rsa_oaep_decrypt};
pub use hybrid::{HybridEncryptionResult, HybridEncryptError, HybridDecryptError, hybrid_encrypt, hybrid_decrypt};
