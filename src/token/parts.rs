use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::misc::{b64url_decode, b64url_encode};

define_error!(PartsError; Malformed="malformed signed structure", Serialisation="cannot serialise signed structure");

/// The three compact-serialisation segments of a signed structure, kept apart so they survive
/// envelope encryption as a byte buffer and rejoin losslessly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignedTokenParts {
    pub s1: String,
    pub s2: String,
    pub s3: String,
}

impl SignedTokenParts {
    pub fn new<H, P>(header: &H, payload: &P, sign: impl FnOnce(&[u8]) -> Vec<u8>) -> Result<SignedTokenParts, PartsError> where H: Serialize, P: Serialize {
        let s1 = encode_segment(header)?;
        let s2 = encode_segment(payload)?;
        let signature = sign(format!("{}.{}", s1, s2).as_bytes());
        Ok(SignedTokenParts { s1, s2, s3: b64url_encode(signature) })
    }

    pub fn split(compact: &str) -> Result<SignedTokenParts, PartsError> {
        let mut segments = compact.split('.');
        match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(s1), Some(s2), Some(s3), None) if !s1.is_empty() && !s2.is_empty() && !s3.is_empty() => {
                Ok(SignedTokenParts { s1: s1.to_owned(), s2: s2.to_owned(), s3: s3.to_owned() })
            },
            _ => Err(PartsError::Malformed),
        }
    }

    pub fn join(&self) -> String {
        format!("{}.{}.{}", self.s1, self.s2, self.s3)
    }

    /// Bytes covered by the signature: `header.payload`.
    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.s1, self.s2)
    }

    pub fn signature(&self) -> Result<Vec<u8>, PartsError> {
        b64url_decode(&self.s3).or(Err(PartsError::Malformed))
    }

    pub fn header<T>(&self) -> Result<T, PartsError> where T: DeserializeOwned {
        decode_segment(&self.s1)
    }

    pub fn payload<T>(&self) -> Result<T, PartsError> where T: DeserializeOwned {
        decode_segment(&self.s2)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PartsError> {
        serde_json::to_vec(self).or(Err(PartsError::Serialisation))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<SignedTokenParts, PartsError> {
        let parts: SignedTokenParts = serde_json::from_slice(bytes).or(Err(PartsError::Malformed))?;
        // rejoining must give back a three-segment structure
        SignedTokenParts::split(&parts.join())
    }
}

fn encode_segment<T>(value: &T) -> Result<String, PartsError> where T: Serialize {
    let json = serde_json::to_vec(value).or(Err(PartsError::Serialisation))?;
    Ok(b64url_encode(json))
}

fn decode_segment<T>(segment: &str) -> Result<T, PartsError> where T: DeserializeOwned {
    let json = b64url_decode(segment).or(Err(PartsError::Malformed))?;
    serde_json::from_slice(&json).or(Err(PartsError::Malformed))
}
