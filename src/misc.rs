use chrono::{DateTime, TimeZone, Utc};

#[inline]
pub fn timestamp_to_datetime(timestamp: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(timestamp, 0).single()
}

#[inline]
pub fn b64url_encode<T>(data: T) -> String where T: AsRef<[u8]> {
    base64::encode_config(data.as_ref(), base64::URL_SAFE_NO_PAD)
}

#[inline]
pub fn b64url_decode<T>(data: T) -> Result<Vec<u8>, base64::DecodeError> where T: AsRef<[u8]> {
    base64::decode_config(data.as_ref(), base64::URL_SAFE_NO_PAD)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_safe_round_trip() {
        let data = b"\xfb\xff\xfe state export";
        let encoded = b64url_encode(data);
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.ends_with('='));
        assert_eq!(b64url_decode(&encoded).unwrap(), data.to_vec());
    }

    #[test]
    fn timestamps() {
        let datetime = timestamp_to_datetime(1_700_000_000).unwrap();
        assert_eq!(datetime.timestamp(), 1_700_000_000);
        assert!(timestamp_to_datetime(i64::max_value()).is_none());
    }
}
