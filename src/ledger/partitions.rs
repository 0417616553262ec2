/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `entries`: entry:{fingerprint} -> LifecycleEntry (JSON)
/// - `metadata`: meta:{key} -> value (string)

/// Encode an entry key: entry:{fingerprint}
pub fn encode_entry_key(fingerprint: &str) -> Vec<u8> {
    format!("entry:{}", fingerprint).into_bytes()
}

/// Decode an entry key: entry:{fingerprint} -> fingerprint
pub fn decode_entry_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("entry:").map(String::from)
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_key_encoding() {
        let fingerprint = "a3f1c9";
        let key = encode_entry_key(fingerprint);
        assert_eq!(key, b"entry:a3f1c9");

        let decoded = decode_entry_key(&key).unwrap();
        assert_eq!(decoded, fingerprint);
    }

    #[test]
    fn test_decode_rejects_foreign_prefix() {
        assert!(decode_entry_key(b"meta:last_purge").is_none());
    }

    #[test]
    fn test_meta_key_encoding() {
        let key = encode_meta_key("last_purge");
        assert_eq!(key, b"meta:last_purge");
    }
}
