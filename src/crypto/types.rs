use crate::common::TransferError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const KEY_LEN: usize = 32;
pub const NONCE_BASE_LEN: usize = 7;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// 256-bit session key. Lives in process memory only.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn new() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, TransferError> {
        let bytes = decode_exact::<KEY_LEN>(encoded, "key")?;
        Ok(Self(bytes))
    }

    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Default for EncryptionKey {
    fn default() -> Self {
        Self::new()
    }
}

// Never print key material
impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.fill(0);
    }
}

/// Per-file 7 byte nonce base.
///
/// Full nonce layout: `[base: 7][chunk counter: u32 BE][reserved: 1]`, the same
/// shape as a big-endian STREAM construction, so both sides derive every chunk
/// nonce from the base alone.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_BASE_LEN]);

impl Nonce {
    /// Fresh random base. Must never be shared between two files.
    pub fn new() -> Self {
        let mut base = [0u8; NONCE_BASE_LEN];
        OsRng.fill_bytes(&mut base);
        Self(base)
    }

    pub fn from_bytes(bytes: [u8; NONCE_BASE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, TransferError> {
        let bytes = decode_exact::<NONCE_BASE_LEN>(encoded, "nonce")?;
        Ok(Self(bytes))
    }

    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_BASE_LEN] {
        &self.0
    }

    /// Nonce for chunk `counter`. Injective in `counter` for a fixed base.
    pub fn with_counter(&self, counter: u32) -> [u8; NONCE_LEN] {
        let mut full = [0u8; NONCE_LEN];
        full[..NONCE_BASE_LEN].copy_from_slice(&self.0);
        full[NONCE_BASE_LEN..NONCE_LEN - 1].copy_from_slice(&counter.to_be_bytes());
        // last byte reserved, always zero (no last-chunk flag)
        full
    }
}

impl Default for Nonce {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", hex::encode(self.0))
    }
}

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Nonce::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

fn decode_exact<const N: usize>(encoded: &str, what: &str) -> Result<[u8; N], TransferError> {
    // Browsers sometimes hand back padded values
    let trimmed = encoded.trim().trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| TransferError::protocol(format!("{what} is not valid base64: {e}")))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        TransferError::protocol(format!(
            "{what} must be {} bytes, got {}",
            N,
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn nonce_layout() {
        let base = Nonce::from_bytes([1, 2, 3, 4, 5, 6, 7]);
        let full = base.with_counter(0x0A0B0C0D);
        assert_eq!(full, [1, 2, 3, 4, 5, 6, 7, 0x0A, 0x0B, 0x0C, 0x0D, 0]);
    }

    #[test]
    fn nonce_counter_zero_keeps_base() {
        let base = Nonce::new();
        let full = base.with_counter(0);
        assert_eq!(&full[..7], base.as_bytes());
        assert_eq!(&full[7..], &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn nonces_unique_across_counters() {
        let base = Nonce::new();
        let mut seen = HashSet::new();
        for counter in (0..10_000u32).chain([u32::MAX - 1, u32::MAX, 1 << 24, 1 << 16]) {
            assert!(seen.insert(base.with_counter(counter)), "collision at {counter}");
        }
    }

    #[test]
    fn reserved_byte_is_zero_at_extremes() {
        let base = Nonce::from_bytes([0xFF; 7]);
        assert_eq!(base.with_counter(u32::MAX)[11], 0);
        assert_eq!(base.with_counter(u32::MAX)[7..11], [0xFF; 4]);
    }

    #[test]
    fn base64_roundtrip_is_unpadded_url_safe() {
        let key = EncryptionKey::new();
        let encoded = key.to_base64();
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+') && !encoded.contains('/'));
        assert_eq!(EncryptionKey::from_base64(&encoded).unwrap(), key);

        let nonce = Nonce::new();
        assert_eq!(Nonce::from_base64(&nonce.to_base64()).unwrap(), nonce);
    }

    #[test]
    fn padded_input_is_accepted() {
        let nonce = Nonce::from_bytes([9; 7]);
        let padded = format!("{}=", nonce.to_base64());
        assert_eq!(Nonce::from_base64(&padded).unwrap(), nonce);
    }

    #[test]
    fn wrong_length_is_protocol_violation() {
        let short = URL_SAFE_NO_PAD.encode([0u8; 5]);
        assert!(matches!(
            Nonce::from_base64(&short),
            Err(TransferError::ProtocolViolation(_))
        ));
        assert!(matches!(
            EncryptionKey::from_base64(&short),
            Err(TransferError::ProtocolViolation(_))
        ));
        assert!(EncryptionKey::from_base64("not base64 !!").is_err());
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = EncryptionKey::from_bytes([7; 32]);
        assert_eq!(format!("{key:?}"), "EncryptionKey(..)");
    }
}
