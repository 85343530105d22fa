//! BLAKE3 checksums for file integrity.
//!
//! Senders hash the whole file up front; receivers feed chunks into an
//! [`IncrementalHasher`] as they arrive and compare the result against the
//! checksum carried by the final frame of the transfer.

use std::fmt;

/// Checksum length in bytes
pub const CHECKSUM_LEN: usize = 32;

/// BLAKE3 digest of a complete file
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; CHECKSUM_LEN]);

impl Checksum {
    /// Wrap raw digest bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; CHECKSUM_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a checksum from a byte slice, returning `None` on length mismatch
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; CHECKSUM_LEN] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    /// Raw digest bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CHECKSUM_LEN] {
        &self.0
    }

    /// Lowercase hex encoding
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hash a complete buffer
#[must_use]
pub fn checksum(data: &[u8]) -> Checksum {
    Checksum(*blake3::hash(data).as_bytes())
}

/// Running checksum over data received in pieces
#[derive(Default)]
pub struct IncrementalHasher {
    hasher: blake3::Hasher,
    bytes_hashed: u64,
}

impl IncrementalHasher {
    /// Create an empty hasher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next piece of data
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_hashed += data.len() as u64;
    }

    /// Total bytes fed so far
    #[must_use]
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    /// Produce the checksum of everything fed so far
    #[must_use]
    pub fn finalize(&self) -> Checksum {
        Checksum(*self.hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_incremental_matches_batch() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        let mut hasher = IncrementalHasher::new();
        for piece in data.chunks(4096) {
            hasher.update(piece);
        }

        assert_eq!(hasher.bytes_hashed(), data.len() as u64);
        assert_eq!(hasher.finalize(), checksum(&data));
    }

    #[test]
    fn test_checksum_differs_on_single_bit() {
        let mut data = vec![0u8; 1024];
        let a = checksum(&data);
        data[512] ^= 0x01;
        assert_ne!(a, checksum(&data));
    }

    #[test]
    fn test_from_slice_length() {
        assert!(Checksum::from_slice(&[0u8; 31]).is_none());
        assert!(Checksum::from_slice(&[0u8; 33]).is_none());
        let sum = Checksum::from_slice(&[7u8; 32]).unwrap();
        assert_eq!(sum.as_bytes(), &[7u8; 32]);
    }

    #[test]
    fn test_hex_display() {
        let sum = checksum(b"");
        assert_eq!(sum.to_string().len(), 64);
        assert_eq!(sum.to_string(), sum.to_hex());
    }

    proptest! {
        #[test]
        fn prop_incremental_split_point_irrelevant(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            split in 0usize..4096,
        ) {
            let split = split.min(data.len());
            let mut hasher = IncrementalHasher::new();
            hasher.update(&data[..split]);
            hasher.update(&data[split..]);
            prop_assert_eq!(hasher.finalize(), checksum(&data));
        }
    }
}
