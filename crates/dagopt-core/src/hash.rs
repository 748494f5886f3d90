//! Stable fingerprints for selected plans.
//!
//! Two optimizer runs over the same DAG and config must produce the same
//! fingerprint; tests and callers use it to detect plan changes.

use blake3::Hasher;
use serde::Serialize;

use crate::error::CompilerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }

    /// Short form used in explain headers.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    let mut h = Hasher::new();
    h.update(bytes);
    Fingerprint(h.finalize().into())
}

/// Fingerprint any serde-serializable value deterministically (via JSON).
///
/// Callers must only pass values with deterministic map ordering
/// (`BTreeMap`, vectors), otherwise the fingerprint is not stable.
pub fn fingerprint_serde<T: Serialize>(v: &T) -> Result<Fingerprint, CompilerError> {
    let bytes = serde_json::to_vec(v)?;
    Ok(fingerprint_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_hex_encoded() {
        let a = fingerprint_serde(&vec![1u32, 2, 3]).unwrap();
        let b = fingerprint_serde(&vec![1u32, 2, 3]).unwrap();
        let c = fingerprint_serde(&vec![3u32, 2, 1]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_hex().len(), 64);
        assert_eq!(a.short().len(), 12);
    }
}
