use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic dataset hash (BLAKE3 over the candle contents).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetHash(pub String);

impl DatasetHash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// First 12 hex characters, used in run directory names.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for DatasetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic configuration hash (BLAKE3 over canonical JSON).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigHash(pub String);

impl ConfigHash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade identifier as issued by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradeId(pub String);

impl TradeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<u64> for TradeId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_hash_is_deterministic() {
        assert_eq!(DatasetHash::from_bytes(b"abc"), DatasetHash::from_bytes(b"abc"));
        assert_ne!(DatasetHash::from_bytes(b"abc"), DatasetHash::from_bytes(b"abd"));
    }

    #[test]
    fn short_hash_tolerates_foreign_strings() {
        // Byte 12 falls inside a two-byte char.
        let h = ConfigHash("aééééééé".into());
        assert_eq!(h.short(), "aééééééé");
        assert_eq!(DatasetHash("abc".into()).short(), "abc");
    }

    #[test]
    fn short_hash_is_prefix() {
        let h = ConfigHash::from_bytes(b"engine");
        assert_eq!(h.short().len(), 12);
        assert!(h.0.starts_with(h.short()));
    }

    #[test]
    fn trade_id_display() {
        assert_eq!(TradeId::from(7).to_string(), "7");
    }
}
