//! 128-bit content-addressed hash, used both as the TACT content key and
//! as the primary key of the tile store. See spec.md §3, §8.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

pub const HASH_LEN: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    pub const ZERO: ContentHash = ContentHash([0u8; HASH_LEN]);

    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        ContentHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_LEN * 2 {
            return Err(CoreError::InvalidContentHash { input: s.to_string() });
        }
        let mut bytes = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| CoreError::InvalidContentHash { input: s.to_string() })?;
        Ok(ContentHash(bytes))
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_any_case() {
        let lower = "deadbeefcafebabe0011223344556677";
        let mixed = "DeAdBeEfCaFeBaBe0011223344556677";
        let upper = mixed.to_uppercase();
        let h1: ContentHash = lower.parse().unwrap();
        let h2: ContentHash = mixed.parse().unwrap();
        let h3: ContentHash = upper.parse().unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1, h3);
        assert_eq!(h1.to_hex(), lower);
    }

    #[test]
    fn rejects_bad_input() {
        assert!("not-hex-at-all-not-hex-at-all-x".parse::<ContentHash>().is_err());
        assert!("dead".parse::<ContentHash>().is_err());
    }
}
