//! The on-disk TACT key cache (spec.md §6: "the resolver's encryption key
//! store is process-global and installed once at startup"). File format
//! is one `key_name key_value` pair per line, hex-encoded, matching the
//! `TactKey` convention used by community TACT tooling.

use std::collections::HashMap;
use std::path::Path;

use tokio::io::AsyncWriteExt;

use crate::ResolverError;

#[derive(Debug, Default, Clone)]
pub struct KeyStore {
    keys: HashMap<String, Vec<u8>>,
}

impl KeyStore {
    pub fn new() -> Self {
        KeyStore { keys: HashMap::new() }
    }

    /// Load a `key_name key_value` file. Missing file is not an error —
    /// an empty store is a legitimate starting point before any key has
    /// ever been required.
    pub async fn load(path: &Path) -> Result<Self, ResolverError> {
        let mut store = KeyStore::new();
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(store),
            Err(e) => return Err(ResolverError::Transport(e.to_string())),
        };
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(name), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let bytes = hex::decode(value).map_err(|e| ResolverError::Malformed(e.to_string()))?;
            store.keys.insert(name.to_lowercase(), bytes);
        }
        Ok(store)
    }

    pub fn get(&self, key_name: &str) -> Option<&[u8]> {
        self.keys.get(&key_name.to_lowercase()).map(|v| v.as_slice())
    }

    pub fn contains(&self, key_name: &str) -> bool {
        self.keys.contains_key(&key_name.to_lowercase())
    }

    pub fn install(&mut self, key_name: &str, key_value: Vec<u8>) {
        self.keys.insert(key_name.to_lowercase(), key_value);
    }

    /// Every `(key_name, key_value)` pair currently on file, for callers
    /// that need to push the whole store into another component (spec.md
    /// §4.3 step 1: installing keys into the resolver's key service).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.keys.iter().map(|(name, value)| (name.as_str(), value.as_slice()))
    }

    pub async fn persist(&self, path: &Path) -> Result<(), ResolverError> {
        let mut out = String::new();
        let mut names: Vec<&String> = self.keys.keys().collect();
        names.sort();
        for name in names {
            out.push_str(name);
            out.push(' ');
            out.push_str(&hex::encode(&self.keys[name]));
            out.push('\n');
        }
        let mut file = tokio::fs::File::create(path).await.map_err(|e| ResolverError::Transport(e.to_string()))?;
        file.write_all(out.as_bytes()).await.map_err(|e| ResolverError::Transport(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_empty_store() {
        let store = KeyStore::load(Path::new("/nonexistent/tact_keys")).await.unwrap();
        assert!(!store.contains("deadbeefdeadbeef"));
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tact_keys");
        let mut store = KeyStore::new();
        store.install("FA02FE67B2F34E24A2A5F7B8AB5C0B39", vec![0xAB; 16]);
        store.persist(&path).await.unwrap();

        let reloaded = KeyStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get("fa02fe67b2f34e24a2a5f7b8ab5c0b39"), Some([0xABu8; 16].as_slice()));
    }
}
