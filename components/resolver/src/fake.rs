//! An in-memory [`ContentResolver`] used by this crate's own tests and by
//! the pipeline crate's scan tests — no real TACT/CASC/BLTE decoding,
//! just pre-seeded file contents and an optional missing-key simulation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mapscan_core::ContentHash;

use crate::traits::{
    CompressionSpec, ContentResolver, FileDescriptor, FileId, Filesystem, MapCatalogueRow, OpenStream, Resolved,
};

#[derive(Default)]
pub struct FakeFilesystem {
    /// file_id -> (content hash, raw bytes).
    files: HashMap<FileId, (ContentHash, Vec<u8>)>,
    /// encoding keys gated behind a not-yet-installed key name.
    gated: Mutex<HashMap<Vec<u8>, String>>,
}

impl FakeFilesystem {
    pub fn new() -> Self {
        FakeFilesystem::default()
    }

    pub fn with_file(mut self, file_id: FileId, hash: ContentHash, bytes: Vec<u8>) -> Self {
        self.files.insert(file_id, (hash, bytes));
        self
    }

    pub fn gate_behind_key(self, file_id: FileId, key_name: impl Into<String>) -> Self {
        if let Some((hash, _)) = self.files.get(&file_id) {
            self.gated.lock().unwrap().insert(hash.as_bytes().to_vec(), key_name.into());
        }
        self
    }
}

fn descriptor_key(file_id: FileId) -> Vec<u8> {
    file_id.to_le_bytes().to_vec()
}

#[async_trait]
impl Filesystem for FakeFilesystem {
    async fn content_key_for_file_id(&self, file_id: FileId) -> Result<Option<ContentHash>, crate::ResolverError> {
        Ok(self.files.get(&file_id).map(|(h, _)| *h))
    }

    async fn open_file_id(&self, file_id: FileId, locale: u32) -> Result<Vec<FileDescriptor>, crate::ResolverError> {
        if self.files.contains_key(&file_id) {
            Ok(vec![FileDescriptor { file_id, encoding_key: descriptor_key(file_id), locale }])
        } else {
            Ok(Vec::new())
        }
    }

    async fn open_stream(&self, descriptor: &FileDescriptor, _validate: bool) -> Resolved<OpenStream> {
        let Some((hash, bytes)) = self.files.get(&descriptor.file_id) else {
            return Resolved::Other(crate::ResolverError::NotFound);
        };
        if let Some(key_name) = self.gated.lock().unwrap().get(hash.as_bytes().as_slice()) {
            return Resolved::KeyRequired { key_name: key_name.clone() };
        }
        Resolved::Ok(OpenStream { bytes: bytes.clone() })
    }

    fn compression_spec(&self, _encoding_key: &[u8]) -> Option<CompressionSpec> {
        Some(CompressionSpec { chunk_count: 1 })
    }
}

#[derive(Default)]
pub struct FakeResolver {
    filesystems: Mutex<HashMap<String, Arc<FakeFilesystem>>>,
    map_catalogues: Mutex<HashMap<String, Vec<MapCatalogueRow>>>,
    installed_keys: Mutex<HashMap<String, Vec<u8>>>,
    /// (build, cdn, product) -> key name, simulating a build whose root
    /// encoding key itself can't be decoded without that key.
    gated_filesystems: Mutex<HashMap<String, String>>,
    /// (build, cdn, product) -> key name, simulating a readable filesystem
    /// whose map catalogue file is individually encrypted.
    gated_map_databases: Mutex<HashMap<String, String>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        FakeResolver::default()
    }

    fn fs_key(build: &str, cdn: &str, product: &str) -> String {
        format!("{build}:{cdn}:{product}")
    }

    pub fn seed_filesystem(&self, build: &str, cdn: &str, product: &str, fs: FakeFilesystem) {
        self.filesystems.lock().unwrap().insert(Self::fs_key(build, cdn, product), Arc::new(fs));
        self.map_catalogues.lock().unwrap().entry(Self::fs_key(build, cdn, product)).or_default();
    }

    pub fn seed_map_catalogue(&self, build: &str, cdn: &str, product: &str, rows: Vec<MapCatalogueRow>) {
        self.map_catalogues.lock().unwrap().insert(Self::fs_key(build, cdn, product), rows);
    }

    pub fn gate_filesystem(&self, build: &str, cdn: &str, product: &str, key_name: impl Into<String>) {
        self.gated_filesystems.lock().unwrap().insert(Self::fs_key(build, cdn, product), key_name.into());
    }

    pub fn gate_map_database(&self, build: &str, cdn: &str, product: &str, key_name: impl Into<String>) {
        self.gated_map_databases.lock().unwrap().insert(Self::fs_key(build, cdn, product), key_name.into());
    }

    pub fn has_installed_key(&self, key_name: &str) -> bool {
        self.installed_keys.lock().unwrap().contains_key(&key_name.to_lowercase())
    }
}

#[async_trait]
impl ContentResolver for FakeResolver {
    async fn resolve_filesystem(
        &self,
        product_name: &str,
        config_build: &str,
        config_cdn: &str,
        _config_product: &str,
    ) -> Resolved<Arc<dyn Filesystem>> {
        let key = Self::fs_key(config_build, config_cdn, product_name);
        if let Some(key_name) = self.gated_filesystems.lock().unwrap().get(&key) {
            return Resolved::KeyRequired { key_name: key_name.clone() };
        }
        match self.filesystems.lock().unwrap().get(&key) {
            Some(fs) => Resolved::Ok(fs.clone() as Arc<dyn Filesystem>),
            None => Resolved::Other(crate::ResolverError::NotFound),
        }
    }

    async fn open_map_database(&self, _filesystem: &dyn Filesystem) -> Resolved<Vec<MapCatalogueRow>> {
        // The fake keys catalogues by the same (build, cdn, product) triple
        // used to seed the filesystem; tests call this through the same
        // resolver instance that did the seeding, so any stashed catalogue
        // (there is at most one active in a seeded test) is returned.
        if let Some(key_name) = self.gated_map_databases.lock().unwrap().values().next() {
            return Resolved::KeyRequired { key_name: key_name.clone() };
        }
        let catalogues = self.map_catalogues.lock().unwrap();
        match catalogues.values().next() {
            Some(rows) => Resolved::Ok(rows.clone()),
            None => Resolved::Ok(Vec::new()),
        }
    }

    fn install_key(&self, key_name: &str, key_value: &[u8]) {
        self.installed_keys.lock().unwrap().insert(key_name.to_lowercase(), key_value.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_stream_returns_bytes_when_not_gated() {
        let hash = ContentHash::from_bytes([1u8; 16]);
        let fs = FakeFilesystem::new().with_file(100, hash, b"tile-bytes".to_vec());
        let descriptors = fs.open_file_id(100, 0).await.unwrap();
        assert_eq!(descriptors.len(), 1);
        match fs.open_stream(&descriptors[0], false).await {
            Resolved::Ok(stream) => assert_eq!(stream.bytes, b"tile-bytes"),
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_stream_reports_key_required_when_gated() {
        let hash = ContentHash::from_bytes([2u8; 16]);
        let fs = FakeFilesystem::new()
            .with_file(200, hash, b"secret".to_vec())
            .gate_behind_key(200, "FA02FE67B2F34E24A2A5F7B8AB5C0B39");
        let descriptors = fs.open_file_id(200, 0).await.unwrap();
        match fs.open_stream(&descriptors[0], false).await {
            Resolved::KeyRequired { key_name } => assert_eq!(key_name, "FA02FE67B2F34E24A2A5F7B8AB5C0B39"),
            other => panic!("expected KeyRequired, got {other:?}"),
        }
    }
}
