//! Tile Materialiser (C4, spec.md §4.4): for each missing base-level
//! hash, fetch raw imagery through the content resolver, decode, enforce
//! the square/size invariants, re-encode losslessly, persist to the blob
//! store, and hand `(hash, tile_size)` to the batched `tiles` writer.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use image::GenericImageView;
use mapscan_core::{ContentHash, ItemError};
use mapscan_resolver::{ContentResolver, Filesystem, Resolved};
use mapscan_storage::BlobStore;
use tokio::sync::mpsc;

use crate::workerpool::WorkerPool;

pub const MAX_TILE_DIMENSION: u32 = 2048;
const DEFAULT_LOCALE: u32 = 0;

pub struct MaterializeOutcome {
    pub errors: Vec<ItemError>,
    /// Every `(hash, tile_size)` this stage itself produced, independent
    /// of whether the batched db consumer has drained it yet — the LOD
    /// stage (§4.5 step 1 canvas sizing) needs these sizes as soon as
    /// production finishes, not after the consumer catches up.
    pub sizes: HashMap<ContentHash, i16>,
}

/// One missing base-level tile: its content hash and the `file_id` the
/// build scanner recorded it under.
pub struct MissingTile {
    pub hash: ContentHash,
    pub file_id: u32,
}

/// Runs §4.4 over `missing` with concurrency bound `degree`, sending
/// `(hash, tile_size)` to `sink` for every tile it successfully
/// materialises. Per-tile failures are collected and returned rather than
/// aborting the loop (spec.md §7 category 1); the caller decides whether
/// a non-empty error list escalates to a scan-fatal fault.
pub async fn materialize_tiles(
    missing: Vec<MissingTile>,
    filesystem: Arc<dyn Filesystem>,
    blob_store: Arc<dyn BlobStore>,
    sink: mpsc::Sender<(ContentHash, i16)>,
    pool: Arc<WorkerPool>,
    degree: usize,
) -> MaterializeOutcome {
    let errors = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let sizes = Arc::new(tokio::sync::Mutex::new(HashMap::new()));

    stream::iter(missing)
        .for_each_concurrent(degree, |tile| {
            let filesystem = filesystem.clone();
            let blob_store = blob_store.clone();
            let sink = sink.clone();
            let pool = pool.clone();
            let errors = errors.clone();
            let sizes = sizes.clone();
            async move {
                match materialize_one(&tile, filesystem, blob_store, &sink, &pool).await {
                    Ok(tile_size) => {
                        sizes.lock().await.insert(tile.hash, tile_size);
                    }
                    Err(e) => errors.lock().await.push(ItemError::new(format!("{}: {e}", tile.hash))),
                }
            }
        })
        .await;

    MaterializeOutcome {
        errors: Arc::try_unwrap(errors).expect("no outstanding references").into_inner(),
        sizes: Arc::try_unwrap(sizes).expect("no outstanding references").into_inner(),
    }
}

async fn materialize_one(
    tile: &MissingTile,
    filesystem: Arc<dyn Filesystem>,
    blob_store: Arc<dyn BlobStore>,
    sink: &mpsc::Sender<(ContentHash, i16)>,
    pool: &WorkerPool,
) -> Result<i16, String> {
    let descriptors = filesystem
        .open_file_id(tile.file_id, DEFAULT_LOCALE)
        .await
        .map_err(|e| format!("open_file_id: {e}"))?;
    let descriptor = descriptors.first().ok_or_else(|| "no file descriptor for file id".to_string())?;

    let stream = match filesystem.open_stream(descriptor, true).await {
        Resolved::Ok(stream) => stream,
        Resolved::KeyRequired { key_name } => return Err(format!("key required: {key_name}")),
        Resolved::Other(e) => return Err(format!("open_stream: {e}")),
    };

    let hash = tile.hash;
    let (webp_bytes, tile_size) = pool
        .spawn_worker(move || encode_lossless(&stream.bytes))
        .await
        .map_err(|e| format!("codec: {e}"))?;

    blob_store
        .put(&hash, &webp_bytes, mapscan_storage::TILE_CONTENT_TYPE)
        .await
        .map_err(|e| format!("blob store: {e}"))?;

    sink.send((hash, tile_size)).await.map_err(|_| "tile sink closed".to_string())?;
    Ok(tile_size)
}

/// Decode raw bytes, enforce square/`<= 2048` dimensions, and re-encode
/// losslessly. Base-level tiles MUST be lossless (spec.md §4.4 step 3);
/// the caller's configuration is validated for this at startup (§6), so
/// this function has no lossy branch to select. `compression.baseline.method`
/// has no counterpart in the lossless path the `webp` crate exposes and is
/// not threaded in here; only `compression.lod.quality` reaches an encoder
/// (lodsynth.rs), since the lossy path does accept a quality argument.
fn encode_lossless(raw: &[u8]) -> Result<(Vec<u8>, i16), String> {
    let img = image::load_from_memory(raw).map_err(|e| format!("decode: {e}"))?;
    let (width, height) = img.dimensions();
    if width != height {
        return Err(format!("tile is not square: {width}x{height}"));
    }
    if width > MAX_TILE_DIMENSION {
        return Err(format!("tile exceeds max dimension: {width} > {MAX_TILE_DIMENSION}"));
    }
    let rgba = img.to_rgba8();
    let encoder = webp::Encoder::from_rgba(&rgba, width, height);
    let encoded = encoder.encode_lossless();
    Ok((encoded.to_vec(), width as i16))
}

/// Drains `(hash, tile_size)` pairs from `rx` in batches of `batch_size`,
/// writing each batch to the `tiles` table. The single writer for the
/// duration of a scan (spec.md §5); returns once `rx` closes, after both
/// C4 and C5 finish producing.
pub async fn run_tile_write_consumer(
    mut rx: mpsc::Receiver<(ContentHash, i16)>,
    db: mapscan_db::Db,
    batch_size: usize,
) -> Result<HashMap<ContentHash, i16>, mapscan_db::DbError> {
    let mut seen = HashMap::new();
    let mut batch = Vec::with_capacity(batch_size);

    while let Some(pair) = rx.recv().await {
        seen.insert(pair.0, pair.1);
        batch.push(pair);
        if batch.len() >= batch_size {
            flush(&db, &mut batch).await?;
        }
    }
    if !batch.is_empty() {
        flush(&db, &mut batch).await?;
    }
    Ok(seen)
}

async fn flush(db: &mapscan_db::Db, batch: &mut Vec<(ContentHash, i16)>) -> Result<(), mapscan_db::DbError> {
    let mut conn = db.pool().acquire().await?;
    mapscan_db::tiles::insert_batch(&mut conn, batch).await?;
    batch.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_square_images() {
        let img = image::RgbaImage::new(4, 8);
        let dynamic = image::DynamicImage::ImageRgba8(img);
        let mut buf = std::io::Cursor::new(Vec::new());
        dynamic.write_to(&mut buf, image::ImageOutputFormat::Png).unwrap();
        let err = encode_lossless(buf.get_ref()).unwrap_err();
        assert!(err.contains("not square"));
    }

    #[test]
    fn rejects_oversized_images() {
        let img = image::RgbaImage::new(4096, 4096);
        let dynamic = image::DynamicImage::ImageRgba8(img);
        let mut buf = std::io::Cursor::new(Vec::new());
        dynamic.write_to(&mut buf, image::ImageOutputFormat::Png).unwrap();
        let err = encode_lossless(buf.get_ref()).unwrap_err();
        assert!(err.contains("exceeds max dimension"));
    }

    #[test]
    fn encodes_valid_square_tile_losslessly() {
        let img = image::RgbaImage::new(256, 256);
        let dynamic = image::DynamicImage::ImageRgba8(img);
        let mut buf = std::io::Cursor::new(Vec::new());
        dynamic.write_to(&mut buf, image::ImageOutputFormat::Png).unwrap();
        let (bytes, size) = encode_lossless(buf.get_ref()).unwrap();
        assert_eq!(size, 256);
        assert!(!bytes.is_empty());
    }
}
