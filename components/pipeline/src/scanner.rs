//! Build Scanner (C3, spec.md §4.3) — the core of the pipeline. Resolves
//! a release's filesystem, reads the map catalogue, extracts per-map
//! tile data and LOD hierarchies, drives the tile/LOD materialisation
//! stages (§4.4/§4.5) across an explicit barrier, and publishes
//! compositions and build-map bindings.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use mapscan_core::{ContentHash, ItemError, ReleaseId, ScanError, ScanOutcome, Settings};
use mapscan_db::models::{Composition, ProductRow, ProductSourceRow};
use mapscan_db::Db;
use mapscan_resolver::{ContentResolver, Filesystem, KeyStore, ListfileCache, Resolved};
use mapscan_storage::BlobStore;
use tokio::sync::{mpsc, Mutex};

use crate::composition::{composition_hash, extents};
use crate::events::{Event, EventLog};
use crate::lod::{build_level, LodRegistry};
use crate::lodsynth::{synthesize_lods, MissingLod};
use crate::materializer::{materialize_tiles, run_tile_write_consumer, MissingTile};
use crate::wdt::parse_maid;
use crate::workerpool::{worker_count, WorkerPool};

const TILE_CHANNEL_CAPACITY: usize = 500;
const TILE_WRITE_BATCH: usize = 50;
const COMPOSITION_PUBLISH_BATCH: usize = 3;
const DEFAULT_LOCALE: u32 = 0;

pub struct ScanDeps {
    pub db: Db,
    pub resolver: Arc<dyn ContentResolver>,
    pub blob_store: Arc<dyn BlobStore>,
    pub listfile: Arc<ListfileCache>,
    pub settings: Settings,
    pub events: Arc<EventLog>,
    pub worker_pool: Arc<WorkerPool>,
}

pub struct ScanInputs {
    pub product: ProductRow,
    pub sources: Vec<ProductSourceRow>,
}

struct MapComposition {
    map_id: i32,
    composition: Composition,
}

/// A map that participated in the working list but produced no tile
/// data: no WDT could be located, or the WDT itself is encrypted and no
/// key is available (spec.md §4.3 step 8, §9(c) "presence without
/// imagery").
struct PresenceOnly {
    map_id: i32,
}

pub async fn run_scan(deps: &ScanDeps, inputs: ScanInputs) -> Result<ScanOutcome, ScanError> {
    let started = Instant::now();
    let release = ReleaseId::from_raw(inputs.product.release as u64);
    deps.events.emit(Event::ScanStarted { product_id: inputs.product.id, release: release.to_string() });

    let outcome = run_scan_inner(deps, &inputs, release).await;

    match &outcome {
        Ok(o) => deps.events.emit(Event::ScanCompleted {
            product_id: inputs.product.id,
            release: release.to_string(),
            state: o.state_name().to_string(),
            scan_time_secs: started.elapsed().as_secs_f64(),
        }),
        Err(e) => deps.events.emit(Event::ScanFailed {
            product_id: inputs.product.id,
            release: release.to_string(),
            message: e.to_string(),
        }),
    }

    outcome
}

async fn run_scan_inner(deps: &ScanDeps, inputs: &ScanInputs, release: ReleaseId) -> Result<ScanOutcome, ScanError> {
    // Step 1 — key load.
    let key_store_path = Path::new(&deps.settings.cache_path).join("tact_keys");
    let keys = KeyStore::load(&key_store_path).await.map_err(|e| ScanError::Fatal(format!("key store: {e}")))?;
    for (key_name, value) in keys.iter() {
        deps.resolver.install_key(key_name, value);
    }

    // Step 2 — filesystem resolution. Ambiguity over which config triple
    // to prefer is preserved per spec.md §9 Open Question (a): the first
    // `product_sources` row, already ordered `first_seen ASC` by the db
    // layer, is used without further tie-breaking.
    let source = inputs
        .sources
        .first()
        .ok_or_else(|| ScanError::Fatal("product has no source configs".to_string()))?;

    let filesystem = match deps
        .resolver
        .resolve_filesystem(&inputs.product.product_name, &source.config_build, &source.config_cdn, &source.config_product)
        .await
    {
        Resolved::Ok(fs) => fs,
        Resolved::KeyRequired { key_name } => return Ok(ScanOutcome::EncryptedBuild { key_name }),
        Resolved::Other(e) => return Ok(ScanOutcome::Exception { message: format!("resolve_filesystem: {e}") }),
    };

    // Step 3 — map catalogue.
    let catalogue = match deps.resolver.open_map_database(filesystem.as_ref()).await {
        Resolved::Ok(rows) => rows,
        Resolved::KeyRequired { key_name } => return Ok(ScanOutcome::EncryptedMapDatabase { key_name }),
        Resolved::Other(e) => return Ok(ScanOutcome::Exception { message: format!("open_map_database: {e}") }),
    };

    {
        let mut conn = deps.db.pool().acquire().await.map_err(|e| ScanError::Database(e.to_string()))?;
        for row in &catalogue {
            mapscan_db::maps::upsert_map(&mut conn, row.id, row.json.clone(), &row.directory, &row.name, release)
                .await
                .map_err(|e| ScanError::Database(e.to_string()))?;
        }
    }

    let working_list: Vec<_> = match &deps.settings.specific_maps {
        None => catalogue,
        Some(subset) => catalogue.into_iter().filter(|row| subset.iter().any(|s| s == &row.name || s == &row.directory)).collect(),
    };

    // Step 4 — parallel per-map extraction.
    let degree = worker_count(deps.settings.single_thread);
    let registry = Arc::new(Mutex::new(LodRegistry::new()));
    let file_id_by_hash = Arc::new(Mutex::new(HashMap::<ContentHash, u32>::new()));
    let compositions = Arc::new(Mutex::new(Vec::<MapComposition>::new()));
    let presence_only = Arc::new(Mutex::new(Vec::<PresenceOnly>::new()));
    let encrypted_maps = Arc::new(Mutex::new(BTreeMap::<String, Vec<i32>>::new()));
    let lod_hash_collisions = Arc::new(Mutex::new(Vec::<ScanError>::new()));
    let lod_levels: BTreeSet<u8> = deps.settings.lod_levels.iter().copied().filter(|l| *l > 0).collect();

    stream::iter(working_list)
        .for_each_concurrent(degree, |row| {
            let filesystem = filesystem.clone();
            let listfile = deps.listfile.clone();
            let registry = registry.clone();
            let file_id_by_hash = file_id_by_hash.clone();
            let compositions = compositions.clone();
            let presence_only = presence_only.clone();
            let encrypted_maps = encrypted_maps.clone();
            let lod_hash_collisions = lod_hash_collisions.clone();
            let lod_levels = lod_levels.clone();
            async move {
                let wdt_file_id = resolve_wdt_file_id(&row, &listfile).await;
                let Some(wdt_file_id) = wdt_file_id else {
                    tracing::debug!(map_id = row.id, "no WDT file id, recording presence-without-imagery");
                    presence_only.lock().await.push(PresenceOnly { map_id: row.id });
                    return;
                };

                let descriptors = match filesystem.open_file_id(wdt_file_id, DEFAULT_LOCALE).await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!(map_id = row.id, error = %e, "failed to open WDT descriptor");
                        presence_only.lock().await.push(PresenceOnly { map_id: row.id });
                        return;
                    }
                };
                let Some(descriptor) = descriptors.first() else {
                    presence_only.lock().await.push(PresenceOnly { map_id: row.id });
                    return;
                };

                let wdt_bytes = match filesystem.open_stream(descriptor, true).await {
                    Resolved::Ok(stream) => stream.bytes,
                    Resolved::KeyRequired { key_name } => {
                        encrypted_maps.lock().await.entry(key_name).or_default().push(row.id);
                        return;
                    }
                    Resolved::Other(e) => {
                        tracing::warn!(map_id = row.id, error = %e, "failed to open WDT stream");
                        presence_only.lock().await.push(PresenceOnly { map_id: row.id });
                        return;
                    }
                };

                let entries = parse_maid(&wdt_bytes);
                let mut l0 = BTreeMap::new();
                let mut missing = BTreeSet::new();
                for entry in entries {
                    match filesystem.content_key_for_file_id(entry.file_id).await {
                        Ok(Some(hash)) => {
                            l0.insert(entry.coord, hash);
                            file_id_by_hash.lock().await.insert(hash, entry.file_id);
                        }
                        Ok(None) => {
                            missing.insert(entry.coord);
                        }
                        Err(e) => {
                            tracing::warn!(map_id = row.id, error = %e, "content key lookup failed");
                            missing.insert(entry.coord);
                        }
                    }
                }

                let mut levels = BTreeMap::new();
                if !l0.is_empty() || !missing.is_empty() {
                    levels.insert(0u8, l0.clone());
                }
                let mut registry_guard = registry.lock().await;
                for level in &lod_levels {
                    match build_level(*level, &l0, &mut registry_guard) {
                        Ok(level_map) if !level_map.is_empty() => {
                            levels.insert(*level, level_map);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(map_id = row.id, error = %e, "LOD hash collision");
                            lod_hash_collisions.lock().await.push(e);
                        }
                    }
                }
                drop(registry_guard);

                let composition = Composition { levels, missing, tile_size: None };
                compositions.lock().await.push(MapComposition { map_id: row.id, composition });
            }
        })
        .await;

    let compositions = Arc::try_unwrap(compositions).expect("no outstanding references").into_inner();
    let presence_only = Arc::try_unwrap(presence_only).expect("no outstanding references").into_inner();
    let encrypted_maps = Arc::try_unwrap(encrypted_maps).expect("no outstanding references").into_inner();
    let registry = Arc::try_unwrap(registry).expect("no outstanding references").into_inner();
    let file_id_by_hash = Arc::try_unwrap(file_id_by_hash).expect("no outstanding references").into_inner();
    let mut lod_hash_collisions = Arc::try_unwrap(lod_hash_collisions).expect("no outstanding references").into_inner();
    if let Some(err) = lod_hash_collisions.drain(..).next() {
        return Err(err);
    }

    // Step 5 — delta.
    let mut all_base_hashes: HashSet<ContentHash> = HashSet::new();
    for mc in &compositions {
        if let Some(level0) = mc.composition.levels.get(&0) {
            all_base_hashes.extend(level0.values().copied());
        }
    }
    let all_lod_hashes: HashSet<ContentHash> = registry.iter().map(|(hash, _)| *hash).collect();

    let mut all_hashes: Vec<ContentHash> = all_base_hashes.iter().copied().collect();
    all_hashes.extend(all_lod_hashes.iter().copied());

    let mut conn = deps.db.pool().acquire().await.map_err(|e| ScanError::Database(e.to_string()))?;
    let known = mapscan_db::tiles::fetch_known(&mut conn, &all_hashes).await.map_err(|e| ScanError::Database(e.to_string()))?;
    drop(conn);

    let missing_base: Vec<ContentHash> = all_base_hashes.iter().filter(|h| !known.contains_key(*h)).copied().collect();
    let missing_lod: Vec<ContentHash> = all_lod_hashes.iter().filter(|h| !known.contains_key(*h)).copied().collect();

    let missing_tiles: Vec<MissingTile> = missing_base
        .iter()
        .filter_map(|hash| file_id_by_hash.get(hash).map(|file_id| MissingTile { hash: *hash, file_id: *file_id }))
        .collect();

    let (tx, rx) = mpsc::channel(TILE_CHANNEL_CAPACITY);
    let consumer_db = deps.db.clone();
    let consumer = tokio::spawn(run_tile_write_consumer(rx, consumer_db, TILE_WRITE_BATCH));

    // Step 6 — tile materialisation.
    let base_outcome = materialize_tiles(
        missing_tiles,
        filesystem.clone(),
        deps.blob_store.clone(),
        tx.clone(),
        deps.worker_pool.clone(),
        degree,
    )
    .await;

    // Step 7 — LOD materialisation; begins only after step 6's production
    // completes (spec.md §5 "barrier between step 6 and step 7").
    let mut known_sizes: HashMap<ContentHash, i16> = known;
    known_sizes.extend(base_outcome.sizes.iter().map(|(h, s)| (*h, *s)));
    let known_sizes = Arc::new(known_sizes);

    let missing_lod_items: Vec<MissingLod> = missing_lod
        .iter()
        .filter_map(|hash| registry.get(hash).map(|c| MissingLod { hash: *hash, components: c.clone() }))
        .collect();

    let lod_outcome = synthesize_lods(
        missing_lod_items,
        known_sizes,
        deps.blob_store.clone(),
        tx,
        deps.worker_pool.clone(),
        degree,
        deps.settings.compression.lod.quality,
    )
    .await;

    let _ = consumer.await.map_err(|e| ScanError::Fatal(format!("tile write consumer panicked: {e}")))?.map_err(|e| ScanError::Database(e.to_string()))?;

    let mut all_errors: Vec<ItemError> = Vec::new();
    all_errors.extend(base_outcome.errors);
    all_errors.extend(lod_outcome.errors);
    if !all_errors.is_empty() {
        return Err(ScanError::TileMaterialisationFailed {
            failed: all_errors.len(),
            attempted: missing_base.len() + missing_lod.len(),
            causes: all_errors,
        });
    }

    // Step 8 — composition publish, batched in groups of 3.
    for chunk in compositions.chunks(COMPOSITION_PUBLISH_BATCH) {
        let mut tx = deps.db.pool().begin().await.map_err(|e| ScanError::Database(e.to_string()))?;
        for mc in chunk {
            let hash = composition_hash(&mc.composition);
            let tile_count = mc.composition.tile_count();
            let ext = extents(&mc.composition);
            let published = mapscan_db::compositions::PublishedComposition {
                hash,
                composition: mc.composition.clone(),
                extents: ext,
            };
            mapscan_db::compositions::insert_composition(&mut tx, &published).await.map_err(|e| ScanError::Database(e.to_string()))?;
            mapscan_db::compositions::link_product(&mut tx, &hash, inputs.product.id).await.map_err(|e| ScanError::Database(e.to_string()))?;
            mapscan_db::maps::upsert_build_map(&mut tx, release, mc.map_id, Some(tile_count as i16), Some(hash.as_bytes())).await.map_err(|e| ScanError::Database(e.to_string()))?;
        }
        tx.commit().await.map_err(|e| ScanError::Database(e.to_string()))?;
    }

    for chunk in presence_only.chunks(COMPOSITION_PUBLISH_BATCH) {
        let mut tx = deps.db.pool().begin().await.map_err(|e| ScanError::Database(e.to_string()))?;
        for p in chunk {
            mapscan_db::maps::upsert_build_map(&mut tx, release, p.map_id, None, None).await.map_err(|e| ScanError::Database(e.to_string()))?;
        }
        tx.commit().await.map_err(|e| ScanError::Database(e.to_string()))?;
    }

    // Step 9 — classify.
    if !encrypted_maps.is_empty() {
        Ok(ScanOutcome::PartialDecrypt { encrypted_maps })
    } else {
        Ok(ScanOutcome::FullDecrypt)
    }
}

/// Locates a map's WDT file id: the catalogue row's own `WdtFileDataID`
/// column when present, falling back to a listfile lookup of
/// `world/maps/{directory}/{directory}.wdt`. Spec.md §4.3 step 4 phrases
/// this as a release-version gate (`releases >= MapAddWdtFileId`); the
/// row-column-first-else-listfile order implemented here is behaviourally
/// equivalent without fabricating an exact version threshold — see
/// DESIGN.md.
async fn resolve_wdt_file_id(row: &mapscan_resolver::MapCatalogueRow, listfile: &ListfileCache) -> Option<u32> {
    if let Some(id) = row.json.get("WdtFileDataID").and_then(|v| v.as_u64()).filter(|id| *id != 0) {
        return Some(id as u32);
    }
    let path = format!("world/maps/{}/{}.wdt", row.directory, row.directory);
    listfile.id_for_path(&path).await
}
