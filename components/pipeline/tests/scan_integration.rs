//! End-to-end scan tests (spec.md §8): each test drives `scanner::run_scan`
//! against a real Postgres database (provisioned and migrated per-test by
//! `#[sqlx::test]`) and a `FakeResolver`/`FakeFilesystem` double standing in
//! for the out-of-scope TACT/CASC collaborator.

use std::sync::Arc;

use image::{DynamicImage, RgbaImage};
use mapscan_core::{ContentHash, ReleaseId, ScanOutcome, Settings};
use mapscan_db::{products, scans, Db};
use mapscan_pipeline::events::EventLog;
use mapscan_pipeline::{run_scan, ScanDeps, ScanInputs};
use mapscan_resolver::fake::{FakeFilesystem, FakeResolver};
use mapscan_resolver::{ContentResolver, ListfileCache};
use mapscan_storage::LocalBlobStore;
use mapscan_pipeline::WorkerPool;
use serde_json::json;
use sqlx::PgPool;

const BUILD: &str = "build1";
const CDN: &str = "cdn1";
const PRODUCT_CFG: &str = "product1";
const PRODUCT: &str = "wow";

fn square_png(size: u32, fill: u8) -> Vec<u8> {
    let img = RgbaImage::from_pixel(size, size, image::Rgba([fill, fill, fill, 255]));
    let dynamic = DynamicImage::ImageRgba8(img);
    let mut buf = std::io::Cursor::new(Vec::new());
    dynamic.write_to(&mut buf, image::ImageOutputFormat::Png).unwrap();
    buf.into_inner()
}

/// Encode a `MAID` chunk over a dense 64x64 grid with the given populated
/// `(x, y, file_id)` cells, matching `wdt.rs`'s own test helper layout.
fn build_wdt(cells: &[(i16, i16, u32)]) -> Vec<u8> {
    const GRID_DIM: usize = 64;
    let mut payload = vec![0u8; GRID_DIM * GRID_DIM * 4];
    for (x, y, file_id) in cells {
        let i = (*y as usize) * GRID_DIM + (*x as usize);
        payload[i * 4..i * 4 + 4].copy_from_slice(&file_id.to_le_bytes());
    }
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"DIAM"); // "MAID" reversed on disk
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&payload);
    bytes
}

async fn seed_pending_product(pool: &PgPool, release: ReleaseId, product_name: &str) -> ScanInputs {
    let mut tx = pool.begin().await.unwrap();
    mapscan_db::builds::ensure_build(&mut *tx, release).await.unwrap();
    let (product, _, _) = products::upsert_product(&mut tx, release, product_name, &["us".to_string()]).await.unwrap();
    products::upsert_product_source(&mut tx, product.id, BUILD, CDN, PRODUCT_CFG, &["us".to_string()]).await.unwrap();
    scans::ensure_pending(&mut tx, product.id).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let sources = products::list_product_sources(&mut tx, product.id).await.unwrap();
    tx.commit().await.unwrap();

    ScanInputs { product, sources }
}

fn scan_deps(db: Db, resolver: Arc<dyn ContentResolver>, blob_dir: &tempfile::TempDir) -> ScanDeps {
    ScanDeps {
        db,
        resolver,
        blob_store: Arc::new(LocalBlobStore::new(blob_dir.path())),
        listfile: Arc::new(ListfileCache::new()),
        settings: Settings::default(),
        events: Arc::new(EventLog::new()),
        worker_pool: Arc::new(WorkerPool::new(true)),
    }
}

#[sqlx::test(migrations = "../db/migrations")]
async fn two_maps_sharing_one_tile_dedupe(pool: PgPool) {
    let release = ReleaseId::pack(0, 1, 0, 1).unwrap();
    let inputs = seed_pending_product(&pool, release, PRODUCT).await;

    let shared_hash = ContentHash::from_bytes([0x11; 16]);
    let tile_png = square_png(64, 200);

    let wdt_one = build_wdt(&[(0, 0, 501)]);
    let wdt_two = build_wdt(&[(0, 0, 502)]);

    let resolver = Arc::new(FakeResolver::new());
    let fs = FakeFilesystem::new()
        .with_file(100, ContentHash::ZERO, wdt_one)
        .with_file(200, ContentHash::ZERO, wdt_two)
        .with_file(501, shared_hash, tile_png.clone())
        .with_file(502, shared_hash, tile_png);
    resolver.seed_filesystem(BUILD, CDN, PRODUCT, fs);
    resolver.seed_map_catalogue(
        BUILD,
        CDN,
        PRODUCT,
        vec![
            mapscan_resolver::MapCatalogueRow {
                id: 1,
                name: "Azeroth".to_string(),
                directory: "Azeroth".to_string(),
                json: json!({"WdtFileDataID": 100}),
            },
            mapscan_resolver::MapCatalogueRow {
                id: 2,
                name: "Kalimdor".to_string(),
                directory: "Kalimdor".to_string(),
                json: json!({"WdtFileDataID": 200}),
            },
        ],
    );

    let blob_dir = tempfile::tempdir().unwrap();
    let deps = scan_deps(Db::from_pool(pool.clone()), resolver, &blob_dir);

    let outcome = run_scan(&deps, inputs).await.unwrap();
    assert!(matches!(outcome, ScanOutcome::FullDecrypt));

    let tile_count: i64 = sqlx::query_scalar("SELECT count(*) FROM tiles").fetch_one(&pool).await.unwrap();
    assert_eq!(tile_count, 1, "two maps with identical single-cell content must dedupe to one tile row");

    let composition_count: i64 = sqlx::query_scalar("SELECT count(*) FROM compositions").fetch_one(&pool).await.unwrap();
    assert_eq!(composition_count, 1, "identical compositions must collapse to one row");

    let build_map_hashes: Vec<Vec<u8>> =
        sqlx::query_scalar("SELECT composition_hash FROM build_maps WHERE release = $1 ORDER BY map_id")
            .bind(release.as_u64() as i64)
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(build_map_hashes.len(), 2);
    assert_eq!(build_map_hashes[0], build_map_hashes[1]);

    let link_count: i64 = sqlx::query_scalar("SELECT count(*) FROM composition_products").fetch_one(&pool).await.unwrap();
    assert_eq!(link_count, 1);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn four_tiles_collapse_into_one_lod_level(pool: PgPool) {
    let release = ReleaseId::pack(0, 1, 0, 2).unwrap();
    let inputs = seed_pending_product(&pool, release, PRODUCT).await;

    let hashes = [ContentHash::from_bytes([1; 16]), ContentHash::from_bytes([2; 16]), ContentHash::from_bytes([3; 16]), ContentHash::from_bytes([4; 16])];

    let wdt = build_wdt(&[(0, 0, 601), (1, 0, 602), (0, 1, 603), (1, 1, 604)]);

    let resolver = Arc::new(FakeResolver::new());
    let fs = FakeFilesystem::new()
        .with_file(100, ContentHash::ZERO, wdt)
        .with_file(601, hashes[0], square_png(64, 10))
        .with_file(602, hashes[1], square_png(64, 20))
        .with_file(603, hashes[2], square_png(64, 30))
        .with_file(604, hashes[3], square_png(64, 40));
    resolver.seed_filesystem(BUILD, CDN, PRODUCT, fs);
    resolver.seed_map_catalogue(
        BUILD,
        CDN,
        PRODUCT,
        vec![mapscan_resolver::MapCatalogueRow {
            id: 1,
            name: "Azeroth".to_string(),
            directory: "Azeroth".to_string(),
            json: json!({"WdtFileDataID": 100}),
        }],
    );

    let blob_dir = tempfile::tempdir().unwrap();
    let deps = scan_deps(Db::from_pool(pool.clone()), resolver, &blob_dir);

    let outcome = run_scan(&deps, inputs).await.unwrap();
    assert!(matches!(outcome, ScanOutcome::FullDecrypt));

    let tile_count: i64 = sqlx::query_scalar("SELECT count(*) FROM tiles").fetch_one(&pool).await.unwrap();
    assert_eq!(tile_count, 5, "four base tiles plus one synthesised level-1 tile");

    let tiles_in_composition: i16 =
        sqlx::query_scalar("SELECT tiles FROM build_maps WHERE release = $1 AND map_id = 1")
            .bind(release.as_u64() as i64)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(tiles_in_composition, 5);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn missing_tile_still_synthesizes_lod_with_zero_fill(pool: PgPool) {
    let release = ReleaseId::pack(0, 1, 0, 3).unwrap();
    let inputs = seed_pending_product(&pool, release, PRODUCT).await;

    let hashes = [ContentHash::from_bytes([5; 16]), ContentHash::from_bytes([6; 16]), ContentHash::from_bytes([7; 16])];

    // (1,1) is intentionally absent from the WDT grid.
    let wdt = build_wdt(&[(0, 0, 701), (1, 0, 702), (0, 1, 703)]);

    let resolver = Arc::new(FakeResolver::new());
    let fs = FakeFilesystem::new()
        .with_file(100, ContentHash::ZERO, wdt)
        .with_file(701, hashes[0], square_png(64, 11))
        .with_file(702, hashes[1], square_png(64, 22))
        .with_file(703, hashes[2], square_png(64, 33));
    resolver.seed_filesystem(BUILD, CDN, PRODUCT, fs);
    resolver.seed_map_catalogue(
        BUILD,
        CDN,
        PRODUCT,
        vec![mapscan_resolver::MapCatalogueRow {
            id: 1,
            name: "Azeroth".to_string(),
            directory: "Azeroth".to_string(),
            json: json!({"WdtFileDataID": 100}),
        }],
    );

    let blob_dir = tempfile::tempdir().unwrap();
    let deps = scan_deps(Db::from_pool(pool.clone()), resolver, &blob_dir);

    let outcome = run_scan(&deps, inputs).await.unwrap();
    assert!(matches!(outcome, ScanOutcome::FullDecrypt));

    // 3 base tiles materialised + 1 LOD tile synthesised over 3 real
    // components and one zero-filled placeholder for the absent cell.
    let tile_count: i64 = sqlx::query_scalar("SELECT count(*) FROM tiles").fetch_one(&pool).await.unwrap();
    assert_eq!(tile_count, 4);

    let composition_json: serde_json::Value =
        sqlx::query_scalar("SELECT composition FROM build_maps bm JOIN compositions c ON c.hash = bm.composition_hash WHERE bm.release = $1 AND bm.map_id = 1")
            .bind(release.as_u64() as i64)
            .fetch_one(&pool)
            .await
            .unwrap();
    let missing = composition_json.get("missing").and_then(|v| v.as_array()).expect("missing set present");
    assert_eq!(missing.len(), 1, "the absent (1,1) cell must be recorded as missing");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn encrypted_build_short_circuits_before_any_map_write(pool: PgPool) {
    let release = ReleaseId::pack(0, 1, 0, 4).unwrap();
    let inputs = seed_pending_product(&pool, release, PRODUCT).await;

    let resolver = Arc::new(FakeResolver::new());
    resolver.gate_filesystem(BUILD, CDN, PRODUCT, "BUILD-KEY-NAME");

    let blob_dir = tempfile::tempdir().unwrap();
    let deps = scan_deps(Db::from_pool(pool.clone()), resolver, &blob_dir);

    let outcome = run_scan(&deps, inputs).await.unwrap();
    match outcome {
        ScanOutcome::EncryptedBuild { key_name } => assert_eq!(key_name, "BUILD-KEY-NAME"),
        other => panic!("expected EncryptedBuild, got {other:?}"),
    }

    let map_count: i64 = sqlx::query_scalar("SELECT count(*) FROM maps").fetch_one(&pool).await.unwrap();
    assert_eq!(map_count, 0, "an encrypted build must never reach the map catalogue upsert step");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn encrypted_map_database_is_classified_without_tile_work(pool: PgPool) {
    let release = ReleaseId::pack(0, 1, 0, 5).unwrap();
    let inputs = seed_pending_product(&pool, release, PRODUCT).await;

    let resolver = Arc::new(FakeResolver::new());
    resolver.seed_filesystem(BUILD, CDN, PRODUCT, FakeFilesystem::new());
    resolver.gate_map_database(BUILD, CDN, PRODUCT, "MAP-DB-KEY");

    let blob_dir = tempfile::tempdir().unwrap();
    let deps = scan_deps(Db::from_pool(pool.clone()), resolver, &blob_dir);

    let outcome = run_scan(&deps, inputs).await.unwrap();
    match outcome {
        ScanOutcome::EncryptedMapDatabase { key_name } => assert_eq!(key_name, "MAP-DB-KEY"),
        other => panic!("expected EncryptedMapDatabase, got {other:?}"),
    }

    let tile_count: i64 = sqlx::query_scalar("SELECT count(*) FROM tiles").fetch_one(&pool).await.unwrap();
    assert_eq!(tile_count, 0);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn concurrent_claims_skip_locked_rows(pool: PgPool) {
    let release_a = ReleaseId::pack(0, 1, 0, 10).unwrap();
    let release_b = ReleaseId::pack(0, 1, 0, 11).unwrap();
    let a = seed_pending_product(&pool, release_a, "wowA").await;
    let b = seed_pending_product(&pool, release_b, "wowB").await;

    let claim_a = scans::claim_pending(&pool).await.unwrap().expect("first claim succeeds");
    let claim_b = scans::claim_pending(&pool).await.unwrap().expect("second claim succeeds");

    assert_ne!(claim_a.product_id, claim_b.product_id);
    assert!(claim_a.product_id == a.product.id || claim_a.product_id == b.product.id);

    // Every pending row is now locked by an open transaction; a third
    // claimer must see nothing claimable rather than blocking.
    let claim_c = scans::claim_pending(&pool).await.unwrap();
    assert!(claim_c.is_none());

    claim_a.release().await.unwrap();
    claim_b.release().await.unwrap();

    // Releasing rolls both scans back to pending, so they're claimable again.
    let reclaimed = scans::claim_pending(&pool).await.unwrap();
    assert!(reclaimed.is_some());
    reclaimed.unwrap().release().await.unwrap();
}
