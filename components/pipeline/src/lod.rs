//! LOD hierarchy construction (spec.md §4.3.1): for each configured level
//! `L`, subdivide the 64×64 base grid into `2^L × 2^L` blocks and hash
//! each block's row-major component list into a synthetic tile hash.

use std::collections::BTreeMap;

use md5::{Digest, Md5};

use mapscan_core::{ContentHash, ScanError, TileCoord};

const GRID_SIZE: i16 = 64;

/// One synthesised LOD tile: the level it was built for and the ordered
/// list of component hashes (`None` for a missing sub-tile) that hash to
/// it, in row-major `(ty, tx)` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LodComponents {
    pub level: u8,
    pub components: Vec<Option<ContentHash>>,
}

/// Accumulates `lod_tile_hash -> component list` across every map and
/// level processed in one scan, enforcing spec.md §4.3.1's collision
/// invariant: a repeated hash must carry an identical component list.
#[derive(Default)]
pub struct LodRegistry {
    by_hash: BTreeMap<ContentHash, LodComponents>,
}

impl LodRegistry {
    pub fn new() -> Self {
        LodRegistry::default()
    }

    fn record(&mut self, hash: ContentHash, components: LodComponents) -> Result<(), ScanError> {
        match self.by_hash.get(&hash) {
            Some(existing) if existing.components == components.components && existing.level == components.level => {
                Ok(())
            }
            Some(_) => Err(ScanError::LodHashCollision { hash: hash.to_hex() }),
            None => {
                self.by_hash.insert(hash, components);
                Ok(())
            }
        }
    }

    pub fn get(&self, hash: &ContentHash) -> Option<&LodComponents> {
        self.by_hash.get(hash)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContentHash, &LodComponents)> {
        self.by_hash.iter()
    }
}

/// Hash a list of `f*f` row-major components: present entries contribute
/// their 16 bytes verbatim, absent entries contribute 16 zero bytes
/// (spec.md §4.3.1).
pub fn lod_tile_hash(components: &[Option<ContentHash>]) -> ContentHash {
    let mut hasher = Md5::new();
    for component in components {
        match component {
            Some(hash) => hasher.update(hash.as_bytes()),
            None => hasher.update([0u8; 16]),
        }
    }
    let digest = hasher.finalize();
    ContentHash::from_bytes(digest.into())
}

/// Build level `L`'s map of block-origin -> LOD tile hash from base level
/// L0, registering every newly-seen hash in `registry`. Blocks that are
/// entirely absent at L0 are skipped — they contribute nothing to this
/// level.
pub fn build_level(
    level: u8,
    l0: &BTreeMap<TileCoord, ContentHash>,
    registry: &mut LodRegistry,
) -> Result<BTreeMap<TileCoord, ContentHash>, ScanError> {
    let f: i16 = 1 << level;
    let mut level_map = BTreeMap::new();

    let mut origin_x = 0;
    while origin_x + f <= GRID_SIZE {
        let mut origin_y = 0;
        while origin_y + f <= GRID_SIZE {
            let mut components = Vec::with_capacity((f * f) as usize);
            let mut any_present = false;
            for ty in 0..f {
                for tx in 0..f {
                    let coord = TileCoord::new(origin_x + tx, origin_y + ty);
                    let hash = l0.get(&coord).copied();
                    any_present |= hash.is_some();
                    components.push(hash);
                }
            }
            if any_present {
                let hash = lod_tile_hash(&components);
                registry.record(hash, LodComponents { level, components })?;
                level_map.insert(TileCoord::new(origin_x, origin_y), hash);
            }
            origin_y += f;
        }
        origin_x += f;
    }

    Ok(level_map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> ContentHash {
        ContentHash::from_bytes([byte; 16])
    }

    #[test]
    fn four_equal_tiles_hash_to_four_concatenated_copies() {
        let h_val = h(0xAB);
        let mut l0 = BTreeMap::new();
        l0.insert(TileCoord::new(0, 0), h_val);
        l0.insert(TileCoord::new(1, 0), h_val);
        l0.insert(TileCoord::new(0, 1), h_val);
        l0.insert(TileCoord::new(1, 1), h_val);

        let mut registry = LodRegistry::new();
        let level1 = build_level(1, &l0, &mut registry).unwrap();

        assert_eq!(level1.len(), 1);
        let lod_hash = level1[&TileCoord::new(0, 0)];

        let mut expected = Vec::new();
        for _ in 0..4 {
            expected.extend_from_slice(h_val.as_bytes());
        }
        let mut hasher = Md5::new();
        hasher.update(&expected);
        let expected_hash = ContentHash::from_bytes(hasher.finalize().into());
        assert_eq!(lod_hash, expected_hash);
    }

    #[test]
    fn missing_component_contributes_sixteen_zero_bytes() {
        let h00 = h(0x01);
        let h10 = h(0x02);
        let h01 = h(0x03);
        let mut l0 = BTreeMap::new();
        l0.insert(TileCoord::new(0, 0), h00);
        l0.insert(TileCoord::new(1, 0), h10);
        l0.insert(TileCoord::new(0, 1), h01);
        // (1,1) intentionally missing.

        let mut registry = LodRegistry::new();
        let level1 = build_level(1, &l0, &mut registry).unwrap();
        let lod_hash = level1[&TileCoord::new(0, 0)];

        let mut hasher = Md5::new();
        hasher.update(h00.as_bytes());
        hasher.update(h10.as_bytes());
        hasher.update(h01.as_bytes());
        hasher.update([0u8; 16]);
        let expected = ContentHash::from_bytes(hasher.finalize().into());
        assert_eq!(lod_hash, expected);
    }

    #[test]
    fn fully_empty_block_is_skipped() {
        let l0: BTreeMap<TileCoord, ContentHash> = BTreeMap::new();
        let mut registry = LodRegistry::new();
        let level1 = build_level(1, &l0, &mut registry).unwrap();
        assert!(level1.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn collision_with_identical_components_is_accepted() {
        let mut registry = LodRegistry::new();
        let components = vec![Some(h(1)), Some(h(2)), None, None];
        let hash = lod_tile_hash(&components);
        registry.record(hash, LodComponents { level: 1, components: components.clone() }).unwrap();
        registry.record(hash, LodComponents { level: 1, components }).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn collision_with_different_components_is_rejected() {
        let mut registry = LodRegistry::new();
        let a = vec![Some(h(1)), None, None, None];
        let b = vec![Some(h(1)), Some(h(2)), None, None];
        let hash_a = lod_tile_hash(&a);
        registry.record(hash_a, LodComponents { level: 1, components: a }).unwrap();
        // Force an artificial collision by reusing hash_a with different
        // components to exercise the guard directly.
        let err = registry.record(hash_a, LodComponents { level: 1, components: b });
        assert!(err.is_err());
    }

    #[test]
    fn construction_is_deterministic_across_orders() {
        let h_val = h(0x42);
        let mut l0_a = BTreeMap::new();
        l0_a.insert(TileCoord::new(0, 0), h_val);
        l0_a.insert(TileCoord::new(1, 0), h_val);

        let mut l0_b = BTreeMap::new();
        l0_b.insert(TileCoord::new(1, 0), h_val);
        l0_b.insert(TileCoord::new(0, 0), h_val);

        let mut reg_a = LodRegistry::new();
        let mut reg_b = LodRegistry::new();
        let level_a = build_level(1, &l0_a, &mut reg_a).unwrap();
        let level_b = build_level(1, &l0_b, &mut reg_b).unwrap();
        assert_eq!(level_a, level_b);
    }
}
