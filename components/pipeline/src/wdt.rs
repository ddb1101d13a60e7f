//! WDT minimap-tile chunk parsing (spec.md §4.3 step 4 "MAID semantics"):
//! a chunked container format — 4-byte reversed tag, 4-byte little-endian
//! payload size, payload — whose `MAID` chunk is a dense 64×64 grid of
//! `u32` file ids, row-major `(y, x)`, with `0` meaning "no tile at this
//! cell".

use mapscan_core::TileCoord;

pub const GRID_DIM: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaidEntry {
    pub coord: TileCoord,
    pub file_id: u32,
}

/// Parse every populated cell of the `MAID` chunk out of a raw WDT byte
/// stream. Absent or zero-size `MAID` chunks yield an empty list — that
/// is a legitimate "this map has a WDT but no minimap tiles" state, not
/// an error.
pub fn parse_maid(wdt_bytes: &[u8]) -> Vec<MaidEntry> {
    let Some(payload) = find_chunk(wdt_bytes, b"MAID") else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    let cell_count = (GRID_DIM * GRID_DIM).min(payload.len() / 4);
    for i in 0..cell_count {
        let offset = i * 4;
        let file_id = u32::from_le_bytes(payload[offset..offset + 4].try_into().expect("4-byte slice"));
        if file_id == 0 {
            continue;
        }
        let x = (i % GRID_DIM) as i16;
        let y = (i / GRID_DIM) as i16;
        entries.push(MaidEntry { coord: TileCoord::new(x, y), file_id });
    }
    entries
}

/// Scan the chunk stream for a tag stored reversed on disk (as every WDT
/// chunk tag is), returning its payload slice.
fn find_chunk<'a>(bytes: &'a [u8], tag: &[u8; 4]) -> Option<&'a [u8]> {
    let reversed: [u8; 4] = [tag[3], tag[2], tag[1], tag[0]];
    let mut offset = 0usize;
    while offset + 8 <= bytes.len() {
        let chunk_tag = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().expect("4-byte slice")) as usize;
        let data_start = offset + 8;
        let data_end = data_start.checked_add(size)?;
        if data_end > bytes.len() {
            return None;
        }
        if chunk_tag == reversed {
            return Some(&bytes[data_start..data_end]);
        }
        offset = data_end;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_wdt_with_maid(cells: &[(usize, u32)]) -> Vec<u8> {
        let mut payload = vec![0u8; GRID_DIM * GRID_DIM * 4];
        for (i, file_id) in cells {
            payload[i * 4..i * 4 + 4].copy_from_slice(&file_id.to_le_bytes());
        }
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"DIAM"); // "MAID" reversed on disk
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes
    }

    #[test]
    fn parses_sparse_grid() {
        let wdt = build_wdt_with_maid(&[(0, 111), (65, 222)]); // (0,0) and (1,1)
        let entries = parse_maid(&wdt);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], MaidEntry { coord: TileCoord::new(0, 0), file_id: 111 });
        assert_eq!(entries[1], MaidEntry { coord: TileCoord::new(1, 1), file_id: 222 });
    }

    #[test]
    fn missing_chunk_yields_empty() {
        let bytes = b"OTHR\x00\x00\x00\x00".to_vec();
        assert!(parse_maid(&bytes).is_empty());
    }
}
