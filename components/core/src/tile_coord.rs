//! Tile grid coordinates. Game data lies in `[0,63]x[0,63]` but the type
//! itself must not assume that range (spec.md §3).

use std::str::FromStr;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub x: i16,
    pub y: i16,
}

impl TileCoord {
    pub fn new(x: i16, y: i16) -> Self {
        TileCoord { x, y }
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for TileCoord {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| CoreError::InvalidTileCoord { input: s.to_string() })?;
        let x: i16 = x.parse().map_err(|_| CoreError::InvalidTileCoord { input: s.to_string() })?;
        let y: i16 = y.parse().map_err(|_| CoreError::InvalidTileCoord { input: s.to_string() })?;
        Ok(TileCoord { x, y })
    }
}

// A `"x,y"` string rather than the derived `{x, y}` object, so `TileCoord`
// can serve as a `BTreeMap` key when a `Composition` is persisted as JSON
// (spec.md §3) — `serde_json` requires map keys to serialize to strings.
impl serde::Serialize for TileCoord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for TileCoord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
