//! Packed 64-bit release identifier (`e.a.b.c`), see spec.md §3.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Bit widths of the four release components. `E_BITS + A_BITS + B_BITS +
/// C_BITS` is 63, leaving the top bit of the packed `u64` reserved and
/// always zero. Note this means `e` is bounded by `2^11 - 1 = 2047`, not
/// the `4095` mentioned in spec.md's range-check prose; the two are
/// inconsistent given the stated `e<<52` bit layout and a zero reserved
/// top bit, and the layout (which the composition/ordering invariants
/// depend on byte-for-byte) is treated as authoritative. See DESIGN.md.
const E_BITS: u32 = 11;
const A_BITS: u32 = 10;
const B_BITS: u32 = 10;
const C_BITS: u32 = 32;

const E_SHIFT: u32 = A_SHIFT + A_BITS;
const A_SHIFT: u32 = B_SHIFT + B_BITS;
const B_SHIFT: u32 = C_BITS;

const E_MAX: u32 = (1 << E_BITS) - 1;
const A_MAX: u32 = (1 << A_BITS) - 1;
const B_MAX: u32 = (1 << B_BITS) - 1;

/// A release identifier: a specific versioned client drop, packed into a
/// single non-negative `u64` so that integer ordering matches semantic
/// "newer-than" ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(u64);

impl ReleaseId {
    pub fn pack(e: u32, a: u32, b: u32, c: u32) -> Result<Self, CoreError> {
        if e > E_MAX {
            return Err(CoreError::ReleaseComponentOutOfRange { component: "e", value: e, max: E_MAX });
        }
        if a > A_MAX {
            return Err(CoreError::ReleaseComponentOutOfRange { component: "a", value: a, max: A_MAX });
        }
        if b > B_MAX {
            return Err(CoreError::ReleaseComponentOutOfRange { component: "b", value: b, max: B_MAX });
        }
        // c is a full u32, no range check needed beyond the type itself.
        let packed = ((e as u64) << E_SHIFT) | ((a as u64) << A_SHIFT) | ((b as u64) << B_SHIFT) | (c as u64);
        Ok(ReleaseId(packed))
    }

    pub fn from_raw(value: u64) -> Self {
        ReleaseId(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn decode(self) -> (u32, u32, u32, u32) {
        let e = ((self.0 >> E_SHIFT) & E_MAX as u64) as u32;
        let a = ((self.0 >> A_SHIFT) & A_MAX as u64) as u32;
        let b = ((self.0 >> B_SHIFT) & B_MAX as u64) as u32;
        let c = (self.0 & 0xFFFF_FFFF) as u32;
        (e, a, b, c)
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (e, a, b, c) = self.decode();
        write!(f, "{e}.{a}.{b}.{c}")
    }
}

impl FromStr for ReleaseId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(4, '.');
        let mut next = |name: &'static str| -> Result<u32, CoreError> {
            parts
                .next()
                .ok_or(CoreError::InvalidReleaseString { input: s.to_string() })?
                .parse::<u32>()
                .map_err(|_| CoreError::InvalidReleaseComponent { component: name, input: s.to_string() })
        };
        let e = next("e")?;
        let a = next("a")?;
        let b = next("b")?;
        let c = next("c")?;
        if parts.next().is_some() {
            return Err(CoreError::InvalidReleaseString { input: s.to_string() });
        }
        ReleaseId::pack(e, a, b, c)
    }
}

/// Total ordering on release identifiers already matches integer ordering
/// via `#[derive(Ord)]` on the newtype; this helper exists purely so call
/// sites that want "newer than" read naturally.
pub fn is_newer(a: ReleaseId, b: ReleaseId) -> bool {
    matches!(a.cmp(&b), Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_string() {
        let r = ReleaseId::pack(10, 2, 5, 52902).unwrap();
        assert_eq!(r.to_string(), "10.2.5.52902");
        assert_eq!(r.to_string().parse::<ReleaseId>().unwrap(), r);
    }

    #[test]
    fn round_trip_decode() {
        let r = ReleaseId::pack(2047, 1023, 1023, u32::MAX).unwrap();
        assert_eq!(r.decode(), (2047, 1023, 1023, u32::MAX));
    }

    #[test]
    fn reserved_top_bit_is_zero() {
        let r = ReleaseId::pack(2047, 1023, 1023, u32::MAX).unwrap();
        assert_eq!(r.as_u64() >> 63, 0);
    }

    #[test]
    fn out_of_range_rejected() {
        assert!(ReleaseId::pack(2048, 0, 0, 0).is_err());
        assert!(ReleaseId::pack(0, 1024, 0, 0).is_err());
        assert!(ReleaseId::pack(0, 0, 1024, 0).is_err());
    }

    #[test]
    fn ordering_matches_tuple_lexicographic() {
        let lower = ReleaseId::pack(10, 2, 5, 1).unwrap();
        let higher = ReleaseId::pack(10, 2, 5, 2).unwrap();
        assert!(higher > lower);
        let higher_b = ReleaseId::pack(10, 2, 6, 0).unwrap();
        assert!(higher_b > higher);
        let higher_a = ReleaseId::pack(10, 3, 0, 0).unwrap();
        assert!(higher_a > higher_b);
        let higher_e = ReleaseId::pack(11, 0, 0, 0).unwrap();
        assert!(higher_e > higher_a);
    }

    #[test]
    fn invalid_string_fails_deterministically() {
        assert!("not.a.release".parse::<ReleaseId>().is_err());
        assert!("10.2.5".parse::<ReleaseId>().is_err());
        assert!("10.2.5.1.2".parse::<ReleaseId>().is_err());
    }
}
