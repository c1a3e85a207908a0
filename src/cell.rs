//! Hexagonal hierarchical grid oracle.
//!
//! Cells are identified by a bit-packed `u64`: a resolution nibble, a base
//! cell index (0..=121), and fifteen aperture-7 digits of three bits each,
//! with unused digit slots filled with `7`. The canonical string form is the
//! sixteen lowercase hex digits of the packed word, so lexicographic order on
//! the string equals numeric order on the word. Sorting, hashing, and
//! serialization always go through the string form.
//!
//! Geometry here is synthetic: centers and boundaries are derived from the
//! digit path with fixed constant tables (no trig), rounded to six decimals,
//! so every byte of output is identical across hosts. The grid is the sole
//! authority on validity and parent relations; spatial fidelity is not a
//! concern of this crate.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::HgcError;

/// Finest supported resolution.
pub const MAX_RES: u8 = 15;

/// Number of base cells at resolution 0.
pub const NUM_BASE_CELLS: u8 = 122;

const RES_SHIFT: u32 = 60;
const BASE_SHIFT: u32 = 53;
const DIGIT_FILLER: u64 = 0x7;

/// A cell in the hexagonal hierarchical grid.
///
/// `Ord` on the packed word matches code-point order on the canonical string
/// form, which is the total order required everywhere cells are sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(u64);

impl CellId {
    /// Build a cell from a base cell index and a digit path.
    ///
    /// The resolution equals `digits.len()`. Digits must be in `0..=6`.
    pub fn new(base: u8, digits: &[u8]) -> Result<CellId, HgcError> {
        if base >= NUM_BASE_CELLS {
            return Err(HgcError::Hierarchy {
                cell: format!("base={}", base),
                reason: format!("base cell out of range (max {})", NUM_BASE_CELLS - 1),
            });
        }
        if digits.len() > MAX_RES as usize {
            return Err(HgcError::Hierarchy {
                cell: format!("base={}", base),
                reason: format!("resolution {} exceeds max {}", digits.len(), MAX_RES),
            });
        }
        let res = digits.len() as u8;
        let mut word = (res as u64) << RES_SHIFT | (base as u64) << BASE_SHIFT;
        for r in 1..=MAX_RES {
            let d = if r <= res {
                let d = digits[r as usize - 1];
                if d > 6 {
                    return Err(HgcError::Hierarchy {
                        cell: format!("base={}", base),
                        reason: format!("digit {} out of range at position {}", d, r),
                    });
                }
                d as u64
            } else {
                DIGIT_FILLER
            };
            word |= d << digit_shift(r);
        }
        Ok(CellId(word))
    }

    /// Parse the canonical 16-hex-digit string form.
    pub fn parse(s: &str) -> Result<CellId, HgcError> {
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(HgcError::Hierarchy {
                cell: s.to_string(),
                reason: "cell id must be 16 lowercase hex digits".to_string(),
            });
        }
        let word = u64::from_str_radix(s, 16).map_err(|_| HgcError::Hierarchy {
            cell: s.to_string(),
            reason: "cell id is not valid hex".to_string(),
        })?;
        let cell = CellId(word);
        if !cell.is_valid() {
            return Err(HgcError::Hierarchy {
                cell: s.to_string(),
                reason: "cell id fails validity check".to_string(),
            });
        }
        Ok(cell)
    }

    /// Resolution of this cell, `0..=15`.
    pub fn resolution(self) -> u8 {
        (self.0 >> RES_SHIFT) as u8 & 0xf
    }

    /// Base cell index, `0..=121`.
    pub fn base_cell(self) -> u8 {
        ((self.0 >> BASE_SHIFT) & 0x7f) as u8
    }

    fn digit(self, r: u8) -> u8 {
        ((self.0 >> digit_shift(r)) & 0x7) as u8
    }

    /// Whole-word validity: resolution, base cell, digit ranges, filler slots.
    pub fn is_valid(self) -> bool {
        let res = self.resolution();
        if res > MAX_RES || self.base_cell() >= NUM_BASE_CELLS {
            return false;
        }
        if self.0 & 0xff != 0 {
            return false;
        }
        for r in 1..=MAX_RES {
            let d = self.digit(r);
            if r <= res {
                if d > 6 {
                    return false;
                }
            } else if d as u64 != DIGIT_FILLER {
                return false;
            }
        }
        true
    }

    /// Ancestor of this cell at resolution `res`.
    ///
    /// Truncates the digit path. Fails if `res` is finer than this cell.
    pub fn to_parent(self, res: u8) -> Result<CellId, HgcError> {
        let own = self.resolution();
        if res > own {
            return Err(HgcError::Hierarchy {
                cell: self.to_string(),
                reason: format!("cannot take parent at res {} of a res {} cell", res, own),
            });
        }
        if res == own {
            return Ok(self);
        }
        let mut word = self.0 & !(0xfu64 << RES_SHIFT);
        word |= (res as u64) << RES_SHIFT;
        for r in (res + 1)..=MAX_RES {
            word |= DIGIT_FILLER << digit_shift(r);
        }
        Ok(CellId(word))
    }

    /// Child of this cell one resolution finer, selected by `digit`.
    pub fn child(self, digit: u8) -> Result<CellId, HgcError> {
        let res = self.resolution();
        if res >= MAX_RES {
            return Err(HgcError::Hierarchy {
                cell: self.to_string(),
                reason: format!("cannot descend below resolution {}", MAX_RES),
            });
        }
        if digit > 6 {
            return Err(HgcError::Hierarchy {
                cell: self.to_string(),
                reason: format!("child digit {} out of range", digit),
            });
        }
        let r = res + 1;
        let mut word = self.0 & !(0xfu64 << RES_SHIFT);
        word |= (r as u64) << RES_SHIFT;
        word &= !(0x7u64 << digit_shift(r));
        word |= (digit as u64) << digit_shift(r);
        Ok(CellId(word))
    }

    /// Deterministic center of the cell as `[lat, lng]`, six decimals.
    pub fn center(self) -> [f64; 2] {
        let base = self.base_cell() as f64;
        let mut lat = -87.0 + (self.base_cell() % 11) as f64 * 16.0;
        let mut lng = -174.0 + (base / 11.0).floor() * 30.0;
        let mut spacing = 8.0;
        for r in 1..=self.resolution() {
            spacing /= APERTURE_SQRT;
            let (dx, dy) = CHILD_OFFSETS[self.digit(r) as usize];
            lng += dx * spacing;
            lat += dy * spacing;
        }
        [round6(lat), round6(lng)]
    }

    /// Deterministic hexagonal boundary: six `[lat, lng]` vertices.
    pub fn boundary(self) -> Vec<[f64; 2]> {
        let [lat, lng] = self.center();
        let radius = 8.0 / APERTURE_SQRT.powi(self.resolution() as i32) * 0.55;
        HEX_VERTICES
            .iter()
            .map(|(vx, vy)| [round6(lat + vy * radius), round6(lng + vx * radius)])
            .collect()
    }
}

fn digit_shift(r: u8) -> u32 {
    // Digit 1 sits just below the base cell field; digit 15 ends at bit 8.
    BASE_SHIFT - 3 * r as u32
}

/// sqrt(7): the linear scale factor between aperture-7 resolutions.
const APERTURE_SQRT: f64 = 2.6457513110645907;

/// Unit offsets of the seven children relative to their parent center.
/// Digit 0 is the center child.
const CHILD_OFFSETS: [(f64, f64); 7] = [
    (0.0, 0.0),
    (1.0, 0.0),
    (0.5, 0.8660254037844386),
    (-0.5, 0.8660254037844386),
    (-1.0, 0.0),
    (-0.5, -0.8660254037844386),
    (0.5, -0.8660254037844386),
];

/// Unit vertices of a flat-top hexagon.
const HEX_VERTICES: [(f64, f64); 6] = [
    (1.0, 0.0),
    (0.5, 0.8660254037844386),
    (-0.5, 0.8660254037844386),
    (-1.0, 0.0),
    (-0.5, -0.8660254037844386),
    (0.5, -0.8660254037844386),
];

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for CellId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CellId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<CellId, D::Error> {
        let s = String::deserialize(deserializer)?;
        CellId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_resolution_contract() {
        let cell = CellId::new(42, &[1, 2, 3, 4, 5, 6, 0, 1]).unwrap();
        assert_eq!(cell.resolution(), 8);
        for r in 0..=8 {
            let parent = cell.to_parent(r).unwrap();
            assert_eq!(parent.resolution(), r);
            assert!(parent.is_valid());
        }
    }

    #[test]
    fn parent_of_parent_commutes() {
        let cell = CellId::new(7, &[3, 3, 1, 0, 6, 2, 4, 5]).unwrap();
        let via_five = cell.to_parent(5).unwrap().to_parent(2).unwrap();
        let direct = cell.to_parent(2).unwrap();
        assert_eq!(via_five, direct);
    }

    #[test]
    fn finer_parent_is_rejected() {
        let cell = CellId::new(0, &[1, 2]).unwrap();
        assert!(matches!(
            cell.to_parent(3),
            Err(HgcError::Hierarchy { .. })
        ));
    }

    #[test]
    fn string_round_trip() {
        let cell = CellId::new(121, &[6, 6, 6, 6, 6, 6, 6, 6]).unwrap();
        let s = cell.to_string();
        assert_eq!(s.len(), 16);
        assert_eq!(CellId::parse(&s).unwrap(), cell);
    }

    #[test]
    fn string_order_matches_word_order() {
        let mut cells = vec![
            CellId::new(3, &[0, 0, 0, 0, 0, 0, 0, 0]).unwrap(),
            CellId::new(3, &[6, 0, 0, 0, 0, 0, 0, 0]).unwrap(),
            CellId::new(100, &[1, 1, 1, 1, 1, 1, 1, 1]).unwrap(),
            CellId::new(3, &[0, 0, 0, 0, 0, 0, 0, 1]).unwrap(),
        ];
        let mut by_string: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
        by_string.sort();
        cells.sort();
        let by_word: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
        assert_eq!(by_string, by_word);
    }

    #[test]
    fn child_inverts_parent() {
        let cell = CellId::new(12, &[4, 2]).unwrap();
        let child = cell.child(5).unwrap();
        assert_eq!(child.resolution(), 3);
        assert!(child.is_valid());
        assert_eq!(child.to_parent(2).unwrap(), cell);
        assert!(cell.child(7).is_err());
    }

    #[test]
    fn invalid_cells_rejected() {
        assert!(CellId::new(122, &[]).is_err());
        assert!(CellId::new(0, &[7]).is_err());
        // Filler digit inside the active path.
        assert!(CellId::parse("8001ffffffffff00").is_err());
        // Uppercase is not the canonical form.
        assert!(CellId::parse("000FFFFFFFFFFF00").is_err());
        // Trailing byte must be zero.
        assert!(CellId::parse("000fffffffffff01").is_err());
    }

    #[test]
    fn geometry_is_deterministic_and_rounded() {
        let cell = CellId::new(55, &[2, 4, 1, 3, 0, 5, 6, 2]).unwrap();
        let c1 = cell.center();
        let c2 = cell.center();
        assert_eq!(c1, c2);
        for v in cell.boundary() {
            for x in v {
                assert_eq!(x, (x * 1e6).round() / 1e6);
            }
        }
        assert_eq!(cell.boundary().len(), 6);
    }

    #[test]
    fn sibling_centers_differ() {
        let a = CellId::new(10, &[0]).unwrap();
        let b = CellId::new(10, &[1]).unwrap();
        assert_ne!(a.center(), b.center());
    }
}
