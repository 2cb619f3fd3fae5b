//! Geohash decoding.
//!
//! A geohash is a base32 string encoding a rectangular latitude/longitude
//! cell; each character contributes five bits, alternating between the
//! longitude and latitude ranges. Decoding returns the cell center.

use crate::error::{SyncError, SyncResult};

/// The geohash base32 alphabet (note: no `a`, `i`, `l`, `o`).
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Decode a geohash into the `(lat, lon)` center of its cell.
///
/// Deterministic and total over the valid alphabet; an empty string or any
/// character outside the alphabet fails with [`SyncError::InvalidGeohash`].
pub fn decode(geohash: &str) -> SyncResult<(f64, f64)> {
    if geohash.is_empty() {
        return Err(SyncError::InvalidGeohash("empty string".to_string()));
    }

    let mut lat = (-90.0_f64, 90.0_f64);
    let mut lon = (-180.0_f64, 180.0_f64);
    let mut bit_is_lon = true;

    for ch in geohash.bytes() {
        let index = BASE32
            .iter()
            .position(|&b| b == ch)
            .ok_or_else(|| SyncError::InvalidGeohash(geohash.to_string()))?;

        for shift in (0..5).rev() {
            let range = if bit_is_lon { &mut lon } else { &mut lat };
            let mid = (range.0 + range.1) / 2.0;
            if (index >> shift) & 1 == 1 {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            bit_is_lon = !bit_is_lon;
        }
    }

    Ok(((lat.0 + lat.1) / 2.0, (lon.0 + lon.1) / 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_san_francisco() {
        let (lat, lon) = decode("9q8yy").unwrap();
        assert!((lat - 37.77).abs() < 0.01, "lat was {}", lat);
        assert!((lon + 122.41).abs() < 0.01, "lon was {}", lon);
    }

    #[test]
    fn test_decode_reference_cell() {
        // Classic reference vector for "ezs42".
        let (lat, lon) = decode("ezs42").unwrap();
        assert!((lat - 42.605).abs() < 0.01, "lat was {}", lat);
        assert!((lon + 5.603).abs() < 0.01, "lon was {}", lon);
    }

    #[test]
    fn test_decode_single_character() {
        let (lat, lon) = decode("s").unwrap();
        assert_eq!(lat, 22.5);
        assert_eq!(lon, 22.5);
    }

    #[test]
    fn test_decode_total_over_alphabet() {
        for &ch in BASE32 {
            let geohash = (ch as char).to_string();
            let (lat, lon) = decode(&geohash).unwrap();
            assert!((-90.0..=90.0).contains(&lat));
            assert!((-180.0..=180.0).contains(&lon));
        }
    }

    #[test]
    fn test_decode_deterministic() {
        let first = decode("dp3wm").unwrap();
        let second = decode("dp3wm").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_rejects_empty() {
        assert!(matches!(decode(""), Err(SyncError::InvalidGeohash(_))));
    }

    #[test]
    fn test_decode_rejects_excluded_letters() {
        for bad in ["a", "i", "l", "o", "9q8ya", "9q8y!"] {
            assert!(
                matches!(decode(bad), Err(SyncError::InvalidGeohash(_))),
                "expected InvalidGeohash for {:?}",
                bad
            );
        }
    }
}
