//! Binary patcher
//!
//! Overwrites the firmware image's reserved provisioning region with the
//! device key and the current UTC time, so one generic image per board serves
//! every device. Pure: the input buffer is never mutated and the only output
//! is a fresh copy.

use data_encoding::BASE64;
use serde::Deserialize;

use crate::error::PatchError;

/// Raw device key length in bytes
pub const KEY_LEN: usize = 32;
/// Timestamp field length in bytes
pub const UTC_LEN: usize = 8;

/// Byte offsets of the two provisioning fields inside the firmware image
///
/// Field widths are fixed (32-byte key, 8-byte timestamp); only the offsets
/// vary per board. Deserializes from the per-board metadata document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PatchOffsets {
    /// Start of the 32-byte key region
    pub key_offset: u32,
    /// Start of the 8-byte UTC region
    pub utc_offset: u32,
}

impl PatchOffsets {
    /// Check both regions against the image size and against each other
    ///
    /// Overlapping regions would silently corrupt one field with the other,
    /// so misconfigured metadata fails closed here before any byte is
    /// written.
    pub fn validate(&self, image_len: usize) -> Result<(), PatchError> {
        check_bounds(self.key_offset, KEY_LEN, image_len)?;
        check_bounds(self.utc_offset, UTC_LEN, image_len)?;

        let key_end = self.key_offset as u64 + KEY_LEN as u64;
        let utc_end = self.utc_offset as u64 + UTC_LEN as u64;
        if (self.key_offset as u64) < utc_end && (self.utc_offset as u64) < key_end {
            return Err(PatchError::RegionOverlap);
        }
        Ok(())
    }
}

fn check_bounds(offset: u32, len: usize, image_len: usize) -> Result<(), PatchError> {
    if offset as u64 + len as u64 > image_len as u64 {
        return Err(PatchError::OutOfBounds {
            offset,
            len: len as u32,
            image_len,
        });
    }
    Ok(())
}

/// Decode a base64 device key, requiring exactly [`KEY_LEN`] raw bytes
pub fn decode_key(encoded: &str) -> Result<[u8; KEY_LEN], PatchError> {
    let raw = BASE64
        .decode(encoded.trim().as_bytes())
        .map_err(|e| PatchError::KeyEncoding(e.to_string()))?;
    let len = raw.len();
    raw.try_into().map_err(|_| PatchError::KeyLength(len))
}

/// Produce a patched copy of `source`
///
/// The key region receives the raw key bytes; the UTC region receives
/// `utc_millis` (milliseconds since the Unix epoch) as a little-endian
/// unsigned 64-bit integer. Bounds and overlap are validated before any
/// write. Time is a parameter, not sampled here.
pub fn patch(
    source: &[u8],
    offsets: &PatchOffsets,
    key: &[u8; KEY_LEN],
    utc_millis: u64,
) -> Result<Vec<u8>, PatchError> {
    offsets.validate(source.len())?;

    let mut out = source.to_vec();
    out[offsets.key_offset as usize..][..KEY_LEN].copy_from_slice(key);
    out[offsets.utc_offset as usize..][..UTC_LEN].copy_from_slice(&utc_millis.to_le_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_LEN] = [0xA5; KEY_LEN];

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_patch_writes_both_regions() {
        let src = image(0x3000);
        let offsets = PatchOffsets {
            key_offset: 0x2000,
            utc_offset: 0x2020,
        };
        let out = patch(&src, &offsets, &KEY, 1_700_000_000_123).unwrap();

        assert_eq!(out.len(), src.len());
        assert_eq!(&out[0x2000..0x2020], &KEY);
        assert_eq!(&out[0x2020..0x2028], &1_700_000_000_123u64.to_le_bytes());
    }

    #[test]
    fn test_patch_does_not_touch_other_bytes() {
        let src = image(0x3000);
        let offsets = PatchOffsets {
            key_offset: 0x2000,
            utc_offset: 0x2020,
        };
        let out = patch(&src, &offsets, &KEY, 42).unwrap();

        assert_eq!(&out[..0x2000], &src[..0x2000]);
        assert_eq!(&out[0x2028..], &src[0x2028..]);
        // input untouched
        assert_eq!(src, image(0x3000));
    }

    #[test]
    fn test_timestamp_is_little_endian() {
        let src = vec![0u8; 64];
        let offsets = PatchOffsets {
            key_offset: 0,
            utc_offset: 40,
        };
        let out = patch(&src, &offsets, &KEY, 0x0102030405060708).unwrap();
        assert_eq!(
            &out[40..48],
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_key_out_of_bounds() {
        let src = vec![0u8; 0x2010];
        let offsets = PatchOffsets {
            key_offset: 0x2000,
            utc_offset: 0,
        };
        let err = patch(&src, &offsets, &KEY, 0).unwrap_err();
        assert!(matches!(
            err,
            PatchError::OutOfBounds {
                offset: 0x2000,
                len: 32,
                image_len: 0x2010,
            }
        ));
    }

    #[test]
    fn test_utc_out_of_bounds() {
        let src = vec![0u8; 64];
        let offsets = PatchOffsets {
            key_offset: 0,
            utc_offset: 60,
        };
        assert!(matches!(
            patch(&src, &offsets, &KEY, 0).unwrap_err(),
            PatchError::OutOfBounds { offset: 60, .. }
        ));
    }

    #[test]
    fn test_overlapping_regions_rejected() {
        let src = vec![0u8; 256];
        // UTC window starts inside the key window
        let offsets = PatchOffsets {
            key_offset: 0x10,
            utc_offset: 0x28,
        };
        assert!(matches!(
            patch(&src, &offsets, &KEY, 0).unwrap_err(),
            PatchError::RegionOverlap
        ));

        // adjacent is fine
        let offsets = PatchOffsets {
            key_offset: 0x10,
            utc_offset: 0x30,
        };
        assert!(patch(&src, &offsets, &KEY, 0).is_ok());
    }

    #[test]
    fn test_key_round_trip() {
        let raw: [u8; KEY_LEN] = *b"0123456789abcdefghijklmnopqrstuv";
        let encoded = BASE64.encode(&raw);
        let decoded = decode_key(&encoded).unwrap();
        assert_eq!(decoded, raw);

        let src = vec![0u8; 128];
        let offsets = PatchOffsets {
            key_offset: 0x20,
            utc_offset: 0x60,
        };
        let out = patch(&src, &offsets, &decoded, 0).unwrap();
        assert_eq!(&out[0x20..0x40], &raw);
    }

    #[test]
    fn test_decode_key_wrong_length() {
        let encoded = BASE64.encode(&[0u8; 16]);
        assert!(matches!(
            decode_key(&encoded).unwrap_err(),
            PatchError::KeyLength(16)
        ));
    }

    #[test]
    fn test_decode_key_bad_encoding() {
        assert!(matches!(
            decode_key("not base64!!").unwrap_err(),
            PatchError::KeyEncoding(_)
        ));
    }
}
