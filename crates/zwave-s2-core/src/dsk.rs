//! Device specific key (DSK) text form.
//!
//! A DSK is 16 bytes, shown to users as eight big-endian 16-bit values in
//! decimal, each padded to five digits: `34028-23669-20938-46346-33746-07431-56821-13289`.

use zwave_s2_crypto::DSK_SIZE;

use crate::error::DskError;

/// Prefix some tools put in front of a DSK string
pub const DSK_URI_PREFIX: &str = "zws2dsk:";

const BLOCKS: usize = DSK_SIZE / 2;
const BLOCK_DIGITS: usize = 5;
const DSK_STRING_LEN: usize = BLOCKS * BLOCK_DIGITS + BLOCKS - 1;

/// Format a DSK for display.
pub fn dsk_to_string(dsk: &[u8; DSK_SIZE]) -> String {
    dsk.chunks_exact(2)
        .map(|pair| format!("{:05}", u16::from_be_bytes([pair[0], pair[1]])))
        .collect::<Vec<_>>()
        .join("-")
}

/// Parse a DSK string.
///
/// # Errors
///
/// - `DskError::InvalidFormat` unless the input is exactly eight dash
///   separated groups of five digits
/// - `DskError::BlockOutOfRange` if a group exceeds 65535
pub fn dsk_from_string(input: &str) -> Result<[u8; DSK_SIZE], DskError> {
    if input.len() != DSK_STRING_LEN {
        return Err(DskError::InvalidFormat);
    }

    let mut dsk = [0u8; DSK_SIZE];
    let mut groups = 0;
    for (index, group) in input.split('-').enumerate() {
        if index >= BLOCKS
            || group.len() != BLOCK_DIGITS
            || !group.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(DskError::InvalidFormat);
        }

        let value: u32 = group.parse().map_err(|_| DskError::InvalidFormat)?;
        let block = u16::try_from(value).map_err(|_| DskError::BlockOutOfRange { index, value })?;
        dsk[2 * index..2 * index + 2].copy_from_slice(&block.to_be_bytes());
        groups += 1;
    }

    if groups != BLOCKS {
        return Err(DskError::InvalidFormat);
    }
    Ok(dsk)
}

/// True if `input` is a well-formed DSK string (no prefix, no whitespace).
pub fn is_valid_dsk(input: &str) -> bool {
    dsk_from_string(input).is_ok()
}

/// Lenient parse for user input: trims whitespace and an optional
/// `zws2dsk:` prefix.
pub fn try_parse_dsk(input: &str) -> Option<[u8; DSK_SIZE]> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix(DSK_URI_PREFIX).unwrap_or(trimmed);
    dsk_from_string(trimmed.trim()).ok()
}

/// The PIN a user enters for authenticated inclusion: the first DSK group.
pub fn dsk_pin(dsk: &[u8; DSK_SIZE]) -> u16 {
    u16::from_be_bytes([dsk[0], dsk[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "34028-23669-20938-46346-33746-07431-56821-13289";

    #[test]
    fn format_roundtrip() {
        let dsk = dsk_from_string(SAMPLE).unwrap();
        assert_eq!(dsk_to_string(&dsk), SAMPLE);
        assert_eq!(dsk_pin(&dsk), 34028);
    }

    #[test]
    fn pads_small_blocks() {
        let mut dsk = [0u8; DSK_SIZE];
        dsk[1] = 7;
        assert_eq!(dsk_to_string(&dsk), "00007-00000-00000-00000-00000-00000-00000-00000");
    }

    #[test]
    fn rejects_malformed_strings() {
        for bad in [
            "",
            "34028-23669-20938-46346-33746-07431-56821",
            "34028-23669-20938-46346-33746-07431-56821-1328",
            "34028-23669-20938-46346-33746-07431-56821-13289-",
            "34028 23669 20938 46346 33746 07431 56821 13289",
            "3402a-23669-20938-46346-33746-07431-56821-13289",
            "34028-23669-20938-46346-33746-07431-5682113289",
        ] {
            assert_eq!(dsk_from_string(bad), Err(DskError::InvalidFormat), "{bad:?}");
            assert!(!is_valid_dsk(bad));
        }
    }

    #[test]
    fn rejects_blocks_above_u16() {
        assert_eq!(
            dsk_from_string("65536-23669-20938-46346-33746-07431-56821-13289"),
            Err(DskError::BlockOutOfRange { index: 0, value: 65536 })
        );
        assert!(is_valid_dsk("65535-23669-20938-46346-33746-07431-56821-13289"));
    }

    #[test]
    fn lenient_parse_strips_prefix_and_whitespace() {
        let expected = dsk_from_string(SAMPLE).ok();
        assert_eq!(try_parse_dsk(&format!("  {SAMPLE}\n")), expected);
        assert_eq!(try_parse_dsk(&format!("zws2dsk:{SAMPLE}")), expected);
        assert_eq!(try_parse_dsk("zws2dsk:"), None);
        assert!(!is_valid_dsk(&format!("zws2dsk:{SAMPLE}")));
    }
}
