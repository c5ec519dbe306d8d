//! Fuzz target for DSK and QR code parsing
//!
//! Both parsers take user-supplied text (typed DSKs, scanned QR codes).
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - A parsed DSK formats back to the canonical string
//! - The QR shortcut agrees with the full parser

#![no_main]

use libfuzzer_sys::fuzz_target;
use zwave_s2_core::{
    dsk::{dsk_to_string, try_parse_dsk},
    parse_qr_code_string,
    qr::try_parse_dsk_from_qr_code_string,
};

fuzz_target!(|input: &str| {
    if let Some(dsk) = try_parse_dsk(input) {
        let canonical = dsk_to_string(&dsk);
        assert_eq!(try_parse_dsk(&canonical), Some(dsk));
    }

    let full = parse_qr_code_string(input).ok().map(|info| info.dsk);
    assert_eq!(try_parse_dsk_from_qr_code_string(input), full);
});
