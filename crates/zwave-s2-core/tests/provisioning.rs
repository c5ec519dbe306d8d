//! DSK strings and provisioning QR codes.

use proptest::prelude::*;
use zwave_s2_core::{
    DskError, QrProvisioningInformation, SecurityClass,
    dsk::{DSK_URI_PREFIX, dsk_from_string, dsk_pin, dsk_to_string, is_valid_dsk, try_parse_dsk},
    parse_qr_code_string,
    qr::try_parse_dsk_from_qr_code_string,
};

const S2_CODE: &str =
    "900059492135340282366920938463463374607431568211328900100409701537022000000000040000300537";

proptest! {
    /// Any DSK formats to eight five-digit groups and parses back.
    #[test]
    fn prop_formatted_dsk_is_valid(dsk in any::<[u8; 16]>()) {
        let text = dsk_to_string(&dsk);

        prop_assert_eq!(text.len(), 47);
        prop_assert!(text.split('-').all(|group| group.len() == 5));
        prop_assert_eq!(dsk_from_string(&text), Ok(dsk));
        prop_assert_eq!(try_parse_dsk(&format!("{DSK_URI_PREFIX}{text}")), Some(dsk));
        prop_assert_eq!(text[..5].parse::<u16>().ok(), Some(dsk_pin(&dsk)));
    }

    /// Groups above 65535 are rejected with their position.
    #[test]
    fn prop_out_of_range_group_rejected(index in 0usize..8, value in 65_536u32..100_000) {
        let mut groups = vec!["00000".to_owned(); 8];
        groups[index] = format!("{value:05}");

        prop_assert_eq!(
            dsk_from_string(&groups.join("-")),
            Err(DskError::BlockOutOfRange { index, value })
        );
    }

    /// Parsers never panic on arbitrary input.
    #[test]
    fn prop_parsers_are_total(input in "\\PC{0,120}", digits in "9[0-9]{0,160}") {
        let _ = try_parse_dsk(&input);
        let _ = parse_qr_code_string(&input);
        let _ = parse_qr_code_string(&digits);
        let _ = try_parse_dsk_from_qr_code_string(&digits);
    }
}

#[test]
fn documented_sample_parses() {
    assert!(is_valid_dsk("12345-12345-12345-12345-12345-12345-12345-12345"));
    assert!(!is_valid_dsk("12345-12345-12345-12345-12345-12345-12345"));
    assert!(!is_valid_dsk("12345-12345-12345-12345-12345-12345-12345-123456"));
    assert!(!is_valid_dsk("12345_12345_12345_12345_12345_12345_12345_12345"));
}

/// Provisioning entries are persisted by the driver; the granted subset
/// must survive a round trip.
#[test]
fn provisioning_entry_survives_cbor() {
    let mut info = parse_qr_code_string(S2_CODE).unwrap();
    info.retain_security_classes(&[SecurityClass::S2Unauthenticated, SecurityClass::S0Legacy]);

    let mut encoded = Vec::new();
    ciborium::into_writer(&info, &mut encoded).unwrap();
    let decoded: QrProvisioningInformation = ciborium::from_reader(encoded.as_slice()).unwrap();

    assert_eq!(decoded, info);
    assert_eq!(
        decoded.security_classes(),
        &[SecurityClass::S2Unauthenticated, SecurityClass::S0Legacy]
    );
    assert_eq!(try_parse_dsk_from_qr_code_string(S2_CODE), Some(info.dsk));
}
