//! Provisioning QR code parsing.
//!
//! The QR payload is a string of decimal digits:
//!
//! ```text
//! 90 | VV | CCCCC | KKK | DSK (8 x 5 digits) | TLV*
//!      │     │       │
//!      │     │       └─ requested keys bitmask
//!      │     └───────── first 2 bytes of SHA-1 over everything after it
//!      └─────────────── 00 = S2, 01 = SmartStart
//!
//! TLV = TT (type << 1 | critical) | LL (data length) | data
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use zwave_s2_crypto::DSK_SIZE;

use crate::{
    dsk::dsk_to_string,
    error::QrCodeError,
    security_class::{SecurityClass, security_classes_from_bitmask},
};

const LEAD_IN: &str = "90";
const CHECKSUM_OFFSET: usize = 4;
const PAYLOAD_OFFSET: usize = 9;
const MIN_QR_CODE_LENGTH: usize = 52;

const TLV_PRODUCT_TYPE: u8 = 0;
const TLV_PRODUCT_ID: u8 = 1;
const TLV_MAX_INCLUSION_REQUEST_INTERVAL: u8 = 2;
const TLV_UUID16: u8 = 3;
const TLV_SUPPORTED_PROTOCOLS: u8 = 4;

/// Seconds per unit of the max inclusion request interval
const INCLUSION_INTERVAL_UNIT_SECS: u64 = 128;

/// Kind of provisioning QR code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QrCodeVersion {
    /// Plain S2 inclusion
    S2,
    /// SmartStart provisioning
    SmartStart,
}

/// Radio protocols a device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// Z-Wave mesh
    ZWave,
    /// Z-Wave Long Range
    ZWaveLongRange,
}

/// Everything a provisioning QR code carries.
///
/// The granted class list starts as the requested list and can only shrink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrProvisioningInformation {
    /// Code kind
    pub version: QrCodeVersion,
    /// Classes the device asks for
    pub requested_security_classes: Vec<SecurityClass>,
    security_classes: Vec<SecurityClass>,
    /// Device specific key
    pub dsk: [u8; DSK_SIZE],
    /// Generic device class
    pub generic_device_class: u8,
    /// Specific device class
    pub specific_device_class: u8,
    /// Installer icon type
    pub installer_icon_type: u16,
    /// Manufacturer id
    pub manufacturer_id: u16,
    /// Product type
    pub product_type: u16,
    /// Product id
    pub product_id: u16,
    /// Firmware version as `major.minor`
    pub application_version: String,
    /// How often a SmartStart device repeats its inclusion request
    pub max_inclusion_request_interval: Option<Duration>,
    /// Device UUID in its presentation format
    pub uuid: Option<String>,
    /// Supported radio protocols
    pub supported_protocols: Option<Vec<Protocol>>,
}

impl QrProvisioningInformation {
    /// Classes that will be granted.
    pub fn security_classes(&self) -> &[SecurityClass] {
        &self.security_classes
    }

    /// Refuse one class.
    pub fn deny_security_class(&mut self, class: SecurityClass) {
        self.security_classes.retain(|&c| c != class);
    }

    /// Keep only classes in `allowed`.
    pub fn retain_security_classes(&mut self, allowed: &[SecurityClass]) {
        self.security_classes.retain(|c| allowed.contains(c));
    }

    /// DSK in display form.
    pub fn dsk_string(&self) -> String {
        dsk_to_string(&self.dsk)
    }
}

/// Parse a provisioning QR code.
///
/// Leading and trailing whitespace is ignored. Unknown TLVs are skipped
/// unless marked critical.
///
/// # Errors
///
/// See [`QrCodeError`].
pub fn parse_qr_code_string(input: &str) -> Result<QrProvisioningInformation, QrCodeError> {
    let qr = input.trim();
    if !qr.starts_with(LEAD_IN) {
        return Err(QrCodeError::InvalidLeadIn);
    }
    if qr.len() < MIN_QR_CODE_LENGTH {
        return Err(QrCodeError::TooShort { actual: qr.len() });
    }
    if !qr.bytes().all(|b| b.is_ascii_digit()) {
        return Err(QrCodeError::InvalidCharacters);
    }

    let mut reader = DigitReader::new(qr, LEAD_IN.len());

    let version = match reader.read(2, "version")? {
        0 => QrCodeVersion::S2,
        1 => QrCodeVersion::SmartStart,
        other => return Err(QrCodeError::UnsupportedVersion(other as u8)),
    };

    debug_assert_eq!(reader.offset, CHECKSUM_OFFSET);
    let checksum = reader.read_u16("checksum")?;
    let expected = payload_checksum(&qr[PAYLOAD_OFFSET..]);
    if checksum != expected {
        return Err(QrCodeError::ChecksumMismatch { expected, actual: checksum });
    }

    let keys = reader.read_u8("requested keys")?;
    let requested_security_classes = security_classes_from_bitmask(keys)
        .map_err(|_| QrCodeError::FieldOutOfRange { field: "requested keys", value: u32::from(keys) })?;

    let mut dsk = [0u8; DSK_SIZE];
    for pair in dsk.chunks_exact_mut(2) {
        pair.copy_from_slice(&reader.read_u16("dsk")?.to_be_bytes());
    }

    let mut product_type = None;
    let mut product_id = None;
    let mut max_inclusion_request_interval = None;
    let mut uuid = None;
    let mut supported_protocols = None;

    while !reader.is_empty() {
        let tlv = reader.read_tlv()?;
        match tlv.tlv_type {
            TLV_PRODUCT_TYPE => product_type = Some(parse_product_type(&tlv)?),
            TLV_PRODUCT_ID => product_id = Some(parse_product_id(&tlv)?),
            TLV_MAX_INCLUSION_REQUEST_INTERVAL => {
                max_inclusion_request_interval = Some(parse_inclusion_interval(&tlv)?);
            },
            TLV_UUID16 => uuid = Some(parse_uuid16(&tlv)?),
            TLV_SUPPORTED_PROTOCOLS => supported_protocols = Some(parse_supported_protocols(&tlv)?),
            unknown if tlv.critical => return Err(QrCodeError::UnsupportedCriticalTlv(unknown)),
            _ => {},
        }
    }

    let (generic_device_class, specific_device_class, installer_icon_type) =
        product_type.ok_or(QrCodeError::MissingRequiredTlv("product type"))?;
    let (manufacturer_id, product_type, product_id, application_version) =
        product_id.ok_or(QrCodeError::MissingRequiredTlv("product id"))?;

    Ok(QrProvisioningInformation {
        version,
        security_classes: requested_security_classes.clone(),
        requested_security_classes,
        dsk,
        generic_device_class,
        specific_device_class,
        installer_icon_type,
        manufacturer_id,
        product_type,
        product_id,
        application_version,
        max_inclusion_request_interval,
        uuid,
        supported_protocols,
    })
}

/// Extract only the DSK, for callers that do not need the rest.
pub fn try_parse_dsk_from_qr_code_string(input: &str) -> Option<[u8; DSK_SIZE]> {
    parse_qr_code_string(input).ok().map(|info| info.dsk)
}

fn payload_checksum(payload: &str) -> u16 {
    let digest = Sha1::digest(payload.as_bytes());
    u16::from_be_bytes([digest[0], digest[1]])
}

struct Tlv<'a> {
    tlv_type: u8,
    critical: bool,
    data: &'a str,
}

/// Cursor over fixed-width decimal fields.
struct DigitReader<'a> {
    input: &'a str,
    offset: usize,
}

impl<'a> DigitReader<'a> {
    fn new(input: &'a str, offset: usize) -> Self {
        Self { input, offset }
    }

    fn is_empty(&self) -> bool {
        self.offset >= self.input.len()
    }

    fn take(&mut self, width: usize) -> Option<&'a str> {
        let field = self.input.get(self.offset..self.offset + width)?;
        self.offset += width;
        Some(field)
    }

    fn read(&mut self, width: usize, field: &'static str) -> Result<u32, QrCodeError> {
        let offset = self.offset;
        let digits = self.take(width).ok_or(QrCodeError::IncompleteTlv { offset })?;
        parse_digits(digits).ok_or(QrCodeError::FieldOutOfRange { field, value: 0 })
    }

    fn read_u8(&mut self, field: &'static str) -> Result<u8, QrCodeError> {
        let value = self.read(3, field)?;
        u8::try_from(value).map_err(|_| QrCodeError::FieldOutOfRange { field, value })
    }

    fn read_u16(&mut self, field: &'static str) -> Result<u16, QrCodeError> {
        let value = self.read(5, field)?;
        u16::try_from(value).map_err(|_| QrCodeError::FieldOutOfRange { field, value })
    }

    fn read_tlv(&mut self) -> Result<Tlv<'a>, QrCodeError> {
        let offset = self.offset;
        let incomplete = QrCodeError::IncompleteTlv { offset };

        let type_critical = self.take(2).and_then(parse_digits).ok_or(incomplete.clone())?;
        let length = self.take(2).and_then(parse_digits).ok_or(incomplete.clone())?;
        let data = self.take(length as usize).ok_or(incomplete)?;

        Ok(Tlv { tlv_type: (type_critical >> 1) as u8, critical: type_critical & 1 == 1, data })
    }
}

fn parse_digits(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn tlv_reader<'a>(tlv: &Tlv<'a>, expected_len: usize) -> Result<DigitReader<'a>, QrCodeError> {
    if tlv.data.len() != expected_len {
        return Err(QrCodeError::InvalidTlv { tlv_type: tlv.tlv_type });
    }
    Ok(DigitReader::new(tlv.data, 0))
}

fn parse_product_type(tlv: &Tlv<'_>) -> Result<(u8, u8, u16), QrCodeError> {
    let mut reader = tlv_reader(tlv, 10)?;
    let [generic, specific] = reader.read_u16("device class")?.to_be_bytes();
    let icon = reader.read_u16("installer icon")?;
    Ok((generic, specific, icon))
}

fn parse_product_id(tlv: &Tlv<'_>) -> Result<(u16, u16, u16, String), QrCodeError> {
    let mut reader = tlv_reader(tlv, 20)?;
    let manufacturer_id = reader.read_u16("manufacturer id")?;
    let product_type = reader.read_u16("product type")?;
    let product_id = reader.read_u16("product id")?;
    let [major, minor] = reader.read_u16("application version")?.to_be_bytes();
    Ok((manufacturer_id, product_type, product_id, format!("{major}.{minor:02}")))
}

fn parse_inclusion_interval(tlv: &Tlv<'_>) -> Result<Duration, QrCodeError> {
    let mut reader = tlv_reader(tlv, 3)?;
    let units = reader.read_u8("max inclusion request interval")?;
    if !(5..=99).contains(&units) {
        return Err(QrCodeError::FieldOutOfRange {
            field: "max inclusion request interval",
            value: u32::from(units),
        });
    }
    Ok(Duration::from_secs(u64::from(units) * INCLUSION_INTERVAL_UNIT_SECS))
}

fn parse_uuid16(tlv: &Tlv<'_>) -> Result<String, QrCodeError> {
    let mut reader = tlv_reader(tlv, 42)?;
    let format = reader.read(2, "uuid presentation format")?;

    let mut bytes = [0u8; 16];
    for pair in bytes.chunks_exact_mut(2) {
        pair.copy_from_slice(&reader.read_u16("uuid")?.to_be_bytes());
    }

    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    let ascii: String = bytes.iter().map(|&b| char::from(b & 0x7f)).collect();

    let uuid = match format {
        0 => hex,
        1 => ascii,
        2 => format!("sn:{hex}"),
        3 => format!("sn:{ascii}"),
        4 => format!("UUID:{hex}"),
        5 => format!("UUID:{ascii}"),
        6 => format!(
            "{}-{}-{}-{}-{}",
            &hex[..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..]
        ),
        _ => return Err(QrCodeError::InvalidTlv { tlv_type: tlv.tlv_type }),
    };
    Ok(uuid)
}

fn parse_supported_protocols(tlv: &Tlv<'_>) -> Result<Vec<Protocol>, QrCodeError> {
    let mask = match tlv.data.len() {
        2 | 3 | 5 => parse_digits(tlv.data),
        _ => None,
    }
    .ok_or(QrCodeError::InvalidTlv { tlv_type: tlv.tlv_type })?;

    let mut protocols = Vec::new();
    if mask & 0b01 != 0 {
        protocols.push(Protocol::ZWave);
    }
    if mask & 0b10 != 0 {
        protocols.push(Protocol::ZWaveLongRange);
    }
    Ok(protocols)
}
