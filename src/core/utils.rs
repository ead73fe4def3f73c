use anyhow::{bail, Context, Result};

use crate::error::UidError;

/// Parse a hex string into bytes
/// Supports various formats:
/// - "04A1B2C3" (pure hex)
/// - "04-A1-B2-C3" (hyphenated, as stored for a pending UID)
/// - "04 A1 B2 C3" (space-separated)
/// - "04:A1:B2:C3" (colon-separated)
pub fn parse_hex(hex_str: &str) -> Result<Vec<u8>> {
    let cleaned = clean_hex_string(hex_str);

    if cleaned.is_empty() {
        return Ok(Vec::new());
    }

    if cleaned.len() % 2 != 0 {
        bail!(
            "Hex string must have even number of characters: '{}'",
            hex_str
        );
    }

    hex::decode(&cleaned).with_context(|| format!("Invalid hex string: '{hex_str}'"))
}

/// Clean a hex string by removing common separators
fn clean_hex_string(hex_str: &str) -> String {
    hex_str
        .trim()
        .replace([' ', ',', ':', '-', '\t', '\n', '\r'], "")
        .to_uppercase()
}

/// Format bytes as a hex string
pub fn format_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Format bytes as hyphen-delimited hex ("04-A1-B2-C3")
pub fn format_hex_dashed(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join("-")
}

/// How raw UID bytes are rendered when no codec format is requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawUidFormat {
    /// Reverse the byte order before rendering.
    pub reversed: bool,
    /// Render all bytes as one big-endian decimal number.
    pub decimal: bool,
    /// Joins hex bytes; ignored for decimal output.
    pub separator: String,
}

/// Render a hyphenated raw UID ("04-A1-B2-C3") for output.
///
/// The default settings give ungrouped uppercase hex with leading zero bytes
/// kept.
pub fn render_raw_uid(raw: &str, format: &RawUidFormat) -> Result<String, UidError> {
    let mut bytes = parse_hex(raw).map_err(|e| UidError::InvalidInput(format!("{e:#}")))?;

    if format.reversed {
        bytes.reverse();
    }

    if format.decimal {
        if bytes.len() > 8 {
            return Err(UidError::InvalidInput(format!(
                "{} bytes do not fit in a 64-bit number",
                bytes.len()
            )));
        }
        let value = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        return Ok(value.to_string());
    }

    Ok(bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(&format.separator))
}

/// Get a human-readable description of SW1/SW2 status words
pub fn describe_status_word(sw1: u8, sw2: u8) -> String {
    match (sw1, sw2) {
        (0x90, 0x00) => "Success".to_string(),
        (0x61, n) => format!("Success, {n} bytes available"),
        (0x62, 0x82) => "Warning: End of file reached".to_string(),
        (0x63, 0x00) => "Warning: No information given".to_string(),
        (0x67, 0x00) => "Error: Wrong length".to_string(),
        (0x68, 0x00) => "Error: Functions in CLA not supported".to_string(),
        (0x69, 0x82) => "Error: Security status not satisfied".to_string(),
        (0x6A, 0x81) => "Error: Function not supported".to_string(),
        (0x6A, 0x82) => "Error: File not found".to_string(),
        (0x6B, 0x00) => "Error: Wrong parameter(s) P1-P2".to_string(),
        (0x6C, n) => format!("Error: Wrong Le field, exact length: {n}"),
        (0x6D, 0x00) => "Error: Instruction code not supported or invalid".to_string(),
        (0x6E, 0x00) => "Error: Class not supported".to_string(),
        (0x6F, 0x00) => "Error: No precise diagnosis".to_string(),
        _ => format!("Unknown status: {sw1:02X} {sw2:02X}"),
    }
}
