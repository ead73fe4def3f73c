use crate::core::reader::CardTransport;
use crate::core::utils::{describe_status_word, format_hex};
use crate::error::TransportError;

/// Class byte for reader-handled pseudo APDUs
pub const CLA_READER: u8 = 0xFF;

/// GET DATA instruction
pub const INS_GET_DATA: u8 = 0xCA;

/// GET DATA with P1=P2=0 asks the reader for the card UID. Le=0 accepts up to
/// 256 bytes since the UID length is unknown.
pub const GET_UID_APDU: [u8; 5] = [CLA_READER, INS_GET_DATA, 0x00, 0x00, 0x00];

/// A response APDU split into its data field and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseApdu {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl ResponseApdu {
    /// Split a raw response; anything shorter than a status word has no data
    pub fn from_bytes(raw: &[u8]) -> Self {
        if raw.len() < 2 {
            return Self {
                data: Vec::new(),
                sw1: 0,
                sw2: 0,
            };
        }

        let (data, sw) = raw.split_at(raw.len() - 2);
        Self {
            data: data.to_vec(),
            sw1: sw[0],
            sw2: sw[1],
        }
    }

    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }
}

/// Read the UID of the card currently in `reader`.
///
/// Returns `Ok(None)` if the response carried no data bytes.
pub fn read_uid(
    transport: &dyn CardTransport,
    reader: &str,
) -> Result<Option<Vec<u8>>, TransportError> {
    let raw = transport.transmit(reader, &GET_UID_APDU)?;
    let response = ResponseApdu::from_bytes(&raw);

    log::debug!(
        "GET DATA on {}: data={} status={:02X} {:02X} ({})",
        reader,
        format_hex(&response.data),
        response.sw1,
        response.sw2,
        describe_status_word(response.sw1, response.sw2)
    );

    if response.has_data() {
        Ok(Some(response.data))
    } else {
        Ok(None)
    }
}
