use thiserror::Error;

use crate::core::codec::UidFormat;

/// Errors raised while reading, converting or delivering a UID.
#[derive(Debug, Error)]
pub enum UidError {
    /// The text is not a well-formed UID for the requested format.
    #[error("Invalid UID input: {0}")]
    InvalidInput(String),

    /// The format has no encoding rule in the requested direction.
    #[error("Unsupported UID format: {0}")]
    UnsupportedFormat(UidFormat),

    /// Automatic byte grouping ran out of slots.
    ///
    /// Grouping picks 4 or 7 slots from the input length alone, so hex strings
    /// longer than 14 digits never fit.
    #[error("{digits} hex digits do not fit in {slots} byte groups")]
    GroupOverflow { digits: usize, slots: usize },

    #[error("No smart card readers found")]
    NoReadersFound,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to spawn reader monitor: {0}")]
    Watcher(#[from] std::io::Error),
}

/// Failures reported by a card transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    #[error("Invalid reader name: {0:?}")]
    InvalidReaderName(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    /// Numeric SCARD error code, when the failure came from PC/SC.
    pub fn code(&self) -> Option<u32> {
        match self {
            TransportError::Pcsc(e) => Some(*e as u32),
            _ => None,
        }
    }
}
