/// UID2Clip - Sends smart card and RFID tag UIDs to the clipboard
///
/// This library reads UIDs from PC/SC readers or keyboard-emulating readers,
/// converts them between vendor UID formats and writes them to the clipboard.
pub mod cli;
pub mod core;
pub mod error;

// Re-export commonly used types
pub use crate::core::{
    codec::{format_uid, parse_uid, UidFormat},
    monitor::{CardMonitor, MonitorState, PendingUid},
    reader::{CardEvent, CardEventSource, CardTransport, PcscTransport},
    sink::{Clipboard, ClipboardSink, FlushOutcome},
};
pub use error::{TransportError, UidError};

// Common error type
pub type Result<T> = anyhow::Result<T>;
