use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Text clipboard capability
#[cfg_attr(test, mockall::automock)]
pub trait Clipboard {
    fn get_text(&mut self) -> Result<String>;
    fn set_text(&mut self, text: &str) -> Result<()>;
}

/// A value that was written to the clipboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipboardWrite {
    pub timestamp: DateTime<Utc>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Written(ClipboardWrite),
    /// The clipboard already held the value.
    Unchanged,
}

/// Writes UIDs to a clipboard, skipping values it already holds.
pub struct ClipboardSink<C> {
    clipboard: C,
}

impl<C: Clipboard> ClipboardSink<C> {
    pub fn new(clipboard: C) -> Self {
        Self { clipboard }
    }

    /// Write `candidate` unless the clipboard already contains it.
    ///
    /// An unreadable clipboard counts as different. Write failures are
    /// returned as-is, nothing is retried.
    pub fn flush(&mut self, candidate: &str) -> Result<FlushOutcome> {
        match self.clipboard.get_text() {
            Ok(current) if current == candidate => {
                log::debug!("Clipboard already holds {candidate}");
                return Ok(FlushOutcome::Unchanged);
            }
            Ok(_) => {}
            Err(e) => log::debug!("Could not read clipboard: {e:#}"),
        }

        self.clipboard.set_text(candidate)?;

        Ok(FlushOutcome::Written(ClipboardWrite {
            timestamp: Utc::now(),
            value: candidate.to_string(),
        }))
    }

    pub fn clipboard(&self) -> &C {
        &self.clipboard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use mockall::Sequence;

    #[test]
    fn test_flush_writes_new_value() {
        let mut clipboard = MockClipboard::new();
        clipboard
            .expect_get_text()
            .times(1)
            .returning(|| Ok("something else".to_string()));
        clipboard
            .expect_set_text()
            .with(eq("04A1B2C3"))
            .times(1)
            .returning(|_| Ok(()));

        let mut sink = ClipboardSink::new(clipboard);
        match sink.flush("04A1B2C3").unwrap() {
            FlushOutcome::Written(write) => assert_eq!(write.value, "04A1B2C3"),
            FlushOutcome::Unchanged => panic!("Expected a clipboard write"),
        }
    }

    #[test]
    fn test_flush_twice_writes_once() {
        let mut clipboard = MockClipboard::new();
        let mut seq = Sequence::new();
        clipboard
            .expect_get_text()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(String::new()));
        clipboard
            .expect_set_text()
            .with(eq("1A2B3C"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        clipboard
            .expect_get_text()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok("1A2B3C".to_string()));

        let mut sink = ClipboardSink::new(clipboard);
        assert!(matches!(sink.flush("1A2B3C").unwrap(), FlushOutcome::Written(_)));
        assert_eq!(sink.flush("1A2B3C").unwrap(), FlushOutcome::Unchanged);
    }

    #[test]
    fn test_flush_with_unreadable_clipboard() {
        let mut clipboard = MockClipboard::new();
        clipboard
            .expect_get_text()
            .returning(|| Err(anyhow::anyhow!("no display")));
        clipboard.expect_set_text().times(1).returning(|_| Ok(()));

        let mut sink = ClipboardSink::new(clipboard);
        assert!(matches!(sink.flush("42").unwrap(), FlushOutcome::Written(_)));
    }

    #[test]
    fn test_flush_write_failure() {
        let mut clipboard = MockClipboard::new();
        clipboard.expect_get_text().returning(|| Ok(String::new()));
        clipboard
            .expect_set_text()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("clipboard locked")));

        let mut sink = ClipboardSink::new(clipboard);
        let err = sink.flush("42").unwrap_err();
        assert!(err.to_string().contains("clipboard locked"));
    }

    #[test]
    fn test_clipboard_write_serialization() {
        let write = ClipboardWrite {
            timestamp: Utc::now(),
            value: "0000002570".to_string(),
        };
        let json = serde_json::to_string(&write).unwrap();
        assert!(json.contains("\"value\":\"0000002570\""));
        assert!(json.contains("\"timestamp\""));
    }
}
