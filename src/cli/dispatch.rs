use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{
    codec::{format_uid, parse_uid, UidFormat},
    monitor::{CardMonitor, MonitorState, PendingUid, DEFAULT_POLL_INTERVAL},
    sink::{Clipboard, ClipboardSink, FlushOutcome},
    utils::{render_raw_uid, RawUidFormat},
};
use crate::error::UidError;

/// A keypress as seen by the reader loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPress {
    /// Control+Q
    Quit,
    Other,
}

pub trait KeySource {
    /// Wait up to `timeout` for a keypress.
    fn poll_key(&mut self, timeout: Duration) -> Result<Option<KeyPress>>;
}

/// Keypresses from the terminal, which is held in raw mode while this lives.
pub struct TerminalKeys {
    _private: (),
}

impl TerminalKeys {
    pub fn enable() -> Result<Self> {
        terminal::enable_raw_mode().context("Failed to enable raw terminal mode")?;
        Ok(Self { _private: () })
    }
}

impl KeySource for TerminalKeys {
    fn poll_key(&mut self, timeout: Duration) -> Result<Option<KeyPress>> {
        if !event::poll(timeout).context("Failed to poll terminal")? {
            return Ok(None);
        }

        match event::read().context("Failed to read terminal event")? {
            Event::Key(key) if key.kind == KeyEventKind::Press => Ok(Some(classify_key(&key))),
            _ => Ok(None),
        }
    }
}

impl Drop for TerminalKeys {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

pub fn classify_key(key: &KeyEvent) -> KeyPress {
    let quit = key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('q') | KeyCode::Char('Q'));

    if quit {
        KeyPress::Quit
    } else {
        KeyPress::Other
    }
}

/// Writer that ends lines with CRLF, for output while the terminal is in
/// raw mode.
pub struct CrlfWriter<W> {
    inner: W,
}

impl<W: Write> CrlfWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> Write for CrlfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut lines = buf.split(|b| *b == b'\n');
        if let Some(first) = lines.next() {
            self.inner.write_all(first)?;
        }
        for line in lines {
            self.inner.write_all(b"\r\n")?;
            self.inner.write_all(line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportStyle {
    #[default]
    Text,
    /// One JSON object per clipboard write
    Json,
}

/// Tell the operator about a flush result
pub fn report<W: Write>(out: &mut W, outcome: &FlushOutcome, style: ReportStyle) -> Result<()> {
    let FlushOutcome::Written(entry) = outcome else {
        return Ok(());
    };

    match style {
        ReportStyle::Text => writeln!(out, "Wrote {} to the Clipboard", entry.value)?,
        ReportStyle::Json => writeln!(
            out,
            "{}",
            serde_json::to_string(entry).context("Failed to serialize clipboard write")?
        )?,
    }
    out.flush()?;
    Ok(())
}

fn flush_and_report<C: Clipboard, W: Write>(
    sink: &mut ClipboardSink<C>,
    value: &str,
    style: ReportStyle,
    out: &mut W,
) -> Result<()> {
    match sink.flush(value) {
        Ok(outcome) => report(out, &outcome, style),
        Err(e) => {
            log::error!("Clipboard write failed: {e:#}");
            writeln!(out, "Error: {e:#}")?;
            Ok(())
        }
    }
}

/// Settings for keyboard-emulating readers
#[derive(Debug, Clone)]
pub struct KeyboardOptions {
    pub input_format: UidFormat,
    pub output_format: UidFormat,
    pub separator: Option<char>,
    pub style: ReportStyle,
}

/// Convert one line typed by a keyboard-emulating reader
pub fn convert_line(line: &str, options: &KeyboardOptions) -> Result<String, UidError> {
    let value = parse_uid(options.input_format, line, options.separator)?;
    format_uid(value, options.output_format)
}

/// Read UIDs line by line until an empty line or end of input.
///
/// Malformed lines are reported and skipped. An unset input or output format
/// is fatal since keyboard-emulating readers cannot describe their format.
pub fn run_keyboard<R, C, W>(
    input: R,
    options: &KeyboardOptions,
    sink: &mut ClipboardSink<C>,
    out: &mut W,
) -> Result<()>
where
    R: BufRead,
    C: Clipboard,
    W: Write,
{
    if options.input_format == UidFormat::Default {
        return Err(UidError::UnsupportedFormat(UidFormat::Default))
            .context("Input format cannot be default for keyboard-emulating readers");
    }
    if options.output_format == UidFormat::Default {
        return Err(UidError::UnsupportedFormat(UidFormat::Default))
            .context("Output format cannot be default");
    }

    for line in input.lines() {
        let line = line.context("Failed to read input")?;
        let line = line.trim_end_matches('\r');

        if line.is_empty() {
            break;
        }

        match convert_line(line, options) {
            Ok(text) => flush_and_report(sink, &text, options.style, out)?,
            Err(e @ (UidError::InvalidInput(_) | UidError::GroupOverflow { .. })) => {
                log::warn!("Skipping '{line}': {e}");
                writeln!(out, "Error: {e}")?;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to convert '{line}'")),
        }
    }

    writeln!(out, "Exiting")?;
    Ok(())
}

/// How a UID read from a contact reader is turned into clipboard text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UidRendering {
    /// Byte-level rendering of the hyphenated UID.
    Raw(RawUidFormat),
    /// Through the codec: read as hex, written in the given format.
    Codec(UidFormat),
}

impl Default for UidRendering {
    fn default() -> Self {
        UidRendering::Raw(RawUidFormat::default())
    }
}

impl UidRendering {
    pub fn render(&self, raw: &str) -> Result<String, UidError> {
        match self {
            UidRendering::Raw(format) => render_raw_uid(raw, format),
            UidRendering::Codec(format) => {
                let value = parse_uid(UidFormat::Hex, raw, Some('-'))?;
                format_uid(value, *format)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Dispatch loop for contact readers: flushes pending UIDs and reacts to
/// keypresses once per tick.
pub struct ContactLoop<C, K, W> {
    monitor: CardMonitor,
    pending: Arc<PendingUid>,
    keys: K,
    sink: ClipboardSink<C>,
    rendering: UidRendering,
    style: ReportStyle,
    out: W,
    poll_interval: Duration,
}

impl<C, K, W> ContactLoop<C, K, W>
where
    C: Clipboard,
    K: KeySource,
    W: Write,
{
    pub fn new(
        monitor: CardMonitor,
        pending: Arc<PendingUid>,
        keys: K,
        sink: ClipboardSink<C>,
        out: W,
    ) -> Self {
        Self {
            monitor,
            pending,
            keys,
            sink,
            rendering: UidRendering::default(),
            style: ReportStyle::default(),
            out,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_rendering(mut self, rendering: UidRendering) -> Self {
        self.rendering = rendering;
        self
    }

    pub fn with_style(mut self, style: ReportStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn monitor(&self) -> &CardMonitor {
        &self.monitor
    }

    pub fn sink(&self) -> &ClipboardSink<C> {
        &self.sink
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Run until Control+Q
    pub fn run(&mut self) -> Result<()> {
        while self.tick()? == Flow::Continue {}
        Ok(())
    }

    pub fn tick(&mut self) -> Result<Flow> {
        if let Some(raw) = self.pending.take() {
            self.deliver(&raw)?;
        }

        match self.keys.poll_key(self.poll_interval)? {
            Some(KeyPress::Quit) => return Ok(Flow::Exit),
            Some(KeyPress::Other) => match self.monitor.toggle()? {
                MonitorState::Paused => {
                    writeln!(self.out, "Monitoring paused. (Press CTRL-Q to quit)")?
                }
                MonitorState::Monitoring => {
                    writeln!(self.out, "Monitoring started. (Press CTRL-Q to quit)")?
                }
                MonitorState::Idle => {}
            },
            None => {}
        }

        self.out.flush()?;
        Ok(Flow::Continue)
    }

    fn deliver(&mut self, raw: &str) -> Result<()> {
        match self.rendering.render(raw) {
            Ok(text) => flush_and_report(&mut self.sink, &text, self.style, &mut self.out),
            Err(e) => {
                log::warn!("Cannot convert UID {raw}: {e}");
                writeln!(self.out, "Error: cannot convert UID {raw}: {e}")?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reader::{CardEvent, CardEventSource, CardTransport};
    use crate::error::TransportError;
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// In-memory clipboard recording every write
    #[derive(Default)]
    struct MemoryClipboard {
        text: String,
        writes: Vec<String>,
    }

    impl Clipboard for MemoryClipboard {
        fn get_text(&mut self) -> Result<String> {
            Ok(self.text.clone())
        }

        fn set_text(&mut self, text: &str) -> Result<()> {
            self.text = text.to_string();
            self.writes.push(text.to_string());
            Ok(())
        }
    }

    struct ScriptedKeys(VecDeque<Option<KeyPress>>);

    impl KeySource for ScriptedKeys {
        fn poll_key(&mut self, _timeout: Duration) -> Result<Option<KeyPress>> {
            Ok(self.0.pop_front().unwrap_or(Some(KeyPress::Quit)))
        }
    }

    struct NoTransport;

    impl CardTransport for NoTransport {
        fn list_readers(&self) -> Result<Vec<String>, TransportError> {
            Ok(Vec::new())
        }

        fn transmit(&self, _reader: &str, _command: &[u8]) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::Unavailable("no card".to_string()))
        }
    }

    struct SilentSource;

    impl CardEventSource for SilentSource {
        fn next_event(
            &mut self,
            _readers: &[String],
            timeout: Duration,
        ) -> Result<Option<CardEvent>, TransportError> {
            std::thread::sleep(timeout);
            Ok(None)
        }
    }

    fn keyboard_options(input: UidFormat, output: UidFormat) -> KeyboardOptions {
        KeyboardOptions {
            input_format: input,
            output_format: output,
            separator: Some('-'),
            style: ReportStyle::Text,
        }
    }

    fn contact_loop(
        keys: Vec<Option<KeyPress>>,
    ) -> (
        ContactLoop<MemoryClipboard, ScriptedKeys, Vec<u8>>,
        Arc<PendingUid>,
    ) {
        let pending = Arc::new(PendingUid::new());
        let mut monitor = CardMonitor::new(
            Arc::new(NoTransport),
            Box::new(SilentSource),
            Arc::clone(&pending),
        )
        .with_poll_interval(Duration::from_millis(5));
        monitor.start(&["Test Reader".to_string()]).unwrap();

        let contact = ContactLoop::new(
            monitor,
            Arc::clone(&pending),
            ScriptedKeys(keys.into()),
            ClipboardSink::new(MemoryClipboard::default()),
            Vec::new(),
        );
        (contact, pending)
    }

    #[test]
    fn test_convert_line() {
        let options = keyboard_options(UidFormat::HexReversed, UidFormat::Hex);
        assert_eq!(convert_line("3C-2B-1A", &options).unwrap(), "1A2B3C");

        let options = keyboard_options(UidFormat::Hex, UidFormat::ActMifareSerial);
        assert_eq!(convert_line("A0A", &options).unwrap(), "0000002570");
    }

    #[test]
    fn test_keyboard_mode_writes_and_deduplicates() {
        let options = keyboard_options(UidFormat::HexReversed, UidFormat::Hex);
        let input = Cursor::new("3C-2B-1A\r\n3C2B1A\n0A-0B\n\nFF\n");
        let mut sink = ClipboardSink::new(MemoryClipboard::default());
        let mut out = Vec::new();

        run_keyboard(input, &options, &mut sink, &mut out).unwrap();

        assert_eq!(sink.clipboard().writes, vec!["1A2B3C", "B0A"]);
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Wrote 1A2B3C to the Clipboard"));
        assert!(out.contains("Wrote B0A to the Clipboard"));
        assert!(out.ends_with("Exiting\n"));
        // Input after the empty line is never read
        assert!(!out.contains("FF"));
    }

    #[test]
    fn test_keyboard_mode_skips_malformed_lines() {
        let options = keyboard_options(UidFormat::SpcWiegand, UidFormat::Hex);
        let input = Cursor::new("not-a-number\n3943194\n");
        let mut sink = ClipboardSink::new(MemoryClipboard::default());
        let mut out = Vec::new();

        run_keyboard(input, &options, &mut sink, &mut out).unwrap();

        assert_eq!(sink.clipboard().writes, vec!["1A2B3C"]);
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Error: Invalid UID input"));
    }

    #[test]
    fn test_keyboard_mode_rejects_default_input_format() {
        let options = keyboard_options(UidFormat::Default, UidFormat::Hex);
        let mut sink = ClipboardSink::new(MemoryClipboard::default());
        let mut out = Vec::new();

        let err = run_keyboard(Cursor::new("1234\n"), &options, &mut sink, &mut out).unwrap_err();
        assert!(err.to_string().contains("Input format cannot be default"));
        assert!(matches!(
            err.downcast_ref::<UidError>(),
            Some(UidError::UnsupportedFormat(UidFormat::Default))
        ));
        assert!(sink.clipboard().writes.is_empty());
    }

    #[test]
    fn test_keyboard_mode_json_report() {
        let mut options = keyboard_options(UidFormat::Hex, UidFormat::ActMifareSerial);
        options.style = ReportStyle::Json;
        let mut sink = ClipboardSink::new(MemoryClipboard::default());
        let mut out = Vec::new();

        run_keyboard(Cursor::new("A0A\n"), &options, &mut sink, &mut out).unwrap();

        let out = String::from_utf8(out).unwrap();
        let first = out.lines().next().unwrap();
        let json: serde_json::Value = serde_json::from_str(first).unwrap();
        assert_eq!(json["value"], "0000002570");
    }

    #[test]
    fn test_uid_rendering() {
        assert_eq!(UidRendering::default().render("00-A1-B2").unwrap(), "00A1B2");
        assert_eq!(
            UidRendering::Codec(UidFormat::Hex).render("00-A1-B2").unwrap(),
            "A1B2"
        );
        assert_eq!(
            UidRendering::Codec(UidFormat::HexReversed)
                .render("1A-2B-3C")
                .unwrap(),
            "3C2B1A"
        );
        assert!(matches!(
            UidRendering::Codec(UidFormat::Hex).render("01-02-03-04-05-06-07-08-09"),
            Err(UidError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_contact_loop_flushes_pending_uid() {
        let (mut contact, pending) = contact_loop(vec![None, None, Some(KeyPress::Quit)]);
        pending.store("04-A1-B2-C3".to_string());

        assert_eq!(contact.tick().unwrap(), Flow::Continue);
        assert!(!pending.is_available());
        assert_eq!(contact.sink().clipboard().writes, vec!["04A1B2C3"]);

        // Same UID again leaves the clipboard alone
        pending.store("04-A1-B2-C3".to_string());
        assert_eq!(contact.tick().unwrap(), Flow::Continue);
        assert_eq!(contact.sink().clipboard().writes, vec!["04A1B2C3"]);

        assert_eq!(contact.tick().unwrap(), Flow::Exit);
        let out = String::from_utf8(contact.output().clone()).unwrap();
        assert_eq!(out.matches("Wrote 04A1B2C3 to the Clipboard").count(), 1);
    }

    #[test]
    fn test_contact_loop_toggles_monitor() {
        let (mut contact, _pending) = contact_loop(vec![
            Some(KeyPress::Other),
            Some(KeyPress::Other),
            Some(KeyPress::Quit),
        ]);

        contact.tick().unwrap();
        assert_eq!(contact.monitor().state(), MonitorState::Paused);
        assert_eq!(contact.monitor().reader_names(), vec!["Test Reader"]);

        contact.tick().unwrap();
        assert_eq!(contact.monitor().state(), MonitorState::Monitoring);

        contact.run().unwrap();
        let out = String::from_utf8(contact.output().clone()).unwrap();
        assert!(out.contains("Monitoring paused. (Press CTRL-Q to quit)"));
        assert!(out.contains("Monitoring started. (Press CTRL-Q to quit)"));
    }

    #[test]
    fn test_contact_loop_reports_unconvertible_uid() {
        let (contact, pending) = contact_loop(vec![None]);
        let mut contact = contact.with_rendering(UidRendering::Codec(UidFormat::HexReversed));
        pending.store("01-02-03-04-05-06-07-08".to_string());

        assert_eq!(contact.tick().unwrap(), Flow::Continue);
        assert!(contact.sink().clipboard().writes.is_empty());
        let out = String::from_utf8(contact.output().clone()).unwrap();
        assert!(out.contains("Error: cannot convert UID"));
    }

    #[test]
    fn test_classify_key() {
        let ctrl_q = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::CONTROL);
        assert_eq!(classify_key(&ctrl_q), KeyPress::Quit);

        let plain_q = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert_eq!(classify_key(&plain_q), KeyPress::Other);

        let space = KeyEvent::new(KeyCode::Char(' '), KeyModifiers::NONE);
        assert_eq!(classify_key(&space), KeyPress::Other);
    }

    #[test]
    fn test_crlf_writer() {
        let mut writer = CrlfWriter::new(Vec::new());
        write!(writer, "one\ntwo\n").unwrap();
        writer.write_all(b"three").unwrap();
        assert_eq!(writer.inner, b"one\r\ntwo\r\nthree");
    }
}
