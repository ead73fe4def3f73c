use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::dispatch::{
    run_keyboard, ContactLoop, CrlfWriter, KeyboardOptions, ReportStyle, TerminalKeys,
    UidRendering,
};
use crate::core::{
    clipboard::SystemClipboard,
    codec::UidFormat,
    monitor::{CardMonitor, PendingUid},
    reader::{CardTransport, PcscTransport},
    sink::ClipboardSink,
    utils::RawUidFormat,
};
use crate::error::UidError;

#[derive(Parser, Debug)]
#[command(name = "uid2clip")]
#[command(about = "Sends card UIDs from smart card or keyboard-emulating readers to the clipboard")]
#[command(version)]
pub struct Cli {
    /// Use 'hid' for keyboard-emulating readers, 'pcsc' for PC/SC readers
    #[arg(long, default_value = "hid")]
    pub reader_type: ReaderKind,

    /// Format typed by a keyboard-emulating reader (hex, hexrev, spcwiegand,
    /// spcar618x, spcpace, actmifareserial, actmifarerevserial, omnis)
    #[arg(long, default_value = "default")]
    pub uid_input_format: UidFormat,

    /// Format written to the clipboard [default: hex for 'hid', raw bytes for 'pcsc']
    #[arg(long)]
    pub uid_output_format: Option<UidFormat>,

    /// Separator between hex bytes in typed input
    #[arg(long, default_value = "-")]
    pub input_separator: char,

    /// Reverse the byte order of UIDs read from PC/SC readers
    #[arg(long)]
    pub reverse_bytes: bool,

    /// Write UIDs read from PC/SC readers as one decimal number
    #[arg(long)]
    pub decimal: bool,

    /// Separator between hex bytes of UIDs read from PC/SC readers
    #[arg(long, default_value = "")]
    pub output_separator: String,

    /// Idle wait between checks for new cards and keypresses
    #[arg(long, default_value_t = 250)]
    pub poll_interval_ms: u64,

    /// Report clipboard writes as JSON lines
    #[arg(long)]
    pub json: bool,

    /// List PC/SC readers and exit
    #[arg(long)]
    pub list_readers: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderKind {
    KeyboardEmulating,
    ContactReader,
}

impl std::str::FromStr for ReaderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hid" | "keyboard" => Ok(ReaderKind::KeyboardEmulating),
            "pcsc" | "contact" => Ok(ReaderKind::ContactReader),
            _ => Err(format!("Invalid reader type: {s}")),
        }
    }
}

impl Cli {
    fn report_style(&self) -> ReportStyle {
        if self.json {
            ReportStyle::Json
        } else {
            ReportStyle::Text
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Output rendering for contact readers
    fn contact_rendering(&self) -> Result<UidRendering> {
        match self.uid_output_format {
            Some(UidFormat::Default) => Err(UidError::UnsupportedFormat(UidFormat::Default))
                .context("Output format cannot be default"),
            Some(format) => Ok(UidRendering::Codec(format)),
            None => Ok(UidRendering::Raw(RawUidFormat {
                reversed: self.reverse_bytes,
                decimal: self.decimal,
                separator: self.output_separator.clone(),
            })),
        }
    }
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    let mut logger = env_logger::Builder::from_default_env();
    logger.filter_level(log_level);
    if cli.reader_type == ReaderKind::ContactReader {
        // The terminal is in raw mode while reading keys
        logger.format(|buf, record| {
            write!(
                buf,
                "[{} {}] {}\r\n",
                record.level(),
                record.target(),
                record.args()
            )
        });
    }
    logger.init();

    if cli.list_readers {
        return cmd_list_readers();
    }

    println!("This program will monitor all smart card readers or keyboard and send UIDs to the clipboard.");

    match cli.reader_type {
        ReaderKind::KeyboardEmulating => cmd_keyboard(&cli),
        ReaderKind::ContactReader => cmd_contact(&cli),
    }
}

fn cmd_list_readers() -> Result<()> {
    let transport = PcscTransport::establish().context("Failed to establish PCSC context")?;
    let readers = transport.list_readers().context("Failed to list readers")?;

    if readers.is_empty() {
        println!("No PCSC readers found.");
        return Ok(());
    }

    println!("Available PCSC readers:");
    for (i, reader) in readers.iter().enumerate() {
        println!("  [{i}] {reader}");
    }

    Ok(())
}

fn cmd_keyboard(cli: &Cli) -> Result<()> {
    let options = KeyboardOptions {
        input_format: cli.uid_input_format,
        output_format: cli.uid_output_format.unwrap_or(UidFormat::Hex),
        separator: Some(cli.input_separator),
        style: cli.report_style(),
    };

    println!("Input format {}", options.input_format);
    println!("Output format {}", options.output_format);

    let mut sink = ClipboardSink::new(SystemClipboard::new());
    let stdin = io::stdin();
    run_keyboard(stdin.lock(), &options, &mut sink, &mut io::stdout())
}

fn cmd_contact(cli: &Cli) -> Result<()> {
    let rendering = cli.contact_rendering()?;

    let transport = PcscTransport::establish().context("Failed to establish PCSC context")?;
    let readers = transport.list_readers().context("Failed to list readers")?;

    if readers.is_empty() {
        println!("There are currently no readers installed.");
        bail!(UidError::NoReadersFound);
    }

    let pending = Arc::new(PendingUid::new());
    let source = transport.event_source();
    let mut monitor = CardMonitor::new(Arc::new(transport), Box::new(source), Arc::clone(&pending))
        .with_poll_interval(cli.poll_interval());

    for reader in &readers {
        println!("Start monitoring for reader {reader}.");
    }
    println!("Press Ctrl-Q to exit or any key to toggle monitor.");

    monitor
        .start(&readers)
        .context("Failed to start reader monitor")?;

    let keys = TerminalKeys::enable()?;
    let mut contact = ContactLoop::new(
        monitor,
        pending,
        keys,
        ClipboardSink::new(SystemClipboard::new()),
        CrlfWriter::new(io::stdout()),
    )
    .with_rendering(rendering)
    .with_style(cli.report_style())
    .with_poll_interval(cli.poll_interval());

    let result = contact.run();
    // Stops the monitor thread and leaves raw mode before the last message
    drop(contact);

    println!("Exiting");
    result
}
