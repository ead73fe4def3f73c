//! System clipboard through the platform's command-line tools.
//! - macOS: pbcopy / pbpaste
//! - Linux: xclip, falling back to xsel
//! - Windows: clip / powershell Get-Clipboard

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};

use crate::core::sink::Clipboard;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }
}

impl Clipboard for SystemClipboard {
    fn get_text(&mut self) -> Result<String> {
        #[cfg(target_os = "macos")]
        {
            read_from(&mut Command::new("pbpaste"))
        }

        #[cfg(target_os = "linux")]
        {
            read_from(Command::new("xclip").args(["-selection", "clipboard", "-o"]))
                .or_else(|_| read_from(Command::new("xsel").args(["--clipboard", "--output"])))
                .context("Failed to read clipboard. Install xclip or xsel.")
        }

        #[cfg(target_os = "windows")]
        {
            // Get-Clipboard appends a line break
            read_from(Command::new("powershell").args(["-command", "Get-Clipboard"]))
                .map(|text| text.trim_end_matches(['\r', '\n']).to_string())
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            bail!("Clipboard not supported on this platform")
        }
    }

    fn set_text(&mut self, text: &str) -> Result<()> {
        #[cfg(target_os = "macos")]
        {
            write_to(&mut Command::new("pbcopy"), text)
        }

        #[cfg(target_os = "linux")]
        {
            write_to(Command::new("xclip").args(["-selection", "clipboard"]), text)
                .or_else(|_| write_to(Command::new("xsel").args(["--clipboard", "--input"]), text))
                .context("Failed to write clipboard. Install xclip or xsel.")
        }

        #[cfg(target_os = "windows")]
        {
            write_to(&mut Command::new("clip"), text)
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            let _ = text;
            bail!("Clipboard not supported on this platform")
        }
    }
}

fn program(command: &Command) -> String {
    command.get_program().to_string_lossy().to_string()
}

#[allow(dead_code)]
fn read_from(command: &mut Command) -> Result<String> {
    let name = program(command);
    let output = command
        .output()
        .with_context(|| format!("Failed to execute {name}"))?;

    if !output.status.success() {
        bail!("{name} exited with {}", output.status);
    }

    String::from_utf8(output.stdout).with_context(|| format!("Invalid UTF-8 from {name}"))
}

#[allow(dead_code)]
fn write_to(command: &mut Command, text: &str) -> Result<()> {
    let name = program(command);
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to spawn {name}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(text.as_bytes())
            .with_context(|| format!("Failed to write to {name}"))?;
    }

    let status = child
        .wait()
        .with_context(|| format!("Failed to wait for {name}"))?;

    if !status.success() {
        bail!("{name} exited with {status}");
    }

    Ok(())
}
