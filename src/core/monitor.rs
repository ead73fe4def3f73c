//! Card monitor: watches a set of readers for inserted cards and hands their
//! UIDs to the dispatch loop through a [`PendingUid`] slot.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::commands::read_uid;
use crate::core::reader::{CardEvent, CardEventSource, CardTransport};
use crate::core::utils::format_hex_dashed;
use crate::error::{TransportError, UidError};

/// Wait granularity of the watcher thread
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Not started yet.
    Idle,
    /// Watching readers and delivering events.
    Monitoring,
    /// Watching readers, events are dropped.
    Paused,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::Idle => "idle",
            MonitorState::Monitoring => "monitoring",
            MonitorState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Single-slot handoff between the monitor thread and the dispatch loop.
///
/// A newer UID replaces one that has not been taken yet.
#[derive(Debug, Default)]
pub struct PendingUid {
    slot: Mutex<Option<String>>,
}

impl PendingUid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, uid: String) {
        *self.lock() = Some(uid);
    }

    /// Take the pending UID, clearing the slot.
    pub fn take(&self) -> Option<String> {
        self.lock().take()
    }

    pub fn is_available(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        // A poisoned slot still holds a complete value
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// State shared between the monitor handle and its watcher thread
struct Shared {
    transport: Arc<dyn CardTransport>,
    pending: Arc<PendingUid>,
    state: Mutex<MonitorState>,
    readers: Mutex<Vec<String>>,
    shutdown: AtomicBool,
}

impl Shared {
    fn state(&self) -> MonitorState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: MonitorState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    fn readers(&self) -> Vec<String> {
        self.readers.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn handle_event(&self, event: CardEvent) {
        let state = self.state();
        if state != MonitorState::Monitoring {
            log::debug!("Dropping {event:?} while {state}");
            return;
        }

        match event {
            CardEvent::Inserted { reader } => self.card_inserted(&reader),
            CardEvent::Removed { reader } => {
                log::debug!("Card removed from {reader}");
            }
            CardEvent::Error { reader, error } => report_error(reader.as_deref(), &error),
        }
    }

    fn card_inserted(&self, reader: &str) {
        log::debug!("Card inserted into {reader}");

        match read_uid(self.transport.as_ref(), reader) {
            Ok(Some(bytes)) => {
                let uid = format_hex_dashed(&bytes);
                log::info!("Read UID {uid} from {reader}");
                self.pending.store(uid);
            }
            Ok(None) => {
                log::debug!("No UID data returned by {reader}");
            }
            Err(e) => report_error(Some(reader), &e),
        }
    }
}

fn report_error(reader: Option<&str>, error: &TransportError) {
    let scope = reader.unwrap_or("all readers");
    match error.code() {
        Some(code) => log::error!("Monitor error on {scope} (0x{code:08X}): {error}"),
        None => log::error!("Monitor error on {scope}: {error}"),
    }
}

/// Watches readers and stores the UID of every inserted card.
///
/// The watcher thread is spawned on the first successful [`start`] and is
/// joined when the monitor is dropped.
///
/// [`start`]: CardMonitor::start
pub struct CardMonitor {
    shared: Arc<Shared>,
    source: Option<Box<dyn CardEventSource>>,
    watcher: Option<JoinHandle<()>>,
    poll_interval: Duration,
}

impl CardMonitor {
    pub fn new(
        transport: Arc<dyn CardTransport>,
        source: Box<dyn CardEventSource>,
        pending: Arc<PendingUid>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                pending,
                state: Mutex::new(MonitorState::Idle),
                readers: Mutex::new(Vec::new()),
                shutdown: AtomicBool::new(false),
            }),
            source: Some(source),
            watcher: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn state(&self) -> MonitorState {
        self.shared.state()
    }

    /// Readers being watched; kept across pause and resume.
    pub fn reader_names(&self) -> Vec<String> {
        self.shared.readers()
    }

    /// Start watching `readers`, or resume a paused monitor.
    ///
    /// A paused monitor resumes with the reader set it was first started
    /// with; `readers` is ignored in that case.
    pub fn start(&mut self, readers: &[String]) -> Result<(), UidError> {
        match self.state() {
            MonitorState::Monitoring => Ok(()),
            MonitorState::Paused => {
                self.shared.set_state(MonitorState::Monitoring);
                log::info!("Monitoring resumed");
                Ok(())
            }
            MonitorState::Idle => {
                if readers.is_empty() {
                    return Err(UidError::NoReadersFound);
                }

                *self.shared.readers.lock().unwrap_or_else(|p| p.into_inner()) =
                    readers.to_vec();
                self.spawn_watcher()?;
                self.shared.set_state(MonitorState::Monitoring);

                for reader in readers {
                    log::info!("Monitoring reader {reader}");
                }
                Ok(())
            }
        }
    }

    /// Stop delivering events. The watcher keeps running.
    pub fn cancel(&mut self) {
        if self.state() == MonitorState::Monitoring {
            self.shared.set_state(MonitorState::Paused);
            log::info!("Monitoring paused");
        }
    }

    /// Flip between monitoring and paused, returning the new state.
    pub fn toggle(&mut self) -> Result<MonitorState, UidError> {
        if self.state() == MonitorState::Monitoring {
            self.cancel();
        } else {
            let readers = self.reader_names();
            self.start(&readers)?;
        }
        Ok(self.state())
    }

    /// Deliver one hardware event as if it came from the watcher.
    pub fn handle_event(&self, event: CardEvent) {
        self.shared.handle_event(event);
    }

    fn spawn_watcher(&mut self) -> Result<(), UidError> {
        // A failed spawn drops the source with the thread closure
        let Some(mut source) = self.source.take() else {
            return Err(UidError::Watcher(std::io::Error::other(
                "card event source lost by an earlier failed start",
            )));
        };

        let shared = Arc::clone(&self.shared);
        let poll_interval = self.poll_interval;

        let handle = thread::Builder::new()
            .name("uid-monitor".to_string())
            .spawn(move || {
                while !shared.shutdown.load(Ordering::Acquire) {
                    let readers = shared.readers();
                    match source.next_event(&readers, poll_interval) {
                        Ok(Some(event)) => shared.handle_event(event),
                        Ok(None) => {}
                        Err(error) => {
                            shared.handle_event(CardEvent::Error {
                                reader: None,
                                error,
                            });
                            thread::sleep(poll_interval);
                        }
                    }
                }
                log::debug!("Monitor thread stopped");
            })?;

        self.watcher = Some(handle);
        Ok(())
    }
}

impl Drop for CardMonitor {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.watcher.take() {
            if handle.join().is_err() {
                log::warn!("Monitor thread panicked");
            }
        }
    }
}
