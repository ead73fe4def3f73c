use pcsc::{
    Context, Disposition, Protocols, ReaderState, Scope, ShareMode, State, MAX_BUFFER_SIZE,
};
use std::collections::VecDeque;
use std::ffi::CString;
use std::time::Duration;

use crate::core::utils::format_hex;
use crate::error::TransportError;

/// Hardware notification delivered by a [`CardEventSource`].
#[derive(Debug)]
pub enum CardEvent {
    Inserted { reader: String },
    Removed { reader: String },
    Error {
        reader: Option<String>,
        error: TransportError,
    },
}

/// Request/response access to the readers.
pub trait CardTransport: Send + Sync {
    /// Names of the readers currently attached.
    fn list_readers(&self) -> Result<Vec<String>, TransportError>;

    /// Exchange one command APDU with the card in `reader` and return the
    /// raw response including the status word.
    fn transmit(&self, reader: &str, command: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// Source of insert/remove notifications for a set of readers.
pub trait CardEventSource: Send {
    /// Wait up to `timeout` for the next event on `readers`.
    ///
    /// `Ok(None)` means nothing happened within the timeout.
    fn next_event(
        &mut self,
        readers: &[String],
        timeout: Duration,
    ) -> Result<Option<CardEvent>, TransportError>;
}

/// PC/SC transport owning the resource manager context.
///
/// The context is released when the last clone (including the ones held by
/// event sources) is dropped.
pub struct PcscTransport {
    context: Context,
}

impl PcscTransport {
    /// Establish a system-scoped PC/SC context
    pub fn establish() -> Result<Self, TransportError> {
        let context = Context::establish(Scope::System)?;
        Ok(Self { context })
    }

    /// Create an event source sharing this transport's context
    pub fn event_source(&self) -> PcscEventSource {
        PcscEventSource::new(self.context.clone())
    }
}

impl CardTransport for PcscTransport {
    fn list_readers(&self) -> Result<Vec<String>, TransportError> {
        let mut readers_buf = vec![0; 2048];
        let readers = match self.context.list_readers(&mut readers_buf) {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(readers
            .map(|name| name.to_string_lossy().to_string())
            .collect())
    }

    fn transmit(&self, reader: &str, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let reader_cstr = CString::new(reader)
            .map_err(|_| TransportError::InvalidReaderName(reader.to_string()))?;

        let mut card = self
            .context
            .connect(&reader_cstr, ShareMode::Shared, Protocols::ANY)?;

        log::debug!("Transmitting APDU to {}: {}", reader, format_hex(command));

        let mut response_buf = [0; MAX_BUFFER_SIZE];
        let tx = card.transaction()?;
        let response = tx.transmit(command, &mut response_buf)?.to_vec();

        log::debug!("Received response: {}", format_hex(&response));

        if let Err((_, e)) = tx.end(Disposition::LeaveCard) {
            log::warn!("Failed to end transaction on {reader}: {e}");
        }
        if let Err((_, e)) = card.disconnect(Disposition::LeaveCard) {
            log::warn!("Failed to disconnect cleanly from {reader}: {e}");
        }

        Ok(response)
    }
}

/// Event source built on `SCardGetStatusChange`.
pub struct PcscEventSource {
    context: Context,
    known: Vec<(String, State)>,
    queued: VecDeque<CardEvent>,
}

impl PcscEventSource {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            known: Vec::new(),
            queued: VecDeque::new(),
        }
    }

    /// Query the readers against their last known state.
    fn query(
        &self,
        known: &[(String, State)],
        timeout: Duration,
    ) -> Result<Option<Vec<State>>, TransportError> {
        let mut states = Vec::with_capacity(known.len());
        for (reader, state) in known {
            let name = CString::new(reader.as_str())
                .map_err(|_| TransportError::InvalidReaderName(reader.clone()))?;
            states.push(ReaderState::new(name, *state));
        }

        match self.context.get_status_change(timeout, &mut states) {
            Ok(()) => Ok(Some(states.iter().map(ReaderState::event_state).collect())),
            Err(pcsc::Error::Timeout) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Start watching a new reader list, recording the current state of each
    /// reader as the baseline. Cards already present raise no event.
    fn watch(&mut self, readers: &[String]) -> Result<(), TransportError> {
        let unchanged = self.known.len() == readers.len()
            && self.known.iter().zip(readers).all(|((known, _), r)| known == r);
        if unchanged {
            return Ok(());
        }

        let unaware: Vec<(String, State)> = readers
            .iter()
            .map(|reader| (reader.clone(), State::UNAWARE))
            .collect();

        let baseline = self.query(&unaware, Duration::ZERO)?;
        self.known = match baseline {
            Some(states) => readers
                .iter()
                .cloned()
                .zip(states.into_iter().map(settled))
                .collect(),
            None => unaware,
        };

        for (reader, state) in &self.known {
            log::debug!("Watching {reader}: {state:?}");
        }

        Ok(())
    }
}

impl CardEventSource for PcscEventSource {
    fn next_event(
        &mut self,
        readers: &[String],
        timeout: Duration,
    ) -> Result<Option<CardEvent>, TransportError> {
        if let Some(event) = self.queued.pop_front() {
            return Ok(Some(event));
        }

        self.watch(readers)?;

        let Some(states) = self.query(&self.known, timeout)? else {
            return Ok(None);
        };

        for ((reader, before), after) in self.known.iter_mut().zip(states) {
            if !after.contains(State::CHANGED) {
                continue;
            }

            log::debug!("{reader}: {before:?} -> {after:?}");

            if let Some(event) = transition(reader, *before, after) {
                self.queued.push_back(event);
            }
            *before = settled(after);
        }

        Ok(self.queued.pop_front())
    }
}

/// A reported reader state stripped of its change marker, for use as the
/// next query's known state.
fn settled(state: State) -> State {
    state - State::CHANGED
}

/// The event raised when `reader` goes from `before` to `after`.
///
/// Only presence matters: other changes on a reader holding a card (a new
/// ATR, exclusive use) raise nothing.
fn transition(reader: &str, before: State, after: State) -> Option<CardEvent> {
    if !after.contains(State::CHANGED) {
        return None;
    }

    let was_present = before.contains(State::PRESENT);
    let is_present = after.contains(State::PRESENT);
    match (was_present, is_present) {
        (false, true) => Some(CardEvent::Inserted {
            reader: reader.to_string(),
        }),
        (true, false) => Some(CardEvent::Removed {
            reader: reader.to_string(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READER: &str = "ACS ACR122U 00 00";

    fn is_inserted(event: &Option<CardEvent>) -> bool {
        matches!(event, Some(CardEvent::Inserted { reader }) if reader == READER)
    }

    fn is_removed(event: &Option<CardEvent>) -> bool {
        matches!(event, Some(CardEvent::Removed { reader }) if reader == READER)
    }

    #[test]
    fn test_transition_without_change_flag() {
        assert!(transition(READER, State::EMPTY, State::PRESENT).is_none());
        assert!(transition(READER, State::PRESENT, State::EMPTY).is_none());
    }

    #[test]
    fn test_transition_card_inserted() {
        let event = transition(READER, State::EMPTY, State::PRESENT | State::CHANGED);
        assert!(is_inserted(&event));

        let event = transition(READER, State::UNAWARE, State::PRESENT | State::CHANGED);
        assert!(is_inserted(&event));
    }

    #[test]
    fn test_transition_card_removed() {
        let event = transition(READER, State::PRESENT, State::EMPTY | State::CHANGED);
        assert!(is_removed(&event));

        let event = transition(
            READER,
            State::PRESENT | State::INUSE,
            State::EMPTY | State::CHANGED,
        );
        assert!(is_removed(&event));
    }

    #[test]
    fn test_transition_card_still_present() {
        // Card went into exclusive use or reported a new ATR
        let event = transition(
            READER,
            State::PRESENT,
            State::PRESENT | State::INUSE | State::CHANGED,
        );
        assert!(event.is_none());

        let event = transition(READER, State::EMPTY, State::EMPTY | State::CHANGED);
        assert!(event.is_none());
    }

    #[test]
    fn test_baseline_with_card_present() {
        // First query against UNAWARE reports the card already in the reader
        let first = State::PRESENT | State::CHANGED;
        let baseline = settled(first);
        assert_eq!(baseline, State::PRESENT);

        let event = transition(READER, baseline, State::PRESENT | State::INUSE | State::CHANGED);
        assert!(event.is_none());

        let event = transition(READER, baseline, State::EMPTY | State::CHANGED);
        assert!(is_removed(&event));
    }

    #[test]
    fn test_settled_keeps_other_flags() {
        let state = State::PRESENT | State::INUSE | State::CHANGED;
        assert_eq!(settled(state), State::PRESENT | State::INUSE);
        assert_eq!(settled(State::EMPTY), State::EMPTY);
    }
}
