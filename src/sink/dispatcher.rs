//! Typed events that the sink reports, and the registry of their handlers.
use heapless::Vec;

use super::Contract;

/// The maximum number of handlers that can be subscribed.
pub const MAX_HANDLERS: usize = 8;

/// Why the sink entered error recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCause {
    /// The source capabilities were invalid, or none of them was acceptable.
    CapabilityEvaluation,
    /// A message was not acknowledged after all retries.
    TransmissionExhausted,
    /// The source did not respond in time.
    Timeout,
    /// The source sent an unexpected message, or signaled a hard reset.
    Framing,
}

/// Events that the sink reports to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// A source was attached.
    Connected,
    /// The source was detached.
    Disconnected,
    /// Negotiation failed, and a hard reset was performed.
    Error(ErrorCause),
    /// The source accepted a request, and the new power level is available.
    ContractValid(Contract),
    /// Power is stable and may be drawn.
    ///
    /// Carries `None`, if the source does not speak PD and the sink stays at 5 V.
    PowerReady(Option<Contract>),
}

impl Event {
    /// The kind of this event, used for matching handlers.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected => EventKind::Connected,
            Event::Disconnected => EventKind::Disconnected,
            Event::Error(_) => EventKind::Error,
            Event::ContractValid(_) => EventKind::ContractValid,
            Event::PowerReady(_) => EventKind::PowerReady,
        }
    }
}

/// Kinds of events, without their data.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    ContractValid,
    PowerReady,
}

/// Errors when subscribing handlers.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchError {
    /// All handler slots are taken.
    #[error("no room for another handler")]
    Full,
}

/// An event handler.
pub type Handler<'a> = &'a dyn Fn(&Event);

/// Ordered registry of event handlers.
///
/// Handlers run synchronously, in registration order, on the task that polls the sink.
#[derive(Default)]
pub struct Dispatcher<'a> {
    handlers: Vec<(EventKind, Handler<'a>), MAX_HANDLERS>,
}

impl<'a> Dispatcher<'a> {
    /// An empty registry.
    pub const fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Register a handler for one kind of event.
    pub fn subscribe(&mut self, kind: EventKind, handler: Handler<'a>) -> Result<(), DispatchError> {
        self.handlers.push((kind, handler)).map_err(|_| DispatchError::Full)
    }

    /// Run all handlers that match the event.
    pub fn dispatch(&self, event: &Event) {
        debug!("Dispatch {:?}", event);

        self.handlers
            .iter()
            .filter(|(kind, _)| *kind == event.kind())
            .for_each(|(_, handler)| handler(event));
    }

    /// The number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl core::fmt::Debug for Dispatcher<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher").field("handlers", &self.handlers.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::vec::Vec;

    use super::*;

    #[test]
    fn handlers_run_in_order_for_matching_kind() {
        let calls = RefCell::new(Vec::new());
        let first = |_: &Event| calls.borrow_mut().push("first");
        let second = |_: &Event| calls.borrow_mut().push("second");
        let other = |_: &Event| calls.borrow_mut().push("other");

        let mut dispatcher = Dispatcher::new();
        dispatcher.subscribe(EventKind::Connected, &first).unwrap();
        dispatcher.subscribe(EventKind::Disconnected, &other).unwrap();
        dispatcher.subscribe(EventKind::Connected, &second).unwrap();

        dispatcher.dispatch(&Event::Connected);

        assert_eq!(*calls.borrow(), ["first", "second"]);
    }

    #[test]
    fn handler_receives_event_data() {
        let seen = RefCell::new(None);
        let handler = |event: &Event| *seen.borrow_mut() = Some(*event);

        let mut dispatcher = Dispatcher::new();
        dispatcher.subscribe(EventKind::Error, &handler).unwrap();
        dispatcher.dispatch(&Event::Error(ErrorCause::Timeout));

        assert_eq!(*seen.borrow(), Some(Event::Error(ErrorCause::Timeout)));
    }

    #[test]
    fn registry_is_bounded() {
        let handler = |_: &Event| {};
        let mut dispatcher = Dispatcher::new();

        for _ in 0..MAX_HANDLERS {
            dispatcher.subscribe(EventKind::PowerReady, &handler).unwrap();
        }

        assert_eq!(
            dispatcher.subscribe(EventKind::PowerReady, &handler),
            Err(DispatchError::Full)
        );
        assert_eq!(dispatcher.len(), MAX_HANDLERS);
    }
}
