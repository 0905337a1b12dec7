//! Observer hook fired for uncaught errors.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::request::Request;

/// What receivers of [`ExceptionSignal`] see.
#[derive(Debug, Clone, Copy)]
pub struct SignalEvent<'a> {
    /// Type name of the handler that caught the error
    pub sender: &'a str,
    /// The request being handled
    pub request: &'a Request,
    /// The uncaught error
    pub error: &'a Error,
}

/// A connected receiver.
pub type Receiver = Arc<dyn Fn(&SignalEvent<'_>) + Send + Sync>;

/// The "exception occurred" signal.
///
/// Receivers are connected while the handler is built and are called in
/// connection order.
#[derive(Clone, Default)]
pub struct ExceptionSignal {
    receivers: Vec<Receiver>,
}

impl ExceptionSignal {
    /// Signal with no receivers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a receiver.
    pub fn connect(&mut self, receiver: Receiver) {
        self.receivers.push(receiver);
    }

    /// Notifies every receiver and returns how many were notified.
    pub fn send(&self, event: &SignalEvent<'_>) -> usize {
        for receiver in &self.receivers {
            receiver(event);
        }
        self.receivers.len()
    }

    /// Number of receivers.
    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    /// Whether nothing is connected.
    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }
}

impl fmt::Debug for ExceptionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionSignal")
            .field("receivers", &self.receivers.len())
            .finish()
    }
}

/// A signal delivery captured by [`SignalRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSignal {
    /// Sender type name
    pub sender: String,
    /// Request path
    pub path: String,
    /// Rendered error
    pub error: String,
}

/// Receiver that keeps every delivery, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct SignalRecorder {
    events: Mutex<Vec<RecordedSignal>>,
}

impl SignalRecorder {
    /// Empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A receiver feeding this recorder.
    pub fn receiver(self: &Arc<Self>) -> Receiver {
        let recorder = Arc::clone(self);
        Arc::new(move |event: &SignalEvent<'_>| {
            recorder.events.lock().push(RecordedSignal {
                sender: event.sender.to_string(),
                path: event.request.path().to_string(),
                error: event.error.to_string(),
            });
        })
    }

    /// Deliveries so far.
    pub fn events(&self) -> Vec<RecordedSignal> {
        self.events.lock().clone()
    }

    /// Number of deliveries.
    pub fn count(&self) -> usize {
        self.events.lock().len()
    }
}
