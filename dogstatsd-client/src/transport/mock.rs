use parking_lot::Mutex;

use super::{CloseCallback, Completion, SharedState, Transport, TransportState};
use crate::error::ClientError;

/// A transport that performs no I/O.
///
/// Every line is recorded, and every send completes successfully with zero bytes written.
#[derive(Debug)]
pub(crate) struct MockTransport {
    lines: Mutex<Vec<String>>,
    state: SharedState,
}

impl MockTransport {
    pub fn new() -> Self {
        let state = SharedState::new();
        state.mark_ready();
        Self { lines: Mutex::new(Vec::new()), state }
    }

    /// Returns the lines sent so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Removes and returns the lines sent so far.
    pub fn take_lines(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }
}

impl Transport for MockTransport {
    fn send(&self, line: String, completion: Completion) {
        if self.state.get() == TransportState::Closed {
            completion.complete(Err(ClientError::Closed));
            return;
        }

        self.lines.lock().push(line);
        completion.complete(Ok(0));
    }

    fn flush(&self) {}

    fn close(&self, callback: Option<CloseCallback>) {
        self.state.mark_closed();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    fn transport_id(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use super::MockTransport;
    use crate::{
        error::ClientError,
        transport::{Completion, Transport, TransportState},
    };

    #[test]
    fn records_lines_and_reports_zero_bytes() {
        let transport = MockTransport::new();
        let ok = Arc::new(AtomicBool::new(false));
        let ok2 = Arc::clone(&ok);

        transport.send(
            "test:1|c".to_string(),
            Completion::new(
                Some(Box::new(move |result: Result<usize, ClientError>| {
                    ok2.store(matches!(result, Ok(0)), Ordering::SeqCst);
                })),
                None,
            ),
        );

        assert!(ok.load(Ordering::SeqCst));
        assert_eq!(transport.lines(), vec!["test:1|c".to_string()]);
        assert_eq!(transport.take_lines(), vec!["test:1|c".to_string()]);
        assert!(transport.lines().is_empty());
    }

    #[test]
    fn rejects_sends_after_close() {
        let transport = MockTransport::new();
        let closed = Arc::new(AtomicBool::new(false));
        let closed2 = Arc::clone(&closed);
        transport.close(Some(Box::new(move || closed2.store(true, Ordering::SeqCst))));
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(transport.state(), TransportState::Closed);

        let rejected = Arc::new(AtomicBool::new(false));
        let rejected2 = Arc::clone(&rejected);
        transport.send(
            "test:1|c".to_string(),
            Completion::new(
                Some(Box::new(move |result: Result<usize, ClientError>| {
                    rejected2.store(matches!(result, Err(ClientError::Closed)), Ordering::SeqCst);
                })),
                None,
            ),
        );
        assert!(rejected.load(Ordering::SeqCst));
        assert!(transport.lines().is_empty());
    }
}
