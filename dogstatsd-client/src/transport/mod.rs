//! Delivery of encoded lines to the remote server.
//!
//! A [`Transport`] accepts lines and reports back through a [`Completion`] once the line has been written, dropped, or
//! rejected. Transports never block the caller: socket transports hand lines to a background forwarder thread, and the
//! mock transport records them in memory.
use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs as _},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::Deserialize;
use tracing::warn;

use crate::error::ClientError;

pub(crate) mod forwarder;
pub(crate) mod mock;
pub(crate) mod socket;

/// Callback invoked when a call completes, with the number of bytes written or the error that occurred.
pub type SendCallback = Box<dyn FnOnce(Result<usize, ClientError>) + Send + 'static>;

/// Callback invoked once a transport is closed.
pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Handler receiving errors that have no per-call callback to go to.
pub type ErrorHandler = Arc<dyn Fn(ClientError) + Send + Sync + 'static>;

/// Routes the outcome of a single call.
///
/// The per-call callback gets the outcome when there is one. Otherwise, errors go to the error handler, and failing
/// that, are logged.
#[must_use = "a completion must be completed for its callback to run"]
pub struct Completion {
    callback: Option<SendCallback>,
    error_handler: Option<ErrorHandler>,
}

impl Completion {
    pub(crate) fn new(callback: Option<SendCallback>, error_handler: Option<ErrorHandler>) -> Self {
        Self { callback, error_handler }
    }

    /// A completion with no callback and no error handler.
    pub fn none() -> Self {
        Self { callback: None, error_handler: None }
    }

    /// Delivers the outcome of the call.
    pub fn complete(mut self, result: Result<usize, ClientError>) {
        self.deliver(result);
    }

    fn deliver(&mut self, result: Result<usize, ClientError>) {
        let error_handler = self.error_handler.take();
        if let Some(callback) = self.callback.take() {
            callback(result);
            return;
        }

        if let Err(e) = result {
            match error_handler {
                Some(handler) => handler(e),
                None => warn!(error = %e, "Failed to send metric."),
            }
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        // Dropped without being completed, which only happens when the transport went away with the call in flight.
        if self.callback.is_some() || self.error_handler.is_some() {
            self.deliver(Err(ClientError::Closed));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("callback", &self.callback.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

/// Lifecycle of a transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    /// No connection has been established yet.
    Uninitialized,

    /// A connection has been established at least once, and the transport accepts sends.
    Ready,

    /// The transport is closed. Every further send fails with [`ClientError::Closed`].
    Closed,
}

impl TransportState {
    const fn as_u8(self) -> u8 {
        match self {
            TransportState::Uninitialized => 0,
            TransportState::Ready => 1,
            TransportState::Closed => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => TransportState::Uninitialized,
            1 => TransportState::Ready,
            _ => TransportState::Closed,
        }
    }
}

/// Transport state shared between a transport handle and whatever drives it.
#[derive(Clone, Debug)]
pub(crate) struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(TransportState::Uninitialized.as_u8())))
    }

    pub fn get(&self) -> TransportState {
        TransportState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to `Ready`, unless the transport is already closed.
    pub fn mark_ready(&self) {
        let _ = self.0.compare_exchange(
            TransportState::Uninitialized.as_u8(),
            TransportState::Ready.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Moves to `Closed`, returning `true` if this call is the one that closed it.
    pub fn mark_closed(&self) -> bool {
        self.0.swap(TransportState::Closed.as_u8(), Ordering::AcqRel) != TransportState::Closed.as_u8()
    }
}

/// Delivers encoded lines to the remote server.
pub trait Transport: Send + Sync {
    /// Sends a single line.
    ///
    /// The line must not carry a terminator. The completion is invoked exactly once, possibly on another thread.
    fn send(&self, line: String, completion: Completion);

    /// Writes out any buffered lines.
    fn flush(&self);

    /// Closes the transport.
    ///
    /// Buffered lines are flushed first. The callback runs once the transport has reached
    /// [`TransportState::Closed`].
    fn close(&self, callback: Option<CloseCallback>);

    /// Returns the current lifecycle state.
    fn state(&self) -> TransportState;

    /// Returns the transport identifier, such as `udp` or `tcp`.
    fn transport_id(&self) -> &'static str;
}

/// Network protocol used to reach the remote server.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Fire-and-forget datagrams.
    #[default]
    Udp,

    /// A persistent stream connection.
    Tcp,
}

impl Protocol {
    /// Returns the transport identifier for the protocol.
    pub const fn transport_id(self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RemoteAddr {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl RemoteAddr {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self { protocol, host: host.into(), port }
    }

    /// Resolves the remote address.
    pub fn resolve(&self) -> std::io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port).to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses found for '{}'", self.host),
            ));
        }
        Ok(addrs)
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol.transport_id(), self.host, self.port)
    }
}

/// Forwarder configuration.
#[derive(Clone, Debug)]
pub(crate) struct ForwarderConfiguration {
    pub remote_addr: RemoteAddr,
    pub max_buffer_size: usize,
    pub flush_interval: Duration,
    pub write_timeout: Duration,
    pub max_queue_len: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub telemetry: bool,
}

impl ForwarderConfiguration {
    /// Returns `true` if every line must be terminated with a newline.
    pub fn requires_line_terminator(&self) -> bool {
        match self.remote_addr.protocol {
            Protocol::Udp => false,
            Protocol::Tcp => true,
        }
    }
}

impl Default for ForwarderConfiguration {
    fn default() -> Self {
        Self {
            remote_addr: RemoteAddr::new(Protocol::Udp, "127.0.0.1", 8125),
            max_buffer_size: 0,
            flush_interval: Duration::from_millis(1000),
            write_timeout: Duration::from_millis(1000),
            max_queue_len: 1024,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(10_000),
            telemetry: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{Completion, ErrorHandler, SharedState, TransportState};
    use crate::error::ClientError;

    #[test]
    fn completion_prefers_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handled = Arc::new(Mutex::new(0));

        let seen2 = Arc::clone(&seen);
        let handled2 = Arc::clone(&handled);
        let completion = Completion::new(
            Some(Box::new(move |result: Result<usize, ClientError>| {
                seen2.lock().unwrap().push(result.is_err());
            })),
            Some(Arc::new(move |_: ClientError| *handled2.lock().unwrap() += 1)),
        );
        completion.complete(Err(ClientError::Closed));

        assert_eq!(*seen.lock().unwrap(), vec![true]);
        assert_eq!(*handled.lock().unwrap(), 0);
    }

    #[test]
    fn completion_falls_back_to_error_handler() {
        let handled = Arc::new(Mutex::new(Vec::new()));
        let handled2 = Arc::clone(&handled);
        let handler: ErrorHandler = Arc::new(move |e: ClientError| handled2.lock().unwrap().push(e.is_closed()));

        Completion::new(None, Some(handler.clone())).complete(Ok(10));
        Completion::new(None, Some(handler)).complete(Err(ClientError::Closed));

        assert_eq!(*handled.lock().unwrap(), vec![true]);
    }

    #[test]
    fn dropped_completion_reports_closed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let completion = Completion::new(
            Some(Box::new(move |result: Result<usize, ClientError>| {
                seen2.lock().unwrap().push(matches!(result, Err(ClientError::Closed)));
            })),
            None,
        );
        drop(completion);

        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[test]
    fn completion_without_receivers_does_not_panic() {
        Completion::none().complete(Err(ClientError::Closed));
    }

    #[test]
    fn shared_state_transitions() {
        let state = SharedState::new();
        assert_eq!(state.get(), TransportState::Uninitialized);

        state.mark_ready();
        assert_eq!(state.get(), TransportState::Ready);

        assert!(state.mark_closed());
        assert!(!state.mark_closed());
        assert_eq!(state.get(), TransportState::Closed);

        // Closed is terminal.
        state.mark_ready();
        assert_eq!(state.get(), TransportState::Closed);
    }
}
