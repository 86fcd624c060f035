use std::{collections::VecDeque, io, time::Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, error, trace};

use super::{
    socket::{Backoff, Link},
    CloseCallback, Completion, ForwarderConfiguration, Protocol, SharedState, Transport, TransportState,
};
use crate::{
    error::{BuildError, ClientError},
    telemetry::{Outcome, Telemetry, TelemetryUpdate},
    writer::{Payload, PayloadBuffer},
};

enum Command {
    Send(String, Completion),
    Flush,
    Close(PendingClose),
}

/// A close callback that runs when dropped, so that it still runs if its command is discarded with the channel.
struct PendingClose(Option<CloseCallback>);

impl Drop for PendingClose {
    fn drop(&mut self) {
        if let Some(callback) = self.0.take() {
            callback();
        }
    }
}

/// Handle to a socket transport driven by a background forwarder thread.
///
/// Sends are queued on a bounded channel and never block: when the channel is full, the call fails right away with a
/// transport error of kind [`io::ErrorKind::WouldBlock`].
pub(crate) struct ForwarderHandle {
    tx: Sender<Command>,
    state: SharedState,
    transport_id: &'static str,
}

impl ForwarderHandle {
    /// Spawns the forwarder thread and returns a handle to it.
    pub fn spawn(config: ForwarderConfiguration) -> Result<Self, BuildError> {
        let (tx, rx) = bounded(config.max_queue_len);
        let state = SharedState::new();
        let transport_id = config.remote_addr.protocol.transport_id();

        let forwarder = Forwarder::new(config, rx, state.clone());
        std::thread::Builder::new()
            .name("dogstatsd-client-forwarder".to_string())
            .spawn(move || forwarder.run())
            .map_err(|_| BuildError::Backend)?;

        Ok(Self { tx, state, transport_id })
    }
}

impl Transport for ForwarderHandle {
    fn send(&self, line: String, completion: Completion) {
        if self.state.get() == TransportState::Closed {
            completion.complete(Err(ClientError::Closed));
            return;
        }

        match self.tx.try_send(Command::Send(line, completion)) {
            Ok(()) => {}
            Err(TrySendError::Full(Command::Send(_, completion))) => {
                let e = io::Error::new(io::ErrorKind::WouldBlock, "send queue is full");
                completion.complete(Err(ClientError::transport(self.transport_id, e)));
            }
            Err(TrySendError::Disconnected(Command::Send(_, completion))) => {
                completion.complete(Err(ClientError::Closed));
            }
            Err(_) => {}
        }
    }

    fn flush(&self) {
        // A full queue means the forwarder is busy draining it anyway.
        let _ = self.tx.try_send(Command::Flush);
    }

    fn close(&self, callback: Option<CloseCallback>) {
        if let Err(e) = self.tx.send(Command::Close(PendingClose(callback))) {
            // The forwarder is already gone. Dropping the command runs the callback.
            self.state.mark_closed();
            drop(e.into_inner());
        }
    }

    fn state(&self) -> TransportState {
        self.state.get()
    }

    fn transport_id(&self) -> &'static str {
        self.transport_id
    }
}

struct Forwarder {
    config: ForwarderConfiguration,
    rx: Receiver<Command>,
    state: SharedState,
    link: Link,
    buffer: PayloadBuffer<Completion>,
    backlog: VecDeque<Payload<Completion>>,
    // Unset when the flush interval is too long to be represented as a deadline.
    next_flush: Option<Instant>,
    telemetry: Option<Telemetry>,
    telemetry_update: TelemetryUpdate,
}

impl Forwarder {
    fn new(config: ForwarderConfiguration, rx: Receiver<Command>, state: SharedState) -> Self {
        let backoff = match config.remote_addr.protocol {
            Protocol::Udp => None,
            Protocol::Tcp => Some(Backoff::new(config.initial_backoff, config.max_backoff)),
        };
        let link = Link::new(config.remote_addr.clone(), config.write_timeout, backoff, state.clone());
        let buffer = PayloadBuffer::new(config.max_buffer_size, config.requires_line_terminator());

        Self {
            rx,
            state,
            link,
            buffer,
            backlog: VecDeque::new(),
            next_flush: Instant::now().checked_add(config.flush_interval),
            telemetry: None,
            telemetry_update: TelemetryUpdate::default(),
            config,
        }
    }

    fn flush_deadline(&self) -> Option<Instant> {
        Instant::now().checked_add(self.config.flush_interval)
    }

    fn transport_id(&self) -> &'static str {
        self.config.remote_addr.protocol.transport_id()
    }

    fn is_stream(&self) -> bool {
        self.config.remote_addr.protocol == Protocol::Tcp
    }

    fn is_buffering(&self) -> bool {
        self.config.max_buffer_size > 0
    }

    /// Run the forwarder until the transport is closed, or every handle to it is dropped.
    fn run(mut self) {
        debug!(remote_addr = %self.config.remote_addr, "Forwarder started.");

        loop {
            let result = match self.next_deadline() {
                Some(deadline) => self.rx.recv_deadline(deadline),
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match result {
                Ok(Command::Send(line, completion)) => {
                    if !self.buffer.has_pending() {
                        self.next_flush = self.flush_deadline();
                    }
                    self.buffer.push(line.as_bytes(), completion);
                    self.dispatch();
                }
                Ok(Command::Flush) => {
                    self.buffer.finalize_current_payload();
                    self.dispatch();
                }
                Ok(Command::Close(pending)) => {
                    self.shutdown();
                    drop(pending);
                    self.drain_commands();
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_buffering() && self.next_flush.is_some_and(|at| Instant::now() >= at) {
                        self.buffer.finalize_current_payload();
                        self.next_flush = self.flush_deadline();
                    }
                    self.dispatch();
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("All client handles dropped.");
                    self.shutdown();
                    break;
                }
            }

            self.update_telemetry();
        }

        self.update_telemetry();
        debug!(remote_addr = %self.config.remote_addr, "Forwarder stopped.");
    }

    fn next_deadline(&self) -> Option<Instant> {
        let flush_deadline = self.next_flush.filter(|_| self.is_buffering() && self.buffer.has_pending());
        let retry_deadline =
            (!self.backlog.is_empty()).then(|| self.link.retry_at().unwrap_or_else(Instant::now));

        match (flush_deadline, retry_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn update_telemetry(&mut self) {
        // Telemetry is registered lazily so that it goes through whichever recorder was installed after the client
        // was built.
        if self.config.telemetry && self.telemetry_update.is_pending() {
            let transport_id = self.transport_id();
            let telemetry = self.telemetry.get_or_insert_with(|| Telemetry::new(transport_id));
            telemetry.apply_update(&self.telemetry_update);
        }
        self.telemetry_update.reset();
    }

    fn dispatch(&mut self) {
        while let Some(payload) = self.buffer.next_payload() {
            if self.is_stream() {
                self.enqueue(payload);
            } else {
                self.send_datagram(payload);
            }
        }

        if self.is_stream() {
            self.drain_backlog();
        }
    }

    fn send_datagram(&mut self, payload: Payload<Completion>) {
        match self.link.try_send(&payload.bytes) {
            Ok(_) => {
                trace!(payload_len = payload.bytes.len(), "Sent payload.");
                self.telemetry_update.record(Outcome::Sent, payload.bytes.len());
                complete_ok(payload);
            }
            Err(e) => {
                error!(error = %e, payload_len = payload.bytes.len(), "Failed to send payload.");
                self.telemetry_update.record(Outcome::DroppedTransport, payload.bytes.len());
                complete_err(payload, self.transport_id(), &e);
            }
        }
    }

    fn enqueue(&mut self, payload: Payload<Completion>) {
        if self.backlog.len() >= self.config.max_queue_len {
            if let Some(oldest) = self.backlog.pop_front() {
                debug!(payload_len = oldest.bytes.len(), "Backlog full, dropping oldest payload.");
                self.telemetry_update.record(Outcome::DroppedQueue, oldest.bytes.len());
                let e = io::Error::new(io::ErrorKind::WouldBlock, "backlog is full");
                complete_err(oldest, self.transport_id(), &e);
            }
        }
        self.backlog.push_back(payload);
    }

    fn drain_backlog(&mut self) {
        while let Some(payload) = self.backlog.front() {
            if !self.link.can_attempt(Instant::now()) {
                break;
            }

            match self.link.try_send(&payload.bytes) {
                Ok(_) => {
                    trace!(payload_len = payload.bytes.len(), "Sent payload.");
                    self.telemetry_update.record(Outcome::Sent, payload.bytes.len());
                    if let Some(payload) = self.backlog.pop_front() {
                        complete_ok(payload);
                    }
                }
                Err(e) => {
                    // The payload stays at the front of the backlog until the connection comes back.
                    debug!(error = %e, backlog_len = self.backlog.len(), "Failed to send payload, will retry.");
                    break;
                }
            }
        }
    }

    fn shutdown(&mut self) {
        self.buffer.finalize_current_payload();
        self.dispatch();
        self.state.mark_closed();

        for payload in self.backlog.drain(..) {
            self.telemetry_update.record(Outcome::DroppedQueue, payload.bytes.len());
            for (_, completion) in payload.items {
                completion.complete(Err(ClientError::Closed));
            }
        }

        self.link.shutdown();
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.rx.try_recv() {
            // Close callbacks run as their command is dropped.
            if let Command::Send(_, completion) = command {
                completion.complete(Err(ClientError::Closed));
            }
        }
    }
}

fn complete_ok(payload: Payload<Completion>) {
    for (line_len, completion) in payload.items {
        completion.complete(Ok(line_len));
    }
}

fn complete_err(payload: Payload<Completion>, transport_id: &'static str, e: &io::Error) {
    for (_, completion) in payload.items {
        let source = io::Error::new(e.kind(), e.to_string());
        completion.complete(Err(ClientError::transport(transport_id, source)));
    }
}
