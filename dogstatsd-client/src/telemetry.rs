use metrics::{counter, Counter, Label};

const NAMESPACE: &str = "datadog.dogstatsd.client";

/// What happened to a payload once it left the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Written to the socket in full.
    Sent,

    /// The socket write failed.
    DroppedTransport,

    /// Evicted from the disconnected backlog, or still queued when the transport closed.
    DroppedQueue,
}

/// Payload and byte totals for a single outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Tally {
    payloads: u64,
    bytes: u64,
}

impl Tally {
    fn add(&mut self, bytes_len: usize) {
        self.payloads += 1;
        self.bytes += bytes_len as u64;
    }

    fn merged(self, other: Tally) -> Tally {
        Tally { payloads: self.payloads + other.payloads, bytes: self.bytes + other.bytes }
    }
}

struct CounterPair {
    packets: Counter,
    bytes: Counter,
}

impl CounterPair {
    fn register(suffix: &str, labels: &[Label]) -> Self {
        Self {
            packets: counter!(format!("{NAMESPACE}.packets_{suffix}"), labels.iter()),
            bytes: counter!(format!("{NAMESPACE}.bytes_{suffix}"), labels.iter()),
        }
    }

    fn increment(&self, tally: Tally) {
        self.packets.increment(tally.payloads);
        self.bytes.increment(tally.bytes);
    }
}

/// Client telemetry.
///
/// Reports how many payloads and bytes the forwarder sent or dropped as counters through the [`metrics`] facade.
/// When no global recorder is installed, the counters are no-ops.
pub struct Telemetry {
    sent: CounterPair,
    dropped: CounterPair,
    dropped_transport: CounterPair,
    dropped_queue: CounterPair,
}

impl Telemetry {
    /// Registers the client counters, labeled with the given transport.
    pub fn new(transport: &'static str) -> Self {
        let labels = [
            Label::from_static_parts("client", "rust"),
            Label::from_static_parts("client_version", env!("CARGO_PKG_VERSION")),
            Label::from_static_parts("client_transport", transport),
        ];

        Self {
            sent: CounterPair::register("sent", &labels),
            dropped: CounterPair::register("dropped", &labels),
            dropped_transport: CounterPair::register("dropped_writer", &labels),
            dropped_queue: CounterPair::register("dropped_queue", &labels),
        }
    }

    /// Flushes the totals collected in `update` into the counters.
    pub fn apply_update(&self, update: &TelemetryUpdate) {
        self.sent.increment(update.sent);
        self.dropped.increment(update.dropped_transport.merged(update.dropped_queue));
        self.dropped_transport.increment(update.dropped_transport);
        self.dropped_queue.increment(update.dropped_queue);
    }
}

/// Totals collected on the forwarder thread between counter updates.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TelemetryUpdate {
    sent: Tally,
    dropped_transport: Tally,
    dropped_queue: Tally,
}

impl TelemetryUpdate {
    /// Records the outcome of a payload of `bytes_len` bytes.
    pub fn record(&mut self, outcome: Outcome, bytes_len: usize) {
        let tally = match outcome {
            Outcome::Sent => &mut self.sent,
            Outcome::DroppedTransport => &mut self.dropped_transport,
            Outcome::DroppedQueue => &mut self.dropped_queue,
        };
        tally.add(bytes_len);
    }

    /// Returns `true` if anything was recorded since the last reset.
    pub fn is_pending(&self) -> bool {
        *self != TelemetryUpdate::default()
    }

    /// Resets all totals to zero.
    pub fn reset(&mut self) {
        *self = TelemetryUpdate::default();
    }
}
