use std::{fmt, sync::Arc, time::Duration};

use serde::Deserialize;

use crate::{
    client::{Client, Shared},
    error::{BuildError, ClientError},
    sampling::{RandomSource, Sampler, ThreadRandom},
    tags::{merge, Dialect, Tags},
    transport::{
        forwarder::ForwarderHandle, mock::MockTransport, ErrorHandler, ForwarderConfiguration, Protocol,
        RemoteAddr, Transport,
    },
};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8125;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 1000;
const DEFAULT_MAX_QUEUE_LEN: usize = 1024;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;
const DEFAULT_MAX_BACKOFF_MS: u64 = 10_000;
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(3600);

/// Client configuration, in a form that can be deserialized from a configuration file.
///
/// Unknown keys are ignored, and every key is optional. A handful of keys also accept their camel-cased spelling, such
/// as `globalTags` for `global_tags`.
///
/// ```
/// # use dogstatsd_client::ClientConfig;
/// let config: ClientConfig = serde_json::from_str(r#"{ "port": 9125, "globalTags": { "env": "prod" } }"#).unwrap();
/// let client = config.into_builder().with_mock(true).build().unwrap();
/// client.increment("requests").unwrap();
/// assert_eq!(client.mock_lines().unwrap(), vec!["requests:1|c|#env:prod"]);
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Host of the remote server.
    pub host: String,

    /// Port of the remote server.
    pub port: u16,

    /// Protocol used to reach the remote server.
    pub protocol: Protocol,

    /// Prefix prepended to every metric name, check name, and event title.
    pub prefix: String,

    /// Suffix appended to every metric name, check name, and event title.
    pub suffix: String,

    /// Tags attached to every call.
    #[serde(alias = "globalTags")]
    pub global_tags: Tags,

    /// Whether to use the telegraf dialect.
    pub telegraf: bool,

    /// Whether to record lines in memory instead of sending them.
    pub mock: bool,

    /// Maximum size of a coalesced payload, in bytes. Zero disables buffering.
    #[serde(alias = "maxBufferSize")]
    pub max_buffer_size: usize,

    /// How often buffered lines are flushed, in milliseconds.
    #[serde(alias = "bufferFlushInterval")]
    pub buffer_flush_interval_ms: u64,

    /// Sample rate used by calls that don't specify one.
    #[serde(alias = "sampleRate")]
    pub sample_rate: f64,

    /// Socket write timeout, in milliseconds.
    pub write_timeout_ms: u64,

    /// Capacity of the send queue, and of the backlog kept while a stream connection is down.
    pub max_queue_len: usize,

    /// Delay before the first reconnection attempt, in milliseconds.
    pub initial_backoff_ms: u64,

    /// Upper bound on the delay between reconnection attempts, in milliseconds.
    pub max_backoff_ms: u64,

    /// Whether to report client telemetry through the `metrics` facade.
    pub telemetry: bool,
}

impl ClientConfig {
    /// Converts the configuration into a builder.
    pub fn into_builder(self) -> ClientBuilder {
        ClientBuilder::from(self)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            protocol: Protocol::Udp,
            prefix: String::new(),
            suffix: String::new(),
            global_tags: Tags::default(),
            telegraf: false,
            mock: false,
            max_buffer_size: 0,
            buffer_flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            sample_rate: 1.0,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            telemetry: true,
        }
    }
}

/// Builder for a DogStatsD client.
pub struct ClientBuilder {
    host: String,
    port: u16,
    protocol: Protocol,
    prefix: String,
    suffix: String,
    global_tags: Tags,
    telegraf: bool,
    mock: bool,
    max_buffer_size: usize,
    flush_interval: Duration,
    sample_rate: f64,
    write_timeout: Duration,
    max_queue_len: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    telemetry: bool,
    error_handler: Option<ErrorHandler>,
    random_source: Arc<dyn RandomSource>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Set the remote address to send lines to.
    ///
    /// The address is in the format of `<host>:<port>`, optionally preceded by a `udp://` or `tcp://` scheme to also
    /// set the protocol. IPv6 hosts must be enclosed in brackets, as in `[::1]:8125`.
    ///
    /// Defaults to sending to `127.0.0.1:8125` over UDP.
    ///
    /// # Errors
    ///
    /// If the given address is not able to be parsed as a valid address, an error will be returned indicating the
    /// reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        let (protocol, host, port) =
            parse_remote_address(addr.as_ref()).map_err(|reason| BuildError::InvalidRemoteAddress { reason })?;
        if let Some(protocol) = protocol {
            self.protocol = protocol;
        }
        self.host = host;
        self.port = port;
        Ok(self)
    }

    /// Set the host of the remote server.
    ///
    /// Defaults to `127.0.0.1`.
    #[must_use]
    pub fn with_host<H: Into<String>>(mut self, host: H) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port of the remote server.
    ///
    /// Defaults to 8125.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the protocol used to reach the remote server.
    ///
    /// Defaults to [`Protocol::Udp`].
    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the prefix prepended to every metric name, check name, and event title.
    #[must_use]
    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the suffix appended to every metric name, check name, and event title.
    #[must_use]
    pub fn with_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Set the tags attached to every call.
    ///
    /// Tags given in map form have their keys and values sanitized, while tags given in list form are used as-is.
    #[must_use]
    pub fn with_global_tags<T: Into<Tags>>(mut self, tags: T) -> Self {
        self.global_tags = tags.into();
        self
    }

    /// Sets whether or not to use the telegraf dialect.
    ///
    /// In the telegraf dialect, tags are carried in the metric name as `name,key=value`, and service checks and events
    /// are not supported.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_telegraf(mut self, telegraf: bool) -> Self {
        self.telegraf = telegraf;
        self
    }

    /// Sets whether or not to use the mock transport.
    ///
    /// The mock transport performs no I/O: lines are recorded in memory, and can be retrieved with
    /// [`Client::mock_lines`].
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_mock(mut self, mock: bool) -> Self {
        self.mock = mock;
        self
    }

    /// Set the maximum size of a coalesced payload, in bytes.
    ///
    /// When non-zero, lines are buffered and sent together once the next line would not fit, when the flush interval
    /// elapses, or when the client is flushed or closed. This should generally be set no higher than the receive buffer
    /// size of the remote server.
    ///
    /// Defaults to 0, which sends every line on its own.
    #[must_use]
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    /// Set how often buffered lines are flushed.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Set the sample rate used by calls that don't specify one.
    ///
    /// Defaults to 1.0, which sends every call.
    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the write timeout of the socket.
    ///
    /// Stream connections also use it as their connect timeout.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the capacity of the send queue.
    ///
    /// Calls made while the queue is full fail right away. For TCP, this also bounds how many payloads are kept while
    /// the connection is down, past which the oldest payloads are dropped.
    ///
    /// Defaults to 1,024.
    #[must_use]
    pub fn with_max_queue_length(mut self, max_queue_len: usize) -> Self {
        self.max_queue_len = max_queue_len;
        self
    }

    /// Set the bounds of the exponential backoff between TCP reconnection attempts.
    ///
    /// Neither bound may exceed one hour, or building the client fails.
    ///
    /// Defaults to starting at 100 milliseconds, and doubling up to 10 seconds.
    #[must_use]
    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Sets whether or not to enable telemetry for the client.
    ///
    /// When enabled, counters describing how many payloads and bytes were sent or dropped are reported through the
    /// [`metrics`] facade, and land in whichever recorder is installed globally.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Set the handler for errors that have no per-call callback to go to.
    ///
    /// Configuration errors, such as sending a service check in the telegraf dialect, are routed to the handler
    /// instead of being returned to the caller.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ClientError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Set the randomness source used for sampling.
    ///
    /// Defaults to [`ThreadRandom`].
    #[must_use]
    pub fn with_random_source<R>(mut self, source: R) -> Self
    where
        R: RandomSource + 'static,
    {
        self.random_source = Arc::new(source);
        self
    }

    /// Set a custom transport.
    ///
    /// The transport receives every encoded line in place of the built-in UDP, TCP, and mock transports, and the
    /// remote address settings are ignored.
    #[must_use]
    pub fn with_transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Builds the client.
    ///
    /// Unless the mock transport is used, a background thread is spawned to forward lines to the remote server. The
    /// connection itself is established lazily, on the first send.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the background thread cannot be spawned, an error will be returned.
    pub fn build(self) -> Result<Client, BuildError> {
        if self.max_queue_len == 0 {
            return Err(BuildError::InvalidConfiguration {
                reason: "maximum queue length must be greater than zero".to_string(),
            });
        }
        if self.initial_backoff > MAX_RECONNECT_BACKOFF || self.max_backoff > MAX_RECONNECT_BACKOFF {
            return Err(BuildError::InvalidConfiguration {
                reason: format!("reconnection backoff must not exceed {MAX_RECONNECT_BACKOFF:?}"),
            });
        }

        let dialect = Dialect::from_telegraf(self.telegraf);
        let global_tags = merge(&[], &self.global_tags, dialect);

        let mut mock = None;
        let transport: Arc<dyn Transport> = if let Some(transport) = self.transport {
            transport
        } else if self.mock {
            let transport = Arc::new(MockTransport::new());
            mock = Some(Arc::clone(&transport));
            transport
        } else {
            if self.host.is_empty() {
                return Err(BuildError::InvalidRemoteAddress { reason: "host is empty".to_string() });
            }

            let config = ForwarderConfiguration {
                remote_addr: RemoteAddr::new(self.protocol, self.host, self.port),
                max_buffer_size: self.max_buffer_size,
                flush_interval: self.flush_interval,
                write_timeout: self.write_timeout,
                max_queue_len: self.max_queue_len,
                initial_backoff: self.initial_backoff,
                max_backoff: self.max_backoff,
                telemetry: self.telemetry,
            };
            Arc::new(ForwarderHandle::spawn(config)?)
        };

        let shared = Shared {
            transport,
            mock,
            dialect,
            sampler: Sampler::new(self.random_source),
            default_sample_rate: self.sample_rate,
        };

        Ok(Client::root(shared, self.prefix, self.suffix, global_tags, self.error_handler))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder::from(ClientConfig::default())
    }
}

impl From<ClientConfig> for ClientBuilder {
    fn from(config: ClientConfig) -> Self {
        ClientBuilder {
            host: config.host,
            port: config.port,
            protocol: config.protocol,
            prefix: config.prefix,
            suffix: config.suffix,
            global_tags: config.global_tags,
            telegraf: config.telegraf,
            mock: config.mock,
            max_buffer_size: config.max_buffer_size,
            flush_interval: Duration::from_millis(config.buffer_flush_interval_ms),
            sample_rate: config.sample_rate,
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            max_queue_len: config.max_queue_len,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            telemetry: config.telemetry,
            error_handler: None,
            random_source: Arc::new(ThreadRandom),
            transport: None,
        }
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("prefix", &self.prefix)
            .field("suffix", &self.suffix)
            .field("global_tags", &self.global_tags)
            .field("telegraf", &self.telegraf)
            .field("mock", &self.mock)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("sample_rate", &self.sample_rate)
            .field("error_handler", &self.error_handler.is_some())
            .field("custom_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

fn parse_remote_address(addr: &str) -> Result<(Option<Protocol>, String, u16), String> {
    let (protocol, rest) = match addr.split_once("://") {
        Some(("udp", rest)) => (Some(Protocol::Udp), rest),
        Some(("tcp", rest)) => (Some(Protocol::Tcp), rest),
        Some((scheme, _)) => return Err(format!("unknown scheme '{}' (expected 'udp' or 'tcp')", scheme)),
        None => (None, addr),
    };

    let (host, port) = rest.rsplit_once(':').ok_or_else(|| format!("missing port in '{}'", addr))?;
    let host = host.strip_prefix('[').and_then(|host| host.strip_suffix(']')).unwrap_or(host);
    if host.is_empty() {
        return Err(format!("missing host in '{}'", addr));
    }
    let port = port.parse::<u16>().map_err(|e| format!("invalid port in '{}': {}", addr, e))?;

    Ok((protocol, host.to_string(), port))
}
