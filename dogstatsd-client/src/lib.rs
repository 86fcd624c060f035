//! A client for sending metrics, service checks, and events to a [DogStatsD][dsd]-compatible server.
//!
//! [dsd]: https://docs.datadoghq.com/developers/dogstatsd/
//!
//! # Usage
//!
//! ```no_run
//! # use dogstatsd_client::{ChildOptions, ClientBuilder};
//! // First, create a builder.
//! //
//! // The builder can configure many aspects of the client, such as the remote address, the protocol, global tags, and
//! // whether lines are buffered before being sent.
//! let client = ClientBuilder::default()
//!     .with_prefix("myapp.")
//!     .with_global_tags(["env:prod", "region:us-east-1"])
//!     .build()
//!     .expect("failed to build client");
//!
//! // Calls are encoded right away, and sent in the background.
//! client.increment("requests").unwrap();
//! client.timing_with("request.latency", 12.5).tags(["route:/login"]).send().unwrap();
//!
//! // Child clients share the same connection, layering their own prefix and tags over their parent's.
//! let db = client.child_client(ChildOptions::new().with_global_tags(["component:db"]));
//! db.gauge("pool.active", 4).unwrap();
//!
//! // Closing flushes anything buffered, and shuts down the connection for every client sharing it.
//! client.close();
//! ```
//!
//! # Features
//!
//! ## Tag merging
//!
//! Tags are either a list of preformatted `key:value` (or bare) tags, or a map of keys to values which are sanitized
//! before use. Whenever two tag sets meet, such as a call's tags over the client's global tags, tags from the more
//! specific set replace tags with the same key from the less specific one, in place. See [`merge`] for the details.
//!
//! ## Telegraf dialect
//!
//! Servers speaking the telegraf flavor of StatsD expect tags in the metric name, as `name,key=value:1|c`. This is
//! enabled with [`ClientBuilder::with_telegraf`]. Service checks and events have no telegraf encoding, and are rejected
//! with [`ClientError::Configuration`].
//!
//! ## Transports
//!
//! Lines are sent over UDP by default, with each payload sent as an independent datagram. Over TCP, a single persistent
//! connection is used: payloads are queued while disconnected, and reconnection is attempted with exponential backoff.
//! In both cases, a background thread owns the socket, and calls never block on the network.
//!
//! A mock transport performs no I/O at all, and records lines so that they can be inspected with
//! [`Client::mock_lines`].
//!
//! ## Buffering
//!
//! When a maximum buffer size is configured, lines are coalesced into newline-delimited payloads up to that size, and
//! flushed when full, on a fixed interval, or when the client is flushed or closed.
//!
//! ## Telemetry
//!
//! The forwarder counts the payloads and bytes it sends, and those it drops because of a failed write or a full
//! backlog. The counts are reported as `datadog.dogstatsd.client.*` counters through the [`metrics`] facade, to
//! whichever recorder is installed. Telemetry can be turned off with [`ClientBuilder::with_telemetry`].
//!
//! # Missing
//!
//! ## Unix domain sockets
//!
//! We do not yet support sending over Unix domain sockets.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{ClientBuilder, ClientConfig};

mod client;
pub use self::client::{CheckCall, ChildOptions, Client, EventCall, MetricCall};

mod error;
pub use self::error::{BuildError, ClientError};

mod sampling;
pub use self::sampling::{FixedRandom, RandomSource, ThreadRandom};

mod tags;
pub use self::tags::{merge, sanitize, Dialect, Tags};

mod telemetry;

mod transport;
pub use self::transport::{
    CloseCallback, Completion, ErrorHandler, Protocol, SendCallback, Transport, TransportState,
};

mod writer;
pub use self::writer::{
    CheckOptions, CheckStatus, EventAlertType, EventOptions, EventPriority, MetricType, MetricValue, Timestamp,
};
