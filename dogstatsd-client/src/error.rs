use std::io;

use thiserror::Error;

/// Errors that could occur while building a client.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// The configuration is not usable.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Details about the invalid setting.
        reason: String,
    },

    /// Failed to spawn the background forwarder thread.
    #[error("failed to spawn background thread for forwarder")]
    Backend,
}

/// Errors produced while encoding or sending a call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The call cannot be expressed with the client's configuration, such as a service check in the telegraf dialect.
    ///
    /// Raised synchronously, before anything is handed to the transport.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Writing to, or connecting to, the remote server failed.
    #[error("failed to send over {transport}: {source}")]
    Transport {
        /// Transport identifier, such as `udp` or `tcp`.
        transport: &'static str,

        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The transport was closed before the call could be sent.
    #[error("transport is closed")]
    Closed,
}

impl ClientError {
    pub(crate) fn transport(transport: &'static str, source: io::Error) -> Self {
        ClientError::Transport { transport, source }
    }

    /// Returns `true` if this is a configuration error.
    pub const fn is_configuration(&self) -> bool {
        matches!(self, ClientError::Configuration(_))
    }

    /// Returns `true` if this is a transport error.
    pub const fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport { .. })
    }

    /// Returns `true` if the transport was closed.
    pub const fn is_closed(&self) -> bool {
        matches!(self, ClientError::Closed)
    }
}
