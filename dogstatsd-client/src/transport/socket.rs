use std::{
    cmp,
    io::{self, Write as _},
    net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, UdpSocket},
    time::{Duration, Instant},
};

use tracing::{debug, trace};

use super::{Protocol, RemoteAddr, SharedState};

enum Connection {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl Connection {
    fn connect(remote_addr: &RemoteAddr, write_timeout: Duration) -> io::Result<Self> {
        let addrs = remote_addr.resolve()?;

        match remote_addr.protocol {
            Protocol::Udp => {
                let local: SocketAddr = if addrs[0].is_ipv4() {
                    (Ipv4Addr::UNSPECIFIED, 0).into()
                } else {
                    (Ipv6Addr::UNSPECIFIED, 0).into()
                };
                UdpSocket::bind(local).and_then(|socket| {
                    socket.connect(&addrs[..])?;
                    socket.set_write_timeout(Some(write_timeout))?;
                    Ok(Connection::Udp(socket))
                })
            }
            Protocol::Tcp => {
                let mut last_error = None;
                for addr in &addrs {
                    match TcpStream::connect_timeout(addr, write_timeout) {
                        Ok(stream) => {
                            stream.set_write_timeout(Some(write_timeout))?;
                            stream.set_nodelay(true)?;
                            return Ok(Connection::Tcp(stream));
                        }
                        Err(e) => last_error = Some(e),
                    }
                }
                Err(last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable)))
            }
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Udp(socket) => socket.send(buf),
            Connection::Tcp(stream) => stream.write_all(buf).map(|()| buf.len()),
        }
    }

    fn shutdown(self) {
        if let Connection::Tcp(mut stream) = self {
            let _ = stream.flush();
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

// Stand-in deadline for delays too long to add to the current instant.
fn far_future() -> Instant {
    let now = Instant::now();
    now.checked_add(Duration::from_secs(86_400 * 365)).unwrap_or(now)
}

/// Exponential backoff between reconnection attempts.
#[derive(Clone, Debug)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = cmp::max(initial, max);
        Self { initial, max, current: initial }
    }

    /// Returns the delay before the next attempt, and doubles the delay after that.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = cmp::min(self.current.saturating_mul(2), self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

enum LinkState {
    // Intermediate state during send attempts.
    Inconsistent,

    // Not connected. A connection attempt is allowed once `retry_at` has passed, or right away if unset.
    Disconnected { retry_at: Option<Instant> },

    // Connected and ready to send.
    Ready(Connection),
}

/// A connection to the remote server that reconnects on demand.
///
/// Without a backoff, every send attempts to connect when disconnected. With a backoff, failed connection attempts
/// push the next attempt further out, and sends before then fail fast with [`io::ErrorKind::NotConnected`].
pub(crate) struct Link {
    remote_addr: RemoteAddr,
    write_timeout: Duration,
    backoff: Option<Backoff>,
    state: LinkState,
    shared: SharedState,
}

impl Link {
    pub fn new(
        remote_addr: RemoteAddr,
        write_timeout: Duration,
        backoff: Option<Backoff>,
        shared: SharedState,
    ) -> Self {
        Self {
            remote_addr,
            write_timeout,
            backoff,
            state: LinkState::Disconnected { retry_at: None },
            shared,
        }
    }

    /// Returns the time of the next scheduled connection attempt, if we're waiting on one.
    pub fn retry_at(&self) -> Option<Instant> {
        match self.state {
            LinkState::Disconnected { retry_at } => retry_at,
            _ => None,
        }
    }

    /// Returns `true` if a send right now would either use a live connection or attempt to establish one.
    pub fn can_attempt(&self, now: Instant) -> bool {
        match self.state {
            LinkState::Disconnected { retry_at: Some(retry_at) } => now >= retry_at,
            _ => true,
        }
    }

    fn schedule_retry(&mut self) -> Option<Instant> {
        self.backoff.as_mut().map(|backoff| {
            let delay = backoff.next_delay();
            debug!(remote_addr = %self.remote_addr, ?delay, "Scheduling reconnection attempt.");
            Instant::now().checked_add(delay).unwrap_or_else(far_future)
        })
    }

    /// Sends the payload, connecting first if needed.
    pub fn try_send(&mut self, payload: &[u8]) -> io::Result<usize> {
        loop {
            let old_state = std::mem::replace(&mut self.state, LinkState::Inconsistent);
            match old_state {
                LinkState::Inconsistent => unreachable!("transitioned _from_ inconsistent state"),
                LinkState::Disconnected { retry_at } => {
                    if retry_at.is_some_and(|retry_at| Instant::now() < retry_at) {
                        self.state = LinkState::Disconnected { retry_at };
                        return Err(io::Error::new(io::ErrorKind::NotConnected, "waiting to reconnect"));
                    }

                    match Connection::connect(&self.remote_addr, self.write_timeout) {
                        Ok(connection) => {
                            trace!(remote_addr = %self.remote_addr, "Connected.");
                            if let Some(backoff) = self.backoff.as_mut() {
                                backoff.reset();
                            }
                            self.shared.mark_ready();
                            self.state = LinkState::Ready(connection);
                        }
                        Err(e) => {
                            let retry_at = self.schedule_retry();
                            self.state = LinkState::Disconnected { retry_at };
                            return Err(e);
                        }
                    }
                }
                LinkState::Ready(mut connection) => {
                    let result = connection.send(payload);
                    if result.is_ok() {
                        self.state = LinkState::Ready(connection);
                    } else {
                        connection.shutdown();
                        let retry_at = self.schedule_retry();
                        self.state = LinkState::Disconnected { retry_at };
                    }

                    return result;
                }
            }
        }
    }

    /// Closes the connection, if any.
    pub fn shutdown(&mut self) {
        if let LinkState::Ready(connection) =
            std::mem::replace(&mut self.state, LinkState::Disconnected { retry_at: None })
        {
            connection.shutdown();
        }
    }
}
