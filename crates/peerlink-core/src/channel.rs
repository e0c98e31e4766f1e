//! Established channels handed to the application

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::types::{PeerAddress, SignalStrength};

/// Bidirectional byte stream produced by a transport
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Which side initiated the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Produced by the acceptor
    Inbound,
    /// Produced by the initiator
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// A live channel to one peer
///
/// Moved into the application listener exactly once; nothing in the core
/// keeps a reference after the handoff.
pub struct EstablishedChannel {
    stream: Box<dyn ByteStream>,
    direction: Direction,
    signal_strength: Option<SignalStrength>,
    remote: Option<PeerAddress>,
}

impl EstablishedChannel {
    pub fn new(
        stream: Box<dyn ByteStream>,
        direction: Direction,
        signal_strength: Option<SignalStrength>,
        remote: Option<PeerAddress>,
    ) -> Self {
        Self {
            stream,
            direction,
            signal_strength,
            remote,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn signal_strength(&self) -> Option<SignalStrength> {
        self.signal_strength
    }

    pub fn remote(&self) -> Option<&PeerAddress> {
        self.remote.as_ref()
    }

    pub fn into_stream(self) -> Box<dyn ByteStream> {
        self.stream
    }
}

impl fmt::Debug for EstablishedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EstablishedChannel")
            .field("direction", &self.direction)
            .field("signal_strength", &self.signal_strength)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_channel_carries_stream_and_metadata() {
        let (local, mut remote) = tokio::io::duplex(64);
        let channel = EstablishedChannel::new(
            Box::new(local),
            Direction::Outbound,
            Some(SignalStrength(-48)),
            Some(PeerAddress::new("peer-a")),
        );

        assert_eq!(channel.direction(), Direction::Outbound);
        assert_eq!(channel.signal_strength(), Some(SignalStrength(-48)));
        assert_eq!(channel.remote().map(|a| a.as_str()), Some("peer-a"));

        let mut stream = channel.into_stream();
        stream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }
}
