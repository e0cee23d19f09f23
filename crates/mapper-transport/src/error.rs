use thiserror::Error;

/// Transport-layer failures. Deliberately thin: the real wire boundary (UDP
/// multicast sockets, TCP unicast links) is out of scope (§1); this covers
/// only what the in-process stand-in can actually fail at.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no peer registered under device name {0:?}")]
    UnknownPeer(String),
    #[error("bus channel for {0:?} is closed")]
    ChannelClosed(String),
}
