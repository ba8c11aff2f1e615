use core::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Families of adapter backends a connection can be built on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Mock,
    Slcan,
    SocketCan,
    GsUsb,
}

/// Health of a connection, observable from any thread.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    NotConnected = 0,
    Connecting = 1,
    Connected = 2,
}

/// Atomic cell holding a [`ConnectionStatus`].
///
/// Reads and writes never go through the owning thread, so observers can
/// poll connection health without blocking on it.
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(ConnectionStatus::NotConnected as u8))
    }

    pub fn load(&self) -> ConnectionStatus {
        match self.0.load(Ordering::SeqCst) {
            1 => ConnectionStatus::Connecting,
            2 => ConnectionStatus::Connected,
            _ => ConnectionStatus::NotConnected,
        }
    }

    pub fn store(&self, status: ConnectionStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-bus link configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    pub bitrate: u32,
    pub listen_only: bool,
    pub single_wire: bool,
    pub active: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bitrate: 250_000,
            listen_only: false,
            single_wire: false,
            active: false,
        }
    }
}

/// One acceptance rule of the receive-path filter engine.
///
/// A frame matches when `(id & mask) == (frame_id & mask)`; a matching
/// frame is always kept, and additionally flagged when `notify` is set.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    pub id: u32,
    pub mask: u32,
    pub notify: bool,
}

/// Disposition of one inbound frame as decided by the filter engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameVerdict {
    pub discard: bool,
    pub notify: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

/// A CAN data frame as carried through the inbound queue.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub id: u32,
    pub extended: bool,
    /// Index of the logical bus the frame arrived on.
    pub bus: usize,
    pub len: u8,
    pub data: [u8; 8],
    pub timestamp: Option<Timestamp>,
}

impl Frame {
    /// Builds a frame, refusing payloads longer than 8 bytes.
    pub fn new(id: u32, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id,
            extended: id > 0x7FF,
            bus: 0,
            len: data.len() as u8,
            data: buf,
            timestamp: None,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "0x{:08X} [{}]", self.id, self.len)
        } else {
            write!(f, "0x{:03X} [{}]", self.id, self.len)
        }
    }
}

/// Construction parameters for a [`crate::CanConnection`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Port identifier, e.g. "/dev/ttyACM0" or "can0".
    pub port: String,
    pub kind: ConnectionKind,
    /// Number of logical buses the adapter exposes (at least 1).
    pub buses: usize,
    /// Capacity of the inbound frame queue (at least 1).
    pub queue_capacity: usize,
    /// Whether a dedicated owning thread is created for this connection.
    pub threaded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rejects_long_payload() {
        assert!(Frame::new(0x123, &[0u8; 9]).is_none());
        let frame = Frame::new(0x123, &[1, 2, 3]).unwrap();
        assert_eq!(frame.len, 3);
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert!(!frame.extended);
    }

    #[test]
    fn test_frame_extended_id() {
        let frame = Frame::new(0x18FF_50E5, &[]).unwrap();
        assert!(frame.extended);
    }

    #[test]
    fn test_status_cell_round_trip() {
        let cell = StatusCell::new();
        assert_eq!(cell.load(), ConnectionStatus::NotConnected);
        cell.store(ConnectionStatus::Connected);
        assert_eq!(cell.load(), ConnectionStatus::Connected);
        cell.store(ConnectionStatus::Connecting);
        assert_eq!(cell.load(), ConnectionStatus::Connecting);
    }
}
