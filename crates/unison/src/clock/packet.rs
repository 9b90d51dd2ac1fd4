//! Net time packet codec
//!
//! Fixed 16-byte datagram: the requester's local time followed by the
//! provider's time, both big-endian u64 nanoseconds. A request carries
//! `CLOCK_TIME_NONE` in the remote slot; the provider echoes the local
//! time and fills in its own.

use thiserror::Error;

pub const PACKET_SIZE: usize = 16;

/// Marker for "no time" in either slot.
pub const CLOCK_TIME_NONE: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetTimePacket {
    pub local_time: u64,
    pub remote_time: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("net time packet too short: {0} bytes, need {PACKET_SIZE}")]
pub struct PacketTooShort(pub usize);

impl NetTimePacket {
    /// A request stamped with the sender's local time.
    pub fn request(local_time: u64) -> Self {
        Self {
            local_time,
            remote_time: CLOCK_TIME_NONE,
        }
    }

    /// The provider's answer to `self`.
    pub fn reply(&self, remote_time: u64) -> Self {
        Self {
            local_time: self.local_time,
            remote_time,
        }
    }

    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        buf[..8].copy_from_slice(&self.local_time.to_be_bytes());
        buf[8..].copy_from_slice(&self.remote_time.to_be_bytes());
        buf
    }

    /// Decode the first 16 bytes of `buf`; trailing bytes are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketTooShort> {
        if buf.len() < PACKET_SIZE {
            return Err(PacketTooShort(buf.len()));
        }

        let mut local = [0u8; 8];
        let mut remote = [0u8; 8];
        local.copy_from_slice(&buf[..8]);
        remote.copy_from_slice(&buf[8..PACKET_SIZE]);

        Ok(Self {
            local_time: u64::from_be_bytes(local),
            remote_time: u64::from_be_bytes(remote),
        })
    }
}
