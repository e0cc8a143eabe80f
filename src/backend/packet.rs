use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EngineError;
use crate::models::DeviceConfig;

/// Largest payload accepted from the pipe
pub const MAX_PACKET_LEN: usize = 64 * 1024 * 1024;

/// Messages sent from the player to the stream-host process.
///
/// Each packet travels as a little-endian `u32` payload length followed by
/// the bincode encoding of the packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// Open the output with these parameters; always the first packet
    Init(DeviceConfig),
    /// One block of interleaved samples
    Audio { samples: Vec<f32> },
    Shutdown,
}

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("pipe error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed packet: {0}")]
    Codec(#[from] bincode::Error),

    #[error("packet of {len} bytes exceeds the {MAX_PACKET_LEN} byte limit")]
    TooLarge { len: usize },
}

impl From<PacketError> for EngineError {
    fn from(err: PacketError) -> Self {
        match err {
            PacketError::Io(e) => EngineError::HostProcess(e.to_string()),
            other => EngineError::Protocol(other.to_string()),
        }
    }
}

pub fn write_packet<W: Write>(writer: &mut W, packet: &Packet) -> Result<(), PacketError> {
    let payload = bincode::serialize(packet)?;
    if payload.len() > MAX_PACKET_LEN {
        return Err(PacketError::TooLarge { len: payload.len() });
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read the next packet. `Ok(None)` means the writer closed the pipe
/// cleanly between packets.
pub fn read_packet<R: Read>(reader: &mut R) -> Result<Option<Packet>, PacketError> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_PACKET_LEN {
        return Err(PacketError::TooLarge { len });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(bincode::deserialize(&payload)?))
}
