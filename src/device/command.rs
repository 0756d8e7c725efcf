//! Copy-engine command records written into a staging buffer's push region.
//!
//! Each record is a fixed 32-byte little-endian block:
//!
//! ```text
//! 0        4        8                16               24               32
//! | opcode | size   | src_offset     | dst_address    | reserved       |
//! ```
//!
//! `src_offset` is relative to the staging buffer that carries the command.

use super::traits::BackingHandle;

/// Encoded size of one [`CopyCommand`].
pub const COPY_COMMAND_SIZE: u64 = 32;

/// Longest line the copy engine moves in one command.
pub const MAX_COPY_SIZE: u64 = 1 << 17;

/// Opcode of a linear copy.
const OP_COPY: u32 = 0x9_0B5;

/// One linear copy from a staging buffer to a device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyCommand {
    /// Byte offset of the payload inside the staging buffer
    pub src_offset: u64,
    /// Destination device virtual address
    pub dst_address: u64,
    /// Number of bytes to copy
    pub size: u32,
}

impl CopyCommand {
    /// Serialize into exactly [`COPY_COMMAND_SIZE`] bytes.
    pub fn encode(&self) -> [u8; COPY_COMMAND_SIZE as usize] {
        let mut out = [0u8; COPY_COMMAND_SIZE as usize];
        out[0..4].copy_from_slice(&OP_COPY.to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..16].copy_from_slice(&self.src_offset.to_le_bytes());
        out[16..24].copy_from_slice(&self.dst_address.to_le_bytes());
        out
    }

    /// Parse one record. Returns `None` for a short slice or a foreign opcode.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < COPY_COMMAND_SIZE as usize {
            return None;
        }
        let word = |range: std::ops::Range<usize>| -> Option<u64> {
            let len = range.len();
            let mut buf = [0u8; 8];
            buf[..len].copy_from_slice(bytes.get(range)?);
            Some(u64::from_le_bytes(buf))
        };
        if word(0..4)? as u32 != OP_COPY {
            return None;
        }
        Some(Self {
            size: word(4..8)? as u32,
            src_offset: word(8..16)?,
            dst_address: word(16..24)?,
        })
    }
}

/// A run of encoded commands handed to [`super::SubmissionQueue::submit`].
#[derive(Debug, Clone, Copy)]
pub struct CommandList<'a> {
    /// Staging buffer the commands (and their payloads) live in
    pub buffer: BackingHandle,
    /// Encoded command records
    pub bytes: &'a [u8],
}

impl<'a> CommandList<'a> {
    /// Decode every record, stopping at the first malformed one.
    pub fn commands(&self) -> impl Iterator<Item = CopyCommand> + 'a {
        self.bytes
            .chunks(COPY_COMMAND_SIZE as usize)
            .map_while(CopyCommand::decode)
    }

    /// Number of whole records in the list.
    pub fn len(&self) -> usize {
        self.bytes.len() / COPY_COMMAND_SIZE as usize
    }

    /// Whether the list carries no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let cmd = CopyCommand {
            src_offset: 0xFFE0,
            dst_address: 0x1_0000_0040,
            size: 32,
        };
        let bytes = cmd.encode();
        assert_eq!(&bytes[4..8], &32u32.to_le_bytes());
        assert_eq!(&bytes[24..32], &[0u8; 8]);
        assert_eq!(CopyCommand::decode(&bytes), Some(cmd));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(CopyCommand::decode(&[0u8; 8]), None);
        assert_eq!(CopyCommand::decode(&[0u8; 32]), None);
    }

    #[test]
    fn test_command_list_iterates_in_order() {
        let mut bytes = Vec::new();
        for i in 0..3u64 {
            let cmd = CopyCommand {
                src_offset: 1000 - i * 100,
                dst_address: 0x4000 + i * 100,
                size: 100,
            };
            bytes.extend_from_slice(&cmd.encode());
        }
        let list = CommandList {
            buffer: BackingHandle::from_raw(7),
            bytes: &bytes,
        };
        assert_eq!(list.len(), 3);
        let dsts: Vec<u64> = list.commands().map(|c| c.dst_address).collect();
        assert_eq!(dsts, vec![0x4000, 0x4064, 0x40C8]);
    }
}
