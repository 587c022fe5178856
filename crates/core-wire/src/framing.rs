//! Checksummed frame construction for the main and tool controller channels.

use thiserror::Error;

/// Frames (including the trailing newline) may not exceed this many bytes.
pub const MAX_FRAME_LEN: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("framed line of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLong { len: usize },
}

fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Build a main-channel frame: `CMD N{N}*{C}\n`, where `{C}` is the XOR of
/// every byte in `CMD N{N}` rendered as a signed decimal integer.
pub fn frame_main(command: &str, lineno: u64) -> Result<Vec<u8>, FramingError> {
    let covered = format!("{command} N{lineno}");
    let checksum = xor_checksum(covered.as_bytes()) as i8;
    let line = format!("{covered}*{checksum}\n");
    let bytes = line.into_bytes();
    if bytes.len() > MAX_FRAME_LEN {
        return Err(FramingError::FrameTooLong { len: bytes.len() });
    }
    Ok(bytes)
}

/// Build a tool-channel frame: `1 {payload} *{C}\n`. The XOR covers `1 `,
/// the payload, and the space before `*`, but not `*` or the checksum
/// itself.
pub fn frame_tool(payload: &str) -> Result<Vec<u8>, FramingError> {
    let covered = format!("1 {payload} ");
    let checksum = xor_checksum(covered.as_bytes());
    let line = format!("{covered}*{checksum}\n");
    let bytes = line.into_bytes();
    if bytes.len() > MAX_FRAME_LEN {
        return Err(FramingError::FrameTooLong { len: bytes.len() });
    }
    Ok(bytes)
}
