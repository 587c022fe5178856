//! Validator for tool-channel reply lines (`1 ... *N`).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolReplyError {
    #[error("tool reply line too short")]
    Short,
    #[error("tool reply line missing the `1 ` prefix")]
    WrongPrefix,
    #[error("tool reply line missing a `*` checksum sigil")]
    NoChecksumSigil,
    #[error("tool reply checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u8, got: i64 },
}

fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Validate a tool-channel reply line (without its terminating newline).
/// Returns the payload length (the bytes between the `1 ` prefix and the
/// space preceding the checksum) on success.
pub fn validate_tool_reply(line: &[u8]) -> Result<usize, ToolReplyError> {
    const PREFIX_LEN: usize = 2; // "1 "
    if line.len() < PREFIX_LEN + 2 {
        return Err(ToolReplyError::Short);
    }
    if &line[..PREFIX_LEN] != b"1 " {
        return Err(ToolReplyError::WrongPrefix);
    }
    let star = line
        .iter()
        .position(|&b| b == b'*')
        .ok_or(ToolReplyError::NoChecksumSigil)?;
    if star < PREFIX_LEN {
        return Err(ToolReplyError::NoChecksumSigil);
    }

    let covered = &line[..star];
    let expected = xor_checksum(covered);
    let tail = &line[star + 1..];
    let got: i64 = std::str::from_utf8(tail)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(i64::MIN);
    if got != i64::from(expected) {
        return Err(ToolReplyError::ChecksumMismatch { expected, got });
    }

    // payload sits between the "1 " prefix and the trailing space before '*'
    Ok(star - PREFIX_LEN - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::frame_tool;

    fn strip_newline(frame: Vec<u8>) -> Vec<u8> {
        let mut frame = frame;
        assert_eq!(frame.pop(), Some(b'\n'));
        frame
    }

    #[test]
    fn round_trips_a_built_tool_frame() {
        let line = strip_newline(frame_tool("H0 200.0").unwrap());
        let payload_len = validate_tool_reply(&line).unwrap();
        assert_eq!(payload_len, "H0 200.0".len());
    }

    #[test]
    fn rejects_short_line() {
        assert_eq!(validate_tool_reply(b"1"), Err(ToolReplyError::Short));
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert_eq!(
            validate_tool_reply(b"2 OK *0"),
            Err(ToolReplyError::WrongPrefix)
        );
    }

    #[test]
    fn rejects_missing_checksum_sigil() {
        assert_eq!(
            validate_tool_reply(b"1 OK no checksum here"),
            Err(ToolReplyError::NoChecksumSigil)
        );
    }

    #[test]
    fn rejects_checksum_mismatch() {
        let mut line = strip_newline(frame_tool("H0 200.0").unwrap());
        let last = line.len() - 1;
        line[last] = if line[last] == b'9' { b'8' } else { b'9' };
        assert!(matches!(
            validate_tool_reply(&line),
            Err(ToolReplyError::ChecksumMismatch { .. })
        ));
    }
}
