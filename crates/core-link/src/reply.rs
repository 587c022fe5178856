//! Parses the three controller acknowledgement shapes the dialogue layer
//! understands. Any other line is the caller's to pass through to
//! diagnostics unmodified.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerReply {
    Ln { received_ln: u64, queue_depth: usize },
    LineMismatch { expected_ln: u64, received_ln: u64 },
    ChecksumMismatch { lineno: u64 },
}

/// Parse a single reply line (without its trailing newline). Returns
/// `None` for anything that isn't one of the three recognised shapes —
/// the caller is expected to forward such lines untouched.
pub fn parse_controller_reply(line: &str) -> Option<ControllerReply> {
    let mut fields = line.split_whitespace();
    match fields.next()? {
        "LN" => {
            let received_ln = fields.next()?.parse().ok()?;
            let queue_depth = fields.next()?.parse().ok()?;
            Some(ControllerReply::Ln {
                received_ln,
                queue_depth,
            })
        }
        "ER" => match fields.next()? {
            "LINE_MISMATCH" => {
                let expected_ln = fields.next()?.parse().ok()?;
                let received_ln = fields.next()?.parse().ok()?;
                Some(ControllerReply::LineMismatch {
                    expected_ln,
                    received_ln,
                })
            }
            "CHECKSUM_MISMATCH" => {
                let lineno = fields.next()?.parse().ok()?;
                Some(ControllerReply::ChecksumMismatch { lineno })
            }
            _ => None,
        },
        _ => None,
    }
}
