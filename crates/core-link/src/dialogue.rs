//! Assigns line numbers, tracks *sent* vs *padding*, and retransmits the
//! sent window on a line-number or checksum mismatch.

use std::io::{self, Write};

use thiserror::Error;
use tracing::{debug, warn};

use core_queue::CommandQueue;
use core_wire::{frame_main, FramingError};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("framing failed: {0}")]
    Framing(#[from] FramingError),
    #[error("controller channel write failed: {0}")]
    Io(#[from] io::Error),
}

/// The reliability layer's send/acknowledge state. Owns the *sent* and
/// *padding* queues and the monotonically increasing line-number counter.
#[derive(Debug, Default)]
pub struct Dialogue {
    next_lineno: u64,
    sent: CommandQueue,
    padding: CommandQueue,
    retransmit_token: u64,
}

impl Dialogue {
    pub fn new() -> Self {
        Self {
            next_lineno: 1,
            sent: CommandQueue::new(),
            padding: CommandQueue::new(),
            retransmit_token: 0,
        }
    }

    pub fn sent(&self) -> &CommandQueue {
        &self.sent
    }

    pub fn padding(&self) -> &CommandQueue {
        &self.padding
    }

    pub fn retransmit_token(&self) -> u64 {
        self.retransmit_token
    }

    /// Frame `command`, assign it the next line number, write it to the
    /// channel, and record it in *sent*. Never partially attempted: either
    /// the whole frame reaches the channel or the error is surfaced and
    /// nothing is recorded.
    pub fn send<W: Write>(&mut self, writer: &mut W, command: &str) -> Result<u64, LinkError> {
        let lineno = self.next_lineno;
        let frame = frame_main(command, lineno)?;
        writer.write_all(&frame)?;
        self.next_lineno += 1;
        self.sent.append(frame, lineno);
        Ok(lineno)
    }

    /// `LN {received_ln} {queue_depth}`: acknowledge everything up through
    /// `received_ln`, truncate *padding* to `queue_depth`, and return the
    /// logical in-flight count `queue_depth + |sent|`.
    pub fn handle_ln(&mut self, received_ln: u64, queue_depth: usize) -> usize {
        let acked = self.sent.drain_while(|item| item.lineno() <= received_ln);
        for item in acked {
            self.padding.append_item(item);
        }

        while self.padding.len() > queue_depth {
            self.padding.pop_front();
        }

        if self.retransmit_token != 0 && received_ln >= self.retransmit_token {
            debug!(token = self.retransmit_token, "retransmit window acked, clearing token");
            self.retransmit_token = 0;
        }

        debug!(received_ln, queue_depth, "LN processed");
        queue_depth + self.sent.len()
    }

    /// `ER LINE_MISMATCH {expected_ln} {received_ln}`. If the controller is
    /// behind (`expected_ln < received_ln`), retransmit; otherwise the
    /// controller is ahead and we wait for the next `LN`.
    pub fn handle_line_mismatch<W: Write>(
        &mut self,
        writer: &mut W,
        expected_ln: u64,
        received_ln: u64,
    ) -> Result<u64, LinkError> {
        let acked = self.sent.drain_while(|item| item.lineno() < expected_ln);
        for item in acked {
            self.padding.append_item(item);
        }

        if expected_ln < received_ln {
            warn!(expected_ln, received_ln, "controller behind, retransmitting");
            self.retransmit(writer)
        } else {
            Ok(0)
        }
    }

    /// `ER CHECKSUM_MISMATCH {lineno}`: drain acknowledged items, then
    /// unconditionally retransmit the remaining sent window.
    pub fn handle_checksum_mismatch<W: Write>(
        &mut self,
        writer: &mut W,
        lineno: u64,
    ) -> Result<u64, LinkError> {
        let acked = self.sent.drain_while(|item| item.lineno() < lineno);
        for item in acked {
            self.padding.append_item(item);
        }
        warn!(lineno, "checksum mismatch, retransmitting");
        self.retransmit(writer)
    }

    /// Retransmit the whole sent window, guarded by the retransmit
    /// generation token: if one is already in flight, return it unchanged.
    fn retransmit<W: Write>(&mut self, writer: &mut W) -> Result<u64, LinkError> {
        if self.retransmit_token != 0 {
            return Ok(self.retransmit_token);
        }
        let Some(head) = self.sent.front() else {
            return Ok(0);
        };
        let token = head.lineno();
        for item in self.sent.iter() {
            writer.write_all(item.buf())?;
        }
        self.retransmit_token = token;
        Ok(token)
    }
}
