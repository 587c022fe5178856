//! The callback capability the decoder emits textual commands through.

use bitflags::bitflags;

bitflags! {
    /// Which controller channel a command is destined for. Bit-valued so a
    /// caller may mask several targets at once.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Target: u8 {
        const MAIN = 1;
        const HEAD = 2;
        const BLOCK_HEAD = 4;
        const PAUSE = 8;
    }
}

/// A synchronous sink the decoder hands each emitted command to. The call
/// returns before the decoder consumes the next input byte.
pub trait CommandSink {
    fn emit(&mut self, command: &str, target: Target);
}

/// A sink that records every emission, used by tests and the driver harness.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub emitted: Vec<(String, Target)>,
}

impl CommandSink for RecordingSink {
    fn emit(&mut self, command: &str, target: Target) {
        self.emitted.push((command.to_string(), target));
    }
}
