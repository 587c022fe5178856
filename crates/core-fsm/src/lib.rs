//! The motion finite-state machine: a binary task-stream [`Decoder`] that
//! walks a [`MachineState`] forward and drives a [`CommandSink`] with the
//! line-protocol text each opcode produces.

mod decoder;
mod sink;
mod state;

pub use decoder::{DecodeError, Decoder};
pub use sink::{CommandSink, RecordingSink, Target};
pub use state::MachineState;
