//! Loopback mock-controller harness: a `UnixStream::pair` standing in for
//! the platform `select`/`poll` event loop the host would otherwise drive.
//! This lives entirely in the binary crate — `core-fsm` and `core-link`
//! never see a thread or a socket, only `Read`/`Write`.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use core_config::MotionConfig;
use core_fsm::{CommandSink, Decoder, MachineState, Target};
use core_link::{parse_controller_reply, ControllerReply, Dialogue};
use core_wire::{frame_tool, RecvBuffer};

/// Outcome of streaming one task file to completion.
#[derive(Debug)]
pub struct StreamSummary {
    pub lines_sent: u64,
    pub final_state: MachineState,
}

/// Extract the line number from a framed main-channel command of the form
/// `CMD N{n}*{checksum}`. The mock controller only needs enough of the
/// frame to acknowledge it; it does not re-verify the checksum.
fn extract_lineno(line: &[u8]) -> Option<u64> {
    let line = std::str::from_utf8(line).ok()?;
    let (covered, _checksum) = line.rsplit_once('*')?;
    let (_command, lineno) = covered.rsplit_once(" N")?;
    lineno.trim().parse().ok()
}

/// Acknowledge every main-channel line as soon as it arrives, with a
/// constant queue depth of zero — this mock never actually queues.
fn spawn_mock_main_controller(mut stream: UnixStream, recv_capacity: usize) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut recv = RecvBuffer::new(recv_capacity);
        loop {
            match recv.read_line(&mut stream) {
                Ok(core_wire::LineStatus::NoData) => break,
                Ok(_) => {
                    let Some(lineno) = extract_lineno(recv.current_line()) else {
                        warn!("mock controller received an unparseable main-channel line");
                        continue;
                    };
                    let ack = format!("LN {lineno} 0\n");
                    if stream.write_all(ack.as_bytes()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "mock controller main-channel read failed");
                    break;
                }
            }
        }
    })
}

/// The tool channel carries no reliability layer (C4 is main-channel
/// only); the mock simply drains it so the sender never blocks on a full
/// pipe.
fn spawn_mock_tool_sink(mut stream: UnixStream) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match std::io::Read::read(&mut stream, &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
}

/// Drain `LN` acknowledgements from the main channel until every sent
/// line has been accounted for, feeding each reply through the
/// [`Dialogue`]'s queue accounting.
fn drain_acks(
    host_main: &mut UnixStream,
    dialogue: &mut Dialogue,
    recv_capacity: usize,
) -> Result<()> {
    let mut recv = RecvBuffer::new(recv_capacity);
    while !dialogue.sent().is_empty() {
        match recv.read_line(host_main) {
            Ok(core_wire::LineStatus::NoData) => break,
            Ok(_) => {
                let line = std::str::from_utf8(recv.current_line()).unwrap_or_default();
                match parse_controller_reply(line) {
                    Some(ControllerReply::Ln {
                        received_ln,
                        queue_depth,
                    }) => {
                        dialogue.handle_ln(received_ln, queue_depth);
                    }
                    Some(ControllerReply::LineMismatch {
                        expected_ln,
                        received_ln,
                    }) => {
                        dialogue.handle_line_mismatch(host_main, expected_ln, received_ln)?;
                    }
                    Some(ControllerReply::ChecksumMismatch { lineno }) => {
                        dialogue.handle_checksum_mismatch(host_main, lineno)?;
                    }
                    None => debug!(line, "ignoring unrecognised controller reply"),
                }
            }
            Err(e) => return Err(e).context("reading controller acknowledgement"),
        }
    }
    Ok(())
}

/// Forwards each emitted command to the right loopback channel: `MAIN`
/// through the reliability layer, `HEAD`/`BLOCK_HEAD` as a bare tool
/// frame, `PAUSE` as a narrated no-op. The first I/O error latches and
/// silences every subsequent emission rather than panicking inside a
/// `CommandSink` callback that cannot return a `Result`.
struct HarnessSink<'a> {
    dialogue: &'a mut Dialogue,
    main: &'a mut UnixStream,
    tool: &'a mut UnixStream,
    lines_sent: u64,
    error: Option<anyhow::Error>,
}

impl<'a> CommandSink for HarnessSink<'a> {
    fn emit(&mut self, command: &str, target: Target) {
        if self.error.is_some() {
            return;
        }
        if target.contains(Target::MAIN) {
            match self.dialogue.send(self.main, command) {
                Ok(_) => self.lines_sent += 1,
                Err(e) => self.error = Some(e.into()),
            }
        } else if target.contains(Target::HEAD) || target.contains(Target::BLOCK_HEAD) {
            match frame_tool(command) {
                Ok(frame) => {
                    if let Err(e) = self.tool.write_all(&frame) {
                        self.error = Some(e.into());
                    }
                }
                Err(e) => self.error = Some(e.into()),
            }
        } else if target.contains(Target::PAUSE) {
            debug!("task stream requested a pause");
        }
    }
}

/// Stream a binary task file to completion against a fresh loopback mock
/// controller, returning the final machine state once every sent line has
/// been acknowledged.
pub fn run_stream(task_path: &std::path::Path, config: &MotionConfig) -> Result<StreamSummary> {
    let mut task_file =
        std::fs::File::open(task_path).with_context(|| format!("opening {}", task_path.display()))?;

    let state = MachineState::new(config.max_r2, config.min_z, config.max_z, config.max_exec_time);
    let mut decoder = Decoder::new(state);

    let (mut host_main, ctrl_main) =
        UnixStream::pair().context("creating main-channel loopback socket pair")?;
    let (mut host_tool, ctrl_tool) =
        UnixStream::pair().context("creating tool-channel loopback socket pair")?;

    let main_handle = spawn_mock_main_controller(ctrl_main, config.recv_buffer_capacity);
    let tool_handle = spawn_mock_tool_sink(ctrl_tool);

    let mut dialogue = Dialogue::new();
    let mut sink = HarnessSink {
        dialogue: &mut dialogue,
        main: &mut host_main,
        tool: &mut host_tool,
        lines_sent: 0,
        error: None,
    };

    loop {
        match decoder.decode_next(&mut task_file, &mut sink) {
            Ok(0) => break,
            Ok(_) => {
                if let Some(e) = sink.error.take() {
                    return Err(e);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    let lines_sent = sink.lines_sent;
    drop(sink);

    drop(host_tool);
    let _ = tool_handle.join();

    drain_acks(&mut host_main, &mut dialogue, config.recv_buffer_capacity)?;
    drop(host_main);
    let _ = main_handle.join();

    Ok(StreamSummary {
        lines_sent,
        final_state: decoder.state().clone(),
    })
}
