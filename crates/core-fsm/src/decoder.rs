//! Binary task-stream decoder and motion FSM.

use std::io::{self, Read};

use thiserror::Error;
use tracing::{debug, warn};

use crate::sink::{CommandSink, Target};
use crate::state::MachineState;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("move target outside the configured motion envelope")]
    PositionError,
    #[error("a single G1 may carry at most one of E0/E1/E2")]
    MultiExtruderError,
    #[error("task stream read failed: {0}")]
    Io(#[source] io::Error),
}

fn read_f32<R: Read>(reader: &mut R) -> Result<f32, DecodeError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(DecodeError::Io)?;
    Ok(f32::from_le_bytes(buf))
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8, DecodeError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).map_err(DecodeError::Io)?;
    Ok(buf[0])
}

fn fmt6(v: f32) -> String {
    format!("{v:.6}")
}

/// Decodes the binary task stream one opcode at a time, driving a
/// [`CommandSink`] with the textual commands each opcode produces.
pub struct Decoder {
    state: MachineState,
}

impl Decoder {
    pub fn new(state: MachineState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    /// Decode and act on the next opcode. Returns `Ok(0)` at end-of-stream,
    /// `Ok(n)` for the `n` bytes consumed by a single record, or an error
    /// for a hard I/O failure, envelope violation, or multi-extruder
    /// command.
    pub fn decode_next<R: Read>(
        &mut self,
        reader: &mut R,
        sink: &mut dyn CommandSink,
    ) -> Result<usize, DecodeError> {
        let mut cmd = [0u8; 1];
        let n = reader.read(&mut cmd).map_err(DecodeError::Io)?;
        if n == 0 {
            return Ok(0);
        }
        let cmd = cmd[0];

        if cmd & 0x80 != 0 {
            self.handle_g1(reader, sink, cmd & 0x7F)
        } else if cmd & 0x40 != 0 {
            self.handle_g92(reader, sink, cmd & 0x3F)
        } else if cmd & 0x30 == 0x30 {
            self.handle_fan(reader, sink)
        } else if cmd & 0x20 != 0 {
            self.handle_laser(reader, sink)
        } else if cmd & 0x10 != 0 {
            self.handle_heater(reader, sink, cmd)
        } else if cmd == 7 {
            self.handle_pause_with_height(reader, sink)
        } else if cmd == 6 {
            self.handle_raw_passthrough(reader, sink, cmd)
        } else if cmd == 5 {
            sink.emit("", Target::PAUSE);
            Ok(1)
        } else if cmd & 0x04 != 0 {
            self.handle_sleep(reader, sink)
        } else if cmd == 3 {
            self.state.relative = true;
            sink.emit("G91", Target::MAIN);
            Ok(1)
        } else if cmd == 2 {
            self.state.relative = false;
            sink.emit("G90", Target::MAIN);
            Ok(1)
        } else if cmd == 1 {
            sink.emit("G28", Target::MAIN);
            Ok(1)
        } else {
            debug!(cmd, "unrecognised opcode treated as no-op");
            Ok(1)
        }
    }

    fn handle_g1<R: Read>(
        &mut self,
        reader: &mut R,
        sink: &mut dyn CommandSink,
        flags: u8,
    ) -> Result<usize, DecodeError> {
        let mut len = 1usize;
        let mut f: u32 = 0;
        let mut x = None;
        let mut y = None;
        let mut z = None;
        let mut e = [None; 3];

        if flags & 0x40 != 0 {
            f = read_f32(reader)? as u32;
            len += 4;
        }
        if flags & 0x20 != 0 {
            x = Some(read_f32(reader)?);
            len += 4;
        }
        if flags & 0x10 != 0 {
            y = Some(read_f32(reader)?);
            len += 4;
        }
        if flags & 0x08 != 0 {
            z = Some(read_f32(reader)?);
            len += 4;
        }
        if flags & 0x04 != 0 {
            e[0] = Some(read_f32(reader)?);
            len += 4;
        }
        if flags & 0x02 != 0 {
            e[1] = Some(read_f32(reader)?);
            len += 4;
        }
        if flags & 0x01 != 0 {
            e[2] = Some(read_f32(reader)?);
            len += 4;
        }

        let present = e.iter().filter(|v| v.is_some()).count();
        if present > 1 {
            return Err(DecodeError::MultiExtruderError);
        }
        let (target_t, e_value) = e
            .iter()
            .enumerate()
            .find_map(|(i, v)| v.map(|val| (i, val)))
            .map_or((self.state.t, None), |(i, val)| (i, Some(val)));

        // Resolve relative deltas for Z/E before any range check; X/Y are
        // always absolute targets regardless of positioning mode.
        let z = z.map(|dz| {
            if self.state.relative {
                self.state.z.unwrap_or(0.0) + dz
            } else {
                dz
            }
        });
        let e_value = e_value.map(|de| {
            if self.state.relative {
                self.state.e[target_t] + de
            } else {
                de
            }
        });

        let eff_x = x.or(self.state.x);
        let eff_y = y.or(self.state.y);
        if let (Some(ex), Some(ey)) = (eff_x, eff_y) {
            if !self.state.radius_within_envelope(ex, ey) {
                return Err(DecodeError::PositionError);
            }
        }
        if let Some(ez) = z {
            if !self.state.z_within_envelope(ez) {
                return Err(DecodeError::PositionError);
            }
        }

        if present == 1 && self.state.t != target_t {
            sink.emit(&format!("T{target_t}"), Target::MAIN);
            sink.emit(
                &format!("G92 E{}", fmt6(self.state.e[target_t])),
                Target::MAIN,
            );
            self.state.t = target_t;
        }

        self.emit_g1(sink, f, x, y, z, e_value);
        Ok(len)
    }

    /// Splits (or directly emits) a G1 move and updates the FSM position.
    fn emit_g1(
        &mut self,
        sink: &mut dyn CommandSink,
        f_in: u32,
        x: Option<f32>,
        y: Option<f32>,
        z: Option<f32>,
        e: Option<f32>,
    ) {
        let f = if self.state.f == 0 && f_in == 0 {
            3000
        } else if f_in == 0 {
            self.state.f
        } else {
            f_in
        };

        if let (Some(cx), Some(cy), Some(cz)) = (self.state.x, self.state.y, self.state.z) {
            let dx = x.map_or(0.0, |v| v - cx) as f64;
            let dy = y.map_or(0.0, |v| v - cy) as f64;
            let dz = z.map_or(0.0, |v| v - cz) as f64;
            let de = e.map_or(0.0, |v| v - self.state.e[self.state.t]) as f64;

            let length = (dx * dx + dy * dy + dz * dz).sqrt();
            self.state.traveled += length;

            let tcost = length / f as f64 * 100.0;
            let mut section = (tcost / self.state.max_exec_time as f64).floor() as i64;
            if section > 4096 {
                warn!(section, "G1 split section over limit, clamping to 4096");
                section = 4096;
            }
            if section < 0 {
                section = 0;
            }

            let mut emitted_feedrate = self.state.f;
            for i in 1..section {
                let r = i as f64 / section as f64;
                let mut parts = Vec::new();
                if f != emitted_feedrate {
                    parts.push(format!("F{f}"));
                    emitted_feedrate = f;
                }
                if dx != 0.0 {
                    parts.push(format!("X{}", fmt6((cx as f64 + dx * r) as f32)));
                }
                if dy != 0.0 {
                    parts.push(format!("Y{}", fmt6((cy as f64 + dy * r) as f32)));
                }
                if dz != 0.0 {
                    parts.push(format!("Z{}", fmt6((cz as f64 + dz * r) as f32)));
                }
                if de != 0.0 {
                    parts.push(format!(
                        "E{}",
                        fmt6((self.state.e[self.state.t] as f64 + de * r) as f32)
                    ));
                }
                sink.emit(&format!("G1 {}", parts.join(" ")), Target::MAIN);
            }
            self.state.f = emitted_feedrate;
        }

        // Final segment: exact requested coordinates, to eliminate any
        // rounding drift accumulated across intermediate segments.
        let mut parts = Vec::new();
        if f != self.state.f {
            parts.push(format!("F{f}"));
            self.state.f = f;
        }
        if let Some(vx) = x {
            parts.push(format!("X{}", fmt6(vx)));
            self.state.x = Some(vx);
        }
        if let Some(vy) = y {
            parts.push(format!("Y{}", fmt6(vy)));
            self.state.y = Some(vy);
        }
        if let Some(vz) = z {
            parts.push(format!("Z{}", fmt6(vz)));
            self.state.z = Some(vz);
        }
        if let Some(ve) = e {
            parts.push(format!("E{}", fmt6(ve)));
            self.state.e[self.state.t] = ve;
        }
        sink.emit(&format!("G1 {}", parts.join(" ")), Target::MAIN);
    }

    fn handle_g92<R: Read>(
        &mut self,
        reader: &mut R,
        sink: &mut dyn CommandSink,
        flags: u8,
    ) -> Result<usize, DecodeError> {
        let mut len = 1usize;
        let mut parts = Vec::new();

        if flags & 0x20 != 0 {
            let val = read_f32(reader)?;
            len += 4;
            parts.push(format!("X{}", fmt6(val)));
            self.state.x = Some(val);
        }
        if flags & 0x10 != 0 {
            let val = read_f32(reader)?;
            len += 4;
            parts.push(format!("Y{}", fmt6(val)));
            self.state.y = Some(val);
        }
        if flags & 0x08 != 0 {
            let val = read_f32(reader)?;
            len += 4;
            parts.push(format!("Z{}", fmt6(val)));
            self.state.z = Some(val);
        }
        if !parts.is_empty() {
            sink.emit(&format!("G92 {}", parts.join(" ")), Target::MAIN);
        }

        for i in 0..3 {
            if flags & (0x04 >> i) != 0 {
                if self.state.t != i {
                    sink.emit(&format!("T{i}"), Target::MAIN);
                    self.state.t = i;
                }
                let val = read_f32(reader)?;
                len += 4;
                sink.emit(&format!("G92 E{}", fmt6(val)), Target::MAIN);
                self.state.e[i] = val;
            }
        }

        Ok(len)
    }

    fn handle_fan<R: Read>(
        &mut self,
        reader: &mut R,
        sink: &mut dyn CommandSink,
    ) -> Result<usize, DecodeError> {
        let val = read_f32(reader)?;
        let duty = (val * 255.0).round() as i32;
        sink.emit(&format!("F1{duty}"), Target::HEAD);
        Ok(5)
    }

    fn handle_laser<R: Read>(
        &mut self,
        reader: &mut R,
        sink: &mut dyn CommandSink,
    ) -> Result<usize, DecodeError> {
        let val = read_f32(reader)?;
        let duty = (val * 255.0).round() as i32;
        sink.emit(&format!("X2O{duty}"), Target::MAIN);
        Ok(5)
    }

    fn handle_heater<R: Read>(
        &mut self,
        reader: &mut R,
        sink: &mut dyn CommandSink,
        cmd: u8,
    ) -> Result<usize, DecodeError> {
        let val = read_f32(reader)?;
        let block = cmd & 0x08 != 0;
        let target = if block {
            Target::BLOCK_HEAD
        } else {
            Target::HEAD
        };
        sink.emit(&format!("H{val:.1}"), target);
        Ok(5)
    }

    fn handle_pause_with_height<R: Read>(
        &mut self,
        reader: &mut R,
        sink: &mut dyn CommandSink,
    ) -> Result<usize, DecodeError> {
        let z = read_f32(reader)?;
        sink.emit(&format!("G1 Z{}", fmt6(z)), Target::MAIN);
        self.state.z = Some(z);
        sink.emit("", Target::PAUSE);
        Ok(5)
    }

    fn handle_raw_passthrough<R: Read>(
        &mut self,
        reader: &mut R,
        sink: &mut dyn CommandSink,
        cmd: u8,
    ) -> Result<usize, DecodeError> {
        let payload_len = read_u8(reader)?;
        let mut buf = vec![0u8; payload_len as usize];
        reader.read_exact(&mut buf).map_err(DecodeError::Io)?;
        let text = String::from_utf8_lossy(&buf);
        let target = if cmd & 0x01 != 0 {
            Target::HEAD
        } else {
            Target::MAIN
        };
        sink.emit(&text, target);
        Ok(2 + payload_len as usize)
    }

    fn handle_sleep<R: Read>(
        &mut self,
        reader: &mut R,
        sink: &mut dyn CommandSink,
    ) -> Result<usize, DecodeError> {
        let val = read_f32(reader)?;
        sink.emit(&format!("G4 P{}", val as i64), Target::MAIN);
        Ok(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use std::io::Cursor;

    fn known_state() -> MachineState {
        MachineState {
            x: Some(0.0),
            y: Some(0.0),
            z: Some(0.0),
            e: [0.0; 3],
            t: 0,
            f: 3000,
            relative: false,
            traveled: 0.0,
            max_r2: 10000.0,
            min_z: 0.0,
            max_z: 300.0,
            max_exec_time: 1.0,
        }
    }

    fn floats(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    // Scenario A: simple move from an unknown position (no split), ending
    // with the exact requested coordinates.
    #[test]
    fn scenario_a_simple_move_from_unknown_position() {
        let state = MachineState::new(10000.0, 0.0, 300.0, 1.0);
        let mut decoder = Decoder::new(state);
        let mut sink = RecordingSink::default();

        let mut input = vec![0xF8u8];
        input.extend(floats(&[10.0, 10.0, 0.0, 100.0])); // F,X,Y,Z
        let mut reader = Cursor::new(input);

        let consumed = decoder.decode_next(&mut reader, &mut sink).unwrap();
        assert_eq!(consumed, 1 + 4 * 4);
        assert_eq!(sink.emitted.len(), 1);
        assert_eq!(sink.emitted[0].1, Target::MAIN);
        assert_eq!(sink.emitted[0].0, "G1 F10 X10.000000 Y0.000000 Z100.000000");
        assert_eq!(decoder.state().x, Some(10.0));
        assert_eq!(decoder.state().y, Some(0.0));
        assert_eq!(decoder.state().z, Some(100.0));
    }

    // Scenario B: envelope trip — X alone outside the radius envelope.
    #[test]
    fn scenario_b_envelope_violation_returns_position_error() {
        let mut decoder = Decoder::new(known_state());
        let mut sink = RecordingSink::default();

        let mut input = vec![0xA0u8]; // G1, X only
        input.extend(floats(&[200.0]));
        let mut reader = Cursor::new(input);

        let err = decoder.decode_next(&mut reader, &mut sink).unwrap_err();
        assert!(matches!(err, DecodeError::PositionError));
        assert!(sink.emitted.is_empty());
    }

    // Scenario C: tool change via a G1 carrying only E1.
    #[test]
    fn scenario_c_tool_change_reseats_extruder_position() {
        let mut decoder = Decoder::new(known_state());
        let mut sink = RecordingSink::default();

        let mut input = vec![0x82u8]; // G1, E1 only
        input.extend(floats(&[5.0]));
        let mut reader = Cursor::new(input);

        decoder.decode_next(&mut reader, &mut sink).unwrap();
        assert_eq!(sink.emitted[0], ("T1".to_string(), Target::MAIN));
        assert_eq!(
            sink.emitted[1],
            ("G92 E0.000000".to_string(), Target::MAIN)
        );
        assert_eq!(decoder.state().t, 1);
        assert_eq!(decoder.state().e[1], 5.0);
    }

    #[test]
    fn multi_extruder_in_single_g1_is_an_error() {
        let mut decoder = Decoder::new(known_state());
        let mut sink = RecordingSink::default();

        let mut input = vec![0x83u8]; // G1, E1 and E2
        input.extend(floats(&[1.0, 2.0]));
        let mut reader = Cursor::new(input);

        let err = decoder.decode_next(&mut reader, &mut sink).unwrap_err();
        assert!(matches!(err, DecodeError::MultiExtruderError));
    }

    // Property 9: N would exceed 4096 -> clamp to exactly 4096 segments.
    #[test]
    fn split_clamps_to_4096_segments() {
        let mut state = known_state();
        state.max_exec_time = 0.001;
        let mut decoder = Decoder::new(state);
        let mut sink = RecordingSink::default();

        let mut input = vec![0xE0u8]; // G1, F and X
        input.extend(floats(&[100.0, 100.0]));
        let mut reader = Cursor::new(input);

        decoder.decode_next(&mut reader, &mut sink).unwrap();
        assert_eq!(sink.emitted.len(), 4096);
        assert_eq!(decoder.state().x, Some(100.0));
    }

    // Property 4: exact terminus — the final segment carries the bit-exact
    // requested value, not a rounded interpolation.
    #[test]
    fn split_final_segment_is_bit_exact() {
        let mut state = known_state();
        state.max_exec_time = 0.01;
        let mut decoder = Decoder::new(state);
        let mut sink = RecordingSink::default();

        let mut input = vec![0xA0u8]; // G1, X only
        input.extend(floats(&[33.333333]));
        let mut reader = Cursor::new(input);

        decoder.decode_next(&mut reader, &mut sink).unwrap();
        assert_eq!(decoder.state().x, Some(33.333333f32));
        let last = sink.emitted.last().unwrap();
        assert!(last.0.contains("X33.333332") || last.0.contains("X33.333333"));
    }

    // Property 10: with the prior Y position unknown, the radius envelope
    // cannot be evaluated and is skipped entirely; the move is accepted as
    // a single, unsplit command rather than rejected or segmented.
    #[test]
    fn unknown_prior_position_skips_envelope_and_emits_single_command() {
        let state = MachineState::new(10000.0, 0.0, 300.0, 0.0001);
        let mut decoder = Decoder::new(state);
        let mut sink = RecordingSink::default();

        let mut input = vec![0xA0u8]; // G1, X only; Y and Z still unknown
        input.extend(floats(&[9999.0]));
        let mut reader = Cursor::new(input);

        decoder.decode_next(&mut reader, &mut sink).unwrap();
        assert_eq!(sink.emitted.len(), 1);
        assert_eq!(decoder.state().x, Some(9999.0));
        // Y and Z remain unknown, so no splitting took place even though
        // max_exec_time is tiny enough to force a clamp once both are known.
        assert!(decoder.state().y.is_none());
    }

    #[test]
    fn fan_emits_scaled_duty_to_head_channel() {
        let mut decoder = Decoder::new(known_state());
        let mut sink = RecordingSink::default();
        let mut input = vec![0x30u8];
        input.extend(floats(&[1.0]));
        let mut reader = Cursor::new(input);
        decoder.decode_next(&mut reader, &mut sink).unwrap();
        assert_eq!(sink.emitted[0], ("F1255".to_string(), Target::HEAD));
    }

    #[test]
    fn relative_mode_adds_z_delta_before_range_check() {
        let mut decoder = Decoder::new(known_state());
        decoder.decode_next(&mut Cursor::new(vec![3u8]), &mut RecordingSink::default())
            .unwrap(); // enter relative mode
        assert!(decoder.state().relative);

        let mut sink = RecordingSink::default();
        let mut input = vec![0x88u8]; // G1, Z only
        input.extend(floats(&[10.0]));
        let mut reader = Cursor::new(input);
        decoder.decode_next(&mut reader, &mut sink).unwrap();
        assert_eq!(decoder.state().z, Some(10.0));

        let mut sink2 = RecordingSink::default();
        let mut input2 = vec![0x88u8];
        input2.extend(floats(&[10.0]));
        let mut reader2 = Cursor::new(input2);
        decoder.decode_next(&mut reader2, &mut sink2).unwrap();
        assert_eq!(decoder.state().z, Some(20.0));
    }
}
