//! Writers for the three layout passes over a method body
//!
//! Every pass walks the same [`Expr`] tree and encodes every instruction in the same way. What
//! differs is what the writer does with labels and bytes:
//!
//!   1. [`SizeEstimate`] only counts bytes. Labels get an estimated position and every branch is
//!      assumed to need the largest possible offset.
//!
//!   2. [`FixLabels`] counts bytes again, this time fixing final label positions (never past
//!      their estimate) and checking that branch offsets fit in a signed 16-bit integer.
//!
//!   3. [`CodeEmitter`] outputs the real bytes, checking that labels land on their final
//!      positions. It also collects the jumps and exception handlers it sees.
//!
//! [`Expr`]: super::Expr

use super::{LabelArena, SynLabel};
use crate::jvm::class_file::{BytecodeIndex, ClassConstantIndex, ExceptionHandler};
use crate::jvm::Error;
use log::{error, trace, warn};
use std::io;

/// Sink for encoded instructions, aware of the current layout pass
pub trait BytecodeWriter: io::Write {
    /// Offset of the next byte to be written
    fn position(&self) -> u32;

    /// Mark the current position with a label
    fn place_label(&mut self, label: SynLabel) -> Result<(), Error>;

    /// Offset of a jump from `from` to `to`
    ///
    /// This also places `from` at the current position (which is where the jump instruction
    /// starts).
    fn branch_offset(&mut self, from: SynLabel, to: SynLabel) -> Result<i16, Error>;

    /// Record an exception handler covering `start..end` (only the write pass keeps these)
    fn exception_handler(
        &mut self,
        _start: SynLabel,
        _end: SynLabel,
        _handler: SynLabel,
        _catch_type: Option<ClassConstantIndex>,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// First pass: estimate label positions
pub struct SizeEstimate<'a> {
    labels: &'a mut LabelArena,
    position: u32,
}

impl<'a> SizeEstimate<'a> {
    pub fn new(labels: &'a mut LabelArena) -> SizeEstimate<'a> {
        SizeEstimate { labels, position: 0 }
    }
}

impl<'a> io::Write for SizeEstimate<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.position += buf.len() as u32;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> BytecodeWriter for SizeEstimate<'a> {
    fn position(&self) -> u32 {
        self.position
    }

    fn place_label(&mut self, label: SynLabel) -> Result<(), Error> {
        self.labels.set_estimate(label, self.position)
    }

    fn branch_offset(&mut self, from: SynLabel, _to: SynLabel) -> Result<i16, Error> {
        self.place_label(from)?;
        Ok(i16::MAX)
    }
}

/// Second pass: fix final label positions and check that every jump fits
pub struct FixLabels<'a> {
    labels: &'a mut LabelArena,
    position: u32,

    /// Method being laid out (for error messages)
    method: &'a str,
}

impl<'a> FixLabels<'a> {
    pub fn new(labels: &'a mut LabelArena, method: &'a str) -> FixLabels<'a> {
        FixLabels {
            labels,
            position: 0,
            method,
        }
    }
}

impl<'a> io::Write for FixLabels<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.position += buf.len() as u32;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> BytecodeWriter for FixLabels<'a> {
    fn position(&self) -> u32 {
        self.position
    }

    fn place_label(&mut self, label: SynLabel) -> Result<(), Error> {
        self.labels.set_final(label, self.position)
    }

    fn branch_offset(&mut self, from: SynLabel, to: SynLabel) -> Result<i16, Error> {
        self.place_label(from)?;
        let offset = self.labels.estimate(to)? as i64 - self.labels.estimate(from)? as i64;
        if offset < i16::MIN as i64 || offset >= i16::MAX as i64 {
            error!(
                "Jump from {:?} to {:?} in `{}` needs offset {}",
                from, to, self.method, offset
            );
            return Err(Error::BranchOffsetOverflow {
                method: String::from(self.method),
                offset,
            });
        }
        Ok(offset as i16)
    }
}

/// Last pass: output the bytes
///
/// Positions are checked against the final label positions from [`FixLabels`]. With an
/// [`io::Sink`] as output, this replays the layout without producing bytes (which is how the
/// stack map and line number walks see positions).
pub struct CodeEmitter<'a, S: io::Write> {
    labels: &'a LabelArena,
    output: S,
    position: u32,

    /// Every jump seen, as `(from, to)` positions
    pub jumps: Vec<(u32, u32)>,

    /// Exception handlers, in the order their `try` blocks were entered
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl<'a> CodeEmitter<'a, Vec<u8>> {
    pub fn new(labels: &'a LabelArena) -> CodeEmitter<'a, Vec<u8>> {
        CodeEmitter::with_output(labels, vec![])
    }

    /// Extract the emitted bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.output
    }
}

impl<'a> CodeEmitter<'a, io::Sink> {
    pub fn replay(labels: &'a LabelArena) -> CodeEmitter<'a, io::Sink> {
        CodeEmitter::with_output(labels, io::sink())
    }
}

impl<'a, S: io::Write> CodeEmitter<'a, S> {
    fn with_output(labels: &'a LabelArena, output: S) -> CodeEmitter<'a, S> {
        CodeEmitter {
            labels,
            output,
            position: 0,
            jumps: vec![],
            exception_handlers: vec![],
        }
    }

    fn bytecode_index(&self, label: SynLabel) -> Result<BytecodeIndex, Error> {
        Ok(BytecodeIndex(self.labels.final_position(label)? as u16))
    }
}

impl<'a, S: io::Write> io::Write for CodeEmitter<'a, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.output.write(buf)?;
        self.position += written as u32;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
}

impl<'a, S: io::Write> BytecodeWriter for CodeEmitter<'a, S> {
    fn position(&self) -> u32 {
        self.position
    }

    fn place_label(&mut self, label: SynLabel) -> Result<(), Error> {
        self.labels.check_final(label, self.position)
    }

    fn branch_offset(&mut self, from: SynLabel, to: SynLabel) -> Result<i16, Error> {
        self.place_label(from)?;
        let from_pos = self.labels.final_position(from)?;
        let to_pos = self.labels.final_position(to)?;
        self.jumps.push((from_pos, to_pos));
        Ok((to_pos as i64 - from_pos as i64) as i16)
    }

    fn exception_handler(
        &mut self,
        start: SynLabel,
        end: SynLabel,
        handler: SynLabel,
        catch_type: Option<ClassConstantIndex>,
    ) -> Result<(), Error> {
        let handler = ExceptionHandler {
            start_pc: self.bytecode_index(start)?,
            end_pc: self.bytecode_index(end)?,
            handler_pc: self.bytecode_index(handler)?,
            catch_type,
        };

        // The JVM rejects empty ranges
        if handler.start_pc == handler.end_pc {
            warn!("Skipping exception handler over an empty range: {:?}", handler);
            return Ok(());
        }
        trace!("Exception handler: {:?}", handler);
        self.exception_handlers.push(handler);
        Ok(())
    }
}
