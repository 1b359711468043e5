//! Stack map synthesis
//!
//! The [`StackMapBuilder`] replays a laid-out instruction tree, simulating each instruction on a
//! [`Frame`]. Positions that are the source or target of a jump (or the start of an exception
//! handler) get a frame recorded every time control reaches them. Once the walk is done, the
//! frames recorded at each position are merged into the single `full_frame` the verifier sees.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1

use super::{Frame, VType, VerificationType};
use crate::jvm::class_file::{ConstantsPool, ExceptionHandler, StackMapFrame, StackMapTable};
use crate::jvm::code::{BranchOp, CodeVisitor, Expr, ExprKind, LabelArena, SynLabel};
use crate::jvm::{BinaryName, Error, RefType};
use log::trace;
use std::collections::{BTreeMap, BTreeSet};

/// Result of the stack map walk over a method body
#[derive(Debug)]
pub struct StackMaps {
    pub table: StackMapTable,
    pub max_stack: u16,
    pub max_locals: u16,

    /// Positions of `checkcast` instructions whose operand already has the target type
    pub redundant_casts: Vec<u32>,
}

/// Visitor computing stack map frames
pub struct StackMapBuilder<'a> {
    labels: &'a LabelArena,
    method: &'a str,
    this_class: BinaryName,

    /// Positions that need a frame
    frame_positions: BTreeSet<u32>,

    /// Current state, `None` when the code being walked is unreachable
    state: Option<Frame>,

    /// Every state recorded at each position needing a frame
    recorded: BTreeMap<u32, Vec<Frame>>,

    /// Handlers whose `try` block is being walked, with the type they catch
    active_handlers: Vec<(SynLabel, VType)>,

    max_stack: usize,
    max_locals: usize,
    redundant_casts: Vec<u32>,
}

impl<'a> StackMapBuilder<'a> {
    /// Prepare a walk, given the jumps and handlers collected by the write pass
    pub fn new(
        labels: &'a LabelArena,
        method: &'a str,
        this_class: BinaryName,
        initial: Frame,
        jumps: &[(u32, u32)],
        exception_handlers: &[ExceptionHandler],
    ) -> StackMapBuilder<'a> {
        let mut frame_positions = BTreeSet::new();
        for (from, to) in jumps {
            frame_positions.insert(*from);
            frame_positions.insert(*to);
        }
        for handler in exception_handlers {
            frame_positions.insert(handler.handler_pc.0 as u32);
        }

        StackMapBuilder {
            labels,
            method,
            this_class,
            frame_positions,
            max_stack: initial.stack_slots(),
            max_locals: initial.locals.len(),
            state: Some(initial),
            recorded: BTreeMap::new(),
            active_handlers: vec![],
            redundant_casts: vec![],
        }
    }

    /// Merge all the states recorded at a position
    fn merged(&self, position: u32) -> Result<Option<Frame>, Error> {
        let frames = match self.recorded.get(&position) {
            None => return Ok(None),
            Some(frames) => frames,
        };
        let mut merged: Option<Frame> = None;
        for frame in frames {
            merged = Some(match merged {
                None => frame.clone(),
                Some(acc) => acc
                    .union(frame)
                    .map_err(|kind| Error::VerifierError { position, kind })?,
            });
        }
        Ok(merged)
    }

    fn record(&mut self, position: u32, frame: Frame) {
        self.recorded.entry(position).or_default().push(frame);
    }

    fn update_maximums(&mut self) {
        if let Some(frame) = &self.state {
            self.max_stack = self.max_stack.max(frame.stack_slots());
            self.max_locals = self.max_locals.max(frame.locals.len());
        }
    }

    /// Merge the states recorded at every position into the stack map table
    pub fn finish(self, constants: &mut ConstantsPool) -> Result<StackMaps, Error> {
        let mut frames = vec![];
        let mut previous: Option<u32> = None;
        for position in self.recorded.keys() {
            let frame = match self.merged(*position)? {
                None => continue,
                Some(frame) => frame,
            };
            trace!(
                "{}: frame at {}: locals {:?}, stack {:?}",
                self.method,
                position,
                frame.locals,
                frame.stack
            );
            let (locals, stack) = frame.full_frame(constants)?;
            let offset_delta = match previous {
                None => *position,
                Some(previous) => *position - previous - 1,
            };
            previous = Some(*position);
            frames.push(StackMapFrame {
                offset_delta: offset_delta as u16,
                locals,
                stack,
            });
        }

        Ok(StackMaps {
            table: StackMapTable(frames),
            max_stack: self.max_stack as u16,
            max_locals: self.max_locals as u16,
            redundant_casts: self.redundant_casts,
        })
    }
}

impl<'a> CodeVisitor for StackMapBuilder<'a> {
    fn place_label(&mut self, _label: SynLabel, position: u32) -> Result<(), Error> {
        if !self.frame_positions.contains(&position) {
            return Ok(());
        }
        if let Some(frame) = self.state.take() {
            self.record(position, frame);
        }
        self.state = self.merged(position)?;
        self.update_maximums();
        Ok(())
    }

    fn instruction(&mut self, expr: &Expr, position: u32) -> Result<(), Error> {
        let (kind, frame) = match (expr.kind(), self.state.as_mut()) {
            (Some(kind), Some(frame)) => (kind, frame),
            _ => return Ok(()),
        };

        // Every instruction in a `try` block can jump to the handler
        for (handler, caught) in &self.active_handlers {
            let handler_position = self.labels.final_position(*handler)?;
            let handler_frame = frame.with_stack(vec![caught.clone()]);
            self.recorded
                .entry(handler_position)
                .or_default()
                .push(handler_frame);
        }

        if let ExprKind::CheckCast(target) = kind {
            if let Some(VerificationType::Object(found)) = frame.stack.last() {
                if found == target {
                    self.redundant_casts.push(position);
                }
            }
        }

        frame
            .execute(kind, expr.ty(), position, &self.this_class)
            .map_err(|err| Error::VerifierError {
                position,
                kind: err,
            })?;
        self.update_maximums();

        if expr.ends_path() {
            self.state = None;
        }
        Ok(())
    }

    fn jump(&mut self, op: Option<BranchOp>, from: SynLabel, to: SynLabel) -> Result<(), Error> {
        let mut frame = match self.state.take() {
            None => return Ok(()),
            Some(frame) => frame,
        };
        let target = self.labels.final_position(to)?;
        match op {
            Some(op) => {
                let position = self.labels.final_position(from)?;
                frame
                    .branch(op)
                    .map_err(|kind| Error::VerifierError { position, kind })?;
                self.record(target, frame.clone());
                self.state = Some(frame);
            }
            None => self.record(target, frame),
        }
        Ok(())
    }

    fn enter_try(&mut self, handler: SynLabel, catch_type: Option<&BinaryName>) -> Result<(), Error> {
        let class = catch_type.cloned().unwrap_or(BinaryName::THROWABLE);
        let caught = VerificationType::Object(RefType::Object(class));
        if let Some(frame) = &self.state {
            let handler_position = self.labels.final_position(handler)?;
            let handler_frame = frame.with_stack(vec![caught.clone()]);
            self.record(handler_position, handler_frame);
        }
        self.active_handlers.push((handler, caught));
        Ok(())
    }

    fn exit_try(&mut self, handler: SynLabel) -> Result<(), Error> {
        if let Some(idx) = self.active_handlers.iter().rposition(|(h, _)| *h == handler) {
            self.active_handlers.remove(idx);
        }
        Ok(())
    }
}
