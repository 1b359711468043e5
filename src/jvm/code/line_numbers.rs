use super::CodeVisitor;
use crate::jvm::class_file::{BytecodeIndex, LineNumber, LineNumberTable};
use crate::jvm::Error;
use std::collections::BTreeMap;

/// Visitor collecting the source line of each position
///
/// When several lines start at the same position, the innermost one wins. Once a nested line
/// ends, the enclosing line takes over again.
#[derive(Debug, Default)]
pub struct LineNumberCollector {
    lines: BTreeMap<u32, u16>,
}

impl LineNumberCollector {
    pub fn new() -> LineNumberCollector {
        LineNumberCollector::default()
    }

    /// Entries at or past the end of the code (lines with nothing left to cover) are dropped
    pub fn into_table(self, code_length: usize) -> LineNumberTable {
        let entries = self
            .lines
            .into_iter()
            .filter(|(position, _)| (*position as usize) < code_length)
            .map(|(position, line_number)| LineNumber {
                start_pc: BytecodeIndex(position as u16),
                line_number,
            })
            .collect();
        LineNumberTable(entries)
    }
}

impl CodeVisitor for LineNumberCollector {
    fn line(&mut self, line: u16, position: u32) -> Result<(), Error> {
        self.lines.insert(position, line);
        Ok(())
    }
}
