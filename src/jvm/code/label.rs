use crate::jvm::Error;
use std::collections::HashMap;
use std::fmt;

/// Opaque label
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SynLabel(u32);

impl SynLabel {
    pub const FIRST: SynLabel = SynLabel(0);

    /// Get the next fresh label
    pub fn next(&self) -> SynLabel {
        SynLabel(self.0 + 1)
    }
}

impl fmt::Debug for SynLabel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

/// Generates new labels
pub trait LabelGenerator<Label> {
    /// Generate a fresh label
    fn fresh_label(&mut self) -> Label;
}

/// Label generator for [`SynLabel`]
///
/// Cloning does not split the generator source - the cloned generator will produce the same
/// sequence of labels as the original.
#[derive(Clone, Debug)]
pub struct SynLabelGenerator(SynLabel);

impl SynLabelGenerator {
    pub fn new(start: SynLabel) -> SynLabelGenerator {
        SynLabelGenerator(start)
    }
}

impl LabelGenerator<SynLabel> for SynLabelGenerator {
    fn fresh_label(&mut self) -> SynLabel {
        let to_return = self.0;
        self.0 = self.0.next();
        to_return
    }
}

/// Positions of a label across the layout phases
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct LabelRecord {
    /// Set in the size estimate pass
    pub estimate: Option<u32>,

    /// Set in the fix-labels pass, never larger than `estimate`
    pub final_position: Option<u32>,
}

/// Label positions for one method body
///
/// Positions are filled in one phase at a time: every label gets an estimate in the first pass,
/// then a final position in the second pass, and the last pass only checks that the bytes really
/// do land at the final positions.
#[derive(Default, Debug)]
pub struct LabelArena {
    records: HashMap<SynLabel, LabelRecord>,
}

impl LabelArena {
    pub fn new() -> LabelArena {
        LabelArena::default()
    }

    /// Number of labels that have been placed
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, label: SynLabel) -> Option<&LabelRecord> {
        self.records.get(&label)
    }

    /// Every placed label, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (SynLabel, &LabelRecord)> {
        self.records.iter().map(|(label, record)| (*label, record))
    }

    /// Estimated position of the label
    pub fn estimate(&self, label: SynLabel) -> Result<u32, Error> {
        self.records
            .get(&label)
            .and_then(|record| record.estimate)
            .ok_or(Error::LabelNotPlaced(label))
    }

    /// Final position of the label
    pub fn final_position(&self, label: SynLabel) -> Result<u32, Error> {
        self.records
            .get(&label)
            .and_then(|record| record.final_position)
            .ok_or(Error::LabelNotPlaced(label))
    }

    /// Record the estimated position, which can be repeated but only with the same position
    pub fn set_estimate(&mut self, label: SynLabel, position: u32) -> Result<(), Error> {
        let record = self.records.entry(label).or_default();
        match record.estimate {
            Some(estimate) if estimate != position => Err(Error::DuplicateLabel(label)),
            _ => {
                record.estimate = Some(position);
                Ok(())
            }
        }
    }

    /// Record the final position, which must not exceed the estimate
    pub fn set_final(&mut self, label: SynLabel, position: u32) -> Result<(), Error> {
        let record = self
            .records
            .get_mut(&label)
            .ok_or(Error::LabelNotPlaced(label))?;
        let estimate = record.estimate.ok_or(Error::LabelNotPlaced(label))?;
        match record.final_position {
            Some(final_position) if final_position != position => {
                Err(Error::DuplicateLabel(label))
            }
            _ if position > estimate => Err(Error::LabelMoved {
                label,
                expected: estimate,
                actual: position,
            }),
            _ => {
                record.final_position = Some(position);
                Ok(())
            }
        }
    }

    /// Check that the label really ends up at its final position
    pub fn check_final(&self, label: SynLabel, position: u32) -> Result<(), Error> {
        let final_position = self.final_position(label)?;
        if final_position == position {
            Ok(())
        } else {
            Err(Error::LabelMoved {
                label,
                expected: final_position,
                actual: position,
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn phases_in_order() {
        let mut gen = SynLabelGenerator::new(SynLabel::FIRST);
        let l0 = gen.fresh_label();
        let l1 = gen.fresh_label();
        assert_ne!(l0, l1);

        let mut arena = LabelArena::new();
        assert!(matches!(arena.estimate(l0), Err(Error::LabelNotPlaced(_))));
        assert!(matches!(arena.set_final(l0, 3), Err(Error::LabelNotPlaced(_))));

        arena.set_estimate(l0, 5).unwrap();
        arena.set_estimate(l0, 5).unwrap();
        assert!(matches!(arena.set_estimate(l0, 6), Err(Error::DuplicateLabel(_))));
        assert!(matches!(arena.final_position(l0), Err(Error::LabelNotPlaced(_))));

        assert!(matches!(arena.set_final(l0, 6), Err(Error::LabelMoved { .. })));
        arena.set_final(l0, 4).unwrap();
        assert_eq!(arena.final_position(l0).unwrap(), 4);
        arena.check_final(l0, 4).unwrap();
        assert!(arena.check_final(l0, 5).is_err());
        assert!(arena.check_final(l1, 0).is_err());
    }
}
