use std::fmt::{Debug, Error, Formatter};
use std::iter::{Extend, FromIterator};
use std::slice::Iter;

/// Elements with a width (eg. when used in an `OffsetVec`)
pub trait Width {
    fn width(&self) -> usize;
}

/// A vector of elements of different logical "widths", where offsets into the vector are given in
/// terms of the sum of the widths of the previous elements (as opposed to the number of preceding
/// elements).
///
/// Two places in a class file count this way:
///
///   - the constant pool, where `long` and `double` entries use up two indices
///   - the operand stack, where `long` and `double` values use up two slots (this is what
///     `max_stack` measures)
///
#[derive(Clone)]
pub struct OffsetVec<T> {
    /// Entries, along with their offset
    entries: Vec<(Offset, T)>,

    /// Offset of the next element to be added
    offset_len: Offset,

    /// Offset of the first element (0 for stacks, 1 for the constant pool)
    initial_offset: Offset,
}

/// Offset into an `OffsetVec`
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Offset(pub usize);

impl<T: Width> OffsetVec<T> {
    /// New empty offset vector
    pub fn new() -> OffsetVec<T> {
        OffsetVec::new_starting_at(Offset(0))
    }

    /// New empty offset vector, with a custom starting offset
    pub fn new_starting_at(initial_offset: Offset) -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: initial_offset,
            initial_offset,
        }
    }

    /// Number of entries (not the sum of their widths)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offset of the next element to be added
    pub fn offset_len(&self) -> Offset {
        self.offset_len
    }

    /// Sum of the widths of all entries
    pub fn total_width(&self) -> usize {
        self.offset_len.0 - self.initial_offset.0
    }

    /// Add an entry to the back, returning the offset at which it was placed
    pub fn push(&mut self, elem: T) -> Offset {
        let offset = self.offset_len;
        self.offset_len.0 += elem.width();
        self.entries.push((offset, elem));
        offset
    }

    /// Remove the entry at the back
    pub fn pop(&mut self) -> Option<T> {
        self.entries.pop().map(|(offset, elem)| {
            self.offset_len = offset;
            elem
        })
    }

    /// Peek at the entry at the back
    pub fn last(&self) -> Option<&T> {
        self.entries.last().map(|(_, elem)| elem)
    }

    /// Get an entry by its offset
    ///
    /// Offsets pointing into the middle of a wide entry don't resolve to anything.
    pub fn get_offset(&self, offset: Offset) -> Option<&T> {
        self.entries
            .binary_search_by_key(&offset, |(off, _)| *off)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    /// Iterate through entries in order, along with their offsets
    pub fn iter(&self) -> OffsetVecIter<'_, T> {
        OffsetVecIter(self.entries.iter())
    }

    /// Iterate through just the entries
    pub fn values(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        self.entries.iter().map(|(_, elem)| elem)
    }
}

impl<A: PartialEq> PartialEq for OffsetVec<A> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<A: Eq> Eq for OffsetVec<A> {}

impl<A: Width> Default for OffsetVec<A> {
    fn default() -> Self {
        OffsetVec::new()
    }
}

/// Iterator for borrowed `OffsetVec`
pub struct OffsetVecIter<'a, T>(Iter<'a, (Offset, T)>);

impl<'a, T> Iterator for OffsetVecIter<'a, T> {
    type Item = (Offset, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(off, elem)| (*off, elem))
    }
}

impl<'a, T> DoubleEndedIterator for OffsetVecIter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.0.next_back().map(|(off, elem)| (*off, elem))
    }
}

impl<'a, T: Width> IntoIterator for &'a OffsetVec<T> {
    type Item = (Offset, &'a T);
    type IntoIter = OffsetVecIter<'a, T>;

    fn into_iter(self) -> OffsetVecIter<'a, T> {
        self.iter()
    }
}

impl<T: Width> FromIterator<T> for OffsetVec<T> {
    fn from_iter<A: IntoIterator<Item = T>>(elems: A) -> Self {
        let mut offset_vec = OffsetVec::new();
        offset_vec.extend(elems);
        offset_vec
    }
}

impl<T: Width> Extend<T> for OffsetVec<T> {
    fn extend<U: IntoIterator<Item = T>>(&mut self, iter: U) {
        for elem in iter {
            self.push(elem);
        }
    }
}

impl<T: Debug> Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let mut list = f.debug_list();
        for (off, elem) in &self.entries {
            list.entry(&format_args!("#{} = {:?}", off.0, elem));
        }
        list.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    enum Slot {
        Narrow(u8),
        Wide(u8),
    }

    impl Width for Slot {
        fn width(&self) -> usize {
            match self {
                Slot::Narrow(_) => 1,
                Slot::Wide(_) => 2,
            }
        }
    }

    #[test]
    fn offsets_follow_widths() {
        let slots: OffsetVec<Slot> = vec![
            Slot::Narrow(1),
            Slot::Wide(2),
            Slot::Narrow(3),
            Slot::Wide(4),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            slots.iter().map(|(off, s)| (off, *s)).collect::<Vec<_>>(),
            vec![
                (Offset(0), Slot::Narrow(1)),
                (Offset(1), Slot::Wide(2)),
                (Offset(3), Slot::Narrow(3)),
                (Offset(4), Slot::Wide(4)),
            ]
        );
        assert_eq!(slots.offset_len(), Offset(6));
        assert_eq!(slots.len(), 4);
    }

    #[test]
    fn pool_style_starting_offset() {
        let mut pool: OffsetVec<Slot> = OffsetVec::new_starting_at(Offset(1));
        assert_eq!(pool.push(Slot::Narrow(1)), Offset(1));
        assert_eq!(pool.push(Slot::Wide(2)), Offset(2));
        assert_eq!(pool.push(Slot::Narrow(3)), Offset(4));
        assert_eq!(pool.total_width(), 4);
        assert_eq!(pool.get_offset(Offset(2)), Some(&Slot::Wide(2)));
        assert_eq!(pool.get_offset(Offset(3)), None);
    }

    #[test]
    fn pop_rewinds_offset() {
        let mut stack: OffsetVec<Slot> = OffsetVec::new();
        stack.push(Slot::Wide(1));
        stack.push(Slot::Narrow(2));
        assert_eq!(stack.pop(), Some(Slot::Narrow(2)));
        assert_eq!(stack.offset_len(), Offset(2));
        assert_eq!(stack.last(), Some(&Slot::Wide(1)));
        assert_eq!(stack.pop(), Some(Slot::Wide(1)));
        assert_eq!(stack.pop(), None);
        assert_eq!(stack.offset_len(), Offset(0));
    }
}
