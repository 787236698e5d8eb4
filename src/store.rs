//! Values, references, and the per-recording store.
//!
//! A [`Reference`] is the indirection that lets a fragment fetched from one
//! machine be represented inside another: it names a slot of the machine one
//! recording level below, a value offset into that slot, and how many
//! logical values it stands for. The [`Store`] is the append-only array of
//! fragments a recording accumulates as fetches split its sources apart.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::config::ant_config;
use crate::record::RecordState;
use crate::seq::{Elem, Seq};

/// Source slot of a reference, addressed within the machine one level below
/// the referring value: an environment slot, a store slot, or the
/// kontinuation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RefSrc {
    Env(usize),
    Store(usize),
    Kont,
}

impl fmt::Display for RefSrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefSrc::Env(i) => write!(f, "E{i}"),
            RefSrc::Store(i) => write!(f, "S{i}"),
            RefSrc::Kont => write!(f, "K"),
        }
    }
}

/// An unmaterialized fragment: `values_count` logical values of the source
/// slot, starting `offset` values in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub src: RefSrc,
    pub offset: u64,
    pub values_count: u64,
}

/// Shared per-origin fetch-width counter. A value and every store fragment
/// split off from it share one cell, so consecutive fetches from the same
/// origin see exponentially growing widths.
#[derive(Clone, Debug)]
pub struct FetchWidth(Rc<Cell<u64>>);

impl FetchWidth {
    pub fn new(width: u64) -> Self {
        FetchWidth(Rc::new(Cell::new(width)))
    }

    pub fn fresh() -> Self {
        Self::new(ant_config().initial_fetch_width)
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }

    pub fn double(&self) {
        self.0.set(self.0.get().saturating_mul(2));
    }
}

/// A machine value: a sequence plus the recording level it was created at.
///
/// Values never alias. Each occurrence is its own `Value` record even when
/// sequences coincide, because `fetch_length` is per-occurrence; there is
/// deliberately no `Clone`.
#[derive(Debug)]
pub struct Value {
    pub seq: Seq,
    pub depth: usize,
    pub fetch_length: FetchWidth,
    /// Fetch-count watermark: equal to the enclosing record's fetch count
    /// when the value is known to hold no reference to its own depth.
    pub compressed_since: u64,
}

impl Value {
    pub fn new(seq: Seq, depth: usize) -> Value {
        Value {
            seq,
            depth,
            fetch_length: FetchWidth::fresh(),
            compressed_since: 0,
        }
    }

    /// Placeholder left behind while a value is moved out of its slot.
    pub(crate) fn tombstone() -> Value {
        Value {
            seq: Seq::empty(),
            depth: usize::MAX,
            fetch_length: FetchWidth::new(0),
            compressed_since: 0,
        }
    }

    pub(crate) fn is_tombstone(&self) -> bool {
        self.depth == usize::MAX
    }
}

/// Append-only array of fragment values, addressed by `RefSrc::Store`.
/// Lives exactly one recording scope.
#[derive(Debug, Default)]
pub struct Store {
    slots: Vec<Value>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, i: usize) -> &Value {
        &self.slots[i]
    }

    pub(crate) fn get_mut(&mut self, i: usize) -> &mut Value {
        &mut self.slots[i]
    }

    pub fn push(&mut self, v: Value) -> usize {
        self.slots.push(v);
        self.slots.len() - 1
    }
}

/// Append `seq` to the recording's store as a fresh fragment value at the
/// recorded machine's depth, sharing `width` with the originating value, and
/// return the one-element sequence referencing the whole fragment.
pub fn add_to_store(rs: &mut RecordState, seq: Seq, width: FetchWidth) -> Seq {
    let degree = seq.measure().degree;
    assert!(degree >= 0, "store fragment with negative degree {degree}");
    let idx = rs.s.push(Value {
        seq,
        depth: rs.m.d,
        fetch_length: width,
        compressed_since: 0,
    });
    Seq::singleton(Elem::Ref(Reference {
        src: RefSrc::Store(idx),
        offset: 0,
        values_count: degree as u64,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordState, State};
    use crate::word::Word;

    fn base_state() -> State {
        State {
            c: 0,
            e: Vec::new(),
            k: Value::new(Seq::singleton(Elem::Word(Word::ctor(0))), 0),
            d: 0,
            last: None,
        }
    }

    #[test]
    fn add_to_store_returns_whole_fragment_reference() {
        if crate::table::constructor_count() == 0 {
            crate::table::set_constructor_degree(0, 1).unwrap();
        }
        let mut rs = RecordState::over(base_state());
        let seq: Seq = [Elem::Word(Word::int(1)), Elem::Word(Word::int(2))]
            .into_iter()
            .collect();
        let width = FetchWidth::new(4);
        let out = add_to_store(&mut rs, seq.clone(), width.clone());
        assert_eq!(rs.s.len(), 1);
        assert_eq!(rs.s.get(0).seq, seq);
        assert_eq!(rs.s.get(0).depth, 0);
        assert_eq!(
            out.iter().collect::<Vec<_>>(),
            vec![Elem::Ref(Reference {
                src: RefSrc::Store(0),
                offset: 0,
                values_count: 2
            })]
        );
        // the width cell is shared, not copied
        width.double();
        assert_eq!(rs.s.get(0).fetch_length.get(), 8);
    }
}
