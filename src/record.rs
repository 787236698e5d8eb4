//! Machine states and the record-mode stack.
//!
//! A [`State`] is the CEK triple plus its recording level; `last` owns the
//! [`RecordState`] of the enclosing level, so the record stack is the chain
//! of `last` pointers down to the base machine. Each `RecordState`
//! exclusively owns its store and fetch counter.

use crate::memo::MemoRef;
use crate::seq::{Elem, Seq};
use crate::store::{RefSrc, Reference, Store, Value};

/// Opaque program counter into the step table.
pub type Pc = usize;

/// Terminal sentinel: a step signals `exec_done` by returning a state whose
/// `c` is this value.
pub const DONE_PC: Pc = usize::MAX;

/// CEK machine state at one recording level. Invariant: a state at depth
/// `d` holds values only at depth `d` or `d + 1`.
#[derive(Debug)]
pub struct State {
    /// Control: index of the current step function.
    pub c: Pc,
    /// Environment: ordered values, each of degree 1.
    pub e: Vec<Value>,
    /// Kontinuation, a single value.
    pub k: Value,
    /// Recording level; 0 is the base evaluator.
    pub d: usize,
    /// Record of the enclosing level, present iff `d > 0`.
    pub last: Option<Box<RecordState>>,
}

/// What the current recording is doing with its memo slot.
#[derive(Debug)]
pub enum RecordCtx {
    /// Fresh record, not yet attached to a node.
    Building,
    /// Extending the trie at this node (a black hole under construction).
    Evaluating(MemoRef),
    /// Re-executing under an existing `Need` whose request could not be
    /// fetched; observed fetches extend the same lookup.
    Reentrance(MemoRef),
}

/// Per-depth recording context: the recorded state, its store, the fetch
/// count, and the memo pointer.
#[derive(Debug)]
pub struct RecordState {
    /// The state being recorded at this depth.
    pub m: State,
    pub s: Store,
    /// Monotonically incremented on every successful fetch at this depth.
    pub f: u64,
    pub r: RecordCtx,
}

impl RecordState {
    pub fn over(state: State) -> RecordState {
        RecordState {
            m: state,
            s: Store::new(),
            f: 0,
            r: RecordCtx::Building,
        }
    }

    pub fn peek_slot(&self, src: RefSrc) -> &Value {
        match src {
            RefSrc::Env(i) => &self.m.e[i],
            RefSrc::Store(i) => self.s.get(i),
            RefSrc::Kont => &self.m.k,
        }
    }

    /// Move the slot's value out, leaving a placeholder. Values are moved on
    /// every mutation; taking is the only way to get one out of a slot.
    pub fn take_slot(&mut self, src: RefSrc) -> Value {
        let slot = match src {
            RefSrc::Env(i) => &mut self.m.e[i],
            RefSrc::Store(i) => self.s.get_mut(i),
            RefSrc::Kont => &mut self.m.k,
        };
        let v = std::mem::replace(slot, Value::tombstone());
        assert!(!v.is_tombstone(), "slot {src} taken twice");
        v
    }

    pub fn put_slot(&mut self, src: RefSrc, v: Value) {
        let slot = match src {
            RefSrc::Env(i) => &mut self.m.e[i],
            RefSrc::Store(i) => self.s.get_mut(i),
            RefSrc::Kont => &mut self.m.k,
        };
        debug_assert!(slot.is_tombstone(), "slot {src} overwritten");
        *slot = v;
    }
}

/// Begin recording: every value of the recorded state becomes a single
/// reference back to its own slot, one level up. The environment maps to
/// `E i`, the kontinuation to `K`.
pub fn lift_state(rs: RecordState) -> State {
    let d = rs.m.d + 1;
    let e = (0..rs.m.e.len())
        .map(|i| {
            Value::new(
                Seq::singleton(Elem::Ref(Reference {
                    src: RefSrc::Env(i),
                    offset: 0,
                    values_count: 1,
                })),
                d,
            )
        })
        .collect();
    let k = Value::new(
        Seq::singleton(Elem::Ref(Reference {
            src: RefSrc::Kont,
            offset: 0,
            values_count: 1,
        })),
        d,
    );
    State {
        c: rs.m.c,
        e,
        k,
        d,
        last: Some(Box::new(rs)),
    }
}
