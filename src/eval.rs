//! The CEK driver and the state-manipulation primitives generated steppers
//! rely on.
//!
//! The driver iterates the step table until a step returns the terminal
//! sentinel, then cascades the completion of every live recording. Step
//! functions interact with the memoizer only through the two suspension
//! points: [`get_next_cont`] before consuming the head of the kontinuation
//! and [`match_last`] before matching on a scrutinee.

use tracing::debug;

use crate::config::ant_config;
use crate::error::MachineError;
use crate::fetch::{path_compress_value, unshift_all, FetchRequest};
use crate::memo::{enter_new_memo, suspend, Memo, MemoNode, Progress, Suspended};
use crate::record::{Pc, RecordCtx, State, DONE_PC};
use crate::seq::{Elem, Seq};
use crate::store::Value;
use crate::table;
use crate::word::{CTag, Word};

/// Per-run counters, readable after `exec_cek` returns.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvalStats {
    /// Step-table dispatches.
    pub steps: usize,
    /// Successful fetches across all recording levels.
    pub fetches: u64,
    /// `Done` nodes taken instead of executing.
    pub skips: u64,
}

/// The evaluator: owns the memo (which spans all `exec_cek` calls of this
/// instance and dies with it) and a step limit.
pub struct Evaluator {
    memo: Memo,
    limit: usize,
    stats: EvalStats,
    memo_enabled: bool,
}

impl Evaluator {
    pub fn new(limit: usize) -> Evaluator {
        Evaluator {
            memo: Memo::new(),
            limit,
            stats: EvalStats::default(),
            memo_enabled: ant_config().memo_enabled,
        }
    }

    /// An evaluator that never memoizes; every suspension point degrades to
    /// a plain read.
    pub fn without_memo(limit: usize) -> Evaluator {
        Evaluator {
            memo_enabled: false,
            ..Evaluator::new(limit)
        }
    }

    pub fn stats(&self) -> EvalStats {
        self.stats
    }

    /// Run the machine from `pc` over `env` and `k` to its final sequence.
    /// Inputs must be single materialized values; the result is the last
    /// environment slot of the terminal state, fully materialized.
    pub fn exec_cek(&mut self, pc: Pc, env: Vec<Seq>, k: Seq) -> Result<Seq, MachineError> {
        table::freeze();
        self.stats = EvalStats::default();
        let e = env
            .into_iter()
            .map(machine_input)
            .collect::<Result<Vec<_>, _>>()?;
        let k = machine_input(k)?;
        let mut state = State {
            c: pc,
            e,
            k,
            d: 0,
            last: None,
        };
        debug!(pc, "exec_cek start");
        while state.c != DONE_PC {
            if self.stats.steps >= self.limit {
                return Err(MachineError::StepLimitExceeded(self.stats.steps));
            }
            let step = table::step_fn(state.c)?;
            state = step(state, self)?;
            self.stats.steps += 1;
        }
        let mut state = finish(state);
        let result = state.e.pop().ok_or(MachineError::EmptyResult)?;
        debug!(
            steps = self.stats.steps,
            fetches = self.stats.fetches,
            skips = self.stats.skips,
            "exec_cek done"
        );
        Ok(result.seq)
    }
}

fn machine_input(s: Seq) -> Result<Value, MachineError> {
    let m = s.measure();
    if m.full.is_none() {
        return Err(MachineError::InvalidInput(
            "sequence contains references".into(),
        ));
    }
    if m.degree != 1 || m.max_degree != 1 {
        return Err(MachineError::InvalidInput(format!(
            "sequence has degree {}, expected a single value",
            m.degree
        )));
    }
    Ok(Value::new(s, 0))
}

/// Cascade completions at the terminal sentinel: freeze each live
/// recording's node to `Done` and unshift, level by level, down to the
/// base machine. A reentrant recording unshifts without freezing; its path
/// already exists in the trie.
fn finish(mut state: State) -> State {
    debug_assert_eq!(state.c, DONE_PC);
    while state.last.is_some() {
        let node = match &state.last.as_ref().expect("checked above").r {
            RecordCtx::Evaluating(n) => Some(n.clone()),
            RecordCtx::Reentrance(_) => None,
            RecordCtx::Building => panic!("completed recording never attached to the memo"),
        };
        if let Some(node) = node {
            if matches!(&*node.borrow(), MemoNode::BlackHole) {
                *node.borrow_mut() = MemoNode::Done {
                    progress: Progress::freeze(&state),
                };
                debug!(depth = state.d, "memo entry completed");
            }
        }
        state = unshift_all(state);
    }
    state
}

/// Outcome of a suspension-point primitive.
pub enum Resolved {
    /// The head word is materialized; the step proceeds with it.
    At(State, Word),
    /// A memo skip or unwind moved control; the step must return the state
    /// to the driver for re-dispatch.
    Advanced(State),
}

#[derive(Copy, Clone)]
enum Which {
    EnvLast,
    Kont,
}

/// Suspension point (b): enter the memo at the current pc, then resolve the
/// head word of the last environment slot.
pub fn match_last(state: State, ev: &mut Evaluator) -> Result<Resolved, MachineError> {
    suspension_point(state, ev, Which::EnvLast)
}

/// Suspension point (a): enter the memo at the current pc, then resolve the
/// head word of the kontinuation without consuming it.
pub fn get_next_cont(state: State, ev: &mut Evaluator) -> Result<Resolved, MachineError> {
    suspension_point(state, ev, Which::Kont)
}

fn suspension_point(
    state: State,
    ev: &mut Evaluator,
    which: Which,
) -> Result<Resolved, MachineError> {
    let pc = state.c;
    let state = if ev.memo_enabled {
        enter_new_memo(state, &mut ev.memo, &mut ev.stats)
    } else {
        state
    };
    if state.c != pc {
        // A recorded path carried control elsewhere.
        return Ok(Resolved::Advanced(state));
    }
    resolve_slot(state, which, ev)
}

/// Loop of path-compress, head inspection, and suspension until the
/// addressed slot's head is a word. Unwinds recording levels as fetches
/// fail; bottoms out at the base machine, whose values are materialized.
fn resolve_slot(
    mut state: State,
    which: Which,
    ev: &mut Evaluator,
) -> Result<Resolved, MachineError> {
    loop {
        let idx = match which {
            Which::EnvLast => Some(
                state
                    .e
                    .len()
                    .checked_sub(1)
                    .expect("environment underflow at scrutinee"),
            ),
            Which::Kont => None,
        };
        let slot = match idx {
            Some(i) => &mut state.e[i],
            None => &mut state.k,
        };
        let v = std::mem::replace(slot, Value::tombstone());
        let v = path_compress_value(state.last.as_deref(), v);
        let head = v.seq.first();
        match idx {
            Some(i) => state.e[i] = v,
            None => state.k = v,
        }
        match head {
            None => panic!("empty machine value"),
            Some(Elem::Word(w)) => return Ok(Resolved::At(state, w)),
            Some(Elem::Ref(r)) => {
                let rs = state
                    .last
                    .as_deref()
                    .expect("unresolved reference on the base machine");
                let width = rs.peek_slot(r.src).fetch_length.get().max(1);
                let request = FetchRequest {
                    src: r.src,
                    offset: r.offset,
                    word_count: width,
                };
                match suspend(state, request, &mut ev.stats) {
                    Suspended::Continue(s) => state = s,
                    Suspended::Transfer(s) => return Ok(Resolved::Advanced(s)),
                }
            }
        }
    }
}

/// Pop the last environment value and split it into its head word and the
/// constructor's children. The head must already be resolved.
pub fn split_last(mut state: State) -> (State, Word, Vec<Value>) {
    let v = state.e.pop().expect("environment underflow");
    let (head, rest) = v.seq.expect_front();
    let Elem::Word(w) = head else {
        panic!("split on an unresolved value head")
    };
    let arity = match w.as_ctor() {
        Some(c) => table::constructor_arity(c),
        None => 0,
    };
    let mut rest = rest;
    let mut children = Vec::with_capacity(arity as usize);
    for _ in 0..arity {
        let (h, t) = rest.pop_n(1);
        children.push(Value::new(h, v.depth));
        rest = t;
    }
    assert!(rest.is_empty(), "constructor arity mismatch in value");
    (state, w, children)
}

/// Consume the kontinuation's head frame: the last child becomes the new
/// kontinuation, the saved values are returned. The head must already be
/// resolved and must not be terminal.
pub fn pop_cont(mut state: State) -> (State, Word, Vec<Value>) {
    let k = std::mem::replace(&mut state.k, Value::tombstone());
    let (head, rest) = k.seq.expect_front();
    let Elem::Word(w) = head else {
        panic!("pop_cont on an unresolved kontinuation head")
    };
    let ctag = w.as_ctor().expect("kontinuation head is not a constructor");
    let arity = table::constructor_arity(ctag);
    assert!(arity >= 1, "pop_cont on a terminal kontinuation");
    let mut rest = rest;
    let mut children = Vec::with_capacity(arity as usize);
    for _ in 0..arity {
        let (h, t) = rest.pop_n(1);
        children.push(Value::new(h, k.depth));
        rest = t;
    }
    assert!(rest.is_empty(), "constructor arity mismatch in kontinuation");
    state.k = children.pop().expect("arity checked above");
    (state, w, children)
}

/// Push a frame onto the kontinuation: `[ctor; saved...; current k]`.
/// Saved values must be materialized or live at the kontinuation's depth.
pub fn push_cont(mut state: State, ctag: CTag, saved: Vec<Value>) -> State {
    let k = std::mem::replace(&mut state.k, Value::tombstone());
    let depth = unified_depth(k.depth, saved.iter().chain(std::iter::once(&k)));
    let mut seq = Seq::singleton(Elem::Word(Word::ctor(ctag)));
    for v in &saved {
        seq = seq.append(&v.seq);
    }
    seq = seq.append(&k.seq);
    state.k = Value::new(seq, depth);
    state
}

/// Assemble a constructor value from children. Children must be
/// materialized or agree on a depth.
pub fn build_value(state: &State, ctag: CTag, children: Vec<Value>) -> Value {
    assert_eq!(
        children.len() as u64,
        table::constructor_arity(ctag),
        "constructor arity mismatch"
    );
    let depth = unified_depth(state.d, children.iter());
    let mut seq = Seq::singleton(Elem::Word(Word::ctor(ctag)));
    for v in &children {
        seq = seq.append(&v.seq);
    }
    Value::new(seq, depth)
}

/// Depth of a value assembled from `parts`: reference-carrying parts must
/// agree, word-only parts are depth-neutral.
fn unified_depth<'a, I: Iterator<Item = &'a Value>>(fallback: usize, parts: I) -> usize {
    let mut depth = None;
    for v in parts {
        if v.seq.measure().full.is_none() {
            match depth {
                None => depth = Some(v.depth),
                Some(d) => assert_eq!(d, v.depth, "mixed-depth value construction"),
            }
        }
    }
    depth.unwrap_or(fallback)
}

pub fn push_env(mut state: State, v: Value) -> State {
    let m = v.seq.measure();
    assert!(
        m.degree == 1 && m.max_degree == 1,
        "environment value of degree {}",
        m.degree
    );
    state.e.push(v);
    state
}

pub fn pop_env(mut state: State) -> (State, Value) {
    let v = state.e.pop().expect("environment underflow");
    (state, v)
}

pub fn assert_env_length(state: &State, n: usize) {
    assert_eq!(state.e.len(), n, "environment length mismatch");
}

/// Drop the `n` most recent environment values.
pub fn drop_n(mut state: State, n: usize) -> State {
    let len = state.e.len();
    assert!(n <= len, "environment underflow");
    state.e.truncate(len - n);
    state
}

/// Discard all but the last `n` environment values.
pub fn env_keep_last_n(mut state: State, n: usize) -> State {
    let len = state.e.len();
    assert!(n <= len, "environment underflow");
    state.e.drain(..len - n);
    state
}

/// Keep the last `n` values as the returns of the current frame.
pub fn return_n(state: State, n: usize) -> State {
    env_keep_last_n(state, n)
}

/// Re-append saved values to the environment.
pub fn restore_env(mut state: State, values: Vec<Value>) -> State {
    state.e.extend(values);
    state
}
