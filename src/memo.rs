//! The memo trie and the record-mode protocol.
//!
//! Each program counter owns a trie whose edges are observed
//! [`FetchResult`]s. A path through the trie replays the exact sequence of
//! fetches a previous execution performed from that suspension point; a
//! `Done` leaf lifts the caller straight to the recorded post-state. Every
//! memo-protocol outcome is one of skip, enter, exit, or need; nothing
//! else crosses this boundary.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::eval::EvalStats;
use crate::fetch::{fetch_value, unshift_all, FetchRequest, FetchResult};
use crate::record::{lift_state, Pc, RecordCtx, RecordState, State};
use crate::seq::Seq;
use crate::store::Value;

pub type MemoRef = Rc<RefCell<MemoNode>>;

type Lookup = HashMap<FetchResult, MemoRef, ahash::RandomState>;

/// Frozen image of a machine state: the opaque control, one sequence per
/// environment slot, and the kontinuation sequence. Instantiating it over a
/// caller's record yields the state one level up, with fresh per-occurrence
/// cells.
#[derive(Debug, Clone)]
pub struct Progress {
    c: Pc,
    e: Vec<Seq>,
    k: Seq,
}

impl Progress {
    pub fn freeze(state: &State) -> Progress {
        Progress {
            c: state.c,
            e: state.e.iter().map(|v| v.seq.clone()).collect(),
            k: state.k.seq.clone(),
        }
    }

    /// Enter the frozen state over `rs`: depth goes up by one.
    pub fn enter(&self, rs: Box<RecordState>) -> State {
        let d = rs.m.d + 1;
        State {
            c: self.c,
            e: self.e.iter().map(|s| Value::new(s.clone(), d)).collect(),
            k: Value::new(self.k.clone(), d),
            d,
            last: Some(rs),
        }
    }
}

/// One node of a memo trie.
#[derive(Debug)]
pub enum MemoNode {
    /// Created slot; no information yet.
    Root,
    /// Currently being resolved on the stack. Visiting it is a bug.
    BlackHole,
    /// Resolution needs `request` fetched; each observed result leads to a
    /// child, and `progress` re-enters the suspended subcomputation.
    Need {
        request: FetchRequest,
        lookup: Lookup,
        progress: Progress,
    },
    /// Resolution complete: entering the recorded terminal state and
    /// exiting it lifts a caller's record to the post-memo state.
    Done { progress: Progress },
}

fn black_hole() -> MemoRef {
    Rc::new(RefCell::new(MemoNode::BlackHole))
}

/// PC-indexed memo roots. Lives for a single evaluator instance.
#[derive(Debug, Default)]
pub struct Memo {
    roots: Vec<MemoRef>,
}

impl Memo {
    pub fn new() -> Memo {
        Memo::default()
    }

    fn root(&mut self, pc: Pc) -> MemoRef {
        if pc >= self.roots.len() {
            self.roots
                .resize_with(pc + 1, || Rc::new(RefCell::new(MemoNode::Root)));
        }
        self.roots[pc].clone()
    }
}

/// Begin (or replay) a recording for the current program counter. Returns
/// the state to continue from: lifted one level on a fresh entry, resumed
/// from a frozen suspension on a partial replay, or the post-memo state on
/// a full skip.
pub fn enter_new_memo(state: State, memo: &mut Memo, stats: &mut EvalStats) -> State {
    let root = memo.root(state.c);
    let rs = RecordState::over(state);
    enter_new_memo_aux(rs, root, true, stats)
}

fn enter_new_memo_aux(
    mut rs: RecordState,
    node: MemoRef,
    matched: bool,
    stats: &mut EvalStats,
) -> State {
    enum Plan {
        Skip(Progress),
        Root,
        BlackHole,
        Need(FetchRequest, Progress),
    }
    // Snapshot the node, releasing the borrow before mutation or recursion.
    let plan = match &*node.borrow() {
        MemoNode::Done { progress } => Plan::Skip(progress.clone()),
        MemoNode::Root => Plan::Root,
        MemoNode::BlackHole => Plan::BlackHole,
        MemoNode::Need {
            request, progress, ..
        } => Plan::Need(request.clone(), progress.clone()),
    };
    match plan {
        Plan::Skip(progress) => {
            stats.skips += 1;
            debug!(pc = rs.m.c, "memo skip");
            unshift_all(progress.enter(Box::new(rs)))
        }
        Plan::Root => {
            if matched {
                *node.borrow_mut() = MemoNode::BlackHole;
                rs.r = RecordCtx::Evaluating(node);
                trace!(pc = rs.m.c, "memo entry installed");
                lift_state(rs)
            } else {
                rs.m
            }
        }
        Plan::BlackHole => panic!("memo reentrance into an in-progress entry (pc {})", rs.m.c),
        Plan::Need(request, progress) => match fetch_value(&mut rs, &request) {
            Some(fr) => {
                stats.fetches += 1;
                let existing = match &*node.borrow() {
                    MemoNode::Need { lookup, .. } => lookup.get(&fr).cloned(),
                    _ => unreachable!("need node changed shape during fetch"),
                };
                match existing {
                    Some(child) => enter_new_memo_aux(rs, child, true, stats),
                    None => {
                        let child = black_hole();
                        match &mut *node.borrow_mut() {
                            MemoNode::Need { lookup, .. } => {
                                lookup.insert(fr, child.clone());
                            }
                            _ => unreachable!("need node changed shape during fetch"),
                        }
                        rs.r = RecordCtx::Evaluating(child);
                        progress.enter(Box::new(rs))
                    }
                }
            }
            None => {
                if matched {
                    trace!(pc = rs.m.c, "memo reentrance");
                    rs.r = RecordCtx::Reentrance(node);
                    progress.enter(Box::new(rs))
                } else {
                    rs.m
                }
            }
        },
    }
}

/// Outcome of a suspension: either keep resolving from the returned state,
/// or control moved (a recorded skip fired) and the driver must
/// re-dispatch.
pub enum Suspended {
    Continue(State),
    Transfer(State),
}

/// Suspension on an unfetched fragment. Registers (or re-matches) a `Need`
/// on the enclosing record's memo node, then fetches at the enclosing
/// level: on success the observed result picks or creates the child; on
/// failure the whole recording exits one level via `unshift_all`.
pub fn suspend(mut state: State, request: FetchRequest, stats: &mut EvalStats) -> Suspended {
    let mut rs = state
        .last
        .take()
        .expect("suspension on the base machine");
    let (node, reentrant) = match &rs.r {
        RecordCtx::Evaluating(n) => (n.clone(), false),
        RecordCtx::Reentrance(n) => (n.clone(), true),
        RecordCtx::Building => panic!("suspension before memo entry"),
    };
    let unresolved = matches!(&*node.borrow(), MemoNode::BlackHole);
    if unresolved {
        assert!(!reentrant, "reentrance context on an unresolved node");
        *node.borrow_mut() = MemoNode::Need {
            request: request.clone(),
            lookup: Lookup::default(),
            progress: Progress::freeze(&state),
        };
    } else {
        match &*node.borrow() {
            MemoNode::Need { request: r0, .. } => {
                assert_eq!(
                    *r0, request,
                    "reentrant suspension with a mismatched fetch request"
                );
            }
            _ => panic!("suspension on a resolved memo node"),
        }
    }
    match fetch_value(&mut rs, &request) {
        Some(fr) => {
            stats.fetches += 1;
            let existing = match &*node.borrow() {
                MemoNode::Need { lookup, .. } => lookup.get(&fr).cloned(),
                _ => unreachable!("need node changed shape during fetch"),
            };
            match existing {
                Some(child) => {
                    let done = match &*child.borrow() {
                        MemoNode::Done { progress } => Some(progress.clone()),
                        MemoNode::BlackHole => {
                            panic!("memo reentrance into an in-progress entry")
                        }
                        MemoNode::Need { .. } => None,
                        MemoNode::Root => unreachable!("root node below a need"),
                    };
                    match done {
                        Some(progress) => {
                            // The rest of this recording is already known:
                            // the live inner state is superseded.
                            stats.skips += 1;
                            debug!("memo skip at suspension");
                            Suspended::Transfer(unshift_all(progress.enter(rs)))
                        }
                        None => {
                            rs.r = RecordCtx::Evaluating(child);
                            state.last = Some(rs);
                            Suspended::Continue(state)
                        }
                    }
                }
                None => {
                    let child = black_hole();
                    match &mut *node.borrow_mut() {
                        MemoNode::Need { lookup, .. } => {
                            lookup.insert(fr, child.clone());
                        }
                        _ => unreachable!("need node changed shape during fetch"),
                    }
                    rs.r = RecordCtx::Evaluating(child);
                    state.last = Some(rs);
                    Suspended::Continue(state)
                }
            }
        }
        None => {
            trace!("fetch refused, unwinding one level");
            state.last = Some(rs);
            Suspended::Continue(unshift_all(state))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::Elem;
    use crate::store::{RefSrc, Reference};
    use crate::word::Word;

    fn ensure_degrees() {
        if crate::table::constructor_count() == 0 {
            crate::table::set_constructor_degree(0, 1).unwrap();
            crate::table::set_constructor_degree(1, 1).unwrap();
        }
    }

    fn base_state() -> State {
        State {
            c: 3,
            e: vec![Value::new(
                Seq::singleton(Elem::Word(Word::ctor(1))),
                0,
            )],
            k: Value::new(Seq::singleton(Elem::Word(Word::ctor(0))), 0),
            d: 0,
            last: None,
        }
    }

    #[test]
    fn first_entry_installs_a_black_hole_and_lifts() {
        ensure_degrees();
        let mut memo = Memo::new();
        let mut stats = EvalStats::default();
        let inner = enter_new_memo(base_state(), &mut memo, &mut stats);
        assert_eq!(inner.d, 1);
        assert!(matches!(&*memo.root(3).borrow(), MemoNode::BlackHole));
        assert_eq!(
            inner.e[0].seq.iter().collect::<Vec<_>>(),
            vec![Elem::Ref(Reference {
                src: RefSrc::Env(0),
                offset: 0,
                values_count: 1
            })]
        );
        assert_eq!(stats.skips, 0);
    }

    #[test]
    #[should_panic(expected = "in-progress entry")]
    fn black_hole_reentry_traps() {
        ensure_degrees();
        let mut memo = Memo::new();
        let mut stats = EvalStats::default();
        let inner = enter_new_memo(base_state(), &mut memo, &mut stats);
        // Re-entering the same pc while its root is under construction is a
        // protocol violation.
        drop(inner);
        let _ = enter_new_memo(base_state(), &mut memo, &mut stats);
    }

    #[test]
    fn suspension_freezes_a_need_and_fetches() {
        ensure_degrees();
        let mut memo = Memo::new();
        let mut stats = EvalStats::default();
        let inner = enter_new_memo(base_state(), &mut memo, &mut stats);
        let request = FetchRequest {
            src: RefSrc::Env(0),
            offset: 0,
            word_count: 1,
        };
        let out = suspend(inner, request.clone(), &mut stats);
        let state = match out {
            Suspended::Continue(s) => s,
            Suspended::Transfer(_) => panic!("unexpected transfer"),
        };
        assert_eq!(state.d, 1);
        assert_eq!(stats.fetches, 1);
        match &*memo.root(3).borrow() {
            MemoNode::Need {
                request: r, lookup, ..
            } => {
                assert_eq!(r, &request);
                assert_eq!(lookup.len(), 1);
            }
            other => panic!("expected a need node, found {other:?}"),
        }
    }
}
