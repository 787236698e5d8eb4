//! Fetching fragments between adjacent recording levels, path compression,
//! and depth demotion.
//!
//! A fetch moves a materialized window of a value from depth `d` to depth
//! `d + 1`, rewriting the source as `prefix-ref ++ words ++ suffix-ref`
//! with the unfetched parts parked in the recording's store. Path
//! compression inlines references whose sources have already been promoted;
//! unshift is the inverse of lifting and materializes a recorded inner
//! state back into its parent.

use tracing::trace;

use crate::hash::SeqDigest;
use crate::record::{RecordState, State};
use crate::seq::{Elem, Measure, Seq};
use crate::store::{add_to_store, FetchWidth, RefSrc, Value};

/// What a `Need` node wants fetched: a word window of the named source.
/// `offset` counts logical values; `word_count` counts words. The request
/// is stable for the life of its node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    pub src: RefSrc,
    pub offset: u64,
    pub word_count: u64,
}

/// Hashed witness of a fetched fragment, the exclusive key into a `Need`
/// lookup. The fetched words participate in equality by their monoidal
/// digest; the flags distinguish fragments that reach the value's ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchResult {
    pub digest: SeqDigest,
    pub len: u64,
    pub have_prefix: bool,
    pub have_suffix: bool,
}

/// Inline every reference of `v` whose source slot has been promoted to
/// `v`'s own depth; references to strictly lower depths are left in place.
/// Idempotent per fetch epoch via the `compressed_since` watermark.
pub fn path_compress_value(parent: Option<&RecordState>, v: Value) -> Value {
    let Some(rs) = parent else {
        // Base-machine values hold no references.
        return v;
    };
    if v.compressed_since == rs.f {
        return v;
    }
    assert_eq!(
        v.depth,
        rs.m.d + 1,
        "path compression across non-adjacent depths"
    );
    let mut done = Seq::empty();
    let mut todo = v.seq;
    loop {
        match todo.split3(|m: &Measure| m.full.is_none()) {
            None => {
                done = done.append(&todo);
                break;
            }
            Some((pre, elem, rest)) => {
                done = done.append(&pre);
                let Elem::Ref(r) = elem else {
                    unreachable!("materialized element with no full measure")
                };
                let sv = rs.peek_slot(r.src);
                if sv.depth == v.depth {
                    // Promoted source: substitute the referenced sub-range
                    // and re-examine it.
                    let sub = sv.seq.slice(r.offset, r.values_count);
                    todo = sub.append(&rest);
                } else {
                    assert_eq!(sv.depth, v.depth - 1, "reference to a foreign depth");
                    done = done.snoc(Elem::Ref(r));
                    todo = rest;
                }
            }
        }
    }
    trace!(depth = v.depth, "path compressed");
    Value {
        seq: done,
        depth: v.depth,
        fetch_length: v.fetch_length,
        compressed_since: rs.f,
    }
}

/// Move a prefix of the value at `request.src` from the recorded machine's
/// depth to the next one. `None` means the request cannot be satisfied at
/// this level: a partial window that misses the requested width is not
/// stored, it would pollute the lookup table.
pub fn fetch_value(rs: &mut RecordState, request: &FetchRequest) -> Option<FetchResult> {
    let d = rs.m.d;
    let v = rs.take_slot(request.src);
    assert_eq!(
        v.depth, d,
        "fetch from {} at depth {}, expected {d}",
        request.src, v.depth
    );
    let v = path_compress_value(rs.m.last.as_deref(), v);

    let (x, y) = v.seq.pop_n(request.offset);
    let wc = request.word_count;
    // Shortest prefix that is either wide enough or provably unmaterializable.
    let split = y.split3(|m: &Measure| m.full.map_or(true, |f| f.len >= wc));
    let (fetched, rest) = match split {
        None => (y.clone(), Seq::empty()),
        Some((pre, Elem::Word(w), rest)) => (pre.snoc(Elem::Word(w)), rest),
        Some((_, Elem::Ref(_), _)) => {
            // The materialized prefix runs out before `word_count` words.
            rs.put_slot(request.src, v);
            return None;
        }
    };
    let full = fetched
        .measure()
        .full
        .expect("fetched window contains a reference");
    debug_assert!(rest.is_empty() || full.len == wc);

    let have_prefix = x.is_empty();
    let have_suffix = rest.is_empty();
    let width = v.fetch_length.clone();
    let tx = if have_prefix {
        Seq::empty()
    } else {
        add_to_store(rs, x, width.clone())
    };
    let tr = if have_suffix {
        Seq::empty()
    } else {
        add_to_store(rs, rest, width.clone())
    };
    rs.f += 1;
    let promoted = Value {
        seq: tx.append(&fetched).append(&tr),
        depth: d + 1,
        fetch_length: width.clone(),
        compressed_since: rs.f,
    };
    rs.put_slot(request.src, promoted);
    width.double();
    trace!(
        src = %request.src,
        offset = request.offset,
        words = full.len,
        have_prefix,
        have_suffix,
        "fetched"
    );
    Some(FetchResult {
        digest: full.digest,
        len: full.len,
        have_prefix,
        have_suffix,
    })
}

/// Materialize every reference of `seq` against the parent machine.
/// Fragments of unpromoted sources are spliced verbatim (their own
/// references address the next level down and stay valid); fragments of
/// promoted sources are inlined recursively.
fn inline_all(rs: &RecordState, seq: Seq) -> Seq {
    let pd = rs.m.d;
    let mut done = Seq::empty();
    let mut todo = seq;
    loop {
        match todo.split3(|m: &Measure| m.full.is_none()) {
            None => {
                done = done.append(&todo);
                return done;
            }
            Some((pre, elem, rest)) => {
                done = done.append(&pre);
                let Elem::Ref(r) = elem else {
                    unreachable!("materialized element with no full measure")
                };
                let sv = rs.peek_slot(r.src);
                let sub = sv.seq.slice(r.offset, r.values_count);
                if sv.depth == pd + 1 {
                    todo = sub.append(&rest);
                } else {
                    assert_eq!(sv.depth, pd, "reference to a foreign depth");
                    done = done.append(&sub);
                    todo = rest;
                }
            }
        }
    }
}

/// Demote a value one recording level by materializing its references
/// against the parent machine. The fetch-width cell is reset, not shared.
pub fn unshift_value(rs: &RecordState, v: Value) -> Value {
    assert_eq!(v.depth, rs.m.d + 1, "unshift across non-adjacent depths");
    Value {
        seq: inline_all(rs, v.seq),
        depth: rs.m.d,
        fetch_length: FetchWidth::fresh(),
        compressed_since: 0,
    }
}

/// Collapse a recorded inner state into its parent: C passes through
/// unchanged, E and K are rewritten against the parent's slots, and the
/// recording's store is dropped with it.
pub fn unshift_all(mut state: State) -> State {
    let rs = *state
        .last
        .take()
        .expect("unshift of the base machine state");
    assert_eq!(state.d, rs.m.d + 1);
    let e = state
        .e
        .into_iter()
        .map(|v| unshift_value(&rs, v))
        .collect();
    let k = unshift_value(&rs, state.k);
    trace!(from = state.d, "unshifted recording");
    let parent = rs.m;
    State {
        c: state.c,
        e,
        k,
        d: parent.d,
        last: parent.last,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{lift_state, RecordState, State};
    use crate::store::Reference;
    use crate::word::Word;

    const HALT: u32 = 0;
    const NIL: u32 = 1;
    const CONS: u32 = 2;

    fn ensure_degrees() {
        if crate::table::constructor_count() == 0 {
            crate::table::set_constructor_degree(HALT, 1).unwrap();
            crate::table::set_constructor_degree(NIL, 1).unwrap();
            crate::table::set_constructor_degree(CONS, -1).unwrap();
        }
    }

    fn cons_cell() -> Seq {
        [
            Elem::Word(Word::ctor(CONS)),
            Elem::Word(Word::int(1)),
            Elem::Word(Word::ctor(NIL)),
        ]
        .into_iter()
        .collect()
    }

    /// Base state holding a single cons cell and a halt kontinuation.
    fn base_state() -> State {
        State {
            c: 0,
            e: vec![Value::new(cons_cell(), 0)],
            k: Value::new(Seq::singleton(Elem::Word(Word::ctor(HALT))), 0),
            d: 0,
            last: None,
        }
    }

    fn env_request(word_count: u64) -> FetchRequest {
        FetchRequest {
            src: RefSrc::Env(0),
            offset: 0,
            word_count,
        }
    }

    // S5: a one-word fetch over a cons cell takes just the constructor word
    // and leaves a reference standing for its two fields.
    #[test]
    fn fetch_splits_mid_cons() {
        ensure_degrees();
        let mut inner = lift_state(RecordState::over(base_state()));
        let rs = inner.last.as_mut().unwrap();
        let fr = fetch_value(rs, &env_request(1)).unwrap();
        assert!(fr.have_prefix);
        assert!(!fr.have_suffix);
        assert_eq!(fr.len, 1);
        assert_eq!(
            fr.digest,
            SeqDigest::from_word(&Word::ctor(CONS))
        );

        // the source is promoted with the window inline
        let promoted = rs.peek_slot(RefSrc::Env(0));
        assert_eq!(promoted.depth, 1);
        assert_eq!(
            promoted.seq.iter().collect::<Vec<_>>(),
            vec![
                Elem::Word(Word::ctor(CONS)),
                Elem::Ref(Reference {
                    src: RefSrc::Store(0),
                    offset: 0,
                    values_count: 2
                }),
            ]
        );
        assert_eq!(rs.s.get(0).depth, 0);

        // the requesting value compresses to the same shape
        let v = std::mem::replace(&mut inner.e[0], Value::tombstone());
        let v = path_compress_value(inner.last.as_deref(), v);
        assert_eq!(
            v.seq.iter().collect::<Vec<_>>(),
            vec![
                Elem::Word(Word::ctor(CONS)),
                Elem::Ref(Reference {
                    src: RefSrc::Store(0),
                    offset: 0,
                    values_count: 2
                }),
            ]
        );

        // P4: reference accounting against the compressed source
        let frag = inner.last.as_ref().unwrap().s.get(0);
        assert!(frag.seq.measure().degree >= 2);

        // P5: compression is idempotent
        let before = v.seq.clone();
        let again = path_compress_value(inner.last.as_deref(), v);
        assert_eq!(again.seq, before);
    }

    // P6: fetch followed by unshift restores the observable sequence.
    #[test]
    fn fetch_then_unshift_round_trips() {
        ensure_degrees();
        let mut inner = lift_state(RecordState::over(base_state()));
        let rs = inner.last.as_mut().unwrap();
        fetch_value(rs, &env_request(1)).unwrap();
        let v = std::mem::replace(&mut inner.e[0], Value::tombstone());
        let v = path_compress_value(inner.last.as_deref(), v);
        let v = unshift_value(inner.last.as_ref().unwrap(), v);
        assert_eq!(v.depth, 0);
        assert_eq!(v.seq, cons_cell());
    }

    #[test]
    fn oversized_fetch_takes_the_whole_value() {
        ensure_degrees();
        let mut inner = lift_state(RecordState::over(base_state()));
        let rs = inner.last.as_mut().unwrap();
        let fr = fetch_value(rs, &env_request(16)).unwrap();
        assert!(fr.have_prefix);
        assert!(fr.have_suffix);
        assert_eq!(fr.len, 3);
        assert!(rs.s.is_empty());
    }

    #[test]
    fn unsatisfiable_fetch_is_refused() {
        ensure_degrees();
        // Two levels up: the middle machine's value is a bare reference,
        // so it has no materialized window to give.
        let mid = lift_state(RecordState::over(base_state()));
        let mut top = lift_state(RecordState::over(mid));
        let rs = top.last.as_mut().unwrap();
        assert_eq!(fetch_value(rs, &env_request(1)), None);
        // the slot survives the refusal
        assert_eq!(rs.peek_slot(RefSrc::Env(0)).depth, 1);
    }

    #[test]
    fn unshift_all_restores_parent_depth() {
        ensure_degrees();
        let mut inner = lift_state(RecordState::over(base_state()));
        let rs = inner.last.as_mut().unwrap();
        fetch_value(rs, &env_request(1)).unwrap();
        let back = unshift_all(inner);
        assert_eq!(back.d, 0);
        assert!(back.last.is_none());
        assert_eq!(back.e[0].seq, cons_cell());
        assert_eq!(
            back.k.seq,
            Seq::singleton(Elem::Word(Word::ctor(HALT)))
        );
    }
}
