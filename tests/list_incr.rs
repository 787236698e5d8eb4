//! End-to-end scenarios over a hand-compiled `list_incr`.
//!
//! The 13-entry step table below is what the code generator would emit for
//! a CPS'd `list_incr`: match the scrutinee, push a frame per cons cell,
//! then unwind the kontinuation rebuilding the list with every element
//! incremented. It exercises both suspension points, fetch splitting,
//! reference re-basing on unwind, and memo skips across executions.

use ant::data::{appends, from_constructor, from_int};
use ant::eval::{self, Evaluator, Resolved};
use ant::record::DONE_PC;
use ant::seq::Seq;
use ant::store::Value;
use ant::table::{add_exp, set_constructor_degree};
use ant::word::Word;

const KHALT: u32 = 0;
const NIL: u32 = 1;
const CONS: u32 = 2;
const KCONS: u32 = 3;

const PC_ENTRY: usize = 0;
const PC_MATCH: usize = 1;
const PC_NIL: usize = 2;
const PC_RET: usize = 3;
const PC_CONS: usize = 4;
const PC_HEAD: usize = 5;
const PC_FRAME: usize = 6;
const PC_LOOP: usize = 7;
const PC_APPLY: usize = 8;
const PC_HALT: usize = 9;
const PC_POPF: usize = 10;
const PC_BUILD: usize = 11;
const PC_CONT: usize = 12;

fn install_list_incr() {
    set_constructor_degree(KHALT, 1).unwrap();
    set_constructor_degree(NIL, 1).unwrap();
    set_constructor_degree(CONS, -1).unwrap();
    set_constructor_degree(KCONS, -1).unwrap();

    // 0: entry
    assert_eq!(
        add_exp(|mut state, _| {
            eval::assert_env_length(&state, 1);
            state.c = PC_MATCH;
            Ok(state)
        })
        .unwrap(),
        PC_ENTRY
    );
    // 1: match the scrutinee
    assert_eq!(
        add_exp(|state, ev| match eval::match_last(state, ev)? {
            Resolved::Advanced(s) => Ok(s),
            Resolved::At(mut s, w) => {
                match w.as_ctor() {
                    Some(NIL) => s.c = PC_NIL,
                    Some(CONS) => s.c = PC_CONS,
                    _ => panic!("list_incr scrutinee is not a list: {w}"),
                }
                Ok(s)
            }
        })
        .unwrap(),
        PC_MATCH
    );
    // 2: nil arm
    assert_eq!(
        add_exp(|state, _| {
            let (s, w, children) = eval::split_last(state);
            debug_assert_eq!(w, Word::ctor(NIL));
            debug_assert!(children.is_empty());
            let d = s.d;
            let mut s = eval::push_env(s, Value::new(from_constructor(NIL), d));
            s.c = PC_RET;
            Ok(s)
        })
        .unwrap(),
        PC_NIL
    );
    // 3: return
    assert_eq!(
        add_exp(|mut state, _| {
            state.c = PC_APPLY;
            Ok(state)
        })
        .unwrap(),
        PC_RET
    );
    // 4: cons arm: bind head and tail, head on top
    assert_eq!(
        add_exp(|state, _| {
            let (s, w, children) = eval::split_last(state);
            debug_assert_eq!(w, Word::ctor(CONS));
            let mut children = children.into_iter();
            let h = children.next().expect("cons head");
            let t = children.next().expect("cons tail");
            let s = eval::push_env(s, t);
            let mut s = eval::push_env(s, h);
            s.c = PC_HEAD;
            Ok(s)
        })
        .unwrap(),
        PC_CONS
    );
    // 5: increment the head
    assert_eq!(
        add_exp(|state, ev| match eval::match_last(state, ev)? {
            Resolved::Advanced(s) => Ok(s),
            Resolved::At(s, w) => {
                let n = w.as_int().expect("list element is not an int");
                let (s, _, children) = eval::split_last(s);
                debug_assert!(children.is_empty());
                let d = s.d;
                let mut s = eval::push_env(s, Value::new(from_int(n + 1), d));
                s.c = PC_FRAME;
                Ok(s)
            }
        })
        .unwrap(),
        PC_HEAD
    );
    // 6: save the incremented head in a frame
    assert_eq!(
        add_exp(|state, _| {
            let (s, v) = eval::pop_env(state);
            let mut s = eval::push_cont(s, KCONS, vec![v]);
            s.c = PC_LOOP;
            Ok(s)
        })
        .unwrap(),
        PC_FRAME
    );
    // 7: recurse on the tail
    assert_eq!(
        add_exp(|mut state, _| {
            state.c = PC_MATCH;
            Ok(state)
        })
        .unwrap(),
        PC_LOOP
    );
    // 8: apply the kontinuation
    assert_eq!(
        add_exp(|state, ev| match eval::get_next_cont(state, ev)? {
            Resolved::Advanced(s) => Ok(s),
            Resolved::At(mut s, w) => {
                match w.as_ctor() {
                    Some(KHALT) => s.c = PC_HALT,
                    Some(KCONS) => s.c = PC_POPF,
                    _ => panic!("bad kontinuation head: {w}"),
                }
                Ok(s)
            }
        })
        .unwrap(),
        PC_APPLY
    );
    // 9: halt
    assert_eq!(
        add_exp(|state, _| {
            let mut s = eval::env_keep_last_n(state, 1);
            s.c = DONE_PC;
            Ok(s)
        })
        .unwrap(),
        PC_HALT
    );
    // 10: pop the frame, restoring the saved head
    assert_eq!(
        add_exp(|state, _| {
            let (s, w, saved) = eval::pop_cont(state);
            debug_assert_eq!(w, Word::ctor(KCONS));
            let mut s = eval::restore_env(s, saved);
            s.c = PC_BUILD;
            Ok(s)
        })
        .unwrap(),
        PC_POPF
    );
    // 11: cons the saved head onto the result
    assert_eq!(
        add_exp(|state, _| {
            let (s, n1) = eval::pop_env(state);
            let (s, r) = eval::pop_env(s);
            let v = eval::build_value(&s, CONS, vec![n1, r]);
            let mut s = eval::push_env(s, v);
            s.c = PC_CONT;
            Ok(s)
        })
        .unwrap(),
        PC_BUILD
    );
    // 12: continue unwinding
    assert_eq!(
        add_exp(|mut state, _| {
            state.c = PC_APPLY;
            Ok(state)
        })
        .unwrap(),
        PC_CONT
    );
}

fn list(items: &[i64]) -> Seq {
    items.iter().rev().fold(from_constructor(NIL), |tail, n| {
        appends([from_constructor(CONS), from_int(*n), tail])
    })
}

fn halt() -> Seq {
    from_constructor(KHALT)
}

fn run(ev: &mut Evaluator, items: &[i64]) -> Seq {
    ev.exec_cek(PC_ENTRY, vec![list(items)], halt()).unwrap()
}

// S1: list_incr on nil is nil.
#[test]
fn list_incr_nil() {
    install_list_incr();
    let mut ev = Evaluator::new(10_000);
    assert_eq!(run(&mut ev, &[]), list(&[]));
}

// S2: list_incr on [1] is [2].
#[test]
fn list_incr_singleton() {
    install_list_incr();
    let mut ev = Evaluator::new(10_000);
    assert_eq!(run(&mut ev, &[1]), list(&[2]));
}

// S3 + P7: list_incr on [1,2,3]; the second execution must observe a memo
// skip and take no more steps than the first.
#[test]
fn list_incr_memoizes_across_runs() {
    install_list_incr();
    let mut ev = Evaluator::new(10_000);

    assert_eq!(run(&mut ev, &[1, 2, 3]), list(&[2, 3, 4]));
    let first = ev.stats();
    assert_eq!(first.skips, 0);
    assert!(first.fetches > 0);

    assert_eq!(run(&mut ev, &[1, 2, 3]), list(&[2, 3, 4]));
    let second = ev.stats();
    assert!(second.skips >= 1, "second run must take a recorded path");
    assert!(second.steps <= first.steps);

    // S6: a structurally identical fresh argument hits the same entries.
    let fresh = ev.exec_cek(PC_ENTRY, vec![list(&[1, 2, 3])], halt()).unwrap();
    assert_eq!(fresh, list(&[2, 3, 4]));
    assert!(ev.stats().skips >= 1);
    assert!(ev.stats().steps <= first.steps);
}

// Memoization changes step counts, never results.
#[test]
fn memo_and_baseline_agree() {
    install_list_incr();
    let mut plain = Evaluator::without_memo(10_000);
    let mut memoized = Evaluator::new(10_000);
    for items in [&[][..], &[4][..], &[1, 2, 3][..], &[0, -5, 7, 9][..]] {
        assert_eq!(run(&mut plain, items), run(&mut memoized, items));
    }
    assert_eq!(plain.stats().skips, 0);
}

// Distinct arguments share the memoized prefix but produce their own
// results.
#[test]
fn distinct_arguments_stay_distinct() {
    install_list_incr();
    let mut ev = Evaluator::new(10_000);
    assert_eq!(run(&mut ev, &[1, 2, 3]), list(&[2, 3, 4]));
    assert_eq!(run(&mut ev, &[1, 2]), list(&[2, 3]));
    assert_eq!(run(&mut ev, &[5, 5, 5, 5]), list(&[6, 6, 6, 6]));
    assert_eq!(run(&mut ev, &[1, 2, 3]), list(&[2, 3, 4]));
}
