//! Measured sequences of words and references.
//!
//! All machine state apart from the program counter is a `Seq`: a persistent
//! 2-3 finger tree whose elements are either materialized [`Word`]s or
//! [`Reference`]s into the machine one recording level below. The measure
//! tracks three things at once: the net degree of the fragment (values
//! produced minus values consumed), the peak prefix degree (where the nth
//! value boundary falls), and, for fully materialized fragments, the word
//! count and composable digest.

use std::fmt;
use std::rc::Rc;

use crate::hash::SeqDigest;
use crate::store::Reference;
use crate::word::Word;

/// Length and digest of a fragment that contains no references.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Full {
    pub len: u64,
    pub digest: SeqDigest,
}

/// The measure monoid. `max_degree` ranges over all prefixes including the
/// empty one, so the identity has `max_degree == 0` and composition is
/// `max(x.max_degree, x.degree + y.max_degree)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Measure {
    pub degree: i64,
    pub max_degree: i64,
    pub full: Option<Full>,
}

impl Measure {
    pub const EMPTY: Measure = Measure {
        degree: 0,
        max_degree: 0,
        full: Some(Full {
            len: 0,
            digest: SeqDigest::IDENTITY,
        }),
    };

    pub fn combine(&self, other: &Measure) -> Measure {
        Measure {
            degree: self.degree + other.degree,
            max_degree: self.max_degree.max(self.degree + other.max_degree),
            full: match (&self.full, &other.full) {
                (Some(a), Some(b)) => Some(Full {
                    len: a.len + b.len,
                    digest: a.digest.product(&b.digest),
                }),
                _ => None,
            },
        }
    }
}

/// A sequence element. A reference stands for `values_count` logical values
/// of another machine's slot and keeps the fragment unmaterialized.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Elem {
    Word(Word),
    Ref(Reference),
}

impl Elem {
    pub fn measure(&self) -> Measure {
        match self {
            Elem::Word(w) => {
                let degree = w.degree();
                Measure {
                    degree,
                    max_degree: degree.max(0),
                    full: Some(Full {
                        len: 1,
                        digest: SeqDigest::from_word(w),
                    }),
                }
            }
            Elem::Ref(r) => {
                let count = r.values_count as i64;
                Measure {
                    degree: count,
                    max_degree: count,
                    full: None,
                }
            }
        }
    }
}

type N = Rc<Node>;

#[derive(Debug)]
enum Node {
    Leaf(Elem),
    Branch2(Measure, N, N),
    Branch3(Measure, N, N, N),
}

impl Node {
    fn measure(&self) -> Measure {
        match self {
            Node::Leaf(e) => e.measure(),
            Node::Branch2(m, ..) | Node::Branch3(m, ..) => *m,
        }
    }
}

fn branch2(a: N, b: N) -> N {
    let m = a.measure().combine(&b.measure());
    Rc::new(Node::Branch2(m, a, b))
}

fn branch3(a: N, b: N, c: N) -> N {
    let m = a.measure().combine(&b.measure()).combine(&c.measure());
    Rc::new(Node::Branch3(m, a, b, c))
}

fn node_children(n: &N) -> Vec<N> {
    match &**n {
        Node::Branch2(_, a, b) => vec![a.clone(), b.clone()],
        Node::Branch3(_, a, b, c) => vec![a.clone(), b.clone(), c.clone()],
        Node::Leaf(_) => unreachable!("leaf node below the top level"),
    }
}

#[derive(Debug, Clone)]
struct Digit(Vec<N>);

impl Digit {
    fn measure(&self) -> Measure {
        self.0
            .iter()
            .fold(Measure::EMPTY, |m, n| m.combine(&n.measure()))
    }
}

#[derive(Debug, Clone)]
enum Tree {
    Empty,
    Single(N),
    Deep(Measure, Digit, Rc<Tree>, Digit),
}

fn tree_measure(t: &Tree) -> Measure {
    match t {
        Tree::Empty => Measure::EMPTY,
        Tree::Single(n) => n.measure(),
        Tree::Deep(m, ..) => *m,
    }
}

fn deep(l: Digit, mid: Tree, r: Digit) -> Tree {
    let m = l
        .measure()
        .combine(&tree_measure(&mid))
        .combine(&r.measure());
    Tree::Deep(m, l, Rc::new(mid), r)
}

fn push_front(t: &Tree, n: N) -> Tree {
    match t {
        Tree::Empty => Tree::Single(n),
        Tree::Single(b) => deep(Digit(vec![n]), Tree::Empty, Digit(vec![b.clone()])),
        Tree::Deep(_, l, mid, r) => {
            if l.0.len() == 4 {
                let carry = branch3(l.0[1].clone(), l.0[2].clone(), l.0[3].clone());
                deep(
                    Digit(vec![n, l.0[0].clone()]),
                    push_front(mid, carry),
                    r.clone(),
                )
            } else {
                let mut v = vec![n];
                v.extend(l.0.iter().cloned());
                deep(Digit(v), (**mid).clone(), r.clone())
            }
        }
    }
}

fn push_back(t: &Tree, n: N) -> Tree {
    match t {
        Tree::Empty => Tree::Single(n),
        Tree::Single(a) => deep(Digit(vec![a.clone()]), Tree::Empty, Digit(vec![n])),
        Tree::Deep(_, l, mid, r) => {
            if r.0.len() == 4 {
                let carry = branch3(r.0[0].clone(), r.0[1].clone(), r.0[2].clone());
                deep(
                    l.clone(),
                    push_back(mid, carry),
                    Digit(vec![r.0[3].clone(), n]),
                )
            } else {
                let mut v = r.0.clone();
                v.push(n);
                deep(l.clone(), (**mid).clone(), Digit(v))
            }
        }
    }
}

fn tree_from_nodes(nodes: &[N]) -> Tree {
    nodes
        .iter()
        .fold(Tree::Empty, |t, n| push_back(&t, n.clone()))
}

fn view_left(t: &Tree) -> Option<(N, Tree)> {
    match t {
        Tree::Empty => None,
        Tree::Single(n) => Some((n.clone(), Tree::Empty)),
        Tree::Deep(_, l, mid, r) => {
            let head = l.0[0].clone();
            let rest = if l.0.len() > 1 {
                deep(Digit(l.0[1..].to_vec()), (**mid).clone(), r.clone())
            } else {
                match view_left(mid) {
                    Some((n, mid2)) => deep(Digit(node_children(&n)), mid2, r.clone()),
                    None => tree_from_nodes(&r.0),
                }
            };
            Some((head, rest))
        }
    }
}

fn view_right(t: &Tree) -> Option<(Tree, N)> {
    match t {
        Tree::Empty => None,
        Tree::Single(n) => Some((Tree::Empty, n.clone())),
        Tree::Deep(_, l, mid, r) => {
            let last = r.0[r.0.len() - 1].clone();
            let rest = if r.0.len() > 1 {
                deep(
                    l.clone(),
                    (**mid).clone(),
                    Digit(r.0[..r.0.len() - 1].to_vec()),
                )
            } else {
                match view_right(mid) {
                    Some((mid2, n)) => deep(l.clone(), mid2, Digit(node_children(&n))),
                    None => tree_from_nodes(&l.0),
                }
            };
            Some((rest, last))
        }
    }
}

/// Group 2..=12 nodes into branch nodes for the middle of a concatenation.
fn pack_nodes(mut xs: Vec<N>) -> Vec<N> {
    let mut out = Vec::new();
    loop {
        match xs.len() {
            2 => {
                let b = xs.pop().unwrap();
                let a = xs.pop().unwrap();
                out.push(branch2(a, b));
                return out;
            }
            3 => {
                let c = xs.pop().unwrap();
                let b = xs.pop().unwrap();
                let a = xs.pop().unwrap();
                out.push(branch3(a, b, c));
                return out;
            }
            4 => {
                let mut rest = xs.split_off(2);
                out.push(branch2(xs[0].clone(), xs[1].clone()));
                let b = rest.pop().unwrap();
                let a = rest.pop().unwrap();
                out.push(branch2(a, b));
                return out;
            }
            _ => {
                let rest = xs.split_off(3);
                out.push(branch3(xs[0].clone(), xs[1].clone(), xs[2].clone()));
                xs = rest;
            }
        }
    }
}

fn concat(a: &Tree, mid: &[N], b: &Tree) -> Tree {
    match (a, b) {
        (Tree::Empty, _) => mid
            .iter()
            .rev()
            .fold(b.clone(), |t, n| push_front(&t, n.clone())),
        (_, Tree::Empty) => mid.iter().fold(a.clone(), |t, n| push_back(&t, n.clone())),
        (Tree::Single(x), _) => push_front(&concat(&Tree::Empty, mid, b), x.clone()),
        (_, Tree::Single(y)) => push_back(&concat(a, mid, &Tree::Empty), y.clone()),
        (Tree::Deep(_, l1, m1, r1), Tree::Deep(_, l2, m2, r2)) => {
            let mut ns = r1.0.clone();
            ns.extend(mid.iter().cloned());
            ns.extend(l2.0.iter().cloned());
            deep(l1.clone(), concat(m1, &pack_nodes(ns), m2), r2.clone())
        }
    }
}

fn split_digit(
    pred: &dyn Fn(&Measure) -> bool,
    mut acc: Measure,
    nodes: &[N],
) -> (Vec<N>, N, Vec<N>) {
    for (i, n) in nodes.iter().enumerate() {
        let next = acc.combine(&n.measure());
        if pred(&next) {
            return (nodes[..i].to_vec(), n.clone(), nodes[i + 1..].to_vec());
        }
        acc = next;
    }
    unreachable!("split predicate never flipped within the digit")
}

fn deep_l(pre: &[N], mid: &Tree, r: &Digit) -> Tree {
    if pre.is_empty() {
        match view_left(mid) {
            Some((n, mid2)) => deep(Digit(node_children(&n)), mid2, r.clone()),
            None => tree_from_nodes(&r.0),
        }
    } else {
        deep(Digit(pre.to_vec()), mid.clone(), r.clone())
    }
}

fn deep_r(l: &Digit, mid: &Tree, suf: &[N]) -> Tree {
    if suf.is_empty() {
        match view_right(mid) {
            Some((mid2, n)) => deep(l.clone(), mid2, Digit(node_children(&n))),
            None => tree_from_nodes(&l.0),
        }
    } else {
        deep(l.clone(), mid.clone(), Digit(suf.to_vec()))
    }
}

fn split_tree(pred: &dyn Fn(&Measure) -> bool, acc: Measure, t: &Tree) -> (Tree, N, Tree) {
    match t {
        Tree::Empty => unreachable!("split on an empty tree"),
        Tree::Single(n) => (Tree::Empty, n.clone(), Tree::Empty),
        Tree::Deep(_, l, mid, r) => {
            let accl = acc.combine(&l.measure());
            if pred(&accl) {
                let (before, x, after) = split_digit(pred, acc, &l.0);
                return (tree_from_nodes(&before), x, deep_l(&after, mid, r));
            }
            let accm = accl.combine(&tree_measure(mid));
            if pred(&accm) {
                let (ml, xs, mr) = split_tree(pred, accl, mid);
                let acc_ml = accl.combine(&tree_measure(&ml));
                let (before, x, after) = split_digit(pred, acc_ml, &node_children(&xs));
                (deep_r(l, &ml, &before), x, deep_l(&after, &mr, r))
            } else {
                let (before, x, after) = split_digit(pred, accm, &r.0);
                (deep_r(l, mid, &before), x, tree_from_nodes(&after))
            }
        }
    }
}

/// Persistent measured sequence of [`Elem`]s.
#[derive(Clone)]
pub struct Seq(Tree);

impl Seq {
    pub fn empty() -> Seq {
        Seq(Tree::Empty)
    }

    pub fn singleton(e: Elem) -> Seq {
        Seq(Tree::Single(Rc::new(Node::Leaf(e))))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.0, Tree::Empty)
    }

    pub fn measure(&self) -> Measure {
        tree_measure(&self.0)
    }

    /// Prepend an element.
    pub fn cons(&self, e: Elem) -> Seq {
        Seq(push_front(&self.0, Rc::new(Node::Leaf(e))))
    }

    /// Append an element.
    pub fn snoc(&self, e: Elem) -> Seq {
        Seq(push_back(&self.0, Rc::new(Node::Leaf(e))))
    }

    pub fn append(&self, other: &Seq) -> Seq {
        Seq(concat(&self.0, &[], &other.0))
    }

    /// The leftmost element, if any, without removing it.
    pub fn first(&self) -> Option<Elem> {
        let mut n = match &self.0 {
            Tree::Empty => return None,
            Tree::Single(n) => n.clone(),
            Tree::Deep(_, l, _, _) => l.0[0].clone(),
        };
        loop {
            n = match &*n {
                Node::Leaf(e) => return Some(*e),
                Node::Branch2(_, a, _) => a.clone(),
                Node::Branch3(_, a, _, _) => a.clone(),
            };
        }
    }

    /// Pop the leftmost element.
    pub fn front(&self) -> Option<(Elem, Seq)> {
        let (n, rest) = view_left(&self.0)?;
        match &*n {
            Node::Leaf(e) => Some((*e, Seq(rest))),
            _ => unreachable!("branch node at the top level"),
        }
    }

    pub fn expect_front(&self) -> (Elem, Seq) {
        self.front().expect("front of an empty sequence")
    }

    /// Three-way split at the first element where `pred` flips from false
    /// to true over accumulated prefix measures. `None` when it never does.
    /// `pred` must be monotone and false on the empty measure.
    pub fn split3(&self, pred: impl Fn(&Measure) -> bool) -> Option<(Seq, Elem, Seq)> {
        if !pred(&self.measure()) {
            return None;
        }
        debug_assert!(!pred(&Measure::EMPTY), "split predicate true on empty");
        let (l, n, r) = split_tree(&pred, Measure::EMPTY, &self.0);
        match &*n {
            Node::Leaf(e) => Some((Seq(l), *e, Seq(r))),
            _ => unreachable!("branch node as split pivot"),
        }
    }

    /// Split off the first `n` logical values. `None` when the sequence does
    /// not contain `n` values. A reference straddling the boundary is split
    /// at the value offset, never duplicated.
    pub fn try_pop_n(&self, n: u64) -> Option<(Seq, Seq)> {
        if n == 0 {
            return Some((Seq::empty(), self.clone()));
        }
        let target = n as i64;
        let (l, pivot, r) = self.split3(|m| m.max_degree >= target)?;
        match pivot {
            Elem::Word(w) => {
                let left = l.snoc(Elem::Word(w));
                let m = left.measure();
                (m.degree == target && m.max_degree == target).then_some((left, r))
            }
            Elem::Ref(rf) => {
                let need = target - l.measure().degree;
                if need <= 0 || (rf.values_count as i64) < need {
                    return None;
                }
                let need = need as u64;
                let left = l.snoc(Elem::Ref(Reference {
                    src: rf.src,
                    offset: rf.offset,
                    values_count: need,
                }));
                let right = if rf.values_count > need {
                    r.cons(Elem::Ref(Reference {
                        src: rf.src,
                        offset: rf.offset + need,
                        values_count: rf.values_count - need,
                    }))
                } else {
                    r
                };
                Some((left, right))
            }
        }
    }

    /// `try_pop_n`, asserting that the boundary exists.
    pub fn pop_n(&self, n: u64) -> (Seq, Seq) {
        self.try_pop_n(n).unwrap_or_else(|| {
            panic!("measured degree assertion failed: no boundary at value {n}")
        })
    }

    /// The sub-range of `count` values starting `offset` values in.
    pub fn slice(&self, offset: u64, count: u64) -> Seq {
        let (_, t) = self.pop_n(offset);
        let (h, _) = t.pop_n(count);
        h
    }

    pub fn iter(&self) -> Iter {
        Iter { rest: self.clone() }
    }
}

pub struct Iter {
    rest: Seq,
}

impl Iterator for Iter {
    type Item = Elem;

    fn next(&mut self) -> Option<Elem> {
        let (e, rest) = self.rest.front()?;
        self.rest = rest;
        Some(e)
    }
}

impl FromIterator<Elem> for Seq {
    fn from_iter<I: IntoIterator<Item = Elem>>(iter: I) -> Seq {
        iter.into_iter()
            .fold(Seq::empty(), |s, e| s.snoc(e))
    }
}

impl PartialEq for Seq {
    fn eq(&self, other: &Seq) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for Seq {}

impl fmt::Debug for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
