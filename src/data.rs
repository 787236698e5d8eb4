//! Conversions between host data and machine sequences.
//!
//! These helpers are the ABI the code generator and tests use to build
//! inputs and read results. They operate on fully materialized sequences
//! only; the machine-side primitives in `eval` are the reference-aware
//! counterparts.

use crate::error::DataError;
use crate::seq::{Elem, Seq};
use crate::word::{CTag, Word};

/// Encode an integer as a single word.
pub fn from_int(n: i64) -> Seq {
    Seq::singleton(Elem::Word(Word::int(n)))
}

/// Encode a constructor word. Its arguments, if any, follow it in sequence
/// form: `[ctor; arg0; ...]`.
pub fn from_constructor(ctag: CTag) -> Seq {
    Seq::singleton(Elem::Word(Word::ctor(ctag)))
}

/// Left-fold concatenation.
pub fn appends<I: IntoIterator<Item = Seq>>(seqs: I) -> Seq {
    seqs.into_iter()
        .fold(Seq::empty(), |acc, s| acc.append(&s))
}

/// Inverse of [`appends`] for fully materialized sequences: split at every
/// value boundary determined by constructor degrees.
pub fn splits(seq: &Seq) -> Result<Vec<Seq>, DataError> {
    let m = seq.measure();
    if m.full.is_none() {
        return Err(DataError::NotMaterialized);
    }
    if m.degree < 0 {
        return Err(DataError::Malformed);
    }
    let mut out = Vec::with_capacity(m.degree as usize);
    let mut rest = seq.clone();
    for _ in 0..m.degree {
        let (v, r) = rest.try_pop_n(1).ok_or(DataError::Malformed)?;
        out.push(v);
        rest = r;
    }
    if !rest.is_empty() {
        return Err(DataError::Malformed);
    }
    Ok(out)
}

/// Read a single-integer sequence back.
pub fn to_int(seq: &Seq) -> Result<i64, DataError> {
    match seq.front() {
        Some((Elem::Word(w), rest)) if rest.is_empty() => w
            .as_int()
            .ok_or_else(|| DataError::NotAnInt(w.to_string())),
        Some((e, _)) => Err(DataError::NotAnInt(format!("{e:?}"))),
        None => Err(DataError::NotAnInt("empty sequence".into())),
    }
}

/// Head word and tail of a materialized sequence; `None` when the sequence
/// is empty or its head is not materialized.
pub fn list_match(seq: &Seq) -> Option<(Word, Seq)> {
    match seq.front()? {
        (Elem::Word(w), rest) => Some((w, rest)),
        (Elem::Ref(_), _) => None,
    }
}
