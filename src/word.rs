use anyhow::anyhow;
#[cfg(not(target_arch = "wasm32"))]
use proptest_derive::Arbitrary;
use std::{convert::TryFrom, fmt};

use crate::table;

/// Identifier of a registered constructor. Degrees are registered per tag
/// through [`table::set_constructor_degree`], in ascending tag order.
pub type CTag = u32;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(not(target_arch = "wasm32"), derive(Arbitrary))]
#[repr(u8)]
pub enum WordTag {
    Int = 0,
    Ctor = 1,
}

impl From<WordTag> for u8 {
    fn from(val: WordTag) -> Self {
        val as u8
    }
}

impl TryFrom<u8> for WordTag {
    type Error = anyhow::Error;

    fn try_from(x: u8) -> Result<Self, <WordTag as TryFrom<u8>>::Error> {
        match x {
            f if f == WordTag::Int as u8 => Ok(WordTag::Int),
            f if f == WordTag::Ctor as u8 => Ok(WordTag::Ctor),
            f => Err(anyhow!("Invalid WordTag value: {}", f)),
        }
    }
}

impl fmt::Display for WordTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WordTag::Int => write!(f, "int#"),
            WordTag::Ctor => write!(f, "ctor#"),
        }
    }
}

/// A tagged machine word: an integer or a constructor. All machine state
/// apart from the program counter is a sequence of words and references.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Word(pub WordTag, pub i64);

impl Word {
    pub const fn int(n: i64) -> Self {
        Word(WordTag::Int, n)
    }

    pub const fn ctor(tag: CTag) -> Self {
        Word(WordTag::Ctor, tag as i64)
    }

    pub const fn tag(&self) -> WordTag {
        self.0
    }

    pub const fn payload(&self) -> i64 {
        self.1
    }

    pub fn as_int(&self) -> Option<i64> {
        matches!(self.0, WordTag::Int).then_some(self.1)
    }

    pub fn as_ctor(&self) -> Option<CTag> {
        matches!(self.0, WordTag::Ctor).then_some(self.1 as CTag)
    }

    /// Net contribution of this word to the stack-depth meter: +1 for an
    /// integer, `1 - arity` for a constructor.
    pub fn degree(&self) -> i64 {
        match self.0 {
            WordTag::Int => 1,
            WordTag::Ctor => table::constructor_degree(self.1 as CTag),
        }
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.0, self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_tag_round_trip() {
        for tag in [WordTag::Int, WordTag::Ctor] {
            assert_eq!(tag, WordTag::try_from(u8::from(tag)).unwrap());
        }
        assert!(WordTag::try_from(2).is_err());
    }

    #[test]
    fn word_accessors() {
        let n = Word::int(-7);
        assert_eq!(n.as_int(), Some(-7));
        assert_eq!(n.as_ctor(), None);
        let c = Word::ctor(3);
        assert_eq!(c.as_ctor(), Some(3));
        assert_eq!(c.as_int(), None);
        assert_eq!(format!("{c}"), "ctor#3");
    }
}
