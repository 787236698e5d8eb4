//! Monoidal hashing of word sequences.
//!
//! Fragments of machine state are compared by a composable digest: products
//! in SL2 over the field F_p with p = 2^61 - 1. Concatenation of sequences
//! maps to matrix product, so the digest of any fragment can be assembled
//! from the digests of its pieces in any association order.

use once_cell::sync::Lazy;

use crate::word::Word;

const P: u128 = (1 << 61) - 1;

/// Generator applied for a 0 bit.
const GEN_A: [[u64; 2]; 2] = [[1, 1], [0, 1]];
/// Generator applied for a 1 bit.
const GEN_B: [[u64; 2]; 2] = [[1, 0], [1, 1]];

/// Per-byte products of the bit generators, msb first.
static BYTE_DIGESTS: Lazy<[SeqDigest; 256]> = Lazy::new(|| {
    let mut table = [SeqDigest::IDENTITY; 256];
    for (byte, slot) in table.iter_mut().enumerate() {
        let mut acc = SeqDigest::IDENTITY;
        for i in (0..8).rev() {
            let gen = if (byte >> i) & 1 == 0 { GEN_A } else { GEN_B };
            acc = acc.product(&SeqDigest(gen));
        }
        *slot = acc;
    }
    table
});

/// Associative digest of a word sequence. `IDENTITY` is the digest of the
/// empty sequence and `product` composes adjacent fragments.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SeqDigest([[u64; 2]; 2]);

fn mulmod(a: u64, b: u64) -> u128 {
    (a as u128 * b as u128) % P
}

impl SeqDigest {
    pub const IDENTITY: SeqDigest = SeqDigest([[1, 0], [0, 1]]);

    /// Digest of a single word: the generator product over its canonical
    /// 9-byte encoding (tag byte, then the payload big-endian).
    pub fn from_word(w: &Word) -> Self {
        let mut acc = BYTE_DIGESTS[u8::from(w.tag()) as usize];
        for byte in w.payload().to_be_bytes() {
            acc = acc.product(&BYTE_DIGESTS[byte as usize]);
        }
        acc
    }

    /// Digest of `self ++ other`.
    pub fn product(&self, other: &Self) -> Self {
        let x = &self.0;
        let y = &other.0;
        let mut out = [[0u64; 2]; 2];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = ((mulmod(x[i][0], y[0][j]) + mulmod(x[i][1], y[1][j])) % P) as u64;
            }
        }
        SeqDigest(out)
    }
}

impl Default for SeqDigest {
    fn default() -> Self {
        Self::IDENTITY
    }
}
