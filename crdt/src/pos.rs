//! Fractional position identifiers for CRDT sequences, adapted from
//! the teacher crate's `fraction.rs`/`pos_identifier.rs`: a position is
//! a byte string ordered lexicographically, and a fresh position
//! between any two existing ones can always be minted by appending a
//! mid byte, so inserts never require renumbering neighbors.

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Position(SmallVec<[u8; 8]>);

impl Position {
    /// The position before every other position.
    pub fn head() -> Self {
        Self(smallvec![])
    }

    /// A fresh position strictly between `lo` and `hi`. `hi == None`
    /// means "end of sequence". Breaks ties between two inserts at the
    /// same gap using `tie_breaker` (typically the inserting actor's
    /// id bytes) so concurrent inserts never collide.
    pub fn between(lo: &Position, hi: Option<&Position>, tie_breaker: &[u8]) -> Self {
        let mut out = lo.0.clone();
        // Append a mid byte strictly between the next differing byte
        // of lo/hi, falling back to splitting the open interval above
        // lo when hi is absent or exhausted.
        let lo_next = *lo.0.get(out.len()).unwrap_or(&0);
        let hi_next = hi.and_then(|h| h.0.get(out.len()).copied());
        let mid = match hi_next {
            Some(hi_next) if hi_next > lo_next + 1 => lo_next + (hi_next - lo_next) / 2,
            Some(hi_next) if hi_next > lo_next => {
                out.push(lo_next);
                return Self::append_tiebreak(out, tie_breaker);
            }
            _ => {
                if lo_next == u8::MAX {
                    out.push(lo_next);
                    out.push(128);
                    return Self::append_tiebreak(out, tie_breaker);
                }
                lo_next + 1
            }
        };
        out.push(mid);
        Self::append_tiebreak(out, tie_breaker)
    }

    fn append_tiebreak(mut out: SmallVec<[u8; 8]>, tie_breaker: &[u8]) -> Self {
        if let Some(&b) = tie_breaker.first() {
            out.push(b);
        }
        Self(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn between_head_and_none_is_orderable() {
        let head = Position::head();
        let a = Position::between(&head, None, &[1]);
        let b = Position::between(&a, None, &[1]);
        assert!(head < a);
        assert!(a < b);
    }

    #[test]
    fn concurrent_inserts_at_same_gap_stay_distinct() {
        let head = Position::head();
        let tail = Position::between(&head, None, &[1]);
        let a = Position::between(&head, Some(&tail), &[1]);
        let b = Position::between(&head, Some(&tail), &[2]);
        assert_ne!(a, b);
        assert!(head < a && a < tail || head < b && b < tail);
    }
}
