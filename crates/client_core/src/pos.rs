//! Fractional positions.
//!
//! Every ordered item carries a rational key `p / q`. The float `pos` is only a
//! comparison cache derived from the pair, so bisecting many times never
//! drifts the durable key.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::PosError;

/// Anything that sits in a position-sorted sequence.
pub trait Positioned {
    fn pos(&self) -> f64;
}

impl Positioned for f64 {
    fn pos(&self) -> f64 {
        *self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rational {
    pub p: i32,
    pub q: i32,
}

impl Rational {
    pub fn new(p: i32, q: i32) -> Result<Self, PosError> {
        if q <= 0 || p < 0 {
            return Err(PosError::InvalidKey { p, q });
        }
        Ok(Self { p, q })
    }

    pub const fn integer(n: i32) -> Self {
        Self { p: n, q: 1 }
    }

    pub fn value(&self) -> f64 {
        f64::from(self.p) / f64::from(self.q)
    }

    pub fn as_pair(&self) -> (i32, i32) {
        (self.p, self.q)
    }

    /// `(a.p + b.p) / (a.q + b.q)`, strictly between `a` and `b` when they differ.
    pub fn mediant(a: Rational, b: Rational) -> Result<Self, PosError> {
        let p = a.p.checked_add(b.p).ok_or(PosError::Overflow)?;
        let q = a.q.checked_add(b.q).ok_or(PosError::Overflow)?;
        Ok(Self { p, q })
    }
}

impl PartialEq for Rational {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Rational {}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = i64::from(self.p) * i64::from(other.q);
        let rhs = i64::from(other.p) * i64::from(self.q);
        lhs.cmp(&rhs)
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn compare_by_pos<T: Positioned + ?Sized>(a: &T, b: &T) -> Ordering {
    a.pos().total_cmp(&b.pos())
}

/// Index at which an item with `pos` belongs in `items` (sorted ascending).
///
/// On an exact match the occupying item is returned alongside its index.
pub fn binary_search_pos<T: Positioned>(items: &[T], pos: f64) -> (usize, Option<&T>) {
    match items.binary_search_by(|item| item.pos().total_cmp(&pos)) {
        Ok(index) => (index, items.get(index)),
        Err(index) => (index, None),
    }
}

pub fn is_sorted_by_pos<T: Positioned>(items: &[T]) -> bool {
    items
        .windows(2)
        .all(|pair| compare_by_pos(&pair[0], &pair[1]) == Ordering::Less)
}

/// Durable key for an item placed strictly between `lower` and `upper`.
///
/// `own` is reused when it already lies inside the interval, so a no-op move
/// keeps its key.
pub fn allocate_between(
    own: Option<Rational>,
    lower: Option<Rational>,
    upper: Option<Rational>,
) -> Result<Rational, PosError> {
    if let (Some(lower), Some(upper)) = (lower, upper) {
        if lower >= upper {
            return Err(PosError::EmptyInterval {
                lower: lower.value(),
                upper: upper.value(),
            });
        }
    }
    if let Some(own) = own {
        let above = lower.map_or(true, |lower| own > lower);
        let below = upper.map_or(true, |upper| own < upper);
        if above && below && (lower.is_some() || upper.is_some()) {
            return Ok(own);
        }
    }
    match (lower, upper) {
        (Some(lower), Some(upper)) => Rational::mediant(lower, upper),
        (Some(lower), None) => {
            let p = lower.p.checked_add(lower.q).ok_or(PosError::Overflow)?;
            Ok(Rational { p, q: lower.q })
        }
        (None, Some(upper)) => {
            if upper.p == 0 {
                return Err(PosError::NoRoomBelow);
            }
            let q = upper.q.checked_add(1).ok_or(PosError::Overflow)?;
            Ok(Rational { p: upper.p, q })
        }
        (None, None) => Err(PosError::Unbounded),
    }
}

/// Transient float position between two neighbours, for optimistic display only.
pub fn optimistic_pos_between(lower: Option<f64>, upper: Option<f64>) -> Result<f64, PosError> {
    match (lower, upper) {
        (Some(lower), Some(upper)) if lower >= upper => Err(PosError::EmptyInterval { lower, upper }),
        (Some(lower), Some(upper)) => Ok((lower + upper) / 2.0),
        (Some(lower), None) => Ok(lower + 1.0),
        (None, Some(upper)) => Ok(upper - 1.0),
        (None, None) => Err(PosError::Unbounded),
    }
}

#[cfg(test)]
#[path = "tests/pos_tests.rs"]
mod tests;
