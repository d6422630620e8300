//! Session sequence numbers.
//!
//! `Seq0` counts from zero and is used for cumulative acknowledgements and
//! the "last delivered" watermark. `Seq1` is never zero and names a concrete
//! payload-carrying event.

use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seq0(u64);

impl Seq0 {
    pub const ZERO: Seq0 = Seq0(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Seq1 {
        let next = self
            .0
            .checked_add(1)
            .expect("seq0 overflow computing next seq1");
        Seq1(NonZeroU64::new(next).expect("seq1 cannot be zero"))
    }

    /// True when `seq` is covered by this cumulative watermark.
    pub fn covers(self, seq: Seq1) -> bool {
        seq.get() <= self.0
    }
}

impl fmt::Debug for Seq0 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq0({})", self.0)
    }
}

impl fmt::Display for Seq0 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Seq0> for u64 {
    fn from(value: Seq0) -> u64 {
        value.0
    }
}

impl From<Seq1> for Seq0 {
    fn from(value: Seq1) -> Seq0 {
        Seq0(value.get())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seq1(NonZeroU64);

impl Seq1 {
    pub const ONE: Seq1 = Seq1(NonZeroU64::MIN);

    pub fn new(value: NonZeroU64) -> Self {
        Self(value)
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    pub fn next(self) -> Seq1 {
        let next = self
            .0
            .get()
            .checked_add(1)
            .expect("seq1 overflow computing next");
        Seq1(NonZeroU64::new(next).expect("seq1 cannot be zero"))
    }

    pub fn prev_seq0(self) -> Seq0 {
        Seq0(self.0.get() - 1)
    }
}

impl fmt::Debug for Seq1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq1({})", self.0)
    }
}

impl fmt::Display for Seq1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Seq1> for u64 {
    fn from(value: Seq1) -> u64 {
        value.0.get()
    }
}
