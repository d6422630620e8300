//! In-memory transport with scripted faults.
//!
//! Frames go through the real CBOR codec so every hop exercises
//! `encode_event`/`decode_event`.

use duplex_session::wire::{decode_event, encode_event};
use duplex_session::{Limits, SessionEvent};

/// Deterministic xorshift; tests must replay exactly from a seed.
#[derive(Clone, Debug)]
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn percent(&mut self) -> u8 {
        (self.next() % 100) as u8
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

pub struct Link {
    rng: XorShift,
    drop_pct: u8,
    dup_pct: u8,
    delay_pct: u8,
    held: Vec<Vec<u8>>,
    limits: Limits,
}

impl Link {
    /// Drops, duplicates and delays (by one round) frames at the given rates.
    pub fn faulty(seed: u64, drop_pct: u8, dup_pct: u8, delay_pct: u8) -> Self {
        Self {
            rng: XorShift::new(seed),
            drop_pct,
            dup_pct,
            delay_pct,
            held: Vec::new(),
            limits: Limits::default(),
        }
    }

    /// Pushes one round of frames; returns what arrives this round, shuffled.
    pub fn transmit(&mut self, events: Vec<SessionEvent>) -> Vec<SessionEvent> {
        let mut arriving = std::mem::take(&mut self.held);
        for event in events {
            let frame = encode_event(&event).expect("encode frame");
            if self.rng.percent() < self.drop_pct {
                continue;
            }
            if self.rng.percent() < self.dup_pct {
                arriving.push(frame.clone());
            }
            if self.rng.percent() < self.delay_pct {
                self.held.push(frame);
            } else {
                arriving.push(frame);
            }
        }
        for i in (1..arriving.len()).rev() {
            let j = self.rng.below(i + 1);
            arriving.swap(i, j);
        }
        arriving
            .iter()
            .map(|frame| decode_event(frame, &self.limits).expect("decode frame"))
            .collect()
    }
}
