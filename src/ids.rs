//! Time-ordered 64-bit message ids.
//!
//! Layout, most significant bit first: 39 bits of 10 ms ticks since the Unix
//! epoch, 8 bits of per-tick sequence, 16 bits of node id. Ids from one
//! generator are strictly increasing and decode back to a coarse wall-clock
//! time without any lookup.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

pub const TICK_BITS: u32 = 39;
pub const SEQUENCE_BITS: u32 = 8;
pub const NODE_BITS: u32 = 16;

/// Ticks are 10 ms.
pub const TICKS_PER_SECOND: u64 = 100;

pub const MAX_TICK: u64 = (1 << TICK_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const NODE_MASK: u64 = (1 << NODE_BITS) - 1;

const UNSET: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("message id space exhausted at tick {0}")]
    Exhausted(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    pub tick_count: u64,
    pub sequence: u64,
    pub node_id: u16,
}

impl IdParts {
    pub fn unix_seconds(&self) -> i64 {
        // tick_count < 2^39, so this never truncates
        (self.tick_count / TICKS_PER_SECOND) as i64
    }
}

pub fn decompose(id: u64) -> IdParts {
    IdParts {
        tick_count: id >> (SEQUENCE_BITS + NODE_BITS),
        sequence: (id >> NODE_BITS) & SEQUENCE_MASK,
        node_id: (id & NODE_MASK) as u16,
    }
}

pub fn system_ticks() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| (elapsed.as_millis() / 10) as u64)
        .unwrap_or(0)
}

type TickSource = Arc<dyn Fn() -> u64 + Send + Sync>;

pub struct IdGenerator {
    node_id: u16,
    /// `(tick << SEQUENCE_BITS) | sequence` of the last id handed out.
    last: AtomicU64,
    clock: TickSource,
}

impl IdGenerator {
    pub fn new(node_id: u16) -> Self {
        Self::with_clock(node_id, system_ticks)
    }

    pub fn with_clock(node_id: u16, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            node_id,
            last: AtomicU64::new(UNSET),
            clock: Arc::new(clock),
        }
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    /// Allocates the next id. Safe to call from any number of tasks at once.
    ///
    /// When more than 256 ids are requested inside one tick the sequence
    /// carries into the following tick, so ids stay unique and increasing
    /// at the cost of running slightly ahead of the clock.
    pub fn next_id(&self) -> Result<u64, IdError> {
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let now = (self.clock)();
            if now > MAX_TICK {
                return Err(IdError::Exhausted(now));
            }

            let next = if last == UNSET || now > last >> SEQUENCE_BITS {
                now << SEQUENCE_BITS
            } else {
                // same tick, or the clock stepped back
                last + 1
            };

            let tick = next >> SEQUENCE_BITS;
            if tick > MAX_TICK {
                return Err(IdError::Exhausted(tick));
            }

            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok((next << NODE_BITS) | u64::from(self.node_id)),
                Err(actual) => last = actual,
            }
        }
    }
}
