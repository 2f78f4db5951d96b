//! Delay alignment buffer: fixed pre-allocated ring of frames that time-shifts
//! the system-output reference so it lines up with the speaker-to-mic path.
//! Always full: pre-filled with silence, every push is paired with one pop.

use super::{Frame, FRAME_MS};

/// Smallest ring depth, whatever the configured delay.
pub const MIN_CAPACITY: usize = 2;

/// Fixed-depth FIFO of frames. Pre-allocated, never grows or shrinks.
pub struct DelayBuffer {
    slots: Box<[Frame]>,
    /// Index of the oldest frame (next to be popped).
    head: usize,
}

impl DelayBuffer {
    /// Ring depth realizing `delay_ms`: `ceil(delay_ms / FRAME_MS)`, at least [`MIN_CAPACITY`].
    pub fn capacity_for(delay_ms: u32) -> usize {
        (delay_ms.div_ceil(FRAME_MS) as usize).max(MIN_CAPACITY)
    }

    /// Create a buffer for `delay_ms`. Returns `None` for a zero delay, in which
    /// case the raw reference is used directly.
    pub fn for_delay(delay_ms: u32) -> Option<Self> {
        if delay_ms == 0 {
            return None;
        }
        Some(Self::with_capacity(Self::capacity_for(delay_ms)))
    }

    /// Create a buffer of exactly `capacity` silence frames (clamped to [`MIN_CAPACITY`]).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        let slots = (0..capacity).map(|_| Frame::silence()).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
            head: 0,
        }
    }

    /// Enqueue `frame` at the tail and return the frame pushed `capacity` calls ago
    /// (silence for the first `capacity` calls).
    #[inline]
    pub fn push_and_pop(&mut self, frame: Frame) -> Frame {
        let delayed = std::mem::replace(&mut self.slots[self.head], frame);
        self.head = (self.head + 1) % self.slots.len();
        delayed
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Effective delay realized by this buffer, in milliseconds.
    pub fn delay_ms(&self) -> u32 {
        self.slots.len() as u32 * FRAME_MS
    }
}
