//! Sample stores used between capture and analysis.
//!
//! [`RingBuffer`] keeps the hop history the spectrum frames are cut from.
//! [`RollingWindow`] is the bounded FIFO feeding the waveform and VU ticks.

use std::collections::VecDeque;

/// Fixed-capacity circular buffer of mono samples.
///
/// Writing past capacity overwrites the oldest samples, so the most recent
/// `capacity` samples are always available to [`RingBuffer::read_latest`].
#[derive(Debug, Clone)]
pub struct RingBuffer {
    buf: Vec<f32>,
    /// Index of the next write position.
    write_pos: usize,
    /// Number of valid samples (≤ capacity).
    len: usize,
}

impl RingBuffer {
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            buf: vec![0.0; capacity],
            write_pos: 0,
            len: 0,
        }
    }

    /// Appends `data`, overwriting the oldest samples once full.
    pub fn write(&mut self, data: &[f32]) {
        let capacity = self.buf.len();
        for &sample in data {
            self.buf[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % capacity;
        }
        self.len = (self.len + data.len()).min(capacity);
    }

    /// Copies the newest `dst.len()` samples, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `dst.len()` samples are stored. Callers check
    /// [`RingBuffer::len`] first; hitting this is a broken invariant.
    pub fn read_latest(&self, dst: &mut [f32]) {
        let n = dst.len();
        assert!(
            n <= self.len,
            "RingBuffer holds {} samples, {} requested",
            self.len,
            n
        );
        let capacity = self.buf.len();
        let start = (self.write_pos + capacity - n) % capacity;
        let (head, tail) = if start + n <= capacity {
            (&self.buf[start..start + n], &[][..])
        } else {
            (&self.buf[start..], &self.buf[..start + n - capacity])
        };
        dst[..head.len()].copy_from_slice(head);
        dst[head.len()..].copy_from_slice(tail);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the maximum number of stored samples.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Forgets every stored sample.
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.len = 0;
    }
}

/// Bounded FIFO of raw samples; the oldest samples are evicted first.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<f32>,
    cap: usize,
    /// Samples appended since the last [`RollingWindow::mark_consumed`].
    pending: usize,
}

impl RollingWindow {
    /// # Panics
    ///
    /// Panics if `cap == 0`.
    pub fn new(cap: usize) -> Self {
        assert!(cap > 0, "RollingWindow cap must be > 0");
        Self {
            samples: VecDeque::with_capacity(cap),
            cap,
            pending: 0,
        }
    }

    /// Appends `samples` and counts them as pending.
    pub fn extend<I: IntoIterator<Item = f32>>(&mut self, samples: I) {
        for sample in samples {
            if self.samples.len() == self.cap {
                self.samples.pop_front();
            }
            self.samples.push_back(sample);
            self.pending += 1;
        }
    }

    /// Copies the newest `min(n, len)` samples into `dst`, oldest first.
    pub fn copy_latest(&self, n: usize, dst: &mut Vec<f32>) {
        dst.clear();
        let n = n.min(self.samples.len());
        dst.extend(self.samples.iter().skip(self.samples.len() - n).copied());
    }

    /// Whether samples arrived since the last consumed snapshot.
    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }

    /// Clears the pending count after a snapshot.
    pub fn mark_consumed(&mut self) {
        self.pending = 0;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns `true` once `cap` samples are held.
    pub fn is_full(&self) -> bool {
        self.samples.len() == self.cap
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}
