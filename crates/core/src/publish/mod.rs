//! Triple-buffered handoff of the latest spectrum from the producer thread
//! to a single consumer.
//!
//! Thin wrapper over the `triple_buffer` crate. The producer fills its own
//! slot and publishes it; the consumer picks up the newest published slot.
//! Neither side ever waits for the other, and a reader never sees a slot the
//! producer is still writing. Every slot carries the publish count it was
//! written under, so the consumer knows how many publishes it has seen.

use triple_buffer::{Input, Output, TripleBuffer};

#[derive(Debug, Clone)]
struct Slot<T> {
    value: T,
    sequence: u64,
}

/// Producer half of the triple buffer.
pub struct Publisher<T: Send> {
    input: Input<Slot<T>>,
    published: u64,
}

/// Consumer half of the triple buffer.
pub struct Reader<T: Send> {
    output: Output<Slot<T>>,
}

/// Creates a triple buffer whose three slots start as clones of `initial`.
pub fn triple_buffer<T: Clone + Send>(initial: T) -> (Publisher<T>, Reader<T>) {
    let (input, output) = TripleBuffer::new(&Slot {
        value: initial,
        sequence: 0,
    })
    .split();
    (
        Publisher {
            input,
            published: 0,
        },
        Reader { output },
    )
}

impl<T: Send> Publisher<T> {
    /// Producer-exclusive slot. Its contents are whatever was last written
    /// into it, not necessarily the previous publish.
    pub fn write_buf(&mut self) -> &mut T {
        &mut self.input.input_buffer_mut().value
    }

    /// Makes the filled write slot the newest readable one. Returns `true`
    /// when an earlier publish was overwritten before the reader saw it.
    pub fn publish(&mut self) -> bool {
        self.published += 1;
        self.input.input_buffer_mut().sequence = self.published;
        self.input.publish()
    }

    /// Number of publishes so far.
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl<T: Send> Reader<T> {
    /// Takes ownership of the newest published slot, if there is one.
    /// Returns `true` when the read slot changed.
    pub fn update(&mut self) -> bool {
        self.output.update()
    }

    /// Consumer-exclusive slot.
    pub fn read_buf(&self) -> &T {
        &self.output.peek_output_buffer().value
    }

    /// Number of publishes that had happened when the read slot was
    /// written. Zero means nothing has been picked up yet.
    pub fn sequence(&self) -> u64 {
        self.output.peek_output_buffer().sequence
    }
}

impl<T: Send> std::fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("published", &self.published)
            .finish()
    }
}

impl<T: Send> std::fmt::Debug for Reader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("sequence", &self.sequence())
            .finish()
    }
}
