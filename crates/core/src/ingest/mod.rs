use crate::{audio::SampleBlock, buffer::RingBuffer};

/// History kept in the ring buffer, in multiples of the frame size.
const HISTORY_FRAMES: usize = 4;

/// Cuts the mono stream (channel 0) into hops and overlapping frames.
///
/// Partial hops survive between calls, so the frame sequence does not depend
/// on how the capture side happens to chunk its deliveries.
#[derive(Debug)]
pub struct SampleIngest {
    hop: Vec<f32>,
    hop_fill: usize,
    ring: RingBuffer,
    frame: Vec<f32>,
}

impl SampleIngest {
    /// # Panics
    ///
    /// Panics if `hop_size` or `fft_size` is zero.
    pub fn new(fft_size: usize, hop_size: usize) -> Self {
        assert!(hop_size > 0, "SampleIngest requires a non-zero hop size");
        assert!(fft_size > 0, "SampleIngest requires a non-zero fft size");
        Self {
            hop: vec![0.0; hop_size],
            hop_fill: 0,
            ring: RingBuffer::new(fft_size * HISTORY_FRAMES),
            frame: vec![0.0; fft_size],
        }
    }

    /// Returns the length of every emitted frame.
    pub fn fft_size(&self) -> usize {
        self.frame.len()
    }

    /// Returns the samples between emitted frames.
    pub fn hop_size(&self) -> usize {
        self.hop.len()
    }

    /// Feeds one capture block. `on_frame` runs once per committed hop as
    /// soon as a full frame of history is available, with the newest
    /// `fft_size` samples.
    pub fn push_block<F>(&mut self, block: &SampleBlock<'_>, on_frame: F)
    where
        F: FnMut(&[f32]),
    {
        if block.silent {
            self.push_mono(std::iter::repeat(0.0).take(block.frames()), on_frame);
        } else {
            self.push_mono(block.channel(0), on_frame);
        }
    }

    /// Same as [`SampleIngest::push_block`] for an already extracted mono
    /// stream.
    pub fn push_mono<I, F>(&mut self, samples: I, mut on_frame: F)
    where
        I: IntoIterator<Item = f32>,
        F: FnMut(&[f32]),
    {
        for sample in samples {
            self.hop[self.hop_fill] = sample;
            self.hop_fill += 1;
            if self.hop_fill < self.hop.len() {
                continue;
            }

            self.hop_fill = 0;
            self.ring.write(&self.hop);
            if self.ring.len() >= self.frame.len() {
                self.ring.read_latest(&mut self.frame);
                on_frame(&self.frame);
            }
        }
    }

    /// Samples waiting for the current hop to complete.
    pub fn pending(&self) -> usize {
        self.hop_fill
    }

    /// Returns the samples committed to the history ring.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(from: usize, to: usize) -> Vec<f32> {
        (from..to).map(|v| v as f32).collect()
    }

    #[test]
    fn no_frame_before_enough_history() {
        let mut ingest = SampleIngest::new(8, 4);
        let mut frames = 0;
        ingest.push_mono(ramp(0, 7), |_| frames += 1);
        assert_eq!(frames, 0);
        assert_eq!(ingest.buffered(), 4);
        assert_eq!(ingest.pending(), 3);
    }

    #[test]
    fn frames_overlap_by_fft_minus_hop() {
        let mut ingest = SampleIngest::new(8, 4);
        let mut frames = Vec::new();
        ingest.push_mono(ramp(0, 16), |frame| frames.push(frame.to_vec()));

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], ramp(0, 8));
        assert_eq!(frames[1], ramp(4, 12));
        assert_eq!(frames[2], ramp(8, 16));
    }

    #[test]
    fn chunking_does_not_change_frames() {
        let samples = ramp(0, 100);

        let mut whole = SampleIngest::new(16, 6);
        let mut expected = Vec::new();
        whole.push_mono(samples.iter().copied(), |f| expected.push(f.to_vec()));

        let mut split = SampleIngest::new(16, 6);
        let mut actual = Vec::new();
        for chunk in samples.chunks(7) {
            split.push_mono(chunk.iter().copied(), |f| actual.push(f.to_vec()));
        }

        assert_eq!(expected, actual);
        // 16 full hops, the first frame completes on the third.
        assert_eq!(actual.len(), 14);
    }

    #[test]
    fn hop_larger_than_frame_skips_samples() {
        let mut ingest = SampleIngest::new(4, 6);
        let mut frames = Vec::new();
        ingest.push_mono(ramp(0, 12), |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![ramp(2, 6), ramp(8, 12)]);
    }

    #[test]
    fn uses_channel_zero_of_interleaved_blocks() {
        let mut ingest = SampleIngest::new(4, 4);
        let interleaved = [1.0, -1.0, 2.0, -2.0, 3.0, -3.0, 4.0, -4.0];
        let block = SampleBlock::new(&interleaved, 2);
        let mut frames = Vec::new();
        ingest.push_block(&block, |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![vec![1.0, 2.0, 3.0, 4.0]]);
    }

    #[test]
    fn silent_blocks_become_zeros() {
        let mut ingest = SampleIngest::new(4, 2);
        let interleaved = [0.7_f32; 8];
        let block = SampleBlock::new(&interleaved, 2).with_silent(true);
        let mut frames = Vec::new();
        ingest.push_block(&block, |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![vec![0.0; 4]]);
    }
}
