use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::{Result, TelemetryError};

use super::{AudioCapture, DeviceFlow, DeviceInfo, SampleBlock, SampleSink, StreamFormat};

const DEVICE_ID: &str = "external";

/// Backend for hosts that run their own capture thread and push samples in
/// through a [`PushHandle`].
#[derive(Debug)]
pub struct PushCapture {
    format: StreamFormat,
    shared: Arc<PushShared>,
}

#[derive(Default)]
struct PushShared {
    sink: Mutex<Option<SampleSink>>,
}

impl PushShared {
    fn sink(&self) -> MutexGuard<'_, Option<SampleSink>> {
        match self.sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for PushShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushShared")
            .field(
                "attached",
                &self.sink.try_lock().ok().map(|sink| sink.is_some()),
            )
            .finish()
    }
}

/// Cloneable entry point used by the host's capture thread.
#[derive(Debug, Clone)]
pub struct PushHandle {
    shared: Arc<PushShared>,
}

impl PushCapture {
    /// Creates a backend announcing `format`, plus the handle that feeds it.
    pub fn new(format: StreamFormat) -> (Self, PushHandle) {
        let shared = Arc::new(PushShared::default());
        let handle = PushHandle {
            shared: shared.clone(),
        };
        (Self { format, shared }, handle)
    }
}

impl AudioCapture for PushCapture {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.current_device().into_iter().collect())
    }

    fn set_device(&mut self, id: &str) -> Result<bool> {
        Ok(id == DEVICE_ID)
    }

    fn current_device(&self) -> Option<DeviceInfo> {
        Some(DeviceInfo {
            id: DEVICE_ID.to_string(),
            name: "Host supplied stream".to_string(),
            flow: DeviceFlow::Capture,
        })
    }

    fn set_loopback(&mut self, _loopback: bool) {}

    fn format(&self) -> Result<StreamFormat> {
        Ok(self.format)
    }

    fn start(&mut self, sink: SampleSink) -> Result<()> {
        let mut slot = self.shared.sink();
        if slot.is_some() {
            return Err(TelemetryError::Capture("push capture already running".into()));
        }
        *slot = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        // Waits for a delivery in flight, then drops the sink.
        let sink = self.shared.sink().take();
        drop(sink);
    }

    fn is_running(&self) -> bool {
        self.shared.sink().is_some()
    }
}

impl PushHandle {
    /// Delivers `frame_count` interleaved frames of `channel_count` channels.
    ///
    /// Runs the pipeline's producer path, spectrum observer included, on the
    /// calling thread while holding the sink lock, so [`AudioCapture::stop`]
    /// waits for it. Calling `deliver_samples` again from inside that path
    /// (for example from a spectrum observer) deadlocks. Returns `false` when
    /// no pipeline is attached or the block is unusable.
    pub fn deliver_samples(
        &self,
        interleaved: &[f32],
        frame_count: usize,
        channel_count: usize,
        silent: bool,
    ) -> bool {
        if channel_count == 0 {
            tracing::warn!("dropping block without channels");
            return false;
        }
        let frames = frame_count.min(interleaved.len() / channel_count);
        if frames < frame_count {
            tracing::warn!(frame_count, frames, "block shorter than announced");
        }

        let mut slot = self.shared.sink();
        match slot.as_mut() {
            Some(sink) => {
                let block = SampleBlock::new(&interleaved[..frames * channel_count], channel_count)
                    .with_silent(silent);
                sink(&block);
                true
            }
            None => false,
        }
    }

    /// Returns `true` while a pipeline is started on this handle.
    ///
    /// Never blocks, so it is safe to call from inside a delivery. A lock
    /// held by a delivery in flight counts as attached.
    pub fn is_attached(&self) -> bool {
        match self.shared.sink.try_lock() {
            Ok(slot) => slot.is_some(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_some(),
            Err(TryLockError::WouldBlock) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn format() -> StreamFormat {
        StreamFormat {
            sample_rate: 48_000,
            channels: 2,
        }
    }

    #[test]
    fn deliveries_reach_the_sink_only_while_started() {
        let (mut capture, handle) = PushCapture::new(format());
        assert!(!handle.deliver_samples(&[0.0; 4], 2, 2, false));

        let frames = Arc::new(AtomicUsize::new(0));
        let seen = frames.clone();
        capture
            .start(Box::new(move |block: &SampleBlock<'_>| {
                seen.fetch_add(block.frames(), Ordering::SeqCst);
            }))
            .unwrap();
        assert!(handle.is_attached());
        assert!(handle.deliver_samples(&[0.0; 8], 4, 2, false));

        capture.stop();
        assert!(!handle.deliver_samples(&[0.0; 8], 4, 2, false));
        assert_eq!(frames.load(Ordering::SeqCst), 4);
        capture.stop();
    }

    #[test]
    fn attachment_can_be_queried_from_inside_a_delivery() {
        let (mut capture, handle) = PushCapture::new(format());
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let handle = handle.clone();
            let seen = seen.clone();
            capture
                .start(Box::new(move |_: &SampleBlock<'_>| {
                    seen.lock().unwrap().push(handle.is_attached());
                }))
                .unwrap();
        }

        assert!(handle.deliver_samples(&[0.0; 4], 2, 2, false));
        assert_eq!(*seen.lock().unwrap(), vec![true]);
        capture.stop();
        assert!(!handle.is_attached());
    }

    #[test]
    fn short_blocks_are_truncated_to_whole_frames() {
        let (mut capture, handle) = PushCapture::new(format());
        let frames = Arc::new(AtomicUsize::new(0));
        let seen = frames.clone();
        capture
            .start(Box::new(move |block: &SampleBlock<'_>| {
                seen.fetch_add(block.frames(), Ordering::SeqCst);
            }))
            .unwrap();

        assert!(handle.deliver_samples(&[0.0; 5], 10, 2, false));
        assert_eq!(frames.load(Ordering::SeqCst), 2);
        assert!(!handle.deliver_samples(&[0.0; 5], 1, 0, false));
    }
}
