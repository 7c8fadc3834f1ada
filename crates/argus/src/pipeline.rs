//! Background capture loop feeding the encoder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use argus_codec::convert::Converter;
use argus_codec::{ReceiveOutcome, VideoEncoder};
use argus_core::metrics::{FlowCounters, StageMetrics};
use tracing::{debug, warn};

use crate::capture::{CaptureError, FrameSource};

struct WorkerParts {
    source: Box<dyn FrameSource>,
    converter: Converter,
}

/// Owns the capture worker and the stream lifecycle.
///
/// The pipeline moves idle -> capturing -> stopped. [`start`] spawns the
/// worker, which loops acquire / convert / submit until told to stop or
/// until capture fails. [`stop`] joins the worker, flushes the encoder,
/// and drains packets nobody will read, so stopping never leaves frames
/// stuck inside the codec.
///
/// [`start`]: CapturePipeline::start
/// [`stop`]: CapturePipeline::stop
pub struct CapturePipeline {
    encoder: Arc<dyn VideoEncoder>,
    run: Arc<AtomicBool>,
    fatal: Arc<Mutex<Option<CaptureError>>>,
    counters: Arc<FlowCounters>,
    capture_metrics: StageMetrics,
    parts: Option<WorkerParts>,
    worker: Option<JoinHandle<()>>,
    stopped: bool,
}

impl CapturePipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        converter: Converter,
        encoder: Arc<dyn VideoEncoder>,
        counters: Arc<FlowCounters>,
    ) -> Self {
        Self {
            encoder,
            run: Arc::new(AtomicBool::new(false)),
            fatal: Arc::new(Mutex::new(None)),
            counters,
            capture_metrics: StageMetrics::default(),
            parts: Some(WorkerParts { source, converter }),
            worker: None,
            stopped: false,
        }
    }

    /// Spawn the capture worker. `Ok(true)` when a worker was spawned,
    /// `Ok(false)` when one is already running. Fails with
    /// [`CaptureError::Stopped`] once the pipeline has been stopped.
    pub fn start(&mut self) -> Result<bool, CaptureError> {
        if self.stopped {
            return Err(CaptureError::Stopped);
        }
        if self.worker.is_some() {
            return Ok(false);
        }
        let parts = self.parts.take().ok_or(CaptureError::Stopped)?;
        self.run.store(true, Ordering::Release);

        let encoder = Arc::clone(&self.encoder);
        let run = Arc::clone(&self.run);
        let fatal = Arc::clone(&self.fatal);
        let counters = Arc::clone(&self.counters);
        let metrics = self.capture_metrics.clone();
        let handle = thread::Builder::new()
            .name("argus-capture".into())
            .spawn(move || capture_loop(parts, encoder, run, fatal, counters, metrics))
            .map_err(|e| CaptureError::Setup(format!("worker spawn failed: {e}")))?;
        self.worker = Some(handle);
        debug!("capture worker started");
        Ok(true)
    }

    /// True while the worker is alive and has not hit a fatal error.
    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.run.load(Ordering::Acquire)
    }

    /// Set once the worker exits on an unrecoverable capture error. The
    /// stream is dead at that point; the supervisor decides what dies
    /// with it.
    pub fn fatal_error(&self) -> Option<String> {
        self.fatal
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|err| err.to_string()))
    }

    /// Per-frame latency of the acquire/convert/submit loop.
    pub fn capture_metrics(&self) -> &StageMetrics {
        &self.capture_metrics
    }

    /// Stop capturing: join the worker, flush the encoder, and drain
    /// whatever it still holds. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.run.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("capture worker panicked during shutdown");
            }
        }
        if let Err(err) = self.encoder.flush() {
            warn!(code = err.code(), error = %err, "flush on stop failed");
        }
        let mut discarded = 0usize;
        loop {
            match self.encoder.try_receive() {
                Ok(ReceiveOutcome::Packet(packet)) => discarded += packet.data.len(),
                Ok(ReceiveOutcome::Pending) | Ok(ReceiveOutcome::Finished) => break,
                Err(err) => {
                    warn!(code = err.code(), error = %err, "drain on stop failed");
                    break;
                }
            }
        }
        debug!(discarded_bytes = discarded, "capture pipeline stopped");
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    mut parts: WorkerParts,
    encoder: Arc<dyn VideoEncoder>,
    run: Arc<AtomicBool>,
    fatal: Arc<Mutex<Option<CaptureError>>>,
    counters: Arc<FlowCounters>,
    metrics: StageMetrics,
) {
    let mut pts: i64 = 0;
    while run.load(Ordering::Acquire) {
        let started = Instant::now();
        let raw = match parts.source.acquire() {
            Ok(raw) => raw,
            Err(err) => {
                warn!(code = err.code(), error = %err, "capture failed; worker exiting");
                if let Ok(mut slot) = fatal.lock() {
                    *slot = Some(err);
                }
                run.store(false, Ordering::Release);
                // No more frames are coming; flush so a reader polling
                // for packets reaches end-of-stream instead of waiting
                // on an encoder that will never fill.
                if let Err(err) = encoder.flush() {
                    warn!(code = err.code(), error = %err, "flush after capture failure failed");
                }
                break;
            }
        };
        match parts.converter.convert(raw.data) {
            Ok(frame) => {
                if let Err(err) = encoder.submit(frame, pts) {
                    counters.frame_rejected();
                    warn!(code = err.code(), pts, error = %err, "encoder rejected frame");
                } else {
                    counters.frame_captured();
                    pts += 1;
                }
            }
            Err(err) => {
                // Short buffers happen when a driver glitches; skip the
                // frame rather than kill the stream.
                counters.frame_rejected();
                warn!(sequence = raw.sequence, error = %err, "dropping malformed frame");
            }
        }
        metrics.record(started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    use argus_codec::EncoderError;
    use argus_core::format::{PixelLayout, Resolution};

    use super::*;
    use crate::capture::RawFrame;

    struct StaticSource {
        frame: Vec<u8>,
        sequence: u32,
    }

    impl StaticSource {
        fn gray(res: Resolution) -> Self {
            Self {
                frame: vec![0x80; PixelLayout::Yuyv422.frame_bytes(res)],
                sequence: 0,
            }
        }
    }

    impl FrameSource for StaticSource {
        fn acquire(&mut self) -> Result<RawFrame<'_>, CaptureError> {
            self.sequence += 1;
            // Pace the loop so tests do not spin a core flat out.
            thread::sleep(Duration::from_micros(200));
            Ok(RawFrame {
                data: &self.frame,
                sequence: self.sequence,
            })
        }
    }

    struct WedgedSource;

    impl FrameSource for WedgedSource {
        fn acquire(&mut self) -> Result<RawFrame<'_>, CaptureError> {
            Err(CaptureError::AcquireTimeout(Duration::from_secs(2)))
        }
    }

    #[derive(Default)]
    struct CollectingEncoder {
        submitted: AtomicU64,
        flushed: AtomicBool,
    }

    impl VideoEncoder for CollectingEncoder {
        fn submit(&self, _frame: &argus_codec::convert::I420Frame, _pts: i64) -> Result<(), EncoderError> {
            self.submitted.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn try_receive(&self) -> Result<ReceiveOutcome, EncoderError> {
            if self.flushed.load(Ordering::Relaxed) {
                Ok(ReceiveOutcome::Finished)
            } else {
                Ok(ReceiveOutcome::Pending)
            }
        }

        fn flush(&self) -> Result<(), EncoderError> {
            self.flushed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn pipeline_with(
        source: Box<dyn FrameSource>,
        encoder: Arc<CollectingEncoder>,
    ) -> CapturePipeline {
        let res = Resolution::new(4, 2).unwrap();
        CapturePipeline::new(
            source,
            Converter::new(res).unwrap(),
            encoder,
            Arc::new(FlowCounters::default()),
        )
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        done()
    }

    #[test]
    fn start_is_idempotent_while_running() {
        let res = Resolution::new(4, 2).unwrap();
        let encoder = Arc::new(CollectingEncoder::default());
        let mut pipeline = pipeline_with(Box::new(StaticSource::gray(res)), Arc::clone(&encoder));

        assert!(pipeline.start().unwrap());
        assert!(!pipeline.start().unwrap());
        assert!(pipeline.is_running());
        pipeline.stop();
    }

    #[test]
    fn worker_feeds_frames_to_the_encoder() {
        let res = Resolution::new(4, 2).unwrap();
        let encoder = Arc::new(CollectingEncoder::default());
        let mut pipeline = pipeline_with(Box::new(StaticSource::gray(res)), Arc::clone(&encoder));

        pipeline.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            encoder.submitted.load(Ordering::Relaxed) >= 3
        }));
        pipeline.stop();
        assert!(encoder.flushed.load(Ordering::Relaxed));
    }

    #[test]
    fn stop_twice_is_a_no_op_and_restart_is_refused() {
        let res = Resolution::new(4, 2).unwrap();
        let encoder = Arc::new(CollectingEncoder::default());
        let mut pipeline = pipeline_with(Box::new(StaticSource::gray(res)), Arc::clone(&encoder));

        pipeline.start().unwrap();
        pipeline.stop();
        pipeline.stop();
        assert!(!pipeline.is_running());
        assert!(matches!(pipeline.start(), Err(CaptureError::Stopped)));
    }

    #[test]
    fn acquire_timeout_lands_in_the_fatal_slot() {
        let encoder = Arc::new(CollectingEncoder::default());
        let mut pipeline = pipeline_with(Box::new(WedgedSource), Arc::clone(&encoder));

        pipeline.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            pipeline.fatal_error().is_some()
        }));
        assert!(!pipeline.is_running());
        let reason = pipeline.fatal_error().unwrap();
        assert!(reason.contains("presumed wedged"), "unexpected: {reason}");
        assert_eq!(encoder.submitted.load(Ordering::Relaxed), 0);
        pipeline.stop();
    }

    #[test]
    fn worker_flushes_the_encoder_when_capture_dies() {
        let encoder = Arc::new(CollectingEncoder::default());
        let mut pipeline = pipeline_with(Box::new(WedgedSource), Arc::clone(&encoder));

        pipeline.start().unwrap();
        // The worker must flush on its way out, before anyone calls
        // stop, so readers already polling see end-of-stream.
        assert!(wait_until(Duration::from_secs(2), || {
            encoder.flushed.load(Ordering::Relaxed)
        }));
        assert!(pipeline.fatal_error().is_some());
        assert!(matches!(
            encoder.try_receive().unwrap(),
            ReceiveOutcome::Finished
        ));
        pipeline.stop();
    }
}
