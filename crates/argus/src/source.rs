//! Pull-based byte-stream facade over the whole pipeline.

use std::sync::Arc;

use argus_codec::convert::Converter;
use argus_codec::{EncoderError, VideoEncoder};
use argus_core::format::FrameInterval;
use argus_core::metrics::{FlowCounters, FlowSnapshot};
use argus_core::timing::MediaTimestamp;
use thiserror::Error;
use tracing::debug;

use crate::capture::{CaptureError, FrameSource};
use crate::pipeline::CapturePipeline;
use crate::reader::ChunkReader;
#[cfg(all(feature = "v4l2", feature = "ffmpeg"))]
use crate::tunables::CameraConfig;
use crate::tunables::ReaderTunables;

/// One serviced read request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadCompletion {
    pub bytes: usize,
    /// Complete packets accounted to this delivery.
    pub frames: u32,
    pub timestamp: MediaTimestamp,
    pub duration_us: u64,
    pub end_of_stream: bool,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("capture worker died: {0}")]
    WorkerFailed(String),
}

/// A camera exposed as a chunked H.264 byte stream.
///
/// Consumers drive it like a framed source: arm a request with
/// [`request_next_frame`], then call [`service`] with the destination
/// buffer. At most one request is outstanding at a time; re-arming while
/// armed is a no-op. The capture worker spins up lazily on the first
/// request and [`stop`] tears the whole stream down.
///
/// [`request_next_frame`]: CameraByteSource::request_next_frame
/// [`service`]: CameraByteSource::service
/// [`stop`]: CameraByteSource::stop
pub struct CameraByteSource {
    pipeline: CapturePipeline,
    reader: ChunkReader,
    counters: Arc<FlowCounters>,
    pending: bool,
}

impl CameraByteSource {
    /// Open the configured device and wire capture, conversion, and
    /// encoding together. The worker does not start until the first
    /// request.
    #[cfg(all(feature = "v4l2", feature = "ffmpeg"))]
    pub fn open(config: &CameraConfig) -> Result<Self, SourceError> {
        let config = config.sanitized();
        let ring = crate::capture::BufferRing::open(&config)?;
        let converter = Converter::new(config.resolution)
            .map_err(|e| CaptureError::Negotiate(e.to_string()))?;
        let encoder = argus_codec::h264::H264Encoder::new(
            config.resolution,
            config.interval,
            &config.encoder,
        )?;
        debug!(device = %config.device, resolution = %config.resolution, "camera byte source opened");
        Ok(Self::from_parts(
            Box::new(ring),
            converter,
            Arc::new(encoder),
            config.interval,
            config.reader,
        ))
    }

    /// Assemble a source from already-built stages. Lets tests and other
    /// deployments substitute their own capture or encoder backends.
    pub fn from_parts(
        source: Box<dyn FrameSource>,
        converter: Converter,
        encoder: Arc<dyn VideoEncoder>,
        interval: FrameInterval,
        reader: ReaderTunables,
    ) -> Self {
        let counters = Arc::new(FlowCounters::default());
        let pipeline = CapturePipeline::new(
            source,
            converter,
            Arc::clone(&encoder),
            Arc::clone(&counters),
        );
        let reader = ChunkReader::new(encoder, interval, reader, Arc::clone(&counters));
        Self {
            pipeline,
            reader,
            counters,
            pending: false,
        }
    }

    /// Arm the next read, starting the capture worker on first use.
    /// Returns `false` when a request is already outstanding. Fails with
    /// [`CaptureError::Stopped`] once the source has been stopped.
    pub fn request_next_frame(&mut self) -> Result<bool, CaptureError> {
        self.pipeline.start()?;
        if self.pending {
            return Ok(false);
        }
        self.pending = true;
        Ok(true)
    }

    /// Serve the outstanding request into `dst`. `Ok(None)` when nothing
    /// was requested. A dead capture worker surfaces here as
    /// [`SourceError::WorkerFailed`].
    pub fn service(&mut self, dst: &mut [u8]) -> Result<Option<ReadCompletion>, SourceError> {
        if !self.pending {
            return Ok(None);
        }
        if let Some(reason) = self.pipeline.fatal_error() {
            self.pending = false;
            return Err(SourceError::WorkerFailed(reason));
        }
        let outcome = self.reader.read(dst)?;
        self.pending = false;
        Ok(Some(ReadCompletion {
            bytes: outcome.bytes,
            frames: outcome.frames,
            timestamp: outcome.timestamp,
            duration_us: outcome.duration_us,
            end_of_stream: outcome.end_of_stream,
        }))
    }

    /// Stop capturing, flush and drain the encoder, and drop buffered
    /// bytes along with the presentation anchor. Idempotent; further
    /// requests fail with [`CaptureError::Stopped`].
    pub fn stop(&mut self) {
        self.pipeline.stop();
        self.reader.reset();
        self.pending = false;
        debug!("camera byte source stopped");
    }

    pub fn is_capturing(&self) -> bool {
        self.pipeline.is_running()
    }

    /// Why the capture worker died, if it did.
    pub fn fatal_error(&self) -> Option<String> {
        self.pipeline.fatal_error()
    }

    pub fn counters(&self) -> FlowSnapshot {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, mpsc};
    use std::thread;
    use std::time::{Duration, Instant};

    use argus_codec::convert::I420Frame;
    use argus_codec::{EncodedPacket, ReceiveOutcome};
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

    /// Holds the worker for a while, then fails like a wedged device.
    struct DyingSource {
        delay: Duration,
    }

    impl FrameSource for DyingSource {
        fn acquire(&mut self) -> Result<RawFrame<'_>, CaptureError> {
            thread::sleep(self.delay);
            Err(CaptureError::AcquireTimeout(Duration::from_secs(2)))
        }
    }

    struct ScriptedEncoder {
        script: Mutex<VecDeque<ReceiveOutcome>>,
        flushed: AtomicBool,
    }

    impl ScriptedEncoder {
        fn with_packets(sizes: &[usize]) -> Arc<Self> {
            let script = sizes
                .iter()
                .enumerate()
                .map(|(i, len)| {
                    ReceiveOutcome::Packet(EncodedPacket {
                        pts: i as i64,
                        keyframe: i == 0,
                        data: vec![i as u8; *len],
                    })
                })
                .collect();
            Arc::new(Self {
                script: Mutex::new(script),
                flushed: AtomicBool::new(false),
            })
        }
    }

    impl VideoEncoder for ScriptedEncoder {
        fn submit(&self, _frame: &I420Frame, _pts: i64) -> Result<(), EncoderError> {
            Ok(())
        }

        fn try_receive(&self) -> Result<ReceiveOutcome, EncoderError> {
            match self.script.lock().unwrap().pop_front() {
                Some(outcome) => Ok(outcome),
                None if self.flushed.load(Ordering::Relaxed) => Ok(ReceiveOutcome::Finished),
                None => Ok(ReceiveOutcome::Pending),
            }
        }

        fn flush(&self) -> Result<(), EncoderError> {
            self.flushed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn source_with(
        capture: Box<dyn FrameSource>,
        encoder: Arc<ScriptedEncoder>,
    ) -> CameraByteSource {
        let res = Resolution::new(4, 2).unwrap();
        let tunables = ReaderTunables {
            poll_interval: Duration::from_micros(50),
            poll_budget: Some(10),
            ..ReaderTunables::default()
        };
        CameraByteSource::from_parts(
            capture,
            Converter::new(res).unwrap(),
            encoder,
            FrameInterval::from_fps(30),
            tunables,
        )
    }

    #[test]
    fn one_request_outstanding_at_a_time() {
        let res = Resolution::new(4, 2).unwrap();
        let encoder = ScriptedEncoder::with_packets(&[256]);
        let mut source = source_with(Box::new(StaticSource::gray(res)), encoder);

        assert!(source.request_next_frame().unwrap());
        assert!(!source.request_next_frame().unwrap());

        let mut dst = [0u8; 1024];
        let done = source.service(&mut dst).unwrap().unwrap();
        assert_eq!(done.bytes, 256);
        assert_eq!(done.frames, 1);
        assert!(!done.end_of_stream);

        // Serviced; the source can be armed again.
        assert!(source.request_next_frame().unwrap());
        source.stop();
    }

    #[test]
    fn service_without_a_request_yields_nothing() {
        let res = Resolution::new(4, 2).unwrap();
        let encoder = ScriptedEncoder::with_packets(&[]);
        let mut source = source_with(Box::new(StaticSource::gray(res)), encoder);

        assert!(source.service(&mut [0u8; 64]).unwrap().is_none());
        source.stop();
    }

    #[test]
    fn stop_flushes_and_refuses_further_requests() {
        let res = Resolution::new(4, 2).unwrap();
        let encoder = ScriptedEncoder::with_packets(&[128]);
        let mut source = source_with(Box::new(StaticSource::gray(res)), Arc::clone(&encoder));

        source.request_next_frame().unwrap();
        source.service(&mut [0u8; 1024]).unwrap();
        source.stop();
        source.stop();

        assert!(encoder.flushed.load(Ordering::Relaxed));
        assert!(!source.is_capturing());
        assert!(matches!(
            source.request_next_frame(),
            Err(CaptureError::Stopped)
        ));
    }

    #[test]
    fn dead_worker_surfaces_on_service() {
        let encoder = ScriptedEncoder::with_packets(&[]);
        let mut source = source_with(Box::new(WedgedSource), encoder);

        source.request_next_frame().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while source.fatal_error().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(source.fatal_error().is_some());

        match source.service(&mut [0u8; 1024]) {
            Err(SourceError::WorkerFailed(reason)) => {
                assert!(reason.contains("presumed wedged"), "unexpected: {reason}");
            }
            other => panic!("expected WorkerFailed, got {other:?}"),
        }
        source.stop();
    }

    #[test]
    fn in_flight_read_unblocks_when_capture_dies() {
        let res = Resolution::new(4, 2).unwrap();
        let encoder = ScriptedEncoder::with_packets(&[]);
        // Unbounded polling, as a caller with no budget of its own
        // would configure it.
        let tunables = ReaderTunables {
            poll_interval: Duration::from_micros(50),
            poll_budget: None,
            ..ReaderTunables::default()
        };
        let mut source = CameraByteSource::from_parts(
            Box::new(DyingSource {
                delay: Duration::from_millis(100),
            }),
            Converter::new(res).unwrap(),
            encoder,
            FrameInterval::from_fps(30),
            tunables,
        );
        source.request_next_frame().unwrap();

        // The read is already polling when the worker dies; the dying
        // worker's flush must end it rather than leave it spinning.
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let outcome = source.service(&mut [0u8; 4096]);
            let _ = tx.send(());
            (source, outcome)
        });
        rx.recv_timeout(Duration::from_secs(3))
            .expect("read kept polling after the capture worker died");
        let (mut source, outcome) = handle.join().unwrap();

        let done = outcome.unwrap().expect("request was armed");
        assert!(done.end_of_stream);
        assert_eq!(done.bytes, 0);
        assert!(source.fatal_error().is_some());
        source.stop();
    }

    #[test]
    fn counters_track_delivered_packets() {
        let res = Resolution::new(4, 2).unwrap();
        let encoder = ScriptedEncoder::with_packets(&[100, 100]);
        let mut source = source_with(Box::new(StaticSource::gray(res)), encoder);

        source.request_next_frame().unwrap();
        source.service(&mut [0u8; 4096]).unwrap();
        assert_eq!(source.counters().packets_delivered, 2);
        source.stop();
    }
}
