//! Raw frame acquisition.
//!
//! [`FrameSource`] is the seam between the capture pipeline and whatever
//! produces raw frames. The real implementation is [`BufferRing`], a
//! memory-mapped V4L2 stream; tests substitute scripted sources.

use std::time::Duration;

use thiserror::Error;

/// A filled buffer on loan from the capture source.
///
/// The borrow ties the frame to the source: the underlying buffer is
/// requeued to the driver on the next acquisition, so a frame cannot
/// outlive its slot.
pub struct RawFrame<'a> {
    pub data: &'a [u8],
    /// Driver-assigned capture sequence number.
    pub sequence: u32,
}

/// Blocking producer of raw frames.
pub trait FrameSource: Send {
    /// Wait for the next filled buffer. Failing to produce one within the
    /// source's acquire timeout is fatal for the stream.
    fn acquire(&mut self) -> Result<RawFrame<'_>, CaptureError>;
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("device rejected capture settings: {0}")]
    Negotiate(String),
    #[error("buffer ring setup failed: {0}")]
    Setup(String),
    #[error("no frame within {0:?}; device presumed wedged")]
    AcquireTimeout(Duration),
    #[error("capture failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("pipeline already stopped")]
    Stopped,
}

impl CaptureError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::Open { .. } => "device_open",
            CaptureError::Negotiate(_) => "negotiate",
            CaptureError::Setup(_) => "ring_setup",
            CaptureError::AcquireTimeout(_) => "acquire_timeout",
            CaptureError::Io(_) => "capture_io",
            CaptureError::Stopped => "stopped",
        }
    }

    /// Whether the device can still produce frames after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CaptureError::Stopped)
    }
}

#[cfg(feature = "v4l2")]
mod ring {
    use v4l::io::mmap::Stream;
    use v4l::io::traits::CaptureStream;
    use v4l::{buffer::Type, format::FourCC, prelude::*, video::Capture as _};

    use super::*;
    use crate::tunables::CameraConfig;

    /// Memory-mapped V4L2 buffer ring streaming packed YUYV.
    pub struct BufferRing {
        stream: Stream<'static>,
        timeout: Duration,
    }

    impl BufferRing {
        /// Open `config.device`, negotiate YUYV at the configured
        /// resolution and rate, and map `config.buffer_count` streaming
        /// buffers.
        pub fn open(config: &CameraConfig) -> Result<Self, CaptureError> {
            let dev = Device::with_path(&config.device).map_err(|e| CaptureError::Open {
                path: config.device.clone(),
                source: e,
            })?;

            let mut fmt = dev
                .format()
                .map_err(|e| CaptureError::Negotiate(e.to_string()))?;
            fmt.width = config.resolution.width.get();
            fmt.height = config.resolution.height.get();
            fmt.fourcc = FourCC::new(b"YUYV");
            let applied = dev
                .set_format(&fmt)
                .map_err(|e| CaptureError::Negotiate(e.to_string()))?;
            if applied.fourcc != fmt.fourcc
                || applied.width != fmt.width
                || applied.height != fmt.height
            {
                return Err(CaptureError::Negotiate(format!(
                    "asked for YUYV {}, device offered {} {}x{}",
                    config.resolution, applied.fourcc, applied.width, applied.height
                )));
            }

            let mut params = dev
                .params()
                .map_err(|e| CaptureError::Negotiate(e.to_string()))?;
            params.interval.numerator = config.interval.numerator;
            params.interval.denominator = config.interval.denominator;
            dev.set_params(&params)
                .map_err(|e| CaptureError::Negotiate(e.to_string()))?;

            let mut stream = Stream::with_buffers(&dev, Type::VideoCapture, config.buffer_count)
                .map_err(|e| CaptureError::Setup(e.to_string()))?;
            stream.set_timeout(config.acquire_timeout);

            Ok(Self {
                stream,
                timeout: config.acquire_timeout,
            })
        }
    }

    impl FrameSource for BufferRing {
        fn acquire(&mut self) -> Result<RawFrame<'_>, CaptureError> {
            match self.stream.next() {
                Ok((buf, meta)) => {
                    let used = (meta.bytesused as usize).min(buf.len());
                    Ok(RawFrame {
                        data: &buf[..used],
                        sequence: meta.sequence,
                    })
                }
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                    Err(CaptureError::AcquireTimeout(self.timeout))
                }
                Err(err) => Err(CaptureError::Io(err)),
            }
        }
    }
}

#[cfg(feature = "v4l2")]
pub use ring::BufferRing;
