#![doc = include_str!("../README.md")]

pub mod convert;
#[cfg(feature = "ffmpeg")]
pub mod h264;

use thiserror::Error;

use crate::convert::I420Frame;

/// One compressed access unit as produced by an encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPacket {
    /// Presentation timestamp in frame ticks, as stamped on the submitted
    /// frame.
    pub pts: i64,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

/// Result of polling an encoder for output.
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// A complete packet. Packets come out in presentation order.
    Packet(EncodedPacket),
    /// Nothing ready yet; the encoder is still buffering. Poll again after
    /// more frames go in (or after a short wait).
    Pending,
    /// The encoder was flushed and has emitted everything it will ever
    /// emit.
    Finished,
}

/// A stateful video encoder.
///
/// Input and output are decoupled: an encoder is free to hold on to several
/// frames before the first packet appears, and to emit more than one packet
/// per submitted frame near the end of a stream. Implementations are shared
/// between the capture worker (submitting) and the reader (receiving), so
/// every method takes `&self`.
pub trait VideoEncoder: Send + Sync {
    /// Hand one planar frame to the encoder. `pts` is in frame ticks and
    /// must increase between calls.
    fn submit(&self, frame: &I420Frame, pts: i64) -> Result<(), EncoderError>;

    /// Non-blocking poll for the next compressed packet.
    fn try_receive(&self) -> Result<ReceiveOutcome, EncoderError>;

    /// Signal end of stream. After this, `submit` fails and `try_receive`
    /// drains the remaining packets before reporting
    /// [`ReceiveOutcome::Finished`]. Calling it again is a no-op.
    fn flush(&self) -> Result<(), EncoderError>;
}

/// Encoder settings. `Default` matches a low-bitrate live camera stream.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EncoderOptions {
    /// FFmpeg encoder name, e.g. `libx264` or `h264_v4l2m2m`.
    pub codec_name: String,
    /// Target bitrate in bits per second.
    pub bitrate: u64,
    /// Keyframe interval in frames.
    pub gop: u32,
    pub max_b_frames: usize,
    /// Speed/quality preset passed through to the codec. Empty disables it.
    pub preset: String,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            codec_name: "libx264".into(),
            bitrate: 400_000,
            gop: 10,
            max_b_frames: 1,
            preset: "veryfast".into(),
        }
    }
}

impl EncoderOptions {
    /// Clamp out-of-range settings instead of failing at open time.
    pub fn sanitized(&self) -> Self {
        let mut opts = self.clone();
        if opts.codec_name.is_empty() {
            opts.codec_name = "libx264".into();
        }
        opts.bitrate = opts.bitrate.clamp(10_000, 400_000_000);
        opts.gop = opts.gop.max(1);
        opts
    }
}

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("encoder {0} not available")]
    CodecMissing(String),
    #[error("encoder setup failed: {0}")]
    Setup(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("encoder state poisoned by a panicking thread")]
    Poisoned,
}

impl EncoderError {
    /// Stable identifier for logs and user-facing messages.
    pub fn code(&self) -> &'static str {
        match self {
            EncoderError::CodecMissing(_) => "codec_missing",
            EncoderError::Setup(_) => "encoder_setup",
            EncoderError::Encode(_) => "encode",
            EncoderError::Poisoned => "encoder_poisoned",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_describe_a_live_camera_stream() {
        let opts = EncoderOptions::default();
        assert_eq!(opts.codec_name, "libx264");
        assert_eq!(opts.bitrate, 400_000);
        assert_eq!(opts.gop, 10);
        assert_eq!(opts.max_b_frames, 1);
    }

    #[test]
    fn sanitized_clamps_degenerate_settings() {
        let opts = EncoderOptions {
            codec_name: String::new(),
            bitrate: 0,
            gop: 0,
            ..EncoderOptions::default()
        };
        let opts = opts.sanitized();
        assert_eq!(opts.codec_name, "libx264");
        assert_eq!(opts.bitrate, 10_000);
        assert_eq!(opts.gop, 1);
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(EncoderError::CodecMissing("x".into()).code(), "codec_missing");
        assert_eq!(EncoderError::Poisoned.code(), "encoder_poisoned");
    }
}
