#![doc = include_str!("../README.md")]

pub mod capture;
pub mod pipeline;
pub mod reader;
pub mod source;
pub mod tunables;

pub mod prelude {
    #[cfg(feature = "v4l2")]
    pub use crate::capture::BufferRing;
    pub use crate::capture::{CaptureError, FrameSource, RawFrame};
    pub use crate::pipeline::CapturePipeline;
    pub use crate::reader::{ChunkReader, ReadOutcome};
    pub use crate::source::{CameraByteSource, ReadCompletion, SourceError};
    pub use crate::tunables::{CameraConfig, ReaderTunables};
    pub use argus_codec::convert::{ConvertError, Converter, I420Frame};
    #[cfg(feature = "ffmpeg")]
    pub use argus_codec::h264::H264Encoder;
    pub use argus_codec::{
        EncodedPacket, EncoderError, EncoderOptions, ReceiveOutcome, VideoEncoder,
    };
    pub use argus_core::prelude::*;
}
