#![doc = include_str!("../README.md")]

pub mod format;
pub mod metrics;
pub mod timing;

pub mod prelude {
    pub use crate::{
        format::{FrameInterval, PixelLayout, Resolution},
        metrics::{FlowCounters, FlowSnapshot, StageMetrics},
        timing::{MediaTimestamp, TimingState},
    };
}
