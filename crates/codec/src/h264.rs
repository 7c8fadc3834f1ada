//! H.264 encoding over FFmpeg.

use std::collections::VecDeque;
use std::sync::Mutex;

use argus_core::format::{FrameInterval, Resolution};
use ffmpeg_next::util::error::EAGAIN;
use ffmpeg_next::{
    Dictionary, codec, encoder,
    error::Error as FfmpegError,
    frame::Video as FfFrame,
    packet::{self, Packet},
    util::format::pixel::Pixel as PixelFormat,
};

use tracing::warn;

use crate::convert::I420Frame;
use crate::{EncodedPacket, EncoderError, EncoderOptions, ReceiveOutcome, VideoEncoder};

fn init_ffmpeg() -> Result<(), EncoderError> {
    ffmpeg_next::init().map_err(|e| EncoderError::Setup(e.to_string()))
}

struct EncoderState {
    encoder: encoder::video::Encoder,
    input: FfFrame,
    queued: VecDeque<EncodedPacket>,
    flushed: bool,
}

/// H.264 encoder bound to one resolution and frame rate at construction.
///
/// Wraps an FFmpeg encoder context behind a mutex so the capture worker can
/// submit while another thread polls for packets. FFmpeg pads frame rows
/// for alignment, so submitted planes are row-copied into the context's own
/// frame rather than handed over directly.
pub struct H264Encoder {
    resolution: Resolution,
    state: Mutex<EncoderState>,
}

impl H264Encoder {
    pub fn new(
        resolution: Resolution,
        interval: FrameInterval,
        options: &EncoderOptions,
    ) -> Result<Self, EncoderError> {
        init_ffmpeg()?;
        let options = options.sanitized();
        let codec = codec::encoder::find_by_name(&options.codec_name)
            .ok_or_else(|| EncoderError::CodecMissing(options.codec_name.clone()))?;

        let ctx = codec::Context::new_with_codec(codec);
        let mut video = ctx
            .encoder()
            .video()
            .map_err(|e| EncoderError::Setup(e.to_string()))?;
        video.set_width(resolution.width.get());
        video.set_height(resolution.height.get());
        video.set_format(PixelFormat::YUV420P);
        let num = interval.numerator.max(1) as i32;
        let den = interval.denominator.max(1) as i32;
        video.set_time_base((num, den));
        video.set_frame_rate(Some((den, num)));
        video.set_bit_rate(usize::try_from(options.bitrate).unwrap_or(usize::MAX));
        video.set_gop(options.gop);
        video.set_max_b_frames(options.max_b_frames);

        let mut codec_opts = Dictionary::new();
        if !options.preset.is_empty() {
            codec_opts.set("preset", &options.preset);
        }
        let opened = video.open_as_with(codec, codec_opts).map_err(|e| {
            EncoderError::Setup(format!("opening {} failed: {e}", options.codec_name))
        })?;

        Ok(Self {
            resolution,
            state: Mutex::new(EncoderState {
                encoder: opened,
                input: FfFrame::new(
                    PixelFormat::YUV420P,
                    resolution.width.get(),
                    resolution.height.get(),
                ),
                queued: VecDeque::new(),
                flushed: false,
            }),
        })
    }
}

impl VideoEncoder for H264Encoder {
    fn submit(&self, frame: &I420Frame, pts: i64) -> Result<(), EncoderError> {
        if frame.resolution() != self.resolution {
            return Err(EncoderError::Encode(format!(
                "frame is {}, encoder expects {}",
                frame.resolution(),
                self.resolution
            )));
        }
        let mut guard = self.state.lock().map_err(|_| EncoderError::Poisoned)?;
        let state = &mut *guard;
        if state.flushed {
            return Err(EncoderError::Encode("encoder already flushed".into()));
        }

        write_input_frame(&mut state.input, frame);
        state.input.set_pts(Some(pts));
        match state.encoder.send_frame(&state.input) {
            Ok(()) => {}
            Err(err) if is_again(&err) => {
                // The codec wants its output consumed before it accepts
                // more input.
                warn!(pts, "encoder full; draining before resubmit");
                drain_into(&mut state.encoder, &mut state.queued)?;
                state
                    .encoder
                    .send_frame(&state.input)
                    .map_err(|e| EncoderError::Encode(format!("send_frame failed: {e}")))?;
            }
            Err(err) => return Err(EncoderError::Encode(format!("send_frame failed: {err}"))),
        }
        drain_into(&mut state.encoder, &mut state.queued)
    }

    fn try_receive(&self) -> Result<ReceiveOutcome, EncoderError> {
        let mut guard = self.state.lock().map_err(|_| EncoderError::Poisoned)?;
        let state = &mut *guard;
        if let Some(pkt) = state.queued.pop_front() {
            return Ok(ReceiveOutcome::Packet(pkt));
        }

        let mut packet = Packet::empty();
        match state.encoder.receive_packet(&mut packet) {
            Ok(()) => Ok(ReceiveOutcome::Packet(packet_to_encoded(&packet)?)),
            Err(err) if is_again(&err) => Ok(ReceiveOutcome::Pending),
            Err(FfmpegError::Eof) => Ok(ReceiveOutcome::Finished),
            Err(err) => Err(EncoderError::Encode(format!(
                "receive_packet failed: {err}"
            ))),
        }
    }

    fn flush(&self) -> Result<(), EncoderError> {
        let mut guard = self.state.lock().map_err(|_| EncoderError::Poisoned)?;
        let state = &mut *guard;
        if state.flushed {
            return Ok(());
        }
        state.flushed = true;
        state
            .encoder
            .send_eof()
            .map_err(|e| EncoderError::Encode(format!("send_eof failed: {e}")))
    }
}

/// Row-copy tightly packed planes into the possibly padded FFmpeg frame.
fn write_input_frame(dst: &mut FfFrame, src: &I420Frame) {
    let w = src.resolution().width.get() as usize;
    let h = src.resolution().height.get() as usize;
    let planes: [(usize, &[u8], usize, usize); 3] = [
        (0, src.y(), w, h),
        (1, src.u(), w / 2, h / 2),
        (2, src.v(), w / 2, h / 2),
    ];
    for (index, data, width, rows) in planes {
        let stride = dst.stride(index);
        let dst_plane = dst.data_mut(index);
        for row in 0..rows {
            dst_plane[row * stride..row * stride + width]
                .copy_from_slice(&data[row * width..(row + 1) * width]);
        }
    }
}

fn drain_into(
    encoder: &mut encoder::video::Encoder,
    queued: &mut VecDeque<EncodedPacket>,
) -> Result<(), EncoderError> {
    loop {
        let mut packet = Packet::empty();
        match encoder.receive_packet(&mut packet) {
            Ok(()) => queued.push_back(packet_to_encoded(&packet)?),
            Err(err) if is_again(&err) => break,
            Err(FfmpegError::Eof) => break,
            Err(err) => {
                return Err(EncoderError::Encode(format!(
                    "receive_packet failed: {err}"
                )));
            }
        }
    }
    Ok(())
}

fn packet_to_encoded(packet: &Packet) -> Result<EncodedPacket, EncoderError> {
    let data = packet
        .data()
        .ok_or_else(|| EncoderError::Encode("packet missing data".into()))?
        .to_vec();
    Ok(EncodedPacket {
        pts: packet.pts().unwrap_or(0),
        keyframe: packet.flags().contains(packet::Flags::KEY),
        data,
    })
}

fn is_again(err: &FfmpegError) -> bool {
    matches!(err, FfmpegError::Other { errno } if *errno == EAGAIN)
}
