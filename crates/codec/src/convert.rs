//! Packed YUYV 4:2:2 to planar I420 conversion.
//!
//! Capture devices hand out packed 4:2:2; the H.264 encoder wants planar
//! 4:2:0. The converter owns its destination frame and reuses it across
//! calls, so steady-state conversion performs no allocation.

use argus_core::format::{PixelLayout, Resolution};
use thiserror::Error;

/// A planar 4:2:0 frame with tightly packed planes: full-resolution Y
/// followed by half-resolution U and V.
#[derive(Clone, Debug)]
pub struct I420Frame {
    resolution: Resolution,
    data: Vec<u8>,
}

impl I420Frame {
    /// An all-zero frame at `res`. Fails on odd dimensions, which 4:2:0
    /// cannot represent.
    pub fn new(res: Resolution) -> Result<Self, ConvertError> {
        if !res.is_even() {
            return Err(ConvertError::OddResolution(res));
        }
        Ok(Self {
            resolution: res,
            data: vec![0; PixelLayout::I420.frame_bytes(res)],
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn luma_len(&self) -> usize {
        self.resolution.pixels() as usize
    }

    fn chroma_len(&self) -> usize {
        self.luma_len() / 4
    }

    /// Full-resolution luma plane, stride equals width.
    pub fn y(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    /// Half-resolution U plane, stride equals width / 2.
    pub fn u(&self) -> &[u8] {
        let y = self.luma_len();
        &self.data[y..y + self.chroma_len()]
    }

    /// Half-resolution V plane, stride equals width / 2.
    pub fn v(&self) -> &[u8] {
        let y = self.luma_len();
        let c = self.chroma_len();
        &self.data[y + c..y + 2 * c]
    }

    fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let c = self.chroma_len();
        let y = self.luma_len();
        let (luma, chroma) = self.data.split_at_mut(y);
        let (u, v) = chroma.split_at_mut(c);
        (luma, u, v)
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("resolution {0} has an odd dimension; 4:2:0 needs even width and height")]
    OddResolution(Resolution),
    #[error("YUYV frame truncated: got {got} bytes, need {need}")]
    Truncated { got: usize, need: usize },
}

/// YUYV 4:2:2 to I420 converter bound to one resolution.
///
/// # Example
/// ```rust
/// use argus_codec::convert::Converter;
/// use argus_core::format::Resolution;
///
/// let res = Resolution::new(4, 2).unwrap();
/// let mut converter = Converter::new(res).unwrap();
/// let yuyv = vec![0x80; 4 * 2 * 2];
/// let frame = converter.convert(&yuyv).unwrap();
/// assert_eq!(frame.y().len(), 8);
/// assert_eq!(frame.u().len(), 2);
/// ```
pub struct Converter {
    scratch: I420Frame,
    src_bytes: usize,
}

impl Converter {
    pub fn new(res: Resolution) -> Result<Self, ConvertError> {
        Ok(Self {
            scratch: I420Frame::new(res)?,
            src_bytes: PixelLayout::Yuyv422.frame_bytes(res),
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.scratch.resolution()
    }

    /// Convert one packed frame. The returned reference borrows the
    /// converter's internal frame and is overwritten by the next call.
    ///
    /// Chroma is averaged vertically across each two-row pair, since 4:2:2
    /// carries chroma per row and 4:2:0 per row pair.
    pub fn convert(&mut self, yuyv: &[u8]) -> Result<&I420Frame, ConvertError> {
        if yuyv.len() < self.src_bytes {
            return Err(ConvertError::Truncated {
                got: yuyv.len(),
                need: self.src_bytes,
            });
        }

        let res = self.scratch.resolution();
        let w = res.width.get() as usize;
        let h = res.height.get() as usize;
        let src_stride = w * 2;
        let (y_plane, u_plane, v_plane) = self.scratch.planes_mut();

        for row in 0..h {
            let src = &yuyv[row * src_stride..(row + 1) * src_stride];
            let dst = &mut y_plane[row * w..(row + 1) * w];
            for (pair, quad) in dst.chunks_exact_mut(2).zip(src.chunks_exact(4)) {
                pair[0] = quad[0];
                pair[1] = quad[2];
            }
        }

        let cw = w / 2;
        for crow in 0..h / 2 {
            let top = &yuyv[(2 * crow) * src_stride..(2 * crow + 1) * src_stride];
            let bottom = &yuyv[(2 * crow + 1) * src_stride..(2 * crow + 2) * src_stride];
            let u_row = &mut u_plane[crow * cw..(crow + 1) * cw];
            let v_row = &mut v_plane[crow * cw..(crow + 1) * cw];
            for cx in 0..cw {
                let t = &top[cx * 4..cx * 4 + 4];
                let b = &bottom[cx * 4..cx * 4 + 4];
                u_row[cx] = ((t[1] as u16 + b[1] as u16 + 1) / 2) as u8;
                v_row[cx] = ((t[3] as u16 + b[3] as u16 + 1) / 2) as u8;
            }
        }

        Ok(&self.scratch)
    }
}
