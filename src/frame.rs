use crate::config::PixelFormat;

/// A borrowed view of a band of planar input rows.
///
/// `pos_y` and `height` are in luma rows; the chroma planes are understood to
/// carry the correspondingly subsampled rows. For whole-picture encoding the
/// band covers the full frame with `pos_y == 0`. 10/12-bit planes hold
/// 16-bit host-order words, `linesize` is always in bytes.
#[derive(Clone, Copy)]
pub struct FrameBand<'a> {
  pub planes: [&'a [u8]; 3],
  pub linesize: [usize; 3],
  pub pos_y: usize,
  pub height: usize,
}

/// One owned plane of samples.
pub struct Plane {
  pub width: usize,
  pub height: usize,
  /// Row stride in samples (equal to width; rows are contiguous).
  pub stride: usize,
  pub data: Box<[u8]>,
}

impl Plane {
  fn new(width: usize, height: usize, bytes_per_sample: usize) -> Self {
    Self {
      width: width,
      height: height,
      stride: width,
      data: vec![0u8; width * height * bytes_per_sample].into_boxed_slice(),
    }
  }
}

/// An owned planar picture, as produced by the y4m reader.
pub struct Frame {
  pub pix_fmt: PixelFormat,
  pub width: usize,
  pub height: usize,
  planes: [Plane; 3],
}

impl Frame {
  pub fn new(pix_fmt: PixelFormat, width: usize, height: usize) -> Self {
    let bps = pix_fmt.bytes_per_sample();
    let uv_width = width >> pix_fmt.chroma_x_shift();
    let uv_height = height >> pix_fmt.chroma_y_shift();

    Self {
      pix_fmt: pix_fmt,
      width: width,
      height: height,
      planes: [
        Plane::new(width, height, bps),
        Plane::new(uv_width, uv_height, bps),
        Plane::new(uv_width, uv_height, bps),
      ],
    }
  }

  pub fn plane(&self, idx: usize) -> &Plane {
    &self.planes[idx]
  }

  pub fn plane_mut(&mut self, idx: usize) -> &mut Plane {
    &mut self.planes[idx]
  }

  /// View the whole frame as a single band.
  pub fn as_band(&self) -> FrameBand<'_> {
    self.band(0, self.height)
  }

  /// View `rows` luma rows starting at `pos_y` as a band, for feeding the
  /// fragmented encoder piecewise.
  pub fn band(&self, pos_y: usize, rows: usize) -> FrameBand<'_> {
    assert!(pos_y + rows <= self.height);
    let bps = self.pix_fmt.bytes_per_sample();
    let cys = self.pix_fmt.chroma_y_shift();

    let mut planes = [&self.planes[0].data[..]; 3];
    let mut linesize = [0usize; 3];
    for i in 0..3 {
      let p = &self.planes[i];
      let shift = if i > 0 { cys } else { 0 };
      linesize[i] = p.stride * bps;
      planes[i] = &p.data[(pos_y >> shift) * linesize[i]..];
    }

    FrameBand {
      planes: planes,
      linesize: linesize,
      pos_y: pos_y,
      height: rows,
    }
  }
}
