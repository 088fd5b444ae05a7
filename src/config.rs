// Copyright (c) 2025, The tinyvc2 contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at https://opensource.org/license/bsd-2-clause

use crate::error::{Error, Result};
use crate::quant::{Q_CEIL, MAX_DWT_LEVELS};

/// Planar YUV input formats accepted by the encoder.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PixelFormat {
  Yuv420p,
  Yuv422p,
  Yuv444p,
  Yuv420p10,
  Yuv422p10,
  Yuv444p10,
  Yuv420p12,
  Yuv422p12,
  Yuv444p12,
}

impl PixelFormat {
  pub fn bit_depth(self) -> u32 {
    match self {
      PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p => 8,
      PixelFormat::Yuv420p10 | PixelFormat::Yuv422p10 | PixelFormat::Yuv444p10 => 10,
      PixelFormat::Yuv420p12 | PixelFormat::Yuv422p12 | PixelFormat::Yuv444p12 => 12,
    }
  }

  /// Bytes per stored sample: 8-bit is one byte, 10/12-bit are 16-bit words.
  pub fn bytes_per_sample(self) -> usize {
    if self.bit_depth() == 8 { 1 } else { 2 }
  }

  pub fn chroma_x_shift(self) -> usize {
    match self {
      PixelFormat::Yuv444p | PixelFormat::Yuv444p10 | PixelFormat::Yuv444p12 => 0,
      _ => 1,
    }
  }

  pub fn chroma_y_shift(self) -> usize {
    match self {
      PixelFormat::Yuv420p | PixelFormat::Yuv420p10 | PixelFormat::Yuv420p12 => 1,
      _ => 0,
    }
  }

  /// Mid-level bias subtracted from every sample so coefficients centre on
  /// zero: 128, 512 or 2048.
  pub fn diff_offset(self) -> i32 {
    1 << (self.bit_depth() - 1)
  }
}

/// The wavelet families this encoder can produce. The discriminants are the
/// transmitted wavelet index values.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WaveletType {
  /// Deslauriers-Dubuc (9,7)
  Dd9_7 = 0,
  /// LeGall (5,3)
  LeGall5_3 = 1,
  /// Haar without shift
  Haar = 3,
  /// Haar with one shift per level
  HaarShift = 4,
}

impl WaveletType {
  /// The index transmitted in transform_parameters (and used to pick the
  /// default quantisation matrix).
  pub fn index(self) -> usize {
    self as usize
  }
}

/// Quantisation matrix presets.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum QuantMatrix {
  /// Default from the standard
  Default,
  /// Prevents low bitrate discoloration
  Color,
  /// Optimised for PSNR
  Flat,
}

/// Encoder options. `new` fills in the defaults; the field meanings and
/// ranges follow the option table of the original encoder.
#[derive(Clone, Debug)]
pub struct EncoderConfig {
  /// Frame width in luma samples.
  pub width: usize,
  /// Frame height in luma samples (the full frame, even when interlaced).
  pub height: usize,
  pub pix_fmt: PixelFormat,
  /// Seconds per frame, as a rational.
  pub time_base_num: u32,
  pub time_base_den: u32,
  /// Target bits per second.
  pub bit_rate: u64,
  /// Max undershoot in percent.
  pub tolerance: f64,
  /// Slice size in luma samples.
  pub slice_width: usize,
  pub slice_height: usize,
  pub wavelet: WaveletType,
  /// Transform depth.
  pub wavelet_depth: usize,
  pub qm: QuantMatrix,
  /// Slices per fragment. None encodes whole pictures without fragments.
  pub fragment_size: Option<usize>,
  /// Fixed quantiser; disables rate control.
  pub const_quant: Option<u8>,
  pub interlaced: bool,
  /// Full-range signal levels (only distinguished for 8-bit input).
  pub full_range: bool,
  /// Worker threads for the data-parallel stages. 0 picks the machine width.
  pub threads: usize,
}

impl EncoderConfig {
  pub fn new(width: usize, height: usize, pix_fmt: PixelFormat) -> Self {
    Self {
      width: width,
      height: height,
      pix_fmt: pix_fmt,
      time_base_num: 1,
      time_base_den: 25,
      bit_rate: 600_000_000,
      tolerance: 5.0,
      slice_width: 32,
      slice_height: 16,
      wavelet: WaveletType::HaarShift,
      wavelet_depth: 4,
      qm: QuantMatrix::Default,
      fragment_size: None,
      const_quant: None,
      interlaced: false,
      full_range: false,
      threads: 0,
    }
  }

  /// Range and combination checks that don't need the padded geometry.
  /// The grid-dependent checks (fragment size divisibility) live with the
  /// encoder setup.
  pub fn validate(&self) -> Result<()> {
    if self.width == 0 || self.height == 0 {
      return Err(Error::ConfigInvalid("picture size must be non-zero".into()));
    }
    if self.time_base_num == 0 || self.time_base_den == 0 {
      return Err(Error::ConfigInvalid("time base must be non-zero".into()));
    }
    if self.bit_rate == 0 {
      return Err(Error::ConfigInvalid("bit rate must be non-zero".into()));
    }
    if !(0.0..=45.0).contains(&self.tolerance) {
      return Err(Error::ConfigInvalid(format!(
        "tolerance {} outside [0, 45]", self.tolerance
      )));
    }
    if !(1..=MAX_DWT_LEVELS).contains(&self.wavelet_depth) {
      return Err(Error::ConfigInvalid(format!(
        "wavelet depth {} outside [1, 5]", self.wavelet_depth
      )));
    }
    if !(32..=1024).contains(&self.slice_width) || !(8..=1024).contains(&self.slice_height) {
      return Err(Error::ConfigInvalid(format!(
        "slice size {}x{} outside 32..1024 x 8..1024",
        self.slice_width, self.slice_height
      )));
    }
    if self.slice_width > self.width || self.slice_height > self.height {
      return Err(Error::ConfigInvalid("slice size is bigger than the image".into()));
    }

    // Every slice has to cover at least one luma coefficient in every
    // sub-band, which bounds the slice size from below by the transform
    // alignment. Subsampled chroma rectangles are allowed to come out empty
    // at the deepest levels; the proportional split gives the decoder the
    // same empty rectangles.
    let min_side = 1 << self.wavelet_depth;
    if self.slice_width < min_side || self.slice_height < min_side {
      return Err(Error::ConfigInvalid(format!(
        "slice size {}x{} too small for a depth-{} transform (minimum {}x{})",
        self.slice_width, self.slice_height, self.wavelet_depth, min_side, min_side
      )));
    }

    if let Some(q) = self.const_quant {
      if q as usize >= Q_CEIL {
        return Err(Error::ConfigInvalid(format!(
          "constant quantiser ({}) outside valid range [0..{}]", q, Q_CEIL - 1
        )));
      }
    }
    if self.fragment_size == Some(0) {
      return Err(Error::ConfigInvalid("fragment size must be at least 1".into()));
    }
    if self.fragment_size.is_some() && self.interlaced {
      return Err(Error::ConfigInvalid(
        "fragmented output requires a progressive source".into(),
      ));
    }
    if self.interlaced && self.height % 2 != 0 {
      return Err(Error::ConfigInvalid("interlaced height must be even".into()));
    }

    Ok(())
  }
}

/// One entry of the base video format table. A source that matches an entry
/// exactly can be signalled by index alone; everything else drops to
/// non-strict mode and spells the parameters out in override blocks.
pub struct BaseVideoFormat {
  pub pix_fmt: PixelFormat,
  pub time_base: (u32, u32),
  pub width: usize,
  pub height: usize,
  pub interlaced: bool,
  pub level: u32,
  pub name: &'static str,
}

pub const BASE_VIDEO_FMTS: [BaseVideoFormat; 23] = [
  // Entry zero is the custom format, here just to make indexing equal to
  // the transmitted base video format index
  bvf(PixelFormat::Yuv420p, (0, 1), 0, 0, false, 0, "custom"),
  bvf(PixelFormat::Yuv420p, (1001, 15000), 176, 120, false, 1, "QSIF525"),
  bvf(PixelFormat::Yuv420p, (2, 25), 176, 144, false, 1, "QCIF"),
  bvf(PixelFormat::Yuv420p, (1001, 15000), 352, 240, false, 1, "SIF525"),
  bvf(PixelFormat::Yuv420p, (2, 25), 352, 288, false, 1, "CIF"),
  bvf(PixelFormat::Yuv420p, (1001, 15000), 704, 480, false, 1, "4SIF525"),
  bvf(PixelFormat::Yuv420p, (2, 25), 704, 576, false, 1, "4CIF"),
  bvf(PixelFormat::Yuv422p10, (1001, 30000), 720, 480, true, 2, "SD480I-60"),
  bvf(PixelFormat::Yuv422p10, (1, 25), 720, 576, true, 2, "SD576I-50"),
  bvf(PixelFormat::Yuv422p10, (1001, 60000), 1280, 720, false, 3, "HD720P-60"),
  bvf(PixelFormat::Yuv422p10, (1, 50), 1280, 720, false, 3, "HD720P-50"),
  bvf(PixelFormat::Yuv422p10, (1001, 30000), 1920, 1080, true, 3, "HD1080I-60"),
  bvf(PixelFormat::Yuv422p10, (1, 25), 1920, 1080, true, 3, "HD1080I-50"),
  bvf(PixelFormat::Yuv422p10, (1001, 60000), 1920, 1080, false, 3, "HD1080P-60"),
  bvf(PixelFormat::Yuv422p10, (1, 50), 1920, 1080, false, 3, "HD1080P-50"),
  bvf(PixelFormat::Yuv444p12, (1, 24), 2048, 1080, false, 4, "DC2K"),
  bvf(PixelFormat::Yuv444p12, (1, 24), 4096, 2160, false, 5, "DC4K"),
  bvf(PixelFormat::Yuv422p10, (1001, 60000), 3840, 2160, false, 6, "UHDTV 4K-60"),
  bvf(PixelFormat::Yuv422p10, (1, 50), 3840, 2160, false, 6, "UHDTV 4K-50"),
  bvf(PixelFormat::Yuv422p10, (1001, 60000), 7680, 4320, false, 7, "UHDTV 8K-60"),
  bvf(PixelFormat::Yuv422p10, (1, 50), 7680, 4320, false, 7, "UHDTV 8K-50"),
  bvf(PixelFormat::Yuv422p10, (1001, 24000), 1920, 1080, false, 3, "HD1080P-24"),
  bvf(PixelFormat::Yuv422p10, (1001, 30000), 720, 486, true, 2, "SD Pro486"),
];

const fn bvf(
  pix_fmt: PixelFormat,
  time_base: (u32, u32),
  width: usize,
  height: usize,
  interlaced: bool,
  level: u32,
  name: &'static str,
) -> BaseVideoFormat {
  BaseVideoFormat {
    pix_fmt: pix_fmt,
    time_base: time_base,
    width: width,
    height: height,
    interlaced: interlaced,
    level: level,
    name: name,
  }
}

/// Look up the base video format matching this configuration exactly.
pub fn find_base_video_format(cfg: &EncoderConfig) -> Option<usize> {
  for (i, fmt) in BASE_VIDEO_FMTS.iter().enumerate().skip(1) {
    if cfg.pix_fmt != fmt.pix_fmt {
      continue;
    }
    if (cfg.time_base_num, cfg.time_base_den) != fmt.time_base {
      continue;
    }
    if cfg.width != fmt.width || cfg.height != fmt.height {
      continue;
    }
    if cfg.interlaced != fmt.interlaced {
      continue;
    }
    return Some(i);
  }
  return None;
}
