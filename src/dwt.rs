// Copyright (c) 2025, The tinyvc2 contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at https://opensource.org/license/bsd-2-clause

//! Forward discrete wavelet transforms.
//!
//! The transform runs in place on the interleaved coefficient buffer: after
//! one level, low-pass values sit at even rows/columns and high-pass values
//! at odd ones, so the next level is the same code run with doubled strides
//! over the embedded quarter-size plane.
//!
//! A picture can be transformed piecewise as its rows arrive. Each level
//! keeps a `Progress` record of how far its horizontal pass and its two
//! vertical lifting stages have run, and every call advances each stage as
//! far as the available input rows permit. Feeding the plane in any row-wise
//! split produces bit-identical output to a single whole-plane call.

use bytemuck::allocation::zeroed_slice_box;
use bytemuck::Zeroable;

use crate::config::WaveletType;
use crate::quant::MAX_DWT_LEVELS;

pub type DwtCoef = i32;

/// Per-level filtering state, all counters in that level's row coordinates
/// (a level over a 2w x 2h area counts rows 0..2h).
#[derive(Clone, Copy, Default, Debug, Zeroable)]
pub struct Progress {
  /// Rows that have been horizontally lifted.
  pub hfilter: usize,
  /// Rows the vertical update stage has passed (even; final value 2h).
  pub vfilter_stage1: usize,
  /// Rows the vertical predict stage has passed (even; final value 2h).
  pub vfilter_stage2: usize,
}

/// Incremental forward transform state for one plane.
pub struct Transform {
  wavelet: WaveletType,
  depth: usize,
  progress: [Progress; MAX_DWT_LEVELS],
}

impl Transform {
  pub fn new(wavelet: WaveletType, depth: usize) -> Self {
    assert!(0 < depth && depth <= MAX_DWT_LEVELS);
    Self {
      wavelet: wavelet,
      depth: depth,
      progress: [Progress::default(); MAX_DWT_LEVELS],
    }
  }

  /// Forget all filtering progress. Must be called between pictures.
  pub fn reset(&mut self) {
    self.progress = [Progress::default(); MAX_DWT_LEVELS];
  }

  pub fn progress(&self, pass: usize) -> &Progress {
    &self.progress[pass]
  }

  /// Advance the transform given that rows `0..y_avail` of the plane now
  /// hold final input samples. `width` and `height` are the padded plane
  /// dimensions, `stride` the buffer row stride; both must be multiples of
  /// `1 << depth`. Passing `y_avail == height` finishes the plane.
  pub fn push_rows(
    &mut self,
    buf: &mut [DwtCoef],
    stride: usize,
    width: usize,
    height: usize,
    y_avail: usize,
  ) {
    let mut avail = y_avail.min(height);

    for pass in 0..self.depth {
      let sw = width >> pass;
      let sh = height >> pass;
      if pass > 0 {
        // The low-pass rows finished by the previous level are this
        // level's input rows
        avail = self.progress[pass - 1].vfilter_stage1 / 2;
      }
      advance_level(
        self.wavelet,
        buf,
        stride << pass,
        1 << pass,
        sw,
        sh,
        avail.min(sh),
        &mut self.progress[pass],
      );
    }
  }
}

fn advance_level(
  wavelet: WaveletType,
  buf: &mut [DwtCoef],
  stride: usize,
  hstride: usize,
  sw: usize,
  sh: usize,
  avail: usize,
  prog: &mut Progress,
) {
  match wavelet {
    WaveletType::Haar | WaveletType::HaarShift => {
      let shift = (wavelet == WaveletType::HaarShift) as u32;
      while prog.hfilter < avail {
        let base = prog.hfilter * stride;
        haar_horiz(&mut buf[base..=base + (sw - 1) * hstride], sw, hstride, shift);
        prog.hfilter += 1;
      }
      // A vertical pair needs nothing but its own two rows
      while prog.vfilter_stage1 + 2 <= prog.hfilter {
        haar_vert_pair(buf, prog.vfilter_stage1, stride, hstride, sw);
        prog.vfilter_stage1 += 2;
        prog.vfilter_stage2 = prog.vfilter_stage1;
      }
    }
    WaveletType::Dd9_7 | WaveletType::LeGall5_3 => {
      let legall = wavelet == WaveletType::LeGall5_3;
      // Rows of horizontal output a vertical predict needs beyond its own
      // row, and how far the update trails the predict. The update trail
      // keeps updated even rows out of reach of every future predict tap.
      let (ahead, lag) = if legall { (2, 2) } else { (4, 4) };

      while prog.hfilter < avail {
        let base = prog.hfilter * stride;
        let row = &mut buf[base..=base + (sw - 1) * hstride];
        if legall {
          legall_horiz(row, sw, hstride);
        } else {
          dd97_horiz(row, sw, hstride);
        }
        prog.hfilter += 1;
      }

      while prog.vfilter_stage2 < sh {
        let j = prog.vfilter_stage2 + 1;
        if j + ahead > prog.hfilter && prog.hfilter != sh {
          break;
        }
        if legall {
          legall_vert_predict(buf, j, stride, hstride, sw, sh);
        } else {
          dd97_vert_predict(buf, j, stride, hstride, sw, sh);
        }
        prog.vfilter_stage2 += 2;
      }

      while prog.vfilter_stage1 < sh {
        let u = prog.vfilter_stage1;
        if u + lag > prog.vfilter_stage2 && prog.vfilter_stage2 != sh {
          break;
        }
        vert_update(buf, u, stride, hstride, sw);
        prog.vfilter_stage1 += 2;
      }
    }
  }
}

// Tap row selection shared by the predict stages: out-of-range taps
// replicate the nearest available low-pass neighbour, matching the edge
// expressions of the reference filters.
#[inline]
fn predict_taps(j: usize, n: usize) -> (usize, usize, usize) {
  let tm3 = if j >= 3 { j - 3 } else { j - 1 };
  let tp1 = if j + 1 < n { j + 1 } else { j - 1 };
  let tp3 = if j + 3 < n {
    j + 3
  } else if j + 1 < n {
    j + 1
  } else {
    j - 1
  };
  return (tm3, tp1, tp3);
}

/// Deslauriers-Dubuc (9,7) horizontal pass over one row, including the one
/// bit of extra precision shifted in per level.
fn dd97_horiz(row: &mut [DwtCoef], sw: usize, hstride: usize) {
  for x in 0..sw {
    row[x * hstride] <<= 1;
  }
  let mut x = 1;
  while x < sw {
    let (tm3, tp1, tp3) = predict_taps(x, sw);
    let v = 9 * (row[(x - 1) * hstride] + row[tp1 * hstride])
      - row[tm3 * hstride]
      - row[tp3 * hstride];
    row[x * hstride] -= (v + 8) >> 4;
    x += 2;
  }
  let mut x = 0;
  while x < sw {
    let um1 = if x >= 1 { x - 1 } else { 1 };
    row[x * hstride] += (row[um1 * hstride] + row[(x + 1) * hstride] + 2) >> 2;
    x += 2;
  }
}

/// LeGall (5,3) horizontal pass over one row.
fn legall_horiz(row: &mut [DwtCoef], sw: usize, hstride: usize) {
  for x in 0..sw {
    row[x * hstride] <<= 1;
  }
  let mut x = 1;
  while x < sw {
    let tp1 = if x + 1 < sw { x + 1 } else { x - 1 };
    row[x * hstride] -= (row[(x - 1) * hstride] + row[tp1 * hstride] + 1) >> 1;
    x += 2;
  }
  let mut x = 0;
  while x < sw {
    let um1 = if x >= 1 { x - 1 } else { 1 };
    row[x * hstride] += (row[um1 * hstride] + row[(x + 1) * hstride] + 2) >> 2;
    x += 2;
  }
}

/// Haar horizontal pass over one row. The precision shift folds into the
/// pair transform, the vertical pass runs unshifted.
fn haar_horiz(row: &mut [DwtCoef], sw: usize, hstride: usize, shift: u32) {
  let mut x = 0;
  while x < sw {
    let a = row[x * hstride] << shift;
    let d = (row[(x + 1) * hstride] << shift) - a;
    row[(x + 1) * hstride] = d;
    row[x * hstride] = a + ((d + 1) >> 1);
    x += 2;
  }
}

fn dd97_vert_predict(
  buf: &mut [DwtCoef],
  j: usize,
  stride: usize,
  hstride: usize,
  sw: usize,
  sh: usize,
) {
  let (tm3, tp1, tp3) = predict_taps(j, sh);
  for xi in 0..sw {
    let x = xi * hstride;
    let v = 9 * (buf[(j - 1) * stride + x] + buf[tp1 * stride + x])
      - buf[tm3 * stride + x]
      - buf[tp3 * stride + x];
    buf[j * stride + x] -= (v + 8) >> 4;
  }
}

fn legall_vert_predict(
  buf: &mut [DwtCoef],
  j: usize,
  stride: usize,
  hstride: usize,
  sw: usize,
  sh: usize,
) {
  let tp1 = if j + 1 < sh { j + 1 } else { j - 1 };
  for xi in 0..sw {
    let x = xi * hstride;
    buf[j * stride + x] -= (buf[(j - 1) * stride + x] + buf[tp1 * stride + x] + 1) >> 1;
  }
}

// The 2-tap update stage is shared by both non-Haar families.
fn vert_update(buf: &mut [DwtCoef], u: usize, stride: usize, hstride: usize, sw: usize) {
  let um1 = if u >= 1 { u - 1 } else { 1 };
  for xi in 0..sw {
    let x = xi * hstride;
    buf[u * stride + x] += (buf[um1 * stride + x] + buf[(u + 1) * stride + x] + 2) >> 2;
  }
}

fn haar_vert_pair(buf: &mut [DwtCoef], u: usize, stride: usize, hstride: usize, sw: usize) {
  for xi in 0..sw {
    let x = xi * hstride;
    let d = buf[(u + 1) * stride + x] - buf[u * stride + x];
    buf[(u + 1) * stride + x] = d;
    buf[u * stride + x] += (d + 1) >> 1;
  }
}

/// One sub-band of a transformed plane, addressed inside the interleaved
/// coefficient buffer.
#[derive(Clone, Copy, Default, Zeroable)]
pub struct SubBand {
  pub offset: usize,
  pub stride: usize,
  pub hstride: usize,
  pub width: usize,
  pub height: usize,
}

/// Coefficient storage and band geometry for one plane, plus the plane's
/// transform state.
pub struct CoefPlane {
  /// Visible sample area.
  pub width: usize,
  pub height: usize,
  /// Area padded to the transform alignment and the slice grid.
  pub dwt_width: usize,
  pub dwt_height: usize,
  pub coef_stride: usize,
  pub buf: Box<[DwtCoef]>,
  /// band[level][orientation], level 0 the coarsest, orientations
  /// LL, HL, LH, HH. LL is only meaningful at level 0.
  pub band: [[SubBand; 4]; MAX_DWT_LEVELS],
  pub transform: Transform,
}

impl CoefPlane {
  pub fn new(
    width: usize,
    height: usize,
    dwt_width: usize,
    dwt_height: usize,
    wavelet: WaveletType,
    depth: usize,
  ) -> Self {
    assert!(dwt_width % (1 << depth) == 0 && dwt_height % (1 << depth) == 0);

    // Wider stride keeps rows at a friendly alignment
    let coef_stride = dwt_width.next_multiple_of(32);
    let buf = zeroed_slice_box(coef_stride * dwt_height);

    let mut band = [[SubBand::zeroed(); 4]; MAX_DWT_LEVELS];
    let mut w = dwt_width;
    let mut h = dwt_height;
    let mut hstride = 1usize;
    for level in (0..depth).rev() {
      w >>= 1;
      h >>= 1;
      hstride <<= 1;
      for o in 0..4 {
        let stride = coef_stride * hstride;
        band[level][o] = SubBand {
          offset: (o > 1) as usize * (stride >> 1) + (o & 1) * (hstride >> 1),
          stride: stride,
          hstride: hstride,
          width: w,
          height: h,
        };
      }
    }

    Self {
      width: width,
      height: height,
      dwt_width: dwt_width,
      dwt_height: dwt_height,
      coef_stride: coef_stride,
      buf: buf,
      band: band,
      transform: Transform::new(wavelet, depth),
    }
  }

  /// Copy a band of input samples into the coefficient buffer, recentred
  /// around zero, zeroing the padding columns (and the padding rows once the
  /// last input row is in). Returns the number of buffer rows now holding
  /// final input, i.e. how far the transform may run.
  pub fn import_band(
    &mut self,
    data: &[u8],
    linesize: usize,
    bytes_per_sample: usize,
    pos_y: usize,
    rows: usize,
    diff_offset: i32,
  ) -> usize {
    let rows = rows.min(self.height - pos_y);

    for y in 0..rows {
      let src = &data[y * linesize..];
      let dst = &mut self.buf[(pos_y + y) * self.coef_stride..];
      if bytes_per_sample == 1 {
        for x in 0..self.width {
          dst[x] = src[x] as DwtCoef - diff_offset;
        }
      } else {
        for x in 0..self.width {
          let v = u16::from_ne_bytes([src[2 * x], src[2 * x + 1]]);
          dst[x] = v as DwtCoef - diff_offset;
        }
      }
      for x in self.width..self.dwt_width {
        dst[x] = 0;
      }
    }

    if pos_y + rows == self.height {
      self.buf[self.height * self.coef_stride..].fill(0);
      return self.dwt_height;
    }
    return pos_y + rows;
  }

  /// Run the transform over everything available up to row `y_avail`.
  pub fn dwt(&mut self, y_avail: usize) {
    self.transform.push_rows(
      &mut self.buf,
      self.coef_stride,
      self.dwt_width,
      self.dwt_height,
      y_avail,
    );
  }
}
