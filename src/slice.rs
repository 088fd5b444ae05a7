// Copyright (c) 2025, The tinyvc2 contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at https://opensource.org/license/bsd-2-clause

use crate::bitcode::{count_vc2_ue, BitWriter};
use crate::dwt::{CoefPlane, SubBand};
use crate::quant::{quantize, CoefLut, COEF_LUT_TAB, MAX_DWT_LEVELS, QSCALE_TAB, Q_CEIL};

/// The picture-wide state a slice worker needs, shared read-only between
/// all slice tasks.
pub struct SliceCtx<'a> {
  pub planes: &'a [CoefPlane; 3],
  pub lut: &'a CoefLut,
  pub quant: &'a [[u8; 4]; MAX_DWT_LEVELS],
  pub wavelet_depth: usize,
  pub num_x: usize,
  pub num_y: usize,
  pub prefix_bytes: usize,
  pub size_scaler: usize,
}

/// Mutable per-slice state: position, chosen quantiser, measured size, and
/// the per-quantiser bit cost cache (0 = not yet computed; a real slice can
/// never cost zero bits).
pub struct SliceArgs {
  pub x: usize,
  pub y: usize,
  pub quant_idx: usize,
  pub bits_ceil: usize,
  pub bits_floor: usize,
  pub bytes: usize,
  pub cache: [u32; Q_CEIL],
}

impl SliceArgs {
  pub fn new(x: usize, y: usize, quant_idx: usize) -> Self {
    Self {
      x: x,
      y: y,
      quant_idx: quant_idx,
      bits_ceil: 0,
      bits_floor: 0,
      bytes: 0,
      cache: [0; Q_CEIL],
    }
  }
}

/// The limited size resolution of each slice forces the total through the
/// size scaler, on top of the quant byte, the three length bytes and the
/// slice prefix.
#[inline]
pub fn ssize_round(bytes: usize, size_scaler: usize, prefix_bytes: usize) -> usize {
  bytes.div_ceil(size_scaler) * size_scaler + 4 + prefix_bytes
}

/// Per-band quantiser indices for a slice quantiser: the matrix offset is
/// subtracted per level and orientation, clamped at zero.
fn slice_quantizers(
  quant: &[[u8; 4]; MAX_DWT_LEVELS],
  depth: usize,
  quant_idx: usize,
) -> [[usize; 4]; MAX_DWT_LEVELS] {
  let mut quants = [[0usize; 4]; MAX_DWT_LEVELS];
  for level in 0..depth {
    for orientation in (level != 0) as usize..4 {
      quants[level][orientation] =
        quant_idx.saturating_sub(quant[level][orientation] as usize);
    }
  }
  return quants;
}

#[inline]
fn slice_rect(b: &SubBand, sx: usize, sy: usize, num_x: usize, num_y: usize) -> (usize, usize, usize, usize) {
  let left = b.width * sx / num_x;
  let right = b.width * (sx + 1) / num_x;
  let top = b.height * sy / num_y;
  let bottom = b.height * (sy + 1) / num_y;
  (left, right, top, bottom)
}

/// Exact bit cost of a slice at a candidate quantiser, cached per index.
pub fn count_hq_slice(ctx: &SliceCtx, slice: &mut SliceArgs, quant_idx: usize) -> u32 {
  if slice.cache[quant_idx] != 0 {
    return slice.cache[quant_idx];
  }

  let mut bits = 8 * ctx.prefix_bytes as u32 + 8;
  let quants = slice_quantizers(ctx.quant, ctx.wavelet_depth, quant_idx);

  for p in ctx.planes.iter() {
    let bytes_start = bits >> 3;
    bits += 8;
    for level in 0..ctx.wavelet_depth {
      for orientation in (level != 0) as usize..4 {
        let b = &p.band[level][orientation];
        let q_idx = quants[level][orientation];
        let (len_lut, _) = ctx.lut.row(q_idx);
        let qfactor = QSCALE_TAB[q_idx];

        let (left, right, top, bottom) = slice_rect(b, slice.x, slice.y, ctx.num_x, ctx.num_y);
        for y in top..bottom {
          let row = b.offset + y * b.stride;
          for x in left..right {
            let c_abs = p.buf[row + x * b.hstride].unsigned_abs();
            if (c_abs as usize) < COEF_LUT_TAB {
              bits += len_lut[c_abs as usize] as u32;
            } else {
              let c_quant = quantize(c_abs, qfactor);
              bits += count_vc2_ue(c_quant);
              bits += (c_quant != 0) as u32;
            }
          }
        }
      }
    }
    // Byte-align between planes, then pad the plane payload to whole
    // size-scaler granules
    bits = (bits + 7) & !7;
    let bytes_len = (bits >> 3) - bytes_start - 1;
    let pad_s = bytes_len.div_ceil(ctx.size_scaler as u32);
    let pad_c = pad_s * ctx.size_scaler as u32 - bytes_len;
    bits += pad_c * 8;
  }

  slice.cache[quant_idx] = bits;
  return bits;
}

/// Walk the quantiser towards the (floor, ceil) window.
///
/// Approaches the best possible quantiser asymptotically; the cost LUT makes
/// each probe cheap. Guaranteed to never overshoot the ceiling, which
/// matters when the stream has to fit a fixed network budget. Keeps the
/// previous two quantiser values: seeing the second-to-last again means the
/// search is bouncing between two values that bracket the window, so take
/// the larger (smaller slice) and let the second pass use the waste.
pub fn rate_control(ctx: &SliceCtx, slice: &mut SliceArgs) {
  let top = slice.bits_ceil as u32;
  let bottom = slice.bits_floor as u32;
  let q_max = Q_CEIL as i32 - 1;

  let mut quant_buf = [-1i32; 2];
  let mut quant = slice.quant_idx as i32;
  let mut step = 1i32;

  let mut bits = count_hq_slice(ctx, slice, quant as usize);
  while bits > top || bits < bottom {
    let signed_step = if bits > top { step } else { -step };
    quant = (quant + signed_step).clamp(0, q_max);
    bits = count_hq_slice(ctx, slice, quant as usize);
    if quant_buf[1] == quant {
      quant = quant_buf[0].max(quant);
      bits = count_hq_slice(ctx, slice, quant as usize);
      break;
    }
    step = (step / 2).clamp(1, q_max / 2);
    quant_buf[1] = quant_buf[0];
    quant_buf[0] = quant;
  }

  slice.quant_idx = quant.clamp(0, q_max) as usize;
  slice.bytes = ssize_round((bits >> 3) as usize, ctx.size_scaler, ctx.prefix_bytes);
}

fn encode_subband(
  w: &mut BitWriter,
  plane: &CoefPlane,
  b: &SubBand,
  sx: usize,
  sy: usize,
  num_x: usize,
  num_y: usize,
  len_lut: &[u8],
  val_lut: &[u32],
  qfactor: u32,
) {
  let (left, right, top, bottom) = slice_rect(b, sx, sy, num_x, num_y);
  for y in top..bottom {
    let row = b.offset + y * b.stride;
    for x in left..right {
      let coeff = plane.buf[row + x * b.hstride];
      let neg = (coeff < 0) as u32;
      let c_abs = coeff.unsigned_abs();
      if (c_abs as usize) < COEF_LUT_TAB {
        // The sign lives in the bottom bit of the LUT pattern
        w.put_bits(len_lut[c_abs as usize] as u32, val_lut[c_abs as usize] | neg);
      } else {
        let c_quant = quantize(c_abs, qfactor);
        w.put_vc2_ue(c_quant);
        if c_quant != 0 {
          w.put_bits(1, neg);
        }
      }
    }
  }
}

/// Emit one HQ slice into its pre-assigned region of the output packet.
/// The region length is exactly the size rate control settled on; the third
/// plane's padding absorbs whatever the size-scaler rounding left over.
pub fn encode_hq_slice(ctx: &SliceCtx, slice: &SliceArgs, out: &mut [u8]) {
  assert_eq!(out.len(), slice.bytes);

  let mut w = BitWriter::with_capacity(slice.bytes);

  // The reference decoder ignores the prefix and its typical length is 0
  w.skip_bytes(ctx.prefix_bytes);
  w.put_bits(8, slice.quant_idx as u32);

  let quants = slice_quantizers(ctx.quant, ctx.wavelet_depth, slice.quant_idx);

  for (i, p) in ctx.planes.iter().enumerate() {
    let bytes_start = w.byte_pos();
    w.put_bits(8, 0);
    for level in 0..ctx.wavelet_depth {
      for orientation in (level != 0) as usize..4 {
        let q_idx = quants[level][orientation];
        let (len_lut, val_lut) = ctx.lut.row(q_idx);
        encode_subband(
          &mut w,
          p,
          &p.band[level][orientation],
          slice.x,
          slice.y,
          ctx.num_x,
          ctx.num_y,
          len_lut,
          val_lut,
          QSCALE_TAB[q_idx],
        );
      }
    }
    w.align();
    let bytes_len = w.byte_pos() - bytes_start - 1;
    let pad_s = if i == 2 {
      // Pad the last plane so the slice consumes its full allocation
      let len_diff = slice.bytes - w.byte_pos();
      (bytes_len + len_diff).div_ceil(ctx.size_scaler)
    } else {
      bytes_len.div_ceil(ctx.size_scaler)
    };
    let pad_c = pad_s * ctx.size_scaler - bytes_len;
    w.patch_u8(bytes_start, pad_s as u8);
    // Padding that decodes to zero coefficients, so an overreading decoder
    // terminates quickly on corrupt input
    w.put_byte_run(pad_c, 0xFF);
  }

  let data = w.finalize();
  assert_eq!(data.len(), slice.bytes);
  out.copy_from_slice(&data);
}
