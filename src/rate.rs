// Copyright (c) 2025, The tinyvc2 contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at https://opensource.org/license/bsd-2-clause

use crate::executor::Executor;
use crate::quant::Q_CEIL;
use crate::slice::{count_hq_slice, rate_control, ssize_round, SliceArgs, SliceCtx};

/// Cutoff in number of slices for distributing the leftover bytes. Ranking
/// only the biggest 150 slices keeps the second pass cheap when a picture
/// has tens of thousands of slices, at the price of occasionally boosting a
/// slightly mis-ranked one.
pub const SLICE_REDIST_TOTAL: usize = 150;

/// The totals a sizing pass reports back to the picture driver.
pub struct SliceSizes {
  pub total_bytes: u64,
  pub quant_sum: u64,
}

/// Fit every slice under the byte ceiling, then hand the leftover budget to
/// the most expensive slices.
///
/// `budget_bytes` is the byte budget for exactly the slices in `args` (a
/// whole picture, or the rows of one fragment batch).
pub fn calc_slice_sizes(
  ctx: &SliceCtx,
  exec: &Executor,
  args: &mut [SliceArgs],
  slice_max_bytes: usize,
  slice_min_bytes: usize,
  budget_bytes: i64,
) -> SliceSizes {
  for a in args.iter_mut() {
    a.bits_ceil = slice_max_bytes << 3;
    a.bits_floor = slice_min_bytes << 3;
    a.cache = [0; Q_CEIL];
  }

  // 1st pass - strictly fits the slices under the maximum slice size.
  // Aligning below the maximum wastes bytes, which the second pass uses.
  // The starting quantiser is wherever the slice ended up last picture.
  exec.run(args, |a| rate_control(ctx, a));

  // Collect the most costly slices
  let redist_range = SLICE_REDIST_TOTAL.min(args.len());
  let mut bytes_top = [0usize; SLICE_REDIST_TOTAL];
  let mut top_loc = [None::<usize>; SLICE_REDIST_TOTAL];
  let mut used: i64 = 0;
  for (i, a) in args.iter().enumerate() {
    used += a.bytes as i64;
    for j in 0..redist_range {
      if a.bytes > bytes_top[j] {
        bytes_top[j] = a.bytes;
        top_loc[j] = Some(i);
        break;
      }
    }
  }

  let mut bytes_left = budget_bytes - used;

  // 2nd pass - spends the leftover on the biggest slices to boost quality.
  // Each round tries to lower every ranked slice's quantiser by one; stop
  // once a whole round commits nothing.
  while bytes_left > 0 {
    let mut distributed = 0;
    for j in 0..redist_range {
      if bytes_left <= 0 {
        break;
      }
      let i = match top_loc[j] {
        Some(i) if args[i].quant_idx > 0 => i,
        _ => break,
      };
      let prev_bytes = args[i].bytes;
      let new_idx = args[i].quant_idx - 1;
      let bits = count_hq_slice(ctx, &mut args[i], new_idx) as usize;
      if bits > args[i].bits_ceil {
        // Boosting this slice would break its own ceiling
        continue;
      }
      let bytes = ssize_round(bits >> 3, ctx.size_scaler, ctx.prefix_bytes);
      let diff = bytes as i64 - prev_bytes as i64;
      if bytes_left - diff > 0 {
        args[i].quant_idx = new_idx;
        args[i].bytes = bytes;
        bytes_left -= diff;
        distributed += 1;
      }
    }
    if distributed == 0 {
      break;
    }
  }

  collect_totals(args)
}

/// Sizing for a fixed quantiser: no search, no redistribution, every slice
/// is simply measured at `quant_idx`.
pub fn constant_quantiser_slice_sizes(
  ctx: &SliceCtx,
  exec: &Executor,
  args: &mut [SliceArgs],
  quant_idx: usize,
) -> SliceSizes {
  exec.run(args, |a| {
    a.cache = [0; Q_CEIL];
    let bits = count_hq_slice(ctx, a, quant_idx) as usize;
    a.quant_idx = quant_idx;
    a.bytes = ssize_round(bits >> 3, ctx.size_scaler, ctx.prefix_bytes);
  });

  collect_totals(args)
}

// Totals decide the packet allocation; the quantiser sum feeds the
// "average quantizer very large" warning at the end of the picture.
fn collect_totals(args: &[SliceArgs]) -> SliceSizes {
  let mut sizes = SliceSizes { total_bytes: 0, quant_sum: 0 };
  for a in args.iter() {
    sizes.total_bytes += a.bytes as u64;
    sizes.quant_sum += a.quant_idx as u64;
  }
  return sizes;
}
