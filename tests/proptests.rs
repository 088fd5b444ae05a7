use proptest::prelude::*;

use tinyvc2::bitcode::{count_vc2_ue, BitWriter};
use tinyvc2::dwt::{CoefPlane, Transform};
use tinyvc2::quant::{init_quant_matrix, CoefLut, Q_CEIL};
use tinyvc2::slice::{count_hq_slice, encode_hq_slice, rate_control, ssize_round, SliceArgs, SliceCtx};
use tinyvc2::{QuantMatrix, WaveletType};

fn wavelet_strategy() -> impl Strategy<Value = WaveletType> {
  prop_oneof![
    Just(WaveletType::Dd9_7),
    Just(WaveletType::LeGall5_3),
    Just(WaveletType::Haar),
    Just(WaveletType::HaarShift),
  ]
}

// Decode one interleaved exp-Golomb value from a bit position
fn read_ue(data: &[u8], pos: &mut usize) -> u32 {
  let mut bit = |p: &mut usize| {
    let b = (data[*p / 8] >> (7 - *p % 8)) & 1;
    *p += 1;
    b as u32
  };
  let mut value = 1u32;
  while bit(pos) == 0 {
    value = (value << 1) | bit(pos);
  }
  value - 1
}

proptest! {
  // Writing a ue code and reading it back is the identity, and the
  // advertised length is exact
  #[test]
  fn ue_code_roundtrip(values in proptest::collection::vec(0u32..2_000_000, 1..50)) {
    let mut w = BitWriter::new();
    let mut total_bits = 0;
    for &v in &values {
      w.put_vc2_ue(v);
      total_bits += count_vc2_ue(v) as usize;
    }
    prop_assert_eq!(w.bit_count(), total_bits);

    let data = w.finalize();
    let mut pos = 0;
    for &v in &values {
      prop_assert_eq!(read_ue(&data, &mut pos), v);
    }
  }

  // Any row-wise split of the input produces the same transform as a
  // whole-plane call
  #[test]
  fn incremental_dwt_is_split_invariant(
    wavelet in wavelet_strategy(),
    depth in 1usize..=3,
    seed in any::<u64>(),
    steps in proptest::collection::vec(1usize..=9, 4..40),
  ) {
    let (w, h, stride) = (32usize, 32usize, 40usize);
    let mut state = seed | 1;
    let mut orig = vec![0i32; stride * h];
    for y in 0..h {
      for x in 0..w {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        orig[y * stride + x] = ((state >> 33) % 4096) as i32 - 2048;
      }
    }

    let mut whole = orig.clone();
    let mut t = Transform::new(wavelet, depth);
    t.push_rows(&mut whole, stride, w, h, h);

    let mut inc = orig;
    let mut t = Transform::new(wavelet, depth);
    let mut y = 0;
    for step in steps {
      y = (y + step).min(h);
      t.push_rows(&mut inc, stride, w, h, y);
    }
    t.push_rows(&mut inc, stride, w, h, h);

    prop_assert_eq!(inc, whole);
  }

  // The cost model and the writer agree bit for bit: a slice encodes into
  // exactly the size rate control picked, under the ceiling whenever any
  // quantiser can reach it
  #[test]
  fn slice_cost_matches_emission(
    seed in any::<u64>(),
    wavelet in wavelet_strategy(),
    big_coeffs in any::<bool>(),
  ) {
    let depth = 4;
    let mut planes = Vec::new();
    let mut state = seed | 1;
    for _ in 0..3 {
      let mut p = CoefPlane::new(32, 32, 32, 32, wavelet, depth);
      let range = if big_coeffs { 300_000u64 } else { 4096 };
      for v in p.buf.iter_mut() {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        *v = ((state >> 33) % (2 * range)) as i32 - range as i32;
      }
      planes.push(p);
    }
    let planes: [CoefPlane; 3] = match planes.try_into() {
      Ok(p) => p,
      Err(_) => unreachable!(),
    };

    let lut = CoefLut::new();
    let (quant, _) = init_quant_matrix(wavelet, depth, QuantMatrix::Default);
    let ctx = SliceCtx {
      planes: &planes,
      lut: &lut,
      quant: &quant,
      wavelet_depth: depth,
      num_x: 2,
      num_y: 2,
      prefix_bytes: 0,
      size_scaler: 2,
    };

    let slice_max_bytes = 200;
    for sy in 0..2 {
      for sx in 0..2 {
        let mut args = SliceArgs::new(sx, sy, 0);
        args.bits_ceil = slice_max_bytes * 8;
        args.bits_floor = slice_max_bytes * 8 * 3 / 4;
        rate_control(&ctx, &mut args);

        let quant_idx = args.quant_idx;
        let bits = count_hq_slice(&ctx, &mut args, quant_idx);
        prop_assert!(
          bits as usize <= args.bits_ceil || args.quant_idx == Q_CEIL - 1,
          "quant {} bits {}", args.quant_idx, bits
        );
        prop_assert_eq!(args.bytes, ssize_round(bits as usize >> 3, 2, 0));

        // The writer must land on exactly the allocated size (it asserts
        // internally too) and lead with the chosen quantiser
        let mut out = vec![0u8; args.bytes];
        encode_hq_slice(&ctx, &args, &mut out);
        prop_assert_eq!(out[0] as usize, args.quant_idx);
      }
    }
  }
}
