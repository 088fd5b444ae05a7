// Copyright (c) 2025, The tinyvc2 contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at https://opensource.org/license/bsd-2-clause

//! The picture driver: owns the coefficient planes, drives the transforms,
//! the rate allocator and the slice writers, and frames everything with the
//! parse-info chain.
//!
//! Two entry points:
//!
//! * [`Vc2Encoder::encode_picture`] - whole pictures, one self-contained
//!   packet per picture (two for an interlaced frame, one per field).
//! * [`Vc2Encoder::encode_band`] - fragmented streaming: feed bands of rows
//!   top to bottom and get a packet back whenever enough slice rows have
//!   become encodable.

use log::{info, warn};

use crate::bitcode::BitWriter;
use crate::config::{find_base_video_format, EncoderConfig, BASE_VIDEO_FMTS};
use crate::dwt::CoefPlane;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::frame::FrameBand;
use crate::headers::{ParseCode, DATA_UNIT_HEADER_SIZE};
use crate::quant::{init_quant_matrix, CoefLut, MAX_DWT_LEVELS};
use crate::rate::{calc_slice_sizes, constant_quantiser_slice_sizes, SliceSizes};
use crate::slice::{encode_hq_slice, ssize_round, SliceArgs, SliceCtx};

/// Written into the auxiliary data unit at the head of fragmented streams.
pub const ENCODER_IDENT: &str = concat!("tinyvc2 ", env!("CARGO_PKG_VERSION"));

// Headroom reserved off the picture budget for the out-of-band headers.
const HEADER_SIZE_BASE: usize = 100;

// A slice must stay under what a network packet can carry alongside the
// parse_info + fragment headers (25 bytes) and RTP + extension headers (16).
const SLICE_CEIL_NETWORK: i64 = 1440 - 25 - 16;

pub struct Vc2Encoder {
  pub(crate) cfg: EncoderConfig,

  // Picture geometry; a field when interlaced, the frame otherwise
  pub(crate) pic_height: usize,
  pub(crate) chroma_x_shift: usize,
  pub(crate) chroma_y_shift: usize,
  pub(crate) bytes_per_sample: usize,
  pub(crate) bpp_idx: u32,
  pub(crate) diff_offset: i32,

  pub(crate) planes: [CoefPlane; 3],
  pub(crate) slice_args: Vec<SliceArgs>,
  pub(crate) num_x: usize,
  pub(crate) num_y: usize,
  pub(crate) prefix_bytes: usize,
  pub(crate) size_scaler: usize,

  pub(crate) quant: [[u8; 4]; MAX_DWT_LEVELS],
  pub(crate) custom_quant_matrix: bool,
  pub(crate) lut: CoefLut,

  pub(crate) base_vf: usize,
  pub(crate) level: u32,
  pub(crate) profile: u32,
  pub(crate) ver_major: u32,
  pub(crate) ver_minor: u32,
  pub(crate) strict_compliance: bool,
  pub(crate) picture_number: u32,

  // Rate control state for the picture in flight
  pub(crate) frame_max_bytes: i64,
  pub(crate) slice_max_bytes: usize,
  pub(crate) slice_min_bytes: usize,
  pub(crate) q_avg: u64,
  pub(crate) slice_count: u64,

  // Parse-offset chain
  pub(crate) prev_parse_info_position: Option<usize>,
  pub(crate) prev_offset: u32,

  // Fragmented-mode streaming state
  pub(crate) expected_pos_y: usize,
  pub(crate) number_of_rows_sent: usize,

  pub(crate) executor: Executor,
}

impl Vc2Encoder {
  pub fn new(cfg: EncoderConfig) -> Result<Self> {
    cfg.validate()?;

    let pic_height = if cfg.interlaced { cfg.height / 2 } else { cfg.height };
    if cfg.slice_height > pic_height {
      return Err(Error::ConfigInvalid(
        "slice height is bigger than one field".into(),
      ));
    }

    let chroma_x_shift = cfg.pix_fmt.chroma_x_shift();
    let chroma_y_shift = cfg.pix_fmt.chroma_y_shift();

    let bpp_idx = match (cfg.pix_fmt.bit_depth(), cfg.full_range) {
      (8, true) => 1,
      (8, false) => 2,
      (10, _) => 3,
      _ => 4,
    };

    let mut strict_compliance = true;
    let mut level = 3;
    let base_vf = match find_base_video_format(&cfg) {
      Some(i) => {
        level = BASE_VIDEO_FMTS[i].level;
        info!("Selected base video format = {} ({})", i, BASE_VIDEO_FMTS[i].name);
        i
      }
      None => {
        warn!("Format does not strictly comply with VC2 specs");
        strict_compliance = false;
        0
      }
    };

    if cfg.interlaced {
      warn!("Interlacing enabled!");
    }
    if let Some(q) = cfg.const_quant {
      warn!("encoding with constant quantiser ({})", q);
    }

    // Pad the luma plane to the transform alignment and the slice grid in
    // one go; the chroma shifts fold into the alignment so the subsampled
    // planes stay transform-aligned too
    let align_x = lcm(1 << (cfg.wavelet_depth + chroma_x_shift), cfg.slice_width);
    let align_y = lcm(1 << (cfg.wavelet_depth + chroma_y_shift), cfg.slice_height);
    let dwt_width = cfg.width.next_multiple_of(align_x);
    let dwt_height = pic_height.next_multiple_of(align_y);

    let num_x = dwt_width / cfg.slice_width;
    let num_y = dwt_height / cfg.slice_height;

    if let Some(frag) = cfg.fragment_size {
      if num_x % frag != 0 {
        return Err(Error::ConfigInvalid(format!(
          "fragment size ({}) is not a divisor of the number of slices across the frame ({})",
          frag, num_x
        )));
      }
    }

    let mut planes = Vec::with_capacity(3);
    for i in 0..3 {
      let (cxs, cys) = if i > 0 { (chroma_x_shift, chroma_y_shift) } else { (0, 0) };
      planes.push(CoefPlane::new(
        cfg.width >> cxs,
        pic_height >> cys,
        dwt_width >> cxs,
        dwt_height >> cys,
        cfg.wavelet,
        cfg.wavelet_depth,
      ));
    }
    let planes: [CoefPlane; 3] = match planes.try_into() {
      Ok(p) => p,
      Err(_) => unreachable!(),
    };

    let mut slice_args = Vec::with_capacity(num_x * num_y);
    for y in 0..num_y {
      for x in 0..num_x {
        slice_args.push(SliceArgs::new(x, y, cfg.const_quant.unwrap_or(0) as usize));
      }
    }

    let (quant, custom_quant_matrix) =
      init_quant_matrix(cfg.wavelet, cfg.wavelet_depth, cfg.qm);

    let executor = Executor::new(cfg.threads);
    let ver_major = if cfg.fragment_size.is_some() { 3 } else { 2 };

    Ok(Self {
      pic_height: pic_height,
      chroma_x_shift: chroma_x_shift,
      chroma_y_shift: chroma_y_shift,
      bytes_per_sample: cfg.pix_fmt.bytes_per_sample(),
      bpp_idx: bpp_idx,
      diff_offset: cfg.pix_fmt.diff_offset(),
      planes: planes,
      slice_args: slice_args,
      num_x: num_x,
      num_y: num_y,
      prefix_bytes: 0,
      size_scaler: 2,
      quant: quant,
      custom_quant_matrix: custom_quant_matrix,
      lut: CoefLut::new(),
      base_vf: base_vf,
      level: level,
      profile: 3,
      ver_major: ver_major,
      ver_minor: 0,
      strict_compliance: strict_compliance,
      picture_number: 0,
      frame_max_bytes: 0,
      slice_max_bytes: 0,
      slice_min_bytes: 0,
      q_avg: 0,
      slice_count: 0,
      prev_parse_info_position: None,
      prev_offset: 0,
      expected_pos_y: 0,
      number_of_rows_sent: 0,
      executor: executor,
      cfg: cfg,
    })
  }

  /// Slices per picture.
  pub fn num_slices(&self) -> (usize, usize) {
    (self.num_x, self.num_y)
  }

  fn slice_ctx(&self) -> SliceCtx<'_> {
    SliceCtx {
      planes: &self.planes,
      lut: &self.lut,
      quant: &self.quant,
      wavelet_depth: self.cfg.wavelet_depth,
      num_x: self.num_x,
      num_y: self.num_y,
      prefix_bytes: self.prefix_bytes,
      size_scaler: self.size_scaler,
    }
  }

  /// Derive the picture byte budget and the slice window from the bit rate,
  /// and search for a size scaler small enough to express the slice sizes
  /// in their one-byte length fields.
  fn setup_rate(&mut self, header_size: usize) -> Result<()> {
    self.size_scaler = 2;
    self.prefix_bytes = 0;

    let fields = if self.cfg.interlaced { 2 } else { 1 };
    let picture_bits =
      self.cfg.bit_rate as i64 * self.cfg.time_base_num as i64
        / self.cfg.time_base_den as i64
        / fields;
    self.frame_max_bytes = (picture_bits >> 3) - header_size as i64;

    let slice_ceil = (self.frame_max_bytes / (self.num_x * self.num_y) as i64)
      .min(SLICE_CEIL_NETWORK);
    if slice_ceil < 8 {
      return Err(Error::ConfigInvalid(format!(
        "bit rate {} too low for {} slices per picture",
        self.cfg.bit_rate,
        self.num_x * self.num_y
      )));
    }
    let slice_ceil = slice_ceil as usize;

    self.slice_max_bytes = slice_ceil;
    loop {
      let mut r_size = ssize_round(self.slice_max_bytes, self.size_scaler, self.prefix_bytes);
      if r_size > slice_ceil {
        self.slice_max_bytes -= (r_size - slice_ceil).min(self.slice_max_bytes);
        r_size = ssize_round(self.slice_max_bytes, self.size_scaler, self.prefix_bytes);
      }
      // Signalled slice size has to fit the 8-bit length field
      if r_size / self.size_scaler <= 255 {
        break;
      }
      self.size_scaler <<= 1;
    }

    self.slice_min_bytes =
      self.slice_max_bytes - (self.slice_max_bytes as f64 * (self.cfg.tolerance / 100.0)) as usize;

    if let Some(frag) = self.cfg.fragment_size {
      let worst = frag * ssize_round(self.slice_max_bytes, self.size_scaler, self.prefix_bytes);
      if worst > u16::MAX as usize {
        return Err(Error::ConfigInvalid(format!(
          "fragment of {} slices can reach {} bytes, beyond the 16-bit data length",
          frag, worst
        )));
      }
    }

    Ok(())
  }

  /// Copy the band's samples into all three coefficient planes and advance
  /// their transforms, one task per plane.
  fn import_and_transform(&mut self, band: &FrameBand, reset: bool) {
    struct PlaneTask<'a> {
      plane: &'a mut CoefPlane,
      data: &'a [u8],
      linesize: usize,
      pos_y: usize,
      rows: usize,
      bytes_per_sample: usize,
      diff_offset: i32,
    }

    let exec = &self.executor;
    let cys = self.chroma_y_shift;
    let bytes_per_sample = self.bytes_per_sample;
    let diff_offset = self.diff_offset;

    let mut tasks = Vec::with_capacity(3);
    for (i, plane) in self.planes.iter_mut().enumerate() {
      if reset {
        plane.transform.reset();
      }
      let shift = if i > 0 { cys } else { 0 };
      tasks.push(PlaneTask {
        plane: plane,
        data: band.planes[i],
        linesize: band.linesize[i],
        pos_y: band.pos_y >> shift,
        rows: band.height >> shift,
        bytes_per_sample: bytes_per_sample,
        diff_offset: diff_offset,
      });
    }

    exec.run(&mut tasks, |t| {
      let avail = t.plane.import_band(
        t.data,
        t.linesize,
        t.bytes_per_sample,
        t.pos_y,
        t.rows,
        t.diff_offset,
      );
      t.plane.dwt(avail);
    });
  }

  /// How many whole slice rows are decodable: a slice row only counts once
  /// every plane's vertical filtering at every level has passed the rows
  /// the slice covers.
  fn slice_rows_available(&self) -> usize {
    for y in self.number_of_rows_sent..self.num_y {
      for p in self.planes.iter() {
        for pass in 0..self.cfg.wavelet_depth {
          let band_height = p.dwt_height >> (pass + 1);
          let needed = band_height * (y + 1) / self.num_y * 2;
          if needed > p.transform.progress(pass).vfilter_stage1 {
            return y;
          }
        }
      }
    }
    return self.num_y;
  }

  fn run_slice_sizing(&mut self, args: &mut [SliceArgs], budget_bytes: i64) -> SliceSizes {
    let ctx = self.slice_ctx();
    let sizes = if let Some(q) = self.cfg.const_quant {
      constant_quantiser_slice_sizes(&ctx, &self.executor, args, q as usize)
    } else {
      calc_slice_sizes(
        &ctx,
        &self.executor,
        args,
        self.slice_max_bytes,
        self.slice_min_bytes,
        budget_bytes,
      )
    };
    self.q_avg += sizes.quant_sum;
    self.slice_count += args.len() as u64;
    return sizes;
  }

  fn finish_picture_stats(&mut self) {
    if self.slice_count > 0 {
      let avg_quant = self.q_avg / self.slice_count;
      if avg_quant >= 50 {
        warn!("average quantizer very large: {}", avg_quant);
      }
    }
    self.q_avg = 0;
    self.slice_count = 0;
  }

  /// Encode one whole picture. Returns one packet, or two for an interlaced
  /// frame - one per field, each a picture of its own, with the sequence
  /// closed after the second field.
  pub fn encode_picture(&mut self, frame: &FrameBand) -> Result<Vec<Vec<u8>>> {
    if self.cfg.fragment_size.is_some() {
      return Err(Error::ConfigInvalid(
        "encode_picture cannot be used in fragmented mode, feed bands to encode_band".into(),
      ));
    }
    if frame.pos_y != 0 {
      return Err(Error::GeometryMismatch { expected: 0, got: frame.pos_y });
    }
    if frame.height != self.cfg.height {
      return Err(Error::InvalidInputData(format!(
        "picture with {} rows, expected {}", frame.height, self.cfg.height
      )));
    }

    self.setup_rate(HEADER_SIZE_BASE)?;

    let fields = if self.cfg.interlaced { 2 } else { 1 };
    let mut packets = Vec::with_capacity(fields);

    for field in 0..fields {
      let view = if self.cfg.interlaced { field_view(frame, field) } else { *frame };
      self.import_and_transform(&view, true);

      let n = self.num_x * self.num_y;
      let mut all_args = std::mem::take(&mut self.slice_args);
      {
        let args = &mut all_args[..n];
        for y in 0..self.num_y {
          for x in 0..self.num_x {
            let a = &mut args[y * self.num_x + x];
            a.x = x;
            a.y = y;
          }
        }

        let sizes = self.run_slice_sizing(args, self.frame_max_bytes);

        let mut w = BitWriter::with_capacity(
          sizes.total_bytes as usize + HEADER_SIZE_BASE + DATA_UNIT_HEADER_SIZE,
        );
        self.prev_parse_info_position = None;

        self.encode_parse_info(&mut w, ParseCode::SeqHeader, 0);
        self.encode_seq_header(&mut w);

        self.backfill_parse_offset(&mut w);
        self.encode_parse_info(&mut w, ParseCode::PictureHq, 0);
        self.encode_picture_header(&mut w);
        self.encode_wavelet_transform(&mut w);

        let mut offsets = Vec::with_capacity(n);
        for a in args.iter() {
          offsets.push(w.byte_pos());
          w.skip_bytes(a.bytes);
        }

        self.backfill_parse_offset(&mut w);
        if field == fields - 1 {
          self.encode_parse_info(&mut w, ParseCode::EndSeq, DATA_UNIT_HEADER_SIZE as u32);
        }

        let mut packet = w.finalize();
        let ctx = self.slice_ctx();
        fill_slice_regions(&ctx, &self.executor, args, &offsets, &mut packet);
        packets.push(packet);
      }
      self.slice_args = all_args;

      self.picture_number = self.picture_number.wrapping_add(1);
      self.finish_picture_stats();
    }

    Ok(packets)
  }

  /// Feed the next band of rows of the current picture. Bands must arrive
  /// in order, starting at row 0. Returns a packet once one or more whole
  /// slice rows became encodable, and closes the sequence when the last
  /// band completes the picture.
  pub fn encode_band(&mut self, band: &FrameBand) -> Result<Option<Vec<u8>>> {
    let Some(fragment_size) = self.cfg.fragment_size else {
      return Err(Error::ConfigInvalid(
        "encode_band requires fragmented mode, use encode_picture".into(),
      ));
    };

    if band.pos_y != self.expected_pos_y {
      return Err(Error::GeometryMismatch {
        expected: self.expected_pos_y,
        got: band.pos_y,
      });
    }
    if band.pos_y + band.height > self.pic_height {
      warn!("given {} lines at (0,{})", band.height, band.pos_y);
    }

    let header_size = HEADER_SIZE_BASE + ENCODER_IDENT.len() + 1;
    if band.pos_y == 0 {
      self.number_of_rows_sent = 0;
      self.setup_rate(header_size)?;
    }

    self.import_and_transform(band, band.pos_y == 0);

    let avail = self.slice_rows_available();
    if avail <= self.number_of_rows_sent {
      // Nothing new is decodable yet
      self.expected_pos_y += band.height;
      return Ok(None);
    }

    let num_y_partial = avail - self.number_of_rows_sent;
    let n = num_y_partial * self.num_x;

    let mut all_args = std::mem::take(&mut self.slice_args);
    let packet = {
      let args = &mut all_args[..n];
      for yy in 0..num_y_partial {
        for x in 0..self.num_x {
          let a = &mut args[yy * self.num_x + x];
          a.x = x;
          a.y = yy + self.number_of_rows_sent;
        }
      }

      let budget =
        num_y_partial as i64 * self.frame_max_bytes / self.num_y as i64;
      let sizes = self.run_slice_sizing(args, budget);

      let fragments = n / fragment_size;
      let mut w = BitWriter::with_capacity(
        sizes.total_bytes as usize + header_size + fragments * (DATA_UNIT_HEADER_SIZE + 12),
      );
      self.prev_parse_info_position = None;

      if self.number_of_rows_sent == 0 {
        self.encode_parse_info(&mut w, ParseCode::SeqHeader, 0);
        self.encode_seq_header(&mut w);

        // Encoder version
        self.backfill_parse_offset(&mut w);
        let aux_next = (DATA_UNIT_HEADER_SIZE + ENCODER_IDENT.len() + 1) as u32;
        self.encode_parse_info(&mut w, ParseCode::Aux, aux_next);
        w.align();
        w.put_str0(ENCODER_IDENT);

        // The opening fragment carries no slices, only the transform
        // parameters; its data length is measured after the fact
        self.backfill_parse_offset(&mut w);
        self.encode_parse_info(&mut w, ParseCode::PictureFragmentHq, 0);
        let before = w.byte_pos();
        self.encode_fragment_header(&mut w, 0, 0, 0, 0);
        self.encode_transform_params(&mut w);
        let after = w.byte_pos();
        w.patch_be16(before + 4, (after - before - 8) as u16);
      }

      let mut offsets = Vec::with_capacity(n);
      for yy in 0..num_y_partial {
        for x in 0..self.num_x {
          let idx = yy * self.num_x + x;
          if x % fragment_size == 0 {
            let group_bytes: usize =
              args[idx..idx + fragment_size].iter().map(|a| a.bytes).sum();
            self.backfill_parse_offset(&mut w);
            self.encode_parse_info(&mut w, ParseCode::PictureFragmentHq, 0);
            self.encode_fragment_header(
              &mut w,
              group_bytes as u16,
              fragment_size as u16,
              x as u16,
              args[idx].y as u16,
            );
          }
          w.align();
          offsets.push(w.byte_pos());
          w.skip_bytes(args[idx].bytes);
        }
      }

      self.backfill_parse_offset(&mut w);
      if self.number_of_rows_sent + num_y_partial == self.num_y {
        self.encode_parse_info(&mut w, ParseCode::EndSeq, DATA_UNIT_HEADER_SIZE as u32);
      }

      let mut packet = w.finalize();
      let ctx = self.slice_ctx();
      fill_slice_regions(&ctx, &self.executor, args, &offsets, &mut packet);
      packet
    };
    self.slice_args = all_args;

    self.number_of_rows_sent += num_y_partial;
    self.expected_pos_y += band.height;
    if self.expected_pos_y >= self.pic_height {
      self.expected_pos_y = 0;
      self.picture_number = self.picture_number.wrapping_add(1);
      self.finish_picture_stats();
    }

    Ok(Some(packet))
  }
}

/// Every other row of a frame, as a field picture.
fn field_view<'a>(frame: &FrameBand<'a>, field: usize) -> FrameBand<'a> {
  let mut planes = frame.planes;
  let mut linesize = frame.linesize;
  for i in 0..3 {
    planes[i] = &frame.planes[i][field * frame.linesize[i]..];
    linesize[i] = frame.linesize[i] * 2;
  }
  FrameBand {
    planes: planes,
    linesize: linesize,
    pos_y: 0,
    height: frame.height / 2,
  }
}

/// Carve the reserved slice regions out of the packet and fill them, one
/// task per slice. The regions were laid out serially, so the tasks are
/// write-disjoint and the result does not depend on scheduling.
fn fill_slice_regions(
  ctx: &SliceCtx,
  exec: &Executor,
  args: &[SliceArgs],
  offsets: &[usize],
  packet: &mut [u8],
) {
  struct SliceTask<'a> {
    args: &'a SliceArgs,
    out: &'a mut [u8],
  }

  let mut tasks = Vec::with_capacity(args.len());
  let mut rest = &mut packet[..];
  let mut consumed = 0;
  for (a, &off) in args.iter().zip(offsets.iter()) {
    let tail = std::mem::take(&mut rest);
    let (_, tail) = tail.split_at_mut(off - consumed);
    let (region, tail) = tail.split_at_mut(a.bytes);
    rest = tail;
    consumed = off + a.bytes;
    tasks.push(SliceTask { args: a, out: region });
  }

  exec.run(&mut tasks, |t| encode_hq_slice(ctx, t.args, t.out));
}

fn gcd(a: usize, b: usize) -> usize {
  if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: usize, b: usize) -> usize {
  a / gcd(a, b) * b
}
