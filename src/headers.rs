// Copyright (c) 2025, The tinyvc2 contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at https://opensource.org/license/bsd-2-clause

//! VC-2 header syntax. Every data unit in the stream is framed by a 13-byte
//! parse_info whose forward offset is only known once the next one is
//! written, so the writer patches the previous record in place instead of
//! buffering.

use crate::bitcode::BitWriter;
use crate::encoder::Vc2Encoder;

/// The 13-byte framing record preceding every data unit.
pub const DATA_UNIT_HEADER_SIZE: usize = 13;

/// Parse codes this encoder emits.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParseCode {
  SeqHeader = 0x00,
  EndSeq = 0x10,
  Aux = 0x20,
  PictureHq = 0xE8,
  PictureFragmentHq = 0xEC,
}

impl Vc2Encoder {
  /// parse_info(): magic, parse code, forward and backward offsets. The
  /// forward offset is normally written as 0 here and patched by
  /// `backfill_parse_offset` once the next record's position is known; the
  /// backward offset chains to wherever the last record was, even across
  /// packet boundaries.
  pub(crate) fn encode_parse_info(&mut self, w: &mut BitWriter, pcode: ParseCode, next: u32) {
    w.align();
    self.prev_parse_info_position = Some(w.byte_pos());
    w.put_bytes(b"BBCD");
    w.put_bits(8, pcode as u32);
    w.put_bits32(next);
    w.put_bits32(self.prev_offset);
    self.prev_offset = next;
  }

  /// Overwrite the previous parse_info's forward offset with the measured
  /// distance to the current write position. No-op at the start of a packet,
  /// where the previous record lives in an already-emitted packet.
  pub(crate) fn backfill_parse_offset(&mut self, w: &mut BitWriter) {
    if let Some(pos) = self.prev_parse_info_position {
      let distance = ((w.bit_count() + 7) >> 3) - pos;
      w.patch_be32(pos + 5, distance as u32);
      self.prev_offset = distance as u32;
    }
  }

  /// 11.2.1 - parse_parameters(). The level lets a decoder reject
  /// resolutions it can't handle up front; this codec targets small FPGA
  /// decoders without much memory.
  fn encode_parse_params(&self, w: &mut BitWriter) {
    w.put_vc2_ue(self.ver_major); // 2, or 3 when fragments are in use
    w.put_vc2_ue(self.ver_minor);
    w.put_vc2_ue(self.profile); // 3 signals HQ
    w.put_vc2_ue(self.level);
  }

  /// 11.4.3 - frame_size()
  fn encode_frame_size(&self, w: &mut BitWriter) {
    w.put_bits(1, !self.strict_compliance as u32);
    if !self.strict_compliance {
      w.put_vc2_ue(self.cfg.width as u32);
      w.put_vc2_ue(self.cfg.height as u32);
    }
  }

  /// 11.4.4 - color_diff_sampling_format()
  fn encode_sample_fmt(&self, w: &mut BitWriter) {
    w.put_bits(1, !self.strict_compliance as u32);
    if !self.strict_compliance {
      let idx = if self.chroma_x_shift == 1 && self.chroma_y_shift == 0 {
        1 // 422
      } else if self.chroma_x_shift == 1 && self.chroma_y_shift == 1 {
        2 // 420
      } else {
        0 // 444
      };
      w.put_vc2_ue(idx);
    }
  }

  /// 11.4.5 - scan_format()
  fn encode_scan_format(&self, w: &mut BitWriter) {
    w.put_bits(1, !self.strict_compliance as u32);
    if !self.strict_compliance {
      w.put_vc2_ue(self.cfg.interlaced as u32);
    }
  }

  /// 11.4.6 - frame_rate()
  fn encode_frame_rate(&self, w: &mut BitWriter) {
    w.put_bits(1, !self.strict_compliance as u32);
    if !self.strict_compliance {
      w.put_vc2_ue(0); // custom rate, spelled out as a rational
      w.put_vc2_ue(self.cfg.time_base_den);
      w.put_vc2_ue(self.cfg.time_base_num);
    }
  }

  /// 11.4.7 - pixel_aspect_ratio()
  fn encode_aspect_ratio(&self, w: &mut BitWriter) {
    w.put_bits(1, !self.strict_compliance as u32);
    if !self.strict_compliance {
      w.put_vc2_ue(0);
      w.put_vc2_ue(1);
      w.put_vc2_ue(1);
    }
  }

  /// 11.4.8 - clean_area()
  fn encode_clean_area(&self, w: &mut BitWriter) {
    w.put_bits(1, 0);
  }

  /// 11.4.9 - signal_range()
  fn encode_signal_range(&self, w: &mut BitWriter) {
    w.put_bits(1, !self.strict_compliance as u32);
    if !self.strict_compliance {
      w.put_vc2_ue(self.bpp_idx);
    }
  }

  /// 11.4.10 - color_spec()
  fn encode_color_spec(&self, w: &mut BitWriter) {
    w.put_bits(1, !self.strict_compliance as u32);
    if !self.strict_compliance {
      w.put_vc2_ue(0); // custom

      // Primaries, matrix and transfer function override blocks, all left
      // at index 0 since the input carries no colour metadata
      w.put_bits(1, 1);
      w.put_vc2_ue(0);
      w.put_bits(1, 1);
      w.put_vc2_ue(0);
      w.put_bits(1, 1);
      w.put_vc2_ue(0);
    }
  }

  /// 11.4 - source_parameters()
  fn encode_source_params(&self, w: &mut BitWriter) {
    self.encode_frame_size(w);
    self.encode_sample_fmt(w);
    self.encode_scan_format(w);
    self.encode_frame_rate(w);
    self.encode_aspect_ratio(w);
    self.encode_clean_area(w);
    self.encode_signal_range(w);
    self.encode_color_spec(w);
  }

  /// 11 - sequence_header()
  pub(crate) fn encode_seq_header(&self, w: &mut BitWriter) {
    w.align();
    self.encode_parse_params(w);
    w.put_vc2_ue(self.base_vf as u32);
    self.encode_source_params(w);
    w.put_vc2_ue(self.cfg.interlaced as u32); // frames or fields coding
  }

  /// 12.2 - picture_header(), just the picture number.
  pub(crate) fn encode_picture_header(&self, w: &mut BitWriter) {
    w.align();
    w.put_bits32(self.picture_number);
  }

  /// 12.4.5.2 - slice_parameters()
  fn encode_slice_params(&self, w: &mut BitWriter) {
    w.put_vc2_ue(self.num_x as u32);
    w.put_vc2_ue(self.num_y as u32);
    w.put_vc2_ue(self.prefix_bytes as u32);
    w.put_vc2_ue(self.size_scaler as u32);
  }

  /// 12.4.5.3 - quant_matrix()
  fn encode_quant_matrix(&self, w: &mut BitWriter) {
    w.put_bits(1, self.custom_quant_matrix as u32);
    if self.custom_quant_matrix {
      w.put_vc2_ue(self.quant[0][0] as u32);
      for level in 0..self.cfg.wavelet_depth {
        w.put_vc2_ue(self.quant[level][1] as u32);
        w.put_vc2_ue(self.quant[level][2] as u32);
        w.put_vc2_ue(self.quant[level][3] as u32);
      }
    }
  }

  /// 12.4 - transform_parameters()
  pub(crate) fn encode_transform_params(&self, w: &mut BitWriter) {
    w.put_vc2_ue(self.cfg.wavelet.index() as u32);
    w.put_vc2_ue(self.cfg.wavelet_depth as u32);

    if self.ver_major >= 3 {
      // extended_transform_parameters
      w.put_bits(1, 0); // asym_transform_index_flag
      w.put_bits(1, 0); // asym_transform_flag
    }

    self.encode_slice_params(w);
    self.encode_quant_matrix(w);
  }

  /// 12.3 - wavelet_transform(): the transform parameters padded out to the
  /// byte boundary the slice data starts at.
  pub(crate) fn encode_wavelet_transform(&self, w: &mut BitWriter) {
    self.encode_transform_params(w);
    w.align();
  }

  /// 14.2 - fragment_parse(). The offsets are only present once the
  /// fragment actually carries slices; the slice-count-zero form carries
  /// the transform parameters instead.
  pub(crate) fn encode_fragment_header(
    &self,
    w: &mut BitWriter,
    data_length: u16,
    slice_count: u16,
    x_offset: u16,
    y_offset: u16,
  ) {
    w.align();
    w.put_bits32(self.picture_number);
    w.put_bits(16, data_length as u32);
    w.put_bits(16, slice_count as u32);
    if slice_count > 0 {
      w.put_bits(16, x_offset as u32);
      w.put_bits(16, y_offset as u32);
    }
  }
}
