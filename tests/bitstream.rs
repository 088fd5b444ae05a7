// End-to-end checks on emitted streams: parse-info chains, header fields,
// slice framing and budgets, fragmented and interlaced output.

mod common;

use common::*;
use tinyvc2::{EncoderConfig, PixelFormat, Vc2Encoder, WaveletType, ENCODER_IDENT};

#[test]
fn smallest_still_frame() {
  let frame = gradient_frame(PixelFormat::Yuv420p, 176, 120);
  let mut cfg = EncoderConfig::new(176, 120, PixelFormat::Yuv420p);
  cfg.time_base_num = 1001;
  cfg.time_base_den = 15000;

  let mut enc = Vc2Encoder::new(cfg).unwrap();
  let packets = enc.encode_picture(&frame.as_band()).unwrap();
  assert_eq!(packets.len(), 1);
  let stream = &packets[0];
  assert!(stream.len() < 750_000);

  let units = parse_units(stream);
  let pcodes: Vec<u8> = units.iter().map(|u| u.pcode).collect();
  assert_eq!(pcodes, [PCODE_SEQ_HEADER, PCODE_PICTURE_HQ, PCODE_END_SEQ]);

  // QSIF525 matches the base format table, so the header is the strict form
  let mut r = BitReader::at(stream, units[0].offset + 13);
  let sh = parse_seq_header(&mut r);
  assert_eq!(sh.major, 2);
  assert_eq!(sh.profile, 3);
  assert_eq!(sh.base_vf, 1);
  assert_eq!(sh.level, 1);
  assert_eq!(sh.picture_coding_mode, 0);

  // Picture header and transform parameters
  let mut r = BitReader::at(stream, units[1].offset + 13);
  let picture_number = r.read_bits(32);
  assert_eq!(picture_number, 0);
  let tp = parse_transform_params(&mut r, sh.major);
  assert_eq!(tp.wavelet_idx, 4); // Haar with shift
  assert_eq!(tp.depth, 4);
  assert_eq!((tp.num_x, tp.num_y), (6, 8));
  assert_eq!(tp.prefix_bytes, 0);
  assert!(tp.size_scaler.is_power_of_two());
  assert!(!tp.custom_qm);

  // The slice array fills the gap up to END_SEQ exactly
  r.align();
  let mut pos = r.byte_pos();
  for _ in 0..tp.num_x * tp.num_y {
    let (size, _) = walk_slice(stream, pos, &tp);
    pos += size;
  }
  assert_eq!(pos, units[2].offset);
}

#[test]
fn identical_runs_and_thread_counts_are_byte_equal() {
  let frame = gradient_frame(PixelFormat::Yuv420p, 176, 120);
  let mut reference = None;
  for threads in [1usize, 4] {
    let mut cfg = EncoderConfig::new(176, 120, PixelFormat::Yuv420p);
    cfg.time_base_num = 1001;
    cfg.time_base_den = 15000;
    cfg.threads = threads;
    let mut enc = Vc2Encoder::new(cfg).unwrap();
    let packets = enc.encode_picture(&frame.as_band()).unwrap();
    match &reference {
      None => reference = Some(packets),
      Some(r) => assert_eq!(r, &packets, "threads={}", threads),
    }
  }
}

#[test]
fn hd_slices_respect_the_ceiling() {
  let frame = gradient_frame(PixelFormat::Yuv422p10, 1920, 1080);
  let mut cfg = EncoderConfig::new(1920, 1080, PixelFormat::Yuv422p10);
  cfg.time_base_num = 1;
  cfg.time_base_den = 50;
  cfg.bit_rate = 300_000_000;
  cfg.wavelet = WaveletType::LeGall5_3;

  let mut enc = Vc2Encoder::new(cfg).unwrap();
  let packets = enc.encode_picture(&frame.as_band()).unwrap();
  let stream = &packets[0];

  let units = parse_units(stream);
  let mut r = BitReader::at(stream, units[0].offset + 13);
  let sh = parse_seq_header(&mut r);
  assert_eq!(sh.base_vf, 14); // HD1080P-50

  let mut r = BitReader::at(stream, units[1].offset + 13);
  r.read_bits(32);
  let tp = parse_transform_params(&mut r, sh.major);
  assert_eq!((tp.num_x, tp.num_y), (60, 68));

  // Every slice stays under what a network packet can carry, and the
  // whole array is within the frame budget
  let frame_budget = 300_000_000 / 50 / 8;
  r.align();
  let mut pos = r.byte_pos();
  let mut total = 0usize;
  for _ in 0..tp.num_x * tp.num_y {
    let (size, _) = walk_slice(stream, pos, &tp);
    assert!(size <= 1440 - 25 - 16, "slice of {} bytes", size);
    pos += size;
    total += size;
  }
  assert_eq!(pos, units[2].offset);
  assert!(total <= frame_budget);
}

#[test]
fn constant_quantiser_fixes_every_slice() {
  let frame = gradient_frame(PixelFormat::Yuv420p, 352, 288);

  let mut cfg = EncoderConfig::new(352, 288, PixelFormat::Yuv420p);
  cfg.const_quant = Some(25);
  let mut enc = Vc2Encoder::new(cfg.clone()).unwrap();
  let packets = enc.encode_picture(&frame.as_band()).unwrap();
  let stream = &packets[0];

  let units = parse_units(stream);
  let mut r = BitReader::at(stream, units[1].offset + 13);
  r.read_bits(32);
  let tp = parse_transform_params(&mut r, 2);
  r.align();

  let mut pos = r.byte_pos();
  let mut sizes = Vec::new();
  for _ in 0..tp.num_x * tp.num_y {
    let (size, quant) = walk_slice(stream, pos, &tp);
    assert_eq!(quant, 25);
    sizes.push(size);
    pos += size;
  }

  // A second encoder over the same input reproduces the stream exactly
  let mut enc2 = Vc2Encoder::new(cfg).unwrap();
  assert_eq!(&enc2.encode_picture(&frame.as_band()).unwrap()[0], stream);

  // And the fragmented encode of the same picture carries byte-identical
  // slices, since a fixed quantiser makes sizing independent of batching
  let mut cfg = EncoderConfig::new(352, 288, PixelFormat::Yuv420p);
  cfg.const_quant = Some(25);
  cfg.fragment_size = Some(1);
  let mut enc = Vc2Encoder::new(cfg).unwrap();
  let mut fragmented = Vec::new();
  let mut pos_y = 0;
  while pos_y < frame.height {
    let rows = 64.min(frame.height - pos_y);
    if let Some(packet) = enc.encode_band(&frame.band(pos_y, rows)).unwrap() {
      fragmented.extend_from_slice(&packet);
    }
    pos_y += rows;
  }

  let frag_sizes: Vec<usize> = parse_units(&fragmented)
    .iter()
    .filter(|u| u.pcode == PCODE_FRAGMENT_HQ)
    .filter_map(|u| {
      let slice_count = be16(&fragmented[u.offset + 13 + 6..]);
      (slice_count > 0).then(|| be16(&fragmented[u.offset + 13 + 4..]) as usize)
    })
    .collect();
  assert_eq!(frag_sizes, sizes);
}

#[test]
fn depth_five_minimal_slices_and_custom_matrix() {
  // 64x64 4:4:4 at depth 5 with 32x32 slices: every sub-band rectangle at
  // the deepest level is a single coefficient, and the default matrix no
  // longer exists at this depth so a custom one has to be transmitted
  let frame = gradient_frame(PixelFormat::Yuv444p, 64, 64);
  let mut cfg = EncoderConfig::new(64, 64, PixelFormat::Yuv444p);
  cfg.wavelet_depth = 5;
  cfg.slice_width = 32;
  cfg.slice_height = 32;
  cfg.wavelet = WaveletType::Dd9_7;

  let mut enc = Vc2Encoder::new(cfg).unwrap();
  let packets = enc.encode_picture(&frame.as_band()).unwrap();
  let stream = &packets[0];

  let units = parse_units(stream);
  let mut r = BitReader::at(stream, units[1].offset + 13);
  r.read_bits(32);
  let tp = parse_transform_params(&mut r, 2);
  assert_eq!(tp.wavelet_idx, 0);
  assert_eq!(tp.depth, 5);
  assert_eq!((tp.num_x, tp.num_y), (2, 2));
  assert!(tp.custom_qm);

  r.align();
  let mut pos = r.byte_pos();
  for _ in 0..4 {
    let (size, _) = walk_slice(stream, pos, &tp);
    pos += size;
  }
  assert_eq!(pos, units[2].offset);
}

#[test]
fn fragmented_stream_structure() {
  let frame = gradient_frame(PixelFormat::Yuv420p, 352, 288);
  let mut cfg = EncoderConfig::new(352, 288, PixelFormat::Yuv420p);
  cfg.fragment_size = Some(1);

  let mut enc = Vc2Encoder::new(cfg).unwrap();
  let (num_x, num_y) = enc.num_slices();

  let mut packets = Vec::new();
  let mut pos_y = 0;
  while pos_y < frame.height {
    let rows = 64.min(frame.height - pos_y);
    if let Some(packet) = enc.encode_band(&frame.band(pos_y, rows)).unwrap() {
      packets.push(packet);
    }
    pos_y += rows;
  }
  assert!(packets.len() > 1, "expected streaming output");

  let stream: Vec<u8> = packets.concat();
  let units = parse_units(&stream);

  // Opening: sequence header, encoder ident, parameter fragment
  assert_eq!(units[0].pcode, PCODE_SEQ_HEADER);
  assert_eq!(units[1].pcode, PCODE_AUX);
  let aux = &stream[units[1].offset + 13..units[2].offset];
  assert_eq!(aux, [ENCODER_IDENT.as_bytes(), &[0u8]].concat().as_slice());

  assert_eq!(units[2].pcode, PCODE_FRAGMENT_HQ);
  assert_eq!(be16(&stream[units[2].offset + 13 + 6..]), 0); // no slices yet
  let mut r = BitReader::at(&stream, units[2].offset + 13 + 8);
  let tp = parse_transform_params(&mut r, 3);
  assert_eq!((tp.num_x as usize, tp.num_y as usize), (num_x, num_y));

  // Every further unit is one slice carried by one fragment, in raster
  // order, with an honest data length
  let mut expected = (0usize, 0usize); // (x, y)
  let mut slices = 0;
  for u in &units[3..units.len() - 1] {
    assert_eq!(u.pcode, PCODE_FRAGMENT_HQ);
    let base = u.offset + 13;
    assert_eq!(be32(&stream[base..]), 0, "picture number");
    let data_length = be16(&stream[base + 4..]) as usize;
    assert_eq!(be16(&stream[base + 6..]), 1, "slice count");
    let x = be16(&stream[base + 8..]) as usize;
    let y = be16(&stream[base + 10..]) as usize;
    assert_eq!((x, y), expected);
    expected = if x + 1 == num_x { (0, y + 1) } else { (x + 1, y) };

    let (size, _) = walk_slice(&stream, base + 12, &tp);
    assert_eq!(size, data_length);
    slices += 1;
  }
  assert_eq!(slices, num_x * num_y);
}

#[test]
fn interlaced_frame_yields_two_chained_pictures() {
  let frame = gradient_frame(PixelFormat::Yuv422p10, 352, 288);
  let mut cfg = EncoderConfig::new(352, 288, PixelFormat::Yuv422p10);
  cfg.interlaced = true;

  let mut enc = Vc2Encoder::new(cfg).unwrap();
  let packets = enc.encode_picture(&frame.as_band()).unwrap();
  assert_eq!(packets.len(), 2);

  // First field: two data units, no end-of-sequence yet; the open forward
  // link points exactly at the packet end, where the next packet continues
  let first = &packets[0];
  assert_eq!(&first[..4], b"BBCD");
  assert_eq!(first[4], PCODE_SEQ_HEADER);
  let second_unit = be32(&first[5..]) as usize;
  assert_eq!(first[second_unit + 4], PCODE_PICTURE_HQ);
  assert_eq!(second_unit + be32(&first[second_unit + 5..]) as usize, first.len());

  // The concatenation is one continuous chain ending in END_SEQ
  let stream: Vec<u8> = packets.concat();
  let units = parse_units(&stream);
  let pcodes: Vec<u8> = units.iter().map(|u| u.pcode).collect();
  assert_eq!(
    pcodes,
    [
      PCODE_SEQ_HEADER,
      PCODE_PICTURE_HQ,
      PCODE_SEQ_HEADER,
      PCODE_PICTURE_HQ,
      PCODE_END_SEQ
    ]
  );

  // 352x288 interlaced matches no base format, so the source parameters
  // are spelled out: frame size, interlace and fields coding
  let mut r = BitReader::at(&stream, units[0].offset + 13);
  let sh = parse_seq_header(&mut r);
  assert_eq!(sh.base_vf, 0);
  assert_eq!(sh.picture_coding_mode, 1);

  // Field pictures are numbered consecutively
  let first_num = be32(&stream[units[1].offset + 13..]);
  let second_num = be32(&stream[units[3].offset + 13..]);
  assert_eq!((first_num, second_num), (0, 1));
}

#[test]
fn consecutive_pictures_number_sequentially() {
  let frame = gradient_frame(PixelFormat::Yuv420p, 176, 144);
  let mut cfg = EncoderConfig::new(176, 144, PixelFormat::Yuv420p);
  cfg.time_base_num = 2;
  cfg.time_base_den = 25;

  let mut enc = Vc2Encoder::new(cfg).unwrap();
  let mut stream = Vec::new();
  for _ in 0..3 {
    for packet in enc.encode_picture(&frame.as_band()).unwrap() {
      stream.extend_from_slice(&packet);
    }
  }

  // Three self-contained sequences, chained end to end
  let units = parse_units(&stream);
  let pcodes: Vec<u8> = units.iter().map(|u| u.pcode).collect();
  assert_eq!(
    pcodes,
    [
      PCODE_SEQ_HEADER, PCODE_PICTURE_HQ, PCODE_END_SEQ,
      PCODE_SEQ_HEADER, PCODE_PICTURE_HQ, PCODE_END_SEQ,
      PCODE_SEQ_HEADER, PCODE_PICTURE_HQ, PCODE_END_SEQ,
    ]
  );
  for (i, u) in units.iter().enumerate() {
    if u.pcode == PCODE_PICTURE_HQ {
      assert_eq!(be32(&stream[u.offset + 13..]), (i / 3) as u32);
    }
  }
}

#[test]
fn fragmented_determinism_across_threads() {
  let frame = gradient_frame(PixelFormat::Yuv420p, 352, 288);
  let mut outputs = Vec::new();
  for threads in [1usize, 8] {
    let mut cfg = EncoderConfig::new(352, 288, PixelFormat::Yuv420p);
    cfg.fragment_size = Some(1);
    cfg.threads = threads;
    let mut enc = Vc2Encoder::new(cfg).unwrap();
    let mut stream = Vec::new();
    let mut pos_y = 0;
    while pos_y < frame.height {
      let rows = 48.min(frame.height - pos_y);
      if let Some(packet) = enc.encode_band(&frame.band(pos_y, rows)).unwrap() {
        stream.extend_from_slice(&packet);
      }
      pos_y += rows;
    }
    outputs.push(stream);
  }
  assert_eq!(outputs[0], outputs[1]);
}
