// Copyright (c) 2025, The tinyvc2 contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at https://opensource.org/license/bsd-2-clause

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use tinyvc2::y4m::Y4MReader;
use tinyvc2::{EncoderConfig, QuantMatrix, Vc2Encoder, WaveletType};

#[derive(Parser)]
#[command(about = "Encode y4m video to a SMPTE VC-2 HQ stream")]
struct Args {
  /// Input video (.y4m)
  input: PathBuf,
  /// Output stream (.drc/.vc2)
  output: PathBuf,

  /// Target bit rate in bits per second
  #[arg(long, default_value_t = 600_000_000)]
  bit_rate: u64,

  /// Max undershoot in percent
  #[arg(long, default_value_t = 5.0)]
  tolerance: f64,

  /// Slice width in luma samples
  #[arg(long, default_value_t = 32)]
  slice_width: usize,

  /// Slice height in luma samples
  #[arg(long, default_value_t = 16)]
  slice_height: usize,

  /// Transform depth
  #[arg(long, default_value_t = 4)]
  wavelet_depth: usize,

  /// Transform type: 9_7, 5_3, haar or haar_noshift
  #[arg(long, default_value = "haar", value_parser = parse_wavelet)]
  wavelet_type: WaveletType,

  /// Quantisation matrix: default, color or flat
  #[arg(long, default_value = "default", value_parser = parse_qm)]
  qm: QuantMatrix,

  /// Emit fragments of this many slices instead of whole pictures
  #[arg(long)]
  fragment_size: Option<usize>,

  /// Rows to feed per call in fragmented mode
  #[arg(long, default_value_t = 64)]
  band_height: usize,

  /// Fixed quantiser, disables rate control
  #[arg(long)]
  const_quant: Option<u8>,

  /// Worker threads (0 = machine width)
  #[arg(long, default_value_t = 0)]
  threads: usize,

  /// Stop after this many frames
  #[arg(long)]
  frames: Option<usize>,
}

fn parse_wavelet(s: &str) -> Result<WaveletType, String> {
  match s {
    "9_7" => Ok(WaveletType::Dd9_7),
    "5_3" => Ok(WaveletType::LeGall5_3),
    "haar_noshift" => Ok(WaveletType::Haar),
    "haar" => Ok(WaveletType::HaarShift),
    _ => Err(format!("unknown wavelet type '{}'", s)),
  }
}

fn parse_qm(s: &str) -> Result<QuantMatrix, String> {
  match s {
    "default" => Ok(QuantMatrix::Default),
    "color" => Ok(QuantMatrix::Color),
    "flat" => Ok(QuantMatrix::Flat),
    _ => Err(format!("unknown quantisation matrix '{}'", s)),
  }
}

fn run(args: &Args) -> tinyvc2::Result<(usize, u64)> {
  let mut y4m = Y4MReader::new(BufReader::new(File::open(&args.input)?))?;
  let mut out = BufWriter::new(File::create(&args.output)?);

  let mut cfg = EncoderConfig::new(y4m.width, y4m.height, y4m.pix_fmt);
  // y4m carries frames per second, the encoder wants seconds per frame
  cfg.time_base_num = y4m.fps.1;
  cfg.time_base_den = y4m.fps.0;
  cfg.interlaced = y4m.interlaced;
  cfg.bit_rate = args.bit_rate;
  cfg.tolerance = args.tolerance;
  cfg.slice_width = args.slice_width;
  cfg.slice_height = args.slice_height;
  cfg.wavelet_depth = args.wavelet_depth;
  cfg.wavelet = args.wavelet_type;
  cfg.qm = args.qm;
  cfg.fragment_size = args.fragment_size;
  cfg.const_quant = args.const_quant;
  cfg.threads = args.threads;

  let mut enc = Vc2Encoder::new(cfg)?;

  let mut frames = 0usize;
  let mut bytes = 0u64;
  while args.frames.map_or(true, |limit| frames < limit) {
    let Some(frame) = y4m.read_frame()? else {
      break;
    };

    if args.fragment_size.is_some() {
      // Feed the picture in bands, writing each packet as it appears
      let mut pos_y = 0;
      while pos_y < frame.height {
        let rows = args.band_height.min(frame.height - pos_y);
        if let Some(packet) = enc.encode_band(&frame.band(pos_y, rows))? {
          bytes += packet.len() as u64;
          out.write_all(&packet)?;
        }
        pos_y += rows;
      }
    } else {
      for packet in enc.encode_picture(&frame.as_band())? {
        bytes += packet.len() as u64;
        out.write_all(&packet)?;
      }
    }
    frames += 1;
  }

  out.flush()?;
  return Ok((frames, bytes));
}

fn main() -> ExitCode {
  env_logger::init();
  let args = Args::parse();

  match run(&args) {
    Ok((frames, bytes)) => {
      eprintln!("{} frames, {} bytes", frames, bytes);
      ExitCode::SUCCESS
    }
    Err(e) => {
      eprintln!("error: {}", e);
      ExitCode::FAILURE
    }
  }
}
