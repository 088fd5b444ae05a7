use std::io::prelude::*;
use std::io::ErrorKind;

use byteorder::ReadBytesExt;

use crate::config::PixelFormat;
use crate::error::{Error, Result};
use crate::frame::Frame;

const Y4M_FILE_MAGIC: &str = "YUV4MPEG2 ";
const Y4M_FRAME_MAGIC: &str = "FRAME";

pub struct Y4MReader<R> {
  inner: R,
  pub width: usize,
  pub height: usize,
  pub pix_fmt: PixelFormat,
  /// Frames per second as a rational.
  pub fps: (u32, u32),
  pub interlaced: bool,
}

fn read_decimal<R: Read>(r: &mut R) -> Result<(usize, u8)> {
  let mut v = 0usize;
  loop {
    let byte = r.read_u8()?;
    match byte {
      b'0'..=b'9' => {
        v = 10 * v + (byte - b'0') as usize;
      }
      _ => {
        // Non-digit, stop parsing; the caller usually cares whether it was
        // a separator or the end of the parameter line
        return Ok((v, byte));
      }
    }
  }
}

// Skip forward until we find a whitespace character, returning it
fn find_whitespace<R: Read>(r: &mut R) -> Result<u8> {
  loop {
    match r.read_u8()? {
      b @ (b' ' | b'\t' | b'\n') => return Ok(b),
      _ => continue,
    }
  }
}

// Read a parameter token up to the next whitespace
fn read_token<R: Read>(r: &mut R) -> Result<(String, u8)> {
  let mut s = String::new();
  loop {
    match r.read_u8()? {
      b @ (b' ' | b'\t' | b'\n') => return Ok((s, b)),
      b => s.push(b as char),
    }
  }
}

fn pix_fmt_for_tag(tag: &str) -> Option<PixelFormat> {
  match tag {
    "420" | "420jpeg" | "420mpeg2" | "420paldv" => Some(PixelFormat::Yuv420p),
    "422" => Some(PixelFormat::Yuv422p),
    "444" => Some(PixelFormat::Yuv444p),
    "420p10" => Some(PixelFormat::Yuv420p10),
    "422p10" => Some(PixelFormat::Yuv422p10),
    "444p10" => Some(PixelFormat::Yuv444p10),
    "420p12" => Some(PixelFormat::Yuv420p12),
    "422p12" => Some(PixelFormat::Yuv422p12),
    "444p12" => Some(PixelFormat::Yuv444p12),
    _ => None,
  }
}

impl<R: Read> Y4MReader<R> {
  pub fn new(mut inner: R) -> Result<Self> {
    let mut file_magic = [0u8; 10];
    inner.read_exact(&mut file_magic)?;
    if file_magic != Y4M_FILE_MAGIC.as_bytes() {
      return Err(Error::InvalidInputData("not a y4m file".into()));
    }

    let mut width = 0;
    let mut height = 0;
    let mut pix_fmt = PixelFormat::Yuv420p;
    let mut fps = (25, 1);
    let mut interlaced = false;

    // Parse the parameter line
    loop {
      let sep = match inner.read_u8()? {
        b'\n' => break,
        b' ' | b'\t' => continue,
        b'W' => {
          let (v, sep) = read_decimal(&mut inner)?;
          width = v;
          sep
        }
        b'H' => {
          let (v, sep) = read_decimal(&mut inner)?;
          height = v;
          sep
        }
        b'F' => {
          let (num, sep) = read_decimal(&mut inner)?;
          if sep != b':' {
            return Err(Error::InvalidInputData("malformed F parameter".into()));
          }
          let (den, sep) = read_decimal(&mut inner)?;
          fps = (num as u32, den as u32);
          sep
        }
        b'I' => {
          let kind = inner.read_u8()?;
          interlaced = kind == b't' || kind == b'b';
          find_whitespace(&mut inner)?
        }
        b'C' => {
          let (tag, sep) = read_token(&mut inner)?;
          pix_fmt = pix_fmt_for_tag(&tag)
            .ok_or_else(|| Error::InvalidInputData(format!("unsupported colourspace C{}", tag)))?;
          sep
        }
        _ => {
          // Parameters we don't interpret, skip to the next separator
          find_whitespace(&mut inner)?
        }
      };
      if sep == b'\n' {
        break;
      }
    }

    if width == 0 || height == 0 {
      return Err(Error::InvalidInputData(format!(
        "invalid y4m size {}x{}", width, height
      )));
    }
    if fps.0 == 0 || fps.1 == 0 {
      return Err(Error::InvalidInputData("invalid y4m frame rate".into()));
    }

    Ok(Y4MReader {
      inner: inner,
      width: width,
      height: height,
      pix_fmt: pix_fmt,
      fps: fps,
      interlaced: interlaced,
    })
  }

  /// Read the next frame, or None at a clean end of stream.
  pub fn read_frame(&mut self) -> Result<Option<Box<Frame>>> {
    // The frame line can carry parameters but they aren't useful to us, so
    // check the magic and skip the rest of the line
    let mut frame_magic = [0u8; 5];
    match self.inner.read_exact(&mut frame_magic) {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
      Err(e) => return Err(e.into()),
    }
    if frame_magic != Y4M_FRAME_MAGIC.as_bytes() {
      return Err(Error::InvalidInputData("invalid frame header".into()));
    }
    while self.inner.read_u8()? != b'\n' {}

    let mut frame = Box::new(Frame::new(self.pix_fmt, self.width, self.height));
    for i in 0..3 {
      self.inner.read_exact(&mut frame.plane_mut(i).data)?;
    }

    return Ok(Some(frame));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn header(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
  }

  #[test]
  fn parses_header_and_frame() {
    let mut data = header("YUV4MPEG2 W4 H2 F30000:1001 Ip A1:1 C422p10\n");
    data.extend_from_slice(b"FRAME\n");
    data.extend_from_slice(&[0u8; (4 * 2 + 2 * 2 * 2) * 2]);

    let mut r = Y4MReader::new(&data[..]).unwrap();
    assert_eq!((r.width, r.height), (4, 2));
    assert_eq!(r.pix_fmt, PixelFormat::Yuv422p10);
    assert_eq!(r.fps, (30000, 1001));
    assert!(!r.interlaced);

    let frame = r.read_frame().unwrap().unwrap();
    assert_eq!(frame.plane(1).width, 2);
    assert!(r.read_frame().unwrap().is_none());
  }

  #[test]
  fn rejects_garbage() {
    assert!(Y4MReader::new(&b"RIFF...."[..]).is_err());
    assert!(Y4MReader::new(&header("YUV4MPEG2 W0 H2\n")[..]).is_err());
    assert!(Y4MReader::new(&header("YUV4MPEG2 W4 H2 Cmono\n")[..]).is_err());
  }
}
