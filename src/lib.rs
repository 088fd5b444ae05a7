// Copyright (c) 2025, The tinyvc2 contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at https://opensource.org/license/bsd-2-clause

//! A SMPTE VC-2 (Dirac) encoder, HQ profile: intra-only wavelet coding with
//! per-slice rate control, for low-latency contribution streams. Supports
//! whole-picture output and fragmented output, where partial pictures leave
//! the encoder before the full frame has arrived.

pub mod bitcode;
pub mod config;
pub mod dwt;
pub mod encoder;
pub mod error;
pub mod executor;
pub mod frame;
pub mod headers;
pub mod quant;
pub mod rate;
pub mod slice;
pub mod y4m;

pub use config::{EncoderConfig, PixelFormat, QuantMatrix, WaveletType};
pub use encoder::{Vc2Encoder, ENCODER_IDENT};
pub use error::{Error, Result};
pub use frame::{Frame, FrameBand};
