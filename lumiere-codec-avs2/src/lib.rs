// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all Lumiere crates. Please see the workspace Cargo.toml for
// their justification.
#![allow(clippy::comparison_chain)]
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]

//! An AVS2 (IEEE 1857.4) video decoder for Project Lumiere.
//!
//! The decoder implements the hybrid block-based coding core of the standard: context-adaptive
//! binary arithmetic decoding, the recursive CU/PU/TU partitioning, intra prediction with 33
//! modes, sub-sample motion compensation with dual-hypothesis modes, the inverse quantization
//! and transform chain including the non-square and wavelet-extended geometries, and the
//! in-loop deblocking, sample-adaptive-offset, and adaptive-loop filters.
//!
//! Frames decode on a two-stage pipeline (entropy parse and pixel reconstruction) with
//! LCU-row-granular progress signaling, so several frames may decode concurrently in a wavefront
//! across their reference dependencies.

use lumiere_core::codecs::registry::{
    RegisterableVideoDecoder, SupportedVideoCodec,
};
use lumiere_core::codecs::well_known::CODEC_ID_AVS2;
use lumiere_core::codecs::{VideoCodecParameters, VideoDecoder, VideoDecoderOptions};
use lumiere_core::errors::Result;
use lumiere_core::support_video_codec;

mod aec;
mod alf;
mod common;
mod cu;
mod deblock;
mod decoder;
mod frame;
mod headers;
mod intra;
mod mc;
mod mvpred;
mod neighbor;
mod recon;
mod sao;
mod scan;
mod transform;

pub use common::{SequenceParams, ToolFlags};
pub use decoder::Avs2Decoder;

impl RegisterableVideoDecoder for Avs2Decoder {
    fn try_registry_new(
        params: &VideoCodecParameters,
        opts: &VideoDecoderOptions,
    ) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(Avs2Decoder::try_new(params, opts)?))
    }

    fn supported_codecs() -> &'static [SupportedVideoCodec] {
        &[support_video_codec!(CODEC_ID_AVS2, "avs2", "Audio Video Standard 2 (IEEE 1857.4)")]
    }
}
