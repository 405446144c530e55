// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry for codecs to support lookup and instantiation of decoders dynamically at runtime.

use std::collections::HashMap;

use crate::codecs::{CodecInfo, VideoCodecId, VideoCodecParameters, VideoDecoder};
use crate::codecs::VideoDecoderOptions;
use crate::errors::{unsupported_error, Result};

/// Description of a supported video codec.
#[derive(Copy, Clone)]
pub struct SupportedVideoCodec {
    pub id: VideoCodecId,
    pub info: CodecInfo,
}

/// To support registration in a codec registry, a `VideoDecoder` must implement the
/// `RegisterableVideoDecoder` trait.
pub trait RegisterableVideoDecoder: VideoDecoder {
    fn try_registry_new(
        params: &VideoCodecParameters,
        opts: &VideoDecoderOptions,
    ) -> Result<Box<dyn VideoDecoder>>
    where
        Self: Sized;

    /// Get a list of video codecs supported by this decoder.
    fn supported_codecs() -> &'static [SupportedVideoCodec];
}

/// `VideoDecoder` factory function. Creates a boxed `VideoDecoder`.
pub type VideoDecoderFactoryFn =
    fn(&VideoCodecParameters, &VideoDecoderOptions) -> Result<Box<dyn VideoDecoder>>;

/// Registration details of a video decoder for a particular video codec.
pub struct RegisteredVideoDecoder {
    /// Video codec details.
    pub codec: SupportedVideoCodec,
    /// Factory function to instantiate the video decoder.
    pub factory: VideoDecoderFactoryFn,
}

/// A `CodecRegistry` allows the registration of codecs, and provides a method to instantiate a
/// decoder for a given codec ID.
#[derive(Default)]
pub struct CodecRegistry {
    video: HashMap<VideoCodecId, RegisteredVideoDecoder>,
}

impl CodecRegistry {
    /// Instantiate a new `CodecRegistry`.
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers all codecs supported by a decoder. If a supported codec was previously
    /// registered by another decoder, the new registration replaces it.
    pub fn register_video_decoder<D: RegisterableVideoDecoder>(&mut self) {
        for codec in D::supported_codecs() {
            let registration =
                RegisteredVideoDecoder { codec: *codec, factory: D::try_registry_new };
            self.video.insert(codec.id, registration);
        }
    }

    /// Searches the registry for a decoder that supports the codec ID.
    pub fn get_video_decoder(&self, id: VideoCodecId) -> Option<&RegisteredVideoDecoder> {
        self.video.get(&id)
    }

    /// Instantiate a decoder for the codec stated in the codec parameters.
    pub fn make_video_decoder(
        &self,
        params: &VideoCodecParameters,
        opts: &VideoDecoderOptions,
    ) -> Result<Box<dyn VideoDecoder>> {
        match self.video.get(&params.codec) {
            Some(registration) => (registration.factory)(params, opts),
            None => unsupported_error("core (registry): no decoder for codec"),
        }
    }
}

/// Convenience macro for declaring a `SupportedVideoCodec`.
#[macro_export]
macro_rules! support_video_codec {
    ($id:expr, $short_name:expr, $long_name:expr) => {
        lumiere_core::codecs::registry::SupportedVideoCodec {
            id: $id,
            info: lumiere_core::codecs::CodecInfo {
                short_name: $short_name,
                long_name: $long_name,
            },
        }
    };
}
