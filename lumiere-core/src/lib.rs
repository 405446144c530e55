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

//! Lumiere is a video decoding framework written in pure Rust.
//!
//! The `lumiere-core` crate contains the shared foundation of Project Lumiere: the common error
//! type, bitstream reading, compressed packets, planar picture buffers, and the traits a video
//! decoder implements to be usable by any Lumiere-based application.
//!
//! This crate provides no decoders of its own. Decoders, such as the AVS2 decoder in
//! `lumiere-codec-avs2`, build on the primitives defined here.

pub mod codecs;
pub mod errors;
pub mod formats;
pub mod io;
pub mod util;
pub mod video;
