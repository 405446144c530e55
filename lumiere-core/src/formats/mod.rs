// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `formats` module provides the compressed packet type fed to decoders.

/// A `Packet` contains a discrete amount of encoded data for a single elementary stream.
///
/// For the video decoders in Project Lumiere, one packet carries exactly one access unit (one
/// coded picture) with any startcode emulation prevention already removed by the demuxer.
#[derive(Clone, Debug)]
pub struct Packet {
    /// The encoded data.
    pub data: Box<[u8]>,
    /// The presentation timestamp, in stream-defined units.
    pub pts: i64,
    /// The decode timestamp, in stream-defined units.
    pub dts: i64,
}

impl Packet {
    /// Create a new `Packet` from a byte slice and timestamps.
    pub fn new_from_slice(data: &[u8], pts: i64, dts: i64) -> Self {
        Packet { data: data.into(), pts, dts }
    }

    /// Get an immutable slice of the packet data.
    pub fn buf(&self) -> &[u8] {
        &self.data
    }
}
