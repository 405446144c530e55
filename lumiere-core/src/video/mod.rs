// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `video` module provides primitives for working with decoded video.

/// Decoded sample type. Samples of 8 and 10 bits per component are stored in the low bits.
pub type Sample = u16;

/// The chroma sub-sampling of a picture.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChromaFormat {
    /// Monochrome, no chroma planes.
    Monochrome,
    /// 4:2:0, chroma planes are half the luma plane in each dimension.
    Yuv420,
}

impl ChromaFormat {
    /// The number of sample planes for this chroma format.
    pub fn num_planes(&self) -> usize {
        match self {
            ChromaFormat::Monochrome => 1,
            ChromaFormat::Yuv420 => 3,
        }
    }
}

/// The coding type of a picture.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PictureType {
    /// Intra-coded picture.
    I,
    /// Predicted picture, single hypothesis per block.
    P,
    /// Bi-directionally predicted picture.
    B,
    /// Predicted picture allowing dual forward hypotheses.
    F,
    /// Background (scene) picture.
    G,
    /// Background-predicted picture.
    S,
}

impl PictureType {
    /// Returns true if the picture carries no inter prediction.
    pub fn is_intra(&self) -> bool {
        matches!(self, PictureType::I | PictureType::G)
    }
}

/// A single plane of samples with an explicit stride.
///
/// The stride may exceed the width. Rows are addressed as `data[y * stride .. y * stride + width]`.
#[derive(Clone, Debug)]
pub struct Plane {
    data: Vec<Sample>,
    stride: usize,
    width: usize,
    height: usize,
}

impl Plane {
    /// Allocate a plane of `width` x `height` samples with the given stride, zero filled.
    ///
    /// Returns `None` when the allocation would overflow.
    pub fn new(width: usize, height: usize, stride: usize) -> Option<Plane> {
        assert!(stride >= width);
        let len = stride.checked_mul(height)?;
        Some(Plane { data: vec![0; len], stride, width, height })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Get the full sample buffer, including any stride padding.
    pub fn samples(&self) -> &[Sample] {
        &self.data
    }

    /// Get the full mutable sample buffer, including any stride padding.
    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.data
    }

    /// Get one row of visible samples.
    pub fn row(&self, y: usize) -> &[Sample] {
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    /// Get one mutable row of visible samples.
    pub fn row_mut(&mut self, y: usize) -> &mut [Sample] {
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    /// Get a single sample.
    #[inline(always)]
    pub fn sample(&self, x: usize, y: usize) -> Sample {
        self.data[y * self.stride + x]
    }

    /// Fill the visible region with a single value.
    pub fn fill(&mut self, value: Sample) {
        for y in 0..self.height {
            let start = y * self.stride;
            self.data[start..start + self.width].fill(value);
        }
    }
}

/// A decoded picture handed to the application.
#[derive(Clone, Debug)]
pub struct VideoPicture {
    /// Sample planes: Y, followed by U and V when chroma is present.
    pub planes: Vec<Plane>,
    /// Chroma sub-sampling of the picture.
    pub chroma_format: ChromaFormat,
    /// Bits per decoded sample (8 or 10).
    pub bit_depth: u32,
    /// Picture order count, the display-order identifier.
    pub poc: i32,
    /// Coding type of the picture.
    pub picture_type: PictureType,
    /// True when the picture was emitted despite a decoding error, to preserve output ordering.
    pub decode_error: bool,
    /// Presentation timestamp from the packet that carried this picture.
    pub pts: i64,
    /// Decode timestamp from the packet that carried this picture.
    pub dts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_plane_rows() {
        let mut plane = Plane::new(4, 2, 8).unwrap();
        plane.row_mut(1).copy_from_slice(&[1, 2, 3, 4]);

        assert_eq!(plane.row(0), &[0, 0, 0, 0]);
        assert_eq!(plane.row(1), &[1, 2, 3, 4]);
        assert_eq!(plane.sample(2, 1), 3);
        assert_eq!(plane.samples().len(), 16);
    }

    #[test]
    fn verify_plane_fill() {
        let mut plane = Plane::new(2, 2, 4).unwrap();
        plane.fill(9);
        assert_eq!(plane.row(0), &[9, 9]);
        // Stride padding is untouched.
        assert_eq!(plane.samples()[2], 0);
    }
}
