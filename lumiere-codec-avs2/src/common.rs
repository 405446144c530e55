// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bitflags::bitflags;

use lumiere_core::video::PictureType;

/// Log2 of the minimum coding unit size (8x8).
pub const MIN_CU_SIZE_IN_BIT: u32 = 3;
/// Log2 of the minimum prediction unit size (4x4).
pub const MIN_PU_SIZE_IN_BIT: u32 = 2;
/// Log2 of the largest supported coding unit size (64x64).
pub const MAX_CU_SIZE_IN_BIT: u32 = 6;
/// The largest supported coding unit size in samples.
pub const MAX_CU_SIZE: usize = 1 << MAX_CU_SIZE_IN_BIT;

/// Log2 of an 8x8 block.
pub const B8X8_IN_BIT: u32 = 3;
/// Log2 of a 16x16 block.
pub const B16X16_IN_BIT: u32 = 4;
/// Log2 of a 32x32 block.
pub const B32X32_IN_BIT: u32 = 5;
/// Log2 of a 64x64 block.
pub const B64X64_IN_BIT: u32 = 6;
/// Log2 of a 4x4 block.
pub const B4X4_IN_BIT: u32 = 2;

/// Forward reference slot of a B frame.
pub const B_FWD: i8 = 0;
/// Backward reference slot of a B frame.
pub const B_BWD: i8 = 1;
/// Marker for a missing reference index.
pub const INVALID_REF: i8 = -1;

/// Reference sample margin kept around every reconstructed plane, in luma samples.
pub const FRAME_PAD: usize = 64 + 16;

/// PMVR re-centering window, in quarter samples (3 integer samples).
pub const PMVR_THRESHOLD: i32 = 12;

/// Fixed-point precision of reference-distance scaling.
pub const DIST_SCALE_BITS: i32 = 14;
/// Rounding constant of reference-distance scaling.
pub const DIST_SCALE_HALF: i32 = 1 << (DIST_SCALE_BITS - 1);

/// Number of intra luma prediction modes.
pub const NUM_INTRA_MODE: usize = 33;

/// Maximum number of reference frames per predicted frame.
pub const MAX_REFS: usize = 4;

/// A motion vector in quarter-sample units.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Mv {
    pub x: i16,
    pub y: i16,
}

impl Mv {
    pub const ZERO: Mv = Mv { x: 0, y: 0 };

    pub fn new(x: i16, y: i16) -> Mv {
        Mv { x, y }
    }
}

/// The pair of reference indices of a prediction unit. `INVALID_REF` marks an unused slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RefPair {
    pub r: [i8; 2],
}

impl Default for RefPair {
    fn default() -> Self {
        RefPair { r: [INVALID_REF, INVALID_REF] }
    }
}

impl RefPair {
    pub fn new(first: i8, second: i8) -> RefPair {
        RefPair { r: [first, second] }
    }
}

/// Coding unit prediction mode, including the intra partition refinements.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PredMode {
    Skip = 0,
    Inter2Nx2N = 1,
    Inter2NxN = 2,
    InterNx2N = 3,
    Inter2NxNU = 4,
    Inter2NxND = 5,
    InterNLx2N = 6,
    InterNRx2N = 7,
    Intra2Nx2N = 8,
    IntraNxN = 9,
    Intra2Nxn = 10,
    IntraNx2N = 11,
}

impl PredMode {
    pub fn is_intra(&self) -> bool {
        *self >= PredMode::Intra2Nx2N
    }

    pub fn is_inter(&self) -> bool {
        !self.is_intra()
    }

    pub fn is_skip(&self) -> bool {
        *self == PredMode::Skip
    }

    /// Horizontal PU split (2NxN and its asymmetric variants).
    pub fn is_hor_part(&self) -> bool {
        matches!(self, PredMode::Inter2NxN | PredMode::Inter2NxNU | PredMode::Inter2NxND)
    }

    /// Vertical PU split (Nx2N and its asymmetric variants).
    pub fn is_ver_part(&self) -> bool {
        matches!(self, PredMode::InterNx2N | PredMode::InterNLx2N | PredMode::InterNRx2N)
    }
}

/// Transform unit split mode of a coding unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TuSplit {
    None,
    Hor,
    Ver,
    Cross,
}

/// Prediction direction of a prediction unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PredDir {
    Invalid,
    Fwd,
    Bwd,
    Sym,
    Bid,
    /// Dual-hypothesis forward prediction (F frames).
    Dual,
}

/// Sub-mode of a skip/direct coded CU.
///
/// For B frames the indices select {none, sym, bid, bwd, sym2, fwd}; for P/F frames they select
/// {temporal, dual-1st, dual-2nd, single-1st, single-2nd}. The numeric values match the coded
/// `direct_skip_mode` element.
pub type DirectSkipMode = usize;

/// Temporal derivation (B) or temporal skip (P/F).
pub const DS_NONE: DirectSkipMode = 0;
pub const DS_B_BID: DirectSkipMode = 1;
pub const DS_B_BWD: DirectSkipMode = 2;
pub const DS_B_SYM: DirectSkipMode = 3;
pub const DS_B_FWD: DirectSkipMode = 4;
pub const DS_MAX_NUM: usize = 5;

pub const DS_DUAL_1ST: DirectSkipMode = 1;
pub const DS_DUAL_2ND: DirectSkipMode = 2;
pub const DS_SINGLE_1ST: DirectSkipMode = 3;
pub const DS_SINGLE_2ND: DirectSkipMode = 4;

/// Prediction direction of each B skip/direct sub-mode (indexed by the coded sub-mode).
pub const B_SKIP_PDIR: [PredDir; DS_MAX_NUM] =
    [PredDir::Sym, PredDir::Bid, PredDir::Bwd, PredDir::Sym, PredDir::Fwd];

bitflags! {
    /// Sequence-level tool enable flags.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ToolFlags: u32 {
        /// Weighted quantization matrices.
        const WEIGHTED_QUANT   = 1 << 0;
        /// Non-square transform units for inter partitions.
        const NSQT             = 1 << 1;
        /// Short-distance intra prediction (non-square intra partitions).
        const SDIP             = 1 << 2;
        /// Asymmetric motion partitions.
        const AMP              = 1 << 3;
        /// Multi-hypothesis skip.
        const MHP_SKIP         = 1 << 4;
        /// Weighted skip mode.
        const WSM              = 1 << 5;
        /// Dual-hypothesis prediction for F frames.
        const DHP              = 1 << 6;
        /// Directional multi-hypothesis mode.
        const DMH              = 1 << 7;
        /// Progressive MV resolution.
        const PMVR             = 1 << 8;
        /// Loop filtering across slice boundaries.
        const CROSS_LOOP_FILTER = 1 << 9;
        /// Field coded sequence.
        const FIELD_CODING     = 1 << 10;
        /// Background (scene) reference pictures.
        const BACKGROUND_REF   = 1 << 11;
        /// Secondary transform for small intra blocks.
        const SECONDARY_TRANSFORM = 1 << 12;
        /// Sample adaptive offset.
        const SAO              = 1 << 13;
        /// Adaptive loop filter.
        const ALF              = 1 << 14;
        /// In-loop deblocking filter.
        const LOOP_FILTER      = 1 << 15;
        /// Per-CU delta QP.
        const DELTA_QP         = 1 << 16;
    }
}

/// Immutable per-sequence parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceParams {
    /// Picture width in luma samples.
    pub width: usize,
    /// Picture height in luma samples.
    pub height: usize,
    /// Log2 of the largest coding unit size.
    pub lcu_bits: u32,
    /// Chroma format of the sequence.
    pub chroma_format: lumiere_core::video::ChromaFormat,
    /// Bits per sample used internally while decoding.
    pub sample_bit_depth: u32,
    /// Bits per sample of the output pictures.
    pub output_bit_depth: u32,
    /// Tool enable flags.
    pub tools: ToolFlags,
}

impl SequenceParams {
    pub fn lcu_size(&self) -> usize {
        1 << self.lcu_bits
    }

    pub fn width_in_lcu(&self) -> usize {
        (self.width + self.lcu_size() - 1) >> self.lcu_bits
    }

    pub fn height_in_lcu(&self) -> usize {
        (self.height + self.lcu_size() - 1) >> self.lcu_bits
    }

    pub fn width_in_scu(&self) -> usize {
        self.width >> MIN_CU_SIZE_IN_BIT
    }

    pub fn height_in_scu(&self) -> usize {
        self.height >> MIN_CU_SIZE_IN_BIT
    }

    pub fn width_in_spu(&self) -> usize {
        self.width >> MIN_PU_SIZE_IN_BIT
    }

    pub fn height_in_spu(&self) -> usize {
        self.height >> MIN_PU_SIZE_IN_BIT
    }

    pub fn has_tool(&self, tool: ToolFlags) -> bool {
        self.tools.contains(tool)
    }
}

/// Per-picture parameters filled from the picture header before the core runs.
#[derive(Clone, Debug)]
pub struct PictureParams {
    pub picture_type: PictureType,
    /// Picture order count.
    pub poc: i32,
    /// Base quantization parameter of the picture.
    pub qp: i32,
    /// Whether this picture may be referenced by later pictures.
    pub referenced: bool,
    /// Number of active reference frames.
    pub num_references: usize,
    /// Distance to each reference, `AVS2_DISTANCE_INDEX` wrapped.
    pub dist_refs: [i32; MAX_REFS],
    /// Pre-inverted reference distances in `DIST_SCALE_BITS` fixed point.
    pub dist_scale_refs: [i32; MAX_REFS],
    /// Picture-level SAO enables per component.
    pub sao_enable: [bool; 3],
    /// Picture-level ALF enables per component.
    pub alf_enable: [bool; 3],
    /// Current frame is the top field of a field pair.
    pub top_field: bool,
    /// Per-CU delta QP coding is active for this picture.
    pub delta_qp_enable: bool,
    /// Weighted-quant payload selection (pic_wq_data_index).
    pub wq_data_index: u8,
    /// Weighted-quant parameter mode (wq_param).
    pub wq_param: u8,
    /// Weighted-quant model (wq_model).
    pub wq_model: u8,
}

impl Default for PictureParams {
    fn default() -> Self {
        PictureParams {
            picture_type: PictureType::I,
            poc: 0,
            qp: 32,
            referenced: true,
            num_references: 0,
            dist_refs: [1; MAX_REFS],
            dist_scale_refs: [DIST_SCALE_HALF * 2; MAX_REFS],
            sao_enable: [false; 3],
            alf_enable: [false; 3],
            top_field: true,
            delta_qp_enable: false,
            wq_data_index: 0,
            wq_param: 0,
            wq_model: 0,
        }
    }
}

/// Wraps a reference distance into the legal range.
#[inline(always)]
pub fn distance_index(distance: i32) -> i32 {
    (distance + 512) & 511
}

/// The pre-inverted form of a reference distance: `(1 << DIST_SCALE_BITS) / distance`, rounded.
#[inline(always)]
pub fn distance_scale(distance: i32) -> i32 {
    debug_assert!(distance != 0);
    ((1 << DIST_SCALE_BITS) + distance / 2) / distance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_pred_mode_classes() {
        assert!(PredMode::IntraNxN.is_intra());
        assert!(!PredMode::IntraNxN.is_inter());
        assert!(PredMode::Skip.is_skip());
        assert!(PredMode::Inter2NxNU.is_hor_part());
        assert!(PredMode::InterNRx2N.is_ver_part());
        assert!(!PredMode::Inter2Nx2N.is_hor_part());
    }

    #[test]
    fn verify_distance_index_wrap() {
        assert_eq!(distance_index(-2), 510);
        assert_eq!(distance_index(2), 2);
        assert_eq!(distance_index(514), 2);
    }
}
