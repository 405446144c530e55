// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Syntax-element readers of the CTU, CU, and residual layers, built on the arithmetic engine.

use lumiere_core::video::PictureType;

use super::context::{ContextSet, NUM_LAST_CG_CTX_LUMA, NUM_LAST_POS_CTX_LUMA};
use super::Aec;
use crate::common::*;
use crate::scan::SCAN;

/// Scan class of an intra prediction mode: 0 vertical-like, 1 horizontal-like, 2 DC/diagonal.
pub const INTRA_PRED_VER: usize = 0;
pub const INTRA_PRED_HOR: usize = 1;
pub const INTRA_PRED_DC_DIAG: usize = 2;

/// Scan class of each intra luma prediction mode.
#[rustfmt::skip]
pub const INTRA_MODE_SCAN_TYPE: [usize; NUM_INTRA_MODE] = [
    2, 2, 2, 1, 1, 2, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    2, 2, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 0,
];

/// Chroma mode made redundant by each luma mode (-1 when none).
#[rustfmt::skip]
const INTRA_MODE_LUMA_TO_CHROMA: [i8; NUM_INTRA_MODE] = [
    1, -1,  4, -1, -1, -1, -1, -1, -1, -1, -1, -1,
    3, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1,
    2, -1, -1, -1, -1, -1, -1, -1, -1,
];

/// Level thresholds gating a rank promotion.
const T_CHR: [i32; 5] = [0, 1, 2, 4, 3000];
/// Rank reached when a level exceeds its threshold, indexed by the capped level.
const TAB_RANK: [u8; 6] = [0, 1, 2, 3, 3, 4];

/// Decoded CU-type header of an inter-capable slice.
#[derive(Clone, Debug)]
pub struct CuTypeHeader {
    /// CU prediction mode. Skip and direct both map to [`PredMode::Skip`].
    pub mode: PredMode,
    /// True for the skip variant carrying no residual at all.
    pub no_residual: bool,
    /// Weighted-skip reference (0 = off).
    pub weighted_skip: i8,
    /// Direct/skip sub-mode.
    pub direct_skip: DirectSkipMode,
}

fn pred_mode_from_code(code: i32) -> PredMode {
    match code {
        0 => PredMode::Skip,
        1 => PredMode::Inter2Nx2N,
        2 => PredMode::Inter2NxN,
        3 => PredMode::InterNx2N,
        4 => PredMode::Inter2NxNU,
        5 => PredMode::Inter2NxND,
        6 => PredMode::InterNLx2N,
        7 => PredMode::InterNRx2N,
        8 => PredMode::Intra2Nx2N,
        _ => PredMode::IntraNxN,
    }
}

/// Read the CTU split flag of a CU at `level`.
pub fn read_split_flag(aec: &mut Aec<'_>, ctxs: &mut ContextSet, level: u32) -> bool {
    let idx = (level - MIN_CU_SIZE_IN_BIT - 1) as usize;
    aec.decode_symbol(&mut ctxs.split_flag[idx]) != 0
}

/// Read the CU type of an inter-capable slice, including the skip sub-mode elements.
pub fn read_cu_type(
    aec: &mut Aec<'_>,
    ctxs: &mut ContextSet,
    frame_type: PictureType,
    level: u32,
    tools: ToolFlags,
    num_references: usize,
) -> CuTypeHeader {
    // Unary cu-type codes, terminated early at the minimum CU size. Negative entries select the
    // residual-free skip.
    const MAP_CU_TYPE: [i32; 7] = [-1, 0, 1, 2, 3, -1, 9];
    const MAP_CU_TYPE_MIN: [i32; 6] = [-1, 0, 1, 2, 3, 9];

    let is_min_cu = level == B8X8_IN_BIT;
    let max_bit = if is_min_cu { 5 } else { 6 };

    let mut bin_idx = 0;
    let mut act_ctx = 0;
    let mut act_sym: i32 = 0;

    while act_sym < max_bit {
        let symbol = if bin_idx == 5 && level != MIN_CU_SIZE_IN_BIT {
            aec.decode_final()
        }
        else {
            aec.decode_symbol(&mut ctxs.cu_type[act_ctx])
        };

        if aec.has_error() {
            break;
        }
        bin_idx += 1;

        if symbol == 0 {
            act_sym += 1;
            act_ctx = (act_ctx + 1).min(5);
        }
        else {
            break;
        }
    }

    let mut code = if is_min_cu {
        MAP_CU_TYPE_MIN[act_sym as usize]
    }
    else {
        MAP_CU_TYPE[act_sym as usize]
    };

    // Asymmetric partition refinement.
    if level >= B16X16_IN_BIT && tools.contains(ToolFlags::AMP) && (code == 2 || code == 3) {
        if aec.decode_symbol(&mut ctxs.part_shape[0]) == 0 {
            let second = aec.decode_symbol(&mut ctxs.part_shape[1]);
            code = code * 2 + i32::from(second == 0);
        }
    }

    let no_residual = code < 0;
    let mode = pred_mode_from_code(code.max(0));

    let mut weighted_skip = 0i8;
    let mut direct_skip = DS_NONE;

    if code <= 0 {
        if frame_type == PictureType::F && tools.contains(ToolFlags::WSM) && num_references > 1 {
            weighted_skip =
                aec.decode_run_to_zero_ext(&mut ctxs.weighted_skip, 2, num_references as u32 - 1)
                    as i8;
        }

        if weighted_skip == 0
            && ((tools.contains(ToolFlags::MHP_SKIP) && frame_type == PictureType::F)
                || frame_type == PictureType::B)
        {
            direct_skip = read_direct_skip_mode(aec, ctxs);
        }
    }

    CuTypeHeader { mode, no_residual, weighted_skip, direct_skip }
}

/// Read the CU type of an S slice: skip, or intra.
pub fn read_cu_type_sframe(aec: &mut Aec<'_>, ctxs: &mut ContextSet) -> CuTypeHeader {
    let mut count = 0;

    while count < 2 {
        if aec.decode_symbol(&mut ctxs.cu_type[count]) != 0 {
            break;
        }
        count += 1;
    }

    let (mode, no_residual) = match count {
        0 => (PredMode::Skip, true),
        1 => (PredMode::Skip, false),
        _ => (PredMode::IntraNxN, false),
    };

    CuTypeHeader { mode, no_residual, weighted_skip: 0, direct_skip: DS_NONE }
}

fn read_direct_skip_mode(aec: &mut Aec<'_>, ctxs: &mut ContextSet) -> DirectSkipMode {
    let mut act_sym = aec.decode_run_to_zero_ext(&mut ctxs.cu_subtype, usize::MAX, 3) as usize;
    if act_sym == 3 {
        act_sym += usize::from(aec.decode_symbol(&mut ctxs.cu_subtype[3]) == 0);
    }
    act_sym
}

/// Read the intra CU partition refinement: the transform split flag, and for SDIP sizes the
/// non-square partition selector. Returns (mode, transform split requested).
pub fn read_intra_cu_type(
    aec: &mut Aec<'_>,
    ctxs: &mut ContextSet,
    level: u32,
    sdip_enabled: bool,
) -> (PredMode, bool) {
    let sdip = sdip_enabled && (level == B32X32_IN_BIT || level == B16X16_IN_BIT);

    let mut tu_split = false;
    if level == B8X8_IN_BIT || sdip {
        let idx = 1 + usize::from(sdip);
        tu_split = aec.decode_symbol(&mut ctxs.tu_split[idx]) != 0;
    }

    let mode = if !tu_split {
        PredMode::Intra2Nx2N
    }
    else if sdip {
        if aec.decode_symbol(&mut ctxs.intra_pu_type[0]) != 0 {
            PredMode::Intra2Nxn
        }
        else {
            PredMode::IntraNx2N
        }
    }
    else {
        PredMode::IntraNxN
    };

    (mode, tu_split)
}

/// Read the directional multi-hypothesis mode (0..8) of an F-slice CU.
pub fn read_dmh_mode(aec: &mut Aec<'_>, ctxs: &mut ContextSet, level: u32) -> u8 {
    // The DMH contexts follow the DHP direction contexts inside the inter-dir bank, three per CU
    // size level.
    let base = 3 + (level as usize - 3) * 3;
    let ctx = &mut ctxs.inter_dir;

    if aec.decode_symbol(&mut ctx[base]) == 0 {
        0
    }
    else if aec.decode_symbol(&mut ctx[base + 1]) == 0 {
        // Symbol strings 10x select modes 3 and 4.
        3 + aec.decode_symbol_eq_prob() as u8
    }
    else if aec.decode_symbol(&mut ctx[base + 2]) == 0 {
        // 110x selects modes 7 and 8.
        7 + aec.decode_symbol_eq_prob() as u8
    }
    else {
        // 1110x selects modes 1 and 2, 1111x modes 5 and 6.
        let b3 = aec.decode_symbol_eq_prob() as u8;
        let b4 = aec.decode_symbol_eq_prob() as u8;
        1 + (b3 << 2) + b4
    }
}

/// Read one motion vector difference component.
fn read_mvd_component(aec: &mut Aec<'_>, ctxs: &mut [super::Context; 3]) -> i32 {
    let mut act_sym;

    if aec.decode_symbol(&mut ctxs[0]) == 0 {
        act_sym = 0;
    }
    else if aec.decode_symbol(&mut ctxs[1]) == 0 {
        act_sym = 1;
    }
    else if aec.decode_symbol(&mut ctxs[2]) == 0 {
        act_sym = 2;
    }
    else {
        let add_sym = aec.decode_symbol_eq_prob() as i32;
        let mut golomb_order = 0;
        act_sym = 0;

        loop {
            let l = aec.decode_symbol_eq_prob();
            if aec.has_error() {
                return 0;
            }
            if l == 0 {
                act_sym += 1 << golomb_order;
                golomb_order += 1;
            }
            else {
                break;
            }
        }

        let mut binary_symbol = 0;
        while golomb_order > 0 {
            golomb_order -= 1;
            if aec.decode_symbol_eq_prob() != 0 {
                binary_symbol |= 1 << golomb_order;
            }
        }

        act_sym += binary_symbol;
        act_sym = (act_sym << 1) + 3 + add_sym;
    }

    if act_sym != 0 && aec.decode_symbol_eq_prob() != 0 {
        act_sym = -act_sym;
    }

    act_sym
}

/// Read a motion vector difference.
pub fn read_mvd(aec: &mut Aec<'_>, ctxs: &mut ContextSet) -> Mv {
    let x = read_mvd_component(aec, &mut ctxs.mvd[0]);
    let y = read_mvd_component(aec, &mut ctxs.mvd[1]);
    Mv::new(x.clamp(-32768, 32767) as i16, y.clamp(-32768, 32767) as i16)
}

/// Read one reference index.
pub fn read_ref_idx(aec: &mut Aec<'_>, ctxs: &mut ContextSet, num_references: usize) -> i8 {
    if aec.decode_symbol(&mut ctxs.ref_idx[0]) != 0 {
        return 0;
    }

    let mut act_sym = 1usize;
    let mut act_ctx = 1usize;
    while act_sym != num_references - 1
        && aec.decode_symbol(&mut ctxs.ref_idx[act_ctx]) == 0
    {
        act_sym += 1;
        act_ctx = (act_ctx + 1).min(2);
    }

    act_sym as i8
}

/// Read the B-slice inter prediction direction code for a CU.
///
/// For partitioned CUs the result indexes the 16-entry (pdir0, pdir1) table; for 2Nx2N it is the
/// direction itself.
pub fn read_b_pdir(aec: &mut Aec<'_>, ctxs: &mut ContextSet, mode: PredMode, level: u32) -> usize {
    const DIR2OFFSET: [[usize; 4]; 4] =
        [[0, 2, 4, 9], [3, 1, 5, 10], [6, 7, 8, 11], [12, 13, 14, 15]];
    const NEW_PDIR: [usize; 4] = [3, 1, 0, 2];

    if mode == PredMode::Inter2Nx2N {
        let mut act_sym = aec.decode_run_to_zero_ext(&mut ctxs.inter_dir, usize::MAX, 2) as usize;
        if act_sym == 2 {
            act_sym += usize::from(aec.decode_symbol(&mut ctxs.inter_dir[2]) == 0);
        }
        act_sym
    }
    else if mode >= PredMode::Inter2NxN && mode <= PredMode::InterNRx2N && level == B8X8_IN_BIT {
        let pdir0 = usize::from(aec.decode_symbol(&mut ctxs.inter_dir_min[0]) == 0);
        let pdir1 = if aec.decode_symbol(&mut ctxs.inter_dir_min[1]) != 0 {
            pdir0
        }
        else {
            1 - pdir0
        };
        DIR2OFFSET[pdir0][pdir1]
    }
    else {
        let mut act_sym =
            aec.decode_run_to_zero_ext(&mut ctxs.inter_dir[3..5], usize::MAX, 2) as usize;
        if act_sym == 2 {
            act_sym += usize::from(aec.decode_symbol(&mut ctxs.inter_dir[5]) == 0);
        }
        let pdir0 = act_sym;

        let pdir1 = if aec.decode_symbol(&mut ctxs.inter_dir[6]) != 0 {
            pdir0
        }
        else {
            // The second direction is coded relative to the first, skipping the equal case.
            let (first_ctx, second_ctx, low, mid, high) = match pdir0 {
                0 => (7, 8, 1, 2, 3),
                1 => (9, 10, 0, 2, 3),
                2 => (11, 12, 0, 1, 3),
                _ => (13, 14, 0, 1, 2),
            };

            if aec.decode_symbol(&mut ctxs.inter_dir[first_ctx]) != 0 {
                low
            }
            else if aec.decode_symbol(&mut ctxs.inter_dir[second_ctx]) != 0 {
                mid
            }
            else {
                high
            }
        };

        DIR2OFFSET[NEW_PDIR[pdir0]][NEW_PDIR[pdir1]]
    }
}

/// Read the F-slice dual-hypothesis direction code.
pub fn read_pdir_dhp(aec: &mut Aec<'_>, ctxs: &mut ContextSet, mode: PredMode) -> usize {
    const DIR2OFFSET: [[usize; 2]; 2] = [[0, 1], [2, 3]];

    if mode == PredMode::Inter2Nx2N {
        aec.decode_symbol(&mut ctxs.inter_dir[0]) as usize
    }
    else {
        let pdir0 = aec.decode_symbol(&mut ctxs.inter_dir[1]) as usize;
        let pdir1 = if aec.decode_symbol(&mut ctxs.inter_dir[2]) != 0 {
            pdir0
        }
        else {
            1 - pdir0
        };
        DIR2OFFSET[pdir0][pdir1]
    }
}

/// Expand a B-slice pdir code to the per-PU direction pair.
pub fn b_pdir_pair(code: usize) -> (PredDir, PredDir) {
    const PDIR0: [PredDir; 16] = [
        PredDir::Fwd, PredDir::Bwd, PredDir::Fwd, PredDir::Bwd,
        PredDir::Fwd, PredDir::Bwd, PredDir::Sym, PredDir::Sym,
        PredDir::Sym, PredDir::Fwd, PredDir::Bwd, PredDir::Sym,
        PredDir::Bid, PredDir::Bid, PredDir::Bid, PredDir::Bid,
    ];
    const PDIR1: [PredDir; 16] = [
        PredDir::Fwd, PredDir::Bwd, PredDir::Bwd, PredDir::Fwd,
        PredDir::Sym, PredDir::Sym, PredDir::Fwd, PredDir::Bwd,
        PredDir::Sym, PredDir::Bid, PredDir::Bid, PredDir::Bid,
        PredDir::Fwd, PredDir::Bwd, PredDir::Sym, PredDir::Bid,
    ];
    (PDIR0[code], PDIR1[code])
}

/// Direction of a B skip/direct CU given its sub-mode.
pub fn b_skip_pdir(direct_skip: DirectSkipMode) -> PredDir {
    B_SKIP_PDIR[direct_skip]
}

/// Expand a B-slice 2Nx2N pdir code (0..3) to a direction.
pub fn b_pdir_single(code: usize) -> PredDir {
    [PredDir::Fwd, PredDir::Bwd, PredDir::Sym, PredDir::Bid][code]
}

/// Read the intra luma prediction code: either an MPM index (-2, -1) or the coded remainder.
pub fn read_intra_luma_pred_code(aec: &mut Aec<'_>, ctxs: &mut ContextSet) -> i32 {
    let ctx = &mut ctxs.intra_luma_mode;

    if aec.decode_symbol(&mut ctx[0]) == 1 {
        aec_symbol_at(aec, ctx, 6) - 2
    }
    else {
        let mut symbol = aec_symbol_at(aec, ctx, 1) << 4;
        symbol += aec_symbol_at(aec, ctx, 2) << 3;
        symbol += aec_symbol_at(aec, ctx, 3) << 2;
        symbol += aec_symbol_at(aec, ctx, 4) << 1;
        symbol += aec_symbol_at(aec, ctx, 5);
        symbol
    }
}

#[inline(always)]
fn aec_symbol_at(aec: &mut Aec<'_>, ctxs: &mut [super::Context], idx: usize) -> i32 {
    aec.decode_symbol(&mut ctxs[idx]) as i32
}

/// Read the chroma intra prediction mode (0 = DM).
///
/// `ctx_idx` selects between the two initial contexts based on the left CU's mode;
/// `luma_mode` removes the chroma mode its luma mode already expresses.
pub fn read_intra_chroma_mode(
    aec: &mut Aec<'_>,
    ctxs: &mut ContextSet,
    ctx_idx: usize,
    luma_mode: usize,
) -> Option<usize> {
    let redundant = INTRA_MODE_LUMA_TO_CHROMA[luma_mode];

    let mut act_sym = usize::from(aec.decode_symbol(&mut ctxs.intra_chroma_mode[ctx_idx]) == 0);
    if act_sym != 0 {
        act_sym = aec.decode_unary_max(&mut ctxs.intra_chroma_mode[2..], 0, 3) as usize + 1;
        if redundant >= 0 && act_sym >= redundant as usize {
            if act_sym == 4 {
                // Out-of-range combination; the caller logs and falls back.
                return None;
            }
            act_sym += 1;
        }
    }

    Some(act_sym)
}

/// Read a CU delta QP.
pub fn read_delta_qp(aec: &mut Aec<'_>, ctxs: &mut ContextSet, last_dquant: i32) -> i32 {
    let first_ctx = usize::from(last_dquant != 0);
    let mut act_sym = 1 - aec.decode_symbol(&mut ctxs.delta_qp[first_ctx]) as i32;

    if act_sym != 0 {
        act_sym = aec.decode_unary_max(&mut ctxs.delta_qp[2..], 1, 256) as i32 + 1;
    }

    let dquant = (act_sym + 1) >> 1;
    if act_sym & 1 == 0 {
        -dquant
    }
    else {
        dquant
    }
}

/// Read one luma coded-transform-pattern bit with its neighbor-derived context.
pub fn read_ctp_y(aec: &mut Aec<'_>, ctxs: &mut ContextSet, left_ctp: u32, top_ctp: u32) -> u32 {
    let idx = (left_ctp + 2 * top_ctp) as usize;
    aec.decode_symbol(&mut ctxs.cbp[idx])
}

/// Read the ctp_zero_flag of a non-skip inter CU.
pub fn read_ctp_zero_flag(aec: &mut Aec<'_>, ctxs: &mut ContextSet) -> bool {
    aec.decode_symbol(&mut ctxs.cbp[8]) != 0
}

/// Read the transform split flag of an inter CU.
pub fn read_tu_split_flag(aec: &mut Aec<'_>, ctxs: &mut ContextSet) -> bool {
    aec.decode_symbol(&mut ctxs.tu_split[0]) != 0
}

/// Read the chroma half of the coded block pattern. `intra` selects the context pair.
pub fn read_cbp_chroma(aec: &mut Aec<'_>, ctxs: &mut ContextSet, intra: bool) -> u32 {
    let base = if intra { 6 } else { 4 };

    if aec.decode_symbol(&mut ctxs.cbp[base]) == 0 {
        return 0;
    }

    if aec.decode_symbol(&mut ctxs.cbp[base + 1]) != 0 {
        48
    }
    else if aec.decode_symbol(&mut ctxs.cbp[base + 1]) != 0 {
        32
    }
    else {
        16
    }
}

/// How decoded levels are turned into dequantized coefficients while they are emitted.
#[derive(Copy, Clone, Debug)]
pub enum Dequant {
    /// Flat dequantization folded into emission: `(level * scale + (1 << (shift-1))) >> shift`.
    Flat { scale: i32, shift: i32 },
    /// Raw levels; a weighted-matrix dequantization pass follows.
    Deferred,
}

/// Geometry and context selection of one residual block read.
pub struct ResidualParams {
    /// Transform width in samples.
    pub w_tr: usize,
    /// Transform height in samples.
    pub h_tr: usize,
    pub luma: bool,
    /// The intra scan class is DC/diagonal (always true for inter blocks).
    pub dc_diag: bool,
    /// Transpose coefficient positions (horizontal-class intra scans).
    pub swap_xy: bool,
    /// Transform split mode of the CU, for the last-CG position mapping.
    pub tu_split: TuSplit,
    pub dequant: Dequant,
}

/// DCT pattern of a transform block: which coefficient bands are populated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DctPattern {
    Default,
    Half,
    #[default]
    Quad,
}

fn read_last_cg_pos(
    aec: &mut Aec<'_>,
    ctxs: &mut ContextSet,
    params: &ResidualParams,
    num_cg: usize,
    num_cg_x_minus1: usize,
    num_cg_y_minus1: usize,
) -> (usize, usize, usize) {
    let base = if params.luma { 0 } else { NUM_LAST_CG_CTX_LUMA };
    let (mut num_cg_x_minus1, mut num_cg_y_minus1) = (num_cg_x_minus1, num_cg_y_minus1);

    if params.luma && params.dc_diag {
        std::mem::swap(&mut num_cg_x_minus1, &mut num_cg_y_minus1);
    }

    let mut last_cg_x;
    let mut last_cg_y;
    let last_cg_idx;

    if num_cg == 4 {
        let idx =
            aec.decode_run_to_zero_ext(&mut ctxs.last_cg[base..base + 3], 2, 3) as usize;

        if params.luma && params.tu_split == TuSplit::Hor {
            last_cg_x = idx;
            last_cg_y = 0;
        }
        else if params.luma && params.tu_split == TuSplit::Ver {
            last_cg_x = 0;
            last_cg_y = idx;
        }
        else {
            last_cg_x = idx & 1;
            last_cg_y = idx >> 1;
        }
        last_cg_idx = idx;
    }
    else {
        if aec.decode_symbol(&mut ctxs.last_cg[base + 3]) == 0 {
            last_cg_x = 0;
            last_cg_y = 0;
        }
        else {
            last_cg_x = aec
                .decode_run_to_zero(&mut ctxs.last_cg[base + 4], num_cg_x_minus1 as u32)
                as usize;

            if last_cg_x == 0 {
                last_cg_y = if num_cg_y_minus1 != 1 {
                    aec.decode_run_to_zero(
                        &mut ctxs.last_cg[base + 5],
                        num_cg_y_minus1 as u32 - 1,
                    ) as usize
                }
                else {
                    0
                };
                last_cg_y += 1;
            }
            else {
                last_cg_y = aec
                    .decode_run_to_zero(&mut ctxs.last_cg[base + 5], num_cg_y_minus1 as u32)
                    as usize;
            }
        }

        if params.luma && params.dc_diag {
            std::mem::swap(&mut last_cg_x, &mut last_cg_y);
        }

        last_cg_idx = if params.luma && params.tu_split == TuSplit::Hor {
            SCAN.raster_to_scan_8x2[last_cg_y * 8 + last_cg_x] as usize
        }
        else if params.luma && params.tu_split == TuSplit::Ver {
            SCAN.raster_to_scan_2x8[last_cg_y * 2 + last_cg_x] as usize
        }
        else if num_cg == 16 {
            SCAN.raster_to_scan_4x4[last_cg_y * 4 + last_cg_x] as usize
        }
        else {
            SCAN.raster_to_scan_8x8[last_cg_y * 8 + last_cg_x] as usize
        };
    }

    (last_cg_x, last_cg_y, last_cg_idx)
}

fn read_last_coeff_pos_in_cg(
    aec: &mut Aec<'_>,
    ctxs: &mut ContextSet,
    params: &ResidualParams,
    rank: u8,
    cg_x: usize,
    cg_y: usize,
    one_cg: bool,
) -> usize {
    let dc_diag = usize::from(params.dc_diag);

    let offset = if !params.luma {
        NUM_LAST_POS_CTX_LUMA + if one_cg { 0 } else { 4 + usize::from(rank == 0) * 4 }
    }
    else if one_cg {
        40 + dc_diag * 4
    }
    else if cg_x != 0 && cg_y != 0 {
        32 + usize::from(rank == 0) * 4
    }
    else {
        (4 * usize::from(rank == 0) + 2 * usize::from(cg_x == 0 && cg_y == 0) + dc_diag) * 4
    };

    let mut xx = aec
        .decode_run_to_zero_ext(&mut ctxs.last_pos_in_cg[offset..offset + 2], 1, 3)
        as usize;
    let mut yy = aec
        .decode_run_to_zero_ext(&mut ctxs.last_pos_in_cg[offset + 2..offset + 4], 1, 3)
        as usize;

    if cg_x == 0 && cg_y > 0 && params.dc_diag {
        std::mem::swap(&mut xx, &mut yy);
    }
    if rank != 0 {
        xx = 3 - xx;
        if params.dc_diag {
            yy = 3 - yy;
        }
    }

    SCAN.coeff_pos_in_cg[yy][xx] as usize
}

/// Context offset of one run bin for a vertical- or DC-class luma scan.
fn run_ctx_luma_ver(pos: usize, ctxpos: usize, one_cg: bool, first_cg: bool) -> usize {
    let add = if one_cg { 0 } else { 4 };
    let moddiv = (SCAN.coeff_4x4[pos - 1 - ctxpos].1 as usize + 1) >> 1;
    (if first_cg { if pos == ctxpos + 1 { 0 } else { 1 + moddiv } } else { 4 + moddiv }) + add
}

/// Context offset of one run bin for a DC/diagonal-class luma scan.
fn run_ctx_luma_diag(pos: usize, ctxpos: usize, one_cg: bool, first_cg: bool) -> usize {
    let add = if one_cg { 0 } else { 4 };
    let moddiv = if pos < ctxpos + 4 { 0 } else if pos < ctxpos + 11 { 1 } else { 2 };
    (if first_cg { if pos == ctxpos + 1 { 0 } else { 1 + moddiv } } else { 4 + moddiv }) + add
}

/// Context offset of one run bin of a chroma block.
fn run_ctx_chroma(pos: usize, ctxpos: usize, one_cg: bool, first_cg: bool) -> usize {
    let add = if one_cg { 0 } else { 3 };
    let moddiv = usize::from(pos >= 6 + ctxpos);
    (if first_cg { if pos == ctxpos + 1 { 0 } else { 1 + moddiv } } else { 3 + moddiv }) + add
}

fn read_run(
    aec: &mut Aec<'_>,
    ctxs: &mut [super::Context; 11],
    params: &ResidualParams,
    pos: usize,
    one_cg: bool,
    first_cg: bool,
) -> usize {
    let mut run = 0;
    let mut ctxpos = 0;
    let mut offset = 0;

    while run != pos {
        if ctxpos < pos {
            offset = if !params.luma {
                run_ctx_chroma(pos, ctxpos, one_cg, first_cg)
            }
            else if params.dc_diag {
                run_ctx_luma_diag(pos, ctxpos, one_cg, first_cg)
            }
            else {
                run_ctx_luma_ver(pos, ctxpos, one_cg, first_cg)
            };
        }

        if aec.decode_symbol(&mut ctxs[offset]) != 0 {
            break;
        }

        run += 1;
        ctxpos += 1;
    }

    run
}

/// Sum of the absolute levels of up to five recent coefficients, capped after six scan steps.
fn abs_sum_of_recent(pairs: &[(i16, i16)]) -> i32 {
    let mut n = 0;
    let mut abs_sum = 0;

    for &(level, run) in pairs.iter().rev() {
        n += run as i32;
        if n >= 6 {
            break;
        }
        abs_sum += i32::from(level).abs();
        n += 1;
    }

    abs_sum
}

/// Read one transform block of quantized coefficients and emit them dequantized into `coeffs`
/// (row stride `w_tr`). Returns the observed DCT pattern, or `None` on a bitstream error.
pub fn read_block_coeffs(
    aec: &mut Aec<'_>,
    ctxs: &mut ContextSet,
    params: &ResidualParams,
    coeffs: &mut [i32],
) -> Option<DctPattern> {
    let num_coeff = params.w_tr * params.h_tr;
    let mut num_cg = num_coeff >> 4;
    let one_cg = num_cg == 1;
    let cg_scan = SCAN.cg_scan(params.w_tr >> 2, params.h_tr.max(4) >> 2);

    // CG positions bounding the HALF and QUAD coefficient bands.
    let (w_half, h_half, w_quad, h_quad) = if params.w_tr == params.h_tr {
        (params.w_tr >> 1, params.h_tr >> 1, params.w_tr >> 2, params.h_tr >> 2)
    }
    else if params.w_tr > params.h_tr {
        (params.w_tr >> 1, params.h_tr, params.w_tr >> 2, params.h_tr)
    }
    else {
        (params.w_tr, params.h_tr >> 1, params.w_tr, params.h_tr >> 2)
    };
    let (w_half, h_half, w_quad, h_quad) = (w_half >> 2, h_half >> 2, w_quad >> 2, h_quad >> 2);

    let mut dct_pattern = DctPattern::Quad;
    let mut rank: u8 = 0;
    let mut cg_x = 0usize;
    let mut cg_y = 0usize;
    let mut cg_pos = 0usize;

    if num_cg > 1 {
        let (x, y, idx) = read_last_cg_pos(
            aec,
            ctxs,
            params,
            num_cg,
            cg_scan[num_cg - 1].0 as usize,
            cg_scan[num_cg - 1].1 as usize,
        );
        cg_x = x;
        cg_y = y;
        cg_pos = idx;
    }

    num_cg = cg_pos + 1;
    let mut pairs: Vec<(i16, i16)> = Vec::with_capacity(16);

    for _ in 0..num_cg {
        let first_cg = cg_pos == 0;
        let mut nonzero_cg = true;

        if rank > 0 {
            let ctx_sig = usize::from(params.luma && cg_pos != 0);
            cg_x = cg_scan[cg_pos].0 as usize;
            cg_y = cg_scan[cg_pos].1 as usize;
            nonzero_cg =
                aec.decode_symbol(&mut ctxs.sig_cg[if params.luma { ctx_sig } else { 2 }]) != 0;
        }

        if nonzero_cg {
            pairs.clear();

            let mut pos = read_last_coeff_pos_in_cg(aec, ctxs, params, rank, cg_x, cg_y, one_cg);

            for _ in 0..16 {
                // coeff_level_minus1
                let mut level: i32 = 1;

                if aec.decode_final() != 0 {
                    // Escape to an exp-Golomb tail on top of the 32-level base.
                    let mut golomb_order = 0;
                    loop {
                        let l = aec.decode_symbol_eq_prob();
                        if aec.has_error() {
                            return None;
                        }
                        if l != 0 {
                            break;
                        }
                        level += 1 << golomb_order;
                        golomb_order += 1;
                    }

                    let mut binary_symbol = 0;
                    while golomb_order > 0 {
                        golomb_order -= 1;
                        if aec.decode_symbol_eq_prob() != 0 {
                            binary_symbol |= 1 << golomb_order;
                        }
                    }

                    level += binary_symbol + 32;
                }
                else {
                    let pairs_idx = (((pairs.len() + 1) >> 1) as i32).min(2);
                    let base = if params.luma { 0 } else { 20 };
                    let idx = base
                        + 10 * usize::from(first_cg && pos < 3)
                        + (rank as usize).min(pairs_idx as usize + 2)
                        + ((5 * pairs_idx as usize) >> 1);
                    level +=
                        aec.decode_run_to_zero(&mut ctxs.coeff_level[idx], 31) as i32;
                }

                if aec.has_error() {
                    return None;
                }

                let abs_sum = (abs_sum_of_recent(&pairs) + level) >> 1;
                let run_bank = usize::from(!params.luma);
                let run_ctx = (abs_sum as usize).min(2);

                let run = if pos > 0 {
                    read_run(
                        aec,
                        &mut ctxs.coeff_run[run_bank][run_ctx],
                        params,
                        pos,
                        one_cg,
                        first_cg,
                    )
                }
                else {
                    0
                };

                if aec.has_error() {
                    return None;
                }

                pairs.push((level as i16, run as i16));

                if level > T_CHR[rank as usize] {
                    rank = TAB_RANK[(level as usize).min(5)];
                }
                if run == pos {
                    break;
                }
                pos -= run + 1;
            }

            // Signs, one equal-probability bin each.
            for pair in pairs.iter_mut() {
                if aec.decode_symbol_eq_prob() != 0 {
                    pair.0 = -pair.0;
                }
            }

            // Convert the run-level pairs into dequantized coefficients of this CG.
            let (mut emit_cg_x, mut emit_cg_y) = (cg_x, cg_y);
            if params.swap_xy {
                std::mem::swap(&mut emit_cg_x, &mut emit_cg_y);
            }

            let cg_origin = params.w_tr * (emit_cg_y << 2) + (emit_cg_x << 2);
            let mut coeff_ctr: i32 = -1;

            for &(level, run) in pairs.iter().rev() {
                if run < 0 || run >= 16 {
                    return None;
                }
                coeff_ctr += i32::from(run) + 1;
                if coeff_ctr >= 16 {
                    return None;
                }

                let (sx, sy) = SCAN.coeff_4x4[coeff_ctr as usize];
                let (x_in_cg, y_in_cg) = if params.swap_xy {
                    (sy as usize, sx as usize)
                }
                else {
                    (sx as usize, sy as usize)
                };

                let value = match params.dequant {
                    Dequant::Flat { scale, shift } => {
                        let add = 1 << (shift - 1);
                        ((i32::from(level) * scale + add) >> shift).clamp(-32768, 32767)
                    }
                    Dequant::Deferred => i32::from(level),
                };

                coeffs[cg_origin + y_in_cg * params.w_tr + x_in_cg] = value;
            }

            if cg_y >= h_half || cg_x >= w_half {
                dct_pattern = DctPattern::Default;
            }
            else if (cg_y >= h_quad || cg_x >= w_quad) && dct_pattern != DctPattern::Default {
                dct_pattern = DctPattern::Half;
            }
        }

        cg_pos = cg_pos.wrapping_sub(1);
    }

    Some(dct_pattern)
}
