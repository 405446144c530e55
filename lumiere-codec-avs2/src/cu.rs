// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `cu` module parses coding units: the recursive CTU split, the CU header (type, partition,
//! prediction modes, motion data), the coded block pattern, and the residual coefficients.

use std::sync::{Arc, RwLock};

use log::{error, warn};

use lumiere_core::util::clip3;
use lumiere_core::video::PictureType;

use crate::aec::{self, Aec, ContextSet, DctPattern, Dequant, ResidualParams};
use crate::alf;
use crate::common::*;
use crate::frame::Frame;
use crate::intra::{BI_PRED, DC_PRED};
use crate::mvpred::{self, MvpInput};
use crate::neighbor::{FrameMaps, ScuInfo};
use crate::sao::SaoParam;
use crate::transform::{chroma_qp, quant_params};

/// A sub-rectangle of a CU, in pixels relative to the CU origin.
#[derive(Copy, Clone, Debug, Default)]
pub struct CodingBlock {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl CodingBlock {
    fn scaled(base: [i32; 4], shift: u32) -> CodingBlock {
        CodingBlock {
            x: base[0] << shift,
            y: base[1] << shift,
            w: base[2] << shift,
            h: base[3] << shift,
        }
    }
}

/// Everything reconstruction needs to know about one parsed CU.
#[derive(Clone, Debug)]
pub struct CuInfo {
    /// Absolute pixel position of the CU.
    pub pix_x: usize,
    pub pix_y: usize,
    pub level: u32,
    pub mode: PredMode,
    pub tu_split: TuSplit,
    pub cbp: u8,
    pub qp: i8,
    pub dmh_mode: u8,
    pub weighted_skip: i8,
    pub direct_skip: DirectSkipMode,
    pub num_pu: usize,
    pub pu: [CodingBlock; 4],
    pub pdir: [PredDir; 4],
    pub ref_idx: [RefPair; 4],
    pub mv: [[Mv; 2]; 4],
    pub intra_modes: [i8; 4],
    pub chroma_mode: usize,
    pub dct_pattern: [DctPattern; 6],
    /// Offset of this CU's coefficients inside the LCU coefficient buffers, in z-scan units of
    /// one 8x8 block.
    pub zscan_idx: usize,
    pub slice_nr: i32,
}

impl Default for CuInfo {
    fn default() -> Self {
        CuInfo {
            pix_x: 0,
            pix_y: 0,
            level: MIN_CU_SIZE_IN_BIT,
            mode: PredMode::Skip,
            tu_split: TuSplit::None,
            cbp: 0,
            qp: 0,
            dmh_mode: 0,
            weighted_skip: 0,
            direct_skip: DS_NONE,
            num_pu: 1,
            pu: [CodingBlock::default(); 4],
            pdir: [PredDir::Invalid; 4],
            ref_idx: [RefPair::default(); 4],
            mv: [[Mv::ZERO; 2]; 4],
            intra_modes: [DC_PRED as i8; 4],
            chroma_mode: 0,
            dct_pattern: [DctPattern::Quad; 6],
            zscan_idx: 0,
            slice_nr: 0,
        }
    }
}

/// Coefficient buffers of one LCU: per 8x8 z-scan unit, 64 luma and 2 x 16 chroma values.
pub struct LcuCoeffs {
    pub y: Vec<i32>,
    pub u: Vec<i32>,
    pub v: Vec<i32>,
}

impl LcuCoeffs {
    pub fn new(lcu_bits: u32) -> LcuCoeffs {
        let luma = 1usize << (2 * lcu_bits);
        LcuCoeffs { y: vec![0; luma], u: vec![0; luma >> 2], v: vec![0; luma >> 2] }
    }

    pub fn clear(&mut self) {
        self.y.fill(0);
        self.u.fill(0);
        self.v.fill(0);
    }
}

/// The parse product of one LCU, handed to reconstruction.
pub struct LcuPayload {
    pub lcu_x: usize,
    pub lcu_y: usize,
    /// Leaf CUs in z-order (which is also reconstruction order).
    pub cus: Vec<CuInfo>,
    pub coeffs: LcuCoeffs,
    pub sao: SaoParam,
    pub alf_enable: [bool; 3],
}

/// Raster index to z-scan index of the 8x8 blocks of a 64x64 LCU.
#[rustfmt::skip]
const B8XY_TO_ZSCAN: [[usize; 8]; 8] = [
    [  0,  1,  4,  5, 16, 17, 20, 21 ],
    [  2,  3,  6,  7, 18, 19, 22, 23 ],
    [  8,  9, 12, 13, 24, 25, 28, 29 ],
    [ 10, 11, 14, 15, 26, 27, 30, 31 ],
    [ 32, 33, 36, 37, 48, 49, 52, 53 ],
    [ 34, 35, 38, 39, 50, 51, 54, 55 ],
    [ 40, 41, 44, 45, 56, 57, 60, 61 ],
    [ 42, 43, 46, 47, 58, 59, 62, 63 ],
];

/// Number of prediction units per CU mode.
const NUM_PREDICTION_UNIT: [usize; 12] = [1, 1, 2, 2, 2, 2, 2, 2, 1, 4, 4, 4];

/// PU geometry per mode, in eighths of the CU size.
#[rustfmt::skip]
const CODING_BLOCK_INFO: [[[i32; 4]; 4]; 13] = [
    [[0, 0, 8, 8], [0, 0, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0]], // Skip
    [[0, 0, 8, 8], [0, 0, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0]], // 2Nx2N
    [[0, 0, 8, 4], [0, 4, 8, 4], [0, 0, 0, 0], [0, 0, 0, 0]], // 2NxN
    [[0, 0, 4, 8], [4, 0, 4, 8], [0, 0, 0, 0], [0, 0, 0, 0]], // Nx2N
    [[0, 0, 8, 2], [0, 2, 8, 6], [0, 0, 0, 0], [0, 0, 0, 0]], // 2NxnU
    [[0, 0, 8, 6], [0, 6, 8, 2], [0, 0, 0, 0], [0, 0, 0, 0]], // 2NxnD
    [[0, 0, 2, 8], [2, 0, 6, 8], [0, 0, 0, 0], [0, 0, 0, 0]], // nLx2N
    [[0, 0, 6, 8], [6, 0, 2, 8], [0, 0, 0, 0], [0, 0, 0, 0]], // nRx2N
    [[0, 0, 8, 8], [0, 0, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0]], // I_2Nx2N
    [[0, 0, 4, 4], [4, 0, 4, 4], [0, 4, 4, 4], [4, 4, 4, 4]], // I_NxN
    [[0, 0, 8, 2], [0, 2, 8, 2], [0, 4, 8, 2], [0, 6, 8, 2]], // I_2Nxn
    [[0, 0, 2, 8], [2, 0, 2, 8], [4, 0, 2, 8], [6, 0, 2, 8]], // I_nx2N
    [[0, 0, 4, 4], [4, 0, 4, 4], [0, 4, 4, 4], [4, 4, 4, 4]], // quartered skip
];

/// TU geometry per split mode, in eighths of the CU size.
#[rustfmt::skip]
const TU_SPLIT_INFO: [[[i32; 4]; 4]; 4] = [
    [[0, 0, 8, 8], [0, 0, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0]], // None
    [[0, 0, 8, 2], [0, 2, 8, 2], [0, 4, 8, 2], [0, 6, 8, 2]], // Hor
    [[0, 0, 2, 8], [2, 0, 2, 8], [4, 0, 2, 8], [6, 0, 2, 8]], // Ver
    [[0, 0, 4, 4], [4, 0, 4, 4], [0, 4, 4, 4], [4, 4, 4, 4]], // Cross
];

/// The TU layout of a CU.
pub fn transform_units(cu: &CuInfo) -> [CodingBlock; 4] {
    let shift = cu.level - MIN_CU_SIZE_IN_BIT;
    let info = &TU_SPLIT_INFO[cu.tu_split as usize];
    [
        CodingBlock::scaled(info[0], shift),
        CodingBlock::scaled(info[1], shift),
        CodingBlock::scaled(info[2], shift),
        CodingBlock::scaled(info[3], shift),
    ]
}

/// The TU split mode implied by the CU type when the transform split flag fires.
fn derive_tu_split(mode: PredMode, level: u32, tools: ToolFlags, split_flag: bool) -> TuSplit {
    if !split_flag {
        return TuSplit::None;
    }

    let nsqt_sdip = if mode.is_intra() {
        tools.contains(ToolFlags::SDIP)
    }
    else {
        tools.contains(ToolFlags::NSQT)
    };
    let non_square = nsqt_sdip && level > B8X8_IN_BIT;

    if !non_square {
        return match mode {
            PredMode::Intra2Nx2N => TuSplit::None,
            _ => TuSplit::Cross,
        };
    }

    match mode {
        PredMode::Inter2NxN | PredMode::Inter2NxNU | PredMode::Inter2NxND
        | PredMode::Intra2Nxn => TuSplit::Hor,
        PredMode::InterNx2N | PredMode::InterNLx2N | PredMode::InterNRx2N
        | PredMode::IntraNx2N => TuSplit::Ver,
        _ => TuSplit::Cross,
    }
}

/// All frame-level state the CU parser reads and writes.
pub struct ParserCtx<'a> {
    pub seq: &'a SequenceParams,
    pub pic: &'a PictureParams,
    pub ctxs: ContextSet,
    pub maps: &'a RwLock<FrameMaps>,
    pub frefs: &'a [Arc<Frame>],
    pub slice_nr: i32,
    pub slice_qp: i32,
    pub last_dquant: i32,
    /// QP of the CU to the left, the predictor for delta-QP coding.
    pub left_cu_qp: i8,
    /// Context selector of the chroma mode, from the left CU.
    pub c_ipred_ctx: usize,
    /// A background reference exists in the active reference list.
    pub background_pic: bool,
}

impl<'a> ParserCtx<'a> {
    pub fn new(
        seq: &'a SequenceParams,
        pic: &'a PictureParams,
        maps: &'a RwLock<FrameMaps>,
        frefs: &'a [Arc<Frame>],
        background_pic: bool,
    ) -> ParserCtx<'a> {
        ParserCtx {
            seq,
            pic,
            ctxs: ContextSet::new(),
            maps,
            frefs,
            slice_nr: -1,
            slice_qp: pic.qp,
            last_dquant: 0,
            left_cu_qp: pic.qp as i8,
            c_ipred_ctx: 0,
            background_pic,
        }
    }

    /// Begin a slice: reset the adaptive contexts and the delta-QP predictor.
    pub fn begin_slice(&mut self, slice_qp: i32) {
        self.slice_nr += 1;
        self.slice_qp = slice_qp;
        self.last_dquant = 0;
        self.ctxs.reset();
    }
}

/// Mark the slice of every SCU one LCU covers. Runs before any parse of the LCU so neighbor and
/// merge queries inside it resolve.
pub fn mark_lcu_slice(ctx: &ParserCtx<'_>, lcu_x: usize, lcu_y: usize) {
    let mut maps = ctx.maps.write().unwrap();
    let scu_x0 = lcu_x << (ctx.seq.lcu_bits - MIN_CU_SIZE_IN_BIT);
    let scu_y0 = lcu_y << (ctx.seq.lcu_bits - MIN_CU_SIZE_IN_BIT);
    let w = maps.width_in_scu.min(scu_x0 + (1 << (ctx.seq.lcu_bits - MIN_CU_SIZE_IN_BIT)));
    let h = maps.height_in_scu.min(scu_y0 + (1 << (ctx.seq.lcu_bits - MIN_CU_SIZE_IN_BIT)));
    for scu_y in scu_y0..h {
        for scu_x in scu_x0..w {
            let idx = scu_y * maps.width_in_scu + scu_x;
            maps.scu[idx].slice_nr = ctx.slice_nr;
        }
    }
}

/// Parse one LCU (recursively over the CTU quadtree) into its payload.
pub fn parse_lcu(
    ctx: &mut ParserCtx<'_>,
    aec: &mut Aec<'_>,
    lcu_x: usize,
    lcu_y: usize,
    sao: SaoParam,
    alf_enable: [bool; 3],
) -> Result<LcuPayload, ()> {
    let mut payload = LcuPayload {
        lcu_x,
        lcu_y,
        cus: Vec::with_capacity(4),
        coeffs: LcuCoeffs::new(ctx.seq.lcu_bits),
        sao,
        alf_enable,
    };

    let pix_x = lcu_x << ctx.seq.lcu_bits;
    let pix_y = lcu_y << ctx.seq.lcu_bits;
    parse_split(ctx, aec, &mut payload, ctx.seq.lcu_bits, pix_x, pix_y)?;

    Ok(payload)
}

fn parse_split(
    ctx: &mut ParserCtx<'_>,
    aec: &mut Aec<'_>,
    payload: &mut LcuPayload,
    level: u32,
    pix_x: usize,
    pix_y: usize,
) -> Result<(), ()> {
    let size = 1usize << level;
    let inside = pix_x + size <= ctx.seq.width && pix_y + size <= ctx.seq.height;

    let split = if level > MIN_CU_SIZE_IN_BIT && inside {
        aec::read_split_flag(aec, &mut ctx.ctxs, level)
    }
    else {
        level != MIN_CU_SIZE_IN_BIT
    };

    if aec.has_error() {
        return Err(());
    }

    if split {
        let next = level - 1;
        for i in 0..4 {
            let sub_x = pix_x + ((i & 1) << next);
            let sub_y = pix_y + ((i >> 1) << next);
            if sub_x < ctx.seq.width && sub_y < ctx.seq.height {
                parse_split(ctx, aec, payload, next, sub_x, sub_y)?;
            }
        }
        Ok(())
    }
    else {
        let cu = read_cu(ctx, aec, payload, level, pix_x, pix_y)?;
        payload.cus.push(cu);
        Ok(())
    }
}

/// The PU layout of a CU, honoring the quartered-skip special case.
fn init_prediction_units(cu: &mut CuInfo, frame_type: PictureType) {
    let shift = cu.level - MIN_CU_SIZE_IN_BIT;

    if cu.mode == PredMode::Skip {
        let quartered = cu.level > 3
            && (frame_type == PictureType::P
                || (frame_type == PictureType::F && cu.direct_skip == DS_NONE)
                || (frame_type == PictureType::B && cu.direct_skip == DS_NONE));

        if quartered {
            cu.num_pu = 4;
            for i in 0..4 {
                cu.pu[i] = CodingBlock::scaled(CODING_BLOCK_INFO[12][i], shift);
            }
        }
        else {
            cu.num_pu = 1;
            cu.pu[0] = CodingBlock::scaled(CODING_BLOCK_INFO[0][0], shift);
        }
        return;
    }

    let mode = cu.mode as usize;
    cu.num_pu = NUM_PREDICTION_UNIT[mode];
    for i in 0..cu.num_pu {
        cu.pu[i] = CodingBlock::scaled(CODING_BLOCK_INFO[mode][i], shift);
    }
}

fn set_pdir_pf(cu: &mut CuInfo, pdir_code: usize) {
    const PDIR0: [PredDir; 4] = [PredDir::Fwd, PredDir::Fwd, PredDir::Dual, PredDir::Dual];
    const PDIR1: [PredDir; 4] = [PredDir::Fwd, PredDir::Dual, PredDir::Fwd, PredDir::Dual];

    if cu.mode == PredMode::Inter2Nx2N {
        let dir = if pdir_code == 0 { PredDir::Fwd } else { PredDir::Dual };
        cu.pdir = [dir; 4];
    }
    else if cu.mode.is_hor_part() || cu.mode.is_ver_part() {
        cu.pdir[0] = PDIR0[pdir_code];
        cu.pdir[2] = PDIR0[pdir_code];
        cu.pdir[1] = PDIR1[pdir_code];
        cu.pdir[3] = PDIR1[pdir_code];
    }
    else {
        cu.pdir = [PredDir::Invalid; 4];
    }
}

fn set_pdir_b(cu: &mut CuInfo, pdir_code: usize) {
    const PDIR2REFIDX: [(i8, i8); 6] = [
        (INVALID_REF, INVALID_REF), // Invalid
        (B_FWD, INVALID_REF),       // Fwd
        (INVALID_REF, B_BWD),       // Bwd
        (B_FWD, B_BWD),             // Sym
        (B_FWD, B_BWD),             // Bid
        (INVALID_REF, INVALID_REF), // Dual (not used in B)
    ];

    if cu.mode == PredMode::Skip {
        let dir = aec::b_skip_pdir(cu.direct_skip);
        cu.pdir = [dir; 4];
    }
    else if cu.mode == PredMode::Inter2Nx2N {
        let dir = aec::b_pdir_single(pdir_code);
        cu.pdir = [dir; 4];
    }
    else if cu.mode.is_hor_part() || cu.mode.is_ver_part() {
        let (dir0, dir1) = aec::b_pdir_pair(pdir_code);
        cu.pdir[0] = dir0;
        cu.pdir[2] = dir0;
        cu.pdir[1] = dir1;
        cu.pdir[3] = dir1;
    }
    else {
        cu.pdir = [PredDir::Invalid; 4];
    }

    for i in 0..4 {
        let (r0, r1) = PDIR2REFIDX[cu.pdir[i] as usize];
        cu.ref_idx[i] = RefPair::new(r0, r1);
    }
}

fn read_references(ctx: &mut ParserCtx<'_>, aec: &mut Aec<'_>, cu: &mut CuInfo) {
    let num_pu = if cu.mode == PredMode::Inter2Nx2N { 1 } else { 2 };

    for idx in 0..num_pu {
        let ref_1st = if ctx.pic.num_references > 1 {
            aec::read_ref_idx(aec, &mut ctx.ctxs, ctx.pic.num_references)
        }
        else {
            0
        };

        let ref_2nd = if cu.pdir[idx] == PredDir::Dual {
            i8::from(ref_1st == 0)
        }
        else {
            INVALID_REF
        };

        cu.ref_idx[idx] = RefPair::new(ref_1st, ref_2nd);
    }
}

fn read_inter_pred_dir(ctx: &mut ParserCtx<'_>, aec: &mut Aec<'_>, cu: &mut CuInfo) {
    let frame_type = ctx.pic.picture_type;

    if frame_type == PictureType::B {
        let code = if cu.mode >= PredMode::Inter2Nx2N && cu.mode <= PredMode::InterNRx2N {
            aec::read_b_pdir(aec, &mut ctx.ctxs, cu.mode, cu.level)
        }
        else {
            0
        };
        set_pdir_b(cu, code);
    }
    else {
        if cu.mode.is_skip() {
            let dir = if cu.weighted_skip != 0
                || cu.direct_skip == DS_DUAL_1ST
                || cu.direct_skip == DS_DUAL_2ND
            {
                PredDir::Dual
            }
            else {
                PredDir::Fwd
            };
            cu.pdir = [dir; 4];
        }
        else {
            let mut code = 0;
            if frame_type == PictureType::F
                && ctx.pic.num_references > 1
                && ctx.seq.has_tool(ToolFlags::DHP)
            {
                let min_partitioned = cu.level == B8X8_IN_BIT
                    && cu.mode >= PredMode::Inter2NxN
                    && cu.mode <= PredMode::InterNRx2N;
                if !min_partitioned {
                    code = aec::read_pdir_dhp(aec, &mut ctx.ctxs, cu.mode);
                }
            }
            set_pdir_pf(cu, code);
        }

        if frame_type != PictureType::S && !cu.mode.is_skip() {
            read_references(ctx, aec, cu);
        }
    }
}

/// Read one luma prediction mode and spread it over the intra-mode map for later MPM queries.
fn read_intra_luma_mode(
    ctx: &mut ParserCtx<'_>,
    aec: &mut Aec<'_>,
    cu: &mut CuInfo,
    pu_idx: usize,
    spu_x: usize,
    spu_y: usize,
) -> Result<(), ()> {
    let code = aec::read_intra_luma_pred_code(aec, &mut ctx.ctxs);
    if aec.has_error() {
        return Err(());
    }

    let mut maps = ctx.maps.write().unwrap();
    let top = i32::from(maps.ipred_mode[maps.ipred_index(spu_x as i32, spu_y as i32 - 1)]);
    let left = i32::from(maps.ipred_mode[maps.ipred_index(spu_x as i32 - 1, spu_y as i32)]);

    let mut mpm = [top.min(left), top.max(left)];
    if mpm[0] == mpm[1] {
        mpm[0] = DC_PRED as i32;
        mpm[1] = if mpm[1] == DC_PRED as i32 { BI_PRED as i32 } else { mpm[1] };
    }

    let mut mode = if code < 0 {
        mpm[(code + 2) as usize]
    }
    else {
        code + i32::from(code >= mpm[0]) + i32::from(code + 1 >= mpm[1])
    };

    if mode < 0 || mode >= NUM_INTRA_MODE as i32 {
        error!("avs2: invalid intra prediction mode {} at ({}, {})", mode, cu.pix_x, cu.pix_y);
        mode = clip3(0, NUM_INTRA_MODE as i32 - 1, mode);
    }
    cu.intra_modes[pu_idx] = mode as i8;

    // Spread over the covered 4x4 positions; partitions shrink the footprint.
    let size_in_scu = 1usize << (cu.level - MIN_CU_SIZE_IN_BIT);
    let mut w_4x4 = size_in_scu << 1;
    let mut h_4x4 = size_in_scu << 1;
    match cu.tu_split {
        TuSplit::Hor => h_4x4 >>= 2,
        TuSplit::Ver => w_4x4 >>= 2,
        TuSplit::Cross => {
            w_4x4 >>= 1;
            h_4x4 >>= 1;
        }
        TuSplit::None => (),
    }

    for j in 0..h_4x4 {
        // Only the right column and bottom row matter to later blocks.
        let start = if j == h_4x4 - 1 { 0 } else { w_4x4 - 1 };
        for i in start..w_4x4 {
            let idx = maps.ipred_index((spu_x + i) as i32, (spu_y + j) as i32);
            maps.ipred_mode[idx] = mode as i8;
        }
    }

    Ok(())
}

/// Store the reference indices and prediction directions of every PU into the 4x4 grids.
fn store_references(maps: &mut FrameMaps, cu: &CuInfo) {
    let spu_x = cu.pix_x >> MIN_PU_SIZE_IN_BIT;
    let spu_y = cu.pix_y >> MIN_PU_SIZE_IN_BIT;

    for idx in 0..cu.num_pu {
        let pu = &cu.pu[idx];
        let x0 = spu_x + (pu.x >> MIN_PU_SIZE_IN_BIT) as usize;
        let y0 = spu_y + (pu.y >> MIN_PU_SIZE_IN_BIT) as usize;
        let w = (pu.w >> MIN_PU_SIZE_IN_BIT) as usize;
        let h = (pu.h >> MIN_PU_SIZE_IN_BIT) as usize;

        for y in y0..y0 + h {
            for x in x0..x0 + w {
                let pos = maps.spu_index(x, y);
                maps.ref_idx[pos] = cu.ref_idx[idx];
                maps.dir_pred[pos] = cu.pdir[idx];
            }
        }
    }
}

fn store_mv_rect(maps: &mut FrameMaps, x0: usize, y0: usize, w: usize, h: usize, mv_1st: Mv,
    mv_2nd: Mv) {
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            let pos = maps.spu_index(x, y);
            maps.mv_1st[pos] = mv_1st;
            maps.mv_2nd[pos] = mv_2nd;
        }
    }
}

/// Read the motion vectors of a non-skip inter CU.
fn read_motion_vectors(ctx: &mut ParserCtx<'_>, aec: &mut Aec<'_>, cu: &mut CuInfo)
    -> Result<(), ()> {
    let bframe = ctx.pic.picture_type == PictureType::B;
    let field = ctx.seq.has_tool(ToolFlags::FIELD_CODING);
    let pmvr = ctx.seq.has_tool(ToolFlags::PMVR);

    // DMH mode of an all-forward F-slice CU.
    if ctx.pic.picture_type == PictureType::F
        && cu.pdir.iter().take(cu.num_pu.max(1)).all(|&d| d == PredDir::Fwd)
    {
        let min_partitioned = cu.level == B8X8_IN_BIT
            && cu.mode >= PredMode::Inter2NxN
            && cu.mode <= PredMode::InterNRx2N;
        if !min_partitioned && ctx.seq.has_tool(ToolFlags::DMH) {
            cu.dmh_mode = aec::read_dmh_mode(aec, &mut ctx.ctxs, cu.level);
            if aec.has_error() {
                return Err(());
            }
        }
    }

    // Forward motion vectors.
    for idx in 0..cu.num_pu {
        if cu.pdir[idx] == PredDir::Bwd {
            continue;
        }

        let pu = cu.pu[idx];
        let pix_x = cu.pix_x + pu.x as usize;
        let pix_y = cu.pix_y + pu.y as usize;
        let ref_frame = cu.ref_idx[idx].r[0];

        let pu_type = mvpred::pu_type_for_mvp(pu.w as usize, pu.h as usize, pu.x as usize,
            pu.y as usize);
        let mvp = {
            let maps = ctx.maps.read().unwrap();
            let input = MvpInput {
                maps: &maps,
                seq: ctx.seq,
                pic: ctx.pic,
                slice_nr: ctx.slice_nr,
                background_pic: ctx.background_pic,
            };
            input.get_mvp(pix_x, pix_y, pu.w as usize, 0, ref_frame, pu_type)
        };

        let mv = if ctx.pic.picture_type != PictureType::S {
            let mvd = aec::read_mvd(aec, &mut ctx.ctxs);
            if aec.has_error() {
                return Err(());
            }
            mvpred::pmvr_mv_derivation(pmvr, mvd, mvp)
        }
        else {
            mvp
        };

        let mv_2nd = if cu.pdir[idx] == PredDir::Dual {
            let r1 = ref_frame.max(0) as usize;
            let r2 = cu.ref_idx[idx].r[1].max(0) as usize;
            let dist_1st = ctx.pic.dist_refs[r1];
            let dist_1st_scale = ctx.pic.dist_scale_refs[r1];
            let dist_2nd = ctx.pic.dist_refs[r2];

            Mv::new(
                mvpred::scale_mv_skip(mv.x.into(), dist_2nd, dist_1st_scale),
                mvpred::scale_mv_skip_y(ctx.pic, field, mv.y.into(), dist_2nd, dist_1st,
                    dist_1st_scale),
            )
        }
        else {
            Mv::ZERO
        };

        cu.mv[idx][0] = mv;
        if !bframe {
            cu.mv[idx][1] = mv_2nd;
        }

        let mut maps = ctx.maps.write().unwrap();
        let x0 = pix_x >> MIN_PU_SIZE_IN_BIT;
        let y0 = pix_y >> MIN_PU_SIZE_IN_BIT;
        let w = (pu.w >> MIN_PU_SIZE_IN_BIT) as usize;
        let h = (pu.h >> MIN_PU_SIZE_IN_BIT) as usize;
        if bframe {
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    let pos = maps.spu_index(x, y);
                    maps.mv_1st[pos] = mv;
                }
            }
        }
        else {
            store_mv_rect(&mut maps, x0, y0, w, h, mv, mv_2nd);
        }
    }

    if !bframe {
        return Ok(());
    }

    let dist_fwd = ctx.pic.dist_refs[B_FWD as usize];
    let dist_fwd_scale = ctx.pic.dist_scale_refs[B_FWD as usize];
    let dist_bwd = ctx.pic.dist_refs[B_BWD as usize];

    // Backward motion vectors.
    for idx in 0..cu.num_pu {
        if cu.pdir[idx] == PredDir::Fwd {
            continue;
        }

        let pu = cu.pu[idx];
        let pix_x = cu.pix_x + pu.x as usize;
        let pix_y = cu.pix_y + pu.y as usize;
        let ref_frame = cu.ref_idx[idx].r[1];

        let mv = if cu.pdir[idx] == PredDir::Sym {
            let mv_1st = cu.mv[idx][0];
            Mv::new(
                -mvpred::scale_mv_skip(mv_1st.x.into(), dist_bwd, dist_fwd_scale),
                -mvpred::scale_mv_skip_y(ctx.pic, field, mv_1st.y.into(), dist_bwd, dist_fwd,
                    dist_fwd_scale),
            )
        }
        else {
            let pu_type = mvpred::pu_type_for_mvp(pu.w as usize, pu.h as usize, pu.x as usize,
                pu.y as usize);
            let mvp = {
                let maps = ctx.maps.read().unwrap();
                let input = MvpInput {
                    maps: &maps,
                    seq: ctx.seq,
                    pic: ctx.pic,
                    slice_nr: ctx.slice_nr,
                    background_pic: ctx.background_pic,
                };
                input.get_mvp(pix_x, pix_y, pu.w as usize, 1, ref_frame, pu_type)
            };

            let mvd = aec::read_mvd(aec, &mut ctx.ctxs);
            if aec.has_error() {
                return Err(());
            }
            mvpred::pmvr_mv_derivation(pmvr, mvd, mvp)
        };

        cu.mv[idx][1] = mv;

        let mut maps = ctx.maps.write().unwrap();
        let x0 = pix_x >> MIN_PU_SIZE_IN_BIT;
        let y0 = pix_y >> MIN_PU_SIZE_IN_BIT;
        for y in y0..y0 + (pu.h >> MIN_PU_SIZE_IN_BIT) as usize {
            for x in x0..x0 + (pu.w >> MIN_PU_SIZE_IN_BIT) as usize {
                let pos = maps.spu_index(x, y);
                maps.mv_2nd[pos] = mv;
            }
        }
    }

    Ok(())
}

/// Derive and store the motion data of a skip/direct CU.
fn fill_skip_motion(ctx: &mut ParserCtx<'_>, cu: &mut CuInfo) {
    let frame_type = ctx.pic.picture_type;
    let field = ctx.seq.has_tool(ToolFlags::FIELD_CODING);
    let size = 1usize << cu.level;
    let fref0 = ctx.frefs.first().map(|f| f.as_ref());

    let neighbors = {
        let maps = ctx.maps.read().unwrap();
        mvpred::gather_skip_neighbors(&maps, ctx.seq, fref0, ctx.slice_nr, cu.pix_x, cu.pix_y,
            size, size)
    };

    let spu_x = cu.pix_x >> MIN_PU_SIZE_IN_BIT;
    let spu_y = cu.pix_y >> MIN_PU_SIZE_IN_BIT;
    let size_in_spu = size >> MIN_PU_SIZE_IN_BIT;

    if frame_type == PictureType::B {
        if cu.direct_skip != DS_NONE {
            let (mv_1st, mv_2nd) = mvpred::bskip_spatial_candidates(&neighbors);
            let ref_pair = match cu.direct_skip {
                DS_B_BWD => RefPair::new(INVALID_REF, B_BWD),
                DS_B_FWD => RefPair::new(B_FWD, INVALID_REF),
                _ => RefPair::new(B_FWD, B_BWD),
            };

            let mv_1st = mv_1st[cu.direct_skip];
            let mv_2nd = mv_2nd[cu.direct_skip];
            for i in 0..4 {
                cu.mv[i] = [mv_1st, mv_2nd];
                cu.ref_idx[i] = ref_pair;
            }

            let mut maps = ctx.maps.write().unwrap();
            store_mv_rect(&mut maps, spu_x, spu_y, size_in_spu, size_in_spu, mv_1st, mv_2nd);
            for y in spu_y..spu_y + size_in_spu {
                for x in spu_x..spu_x + size_in_spu {
                    let pos = maps.spu_index(x, y);
                    maps.ref_idx[pos] = ref_pair;
                    maps.dir_pred[pos] = cu.pdir[0];
                }
            }
        }
        else {
            // Temporal B-direct from the collocated motion of reference zero.
            let ref_pair = RefPair::new(B_FWD, B_BWD);
            let dist_bwd = ctx.pic.dist_refs[B_BWD as usize];
            let dist_fwd = ctx.pic.dist_refs[B_FWD as usize];
            let size_pu_in_spu = if cu.num_pu == 4 { size_in_spu / 2 } else { size_in_spu };

            for i in 0..cu.num_pu {
                let x8 = spu_x + (i & 1) * size_pu_in_spu;
                let y8 = spu_y + (i >> 1) * size_pu_in_spu;

                let (mv_1st, mv_2nd) = match fref0 {
                    Some(fref) => {
                        let motion = fref.motion.read().unwrap();
                        let w_spu = ctx.maps.read().unwrap().width_in_spu;
                        let pos = y8 * w_spu + x8;
                        let col_ref = motion.ref_idx[pos];

                        if col_ref < 0 {
                            drop(motion);
                            let maps = ctx.maps.read().unwrap();
                            let input = MvpInput {
                                maps: &maps,
                                seq: ctx.seq,
                                pic: ctx.pic,
                                slice_nr: ctx.slice_nr,
                                background_pic: ctx.background_pic,
                            };
                            (
                                input.get_mvp(cu.pix_x, cu.pix_y, size, 0, 0, 0),
                                input.get_mvp(cu.pix_x, cu.pix_y, size, 1, 0, 0),
                            )
                        }
                        else {
                            let tmv = motion.mv[pos];
                            let col_dist = fref.dist_refs[col_ref as usize];
                            let col_scale = fref.dist_scale_refs[col_ref as usize];

                            (
                                Mv::new(
                                    mvpred::scale_mv_biskip(tmv.x.into(), dist_fwd, col_scale),
                                    mvpred::scale_mv_biskip_y(ctx.pic, field, tmv.y.into(),
                                        dist_fwd, col_dist, col_scale),
                                ),
                                Mv::new(
                                    -mvpred::scale_mv_biskip(tmv.x.into(), dist_bwd, col_scale),
                                    -mvpred::scale_mv_biskip_y(ctx.pic, field, tmv.y.into(),
                                        dist_bwd, col_dist, col_scale),
                                ),
                            )
                        }
                    }
                    None => (Mv::ZERO, Mv::ZERO),
                };

                cu.mv[i] = [mv_1st, mv_2nd];
                cu.ref_idx[i] = ref_pair;

                let mut maps = ctx.maps.write().unwrap();
                store_mv_rect(&mut maps, x8, y8, size_pu_in_spu, size_pu_in_spu, mv_1st, mv_2nd);
                for y in y8..y8 + size_pu_in_spu {
                    for x in x8..x8 + size_pu_in_spu {
                        let pos = maps.spu_index(x, y);
                        maps.ref_idx[pos] = ref_pair;
                        maps.dir_pred[pos] = PredDir::Sym;
                    }
                }
            }
        }
        return;
    }

    // P/F skip.
    if cu.direct_skip == DS_NONE {
        // Temporal skip, optionally with a weighted second reference.
        let ref_pair = RefPair::new(
            0,
            if cu.weighted_skip != 0 { cu.weighted_skip } else { INVALID_REF },
        );
        let size_pu_in_spu = if size != 1 << MIN_CU_SIZE_IN_BIT {
            size_in_spu / 2
        }
        else {
            size_in_spu
        };
        let num_pu = cu.num_pu;

        for i in 0..num_pu {
            let x8 = spu_x + (i & 1) * size_pu_in_spu;
            let y8 = spu_y + (i >> 1) * size_pu_in_spu;

            let mv_1st = match fref0 {
                Some(fref) => {
                    let w_spu = ctx.maps.read().unwrap().width_in_spu;
                    mvpred::pf_skip_temporal_mv(fref, w_spu, x8, y8,
                        ctx.pic.dist_refs[0])
                }
                None => Mv::ZERO,
            };

            let mv_2nd = if ref_pair.r[1] != INVALID_REF {
                let r2 = ref_pair.r[1] as usize;
                Mv::new(
                    mvpred::scale_mv_skip(mv_1st.x.into(), ctx.pic.dist_refs[r2],
                        ctx.pic.dist_scale_refs[0]),
                    mvpred::scale_mv_skip_y(ctx.pic, field, mv_1st.y.into(),
                        ctx.pic.dist_refs[r2], ctx.pic.dist_refs[0],
                        ctx.pic.dist_scale_refs[0]),
                )
            }
            else {
                Mv::ZERO
            };

            cu.mv[i] = [mv_1st, mv_2nd];
            cu.ref_idx[i] = ref_pair;

            let mut maps = ctx.maps.write().unwrap();
            store_mv_rect(&mut maps, x8, y8, size_pu_in_spu, size_pu_in_spu, mv_1st, mv_2nd);
            for y in y8..y8 + size_pu_in_spu {
                for x in x8..x8 + size_pu_in_spu {
                    let pos = maps.spu_index(x, y);
                    maps.ref_idx[pos] = ref_pair;
                    maps.dir_pred[pos] = cu.pdir[0];
                }
            }
        }
    }
    else {
        // Spatial skip from the candidate slots.
        let c = mvpred::fskip_spatial_candidates(&neighbors);
        let mode = cu.direct_skip;
        let mv_1st = c.mv_1st[mode];
        let mv_2nd = c.mv_2nd[mode];
        let ref_pair = RefPair::new(c.ref_1st[mode], c.ref_2nd[mode]);

        for i in 0..4 {
            cu.mv[i] = [mv_1st, mv_2nd];
            cu.ref_idx[i] = ref_pair;
        }

        let mut maps = ctx.maps.write().unwrap();
        store_mv_rect(&mut maps, spu_x, spu_y, size_in_spu, size_in_spu, mv_1st, mv_2nd);
        for y in spu_y..spu_y + size_in_spu {
            for x in spu_x..spu_x + size_in_spu {
                let pos = maps.spu_index(x, y);
                maps.ref_idx[pos] = ref_pair;
                maps.dir_pred[pos] = cu.pdir[0];
            }
        }
    }
}

/// Read the coded block pattern of a CU. Returns the CBP and updates the TU split.
fn read_cbp(ctx: &mut ParserCtx<'_>, aec: &mut Aec<'_>, cu: &mut CuInfo) -> Result<(), ()> {
    let chroma = ctx.seq.chroma_format != lumiere_core::video::ChromaFormat::Monochrome;
    let scu_x = cu.pix_x >> MIN_CU_SIZE_IN_BIT;
    let scu_y = cu.pix_y >> MIN_CU_SIZE_IN_BIT;
    let mut cbp: u32 = 0;

    // The position of a luma transform block inside the CU, as a 4x4 position in the picture.
    let ctp_pos = |cu: &CuInfo, b8: usize| -> (i32, i32) {
        let cu_size = 1i32 << cu.level;
        let (x, y) = match cu.tu_split {
            TuSplit::Hor => (0, (cu_size * b8 as i32) >> 2),
            TuSplit::Ver => ((cu_size * b8 as i32) >> 2, 0),
            _ => ((cu_size * (b8 as i32 & 1)) >> 1, (cu_size * (b8 as i32 >> 1)) >> 1),
        };
        (
            (x + (scu_x << MIN_CU_SIZE_IN_BIT) as i32) >> MIN_PU_SIZE_IN_BIT,
            (y + (scu_y << MIN_CU_SIZE_IN_BIT) as i32) >> MIN_PU_SIZE_IN_BIT,
        )
    };

    let read_ctp_y = |ctx: &mut ParserCtx<'_>, aec: &mut Aec<'_>, cu: &CuInfo, b8: usize,
        cbp_so_far: u32| -> u32 {
        let (x4, y4) = ctp_pos(cu, b8);
        let maps = ctx.maps.read().unwrap();

        let probe = ScuInfo {
            slice_nr: ctx.slice_nr,
            cu_level: cu.level as u8,
            mode: cu.mode,
            tu_split: cu.tu_split,
            cbp: cbp_so_far as u8,
            qp: cu.qp,
            intra_mode: cu.intra_modes[0],
        };

        let a = if cu.tu_split == TuSplit::Ver && b8 > 0 {
            (cbp_so_far >> (b8 - 1)) & 1
        }
        else {
            maps.neighbor_ctp_y(x4 - 1, y4, scu_x, scu_y, &probe)
        };
        let b = if cu.tu_split == TuSplit::Hor && b8 > 0 {
            (cbp_so_far >> (b8 - 1)) & 1
        }
        else {
            maps.neighbor_ctp_y(x4, y4 - 1, scu_x, scu_y, &probe)
        };
        drop(maps);

        aec::read_ctp_y(aec, &mut ctx.ctxs, a, b)
    };

    if cu.mode.is_inter() {
        let ctp_zero = if !cu.mode.is_skip() {
            aec::read_ctp_zero_flag(aec, &mut ctx.ctxs)
        }
        else {
            false
        };

        if !ctp_zero {
            let tu_split_flag = aec::read_tu_split_flag(aec, &mut ctx.ctxs);
            cu.tu_split = derive_tu_split(cu.mode, cu.level, ctx.seq.tools, tu_split_flag);

            if chroma {
                cbp += aec::read_cbp_chroma(aec, &mut ctx.ctxs, false);
            }

            if cu.tu_split == TuSplit::None {
                if cbp == 0 {
                    cbp = 1;
                }
                else {
                    cbp += read_ctp_y(ctx, aec, cu, 0, cbp);
                }
            }
            else {
                for b8 in 0..4 {
                    let bit = read_ctp_y(ctx, aec, cu, b8, cbp);
                    cbp += bit << b8;
                }
            }
        }
        else {
            cu.tu_split = derive_tu_split(cu.mode, cu.level, ctx.seq.tools, true);
            cbp = 0;
        }
    }
    else {
        if cu.mode == PredMode::Intra2Nx2N {
            cbp = read_ctp_y(ctx, aec, cu, 0, cbp);
        }
        else {
            for b8 in 0..4 {
                let bit = read_ctp_y(ctx, aec, cu, b8, cbp);
                cbp += bit << b8;
            }
        }

        if chroma {
            cbp += aec::read_cbp_chroma(aec, &mut ctx.ctxs, true);
        }
    }

    if aec.has_error() {
        return Err(());
    }

    cu.cbp = cbp as u8;
    if cbp == 0 {
        ctx.last_dquant = 0;
    }

    // Delta QP.
    if ctx.pic.delta_qp_enable {
        let mut delta = 0;
        if cu.cbp != 0 {
            delta = aec::read_delta_qp(aec, &mut ctx.ctxs, ctx.last_dquant);
            let max_delta = 32 + 4 * (ctx.seq.sample_bit_depth as i32 - 8);
            if delta < -max_delta || delta > max_delta {
                error!("avs2: invalid cu_qp_delta {}", delta);
                delta = clip3(-max_delta, max_delta, delta);
            }
        }
        ctx.last_dquant = delta;
        cu.qp = (delta + i32::from(ctx.left_cu_qp)) as i8;
    }
    else {
        cu.qp = ctx.slice_qp as i8;
    }

    Ok(())
}

/// Read all residual coefficients of a CU into the LCU coefficient buffers.
fn read_coefficients(
    ctx: &mut ParserCtx<'_>,
    aec: &mut Aec<'_>,
    cu: &mut CuInfo,
    coeffs: &mut LcuCoeffs,
) -> Result<(), ()> {
    let weighted = ctx.seq.has_tool(ToolFlags::WEIGHTED_QUANT);
    let intra = cu.mode.is_intra();

    let intra_class = |cu: &CuInfo, b8: usize| -> usize {
        if cu.mode.is_intra() {
            aec::INTRA_MODE_SCAN_TYPE[cu.intra_modes[b8] as usize]
        }
        else {
            aec::INTRA_PRED_DC_DIAG
        }
    };

    let luma_base = cu.zscan_idx << 6;

    if cu.tu_split == TuSplit::None {
        if cu.cbp & 0x0f != 0 {
            let tu_log2 = cu.level.min(B32X32_IN_BIT);
            let size = 1usize << tu_log2;
            let class = intra_class(cu, 0);
            let swap_xy = intra && class == aec::INTRA_PRED_HOR;
            let (scale, shift) = quant_params(i32::from(cu.qp), tu_log2);

            let dequant = if weighted { Dequant::Deferred } else { Dequant::Flat { scale, shift } };
            let params = ResidualParams {
                w_tr: size,
                h_tr: size,
                luma: true,
                dc_diag: class == aec::INTRA_PRED_DC_DIAG,
                swap_xy,
                tu_split: cu.tu_split,
                dequant,
            };

            let block = &mut coeffs.y[luma_base..luma_base + size * size];
            block.fill(0);
            match aec::read_block_coeffs(aec, &mut ctx.ctxs, &params, block) {
                Some(pattern) => cu.dct_pattern[0] = pattern,
                None => return Err(()),
            }
        }
    }
    else {
        let wavelet = cu.level == B64X64_IN_BIT && cu.tu_split != TuSplit::Cross;
        let tus = transform_units(cu);
        let tu_log2 = cu.level - 1;
        let (scale, shift) = quant_params(i32::from(cu.qp), tu_log2 - u32::from(wavelet));

        for b8 in 0..4 {
            if cu.cbp & (1 << b8) == 0 {
                continue;
            }

            let w_tr = (tus[b8].w >> u32::from(wavelet)) as usize;
            let h_tr = (tus[b8].h >> u32::from(wavelet)) as usize;
            let class = intra_class(cu, b8);
            let swap_xy = intra
                && class == aec::INTRA_PRED_HOR
                && cu.mode != PredMode::Intra2Nxn
                && cu.mode != PredMode::IntraNx2N;

            let dequant = if weighted { Dequant::Deferred } else { Dequant::Flat { scale, shift } };
            let params = ResidualParams {
                w_tr,
                h_tr,
                luma: true,
                dc_diag: class == aec::INTRA_PRED_DC_DIAG,
                swap_xy,
                tu_split: cu.tu_split,
                dequant,
            };

            let offset = luma_base + (b8 << (2 * cu.level - 2));
            let block = &mut coeffs.y[offset..offset + w_tr * h_tr];
            block.fill(0);
            match aec::read_block_coeffs(aec, &mut ctx.ctxs, &params, block) {
                Some(pattern) => cu.dct_pattern[b8] = pattern,
                None => return Err(()),
            }
        }
    }

    // Chroma blocks.
    if ctx.seq.chroma_format != lumiere_core::video::ChromaFormat::Monochrome {
        let tu_log2 = cu.level - 1;
        let size = 1usize << tu_log2;
        let chroma_base = cu.zscan_idx << 4;

        for uv in 0..2 {
            if cu.cbp & (1 << (uv + 4)) == 0 {
                continue;
            }

            let qp_c = chroma_qp(i32::from(cu.qp), ctx.seq.sample_bit_depth);
            let (scale, shift) = quant_params(qp_c, tu_log2);
            let dequant = if weighted { Dequant::Deferred } else { Dequant::Flat { scale, shift } };

            let params = ResidualParams {
                w_tr: size,
                h_tr: size,
                luma: false,
                dc_diag: true,
                swap_xy: false,
                tu_split: TuSplit::None,
                dequant,
            };

            let buf = if uv == 0 { &mut coeffs.u } else { &mut coeffs.v };
            let block = &mut buf[chroma_base..chroma_base + size * size];
            block.fill(0);
            match aec::read_block_coeffs(aec, &mut ctx.ctxs, &params, block) {
                Some(pattern) => cu.dct_pattern[4 + uv] = pattern,
                None => return Err(()),
            }
        }
    }

    Ok(())
}

/// Publish the parsed CU into the per-SCU grid so neighbors and the deblocker can see it.
fn store_cu(maps: &mut FrameMaps, cu: &CuInfo) {
    let scu_x0 = cu.pix_x >> MIN_CU_SIZE_IN_BIT;
    let scu_y0 = cu.pix_y >> MIN_CU_SIZE_IN_BIT;
    let size_in_scu = 1usize << (cu.level - MIN_CU_SIZE_IN_BIT);

    let info = ScuInfo {
        slice_nr: cu.slice_nr,
        cu_level: cu.level as u8,
        mode: cu.mode,
        tu_split: cu.tu_split,
        cbp: cu.cbp,
        qp: cu.qp,
        intra_mode: cu.intra_modes[0],
    };

    for y in scu_y0..(scu_y0 + size_in_scu).min(maps.height_in_scu) {
        for x in scu_x0..(scu_x0 + size_in_scu).min(maps.width_in_scu) {
            let idx = y * maps.width_in_scu + x;
            maps.scu[idx] = info;
        }
    }
}

/// Parse one leaf CU.
fn read_cu(
    ctx: &mut ParserCtx<'_>,
    aec: &mut Aec<'_>,
    payload: &mut LcuPayload,
    level: u32,
    pix_x: usize,
    pix_y: usize,
) -> Result<CuInfo, ()> {
    let mut cu = CuInfo {
        pix_x,
        pix_y,
        level,
        qp: ctx.slice_qp as i8,
        slice_nr: ctx.slice_nr,
        ..Default::default()
    };

    let lcu_mask = (1usize << (ctx.seq.lcu_bits - MIN_CU_SIZE_IN_BIT)) - 1;
    let scu_x = pix_x >> MIN_CU_SIZE_IN_BIT;
    let scu_y = pix_y >> MIN_CU_SIZE_IN_BIT;
    cu.zscan_idx = B8XY_TO_ZSCAN[scu_y & lcu_mask][scu_x & lcu_mask];

    // Left-CU context: QP predictor and chroma-mode context.
    {
        let maps = ctx.maps.read().unwrap();
        ctx.left_cu_qp = ctx.slice_qp as i8;
        ctx.c_ipred_ctx = 0;
        if pix_x > 0 && scu_x > 0 {
            let left = maps.scu_at(scu_x - 1, scu_y);
            if left.slice_nr == ctx.slice_nr {
                ctx.c_ipred_ctx = usize::from(left.intra_mode != 0 && left.mode.is_intra());
                ctx.left_cu_qp = left.qp;
            }
        }
    }

    // 1. CU type, prediction direction, intra modes.
    let header = if ctx.pic.picture_type == PictureType::S {
        aec::read_cu_type_sframe(aec, &mut ctx.ctxs)
    }
    else if ctx.pic.picture_type == PictureType::I {
        aec::CuTypeHeader {
            mode: PredMode::IntraNxN,
            no_residual: false,
            weighted_skip: 0,
            direct_skip: DS_NONE,
        }
    }
    else {
        aec::read_cu_type(aec, &mut ctx.ctxs, ctx.pic.picture_type, level, ctx.seq.tools,
            ctx.pic.num_references)
    };

    if aec.has_error() {
        return Err(());
    }

    cu.mode = header.mode;
    cu.weighted_skip = header.weighted_skip;
    cu.direct_skip = header.direct_skip;
    let no_residual = header.no_residual;

    if ctx.pic.picture_type != PictureType::I && cu.mode.is_inter() {
        read_inter_pred_dir(ctx, aec, &mut cu);
        if aec.has_error() {
            return Err(());
        }
    }

    if cu.mode.is_intra() {
        let (intra_mode, tu_split_flag) =
            aec::read_intra_cu_type(aec, &mut ctx.ctxs, level, ctx.seq.has_tool(ToolFlags::SDIP));
        cu.mode = intra_mode;
        cu.tu_split = derive_tu_split(cu.mode, level, ctx.seq.tools, tu_split_flag);
        if aec.has_error() {
            return Err(());
        }

        let spu_x = pix_x >> MIN_PU_SIZE_IN_BIT;
        let spu_y = pix_y >> MIN_PU_SIZE_IN_BIT;
        let size_8x8 = 1usize << (level - B8X8_IN_BIT);
        let size_16x16 = if level >= B16X16_IN_BIT { 1usize << (level - B16X16_IN_BIT) } else { 1 };

        read_intra_luma_mode(ctx, aec, &mut cu, 0, spu_x, spu_y)?;

        match cu.mode {
            PredMode::Intra2Nxn => {
                for i in 1..4 {
                    read_intra_luma_mode(ctx, aec, &mut cu, i, spu_x, spu_y + i * size_16x16)?;
                }
            }
            PredMode::IntraNx2N => {
                for i in 1..4 {
                    read_intra_luma_mode(ctx, aec, &mut cu, i, spu_x + i * size_16x16, spu_y)?;
                }
            }
            PredMode::IntraNxN => {
                read_intra_luma_mode(ctx, aec, &mut cu, 1, spu_x + size_8x8, spu_y)?;
                read_intra_luma_mode(ctx, aec, &mut cu, 2, spu_x, spu_y + size_8x8)?;
                read_intra_luma_mode(ctx, aec, &mut cu, 3, spu_x + size_8x8, spu_y + size_8x8)?;
            }
            _ => (),
        }

        if ctx.seq.chroma_format != lumiere_core::video::ChromaFormat::Monochrome {
            cu.chroma_mode = match aec::read_intra_chroma_mode(
                aec,
                &mut ctx.ctxs,
                ctx.c_ipred_ctx,
                cu.intra_modes[0] as usize,
            ) {
                Some(mode) => mode,
                None => {
                    warn!("avs2: invalid chroma intra mode at ({}, {})", pix_x, pix_y);
                    0
                }
            };
        }

        if aec.has_error() {
            return Err(());
        }
    }

    // 2. PU layout and motion data.
    init_prediction_units(&mut cu, ctx.pic.picture_type);

    if cu.mode.is_intra() {
        for i in 0..4 {
            cu.ref_idx[i] = RefPair::default();
            cu.pdir[i] = PredDir::Invalid;
        }
        let mut maps = ctx.maps.write().unwrap();
        store_references(&mut maps, &cu);
    }
    else if cu.mode.is_skip() {
        fill_skip_motion(ctx, &mut cu);
    }
    else {
        {
            let mut maps = ctx.maps.write().unwrap();
            store_references(&mut maps, &cu);
        }
        read_motion_vectors(ctx, aec, &mut cu)?;
    }

    // 3. CBP and coefficients.
    if no_residual {
        cu.qp = ctx.left_cu_qp;
        cu.tu_split = TuSplit::None;
        cu.cbp = 0;
    }
    else {
        read_cbp(ctx, aec, &mut cu)?;
        if cu.cbp != 0 {
            read_coefficients(ctx, aec, &mut cu, &mut payload.coeffs)?;
        }
    }

    if aec.has_error() {
        return Err(());
    }

    // 4. Publish to the SCU grid.
    {
        let mut maps = ctx.maps.write().unwrap();
        store_cu(&mut maps, &cu);
    }

    Ok(cu)
}

/// Down-sample one LCU row of the 4x4 MV/ref grids into a referable frame's temporal snapshot,
/// sampling near each 16x16 center.
pub fn save_mv_ref_info(maps: &FrameMaps, frame: &Frame, seq: &SequenceParams, lcu_y: usize) {
    let w_spu = maps.width_in_spu;
    let h_spu = maps.height_in_spu;
    let spu_y0 = lcu_y << (seq.lcu_bits - MIN_PU_SIZE_IN_BIT);
    let rows = 1usize << (seq.lcu_bits - MIN_PU_SIZE_IN_BIT);

    let mut motion = frame.motion.write().unwrap();

    for j in spu_y0..(spu_y0 + rows).min(h_spu) {
        let mut y = (j & !3) + 2;
        if y >= h_spu {
            y = ((j & !3) + h_spu) >> 1;
        }

        for i in 0..w_spu {
            let mut x = (i & !3) + 2;
            if x >= w_spu {
                x = ((i & !3) + w_spu) >> 1;
            }

            let src = y * w_spu + x;
            let dst = j * w_spu + i;
            motion.mv[dst] = maps.mv_1st[src];
            motion.ref_idx[dst] = maps.ref_idx[src].r[0];
        }
    }
}

/// Parse the per-LCU SAO parameters given the merge neighbors.
pub fn parse_lcu_sao(
    ctx: &mut ParserCtx<'_>,
    aec: &mut Aec<'_>,
    lcu_x: usize,
    lcu_y: usize,
    left: Option<&SaoParam>,
    up: Option<&SaoParam>,
) -> SaoParam {
    // Merge candidates must be in the same slice.
    let same_slice = |dx: i32, dy: i32| -> bool {
        let maps = ctx.maps.read().unwrap();
        let scu_x = ((lcu_x as i32) << (ctx.seq.lcu_bits - MIN_CU_SIZE_IN_BIT)) + dx;
        let scu_y = ((lcu_y as i32) << (ctx.seq.lcu_bits - MIN_CU_SIZE_IN_BIT)) + dy;
        if scu_x < 0 || scu_y < 0 {
            return false;
        }
        maps.scu_at(scu_x as usize, scu_y as usize).slice_nr == ctx.slice_nr
    };

    let left = if lcu_x > 0 && same_slice(-1, 0) { left } else { None };
    let up = if lcu_y > 0 && same_slice(0, -1) { up } else { None };

    crate::sao::read_lcu_param(aec, &mut ctx.ctxs, &ctx.pic.sao_enable, left, up)
}

/// Parse the per-LCU ALF enable flags.
pub fn parse_lcu_alf(ctx: &mut ParserCtx<'_>, aec: &mut Aec<'_>) -> [bool; 3] {
    let mut enable = [false; 3];
    for comp in 0..3 {
        if ctx.pic.alf_enable[comp] {
            enable[comp] = alf::read_lcu_enable(aec, &mut ctx.ctxs, comp);
        }
    }
    enable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_pu_tiling_covers_cu() {
        // Every mode's PUs must tile the CU exactly.
        for mode_idx in 0..12 {
            let mut cu = CuInfo {
                level: 4,
                mode: match mode_idx {
                    0 => PredMode::Skip,
                    1 => PredMode::Inter2Nx2N,
                    2 => PredMode::Inter2NxN,
                    3 => PredMode::InterNx2N,
                    4 => PredMode::Inter2NxNU,
                    5 => PredMode::Inter2NxND,
                    6 => PredMode::InterNLx2N,
                    7 => PredMode::InterNRx2N,
                    8 => PredMode::Intra2Nx2N,
                    9 => PredMode::IntraNxN,
                    10 => PredMode::Intra2Nxn,
                    _ => PredMode::IntraNx2N,
                },
                ..Default::default()
            };
            init_prediction_units(&mut cu, PictureType::F);

            let size = 1 << cu.level;
            let mut covered = vec![false; size * size];
            for pu in cu.pu.iter().take(cu.num_pu) {
                assert!(pu.x >= 0 && pu.y >= 0);
                assert!(pu.x + pu.w <= size as i32 && pu.y + pu.h <= size as i32);
                for y in pu.y..pu.y + pu.h {
                    for x in pu.x..pu.x + pu.w {
                        let idx = (y * size as i32 + x) as usize;
                        assert!(!covered[idx], "overlap in mode {:?}", cu.mode);
                        covered[idx] = true;
                    }
                }
            }
            assert!(covered.iter().all(|&c| c), "hole in mode {:?}", cu.mode);
        }
    }

    #[test]
    fn verify_tu_split_derivation() {
        let tools = ToolFlags::NSQT | ToolFlags::SDIP;

        // No flag, no split.
        assert_eq!(derive_tu_split(PredMode::Inter2Nx2N, 4, tools, false), TuSplit::None);
        // Square CU types cross-split.
        assert_eq!(derive_tu_split(PredMode::Inter2Nx2N, 4, tools, true), TuSplit::Cross);
        // Rectangular inter partitions with NSQT strip-split along the partition axis.
        assert_eq!(derive_tu_split(PredMode::Inter2NxN, 4, tools, true), TuSplit::Hor);
        assert_eq!(derive_tu_split(PredMode::InterNx2N, 4, tools, true), TuSplit::Ver);
        // Without NSQT they fall back to the cross split.
        assert_eq!(
            derive_tu_split(PredMode::Inter2NxN, 4, ToolFlags::empty(), true),
            TuSplit::Cross
        );
        // SDIP intra partitions.
        assert_eq!(derive_tu_split(PredMode::Intra2Nxn, 4, tools, true), TuSplit::Hor);
        assert_eq!(derive_tu_split(PredMode::IntraNx2N, 4, tools, true), TuSplit::Ver);
        // At the minimum size the non-square modes are unavailable.
        assert_eq!(derive_tu_split(PredMode::Inter2NxN, 3, tools, true), TuSplit::Cross);
    }

    #[test]
    fn verify_zscan_table_is_z_order() {
        assert_eq!(B8XY_TO_ZSCAN[0][0], 0);
        assert_eq!(B8XY_TO_ZSCAN[0][1], 1);
        assert_eq!(B8XY_TO_ZSCAN[1][0], 2);
        assert_eq!(B8XY_TO_ZSCAN[1][1], 3);
        assert_eq!(B8XY_TO_ZSCAN[4][4], 48);

        let mut seen = [false; 64];
        for row in B8XY_TO_ZSCAN.iter() {
            for &v in row.iter() {
                assert!(!seen[v]);
                seen[v] = true;
            }
        }
    }

    #[test]
    fn verify_transform_units_geometry() {
        let cu = CuInfo {
            level: 5,
            tu_split: TuSplit::Hor,
            ..Default::default()
        };
        let tus = transform_units(&cu);
        for (i, tu) in tus.iter().enumerate() {
            assert_eq!((tu.x, tu.y, tu.w, tu.h), (0, i as i32 * 8, 32, 8));
        }
    }
}
