// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `recon` module turns parsed LCU payloads into samples: it composes intra or
//! motion-compensated prediction with the inverse-transformed residual of every transform unit.

use std::sync::{Arc, RwLock};

use log::error;

use lumiere_core::util::clip_pixel;
use lumiere_core::video::{ChromaFormat, PictureType, Sample};

use crate::aec::DctPattern;
use crate::common::*;
use crate::cu::{transform_units, CuInfo, LcuPayload};
use crate::frame::{Frame, PaddedPlane};
use crate::intra::{self, chroma_real_mode, CtuBorder, FillContext, IntraRefs, PredBlock};
use crate::mc;
use crate::neighbor::{is_avail, FrameMaps, MD_I_LEFT, MD_I_TOP};
use crate::transform::{self, WeightedQuant};

/// Scratch buffers of one reconstruction worker.
pub struct ReconScratch {
    refs: IntraRefs,
    /// Pre-deblock top/left border cache per component.
    pub borders: Vec<CtuBorder>,
    /// Pre-deblock bottom row of the LCU row above, per component, picture-wide.
    pub intra_border: Vec<Vec<Sample>>,
    pred: Vec<Sample>,
    pred2: Vec<Sample>,
    coeff: Vec<i32>,
}

impl ReconScratch {
    pub fn new(seq: &SequenceParams) -> ReconScratch {
        let lcu = seq.lcu_size();
        ReconScratch {
            refs: IntraRefs::new(),
            borders: (0..3).map(|_| CtuBorder::new(lcu)).collect(),
            intra_border: (0..3).map(|_| vec![0; seq.width + lcu]).collect(),
            pred: vec![0; lcu * lcu],
            pred2: vec![0; lcu * lcu],
            coeff: vec![0; lcu * lcu],
        }
    }
}

/// Everything reconstruction reads.
pub struct ReconCtx<'a> {
    pub seq: &'a SequenceParams,
    pub pic: &'a PictureParams,
    pub maps: &'a RwLock<FrameMaps>,
    pub frefs: &'a [Arc<Frame>],
    pub background: Option<&'a Arc<Frame>>,
    pub wq: &'a WeightedQuant,
}

impl ReconCtx<'_> {
    /// Resolve the reference frame of a prediction, honoring background referencing.
    fn reference(&self, ref_idx: i8) -> Option<&Arc<Frame>> {
        if self.pic.picture_type == PictureType::S {
            return self.background.or_else(|| self.frefs.first());
        }

        let is_pf = matches!(self.pic.picture_type, PictureType::P | PictureType::F);
        if is_pf
            && self.background.is_some()
            && ref_idx as usize + 1 == self.pic.num_references
            && self.pic.num_references >= 2
        {
            return self.background;
        }

        self.frefs.get(ref_idx.max(0) as usize)
    }
}

/// The weighted-quant size id of a luma TU of the given CU.
fn luma_wqm_size_id(cu: &CuInfo) -> usize {
    match cu.tu_split {
        TuSplit::None => (cu.level - B4X4_IN_BIT).min(3) as usize,
        TuSplit::Cross => (cu.level - B8X8_IN_BIT).min(3) as usize,
        _ => {
            let mut id = (cu.level - B8X8_IN_BIT) as usize;
            if cu.level == B64X64_IN_BIT {
                id -= 1;
            }
            id
        }
    }
}

/// Inverse-transform one residual block in place, running the deferred weighted dequantization
/// and the secondary transform when they apply.
fn prepare_residual(
    ctx: &ReconCtx<'_>,
    cu: &CuInfo,
    coeffs: &mut [i32],
    w_tr: usize,
    h_tr: usize,
    luma: bool,
    pattern: DctPattern,
    wavelet: bool,
    sec_avail: (bool, bool),
) {
    if ctx.seq.has_tool(ToolFlags::WEIGHTED_QUANT) {
        let qp = if luma {
            i32::from(cu.qp)
        }
        else {
            transform::chroma_qp(i32::from(cu.qp), ctx.seq.sample_bit_depth)
        };
        let tu_log2 = (w_tr.max(h_tr)).trailing_zeros();
        let (scale, shift) = transform::quant_params(qp, tu_log2);
        let wqm_shift = if ctx.pic.wq_data_index == 1 { 3 } else { 0 };
        let wqm_size_id = if luma { luma_wqm_size_id(cu) } else { (cu.level - 1).min(3) as usize };

        ctx.wq.dequant(&mut coeffs[..w_tr * h_tr], w_tr, h_tr, scale, shift, wqm_shift,
            wqm_size_id.min(3));
    }

    if luma
        && cu.mode.is_intra()
        && ctx.seq.has_tool(ToolFlags::SECONDARY_TRANSFORM)
        && w_tr == h_tr
        && w_tr <= 8
    {
        transform::inverse_secondary_transform(coeffs, w_tr, sec_avail.0, sec_avail.1);
    }

    transform::inverse_transform(coeffs, w_tr, h_tr, ctx.seq.sample_bit_depth, pattern);

    if wavelet {
        transform::inverse_wavelet(coeffs, w_tr * 2, h_tr * 2);
    }
}

/// Add a residual block onto the prediction already in the plane.
fn add_residual(plane: &mut PaddedPlane, x0: i32, y0: i32, coeffs: &[i32], w: usize, h: usize,
    bit_depth: u32) {
    for y in 0..h {
        for x in 0..w {
            let pred = i32::from(plane.get(x0 + x as i32, y0 + y as i32));
            let value = clip_pixel(pred + coeffs[y * w + x], bit_depth);
            plane.set(x0 + x as i32, y0 + y as i32, value);
        }
    }
}

/// Reconstruct the luma residual of one transform unit.
fn recon_luma_tu(
    ctx: &ReconCtx<'_>,
    scratch: &mut ReconScratch,
    payload: &LcuPayload,
    cu: &CuInfo,
    plane: &mut PaddedPlane,
    b8: usize,
    tu_x: i32,
    tu_y: i32,
    tu_w: usize,
    tu_h: usize,
    sec_avail: (bool, bool),
) {
    let wavelet = cu.level == B64X64_IN_BIT && cu.tu_split != TuSplit::Cross;
    let (cw, ch) = if wavelet { (tu_w / 2, tu_h / 2) } else { (tu_w, tu_h) };

    let base = (cu.zscan_idx << 6)
        + if cu.tu_split == TuSplit::None { 0 } else { b8 << (2 * cu.level - 2) };
    let src = &payload.coeffs.y[base..base + cw * ch];

    scratch.coeff[..tu_w * tu_h].fill(0);
    scratch.coeff[..cw * ch].copy_from_slice(src);

    prepare_residual(ctx, cu, &mut scratch.coeff[..tu_w * tu_h], cw, ch, true,
        cu.dct_pattern[b8], wavelet, sec_avail);

    add_residual(plane, tu_x, tu_y, &scratch.coeff[..tu_w * tu_h], tu_w, tu_h,
        ctx.seq.sample_bit_depth);
}

/// Reconstruct one chroma residual block.
fn recon_chroma_tu(
    ctx: &ReconCtx<'_>,
    scratch: &mut ReconScratch,
    payload: &LcuPayload,
    cu: &CuInfo,
    plane: &mut PaddedPlane,
    uv: usize,
    cx: i32,
    cy: i32,
) {
    let size = 1usize << (cu.level - 1);
    let base = cu.zscan_idx << 4;
    let src = if uv == 0 {
        &payload.coeffs.u[base..base + size * size]
    }
    else {
        &payload.coeffs.v[base..base + size * size]
    };

    scratch.coeff[..size * size].copy_from_slice(src);
    prepare_residual(ctx, cu, &mut scratch.coeff[..size * size], size, size, false,
        cu.dct_pattern[4 + uv], false, (false, false));

    add_residual(plane, cx, cy, &scratch.coeff[..size * size], size, size,
        ctx.seq.sample_bit_depth);
}

/// Intra-predict one block of a plane. Returns the (top, left) availability pair for the
/// secondary transform.
fn intra_pred_block(
    ctx: &ReconCtx<'_>,
    scratch: &mut ReconScratch,
    plane: &mut PaddedPlane,
    comp: usize,
    slice_nr: i32,
    mode: usize,
    pix_x: usize,
    pix_y: usize,
    ctu_pix_x: usize,
    ctu_pix_y: usize,
    bsx: usize,
    bsy: usize,
) -> (bool, bool) {
    // Availability works on luma 4x4 resolution regardless of the component.
    let scale = if comp == 0 { 0 } else { 1 };
    let avail = {
        let maps = ctx.maps.read().unwrap();
        maps.intra_avail(
            ctx.seq.lcu_bits,
            (pix_x << scale) >> MIN_PU_SIZE_IN_BIT,
            (pix_y << scale) >> MIN_PU_SIZE_IN_BIT,
            bsx << scale,
            bsy << scale,
            slice_nr,
        )
    };

    let in_ctu_x = pix_x - ctu_pix_x;
    let in_ctu_y = pix_y - ctu_pix_y;

    let fill = FillContext {
        plane,
        border: &scratch.borders[comp],
        border_shift: in_ctu_x as i32 - in_ctu_y as i32,
        x0: pix_x as i32,
        y0: pix_y as i32,
        left_from_border: in_ctu_x == 0,
        top_from_border: in_ctu_y == 0,
    };

    intra::fill_reference_samples(&mut scratch.refs, &fill, avail, bsx, bsy,
        ctx.seq.sample_bit_depth);

    let mut dst = PredBlock { plane, x0: pix_x as i32, y0: pix_y as i32 };
    intra::intra_pred(&scratch.refs, &mut dst, mode, bsx, bsy, avail,
        ctx.seq.sample_bit_depth);

    (is_avail(avail, MD_I_TOP), is_avail(avail, MD_I_LEFT))
}

/// Motion-compensate every PU of an inter CU into the current planes.
fn inter_pred_cu(
    ctx: &ReconCtx<'_>,
    scratch: &mut ReconScratch,
    planes: &mut [PaddedPlane],
    cu: &CuInfo,
) -> Result<(), ()> {
    const DMH_POS: [[[i32; 2]; 2]; 9] = [
        [[0, 0], [0, 0]],
        [[-1, 0], [1, 0]],
        [[0, -1], [0, 1]],
        [[-1, 1], [1, -1]],
        [[-1, -1], [1, 1]],
        [[-2, 0], [2, 0]],
        [[0, -2], [0, 2]],
        [[-2, 2], [2, -2]],
        [[-2, -2], [2, 2]],
    ];

    let bit_depth = ctx.seq.sample_bit_depth;
    let width_in_lcu = ctx.seq.width_in_lcu();

    for idx in 0..cu.num_pu {
        let pu = cu.pu[idx];
        let pix_x = cu.pix_x as i32 + pu.x;
        let pix_y = cu.pix_y as i32 + pu.y;
        let width = pu.w as usize;
        let height = pu.h as usize;

        let mut mv_1st = cu.mv[idx][0];
        let mut mv_2nd = cu.mv[idx][1];
        let pred_dir = cu.pdir[idx];

        let (fref1, fref2) = match pred_dir {
            PredDir::Bwd => {
                mv_1st = cu.mv[idx][1];
                (ctx.frefs.get(B_BWD as usize), None)
            }
            PredDir::Sym | PredDir::Bid => {
                (ctx.frefs.get(B_FWD as usize), ctx.frefs.get(B_BWD as usize))
            }
            PredDir::Fwd | PredDir::Dual => {
                if ctx.pic.picture_type == PictureType::B {
                    (ctx.frefs.get(B_FWD as usize), None)
                }
                else if pred_dir == PredDir::Dual {
                    (
                        ctx.reference(cu.ref_idx[idx].r[0]),
                        ctx.reference(cu.ref_idx[idx].r[1]),
                    )
                }
                else if cu.dmh_mode != 0 {
                    let dmh = DMH_POS[cu.dmh_mode as usize];
                    mv_2nd = Mv::new(
                        mv_1st.x + dmh[1][0] as i16,
                        mv_1st.y + dmh[1][1] as i16,
                    );
                    mv_1st = Mv::new(
                        mv_1st.x + dmh[0][0] as i16,
                        mv_1st.y + dmh[0][1] as i16,
                    );
                    let fref = ctx.reference(cu.ref_idx[idx].r[0]);
                    (fref, fref)
                }
                else {
                    (ctx.reference(cu.ref_idx[idx].r[0]), None)
                }
            }
            PredDir::Invalid => (None, None),
        };

        let fref1 = match fref1 {
            Some(f) => f,
            None => {
                error!("avs2: non-existing reference frame for PU at ({}, {})", pix_x, pix_y);
                return Err(());
            }
        };

        let (vec1_x, vec1_y) = mc::clip_mv_to_frame(mv_1st, ctx.seq.width as i32,
            ctx.seq.height as i32, pix_x, pix_y, width as i32, height as i32);
        let (vec2_x, vec2_y) = mc::clip_mv_to_frame(mv_2nd, ctx.seq.width as i32,
            ctx.seq.height as i32, pix_x, pix_y, width as i32, height as i32);

        // Luma.
        fref1.wait_pixel_row((vec1_y >> 2) + height as i32 + 8 + 4, ctx.seq.lcu_bits,
            width_in_lcu);
        {
            let ref_planes = fref1.planes.read().unwrap();
            mc::mc_luma(&mut scratch.pred, width, vec1_x, vec1_y, width, height,
                &ref_planes[0], bit_depth);
        }

        if let Some(fref2) = fref2 {
            fref2.wait_pixel_row((vec2_y >> 2) + height as i32 + 8 + 4, ctx.seq.lcu_bits,
                width_in_lcu);
            let ref_planes = fref2.planes.read().unwrap();
            mc::mc_luma(&mut scratch.pred2, width, vec2_x, vec2_y, width, height,
                &ref_planes[0], bit_depth);
            mc::block_avg(&mut scratch.pred, width, &scratch.pred2, width, width, height);
        }

        for y in 0..height {
            planes[0]
                .row_from_mut(pix_x, pix_y + y as i32, width)
                .copy_from_slice(&scratch.pred[y * width..y * width + width]);
        }

        // Chroma.
        if ctx.seq.chroma_format == ChromaFormat::Yuv420 {
            let cx = pix_x >> 1;
            let cy = pix_y >> 1;
            let cw = width >> 1;
            let ch = height >> 1;

            for (uv, plane_idx) in [(0usize, 1usize), (1, 2)] {
                {
                    let ref_planes = fref1.planes.read().unwrap();
                    mc::mc_chroma(&mut scratch.pred, cw, vec1_x, vec1_y, cw, ch,
                        &ref_planes[1 + uv], bit_depth);
                }

                if let Some(fref2) = fref2 {
                    let ref_planes = fref2.planes.read().unwrap();
                    mc::mc_chroma(&mut scratch.pred2, cw, vec2_x, vec2_y, cw, ch,
                        &ref_planes[1 + uv], bit_depth);
                    mc::block_avg(&mut scratch.pred, cw, &scratch.pred2, cw, cw, ch);
                }

                for y in 0..ch {
                    planes[plane_idx]
                        .row_from_mut(cx, cy + y as i32, cw)
                        .copy_from_slice(&scratch.pred[y * cw..y * cw + cw]);
                }
            }
        }
    }

    Ok(())
}

/// Reconstruct every CU of a parsed LCU into the current frame planes.
pub fn recon_lcu(
    ctx: &ReconCtx<'_>,
    scratch: &mut ReconScratch,
    planes: &mut [PaddedPlane],
    payload: &LcuPayload,
) -> Result<(), ()> {
    let chroma = ctx.seq.chroma_format == ChromaFormat::Yuv420;
    let ctu_pix_x = payload.lcu_x << ctx.seq.lcu_bits;
    let ctu_pix_y = payload.lcu_y << ctx.seq.lcu_bits;

    for cu in payload.cus.iter() {
        if cu.slice_nr < 0 {
            // Parse poisoned this CU; leave the prediction at its default.
            continue;
        }

        let tus = transform_units(cu);

        if cu.mode.is_intra() {
            // Luma: predict and reconstruct TU by TU so later TUs see reconstructed neighbors.
            if cu.tu_split == TuSplit::None {
                let avail = intra_pred_block(ctx, scratch, &mut planes[0], 0, cu.slice_nr,
                    cu.intra_modes[0] as usize, cu.pix_x, cu.pix_y, ctu_pix_x, ctu_pix_y,
                    tus[0].w as usize, tus[0].h as usize);
                if cu.cbp & 0x0f != 0 {
                    recon_luma_tu(ctx, scratch, payload, cu, &mut planes[0], 0,
                        cu.pix_x as i32, cu.pix_y as i32, tus[0].w as usize,
                        tus[0].h as usize, avail);
                }
            }
            else {
                for b8 in 0..4 {
                    let tu = tus[b8];
                    let avail = intra_pred_block(ctx, scratch, &mut planes[0], 0, cu.slice_nr,
                        cu.intra_modes[b8] as usize, cu.pix_x + tu.x as usize,
                        cu.pix_y + tu.y as usize, ctu_pix_x, ctu_pix_y, tu.w as usize,
                        tu.h as usize);
                    if cu.cbp & (1 << b8) != 0 {
                        recon_luma_tu(ctx, scratch, payload, cu, &mut planes[0], b8,
                            cu.pix_x as i32 + tu.x, cu.pix_y as i32 + tu.y, tu.w as usize,
                            tu.h as usize, avail);
                    }
                }
            }

            // Chroma prediction and residual.
            if chroma {
                let size_c = 1usize << (cu.level - 1);
                let cx = cu.pix_x >> 1;
                let cy = cu.pix_y >> 1;
                let mode =
                    chroma_real_mode(cu.chroma_mode, cu.intra_modes[0] as usize);

                for uv in 0..2 {
                    intra_pred_block(ctx, scratch, &mut planes[1 + uv], 1 + uv, cu.slice_nr,
                        mode, cx, cy, ctu_pix_x >> 1, ctu_pix_y >> 1, size_c, size_c);
                    if cu.cbp & (1 << (4 + uv)) != 0 {
                        recon_chroma_tu(ctx, scratch, payload, cu, &mut planes[1 + uv], uv,
                            cx as i32, cy as i32);
                    }
                }
            }
        }
        else {
            inter_pred_cu(ctx, scratch, planes, cu)?;

            if cu.tu_split == TuSplit::None {
                if cu.cbp & 0x0f != 0 {
                    recon_luma_tu(ctx, scratch, payload, cu, &mut planes[0], 0,
                        cu.pix_x as i32, cu.pix_y as i32, tus[0].w as usize, tus[0].h as usize,
                        (false, false));
                }
            }
            else {
                for b8 in 0..4 {
                    if cu.cbp & (1 << b8) != 0 {
                        let tu = tus[b8];
                        recon_luma_tu(ctx, scratch, payload, cu, &mut planes[0], b8,
                            cu.pix_x as i32 + tu.x, cu.pix_y as i32 + tu.y, tu.w as usize,
                            tu.h as usize, (false, false));
                    }
                }
            }

            if chroma {
                let cx = (cu.pix_x >> 1) as i32;
                let cy = (cu.pix_y >> 1) as i32;
                for uv in 0..2 {
                    if cu.cbp & (1 << (4 + uv)) != 0 {
                        recon_chroma_tu(ctx, scratch, payload, cu, &mut planes[1 + uv], uv, cx,
                            cy);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Cache the pre-deblock borders of a just-reconstructed CTU for the intra prediction of its
/// right neighbor, and bank its bottom row for the CTU row below.
pub fn cache_ctu_borders(
    scratch: &mut ReconScratch,
    planes: &[PaddedPlane],
    seq: &SequenceParams,
    lcu_x: usize,
    lcu_y: usize,
) {
    let lcu = seq.lcu_size();

    for comp in 0..planes.len() {
        let shift = usize::from(comp > 0);
        let pix_x = (lcu_x << seq.lcu_bits) >> shift;
        let pix_y = (lcu_y << seq.lcu_bits) >> shift;
        let w = (lcu >> shift).min((seq.width >> shift) - pix_x);
        let h = (lcu >> shift).min((seq.height >> shift) - pix_y);
        let plane = &planes[comp];
        let row_cache_max = (seq.width >> shift) - 1;

        // Top side of the next CTU: the banked row above, starting one sample left of it.
        let src_base = pix_x + w - 1;
        for i in 0..=2 * w {
            let src = (src_base + i).min(row_cache_max);
            let value = scratch.intra_border[comp][src];
            scratch.borders[comp].set(i as i32, value);
        }

        // Left side of the next CTU: this CTU's rightmost column, pre-deblock.
        for i in 1..=h {
            let value = plane.get((pix_x + w - 1) as i32, (pix_y + i - 1) as i32);
            scratch.borders[comp].set(-(i as i32), value);
        }

        // Bank this CTU's bottom row for the row below.
        if pix_y + h < seq.height >> shift {
            for x in 0..w {
                scratch.intra_border[comp][pix_x + x] =
                    plane.get((pix_x + x) as i32, (pix_y + h - 1) as i32);
            }
        }
    }
}

/// Load the border caches at the start of an LCU row from the banked bottom row above.
pub fn load_row_borders(scratch: &mut ReconScratch, planes_len: usize, seq: &SequenceParams) {
    for comp in 0..planes_len {
        let shift = usize::from(comp > 0);
        let w = (seq.lcu_size() >> shift).min(seq.width >> shift);
        for i in 0..=2 * w {
            let src = i.min((seq.width >> shift) - 1);
            let value = scratch.intra_border[comp][src];
            scratch.borders[comp].set(1 + i as i32, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cu::{CuInfo, LcuCoeffs};
    use crate::intra::{DC_PRED, VERT_PRED};
    use crate::sao::SaoParam;

    fn test_seq(width: usize, height: usize, chroma: ChromaFormat) -> SequenceParams {
        SequenceParams {
            width,
            height,
            lcu_bits: 4,
            chroma_format: chroma,
            sample_bit_depth: 8,
            output_bit_depth: 8,
            tools: ToolFlags::empty(),
        }
    }

    fn open_maps(seq: &SequenceParams) -> RwLock<FrameMaps> {
        let mut maps = FrameMaps::new(seq);
        for scu in maps.scu.iter_mut() {
            scu.slice_nr = 0;
        }
        RwLock::new(maps)
    }

    fn empty_payload(seq: &SequenceParams, lcu_x: usize, lcu_y: usize, cu: CuInfo)
        -> LcuPayload {
        LcuPayload {
            lcu_x,
            lcu_y,
            cus: vec![cu],
            coeffs: LcuCoeffs::new(seq.lcu_bits),
            sao: SaoParam::default(),
            alf_enable: [false; 3],
        }
    }

    fn luma_plane(seq: &SequenceParams) -> Vec<PaddedPlane> {
        vec![PaddedPlane::new(seq.width, seq.height, FRAME_PAD).unwrap()]
    }

    #[test]
    fn verify_vertical_intra_replicates_reference_row() {
        // A 16x16 intra CU in vertical mode with an all-zero residual reproduces the row of
        // reference samples above it in every output row.
        let seq = test_seq(16, 32, ChromaFormat::Monochrome);
        let maps = open_maps(&seq);
        let pic = PictureParams::default();
        let wq = WeightedQuant::default();

        let ctx = ReconCtx {
            seq: &seq,
            pic: &pic,
            maps: &maps,
            frefs: &[],
            background: None,
            wq: &wq,
        };

        let mut scratch = ReconScratch::new(&seq);
        for x in 0..16 {
            // The CTU at row one reads its top references from the border cache.
            scratch.borders[0].set(1 + x, 60 + x as Sample);
        }

        let cu = CuInfo {
            pix_x: 0,
            pix_y: 16,
            level: 4,
            mode: PredMode::Intra2Nx2N,
            intra_modes: [VERT_PRED as i8; 4],
            cbp: 0,
            ..Default::default()
        };

        let mut planes = luma_plane(&seq);
        let payload = empty_payload(&seq, 0, 1, cu);
        recon_lcu(&ctx, &mut scratch, &mut planes, &payload).unwrap();

        for y in 16..32 {
            for x in 0..16 {
                assert_eq!(planes[0].get(x, y), 60 + x as Sample, "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn verify_dc_intra_without_neighbors_is_mid_grey() {
        // An 8x8 DC block with no top or left neighbors decodes to 1 << (bit_depth - 1).
        let seq = test_seq(16, 16, ChromaFormat::Monochrome);
        let maps = open_maps(&seq);
        let pic = PictureParams::default();
        let wq = WeightedQuant::default();

        let ctx = ReconCtx {
            seq: &seq,
            pic: &pic,
            maps: &maps,
            frefs: &[],
            background: None,
            wq: &wq,
        };

        let mut scratch = ReconScratch::new(&seq);
        let cu = CuInfo {
            pix_x: 0,
            pix_y: 0,
            level: 3,
            mode: PredMode::Intra2Nx2N,
            intra_modes: [DC_PRED as i8; 4],
            cbp: 0,
            ..Default::default()
        };

        // The picture corner has no reconstructed neighbors even with the slice marked.
        let mut planes = luma_plane(&seq);
        let payload = empty_payload(&seq, 0, 0, cu);
        recon_lcu(&ctx, &mut scratch, &mut planes, &payload).unwrap();

        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(planes[0].get(x, y), 128);
            }
        }
    }

    #[test]
    fn verify_skip_with_identity_mv_copies_reference() {
        // A P-frame skip CU with a zero motion vector reproduces the reference samples exactly.
        let seq = test_seq(16, 16, ChromaFormat::Monochrome);
        let maps = open_maps(&seq);
        let mut pic = PictureParams::default();
        pic.picture_type = PictureType::P;
        pic.num_references = 1;
        let wq = WeightedQuant::default();

        // Build a fully reconstructed reference frame with a gradient.
        let fref = {
            let mut frame = Frame::new(&seq).unwrap();
            {
                let planes = frame.planes.get_mut().unwrap();
                for y in 0..16 {
                    for x in 0..16 {
                        planes[0].set(x, y, (10 + x * 3 + y * 5) as Sample);
                    }
                }
                planes[0].pad_rows(0, 16);
            }
            let frame = Arc::new(frame);
            frame.broadcast_all_rows(seq.width_in_lcu());
            frame
        };

        let frefs = vec![fref];
        let ctx = ReconCtx {
            seq: &seq,
            pic: &pic,
            maps: &maps,
            frefs: &frefs,
            background: None,
            wq: &wq,
        };

        let mut scratch = ReconScratch::new(&seq);
        let cu = CuInfo {
            pix_x: 0,
            pix_y: 0,
            level: 4,
            mode: PredMode::Skip,
            num_pu: 1,
            pu: [crate::cu::CodingBlock { x: 0, y: 0, w: 16, h: 16 }; 4],
            pdir: [PredDir::Fwd; 4],
            ref_idx: [RefPair::new(0, INVALID_REF); 4],
            mv: [[Mv::ZERO; 2]; 4],
            cbp: 0,
            ..Default::default()
        };

        let mut planes = luma_plane(&seq);
        let payload = empty_payload(&seq, 0, 0, cu);
        recon_lcu(&ctx, &mut scratch, &mut planes, &payload).unwrap();

        let ref_planes = frefs[0].planes.read().unwrap();
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(planes[0].get(x, y), ref_planes[0].get(x, y), "({}, {})", x, y);
            }
        }
    }
}
