// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `mvpred` module derives motion-vector predictors: reference-distance scaling, the spatial
//! median predictor, PMVR re-centering, and the skip/direct candidate construction.

use lumiere_core::util::{sign2, sign3};
use lumiere_core::video::PictureType;

use crate::common::*;
use crate::frame::Frame;
use crate::neighbor::*;

/// Which neighbor the predictor is taken from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum MvpType {
    Median,
    Left,
    Top,
    TopRight,
}

/// Field-coding parity corrections for the vertical MV component.
///
/// Derives (delta, delta2) from the parities of the current, reference, scaled, and scaled
/// reference picture orders. `delta` is added to the vertical component before scaling, `delta2`
/// subtracted afterwards.
fn field_deltas(top_field: bool, ori_poc: i32, ori_ref_poc: i32, scaled_poc: i32,
    scaled_ref_poc: i32) -> (i32, i32) {
    let ori_poc = distance_index(ori_poc) / 2;
    let ori_ref_poc = distance_index(ori_ref_poc) / 2;
    let scaled_poc = distance_index(scaled_poc) / 2;
    let scaled_ref_poc = distance_index(scaled_ref_poc) / 2;

    let (delta, delta2);

    if top_field {
        delta2 = if scaled_ref_poc % 2 != scaled_poc % 2 { 2 } else { 0 };
        delta = if scaled_poc % 2 == ori_poc % 2 {
            if ori_ref_poc % 2 != ori_poc % 2 { 2 } else { 0 }
        }
        else if ori_ref_poc % 2 != ori_poc % 2 {
            -2
        }
        else {
            0
        };
    }
    else {
        delta2 = if scaled_ref_poc % 2 != scaled_poc % 2 { -2 } else { 0 };
        delta = if scaled_poc % 2 == ori_poc % 2 {
            if ori_ref_poc % 2 != ori_poc % 2 { -2 } else { 0 }
        }
        else if ori_ref_poc % 2 != ori_poc % 2 {
            2
        }
        else {
            0
        };
    }

    (delta, delta2)
}

/// Scale an MV component to the target reference distance (normal inter mode).
#[inline]
pub fn scale_mv_default(mv: i32, dist_dst: i32, dist_src_scale: i32) -> i16 {
    let scaled = sign3(mv)
        * ((mv.abs() * dist_dst * dist_src_scale + DIST_SCALE_HALF) >> DIST_SCALE_BITS);
    scaled.clamp(-32768, 32767) as i16
}

/// Vertical variant of [`scale_mv_default`] carrying the field-coding corrections.
pub fn scale_mv_default_y(pic: &PictureParams, field_coding: bool, mvy: i32, dist_dst: i32,
    dist_src: i32, dist_src_scale: i32) -> i16 {
    if field_coding {
        let (delta, delta2) = field_deltas(
            pic.top_field,
            pic.poc,
            pic.poc - dist_src,
            pic.poc,
            pic.poc - dist_dst,
        );
        (i32::from(scale_mv_default(mvy + delta, dist_dst, dist_src_scale)) - delta2) as i16
    }
    else {
        scale_mv_default(mvy, dist_dst, dist_src_scale)
    }
}

/// Scale an MV component for skip/direct derivation (unsigned rounding).
#[inline]
pub fn scale_mv_skip(mv: i32, dist_dst: i32, dist_src_scale: i32) -> i16 {
    let scaled = (mv * dist_dst * dist_src_scale + DIST_SCALE_HALF) >> DIST_SCALE_BITS;
    scaled.clamp(-32768, 32767) as i16
}

pub fn scale_mv_skip_y(pic: &PictureParams, field_coding: bool, mvy: i32, dist_dst: i32,
    dist_src: i32, dist_src_scale: i32) -> i16 {
    if field_coding {
        let (delta, delta2) = field_deltas(
            pic.top_field,
            pic.poc,
            pic.poc - dist_src,
            pic.poc,
            pic.poc - dist_dst,
        );
        (i32::from(scale_mv_skip(mvy + delta, dist_dst, dist_src_scale)) - delta2) as i16
    }
    else {
        scale_mv_skip(mvy, dist_dst, dist_src_scale)
    }
}

/// Scale an MV component for bi-directional skip/direct derivation.
#[inline]
pub fn scale_mv_biskip(mv: i32, dist_dst: i32, dist_src_scale: i32) -> i16 {
    let scaled = sign3(mv) * ((dist_src_scale * (1 + mv.abs() * dist_dst) - 1) >> DIST_SCALE_BITS);
    scaled.clamp(-32768, 32767) as i16
}

pub fn scale_mv_biskip_y(pic: &PictureParams, field_coding: bool, mvy: i32, dist_dst: i32,
    dist_src: i32, dist_src_scale: i32) -> i16 {
    if field_coding {
        let (delta, delta2) = field_deltas(
            pic.top_field,
            pic.poc,
            pic.poc - dist_src,
            pic.poc,
            pic.poc - dist_dst,
        );
        (i32::from(scale_mv_biskip(mvy + delta, dist_dst, dist_src_scale)) - delta2) as i16
    }
    else {
        scale_mv_biskip(mvy, dist_dst, dist_src_scale)
    }
}

/// Per-component median of the three spatial candidates, with the directional early-outs and the
/// smallest-pair-difference tie break.
fn derive_median_mv(mva: i32, mvb: i32, mvc: i32) -> i16 {
    let mvp = if (mva < 0 && mvb > 0 && mvc > 0) || (mva > 0 && mvb < 0 && mvc < 0) {
        (mvb + mvc) / 2
    }
    else if (mvb < 0 && mva > 0 && mvc > 0) || (mvb > 0 && mva < 0 && mvc < 0) {
        (mvc + mva) / 2
    }
    else if (mvc < 0 && mva > 0 && mvb > 0) || (mvc > 0 && mva < 0 && mvb < 0) {
        (mva + mvb) / 2
    }
    else {
        let d_ab = (mva - mvb).abs();
        let d_bc = (mvb - mvc).abs();
        let d_ca = (mvc - mva).abs();
        let min_diff = d_ab.min(d_bc).min(d_ca);

        if min_diff == d_ab {
            (mva + mvb) / 2
        }
        else if min_diff == d_bc {
            (mvb + mvc) / 2
        }
        else {
            (mvc + mva) / 2
        }
    };

    mvp as i16
}

/// PU shape class used to prefer a directional candidate over the median.
pub fn pu_type_for_mvp(bsx: usize, bsy: usize, pu_x: usize, pu_y: usize) -> u32 {
    if bsx < bsy {
        if pu_x == 0 {
            1
        }
        else {
            2
        }
    }
    else if bsx > bsy {
        if pu_y == 0 {
            3
        }
        else {
            4
        }
    }
    else {
        0
    }
}

fn derive_mvp_type(ref_frame: i8, r_left: i8, r_top: i8, r_topright: i8, pu_type: u32)
    -> MvpType {
    if r_left != INVALID_REF && r_top == INVALID_REF && r_topright == INVALID_REF {
        MvpType::Left
    }
    else if r_left == INVALID_REF && r_top != INVALID_REF && r_topright == INVALID_REF {
        MvpType::Top
    }
    else if r_left == INVALID_REF && r_top == INVALID_REF && r_topright != INVALID_REF {
        MvpType::TopRight
    }
    else {
        match pu_type {
            1 | 4 if r_left == ref_frame => MvpType::Left,
            2 if r_topright == ref_frame => MvpType::TopRight,
            3 if r_top == ref_frame => MvpType::Top,
            _ => MvpType::Median,
        }
    }
}

/// Mask out a neighbor reference that is incompatible with background referencing, or any
/// neighbor of an S slice.
fn recheck_neighbor_ref(pic: &PictureParams, background_pic: bool, ref_frame: i8, neighbor: i8)
    -> i8 {
    if neighbor == INVALID_REF {
        return neighbor;
    }

    let last = pic.num_references as i8 - 1;
    let is_pf = matches!(pic.picture_type, PictureType::P | PictureType::F);

    if background_pic && is_pf && ((ref_frame == last) != (neighbor == last)) {
        return INVALID_REF;
    }

    if pic.picture_type == PictureType::S {
        return INVALID_REF;
    }

    neighbor
}

/// Inputs of one MV-predictor derivation.
pub struct MvpInput<'a> {
    pub maps: &'a FrameMaps,
    pub seq: &'a SequenceParams,
    pub pic: &'a PictureParams,
    pub slice_nr: i32,
    /// The picture carries a background reference in its list.
    pub background_pic: bool,
}

impl<'a> MvpInput<'a> {
    /// Derive the motion-vector predictor of the PU at pixel (pix_x, pix_y), width `bsx`.
    ///
    /// `bwd` selects the second (backward) MV/reference channel of the neighbors.
    pub fn get_mvp(&self, pix_x: usize, pix_y: usize, bsx: usize, bwd: usize, ref_frame: i8,
        pu_type: u32) -> Mv {
        let maps = self.maps;
        let x0 = (pix_x >> MIN_PU_SIZE_IN_BIT) as i32;
        let y0 = (pix_y >> MIN_PU_SIZE_IN_BIT) as i32;
        let x1 = (bsx >> MIN_PU_SIZE_IN_BIT) as i32 + x0 - 1;

        let lcu_mask = (1usize << (self.seq.lcu_bits - B4X4_IN_BIT)) - 1;
        let tr_avail = AVAILS.top_right(
            self.seq.lcu_bits,
            x1 as usize & lcu_mask,
            y0 as usize & lcu_mask,
        );

        let left = maps.spatial_neighbor(self.slice_nr, x0 - 1, y0);
        let top = maps.spatial_neighbor(self.slice_nr, x0, y0 - 1);
        let top_left = maps.spatial_neighbor(self.slice_nr, x0 - 1, y0 - 1);
        let top_right = if tr_avail {
            maps.spatial_neighbor(self.slice_nr, x1 + 1, y0 - 1)
        }
        else {
            NeighborInter::default()
        };

        let r_left = left.ref_idx.r[bwd];
        let r_top = top.ref_idx.r[bwd];
        let r_tl = top_left.ref_idx.r[bwd];
        let r_tr = if top_right.available { top_right.ref_idx.r[bwd] } else { r_tl };

        let mut mva = left.mv[bwd];
        let mut mvb = top.mv[bwd];
        let mvd = top_left.mv[bwd];
        let mut mvc = if top_right.available { top_right.mv[bwd] } else { mvd };

        let r_left = recheck_neighbor_ref(self.pic, self.background_pic, ref_frame, r_left);
        let r_top = recheck_neighbor_ref(self.pic, self.background_pic, ref_frame, r_top);
        let r_tr = recheck_neighbor_ref(self.pic, self.background_pic, ref_frame, r_tr);

        let mvp_type = derive_mvp_type(ref_frame, r_left, r_top, r_tr, pu_type);
        let field = self.seq.has_tool(ToolFlags::FIELD_CODING);

        if self.pic.picture_type == PictureType::B {
            let slot = (if bwd != 0 { B_BWD } else { B_FWD }) as usize;
            let dist = self.pic.dist_refs[slot];
            let dist_scale = self.pic.dist_scale_refs[slot];

            for (mv, r) in
                [(&mut mva, r_left), (&mut mvb, r_top), (&mut mvc, r_tr)]
            {
                if r >= 0 {
                    mv.y = scale_mv_default_y(self.pic, field, mv.y.into(), dist, dist,
                        dist_scale);
                    mv.x = scale_mv_default(mv.x.into(), dist, dist_scale);
                }
                else {
                    *mv = Mv::ZERO;
                }
            }
        }
        else {
            let dist = self.pic.dist_refs[ref_frame.max(0) as usize];

            for (mv, r) in
                [(&mut mva, r_left), (&mut mvb, r_top), (&mut mvc, r_tr)]
            {
                if r >= 0 {
                    let src_dist = self.pic.dist_refs[r as usize];
                    let src_scale = self.pic.dist_scale_refs[r as usize];
                    mv.y = scale_mv_default_y(self.pic, field, mv.y.into(), dist, src_dist,
                        src_scale);
                    mv.x = scale_mv_default(mv.x.into(), dist, src_scale);
                }
                else {
                    *mv = Mv::ZERO;
                }
            }
        }

        match mvp_type {
            MvpType::Median => Mv::new(
                derive_median_mv(mva.x.into(), mvb.x.into(), mvc.x.into()),
                derive_median_mv(mva.y.into(), mvb.y.into(), mvc.y.into()),
            ),
            MvpType::Left => mva,
            MvpType::Top => mvb,
            MvpType::TopRight => mvc,
        }
    }
}

/// Reconstruct the MV from its difference and predictor, re-centering through the PMVR window
/// when the tool is enabled.
pub fn pmvr_mv_derivation(pmvr_enabled: bool, mvd: Mv, mvp: Mv) -> Mv {
    let (mvx, mvy);

    if pmvr_enabled {
        let ctr_x = ((i32::from(mvp.x) >> 1) << 1) - i32::from(mvp.x);
        let ctr_y = ((i32::from(mvp.y) >> 1) << 1) - i32::from(mvp.y);
        let dx = i32::from(mvd.x);
        let dy = i32::from(mvd.y);

        if (dx - ctr_x).abs() > PMVR_THRESHOLD {
            mvx = i32::from(mvp.x) + (dx << 1) - ctr_x - sign2(dx - ctr_x) * PMVR_THRESHOLD;
            mvy = i32::from(mvp.y) + (dy << 1) + ctr_y;
        }
        else if (dy - ctr_y).abs() > PMVR_THRESHOLD {
            mvx = i32::from(mvp.x) + (dx << 1) + ctr_x;
            mvy = i32::from(mvp.y) + (dy << 1) - ctr_y - sign2(dy - ctr_y) * PMVR_THRESHOLD;
        }
        else {
            mvx = dx + i32::from(mvp.x);
            mvy = dy + i32::from(mvp.y);
        }
    }
    else {
        mvx = i32::from(mvd.x) + i32::from(mvp.x);
        mvy = i32::from(mvd.y) + i32::from(mvp.y);
    }

    Mv::new(mvx.clamp(-32768, 32767) as i16, mvy.clamp(-32768, 32767) as i16)
}

/// Gather the six spatial neighbors and the collocated temporal neighbor of a skip/direct CU.
pub fn gather_skip_neighbors(
    maps: &FrameMaps,
    seq: &SequenceParams,
    fref0: Option<&Frame>,
    slice_nr: i32,
    pix_x: usize,
    pix_y: usize,
    bsx: usize,
    bsy: usize,
) -> [NeighborInter; NUM_INTER_NEIGHBORS] {
    let x0 = (pix_x >> MIN_PU_SIZE_IN_BIT) as i32;
    let y0 = (pix_y >> MIN_PU_SIZE_IN_BIT) as i32;
    let x1 = (bsx >> MIN_PU_SIZE_IN_BIT) as i32 + x0 - 1;
    let y1 = (bsy >> MIN_PU_SIZE_IN_BIT) as i32 + y0 - 1;

    let lcu_mask = (1usize << (seq.lcu_bits - B4X4_IN_BIT)) - 1;
    let tr_avail =
        AVAILS.top_right(seq.lcu_bits, x1 as usize & lcu_mask, y0 as usize & lcu_mask);

    let mut neighbors = [NeighborInter::default(); NUM_INTER_NEIGHBORS];
    neighbors[BLK_LEFT] = maps.spatial_neighbor(slice_nr, x0 - 1, y0);
    neighbors[BLK_TOP] = maps.spatial_neighbor(slice_nr, x0, y0 - 1);
    neighbors[BLK_TOP2] = maps.spatial_neighbor(slice_nr, x1, y0 - 1);
    neighbors[BLK_TOPLEFT] = maps.spatial_neighbor(slice_nr, x0 - 1, y0 - 1);
    neighbors[BLK_LEFT2] = maps.spatial_neighbor(slice_nr, x0 - 1, y1);
    neighbors[BLK_TOPRIGHT] = if tr_avail {
        maps.spatial_neighbor(slice_nr, x1 + 1, y0 - 1)
    }
    else {
        maps.spatial_neighbor(slice_nr, -1, y0 - 1)
    };

    if let Some(fref) = fref0 {
        neighbors[BLK_COLLOCATED] =
            temporal_neighbor(fref, maps.width_in_spu, x0 as usize, y0 as usize);
    }

    neighbors
}

/// The per-sub-mode MV candidate slots of a B skip/direct CU, derived from the six spatial
/// neighbors with the fallback synthesis rules.
pub fn bskip_spatial_candidates(neighbors: &[NeighborInter]) -> ([Mv; DS_MAX_NUM],
    [Mv; DS_MAX_NUM]) {
    let mut mv_1st = [Mv::ZERO; DS_MAX_NUM];
    let mut mv_2nd = [Mv::ZERO; DS_MAX_NUM];

    let mut bid_count = 0;
    let mut sym_count = 0;
    let mut bwd_count = 0;
    let mut fwd_count = 0;
    let mut first_bid = 0usize;

    for (j, n) in neighbors.iter().take(6).enumerate() {
        match n.dir_pred {
            PredDir::Bid => {
                mv_1st[DS_B_BID] = n.mv[0];
                mv_2nd[DS_B_BID] = n.mv[1];
                bid_count += 1;
                if bid_count == 1 {
                    first_bid = j;
                }
            }
            PredDir::Sym => {
                mv_1st[DS_B_SYM] = n.mv[0];
                mv_2nd[DS_B_SYM] = n.mv[1];
                sym_count += 1;
            }
            PredDir::Bwd => {
                mv_2nd[DS_B_BWD] = n.mv[1];
                bwd_count += 1;
            }
            PredDir::Fwd => {
                mv_1st[DS_B_FWD] = n.mv[0];
                fwd_count += 1;
            }
            _ => (),
        }
    }

    if bid_count == 0 && fwd_count != 0 && bwd_count != 0 {
        mv_1st[DS_B_BID] = mv_1st[DS_B_FWD];
        mv_2nd[DS_B_BID] = mv_2nd[DS_B_BWD];
    }

    if sym_count == 0 && bid_count > 1 {
        mv_1st[DS_B_SYM] = neighbors[first_bid].mv[0];
        mv_2nd[DS_B_SYM] = neighbors[first_bid].mv[1];
    }
    else if sym_count == 0 && bwd_count != 0 {
        mv_2nd[DS_B_SYM] = mv_2nd[DS_B_BWD];
        mv_1st[DS_B_SYM] = Mv::new(-mv_2nd[DS_B_BWD].x, -mv_2nd[DS_B_BWD].y);
    }
    else if sym_count == 0 && fwd_count != 0 {
        mv_1st[DS_B_SYM] = mv_1st[DS_B_FWD];
        mv_2nd[DS_B_SYM] = Mv::new(-mv_1st[DS_B_FWD].x, -mv_1st[DS_B_FWD].y);
    }

    if bwd_count == 0 && bid_count > 1 {
        mv_2nd[DS_B_BWD] = neighbors[first_bid].mv[1];
    }
    else if bwd_count == 0 && bid_count != 0 {
        mv_2nd[DS_B_BWD] = mv_2nd[DS_B_BID];
    }

    if fwd_count == 0 && bid_count > 1 {
        mv_1st[DS_B_FWD] = neighbors[first_bid].mv[0];
    }
    else if fwd_count == 0 && bid_count != 0 {
        mv_1st[DS_B_FWD] = mv_1st[DS_B_BID];
    }

    (mv_1st, mv_2nd)
}

/// The per-sub-mode MV/reference candidate slots of a P/F spatial skip CU.
pub struct FSkipCandidates {
    pub ref_1st: [i8; DS_MAX_NUM],
    pub ref_2nd: [i8; DS_MAX_NUM],
    pub mv_1st: [Mv; DS_MAX_NUM],
    pub mv_2nd: [Mv; DS_MAX_NUM],
}

pub fn fskip_spatial_candidates(neighbors: &[NeighborInter]) -> FSkipCandidates {
    let mut c = FSkipCandidates {
        ref_1st: [0; DS_MAX_NUM],
        ref_2nd: [0; DS_MAX_NUM],
        mv_1st: [Mv::ZERO; DS_MAX_NUM],
        mv_2nd: [Mv::ZERO; DS_MAX_NUM],
    };

    let mut bid_count = 0;
    let mut fwd_count = 0;
    let mut first_bid = 0usize;
    let mut first_fwd = 0usize;

    for (j, n) in neighbors.iter().take(6).enumerate() {
        if n.ref_idx.r[0] != INVALID_REF && n.ref_idx.r[1] != INVALID_REF {
            c.ref_1st[DS_DUAL_1ST] = n.ref_idx.r[0];
            c.ref_2nd[DS_DUAL_1ST] = n.ref_idx.r[1];
            c.mv_1st[DS_DUAL_1ST] = n.mv[0];
            c.mv_2nd[DS_DUAL_1ST] = n.mv[1];
            bid_count += 1;
            if bid_count == 1 {
                first_bid = j;
            }
        }
        else if n.ref_idx.r[0] != INVALID_REF {
            c.ref_1st[DS_SINGLE_1ST] = n.ref_idx.r[0];
            c.mv_1st[DS_SINGLE_1ST] = n.mv[0];
            fwd_count += 1;
            if fwd_count == 1 {
                first_fwd = j;
            }
        }
    }

    if bid_count == 0 && fwd_count > 1 {
        c.ref_1st[DS_DUAL_1ST] = c.ref_1st[DS_SINGLE_1ST];
        c.ref_2nd[DS_DUAL_1ST] = neighbors[first_fwd].ref_idx.r[0];
        c.mv_1st[DS_DUAL_1ST] = c.mv_1st[DS_SINGLE_1ST];
        c.mv_2nd[DS_DUAL_1ST] = neighbors[first_fwd].mv[0];
    }

    if bid_count > 1 {
        c.ref_1st[DS_DUAL_2ND] = neighbors[first_bid].ref_idx.r[0];
        c.ref_2nd[DS_DUAL_2ND] = neighbors[first_bid].ref_idx.r[1];
        c.mv_1st[DS_DUAL_2ND] = neighbors[first_bid].mv[0];
        c.mv_2nd[DS_DUAL_2ND] = neighbors[first_bid].mv[1];
    }
    else if bid_count == 1 && fwd_count > 1 {
        c.ref_1st[DS_DUAL_2ND] = c.ref_1st[DS_SINGLE_1ST];
        c.ref_2nd[DS_DUAL_2ND] = neighbors[first_fwd].ref_idx.r[0];
        c.mv_1st[DS_DUAL_2ND] = c.mv_1st[DS_SINGLE_1ST];
        c.mv_2nd[DS_DUAL_2ND] = neighbors[first_fwd].mv[0];
    }

    c.ref_2nd[DS_SINGLE_1ST] = INVALID_REF;
    c.mv_2nd[DS_SINGLE_1ST] = Mv::ZERO;
    if fwd_count == 0 && bid_count > 1 {
        c.ref_1st[DS_SINGLE_1ST] = neighbors[first_bid].ref_idx.r[0];
        c.mv_1st[DS_SINGLE_1ST] = neighbors[first_bid].mv[0];
    }
    else if fwd_count == 0 && bid_count == 1 {
        c.ref_1st[DS_SINGLE_1ST] = c.ref_1st[DS_DUAL_1ST];
        c.mv_1st[DS_SINGLE_1ST] = c.mv_1st[DS_DUAL_1ST];
    }

    c.ref_2nd[DS_SINGLE_2ND] = INVALID_REF;
    c.mv_2nd[DS_SINGLE_2ND] = Mv::ZERO;
    if fwd_count > 1 {
        c.ref_1st[DS_SINGLE_2ND] = neighbors[first_fwd].ref_idx.r[0];
        c.mv_1st[DS_SINGLE_2ND] = neighbors[first_fwd].mv[0];
    }
    else if bid_count > 1 {
        c.ref_1st[DS_SINGLE_2ND] = neighbors[first_bid].ref_idx.r[1];
        c.mv_1st[DS_SINGLE_2ND] = neighbors[first_bid].mv[1];
    }
    else if bid_count == 1 {
        c.ref_1st[DS_SINGLE_2ND] = c.ref_2nd[DS_DUAL_1ST];
        c.mv_1st[DS_SINGLE_2ND] = c.mv_2nd[DS_DUAL_1ST];
    }

    c
}

/// The temporally scaled MV of a P/F skip CU from the collocated block of reference zero.
pub fn pf_skip_temporal_mv(fref0: &Frame, width_in_spu: usize, spu_x: usize, spu_y: usize,
    cur_dist: i32) -> Mv {
    let motion = fref0.motion.read().unwrap();
    let pos = spu_y * width_in_spu + spu_x;
    let ref_frame = motion.ref_idx[pos];

    if ref_frame >= 0 {
        let tmv = motion.mv[pos];
        let col_scale = fref0.dist_scale_refs[ref_frame as usize];
        Mv::new(
            scale_mv_skip(tmv.x.into(), cur_dist, col_scale),
            scale_mv_skip(tmv.y.into(), cur_dist, col_scale),
        )
    }
    else {
        Mv::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_median_equal_candidates() {
        // When all three candidates agree the predictor equals them exactly.
        for v in [-37, -1, 0, 5, 129] {
            assert_eq!(derive_median_mv(v, v, v), v as i16);
        }
    }

    #[test]
    fn verify_median_tie_break() {
        // The pair with the smallest difference is averaged.
        assert_eq!(derive_median_mv(10, 11, 40), 10);
        assert_eq!(derive_median_mv(40, 10, 11), 10);
    }

    #[test]
    fn verify_median_mixed_signs() {
        // One candidate against two of the opposite sign averages the two.
        assert_eq!(derive_median_mv(-8, 4, 6), 5);
        assert_eq!(derive_median_mv(8, -4, -6), -5);
    }

    #[test]
    fn verify_scale_identity() {
        // Scaling to the same distance is the identity for any representable MV.
        let dist = 2;
        let scale = distance_scale(dist);
        for mv in [-600, -3, 0, 3, 600] {
            assert_eq!(scale_mv_default(mv, dist, scale), mv as i16);
            assert_eq!(scale_mv_skip(mv, dist, scale), mv as i16);
        }
    }

    #[test]
    fn verify_pmvr_window() {
        // Small differences pass through unchanged.
        let mvp = Mv::new(4, 4);
        let mvd = Mv::new(2, -2);
        assert_eq!(pmvr_mv_derivation(true, mvd, mvp), Mv::new(6, 2));
        assert_eq!(pmvr_mv_derivation(false, mvd, mvp), Mv::new(6, 2));

        // Beyond the window the difference is doubled and re-centered.
        let far = Mv::new(20, 0);
        let expect_x = 4 + (20 << 1) - PMVR_THRESHOLD as i16;
        assert_eq!(pmvr_mv_derivation(true, far, mvp), Mv::new(expect_x, 4));
    }

    #[test]
    fn verify_pu_type_classes() {
        assert_eq!(pu_type_for_mvp(16, 16, 0, 0), 0);
        assert_eq!(pu_type_for_mvp(8, 16, 0, 0), 1);
        assert_eq!(pu_type_for_mvp(8, 16, 8, 0), 2);
        assert_eq!(pu_type_for_mvp(16, 8, 0, 0), 3);
        assert_eq!(pu_type_for_mvp(16, 8, 0, 8), 4);
    }

    #[test]
    fn verify_bskip_sym_synthesis_from_fwd() {
        let mut neighbors = [NeighborInter::default(); NUM_INTER_NEIGHBORS];
        neighbors[BLK_LEFT] = NeighborInter {
            available: true,
            dir_pred: PredDir::Fwd,
            ref_idx: RefPair::new(0, INVALID_REF),
            mv: [Mv::new(6, -2), Mv::ZERO],
        };

        let (mv_1st, mv_2nd) = bskip_spatial_candidates(&neighbors);
        assert_eq!(mv_1st[DS_B_FWD], Mv::new(6, -2));
        // No SYM neighbor: synthesized by negating the forward candidate.
        assert_eq!(mv_1st[DS_B_SYM], Mv::new(6, -2));
        assert_eq!(mv_2nd[DS_B_SYM], Mv::new(-6, 2));
    }
}
