// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `sao` module implements the sample adaptive offset filter: per-CTU parameter decode
//! (merge or new parameters), the four edge-offset classifiers, and band offset.

use lumiere_core::util::clip3;
use lumiere_core::video::Sample;

use crate::aec::{Aec, ContextSet};
use crate::frame::PaddedPlane;

pub const SAO_TYPE_EO_0: i8 = 0;
pub const SAO_TYPE_EO_90: i8 = 1;
pub const SAO_TYPE_EO_135: i8 = 2;
pub const SAO_TYPE_EO_45: i8 = 3;
pub const SAO_TYPE_BO: i8 = 4;

/// Offset classes of the edge types plus band offset.
const SAO_CLASS_EO_FULL_VALLEY: usize = 0;
const SAO_CLASS_EO_HALF_VALLEY: usize = 1;
const SAO_CLASS_EO_PLAIN: usize = 2;
const SAO_CLASS_EO_HALF_PEAK: usize = 3;
const SAO_CLASS_EO_FULL_PEAK: usize = 4;
const SAO_CLASS_BO: usize = 5;

pub const NUM_BO_CLASSES: usize = 32;
pub const NUM_BO_CLASSES_LOG2: u32 = 5;
const NUM_EO_TYPES_LOG2: u32 = 2;

/// Offset bounds and coded maximum per offset class: (low, high, max codeword).
const SAO_CLIP: [[i32; 3]; 6] = [
    [-1, 6, 7],
    [0, 1, 1],
    [0, 0, 0],
    [-1, 0, 1],
    [-6, 1, 7],
    [-7, 7, 7],
];

/// Inverse mapping of the coded magnitude of full valley/peak offsets.
const EO_OFFSET_INV_MAP: [i32; 8] = [1, 0, 2, -1, 3, 4, 5, 6];

/// Filter lag of SAO behind the deblocked output, in samples.
pub const SAO_SHIFT_PIX: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SaoMode {
    Off,
    Merge,
    New,
}

/// SAO parameters of one plane of one CTU.
#[derive(Copy, Clone, Debug)]
pub struct SaoPlaneParam {
    pub mode: SaoMode,
    pub type_idc: i8,
    pub start_band: i32,
    pub start_band2: i32,
    pub offset: [i32; NUM_BO_CLASSES],
}

impl Default for SaoPlaneParam {
    fn default() -> Self {
        SaoPlaneParam {
            mode: SaoMode::Off,
            type_idc: -1,
            start_band: -1,
            start_band2: -1,
            offset: [0; NUM_BO_CLASSES],
        }
    }
}

/// SAO parameters of one CTU.
#[derive(Copy, Clone, Debug, Default)]
pub struct SaoParam {
    pub planes: [SaoPlaneParam; 3],
}

fn read_merge_flag(aec: &mut Aec<'_>, ctxs: &mut ContextSet, left_avail: bool, up_avail: bool)
    -> u32 {
    let act_ctx = usize::from(left_avail) + usize::from(up_avail);
    let mut act_sym = 0;

    if act_ctx == 1 {
        act_sym = aec.decode_symbol(&mut ctxs.sao_merge[0]);
    }
    else if act_ctx == 2 {
        act_sym = aec.decode_symbol(&mut ctxs.sao_merge[1]);
        if act_sym != 1 {
            act_sym += aec.decode_symbol(&mut ctxs.sao_merge[2]) << 1;
        }
    }

    let mut merge_left = 0;
    let mut merge_top = 0;
    let mut merge_index = act_sym;

    if left_avail {
        merge_left = merge_index & 1;
        merge_index >>= 1;
    }
    if up_avail && merge_left == 0 {
        merge_top = merge_index & 1;
    }

    (merge_left << 1) + merge_top
}

fn read_mode(aec: &mut Aec<'_>, ctxs: &mut ContextSet) -> u32 {
    if aec.decode_symbol(&mut ctxs.sao_mode) == 0 {
        let t1 = 1 - aec.decode_symbol_eq_prob();
        1 + (t1 << 1)
    }
    else {
        0
    }
}

fn read_offset(aec: &mut Aec<'_>, ctxs: &mut ContextSet, class: usize) -> i32 {
    let max_value = SAO_CLIP[class][2];
    let mut count = 0;

    let mut sym = if class == SAO_CLASS_BO {
        1 - aec.decode_symbol(&mut ctxs.sao_offset)
    }
    else {
        1 - aec.decode_symbol_eq_prob()
    };

    while sym != 0 {
        count += 1;
        if count == max_value {
            break;
        }
        sym = 1 - aec.decode_symbol_eq_prob();
    }

    let mut value = match class {
        SAO_CLASS_EO_FULL_VALLEY => EO_OFFSET_INV_MAP[count as usize],
        SAO_CLASS_EO_FULL_PEAK => -EO_OFFSET_INV_MAP[count as usize],
        SAO_CLASS_EO_HALF_PEAK => -count,
        _ => count,
    };

    if class == SAO_CLASS_BO && value != 0 && aec.decode_symbol_eq_prob() != 0 {
        value = -value;
    }

    value
}

fn read_type(aec: &mut Aec<'_>, ctxs: &mut ContextSet, band_delta: bool, bo: bool) -> i32 {
    let _ = ctxs;

    if band_delta {
        // Truncated exp-Golomb for the second band's distance.
        let mut act_sym = 0;
        let mut golomb_order = 1;

        loop {
            let bit = aec.decode_symbol_eq_prob();
            if aec.has_error() {
                return 0;
            }

            if bit == 0 {
                act_sym += 1 << golomb_order;
                golomb_order += 1;
            }

            if golomb_order == 4 {
                golomb_order = 0;
                break;
            }
            if bit == 1 {
                break;
            }
        }

        let mut rest = 0;
        while golomb_order > 0 {
            golomb_order -= 1;
            if aec.decode_symbol_eq_prob() == 1 {
                rest |= 1 << golomb_order;
            }
        }

        act_sym + rest
    }
    else {
        let length = if bo { NUM_BO_CLASSES_LOG2 } else { NUM_EO_TYPES_LOG2 };
        let mut act_sym = 0;
        for i in 0..length {
            act_sym += (aec.decode_symbol_eq_prob() as i32) << i;
        }
        act_sym
    }
}

/// Decode the SAO parameters of one CTU, honoring the merge candidates.
pub fn read_lcu_param(
    aec: &mut Aec<'_>,
    ctxs: &mut ContextSet,
    slice_sao_on: &[bool; 3],
    merge_left: Option<&SaoParam>,
    merge_up: Option<&SaoParam>,
) -> SaoParam {
    let mut param = SaoParam::default();

    if merge_left.is_some() || merge_up.is_some() {
        let merge =
            read_merge_flag(aec, ctxs, merge_left.is_some(), merge_up.is_some());

        if merge == 2 {
            let mut param = *merge_left.unwrap();
            for plane in param.planes.iter_mut() {
                plane.mode = SaoMode::Merge;
            }
            return param;
        }
        if merge == 1 {
            let mut param = *merge_up.unwrap();
            for plane in param.planes.iter_mut() {
                plane.mode = SaoMode::Merge;
            }
            return param;
        }
    }

    for comp in 0..3 {
        if !slice_sao_on[comp] {
            continue;
        }

        let plane = &mut param.planes[comp];
        match read_mode(aec, ctxs) {
            0 => plane.mode = SaoMode::Off,
            1 => {
                plane.mode = SaoMode::New;
                plane.type_idc = SAO_TYPE_BO;
            }
            _ => {
                plane.mode = SaoMode::New;
                plane.type_idc = SAO_TYPE_EO_0;
            }
        }

        if plane.mode != SaoMode::New {
            continue;
        }

        let mut offsets = [0i32; 4];
        for (i, offset) in offsets.iter_mut().enumerate() {
            let class = if plane.type_idc == SAO_TYPE_BO {
                SAO_CLASS_BO
            }
            else if i >= 2 {
                i + 1
            }
            else {
                i
            };
            *offset = read_offset(aec, ctxs, class);
        }

        if plane.type_idc == SAO_TYPE_BO {
            let start = read_type(aec, ctxs, false, true);
            let delta = read_type(aec, ctxs, true, true) + 2;

            let start_band = start;
            let start_band2 = (start_band + delta) % NUM_BO_CLASSES as i32;

            plane.start_band = start_band;
            plane.start_band2 = start_band2;
            plane.offset = [0; NUM_BO_CLASSES];
            plane.offset[start_band as usize] = offsets[0];
            plane.offset[(start_band as usize + 1) % NUM_BO_CLASSES] = offsets[1];
            plane.offset[start_band2 as usize] = offsets[2];
            plane.offset[(start_band2 as usize + 1) % NUM_BO_CLASSES] = offsets[3];
        }
        else {
            plane.type_idc = read_type(aec, ctxs, false, false) as i8;
            plane.offset = [0; NUM_BO_CLASSES];
            plane.offset[SAO_CLASS_EO_FULL_VALLEY] = offsets[0];
            plane.offset[SAO_CLASS_EO_HALF_VALLEY] = offsets[1];
            plane.offset[SAO_CLASS_EO_PLAIN] = 0;
            plane.offset[SAO_CLASS_EO_HALF_PEAK] = offsets[2];
            plane.offset[SAO_CLASS_EO_FULL_PEAK] = offsets[3];
        }
    }

    param
}

/// Neighbor availability of the filter region of one CTU.
#[derive(Copy, Clone, Debug, Default)]
pub struct SaoRegionAvail {
    pub left: bool,
    pub right: bool,
    pub top: bool,
    pub down: bool,
    pub top_left: bool,
    pub top_right: bool,
    pub down_left: bool,
    pub down_right: bool,
}

#[inline(always)]
fn sign3(v: i32) -> i32 {
    match v {
        v if v > 0 => 1,
        v if v < 0 => -1,
        _ => 0,
    }
}

/// Horizontal edge-offset classifier.
fn block_eo_0(dst: &mut PaddedPlane, src: &PaddedPlane, x0: i32, y0: i32, w: i32, h: i32,
    bit_depth: u32, avail: &SaoRegionAvail, offset: &[i32; NUM_BO_CLASSES]) {
    let max_val = (1 << bit_depth) - 1;
    let sx = if avail.left { 0 } else { 1 };
    let ex = if avail.right { w } else { w - 1 };

    for y in 0..h {
        let mut left_sign =
            sign3(i32::from(src.get(x0 + sx, y0 + y)) - i32::from(src.get(x0 + sx - 1, y0 + y)));
        for x in sx..ex {
            let cur = i32::from(src.get(x0 + x, y0 + y));
            let right_sign = sign3(cur - i32::from(src.get(x0 + x + 1, y0 + y)));
            let edge_type = (left_sign + right_sign + 2) as usize;
            left_sign = -right_sign;
            dst.set(x0 + x, y0 + y, clip3(0, max_val, cur + offset[edge_type]) as Sample);
        }
    }
}

/// Vertical edge-offset classifier.
fn block_eo_90(dst: &mut PaddedPlane, src: &PaddedPlane, x0: i32, y0: i32, w: i32, h: i32,
    bit_depth: u32, avail: &SaoRegionAvail, offset: &[i32; NUM_BO_CLASSES]) {
    let max_val = (1 << bit_depth) - 1;
    let sy = if avail.top { 0 } else { 1 };
    let ey = if avail.down { h } else { h - 1 };

    for x in 0..w {
        let mut top_sign =
            sign3(i32::from(src.get(x0 + x, y0 + sy)) - i32::from(src.get(x0 + x, y0 + sy - 1)));
        for y in sy..ey {
            let cur = i32::from(src.get(x0 + x, y0 + y));
            let down_sign = sign3(cur - i32::from(src.get(x0 + x, y0 + y + 1)));
            let edge_type = (down_sign + top_sign + 2) as usize;
            top_sign = -down_sign;
            dst.set(x0 + x, y0 + y, clip3(0, max_val, cur + offset[edge_type]) as Sample);
        }
    }
}

/// Down-right diagonal edge-offset classifier.
fn block_eo_135(dst: &mut PaddedPlane, src: &PaddedPlane, x0: i32, y0: i32, w: i32, h: i32,
    bit_depth: u32, avail: &SaoRegionAvail, offset: &[i32; NUM_BO_CLASSES]) {
    let max_val = (1 << bit_depth) - 1;
    let sx = if avail.left { 0 } else { 1 };
    let ex = if avail.right { w } else { w - 1 };

    // First row.
    let sx_0 = if avail.top_left { 0 } else { 1 };
    let ex_0 = if avail.top { ex } else { 1 };
    for x in sx_0..ex_0 {
        let cur = i32::from(src.get(x0 + x, y0));
        let up = sign3(cur - i32::from(src.get(x0 + x - 1, y0 - 1)));
        let down = sign3(cur - i32::from(src.get(x0 + x + 1, y0 + 1)));
        let edge_type = (up + down + 2) as usize;
        dst.set(x0 + x, y0, clip3(0, max_val, cur + offset[edge_type]) as Sample);
    }

    // Middle rows.
    for y in 1..h - 1 {
        for x in sx..ex {
            let cur = i32::from(src.get(x0 + x, y0 + y));
            let up = sign3(cur - i32::from(src.get(x0 + x - 1, y0 + y - 1)));
            let down = sign3(cur - i32::from(src.get(x0 + x + 1, y0 + y + 1)));
            let edge_type = (up + down + 2) as usize;
            dst.set(x0 + x, y0 + y, clip3(0, max_val, cur + offset[edge_type]) as Sample);
        }
    }

    // Last row.
    let sx_n = if avail.down { sx } else { w - 1 };
    let ex_n = if avail.down_right { w } else { w - 1 };
    for x in sx_n..ex_n {
        let cur = i32::from(src.get(x0 + x, y0 + h - 1));
        let up = sign3(cur - i32::from(src.get(x0 + x - 1, y0 + h - 2)));
        let down = sign3(cur - i32::from(src.get(x0 + x + 1, y0 + h)));
        let edge_type = (up + down + 2) as usize;
        dst.set(x0 + x, y0 + h - 1, clip3(0, max_val, cur + offset[edge_type]) as Sample);
    }
}

/// Up-right diagonal edge-offset classifier.
fn block_eo_45(dst: &mut PaddedPlane, src: &PaddedPlane, x0: i32, y0: i32, w: i32, h: i32,
    bit_depth: u32, avail: &SaoRegionAvail, offset: &[i32; NUM_BO_CLASSES]) {
    let max_val = (1 << bit_depth) - 1;
    let sx = if avail.left { 0 } else { 1 };
    let ex = if avail.right { w } else { w - 1 };

    // First row.
    let sx_0 = if avail.top { sx } else { w - 1 };
    let ex_0 = if avail.top_right { w } else { w - 1 };
    for x in sx_0..ex_0 {
        let cur = i32::from(src.get(x0 + x, y0));
        let up = sign3(cur - i32::from(src.get(x0 + x + 1, y0 - 1)));
        let down = sign3(cur - i32::from(src.get(x0 + x - 1, y0 + 1)));
        let edge_type = (up + down + 2) as usize;
        dst.set(x0 + x, y0, clip3(0, max_val, cur + offset[edge_type]) as Sample);
    }

    // Middle rows.
    for y in 1..h - 1 {
        for x in sx..ex {
            let cur = i32::from(src.get(x0 + x, y0 + y));
            let up = sign3(cur - i32::from(src.get(x0 + x + 1, y0 + y - 1)));
            let down = sign3(cur - i32::from(src.get(x0 + x - 1, y0 + y + 1)));
            let edge_type = (up + down + 2) as usize;
            dst.set(x0 + x, y0 + y, clip3(0, max_val, cur + offset[edge_type]) as Sample);
        }
    }

    // Last row.
    let sx_n = if avail.down_left { 0 } else { 1 };
    let ex_n = if avail.down { ex } else { 1 };
    for x in sx_n..ex_n {
        let cur = i32::from(src.get(x0 + x, y0 + h - 1));
        let up = sign3(cur - i32::from(src.get(x0 + x + 1, y0 + h - 2)));
        let down = sign3(cur - i32::from(src.get(x0 + x - 1, y0 + h)));
        let edge_type = (up + down + 2) as usize;
        dst.set(x0 + x, y0 + h - 1, clip3(0, max_val, cur + offset[edge_type]) as Sample);
    }
}

/// Band-offset classifier.
fn block_bo(dst: &mut PaddedPlane, src: &PaddedPlane, x0: i32, y0: i32, w: i32, h: i32,
    bit_depth: u32, offset: &[i32; NUM_BO_CLASSES]) {
    let max_val = (1 << bit_depth) - 1;
    let band_shift = bit_depth - NUM_BO_CLASSES_LOG2;

    for y in 0..h {
        for x in 0..w {
            let cur = i32::from(src.get(x0 + x, y0 + y));
            let band = (cur >> band_shift) as usize;
            dst.set(x0 + x, y0 + y, clip3(0, max_val, cur + offset[band]) as Sample);
        }
    }
}

/// Apply one plane's SAO parameters to a filter region.
pub fn sao_block(
    dst: &mut PaddedPlane,
    src: &PaddedPlane,
    param: &SaoPlaneParam,
    x0: i32,
    y0: i32,
    w: i32,
    h: i32,
    bit_depth: u32,
    avail: &SaoRegionAvail,
) {
    if w <= 0 || h <= 0 {
        return;
    }

    match param.type_idc {
        SAO_TYPE_BO => block_bo(dst, src, x0, y0, w, h, bit_depth, &param.offset),
        SAO_TYPE_EO_0 => block_eo_0(dst, src, x0, y0, w, h, bit_depth, avail, &param.offset),
        SAO_TYPE_EO_90 => block_eo_90(dst, src, x0, y0, w, h, bit_depth, avail, &param.offset),
        SAO_TYPE_EO_135 => block_eo_135(dst, src, x0, y0, w, h, bit_depth, avail, &param.offset),
        _ => block_eo_45(dst, src, x0, y0, w, h, bit_depth, avail, &param.offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_plane(w: usize, h: usize, value: Sample) -> PaddedPlane {
        let mut plane = PaddedPlane::new(w, h, 8).unwrap();
        for y in 0..h as i32 {
            for x in 0..w as i32 {
                plane.set(x, y, value);
            }
        }
        plane.pad_rows(0, h);
        plane
    }

    #[test]
    fn verify_band_offset_uniform_input() {
        // A uniform-32 input falls entirely in band 32 >> (8 - 5) = 4; every sample receives the
        // offset of that band, clipped into range.
        let src = uniform_plane(64, 64, 32);
        let mut dst = uniform_plane(64, 64, 0);

        let mut param = SaoPlaneParam {
            mode: SaoMode::New,
            type_idc: SAO_TYPE_BO,
            start_band: 4,
            start_band2: 6,
            offset: [0; NUM_BO_CLASSES],
        };
        param.offset[4] = 4;
        param.offset[5] = 4;
        param.offset[6] = 4;
        param.offset[7] = 4;

        sao_block(&mut dst, &src, &param, 0, 0, 64, 64, 8, &SaoRegionAvail::default());

        for y in 0..64 {
            for x in 0..64 {
                assert_eq!(dst.get(x, y), 36);
            }
        }
    }

    #[test]
    fn verify_eo_uniform_input_is_plain() {
        // With no edges every sample classifies as plain (offset index 2, always zero).
        let src = uniform_plane(32, 32, 100);
        let mut dst = uniform_plane(32, 32, 100);

        let mut param = SaoPlaneParam {
            mode: SaoMode::New,
            type_idc: SAO_TYPE_EO_0,
            start_band: -1,
            start_band2: -1,
            offset: [0; NUM_BO_CLASSES],
        };
        param.offset[SAO_CLASS_EO_FULL_VALLEY] = 3;
        param.offset[SAO_CLASS_EO_FULL_PEAK] = -3;

        let avail = SaoRegionAvail { left: true, right: true, ..Default::default() };
        for type_idc in [SAO_TYPE_EO_0, SAO_TYPE_EO_90, SAO_TYPE_EO_135, SAO_TYPE_EO_45] {
            param.type_idc = type_idc;
            sao_block(&mut dst, &src, &param, 0, 0, 32, 32, 8, &avail);

            for y in 0..32 {
                for x in 0..32 {
                    assert_eq!(dst.get(x, y), 100, "type {}", type_idc);
                }
            }
        }
    }

    #[test]
    fn verify_eo_0_peak_and_valley() {
        // A one-sample valley in a flat row gets the full-valley offset.
        let mut src = uniform_plane(16, 4, 50);
        src.set(8, 1, 40);
        let mut dst = uniform_plane(16, 4, 0);

        let mut param = SaoPlaneParam {
            mode: SaoMode::New,
            type_idc: SAO_TYPE_EO_0,
            start_band: -1,
            start_band2: -1,
            offset: [0; NUM_BO_CLASSES],
        };
        param.offset[SAO_CLASS_EO_FULL_VALLEY] = 5;
        param.offset[SAO_CLASS_EO_FULL_PEAK] = -5;

        let avail = SaoRegionAvail {
            left: true,
            right: true,
            top: true,
            down: true,
            ..Default::default()
        };
        sao_block(&mut dst, &src, &param, 0, 0, 16, 4, 8, &avail);

        // The valley is lifted, its flat neighbors become half peaks (offset zero here).
        assert_eq!(dst.get(8, 1), 45);
        assert_eq!(dst.get(6, 1), 50);
    }
}
