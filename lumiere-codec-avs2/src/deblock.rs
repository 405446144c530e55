// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `deblock` module filters the CU/PU/TU boundary edges of each reconstructed LCU.
//!
//! Edges lie on the 8-sample grid and are processed in 8-sample segments: first all vertical
//! edges of the LCU, then all horizontal ones. The boundary strength of a segment derives from
//! the intra/coded/motion relationship of the two adjacent 4x4 blocks.

use lumiere_core::util::clip3;
use lumiere_core::video::{ChromaFormat, Sample};

use crate::common::*;
use crate::frame::PaddedPlane;
use crate::neighbor::FrameMaps;

/// Alpha threshold per QP.
#[rustfmt::skip]
const ALPHA_TABLE: [i32; 64] = [
     0,  0,  0,  0,  0,  0,  0,  0,
     0,  0,  0,  0,  0,  0,  0,  4,
     4,  5,  5,  6,  7,  8,  9, 10,
    11, 12, 13, 15, 16, 18, 20, 22,
    24, 26, 28, 30, 33, 33, 35, 35,
    36, 37, 37, 39, 39, 42, 44, 46,
    48, 50, 52, 53, 54, 55, 56, 57,
    58, 59, 60, 61, 62, 63, 64, 64,
];

/// Beta threshold per QP.
#[rustfmt::skip]
const BETA_TABLE: [i32; 64] = [
     0,  0,  0,  0,  0,  0,  0,  0,
     0,  0,  0,  0,  0,  1,  1,  1,
     1,  1,  1,  1,  1,  1,  1,  1,
     2,  2,  2,  2,  2,  2,  3,  3,
     3,  3,  4,  4,  4,  5,  5,  5,
     6,  6,  6,  7,  7,  7,  8,  8,
     9,  9, 10, 10, 11, 11, 12, 13,
    14, 15, 16, 17, 18, 19, 23, 27,
];

/// Boundary strength of one edge segment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum EdgeStrength {
    Skip,
    Weak,
    Strong,
}

/// Direction of the edge being filtered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum EdgeDir {
    Ver,
    Hor,
}

/// Derive the strength of the edge between the 4x4 blocks at `p` (before the edge) and `q`.
fn edge_strength(maps: &FrameMaps, p: (usize, usize), q: (usize, usize)) -> EdgeStrength {
    let scu_p = maps.scu_at(p.0 >> 1, p.1 >> 1);
    let scu_q = maps.scu_at(q.0 >> 1, q.1 >> 1);

    if scu_p.mode.is_intra() || scu_q.mode.is_intra() {
        return EdgeStrength::Strong;
    }

    if scu_p.cbp != 0 || scu_q.cbp != 0 {
        return EdgeStrength::Weak;
    }

    let pos_p = maps.spu_index(p.0, p.1);
    let pos_q = maps.spu_index(q.0, q.1);

    if maps.ref_idx[pos_p] != maps.ref_idx[pos_q] {
        return EdgeStrength::Weak;
    }

    let mv_far = |a: Mv, b: Mv| {
        (i32::from(a.x) - i32::from(b.x)).abs() >= 4
            || (i32::from(a.y) - i32::from(b.y)).abs() >= 4
    };

    if mv_far(maps.mv_1st[pos_p], maps.mv_1st[pos_q])
        || mv_far(maps.mv_2nd[pos_p], maps.mv_2nd[pos_q])
    {
        return EdgeStrength::Weak;
    }

    EdgeStrength::Skip
}

/// Read the four samples on either side of the edge at line `i`.
#[inline(always)]
fn edge_samples(plane: &PaddedPlane, dir: EdgeDir, edge_x: i32, edge_y: i32, i: i32)
    -> [i32; 8] {
    let mut s = [0i32; 8];
    for (k, v) in s.iter_mut().enumerate() {
        let d = k as i32 - 4;
        let (x, y) = match dir {
            EdgeDir::Ver => (edge_x + d, edge_y + i),
            EdgeDir::Hor => (edge_x + i, edge_y + d),
        };
        *v = i32::from(plane.get(x, y));
    }
    s
}

#[inline(always)]
fn store_edge_samples(plane: &mut PaddedPlane, dir: EdgeDir, edge_x: i32, edge_y: i32, i: i32,
    s: &[i32; 8]) {
    for (k, &v) in s.iter().enumerate() {
        let d = k as i32 - 4;
        let (x, y) = match dir {
            EdgeDir::Ver => (edge_x + d, edge_y + i),
            EdgeDir::Hor => (edge_x + i, edge_y + d),
        };
        plane.set(x, y, v as Sample);
    }
}

/// Filter one 8-sample luma edge segment.
fn filter_edge_luma(plane: &mut PaddedPlane, dir: EdgeDir, edge_x: i32, edge_y: i32, len: i32,
    strength: EdgeStrength, alpha: i32, beta: i32, bit_depth: u32) {
    let max_val = (1 << bit_depth) - 1;

    for i in 0..len {
        let mut s = edge_samples(plane, dir, edge_x, edge_y, i);
        // s[1..=3] are p2, p1, p0; s[4..=6] are q0, q1, q2.
        let (p2, p1, p0, q0, q1, q2) = (s[1], s[2], s[3], s[4], s[5], s[6]);

        if (p0 - q0).abs() >= alpha || (p1 - p0).abs() >= beta || (q1 - q0).abs() >= beta {
            continue;
        }

        let flat_p = (p2 - p0).abs() < beta;
        let flat_q = (q2 - q0).abs() < beta;

        if strength == EdgeStrength::Strong
            && flat_p
            && flat_q
            && (p0 - q0).abs() < (alpha >> 2) + 2
        {
            s[3] = (p1 + (p0 << 1) + q0 + 2) >> 2;
            s[4] = (q1 + (q0 << 1) + p0 + 2) >> 2;
            s[2] = (p2 + (p1 << 1) + p0 + 2) >> 2;
            s[5] = (q2 + (q1 << 1) + q0 + 2) >> 2;
        }
        else {
            let c = beta.max(1);
            let delta = clip3(-c, c, ((q0 - p0) * 3 + (p1 - q1) + 4) >> 3);
            s[3] = clip3(0, max_val, p0 + delta);
            s[4] = clip3(0, max_val, q0 - delta);

            if flat_p {
                let delta_p = clip3(-c, c, (((p0 + q0 + 1) >> 1) - p1 + 1) >> 1);
                s[2] = clip3(0, max_val, p1 + delta_p);
            }
            if flat_q {
                let delta_q = clip3(-c, c, (((p0 + q0 + 1) >> 1) - q1 + 1) >> 1);
                s[5] = clip3(0, max_val, q1 + delta_q);
            }
        }

        store_edge_samples(plane, dir, edge_x, edge_y, i, &s);
    }
}

/// Filter one chroma edge segment (only the immediate samples move).
fn filter_edge_chroma(plane: &mut PaddedPlane, dir: EdgeDir, edge_x: i32, edge_y: i32, len: i32,
    strength: EdgeStrength, alpha: i32, beta: i32, bit_depth: u32) {
    let max_val = (1 << bit_depth) - 1;

    for i in 0..len {
        let mut s = edge_samples(plane, dir, edge_x, edge_y, i);
        let (p1, p0, q0, q1) = (s[2], s[3], s[4], s[5]);

        if (p0 - q0).abs() >= alpha || (p1 - p0).abs() >= beta || (q1 - q0).abs() >= beta {
            continue;
        }

        if strength == EdgeStrength::Strong && (p0 - q0).abs() < (alpha >> 2) + 2 {
            s[3] = (p1 + (p0 << 1) + q0 + 2) >> 2;
            s[4] = (q1 + (q0 << 1) + p0 + 2) >> 2;
        }
        else {
            let c = beta.max(1);
            let delta = clip3(-c, c, ((q0 - p0) * 3 + (p1 - q1) + 4) >> 3);
            s[3] = clip3(0, max_val, p0 + delta);
            s[4] = clip3(0, max_val, q0 - delta);
        }

        store_edge_samples(plane, dir, edge_x, edge_y, i, &s);
    }
}

/// Should the 8-sample edge starting at 4x4 block (bx, by) be filtered at all?
///
/// An edge is live when it lies on a CU boundary, or on a PU/TU partition boundary of the CU
/// containing it.
fn edge_is_boundary(maps: &FrameMaps, dir: EdgeDir, bx: usize, by: usize) -> bool {
    let scu = maps.scu_at(bx >> 1, by >> 1);
    let size_in_spu = 1usize << (scu.cu_level - MIN_PU_SIZE_IN_BIT as u8);
    let (off_x, off_y) = (bx & (size_in_spu - 1), by & (size_in_spu - 1));

    let offset = if dir == EdgeDir::Ver { off_x } else { off_y };

    // CU boundary.
    if offset == 0 {
        return true;
    }

    // TU partition boundaries.
    let tu_hit = match scu.tu_split {
        TuSplit::None => false,
        TuSplit::Hor => dir == EdgeDir::Hor && offset % (size_in_spu / 4).max(1) == 0,
        TuSplit::Ver => dir == EdgeDir::Ver && offset % (size_in_spu / 4).max(1) == 0,
        TuSplit::Cross => offset == size_in_spu / 2,
    };
    if tu_hit {
        return true;
    }

    // PU partition boundaries.
    match scu.mode {
        PredMode::Inter2NxN => dir == EdgeDir::Hor && offset == size_in_spu / 2,
        PredMode::InterNx2N => dir == EdgeDir::Ver && offset == size_in_spu / 2,
        PredMode::Inter2NxNU | PredMode::Inter2NxND => {
            dir == EdgeDir::Hor && offset % (size_in_spu / 4).max(1) == 0
        }
        PredMode::InterNLx2N | PredMode::InterNRx2N => {
            dir == EdgeDir::Ver && offset % (size_in_spu / 4).max(1) == 0
        }
        PredMode::IntraNxN => offset == size_in_spu / 2,
        PredMode::Intra2Nxn => dir == EdgeDir::Hor && offset % (size_in_spu / 4).max(1) == 0,
        PredMode::IntraNx2N => dir == EdgeDir::Ver && offset % (size_in_spu / 4).max(1) == 0,
        _ => false,
    }
}

/// Deblock one LCU of the frame: vertical edges first, then horizontal.
pub fn deblock_lcu(
    planes: &mut [PaddedPlane],
    maps: &FrameMaps,
    seq: &SequenceParams,
    lcu_x: usize,
    lcu_y: usize,
) {
    let lcu_size = seq.lcu_size();
    let pix_x0 = lcu_x << seq.lcu_bits;
    let pix_y0 = lcu_y << seq.lcu_bits;
    let lcu_w = lcu_size.min(seq.width - pix_x0);
    let lcu_h = lcu_size.min(seq.height - pix_y0);
    let cross_filter = seq.has_tool(ToolFlags::CROSS_LOOP_FILTER);
    let bit_depth = seq.sample_bit_depth;

    for dir in [EdgeDir::Ver, EdgeDir::Hor] {
        // Walk the 8-sample edge grid of this LCU. The left/top picture boundary is never
        // filtered.
        for ey in (0..lcu_h).step_by(8) {
            for ex in (0..lcu_w).step_by(8) {
                let pix_x = pix_x0 + ex;
                let pix_y = pix_y0 + ey;

                if (dir == EdgeDir::Ver && pix_x == 0) || (dir == EdgeDir::Hor && pix_y == 0) {
                    continue;
                }

                let bx = pix_x >> MIN_PU_SIZE_IN_BIT;
                let by = pix_y >> MIN_PU_SIZE_IN_BIT;

                if !edge_is_boundary(maps, dir, bx, by) {
                    continue;
                }

                // Two 4x4 segments per 8-sample edge, each with its own strength.
                for seg in 0..2 {
                    let (p, q, seg_x, seg_y) = match dir {
                        EdgeDir::Ver => (
                            (bx - 1, by + seg),
                            (bx, by + seg),
                            pix_x,
                            pix_y + seg * 4,
                        ),
                        EdgeDir::Hor => (
                            (bx + seg, by - 1),
                            (bx + seg, by),
                            pix_x + seg * 4,
                            pix_y,
                        ),
                    };

                    if (dir == EdgeDir::Ver && seg_y + 4 > pix_y0 + lcu_h)
                        || (dir == EdgeDir::Hor && seg_x + 4 > pix_x0 + lcu_w)
                    {
                        continue;
                    }

                    // Slice-straddling edges are skipped when cross-slice filtering is off.
                    let slice_p = maps.scu_at(p.0 >> 1, p.1 >> 1).slice_nr;
                    let slice_q = maps.scu_at(q.0 >> 1, q.1 >> 1).slice_nr;
                    if slice_p != slice_q && !cross_filter {
                        continue;
                    }

                    let strength = edge_strength(maps, p, q);
                    if strength == EdgeStrength::Skip {
                        continue;
                    }

                    let qp_avg = (i32::from(maps.scu_at(p.0 >> 1, p.1 >> 1).qp)
                        + i32::from(maps.scu_at(q.0 >> 1, q.1 >> 1).qp)
                        + 1)
                        >> 1;
                    let shift = 8 * (bit_depth as i32 - 8);
                    let idx = clip3(0, 63, qp_avg - shift) as usize;
                    let alpha = ALPHA_TABLE[idx] << (bit_depth - 8);
                    let beta = BETA_TABLE[idx] << (bit_depth - 8);

                    filter_edge_luma(
                        &mut planes[0],
                        dir,
                        seg_x as i32,
                        seg_y as i32,
                        4,
                        strength,
                        alpha,
                        beta,
                        bit_depth,
                    );

                    // Chroma follows on the 16-sample luma grid.
                    if seq.chroma_format == ChromaFormat::Yuv420 && seg == 0 {
                        let on_chroma_grid = match dir {
                            EdgeDir::Ver => pix_x % 16 == 0,
                            EdgeDir::Hor => pix_y % 16 == 0,
                        };

                        if on_chroma_grid {
                            for plane in planes[1..].iter_mut() {
                                filter_edge_chroma(
                                    plane,
                                    dir,
                                    (pix_x >> 1) as i32,
                                    (pix_y >> 1) as i32,
                                    4,
                                    strength,
                                    alpha,
                                    beta,
                                    bit_depth,
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumiere_core::video::ChromaFormat;

    fn test_seq() -> SequenceParams {
        SequenceParams {
            width: 64,
            height: 64,
            lcu_bits: 6,
            chroma_format: ChromaFormat::Yuv420,
            sample_bit_depth: 8,
            tools: ToolFlags::LOOP_FILTER,
            output_bit_depth: 8,
        }
    }

    fn flat_maps(seq: &SequenceParams, qp: i8) -> FrameMaps {
        let mut maps = FrameMaps::new(seq);
        for scu in maps.scu.iter_mut() {
            scu.slice_nr = 0;
            scu.cu_level = 4;
            scu.mode = PredMode::Intra2Nx2N;
            scu.qp = qp;
        }
        maps
    }

    #[test]
    fn verify_flat_input_is_idempotent() {
        let seq = test_seq();
        let maps = flat_maps(&seq, 45);
        let mut planes = vec![
            PaddedPlane::new(64, 64, 16).unwrap(),
            PaddedPlane::new(32, 32, 8).unwrap(),
            PaddedPlane::new(32, 32, 8).unwrap(),
        ];

        for plane in planes.iter_mut() {
            for y in 0..plane.height() as i32 {
                for x in 0..plane.width() as i32 {
                    plane.set(x, y, 120);
                }
            }
        }

        deblock_lcu(&mut planes, &maps, &seq, 0, 0);

        for plane in planes.iter() {
            for y in 0..plane.height() as i32 {
                for x in 0..plane.width() as i32 {
                    assert_eq!(plane.get(x, y), 120);
                }
            }
        }
    }

    #[test]
    fn verify_strong_edge_smooths_step() {
        let seq = test_seq();
        let maps = flat_maps(&seq, 45);
        let mut planes = vec![
            PaddedPlane::new(64, 64, 16).unwrap(),
            PaddedPlane::new(32, 32, 8).unwrap(),
            PaddedPlane::new(32, 32, 8).unwrap(),
        ];

        // A small step across the vertical edge at x = 16.
        for y in 0..64 {
            for x in 0..64 {
                planes[0].set(x, y, if x < 16 { 100 } else { 104 });
            }
        }

        let before = (i32::from(planes[0].get(15, 8)) - i32::from(planes[0].get(16, 8))).abs();
        deblock_lcu(&mut planes, &maps, &seq, 0, 0);
        let after = (i32::from(planes[0].get(15, 8)) - i32::from(planes[0].get(16, 8))).abs();

        assert!(after < before, "edge step not reduced: {} -> {}", before, after);
    }

    #[test]
    fn verify_low_qp_skips_filtering() {
        // Below the threshold knee alpha is zero and nothing may change.
        let seq = test_seq();
        let maps = flat_maps(&seq, 4);
        let mut planes = vec![
            PaddedPlane::new(64, 64, 16).unwrap(),
            PaddedPlane::new(32, 32, 8).unwrap(),
            PaddedPlane::new(32, 32, 8).unwrap(),
        ];

        for y in 0..64 {
            for x in 0..64 {
                planes[0].set(x, y, if x < 16 { 100 } else { 140 });
            }
        }

        deblock_lcu(&mut planes, &maps, &seq, 0, 0);
        assert_eq!(planes[0].get(15, 8), 100);
        assert_eq!(planes[0].get(16, 8), 140);
    }
}
