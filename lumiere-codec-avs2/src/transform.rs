// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `transform` module implements dequantization (flat and weighted-matrix) and the inverse
//! transforms: square and non-square integer DCTs, the secondary 4x4 transform of small intra
//! blocks, and the wavelet lifting of 64-wide transform units.

use lazy_static::lazy_static;

use lumiere_core::util::clip3;

use crate::aec::DctPattern;
use crate::common::*;

/// Dequantizer shift per QP.
#[rustfmt::skip]
pub const IQ_SHIFT: [i32; 80] = [
    15, 15, 15, 15, 15, 15, 15, 15,
    14, 14, 14, 14, 14, 14, 14, 14,
    14, 13, 13, 13, 13, 13, 13, 13,
    12, 12, 12, 12, 12, 12, 12, 12,
    12, 11, 11, 11, 11, 11, 11, 11,
    11, 10, 10, 10, 10, 10, 10, 10,
    10,  9,  9,  9,  9,  9,  9,  9,
     8,  8,  8,  8,  8,  8,  8,  8,
     7,  7,  7,  7,  7,  7,  7,  7,
     6,  6,  6,  6,  6,  6,  6,  6,
];

/// Dequantizer scale per QP.
#[rustfmt::skip]
pub const IQ_TAB: [i32; 80] = [
    32768, 36061, 38968, 42495, 46341, 50535, 55437, 60424,
    32932, 35734, 38968, 42495, 46177, 50535, 55109, 59933,
    65535, 35734, 38968, 42577, 46341, 50617, 55027, 60097,
    32809, 35734, 38968, 42454, 46382, 50576, 55109, 60056,
    65535, 35734, 38968, 42495, 46320, 50515, 55109, 60076,
    65535, 35744, 38968, 42495, 46341, 50535, 55099, 60087,
    65535, 35734, 38973, 42500, 46341, 50535, 55109, 60097,
    32771, 35734, 38965, 42497, 46341, 50535, 55109, 60099,
    32768, 36061, 38968, 42495, 46341, 50535, 55437, 60424,
    32932, 35734, 38968, 42495, 46177, 50535, 55109, 59933,
];

/// Luma-to-chroma QP mapping.
#[rustfmt::skip]
pub const QP_SCALE_CR: [i32; 64] = [
    0,  1,  2,  3,  4,  5,  6,  7,  8,  9,
    10, 11, 12, 13, 14, 15, 16, 17, 18, 19,
    20, 21, 22, 23, 24, 25, 26, 27, 28, 29,
    30, 31, 32, 33, 34, 35, 36, 37, 38, 39,
    40, 41, 42, 42, 43, 43, 44, 44, 45, 45,
    46, 46, 47, 47, 48, 48, 48, 49, 49, 49,
    50, 50, 50, 51,
];

/// The (scale, shift) pair of the dequantizer at `qp` for a transform of log2 size `tu_log2`.
pub fn quant_params(qp: i32, tu_log2: u32) -> (i32, i32) {
    let qp = clip3(0, 79, qp) as usize;
    (IQ_TAB[qp], IQ_SHIFT[qp] - tu_log2 as i32 / 2)
}

/// The chroma QP of a CU, offset-corrected for the sample bit depth.
pub fn chroma_qp(qp: i32, sample_bit_depth: u32) -> i32 {
    let offset = 8 * (sample_bit_depth as i32 - 8);
    let idx = clip3(0, 63, qp - offset);
    QP_SCALE_CR[idx as usize] + offset
}

/// Default weighted-quant parameter vectors: [detailed, undetailed].
pub const WQ_PARAM_DEFAULT: [[i32; 6]; 2] =
    [[67, 71, 71, 80, 80, 106], [64, 49, 53, 58, 58, 64]];

pub const WQ_DETAILED: usize = 0;
pub const WQ_UNDETAILED: usize = 1;

/// Default 4x4 weighting matrix.
#[rustfmt::skip]
const WQM_DEFAULT_4X4: [i32; 16] = [
    64, 64, 64, 68,
    64, 64, 68, 72,
    64, 68, 76, 80,
    72, 76, 84, 96,
];

/// Default 8x8 weighting matrix.
#[rustfmt::skip]
const WQM_DEFAULT_8X8: [i32; 64] = [
    64,  64,  64,  64,  68,  68,  72,  76,
    64,  64,  64,  68,  72,  76,  84,  92,
    64,  64,  68,  72,  76,  80,  88,  100,
    64,  68,  72,  80,  84,  92,  100, 28,
    68,  72,  80,  84,  92,  104, 112, 128,
    76,  80,  84,  92,  104, 116, 132, 152,
    96,  100, 104, 116, 124, 140, 164, 188,
    104, 108, 116, 128, 152, 172, 192, 216,
];

/// Which of the six weighting parameters governs each 8x8 position, per model.
#[rustfmt::skip]
const WEIGHT_QUANT_MODEL_8X8: [[u8; 64]; 4] = [
    [
        0, 0, 0, 4, 4, 4, 5, 5,
        0, 0, 3, 3, 3, 3, 5, 5,
        0, 3, 2, 2, 1, 1, 5, 5,
        4, 3, 2, 2, 1, 5, 5, 5,
        4, 3, 1, 1, 5, 5, 5, 5,
        4, 3, 1, 5, 5, 5, 5, 5,
        5, 5, 5, 5, 5, 5, 5, 5,
        5, 5, 5, 5, 5, 5, 5, 5,
    ],
    [
        0, 0, 0, 4, 4, 4, 5, 5,
        0, 0, 4, 4, 4, 4, 5, 5,
        0, 3, 2, 2, 2, 1, 5, 5,
        3, 3, 2, 2, 1, 5, 5, 5,
        3, 3, 2, 1, 5, 5, 5, 5,
        3, 3, 1, 5, 5, 5, 5, 5,
        5, 5, 5, 5, 5, 5, 5, 5,
        5, 5, 5, 5, 5, 5, 5, 5,
    ],
    [
        0, 0, 0, 4, 4, 3, 5, 5,
        0, 0, 4, 4, 3, 2, 5, 5,
        0, 4, 4, 3, 2, 1, 5, 5,
        4, 4, 3, 2, 1, 5, 5, 5,
        4, 3, 2, 1, 5, 5, 5, 5,
        3, 2, 1, 5, 5, 5, 5, 5,
        5, 5, 5, 5, 5, 5, 5, 5,
        5, 5, 5, 5, 5, 5, 5, 5,
    ],
    [
        0, 0, 0, 3, 2, 1, 5, 5,
        0, 0, 4, 3, 2, 1, 5, 5,
        0, 4, 4, 3, 2, 1, 5, 5,
        3, 3, 3, 3, 2, 5, 5, 5,
        2, 2, 2, 2, 5, 5, 5, 5,
        1, 1, 1, 5, 5, 5, 5, 5,
        5, 5, 5, 5, 5, 5, 5, 5,
        5, 5, 5, 5, 5, 5, 5, 5,
    ],
];

#[rustfmt::skip]
const WEIGHT_QUANT_MODEL_4X4: [[u8; 16]; 4] = [
    [
        0, 4, 3, 5,
        4, 2, 1, 5,
        3, 1, 1, 5,
        5, 5, 5, 5,
    ],
    [
        0, 4, 4, 5,
        3, 2, 2, 5,
        3, 2, 1, 5,
        5, 5, 5, 5,
    ],
    [
        0, 4, 3, 5,
        4, 3, 2, 5,
        3, 2, 1, 5,
        5, 5, 5, 5,
    ],
    [
        0, 3, 1, 5,
        3, 4, 2, 5,
        1, 2, 2, 5,
        5, 5, 5, 5,
    ],
];

/// The default weighting matrix for a size id (0 selects 4x4, everything else 8x8).
pub fn wq_default_matrix(size_id: usize) -> &'static [i32] {
    if size_id == 0 {
        &WQM_DEFAULT_4X4
    }
    else {
        &WQM_DEFAULT_8X8
    }
}

/// Weighted quantization state of one frame.
pub struct WeightedQuant {
    /// Active matrix per transform size id (4, 8, 16, 32).
    pub cur_wq_matrix: [[i32; 64]; 4],
    /// Reconstructed matrices [size: 4x4/8x8][detailed/undetailed].
    pub(crate) wq_matrix: [[[i32; 64]; 2]; 2],
    pub(crate) wquant_param: [[i32; 6]; 2],
    /// Sequence-level matrices (size id 0 and 1) from the sequence header.
    pub seq_wq_matrix: [[i32; 64]; 2],
    /// Picture-level user matrices.
    pub pic_user_wq_matrix: [[i32; 64]; 2],
}

impl Default for WeightedQuant {
    fn default() -> Self {
        WeightedQuant {
            cur_wq_matrix: [[128; 64]; 4],
            wq_matrix: [[[128; 64]; 2]; 2],
            wquant_param: [[128; 6]; 2],
            seq_wq_matrix: [[128; 64]; 2],
            pic_user_wq_matrix: [[128; 64]; 2],
        }
    }
}

impl WeightedQuant {
    /// Rebuild the parameter vectors and model matrices for a frame.
    pub fn init_frame_quant_param(&mut self, pic: &PictureParams, user_params: &[[i32; 6]; 2]) {
        for matrix in self.cur_wq_matrix.iter_mut() {
            matrix.fill(1 << 7);
        }
        self.wquant_param = [[128; 6]; 2];

        match pic.wq_param {
            0 => self.wquant_param[WQ_DETAILED] = WQ_PARAM_DEFAULT[WQ_DETAILED],
            1 => self.wquant_param[WQ_UNDETAILED] = user_params[WQ_UNDETAILED],
            _ => self.wquant_param[WQ_DETAILED] = user_params[WQ_DETAILED],
        }

        let model = (pic.wq_model & 3) as usize;
        for k in 0..2 {
            for i in 0..64 {
                self.wq_matrix[1][k][i] =
                    self.wquant_param[k][WEIGHT_QUANT_MODEL_8X8[model][i] as usize];
            }
            for i in 0..16 {
                self.wq_matrix[0][k][i] =
                    self.wquant_param[k][WEIGHT_QUANT_MODEL_4X4[model][i] as usize];
            }
        }
    }

    /// Select the active matrix of every transform size for a frame.
    pub fn update_frame_matrix(&mut self, pic: &PictureParams) {
        for size_id in 0..4 {
            let block = (1usize << (size_id + 2)).min(8);
            let wqm_id = size_id.min(1);
            let count = block * block;

            let src = match pic.wq_data_index {
                0 => &self.seq_wq_matrix[wqm_id],
                1 => match pic.wq_param {
                    0 => &self.wq_matrix[wqm_id][WQ_DETAILED],
                    1 => &self.wq_matrix[wqm_id][0],
                    _ => &self.wq_matrix[wqm_id][1],
                },
                _ => &self.pic_user_wq_matrix[wqm_id],
            };

            self.cur_wq_matrix[size_id][..count].copy_from_slice(&src[..count]);
        }
    }

    /// Dequantize raw levels through the weighting matrix of `wqm_size_id`.
    pub fn dequant(&self, coeffs: &mut [i32], w: usize, h: usize, scale: i32, shift: i32,
        wqm_shift: i32, wqm_size_id: usize) {
        let add = 1 << (shift - 1);
        let wqm_size = 1 << (wqm_size_id + 2);
        let stride_shift = clip3(0, 2, wqm_size_id as i32 - 1) as usize;
        let stride = wqm_size >> stride_shift;
        let matrix = &self.cur_wq_matrix[wqm_size_id];

        for y in 0..h {
            for x in 0..w {
                let c = coeffs[y * w + x];
                if c != 0 {
                    let wqm_coef =
                        matrix[((y >> stride_shift) & (stride - 1)) * stride
                            + ((x >> stride_shift) & (stride - 1))];
                    let v = (((((c * wqm_coef) >> wqm_shift) * scale) >> 4) + add) >> shift;
                    coeffs[y * w + x] = clip3(-32768, 32767, v);
                }
            }
        }
    }
}

/// Flat dequantization of a coefficient block.
pub fn dequant(coeffs: &mut [i32], scale: i32, shift: i32) {
    let add = 1 << (shift - 1);
    for c in coeffs.iter_mut() {
        if *c != 0 {
            *c = clip3(-32768, 32767, (*c * scale + add) >> shift);
        }
    }
}

/// Integer DCT-II basis of size N: a DC row of 32 and AC rows of `round(32*sqrt(2)*cos)`.
fn build_basis(n: usize) -> Vec<Vec<i32>> {
    let mut basis = vec![vec![0i32; n]; n];

    for (k, row) in basis.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            *value = if k == 0 {
                32
            }
            else {
                let angle = (2 * j + 1) as f64 * k as f64 * std::f64::consts::PI
                    / (2 * n) as f64;
                (32.0 * std::f64::consts::SQRT_2 * angle.cos()).round() as i32
            };
        }
    }

    basis
}

lazy_static! {
    static ref BASIS_4: Vec<Vec<i32>> = build_basis(4);
    static ref BASIS_8: Vec<Vec<i32>> = build_basis(8);
    static ref BASIS_16: Vec<Vec<i32>> = build_basis(16);
    static ref BASIS_32: Vec<Vec<i32>> = build_basis(32);
}

pub fn basis_of(n: usize) -> &'static [Vec<i32>] {
    match n {
        4 => &BASIS_4,
        8 => &BASIS_8,
        16 => &BASIS_16,
        32 => &BASIS_32,
        _ => panic!("no transform basis of size {}", n),
    }
}

/// The populated coefficient region a DCT pattern implies for a `w` x `h` block.
fn pattern_region(pattern: DctPattern, w: usize, h: usize) -> (usize, usize) {
    match pattern {
        DctPattern::Default => (w, h),
        DctPattern::Half => {
            if w == h {
                (w / 2, h / 2)
            }
            else if w > h {
                (w / 2, h)
            }
            else {
                (w, h / 2)
            }
        }
        DctPattern::Quad => {
            if w == h {
                (w / 4, h / 4)
            }
            else if w > h {
                (w / 4, h)
            }
            else {
                (w, h / 4)
            }
        }
    }
}

/// In-place inverse DCT of a `w` x `h` coefficient block (both powers of two in 4..=32).
///
/// Stage one transforms columns with a 16-bit clamp, stage two transforms rows with the
/// bit-depth-complementary rounding. The DCT pattern bounds the non-zero source region so the
/// reduced-coefficient tiers skip the empty bands.
pub fn inverse_transform(coeffs: &mut [i32], w: usize, h: usize, bit_depth: u32,
    pattern: DctPattern) {
    let (nz_w, nz_h) = pattern_region(pattern, w, h);
    let (nz_w, nz_h) = (nz_w.max(4).min(w), nz_h.max(4).min(h));

    let t_h = basis_of(h);
    let t_w = basis_of(w);

    let shift1 = 5;
    let add1 = 1 << (shift1 - 1);
    let shift2 = 20 - bit_depth as i32;
    let add2 = 1 << (shift2 - 1);

    // Stage 1: columns.
    let mut tmp = vec![0i32; w * h];
    for x in 0..nz_w {
        for y in 0..h {
            let mut sum = 0i64;
            for k in 0..nz_h {
                sum += i64::from(coeffs[k * w + x]) * i64::from(t_h[k][y]);
            }
            tmp[y * w + x] = clip3(-32768, 32767, ((sum + add1) >> shift1) as i32);
        }
    }

    // Stage 2: rows.
    for y in 0..h {
        let mut row = vec![0i32; w];
        for x in 0..w {
            let mut sum = 0i64;
            for k in 0..nz_w {
                sum += i64::from(tmp[y * w + k]) * i64::from(t_w[k][x]);
            }
            row[x] = clip3(-32768, 32767, ((sum + add2) >> shift2) as i32);
        }
        coeffs[y * w..y * w + w].copy_from_slice(&row);
    }
}

/// Secondary transform matrix of the low-frequency 4x4 corner of 8x8 intra blocks.
#[rustfmt::skip]
const SEC_T: [[i32; 4]; 4] = [
    [ 123,  -35,  -8,  -3 ],
    [ -32, -120,  30,  10 ],
    [  14,   25, 123, -22 ],
    [   8,   13,  19, 126 ],
];

/// Secondary transform matrix of whole 4x4 intra blocks.
#[rustfmt::skip]
const SEC_T_4X4: [[i32; 4]; 4] = [
    [ 34,  58,  72,  81 ],
    [ 77,  69,  -7, -75 ],
    [ 79, -33, -75,  58 ],
    [ 55, -84,  73, -28 ],
];

fn sec_transform_region(coeffs: &mut [i32], stride: usize, t: &[[i32; 4]; 4]) {
    const SHIFT: i32 = 7;
    const ADD: i32 = 1 << (SHIFT - 1);

    // Vertical pass.
    let mut tmp = [[0i32; 4]; 4];
    for x in 0..4 {
        for y in 0..4 {
            let mut sum = 0;
            for k in 0..4 {
                sum += t[k][y] * coeffs[k * stride + x];
            }
            tmp[y][x] = clip3(-32768, 32767, (sum + ADD) >> SHIFT);
        }
    }

    // Horizontal pass.
    for y in 0..4 {
        for x in 0..4 {
            let mut sum = 0;
            for k in 0..4 {
                sum += t[k][x] * tmp[y][k];
            }
            coeffs[y * stride + x] = clip3(-32768, 32767, (sum + ADD) >> SHIFT);
        }
    }
}

/// Apply the inverse secondary transform of an intra block when it fires: whole-block for 4x4,
/// the low-frequency 4x4 corner for 8x8.
pub fn inverse_secondary_transform(coeffs: &mut [i32], size: usize, avail_top: bool,
    avail_left: bool) {
    if !(avail_top && avail_left) {
        return;
    }

    if size == 4 {
        sec_transform_region(coeffs, 4, &SEC_T_4X4);
    }
    else if size == 8 {
        sec_transform_region(coeffs, 8, &SEC_T);
    }
}

/// Inverse wavelet lifting: expand the half-resolution residual packed in the head of `coeffs`
/// (stride `w / 2`) to the full `w` x `h` block in place.
///
/// Only the low band is coded, so the synthesis reduces to sample duplication at even positions
/// and neighbor averaging at odd positions, per dimension.
pub fn inverse_wavelet(coeffs: &mut [i32], w: usize, h: usize) {
    let hw = w / 2;
    let hh = h / 2;

    // Spread the packed rows onto the full stride, bottom-up so no source is overwritten.
    for y in (0..hh).rev() {
        let row: Vec<i32> = coeffs[y * hw..y * hw + hw].to_vec();
        coeffs[y * w..y * w + hw].copy_from_slice(&row);
    }

    // Horizontal expansion within each low-band row.
    for y in 0..hh {
        let base = y * w;
        for x in (0..hw).rev() {
            coeffs[base + 2 * x] = coeffs[base + x];
        }
        for x in 0..hw {
            let cur = coeffs[base + 2 * x];
            let next = if x + 1 < hw { coeffs[base + 2 * x + 2] } else { cur };
            coeffs[base + 2 * x + 1] = (cur + next) >> 1;
        }
    }

    // Vertical expansion, bottom-up so low-band rows are consumed before being overwritten.
    for x in 0..w {
        for y in (0..hh).rev() {
            coeffs[(2 * y) * w + x] = coeffs[y * w + x];
        }
        for y in 0..hh {
            let cur = coeffs[(2 * y) * w + x];
            let next = if y + 1 < hh { coeffs[(2 * y + 2) * w + x] } else { cur };
            coeffs[(2 * y + 1) * w + x] = (cur + next) >> 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_basis_known_rows() {
        // The generated matrices must match the published integer basis of the standard.
        let t4 = basis_of(4);
        assert_eq!(t4[0], vec![32, 32, 32, 32]);
        assert_eq!(t4[1], vec![42, 17, -17, -42]);
        assert_eq!(t4[2], vec![32, -32, -32, 32]);
        assert_eq!(t4[3], vec![17, -42, 42, -17]);

        let t8 = basis_of(8);
        assert_eq!(t8[0], vec![32; 8]);
        assert_eq!(t8[1], vec![44, 38, 25, 9, -9, -25, -38, -44]);
        assert_eq!(t8[2], vec![42, 17, -17, -42, -42, -17, 17, 42]);
    }

    /// Reference forward DCT, double precision with a single rounding.
    fn forward_reference(res: &[i32], w: usize, h: usize, bit_depth: u32) -> Vec<i32> {
        let t_h = basis_of(h);
        let t_w = basis_of(w);
        let log2_wh = ((w * h) as f64).log2() as i32;
        let scale = f64::powi(2.0, log2_wh + bit_depth as i32 - 5);

        let mut out = vec![0i32; w * h];
        for u in 0..h {
            for v in 0..w {
                let mut sum = 0.0;
                for y in 0..h {
                    for x in 0..w {
                        sum += res[y * w + x] as f64
                            * t_h[u][y] as f64
                            * t_w[v][x] as f64;
                    }
                }
                out[u * w + v] = (sum / scale).round() as i32;
            }
        }
        out
    }

    #[test]
    fn verify_inverse_property_square_sizes() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::SmallRng::seed_from_u64(0x1857);

        for n in [4usize, 8, 16, 32] {
            let res: Vec<i32> = (0..n * n).map(|_| rng.gen_range(-32..=32)).collect();

            let mut coeffs = forward_reference(&res, n, n, 8);
            inverse_transform(&mut coeffs, n, n, 8, DctPattern::Default);

            for (got, want) in coeffs.iter().zip(&res) {
                assert!((got - want).abs() <= 1, "size {}: {} vs {}", n, got, want);
            }
        }
    }

    #[test]
    fn verify_inverse_property_non_square() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::SmallRng::seed_from_u64(0x1857);

        for (w, h) in [(16usize, 4usize), (4, 16), (32, 8), (8, 32)] {
            let res: Vec<i32> = (0..w * h).map(|_| rng.gen_range(-16..=16)).collect();

            let mut coeffs = forward_reference(&res, w, h, 8);
            inverse_transform(&mut coeffs, w, h, 8, DctPattern::Default);

            for (got, want) in coeffs.iter().zip(&res) {
                assert!((got - want).abs() <= 1, "{}x{}: {} vs {}", w, h, got, want);
            }
        }
    }

    #[test]
    fn verify_dc_only_block() {
        // A pure DC coefficient reconstructs a flat residual at every tier.
        for pattern in [DctPattern::Default, DctPattern::Half, DctPattern::Quad] {
            let mut coeffs = vec![0i32; 8 * 8];
            coeffs[0] = 1 << 8;
            inverse_transform(&mut coeffs, 8, 8, 8, pattern);

            let first = coeffs[0];
            assert!(coeffs.iter().all(|&c| c == first));
        }
    }

    #[test]
    fn verify_flat_dequant() {
        let mut coeffs = vec![0, 2, -2, 0];
        dequant(&mut coeffs, 32768, 14);
        assert_eq!(coeffs, vec![0, 4, -4, 0]);
    }

    #[test]
    fn verify_quant_params_range() {
        for qp in -5..85 {
            let (scale, shift) = quant_params(qp, 4);
            assert!(scale >= 32768 && scale <= 65535);
            assert!(shift >= 2 && shift <= 15);
        }
    }

    #[test]
    fn verify_chroma_qp_bit_depth_offset() {
        assert_eq!(chroma_qp(40, 8), 40);
        assert_eq!(chroma_qp(45, 8), 43);
        assert_eq!(chroma_qp(63, 8), 51);
        // For 10-bit the table applies around an offset of 16.
        assert_eq!(chroma_qp(56, 10), chroma_qp(40, 8) + 16);
    }

    #[test]
    fn verify_wavelet_flat_expansion() {
        // An 8x8 low band packed at stride 8 expands to a flat 16x16 block.
        let mut coeffs = vec![0i32; 16 * 16];
        for i in 0..8 * 8 {
            coeffs[i] = 40;
        }

        inverse_wavelet(&mut coeffs, 16, 16);
        assert!(coeffs.iter().all(|&c| c == 40));
    }

    #[test]
    fn verify_wavelet_ramp_interpolates() {
        // A 4x4 low band (packed at stride 4) whose first row ramps expands to the
        // interpolated ramp in the first output row.
        let mut coeffs = vec![0i32; 8 * 8];
        for x in 0..4 {
            coeffs[x] = (x * 10) as i32;
        }

        inverse_wavelet(&mut coeffs, 8, 8);
        assert_eq!(&coeffs[0..8], &[0, 5, 10, 15, 20, 25, 30, 30]);
    }

    #[test]
    fn verify_weighted_dequant_identity_matrix() {
        // A uniform matrix of 128 with a shift of 3 behaves like the flat path scaled by 16.
        let wq = WeightedQuant::default();
        let mut weighted = vec![4i32, 0, -4, 8];
        let mut flat = weighted.clone();

        wq.dequant(&mut weighted, 2, 2, 32768, 14, 3, 1);
        // (((c * 128) >> 3) * scale >> 4) == c * scale: identical to the flat result.
        dequant(&mut flat, 32768, 14);
        assert_eq!(weighted, flat);
    }
}
