// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `scan` module provides the fixed coefficient scan permutations.
//!
//! All orders are alternating anti-diagonal (zig-zag) scans. Coefficients inside a 4x4
//! coefficient group follow the 4x4 order; coefficient groups inside a transform unit follow the
//! order of the group grid geometry, which may be non-square for NSQT/SDIP transform units.

use lazy_static::lazy_static;

/// Generates the zig-zag scan of a `width` x `height` grid as (x, y) pairs in scan order.
///
/// Odd anti-diagonals are walked from the top-right end, even ones from the bottom-left end.
fn zigzag(width: usize, height: usize) -> Vec<(u8, u8)> {
    let mut order = Vec::with_capacity(width * height);

    for d in 0..width + height - 1 {
        let x_min = d.saturating_sub(height - 1);
        let x_max = d.min(width - 1);

        if d & 1 != 0 {
            for x in (x_min..=x_max).rev() {
                order.push((x as u8, (d - x) as u8));
            }
        }
        else {
            for x in x_min..=x_max {
                order.push((x as u8, (d - x) as u8));
            }
        }
    }

    order
}

/// Inverse permutation of a zig-zag scan: raster position to scan position.
fn raster_to_scan(width: usize, height: usize) -> Vec<u8> {
    let mut map = vec![0u8; width * height];
    for (idx, &(x, y)) in zigzag(width, height).iter().enumerate() {
        map[y as usize * width + x as usize] = idx as u8;
    }
    map
}

/// All scan permutations used by coefficient decoding.
pub struct ScanTables {
    /// Scan of the 16 coefficients inside a coefficient group, as (x, y).
    pub coeff_4x4: Vec<(u8, u8)>,
    /// Scan position of each coefficient inside a group, indexed `[y][x]`.
    pub coeff_pos_in_cg: [[u8; 4]; 4],

    /// Coefficient-group scans per grid geometry, as (cg_x, cg_y).
    pub cg_1x1: Vec<(u8, u8)>,
    pub cg_2x2: Vec<(u8, u8)>,
    pub cg_4x4: Vec<(u8, u8)>,
    pub cg_8x8: Vec<(u8, u8)>,
    pub cg_16x4: Vec<(u8, u8)>,
    pub cg_8x2: Vec<(u8, u8)>,
    pub cg_4x1: Vec<(u8, u8)>,
    pub cg_4x16: Vec<(u8, u8)>,
    pub cg_2x8: Vec<(u8, u8)>,
    pub cg_1x4: Vec<(u8, u8)>,

    /// Raster to scan-index maps (width x height) used when mapping a decoded last-group
    /// position to its rank.
    pub raster_to_scan_4x4: Vec<u8>,
    pub raster_to_scan_8x8: Vec<u8>,
    /// Horizontal strip: eight groups wide, two high.
    pub raster_to_scan_8x2: Vec<u8>,
    /// Vertical strip: two groups wide, eight high.
    pub raster_to_scan_2x8: Vec<u8>,
}

impl ScanTables {
    fn build() -> ScanTables {
        let coeff_4x4 = zigzag(4, 4);

        let mut coeff_pos_in_cg = [[0u8; 4]; 4];
        for (idx, &(x, y)) in coeff_4x4.iter().enumerate() {
            coeff_pos_in_cg[y as usize][x as usize] = idx as u8;
        }

        ScanTables {
            coeff_4x4,
            coeff_pos_in_cg,
            cg_1x1: zigzag(1, 1),
            cg_2x2: zigzag(2, 2),
            cg_4x4: zigzag(4, 4),
            cg_8x8: zigzag(8, 8),
            cg_16x4: zigzag(16, 4),
            cg_8x2: zigzag(8, 2),
            cg_4x1: zigzag(4, 1),
            cg_4x16: zigzag(4, 16),
            cg_2x8: zigzag(2, 8),
            cg_1x4: zigzag(1, 4),
            raster_to_scan_4x4: raster_to_scan(4, 4),
            raster_to_scan_8x8: raster_to_scan(8, 8),
            raster_to_scan_8x2: raster_to_scan(8, 2),
            raster_to_scan_2x8: raster_to_scan(2, 8),
        }
    }

    /// The coefficient-group scan of a transform unit with `w_cg` x `h_cg` groups.
    pub fn cg_scan(&self, w_cg: usize, h_cg: usize) -> &[(u8, u8)] {
        match (w_cg, h_cg) {
            (1, 1) => &self.cg_1x1,
            (2, 2) => &self.cg_2x2,
            (4, 4) => &self.cg_4x4,
            (8, 8) => &self.cg_8x8,
            (16, 4) => &self.cg_16x4,
            (8, 2) => &self.cg_8x2,
            (4, 1) => &self.cg_4x1,
            (4, 16) => &self.cg_4x16,
            (2, 8) => &self.cg_2x8,
            (1, 4) => &self.cg_1x4,
            _ => panic!("no coefficient group scan for {}x{} groups", w_cg, h_cg),
        }
    }
}

lazy_static! {
    pub static ref SCAN: ScanTables = ScanTables::build();
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference permutations of the standard.
    #[rustfmt::skip]
    const RASTER2ZZ_4X4: [u8; 16] = [
        0,  1,  5,  6,
        2,  4,  7, 12,
        3,  8, 11, 13,
        9, 10, 14, 15,
    ];

    #[rustfmt::skip]
    const RASTER2ZZ_8X8: [u8; 64] = [
         0,  1,  5,  6, 14, 15, 27, 28,
         2,  4,  7, 13, 16, 26, 29, 42,
         3,  8, 12, 17, 25, 30, 41, 43,
         9, 11, 18, 24, 31, 40, 44, 53,
        10, 19, 23, 32, 39, 45, 52, 54,
        20, 22, 33, 38, 46, 51, 55, 60,
        21, 34, 37, 47, 50, 56, 59, 61,
        35, 36, 48, 49, 57, 58, 62, 63,
    ];

    // Horizontal strip, eight groups wide and two high.
    #[rustfmt::skip]
    const RASTER2ZZ_HOR: [u8; 16] = [
        0, 1, 4, 5,  8,  9, 12, 13,
        2, 3, 6, 7, 10, 11, 14, 15,
    ];

    // Vertical strip, two groups wide and eight high.
    #[rustfmt::skip]
    const RASTER2ZZ_VER: [u8; 16] = [
        0,  1,
        2,  4,
        3,  5,
        6,  8,
        7,  9,
        10, 12,
        11, 13,
        14, 15,
    ];

    #[test]
    fn verify_scan_4x4() {
        assert_eq!(SCAN.raster_to_scan_4x4, RASTER2ZZ_4X4);
    }

    #[test]
    fn verify_scan_8x8() {
        assert_eq!(SCAN.raster_to_scan_8x8, RASTER2ZZ_8X8);
    }

    #[test]
    fn verify_scan_hor_strip() {
        assert_eq!(SCAN.raster_to_scan_8x2, RASTER2ZZ_HOR);
    }

    #[test]
    fn verify_scan_ver_strip() {
        assert_eq!(SCAN.raster_to_scan_2x8, RASTER2ZZ_VER);
    }

    #[test]
    fn verify_coeff_pos_in_cg_is_inverse_of_scan() {
        for (idx, &(x, y)) in SCAN.coeff_4x4.iter().enumerate() {
            assert_eq!(SCAN.coeff_pos_in_cg[y as usize][x as usize] as usize, idx);
        }
    }

    #[test]
    fn verify_every_cg_scan_is_a_permutation() {
        for &(w, h) in
            &[(1, 1), (2, 2), (4, 4), (8, 8), (16, 4), (8, 2), (4, 1), (4, 16), (2, 8), (1, 4)]
        {
            let scan = SCAN.cg_scan(w, h);
            assert_eq!(scan.len(), w * h);

            let mut seen = vec![false; w * h];
            for &(x, y) in scan {
                let pos = y as usize * w + x as usize;
                assert!(!seen[pos]);
                seen[pos] = true;
            }
        }
    }
}
