// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `neighbor` module answers availability and lookup queries about the spatial and temporal
//! neighbors of a block: in-bounds, same slice, and already reconstructed under the z-order
//! CU traversal.

use lazy_static::lazy_static;

use crate::common::*;
use crate::frame::Frame;

/// Availability bits of the five intra reference neighborhoods.
pub const MD_I_LEFT: u32 = 0;
pub const MD_I_TOP: u32 = 1;
pub const MD_I_TOP_LEFT: u32 = 2;
pub const MD_I_TOP_RIGHT: u32 = 3;
pub const MD_I_LEFT_DOWN: u32 = 4;

#[inline(always)]
pub fn is_avail(avail: u32, which: u32) -> bool {
    avail & (1 << which) != 0
}

/// Interleave the bits of a 4x4-block position into its z-order traversal index.
fn morton(x: usize, y: usize) -> usize {
    let mut index = 0;
    for bit in 0..8 {
        index |= ((x >> bit) & 1) << (2 * bit);
        index |= ((y >> bit) & 1) << (2 * bit + 1);
    }
    index
}

/// Top-right availability of a 4x4 block inside an LCU of `size_in_spu` blocks per side: the
/// block above-right must precede it in z-order.
fn build_tr_avail(size_in_spu: usize) -> Vec<bool> {
    let mut tab = vec![false; size_in_spu * size_in_spu];
    for y in 0..size_in_spu {
        for x in 0..size_in_spu {
            tab[y * size_in_spu + x] = if y == 0 {
                true
            }
            else if x == size_in_spu - 1 {
                false
            }
            else {
                morton(x + 1, y - 1) < morton(x, y)
            };
        }
    }
    tab
}

/// Down-left availability of a 4x4 block inside an LCU: the block below-left must precede it in
/// z-order (the LCU column to the left is always complete).
fn build_dl_avail(size_in_spu: usize) -> Vec<bool> {
    let mut tab = vec![false; size_in_spu * size_in_spu];
    for y in 0..size_in_spu {
        for x in 0..size_in_spu {
            tab[y * size_in_spu + x] = if y == size_in_spu - 1 {
                false
            }
            else if x == 0 {
                true
            }
            else {
                morton(x - 1, y + 1) < morton(x, y)
            };
        }
    }
    tab
}

/// Reconstruction-order availability tables per LCU size (log2 3..=6).
pub struct AvailTables {
    tr: [Vec<bool>; 4],
    dl: [Vec<bool>; 4],
}

impl AvailTables {
    /// Is the top-right 4x4 neighbor of the block at intra-LCU position (x, y) reconstructed?
    pub fn top_right(&self, lcu_bits: u32, x: usize, y: usize) -> bool {
        let size = 1 << (lcu_bits - MIN_PU_SIZE_IN_BIT);
        self.tr[(lcu_bits - 3) as usize][y * size + x]
    }

    /// Is the down-left 4x4 neighbor of the block at intra-LCU position (x, y) reconstructed?
    pub fn down_left(&self, lcu_bits: u32, x: usize, y: usize) -> bool {
        let size = 1 << (lcu_bits - MIN_PU_SIZE_IN_BIT);
        self.dl[(lcu_bits - 3) as usize][y * size + x]
    }
}

lazy_static! {
    pub static ref AVAILS: AvailTables = AvailTables {
        tr: [build_tr_avail(2), build_tr_avail(4), build_tr_avail(8), build_tr_avail(16)],
        dl: [build_dl_avail(2), build_dl_avail(4), build_dl_avail(8), build_dl_avail(16)],
    };
}

/// Compact per-SCU (8x8) record of the decoded CU covering it.
#[derive(Copy, Clone, Debug)]
pub struct ScuInfo {
    /// Slice index, -1 while undecoded (or poisoned after a parse error).
    pub slice_nr: i32,
    pub cu_level: u8,
    pub mode: PredMode,
    pub tu_split: TuSplit,
    pub cbp: u8,
    pub qp: i8,
    pub intra_mode: i8,
}

impl Default for ScuInfo {
    fn default() -> Self {
        ScuInfo {
            slice_nr: -1,
            cu_level: MIN_CU_SIZE_IN_BIT as u8,
            mode: PredMode::IntraNxN,
            tu_split: TuSplit::None,
            cbp: 0,
            qp: 0,
            intra_mode: 0,
        }
    }
}

/// Per-picture working grids written by the parser and consulted by neighbor queries.
pub struct FrameMaps {
    pub width_in_spu: usize,
    pub height_in_spu: usize,
    pub width_in_scu: usize,
    pub height_in_scu: usize,

    /// Prediction direction per 4x4 block.
    pub dir_pred: Vec<PredDir>,
    /// Reference index pair per 4x4 block.
    pub ref_idx: Vec<RefPair>,
    /// First motion vector per 4x4 block.
    pub mv_1st: Vec<Mv>,
    /// Second motion vector per 4x4 block.
    pub mv_2nd: Vec<Mv>,
    /// Intra luma prediction mode per 4x4 block, with one extra guard row and column.
    /// Unavailable positions read as DC, which the MPM derivation expects. Index via
    /// [`FrameMaps::ipred_index`].
    pub ipred_mode: Vec<i8>,
    /// Per-SCU record of the covering CU.
    pub scu: Vec<ScuInfo>,
}

impl FrameMaps {
    pub fn new(seq: &SequenceParams) -> FrameMaps {
        let w_spu = seq.width_in_spu();
        let h_spu = seq.height_in_spu();
        let num_spu = w_spu * h_spu;

        FrameMaps {
            width_in_spu: w_spu,
            height_in_spu: h_spu,
            width_in_scu: seq.width_in_scu(),
            height_in_scu: seq.height_in_scu(),
            dir_pred: vec![PredDir::Invalid; num_spu],
            ref_idx: vec![RefPair::default(); num_spu],
            mv_1st: vec![Mv::ZERO; num_spu],
            mv_2nd: vec![Mv::ZERO; num_spu],
            ipred_mode: vec![0; (w_spu + 1) * (h_spu + 1)],
            scu: vec![ScuInfo::default(); seq.width_in_scu() * seq.height_in_scu()],
        }
    }

    /// Reset the grids at the start of a frame.
    pub fn reset(&mut self) {
        self.dir_pred.fill(PredDir::Invalid);
        self.ref_idx.fill(RefPair::default());
        self.mv_1st.fill(Mv::ZERO);
        self.mv_2nd.fill(Mv::ZERO);
        self.ipred_mode.fill(0);
        for scu in self.scu.iter_mut() {
            *scu = ScuInfo::default();
        }
    }

    /// Clear the intra-mode row above a new slice back to DC.
    pub fn reset_ipred_row(&mut self, spu_y: usize) {
        let stride = self.width_in_spu + 1;
        let row = spu_y.min(self.height_in_spu);
        self.ipred_mode[row * stride..(row + 1) * stride].fill(0);
    }

    /// Index of the intra-mode entry of the 4x4 block at (x, y); (-1, -1) addresses the guards.
    #[inline(always)]
    pub fn ipred_index(&self, x: i32, y: i32) -> usize {
        let stride = (self.width_in_spu + 1) as i32;
        ((y + 1) * stride + (x + 1)) as usize
    }

    #[inline(always)]
    pub fn spu_index(&self, x: usize, y: usize) -> usize {
        y * self.width_in_spu + x
    }

    #[inline(always)]
    pub fn scu_at(&self, scu_x: usize, scu_y: usize) -> &ScuInfo {
        &self.scu[scu_y * self.width_in_scu + scu_x]
    }

    /// Is the 4x4 block at `(x + dx, y + dy)` inside the picture and in the same slice?
    pub fn is_block_available(&self, x: i32, y: i32, dx: i32, dy: i32, slice_nr: i32) -> bool {
        let x2 = x + dx;
        let y2 = y + dy;

        if x2 < 0 || y2 < 0 || x2 >= self.width_in_spu as i32 || y2 >= self.height_in_spu as i32 {
            return false;
        }

        self.scu_at(x2 as usize >> 1, y2 as usize >> 1).slice_nr == slice_nr
    }

    /// Intra availability key of a block at 4x4 position (x, y) of size `bsx` x `bsy`.
    ///
    /// Combines slice membership with the reconstruction-order tables for the top-right and
    /// down-left corners.
    pub fn intra_avail(
        &self,
        lcu_bits: u32,
        x_4x4: usize,
        y_4x4: usize,
        bsx: usize,
        bsy: usize,
        slice_nr: i32,
    ) -> u32 {
        let x = x_4x4 as i32;
        let y = y_4x4 as i32;

        let left = self.is_block_available(x, y, -1, 0, slice_nr);
        let top = self.is_block_available(x, y, 0, -1, slice_nr);
        let top_left = self.is_block_available(x, y, -1, -1, slice_nr);
        let mut left_down = self.is_block_available(x, y, -1, (bsy as i32 >> 1) - 1, slice_nr);
        let mut top_right = self.is_block_available(x, y, (bsx as i32 >> 1) - 1, -1, slice_nr);

        let lcu_mask = (1usize << (lcu_bits - B4X4_IN_BIT)) - 1;
        let x_in_lcu = x_4x4 & lcu_mask;
        let y_in_lcu = y_4x4 & lcu_mask;

        left_down = left_down && AVAILS.down_left(lcu_bits, x_in_lcu, y_in_lcu + (bsy >> 2) - 1);
        top_right = top_right && AVAILS.top_right(lcu_bits, x_in_lcu + (bsx >> 2) - 1, y_in_lcu);

        (u32::from(left) << MD_I_LEFT)
            | (u32::from(top) << MD_I_TOP)
            | (u32::from(top_left) << MD_I_TOP_LEFT)
            | (u32::from(top_right) << MD_I_TOP_RIGHT)
            | (u32::from(left_down) << MD_I_LEFT_DOWN)
    }

    /// The ctp bit of the luma transform block covering the 4x4 position (x, y), for the CBP
    /// context derivation. Positions outside the slice return 0.
    pub fn neighbor_ctp_y(&self, x_4x4: i32, y_4x4: i32, scu_x: usize, scu_y: usize,
        cur: &ScuInfo) -> u32 {
        if x_4x4 < 0
            || y_4x4 < 0
            || x_4x4 >= self.width_in_spu as i32
            || y_4x4 >= self.height_in_spu as i32
        {
            return 0;
        }

        let shift_4x4 = MIN_CU_SIZE_IN_BIT - MIN_PU_SIZE_IN_BIT;
        let inside_cur = ((scu_x << shift_4x4) as i32 <= x_4x4)
            && ((scu_y << shift_4x4) as i32 <= y_4x4);

        let neighbor = if inside_cur {
            cur
        }
        else {
            let other = self.scu_at(x_4x4 as usize >> 1, y_4x4 as usize >> 1);
            if other.slice_nr != cur.slice_nr {
                return 0;
            }
            other
        };

        let cbp = u32::from(neighbor.cbp);
        let level = u32::from(neighbor.cu_level) - MIN_PU_SIZE_IN_BIT;
        let cu_mask = (1i32 << level) - 1;
        let x = (x_4x4 & cu_mask) as u32;
        let y = (y_4x4 & cu_mask) as u32;

        match neighbor.tu_split {
            TuSplit::None => cbp & 1,
            TuSplit::Ver => (cbp >> (x >> (level - 2))) & 1,
            TuSplit::Hor => (cbp >> (y >> (level - 2))) & 1,
            TuSplit::Cross => (cbp >> ((x >> (level - 1)) + ((y >> (level - 1)) << 1))) & 1,
        }
    }
}

/// Everything known about one inter neighbor block.
#[derive(Copy, Clone, Debug)]
pub struct NeighborInter {
    pub available: bool,
    pub dir_pred: PredDir,
    pub ref_idx: RefPair,
    pub mv: [Mv; 2],
}

impl Default for NeighborInter {
    fn default() -> Self {
        NeighborInter {
            available: false,
            dir_pred: PredDir::Invalid,
            ref_idx: RefPair::default(),
            mv: [Mv::ZERO; 2],
        }
    }
}

/// Slots of the spatial/temporal neighbor set gathered per PU.
pub const BLK_LEFT: usize = 0;
pub const BLK_TOP: usize = 1;
pub const BLK_TOP2: usize = 2;
pub const BLK_TOPLEFT: usize = 3;
pub const BLK_LEFT2: usize = 4;
pub const BLK_TOPRIGHT: usize = 5;
pub const BLK_COLLOCATED: usize = 6;
pub const NUM_INTER_NEIGHBORS: usize = 7;

impl FrameMaps {
    /// Fetch the spatial inter neighbor at 4x4 position (x4, y4). Negative positions and
    /// cross-slice neighbors are unavailable.
    pub fn spatial_neighbor(&self, slice_nr: i32, x4: i32, y4: i32) -> NeighborInter {
        let outside = x4 < 0
            || y4 < 0
            || x4 >= self.width_in_spu as i32
            || y4 >= self.height_in_spu as i32;

        if outside
            || self.scu_at(x4 as usize >> 1, y4 as usize >> 1).slice_nr != slice_nr
        {
            return NeighborInter::default();
        }

        let pos = self.spu_index(x4 as usize, y4 as usize);
        NeighborInter {
            available: true,
            dir_pred: self.dir_pred[pos],
            ref_idx: self.ref_idx[pos],
            mv: [self.mv_1st[pos], self.mv_2nd[pos]],
        }
    }
}

/// Fetch the temporal (collocated) neighbor from the first reference frame.
pub fn temporal_neighbor(fref: &Frame, width_in_spu: usize, x4: usize, y4: usize) -> NeighborInter {
    let motion = fref.motion.read().unwrap();
    let pos = y4 * width_in_spu + x4;

    NeighborInter {
        available: true,
        dir_pred: PredDir::Fwd,
        ref_idx: RefPair::new(motion.ref_idx[pos], INVALID_REF),
        mv: [motion.mv[pos], Mv::ZERO],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reconstruction-order availability of the standard for 8x8 and 16x16 LCUs.
    const TR_AVAIL8: [u8; 4] = [1, 1, 1, 0];
    const DL_AVAIL8: [u8; 4] = [1, 0, 0, 0];

    #[rustfmt::skip]
    const TR_AVAIL16: [u8; 16] = [
        1, 1, 1, 1,
        1, 0, 1, 0,
        1, 1, 1, 0,
        1, 0, 1, 0,
    ];

    #[rustfmt::skip]
    const DL_AVAIL16: [u8; 16] = [
        1, 0, 1, 0,
        1, 0, 0, 0,
        1, 0, 1, 0,
        0, 0, 0, 0,
    ];

    #[test]
    fn verify_tr_avail_tables() {
        assert_eq!(build_tr_avail(2), TR_AVAIL8.map(|v| v != 0));
        assert_eq!(build_tr_avail(4), TR_AVAIL16.map(|v| v != 0));
    }

    #[test]
    fn verify_dl_avail_tables() {
        assert_eq!(build_dl_avail(2), DL_AVAIL8.map(|v| v != 0));
        assert_eq!(build_dl_avail(4), DL_AVAIL16.map(|v| v != 0));
    }

    #[test]
    fn verify_tr_avail_64_spot_checks() {
        // Row 0 is fully available, the rightmost column of later rows never is, and odd
        // positions alternate.
        let tab = build_tr_avail(16);
        assert!(tab[0..16].iter().all(|&v| v));
        assert!(!tab[1 * 16 + 15]);
        assert!(tab[1 * 16 + 0]);
        assert!(!tab[1 * 16 + 1]);
        assert!(tab[2 * 16 + 2]);
        assert!(!tab[2 * 16 + 3]);
    }

    #[test]
    fn verify_morton_is_z_order() {
        assert_eq!(morton(0, 0), 0);
        assert_eq!(morton(1, 0), 1);
        assert_eq!(morton(0, 1), 2);
        assert_eq!(morton(1, 1), 3);
        assert_eq!(morton(2, 0), 4);
        assert_eq!(morton(0, 2), 8);
    }
}
