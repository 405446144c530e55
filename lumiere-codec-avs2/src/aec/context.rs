// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Adaptive context models of the arithmetic entropy decoder.
//!
//! A context packs its probability estimate (`lg_pmps`), most probable symbol (`mps`), and
//! adaptation cycle counter (`cycno`) into 16 bits. Probability adaptation is a pure function of
//! the packed value, so both the MPS and LPS updates are precomputed into transition tables
//! indexed by the packed value.

use lazy_static::lazy_static;

use super::{B_BITS, LG_PMPS_SHIFTNO, QUARTER};

/// Window-size selector per adaptation cycle.
const CWR: [u32; 4] = [3, 3, 4, 5];

/// `lg_pmps` increment on an LPS, indexed by the window-size selector.
const LG_PMPS_OFFSET: [u32; 6] = [0, 0, 0, 197, 95, 46];

/// A packed adaptive context: `lg_pmps` (11 bits), `mps` (1 bit), `cycno` (2 bits).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Context(pub u16);

impl Context {
    /// The uniform state every context holds at the start of a slice.
    pub const fn initial() -> Context {
        Context::pack((QUARTER << LG_PMPS_SHIFTNO) - 1, 0, 0)
    }

    pub const fn pack(lg_pmps: u32, mps: u32, cycno: u32) -> Context {
        Context(((lg_pmps << 3) | (mps << 2) | cycno) as u16)
    }

    #[inline(always)]
    pub fn lg_pmps(self) -> u32 {
        u32::from(self.0) >> 3
    }

    #[inline(always)]
    pub fn mps(self) -> u32 {
        (u32::from(self.0) >> 2) & 1
    }

    #[inline(always)]
    pub fn cycno(self) -> u32 {
        u32::from(self.0) & 3
    }

    /// Adapt the context after decoding its most probable symbol.
    #[inline(always)]
    pub fn update_mps(&mut self) {
        self.0 = TRANSITION_MPS[self.0 as usize].0;
    }

    /// Adapt the context after decoding its least probable symbol.
    #[inline(always)]
    pub fn update_lps(&mut self) {
        self.0 = TRANSITION_LPS[self.0 as usize].0;
    }
}

/// The MPS update rule of the standard, evaluated directly.
fn transition_mps_of(ctx: Context) -> Context {
    let cwr = CWR[ctx.cycno() as usize];
    let cycno = ctx.cycno().max(1);
    let lg_pmps = ctx.lg_pmps();
    let lg_pmps = lg_pmps - (lg_pmps >> cwr) - (lg_pmps >> (cwr + 2));
    Context::pack(lg_pmps, ctx.mps(), cycno)
}

/// The LPS update rule of the standard, including the estimate reflection that flips the MPS.
fn transition_lps_of(ctx: Context) -> Context {
    let cwr = CWR[ctx.cycno() as usize];
    let cycno = (ctx.cycno() + 1).min(3);
    let mut mps = ctx.mps();
    let mut lg_pmps = ctx.lg_pmps() + LG_PMPS_OFFSET[cwr as usize];

    if lg_pmps >= 256 << LG_PMPS_SHIFTNO {
        lg_pmps = (512 << LG_PMPS_SHIFTNO) - 1 - lg_pmps;
        mps = 1 - mps;
    }

    Context::pack(lg_pmps, mps, cycno)
}

lazy_static! {
    /// Context transition on an MPS, indexed by the packed context value.
    pub static ref TRANSITION_MPS: Box<[Context]> = {
        let mut tab = vec![Context(0); 1 << 14];
        for lg_pmps in 0..=1024u32 {
            for mps in 0..2 {
                for cycno in 0..4 {
                    let ctx = Context::pack(lg_pmps, mps, cycno);
                    tab[ctx.0 as usize] = transition_mps_of(ctx);
                }
            }
        }
        tab.into_boxed_slice()
    };

    /// Context transition on an LPS, indexed by the packed context value.
    pub static ref TRANSITION_LPS: Box<[Context]> = {
        let mut tab = vec![Context(0); 1 << 14];
        for lg_pmps in 0..=1024u32 {
            for mps in 0..2 {
                for cycno in 0..4 {
                    let ctx = Context::pack(lg_pmps, mps, cycno);
                    tab[ctx.0 as usize] = transition_lps_of(ctx);
                }
            }
        }
        tab.into_boxed_slice()
    };
}

pub const NUM_CU_TYPE_CTX: usize = 6;
pub const NUM_CU_SUBTYPE_CTX: usize = 4;
pub const NUM_PART_SHAPE_CTX: usize = 2;
pub const NUM_INTER_DIR_CTX: usize = 15;
pub const NUM_INTER_DIR_MIN_CTX: usize = 2;
pub const NUM_TU_SPLIT_CTX: usize = 3;
pub const NUM_INTRA_PU_TYPE_CTX: usize = 1;
pub const NUM_SPLIT_FLAG_CTX: usize = 3;
pub const NUM_INTRA_MODE_CTX: usize = 7;
pub const NUM_INTRA_CMODE_CTX: usize = 5;
pub const NUM_REF_IDX_CTX: usize = 3;
pub const NUM_DELTA_QP_CTX: usize = 4;
pub const NUM_CBP_CTX: usize = 9;
pub const NUM_MVD_CTX: usize = 3;
pub const NUM_WSM_CTX: usize = 3;
pub const NUM_RUN_CTX: usize = 11;
pub const NUM_LEVEL_CTX: usize = 40;
pub const NUM_SIG_CG_CTX_LUMA: usize = 2;
pub const NUM_SIG_CG_CTX: usize = NUM_SIG_CG_CTX_LUMA + 1;
pub const NUM_LAST_CG_CTX_LUMA: usize = 12;
pub const NUM_LAST_CG_CTX: usize = NUM_LAST_CG_CTX_LUMA + 6;
pub const NUM_LAST_POS_CTX_LUMA: usize = 48;
pub const NUM_LAST_POS_CTX: usize = NUM_LAST_POS_CTX_LUMA + 12;
pub const NUM_SAO_MERGE_CTX: usize = 3;
pub const NUM_ALF_LCU_CTX: usize = 3;

/// The complete set of adaptive contexts of one slice, grouped by syntax element.
///
/// All contexts are reset to [`Context::initial`] at the start of every slice.
pub struct ContextSet {
    pub cu_type: [Context; NUM_CU_TYPE_CTX],
    pub cu_subtype: [Context; NUM_CU_SUBTYPE_CTX],
    pub part_shape: [Context; NUM_PART_SHAPE_CTX],
    /// Inter prediction direction; also hosts the DHP direction and DMH mode contexts.
    pub inter_dir: [Context; NUM_INTER_DIR_CTX],
    pub inter_dir_min: [Context; NUM_INTER_DIR_MIN_CTX],
    pub tu_split: [Context; NUM_TU_SPLIT_CTX],
    pub intra_pu_type: [Context; NUM_INTRA_PU_TYPE_CTX],
    pub split_flag: [Context; NUM_SPLIT_FLAG_CTX],
    pub intra_luma_mode: [Context; NUM_INTRA_MODE_CTX],
    pub intra_chroma_mode: [Context; NUM_INTRA_CMODE_CTX],
    pub ref_idx: [Context; NUM_REF_IDX_CTX],
    pub delta_qp: [Context; NUM_DELTA_QP_CTX],
    pub cbp: [Context; NUM_CBP_CTX],
    pub mvd: [[Context; NUM_MVD_CTX]; 2],
    pub weighted_skip: [Context; NUM_WSM_CTX],
    /// Coefficient run contexts: [luma/chroma][abs-sum category][position class].
    pub coeff_run: [[[Context; NUM_RUN_CTX]; 3]; 2],
    /// Coefficient level contexts; chroma occupies the upper half.
    pub coeff_level: [Context; NUM_LEVEL_CTX],
    pub sig_cg: [Context; NUM_SIG_CG_CTX],
    pub last_cg: [Context; NUM_LAST_CG_CTX],
    pub last_pos_in_cg: [Context; NUM_LAST_POS_CTX],
    pub sao_merge: [Context; NUM_SAO_MERGE_CTX],
    pub sao_mode: Context,
    pub sao_offset: Context,
    pub alf_lcu_enable: [Context; NUM_ALF_LCU_CTX],
}

impl ContextSet {
    pub fn new() -> ContextSet {
        const C: Context = Context::initial();
        ContextSet {
            cu_type: [C; NUM_CU_TYPE_CTX],
            cu_subtype: [C; NUM_CU_SUBTYPE_CTX],
            part_shape: [C; NUM_PART_SHAPE_CTX],
            inter_dir: [C; NUM_INTER_DIR_CTX],
            inter_dir_min: [C; NUM_INTER_DIR_MIN_CTX],
            tu_split: [C; NUM_TU_SPLIT_CTX],
            intra_pu_type: [C; NUM_INTRA_PU_TYPE_CTX],
            split_flag: [C; NUM_SPLIT_FLAG_CTX],
            intra_luma_mode: [C; NUM_INTRA_MODE_CTX],
            intra_chroma_mode: [C; NUM_INTRA_CMODE_CTX],
            ref_idx: [C; NUM_REF_IDX_CTX],
            delta_qp: [C; NUM_DELTA_QP_CTX],
            cbp: [C; NUM_CBP_CTX],
            mvd: [[C; NUM_MVD_CTX]; 2],
            weighted_skip: [C; NUM_WSM_CTX],
            coeff_run: [[[C; NUM_RUN_CTX]; 3]; 2],
            coeff_level: [C; NUM_LEVEL_CTX],
            sig_cg: [C; NUM_SIG_CG_CTX],
            last_cg: [C; NUM_LAST_CG_CTX],
            last_pos_in_cg: [C; NUM_LAST_POS_CTX],
            sao_merge: [C; NUM_SAO_MERGE_CTX],
            sao_mode: C,
            sao_offset: C,
            alf_lcu_enable: [C; NUM_ALF_LCU_CTX],
        }
    }

    /// Reset every context to the uniform starting state. Performed at each slice boundary.
    pub fn reset(&mut self) {
        *self = ContextSet::new();
    }
}

impl Default for ContextSet {
    fn default() -> Self {
        ContextSet::new()
    }
}

// Keep B_BITS referenced from this module so the derivation of the initial estimate stays tied to
// the coder constants.
const _: () = assert!(QUARTER == 1 << (B_BITS - 2));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_initial_context() {
        let ctx = Context::initial();
        assert_eq!(ctx.lg_pmps(), 1023);
        assert_eq!(ctx.mps(), 0);
        assert_eq!(ctx.cycno(), 0);
    }

    #[test]
    fn verify_mps_transition_formula() {
        // Every reachable state must match the update rule exactly.
        for lg_pmps in 0..=1023u32 {
            for mps in 0..2 {
                for cycno in 0..4 {
                    let ctx = Context::pack(lg_pmps, mps, cycno);
                    let next = TRANSITION_MPS[ctx.0 as usize];

                    let cwr = CWR[cycno as usize];
                    let expected = lg_pmps - (lg_pmps >> cwr) - (lg_pmps >> (cwr + 2));

                    assert_eq!(next.lg_pmps(), expected);
                    assert_eq!(next.mps(), mps);
                    assert_eq!(next.cycno(), cycno.max(1));
                }
            }
        }
    }

    #[test]
    fn verify_lps_transition_formula() {
        for lg_pmps in 0..=1023u32 {
            for mps in 0..2 {
                for cycno in 0..4 {
                    let ctx = Context::pack(lg_pmps, mps, cycno);
                    let next = TRANSITION_LPS[ctx.0 as usize];

                    let cwr = CWR[cycno as usize];
                    let mut expected = lg_pmps + LG_PMPS_OFFSET[cwr as usize];
                    let mut expected_mps = mps;
                    if expected >= 256 << LG_PMPS_SHIFTNO {
                        expected = (512 << LG_PMPS_SHIFTNO) - 1 - expected;
                        expected_mps = 1 - mps;
                    }

                    assert_eq!(next.lg_pmps(), expected, "lg_pmps {} cycno {}", lg_pmps, cycno);
                    assert_eq!(next.mps(), expected_mps);
                    assert_eq!(next.cycno(), (cycno + 1).min(3));
                }
            }
        }
    }

    #[test]
    fn verify_lps_reflection_reachable() {
        // With cycno >= 1 the offset is large enough that high estimates reflect and flip the MPS.
        let ctx = Context::pack(1000, 0, 3);
        let next = TRANSITION_LPS[ctx.0 as usize];
        assert_eq!(next.mps(), 1);
    }
}
