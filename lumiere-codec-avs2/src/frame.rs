// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `frame` module provides the decoded frame store: padded sample planes, the per-row
//! reconstruction progress used for inter-frame synchronization, and the temporal motion
//! snapshot consumed by later frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, RwLock};

use lumiere_core::video::{ChromaFormat, PictureType, Plane, Sample, VideoPicture};

use crate::common::*;

/// A sample plane with a reconstruction margin on every side.
///
/// Coordinates are relative to the visible origin; the margin is addressed with negative
/// coordinates. Motion compensation may read up to `pad` samples outside the picture.
pub struct PaddedPlane {
    plane: Plane,
    pad: usize,
    width: usize,
    height: usize,
}

impl PaddedPlane {
    pub fn new(width: usize, height: usize, pad: usize) -> Option<PaddedPlane> {
        let plane = Plane::new(width + 2 * pad, height + 2 * pad, width + 2 * pad)?;
        Some(PaddedPlane { plane, pad, width, height })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pad(&self) -> usize {
        self.pad
    }

    pub fn stride(&self) -> usize {
        self.plane.stride()
    }

    #[inline(always)]
    fn index(&self, x: i32, y: i32) -> usize {
        let px = (x + self.pad as i32) as usize;
        let py = (y + self.pad as i32) as usize;
        py * self.plane.stride() + px
    }

    /// Get one sample; `x` and `y` may reach into the margin.
    #[inline(always)]
    pub fn get(&self, x: i32, y: i32) -> Sample {
        self.plane.samples()[self.index(x, y)]
    }

    /// Set one sample inside the visible region.
    #[inline(always)]
    pub fn set(&mut self, x: i32, y: i32, value: Sample) {
        let idx = self.index(x, y);
        self.plane.samples_mut()[idx] = value;
    }

    /// Get `len` consecutive samples of one row starting at `x`.
    #[inline(always)]
    pub fn row_from(&self, x: i32, y: i32, len: usize) -> &[Sample] {
        let idx = self.index(x, y);
        &self.plane.samples()[idx..idx + len]
    }

    /// Get `len` consecutive mutable samples of one row starting at `x`.
    #[inline(always)]
    pub fn row_from_mut(&mut self, x: i32, y: i32, len: usize) -> &mut [Sample] {
        let idx = self.index(x, y);
        &mut self.plane.samples_mut()[idx..idx + len]
    }

    /// Copy a rectangle out of another padded plane.
    pub fn copy_rect_from(&mut self, src: &PaddedPlane, x: i32, y: i32, w: usize, h: usize) {
        for row in 0..h as i32 {
            let line = src.row_from(x, y + row, w).to_vec();
            self.row_from_mut(x, y + row, w).copy_from_slice(&line);
        }
    }

    /// Extend the margin of the rows `y0..y1` by edge replication, including the top margin when
    /// the band touches the first row and the bottom margin when it touches the last.
    pub fn pad_rows(&mut self, y0: usize, y1: usize) {
        let pad = self.pad as i32;
        let w = self.width;

        for y in y0..y1.min(self.height) {
            let y = y as i32;
            let left = self.get(0, y);
            let right = self.get(w as i32 - 1, y);
            self.row_from_mut(-pad, y, self.pad).fill(left);
            self.row_from_mut(w as i32, y, self.pad).fill(right);
        }

        if y0 == 0 {
            let top = self.row_from(-pad, 0, self.stride()).to_vec();
            for y in 1..=self.pad as i32 {
                self.row_from_mut(-pad, -y, self.stride()).copy_from_slice(&top);
            }
        }

        if y1 >= self.height {
            let bottom = self.row_from(-pad, self.height as i32 - 1, self.stride()).to_vec();
            for y in 0..self.pad as i32 {
                self.row_from_mut(-pad, self.height as i32 + y, self.stride()).copy_from_slice(
                    &bottom,
                );
            }
        }
    }
}

/// Reconstruction progress of one frame, broadcast row by row.
struct ReconProgress {
    /// Highest LCU row whose post-filter samples are final.
    decoded_line: i32,
    /// Number of reconstructed LCUs per row; `width_in_lcu + 3` once the row is signaled final.
    lcu_in_row: Vec<i32>,
}

/// Parse progress of one frame.
struct ParseProgress {
    /// Raster index of the last entropy-parsed LCU.
    parsed_lcu_xy: i32,
}

/// Temporal motion snapshot of a referable frame, one entry per 4x4 block.
#[derive(Default)]
pub struct TemporalMotion {
    pub mv: Vec<Mv>,
    pub ref_idx: Vec<i8>,
}

/// A decoded frame and everything other frames need from it.
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub chroma_format: ChromaFormat,
    pub bit_depth: u32,

    /// Sample planes, writable by the reconstructing decoder, shared-read by frames that
    /// reference this one. Readers gate on the row progress before locking.
    pub planes: RwLock<Vec<PaddedPlane>>,

    /// Temporal MV/reference snapshot, filled per LCU row while parsing.
    pub motion: RwLock<TemporalMotion>,

    recon: Mutex<ReconProgress>,
    recon_conds: Vec<Condvar>,
    parse: Mutex<ParseProgress>,
    parse_cond: Condvar,

    /// Decoding hit a bitstream error; the frame is still emitted to keep output order.
    pub decode_error: AtomicBool,

    // Display/reference properties, set by the owning decoder before the frame is shared.
    pub poc: i32,
    pub picture_type: PictureType,
    pub referenced: bool,
    /// Reference distances of this frame's own references, for temporal MV scaling by frames
    /// that use this frame as their collocated reference.
    pub dist_refs: [i32; MAX_REFS],
    pub dist_scale_refs: [i32; MAX_REFS],
    pub pts: i64,
    pub dts: i64,
}

impl Frame {
    pub fn new(seq: &SequenceParams) -> Option<Frame> {
        let chroma = seq.chroma_format;
        let mut planes = Vec::with_capacity(chroma.num_planes());
        planes.push(PaddedPlane::new(seq.width, seq.height, FRAME_PAD)?);
        if chroma == ChromaFormat::Yuv420 {
            planes.push(PaddedPlane::new(seq.width / 2, seq.height / 2, FRAME_PAD / 2)?);
            planes.push(PaddedPlane::new(seq.width / 2, seq.height / 2, FRAME_PAD / 2)?);
        }

        let height_in_lcu = seq.height_in_lcu();
        let num_spu = seq.width_in_spu() * seq.height_in_spu();

        Some(Frame {
            width: seq.width,
            height: seq.height,
            chroma_format: chroma,
            bit_depth: seq.sample_bit_depth,
            planes: RwLock::new(planes),
            motion: RwLock::new(TemporalMotion {
                mv: vec![Mv::ZERO; num_spu],
                ref_idx: vec![INVALID_REF; num_spu],
            }),
            recon: Mutex::new(ReconProgress {
                decoded_line: -1,
                lcu_in_row: vec![0; height_in_lcu],
            }),
            recon_conds: (0..height_in_lcu).map(|_| Condvar::new()).collect(),
            parse: Mutex::new(ParseProgress { parsed_lcu_xy: -1 }),
            parse_cond: Condvar::new(),
            decode_error: AtomicBool::new(false),
            poc: 0,
            picture_type: PictureType::I,
            referenced: false,
            dist_refs: [1; MAX_REFS],
            dist_scale_refs: [1 << DIST_SCALE_BITS; MAX_REFS],
            pts: 0,
            dts: 0,
        })
    }

    /// Reset the per-frame progress before reuse. Requires exclusive ownership.
    pub fn reset_progress(&mut self) {
        let recon = self.recon.get_mut().unwrap();
        recon.decoded_line = -1;
        recon.lcu_in_row.fill(0);
        self.parse.get_mut().unwrap().parsed_lcu_xy = -1;
        self.decode_error.store(false, Ordering::Release);

        let motion = self.motion.get_mut().unwrap();
        motion.mv.fill(Mv::ZERO);
        motion.ref_idx.fill(INVALID_REF);
    }

    pub fn height_in_lcu(&self) -> usize {
        self.recon_conds.len()
    }

    /// Record one reconstructed LCU of row `lcu_y` and wake its waiters.
    pub fn add_reconstructed_lcu(&self, lcu_y: usize) {
        let mut recon = self.recon.lock().unwrap();
        recon.lcu_in_row[lcu_y] += 1;
        drop(recon);
        self.recon_conds[lcu_y].notify_all();
    }

    /// Mark row `lcu_y` final: filters ran and the margin is padded. `width_in_lcu + 1` is the
    /// threshold waiters test, the signaled value leaves headroom above it.
    pub fn signal_row_done(&self, lcu_y: usize, width_in_lcu: usize) {
        // The final signal of a row must not overtake the one of the row above.
        if lcu_y > 0 {
            self.wait_lcu_in_row(lcu_y - 1, width_in_lcu as i32 + 1);
        }

        let mut recon = self.recon.lock().unwrap();
        recon.decoded_line += 1;
        recon.lcu_in_row[lcu_y] = width_in_lcu as i32 + 3;
        drop(recon);

        self.recon_conds[lcu_y].notify_all();
    }

    /// Block until row `lcu_y` holds at least `count` reconstructed LCUs.
    pub fn wait_lcu_in_row(&self, lcu_y: usize, count: i32) {
        let mut recon = self.recon.lock().unwrap();
        while recon.lcu_in_row[lcu_y] < count {
            recon = self.recon_conds[lcu_y].wait(recon).unwrap();
        }
    }

    /// Block until LCU row `lcu_row` of this frame is final.
    pub fn wait_lcu_row(&self, lcu_row: i32, width_in_lcu: usize) {
        let line = lcu_row.clamp(0, self.height_in_lcu() as i32 - 1) as usize;
        let threshold = width_in_lcu as i32 + 1;

        let mut recon = self.recon.lock().unwrap();
        while recon.decoded_line < line as i32 && recon.lcu_in_row[line] < threshold {
            recon = self.recon_conds[line].wait(recon).unwrap();
        }
    }

    /// Block until the reconstruction of pixel row `max_y_in_pic` (plus the interpolation
    /// margin) is final.
    pub fn wait_pixel_row(&self, max_y_in_pic: i32, lcu_bits: u32, width_in_lcu: usize) {
        let line = (max_y_in_pic + 8) >> lcu_bits;
        self.wait_lcu_row(line, width_in_lcu);
    }

    /// Publish parse progress up to the LCU with raster index `lcu_xy`.
    pub fn signal_parsed(&self, lcu_xy: i32) {
        let mut parse = self.parse.lock().unwrap();
        parse.parsed_lcu_xy = lcu_xy;
        drop(parse);
        self.parse_cond.notify_all();
    }

    /// Block until the LCU with raster index `lcu_xy` has been entropy parsed.
    pub fn wait_parsed(&self, lcu_xy: i32) {
        let mut parse = self.parse.lock().unwrap();
        while parse.parsed_lcu_xy < lcu_xy {
            parse = self.parse_cond.wait(parse).unwrap();
        }
    }

    /// Force every pending row wait to resolve. Used when a frame aborts on a bitstream error so
    /// that frames referencing it never deadlock.
    pub fn broadcast_all_rows(&self, width_in_lcu: usize) {
        let mut recon = self.recon.lock().unwrap();
        let rows = recon.lcu_in_row.len();
        recon.decoded_line = rows as i32 - 1;
        for row in recon.lcu_in_row.iter_mut() {
            *row = width_in_lcu as i32 + 3;
        }
        drop(recon);

        for cond in &self.recon_conds {
            cond.notify_all();
        }

        self.signal_parsed(i32::MAX);
    }

    /// Snapshot the visible region into an output picture, shifting down to the output depth.
    pub fn to_picture(&self, output_bit_depth: u32) -> VideoPicture {
        let planes_guard = self.planes.read().unwrap();
        let shift = self.bit_depth - output_bit_depth;

        let planes = planes_guard
            .iter()
            .map(|src| {
                let mut out = Plane::new(src.width(), src.height(), src.width()).unwrap();
                for y in 0..src.height() {
                    let line = src.row_from(0, y as i32, src.width());
                    if shift == 0 {
                        out.row_mut(y).copy_from_slice(line);
                    }
                    else {
                        let add = 1 << (shift - 1);
                        for (dst, &s) in out.row_mut(y).iter_mut().zip(line) {
                            *dst = ((u32::from(s) + add) >> shift)
                                .min((1 << output_bit_depth) - 1)
                                as Sample;
                        }
                    }
                }
                out
            })
            .collect();

        VideoPicture {
            planes,
            chroma_format: self.chroma_format,
            bit_depth: output_bit_depth,
            poc: self.poc,
            picture_type: self.picture_type,
            decode_error: self.decode_error.load(Ordering::Acquire),
            pts: self.pts,
            dts: self.dts,
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
            output_bit_depth: 8,
            tools: ToolFlags::empty(),
        }
    }

    #[test]
    fn verify_padded_plane_margin() {
        let mut plane = PaddedPlane::new(16, 8, 4).unwrap();
        for y in 0..8 {
            for x in 0..16 {
                plane.set(x, y, (y * 16 + x) as Sample);
            }
        }
        plane.pad_rows(0, 8);

        assert_eq!(plane.get(-4, 0), plane.get(0, 0));
        assert_eq!(plane.get(19, 3), plane.get(15, 3));
        assert_eq!(plane.get(2, -3), plane.get(2, 0));
        assert_eq!(plane.get(2, 10), plane.get(2, 7));
        assert_eq!(plane.get(-1, -1), plane.get(0, 0));
    }

    #[test]
    fn verify_row_signal_monotonic() {
        let frame = Frame::new(&test_seq()).unwrap();

        frame.add_reconstructed_lcu(0);
        frame.signal_row_done(0, 1);

        // After the done broadcast the row count sits above the waiter threshold.
        frame.wait_lcu_in_row(0, 2);
        frame.wait_lcu_row(0, 1);
    }

    #[test]
    fn verify_error_broadcast_unblocks() {
        let frame = Frame::new(&test_seq()).unwrap();
        frame.broadcast_all_rows(1);

        // All waits resolve immediately.
        frame.wait_lcu_row(0, 1);
        frame.wait_parsed(100);
    }

    #[test]
    fn verify_cross_thread_row_wait() {
        use std::sync::Arc;

        let frame = Arc::new(Frame::new(&test_seq()).unwrap());
        let waiter = frame.clone();

        let handle = std::thread::spawn(move || {
            // Blocks until the row below is broadcast final.
            waiter.wait_lcu_row(0, 1);
            waiter.wait_lcu_in_row(0, 2);
        });

        frame.add_reconstructed_lcu(0);
        frame.signal_row_done(0, 1);
        handle.join().unwrap();
    }
}
