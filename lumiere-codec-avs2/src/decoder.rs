// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `decoder` module schedules frame decoding: the two-stage parse/reconstruct pipeline with
//! row-level dependency signaling, the frame pool and reference lists, the POC-ordered output
//! queue, and the public decoder type.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{mpsc, Arc, RwLock};
use std::thread::JoinHandle;

use log::{debug, error, warn};

use lumiere_core::codecs::{CodecInfo, VideoCodecParameters, VideoDecoder, VideoDecoderOptions};
use lumiere_core::errors::{decode_error, resource_error, Result};
use lumiere_core::formats::Packet;
use lumiere_core::video::{ChromaFormat, PictureType, VideoPicture};

use crate::aec::Aec;
use crate::alf::{self, AlfParam, ALF_MAX_NUM_COEF};
use crate::common::*;
use crate::cu::{self, LcuPayload, ParserCtx};
use crate::deblock;
use crate::frame::{Frame, PaddedPlane};
use crate::headers::{self, PictureHeader, SequenceHeader};
use crate::neighbor::FrameMaps;
use crate::recon::{self, ReconCtx, ReconScratch};
use crate::sao::{self, SaoParam, SaoRegionAvail, SAO_SHIFT_PIX};
use crate::transform::WeightedQuant;

/// Everything one frame's decode task owns.
struct FrameTask {
    seq: Arc<SequenceParams>,
    pic: PictureParams,
    data: Arc<[u8]>,
    /// Offset of the first slice startcode inside `data`.
    first_slice: usize,
    cur: Arc<Frame>,
    frefs: Vec<Arc<Frame>>,
    background: Option<Arc<Frame>>,
    wq: WeightedQuant,
    alf_params: [AlfParam; 3],
    /// Split the parse and reconstruction stages onto two threads.
    threaded: bool,
}

/// One slice of the picture data.
struct SliceStart {
    /// Byte offset of the slice header inside the packet.
    offset: usize,
    /// First LCU row of the slice, from the startcode value.
    lcu_row: usize,
}

fn scan_slices(data: &[u8], from: usize) -> Vec<SliceStart> {
    let mut slices = Vec::new();
    let mut pos = from;

    while let Some((offset, code)) = headers::next_start_code(data, pos) {
        if code <= headers::SC_SLICE_MAX {
            slices.push(SliceStart { offset, lcu_row: code as usize });
        }
        pos = offset;
    }

    slices
}

/// Per-row data the reconstruction side needs after the row's LCUs are done.
struct RowInfo {
    lcu_y: usize,
    sao: Vec<SaoParam>,
    alf: Vec<[bool; 3]>,
}

/// The reconstruction half of the pipeline: consumes LCU payloads in order, runs the row-staged
/// deblock -> SAO -> ALF -> pad -> signal sequence with a one-row lag.
struct ReconStage<'a> {
    ctx: ReconCtx<'a>,
    scratch: ReconScratch,
    cur: &'a Frame,
    /// Deblocked-but-unfiltered copy feeding SAO.
    sao_src: Vec<PaddedPlane>,
    /// SAO output copy feeding ALF.
    alf_src: Vec<PaddedPlane>,
    alf_region: Vec<u8>,
    alf_filters: [Vec<[i32; ALF_MAX_NUM_COEF]>; 3],
    alf_region_idx: [usize; alf::ALF_NUM_VARS],
    rows: VecDeque<RowInfo>,
    row_sao: Vec<SaoParam>,
    row_alf: Vec<[bool; 3]>,
    width_in_lcu: usize,
    height_in_lcu: usize,
    failed: bool,
}

impl<'a> ReconStage<'a> {
    fn new(ctx: ReconCtx<'a>, cur: &'a Frame, alf_params: &[AlfParam; 3]) -> ReconStage<'a> {
        let seq = ctx.seq;
        let mut planes = vec![PaddedPlane::new(seq.width, seq.height, FRAME_PAD).unwrap()];
        if seq.chroma_format == ChromaFormat::Yuv420 {
            for _ in 0..2 {
                planes.push(
                    PaddedPlane::new(seq.width / 2, seq.height / 2, FRAME_PAD / 2).unwrap(),
                );
            }
        }
        let sao_src = planes;
        let alf_src = {
            let mut planes = vec![PaddedPlane::new(seq.width, seq.height, FRAME_PAD).unwrap()];
            if seq.chroma_format == ChromaFormat::Yuv420 {
                for _ in 0..2 {
                    planes.push(
                        PaddedPlane::new(seq.width / 2, seq.height / 2, FRAME_PAD / 2).unwrap(),
                    );
                }
            }
            planes
        };

        let alf_filters = [
            alf_params[0].recon_coefficients(),
            alf_params[1].recon_coefficients(),
            alf_params[2].recon_coefficients(),
        ];

        ReconStage {
            scratch: ReconScratch::new(seq),
            cur,
            sao_src,
            alf_src,
            alf_region: alf::build_region_table(seq.width_in_lcu(), seq.height_in_lcu()),
            alf_filters,
            alf_region_idx: alf_params[0].region_coeff_idx(),
            rows: VecDeque::new(),
            row_sao: Vec::new(),
            row_alf: Vec::new(),
            width_in_lcu: seq.width_in_lcu(),
            height_in_lcu: seq.height_in_lcu(),
            ctx,
            failed: false,
        }
    }

    /// Reconstruct one LCU and run the per-LCU stages.
    fn process(&mut self, payload: &LcuPayload) {
        let seq = self.ctx.seq;

        if payload.lcu_x == 0 {
            recon::load_row_borders(&mut self.scratch, self.sao_src.len(), seq);
            self.row_sao.clear();
            self.row_alf.clear();
        }

        {
            let mut planes = self.cur.planes.write().unwrap();
            if recon::recon_lcu(&self.ctx, &mut self.scratch, &mut planes, payload).is_err() {
                self.failed = true;
                self.cur.decode_error.store(true, Ordering::Release);
            }

            recon::cache_ctu_borders(&mut self.scratch, &planes, seq, payload.lcu_x,
                payload.lcu_y);

            if seq.has_tool(ToolFlags::LOOP_FILTER) {
                let maps = self.ctx.maps.read().unwrap();
                deblock::deblock_lcu(&mut planes, &maps, seq, payload.lcu_x, payload.lcu_y);
            }
        }

        self.row_sao.push(payload.sao);
        self.row_alf.push(payload.alf_enable);
        self.cur.add_reconstructed_lcu(payload.lcu_y);

        if payload.lcu_x + 1 == self.width_in_lcu {
            let info = RowInfo {
                lcu_y: payload.lcu_y,
                sao: std::mem::take(&mut self.row_sao),
                alf: std::mem::take(&mut self.row_alf),
            };
            self.rows.push_back(info);
            self.end_of_row(payload.lcu_y);
        }
    }

    /// Row `lcu_y` finished reconstruction and deblock: filter and finalize the row above; on
    /// the last row, also itself.
    fn end_of_row(&mut self, lcu_y: usize) {
        if lcu_y > 0 {
            self.filter_and_signal(lcu_y - 1);
        }
        if lcu_y + 1 == self.height_in_lcu {
            self.filter_and_signal(lcu_y);
        }
    }

    fn row_info(&self, lcu_y: usize) -> Option<&RowInfo> {
        self.rows.iter().find(|row| row.lcu_y == lcu_y)
    }

    /// Run SAO and ALF over a finished row, pad its margins, and broadcast it final.
    fn filter_and_signal(&mut self, lcu_y: usize) {
        let seq = self.ctx.seq;

        if self.row_info(lcu_y).is_some() {
            if self.ctx.pic.sao_enable.iter().any(|&e| e) {
                self.sao_row(lcu_y);
            }
            if self.ctx.pic.alf_enable.iter().any(|&e| e) {
                self.alf_row(lcu_y);
            }
        }

        // Pad the final pixel band of this row.
        {
            let mut planes = self.cur.planes.write().unwrap();
            let last = lcu_y + 1 == self.height_in_lcu;
            for (comp, plane) in planes.iter_mut().enumerate() {
                let shift = usize::from(comp > 0);
                let lcu = seq.lcu_size() >> shift;
                let pad_lag = 8 >> shift;
                let y0 = (lcu_y * lcu).saturating_sub(pad_lag);
                let y1 = if last { plane.height() } else { ((lcu_y + 1) * lcu).saturating_sub(pad_lag) };
                plane.pad_rows(y0, y1);
            }
        }

        self.cur.signal_row_done(lcu_y, self.width_in_lcu);

        // Drop stale row bookkeeping.
        while self.rows.len() > 2 {
            self.rows.pop_front();
        }
    }

    /// The SAO filter region of one CTU, shifted up-left by the filter lag.
    fn sao_region(&self, comp: usize, lcu_x: usize, lcu_y: usize)
        -> (SaoRegionAvail, i32, i32, i32, i32) {
        let seq = self.ctx.seq;
        let shift = usize::from(comp > 0);
        let lcu = seq.lcu_size() >> shift;
        let plane_w = (seq.width >> shift) as i32;
        let plane_h = (seq.height >> shift) as i32;
        let lag = SAO_SHIFT_PIX as i32;

        let avail = SaoRegionAvail {
            left: lcu_x != 0,
            top: lcu_y != 0,
            right: lcu_x + 1 < self.width_in_lcu,
            down: lcu_y + 1 < self.height_in_lcu,
            top_left: lcu_x != 0 && lcu_y != 0,
            top_right: lcu_y != 0 && lcu_x + 1 < self.width_in_lcu,
            down_left: lcu_x != 0 && lcu_y + 1 < self.height_in_lcu,
            down_right: lcu_x + 1 < self.width_in_lcu && lcu_y + 1 < self.height_in_lcu,
        };

        let mut x0 = (lcu_x * lcu) as i32;
        let mut y0 = (lcu_y * lcu) as i32;
        let mut w = (lcu as i32).min(plane_w - x0);
        let mut h = (lcu as i32).min(plane_h - y0);

        if !avail.right {
            w += lag;
        }
        if !avail.down {
            h += lag;
        }
        if avail.left {
            x0 -= lag;
        }
        else {
            w -= lag;
        }
        if avail.top {
            y0 -= lag;
        }
        else {
            h -= lag;
        }

        let w = w.min(plane_w - x0);
        let h = h.min(plane_h - y0);

        (avail, x0, y0, w, h)
    }

    fn sao_row(&mut self, lcu_y: usize) {
        let seq = self.ctx.seq;
        let Some(row) = self.rows.iter().find(|row| row.lcu_y == lcu_y) else {
            return;
        };

        let mut planes = self.cur.planes.write().unwrap();

        // Copy the shifted band so classification reads pre-offset samples.
        for (comp, plane) in planes.iter().enumerate() {
            let shift = usize::from(comp > 0);
            let lcu = seq.lcu_size() >> shift;
            let y0 = (lcu_y * lcu) as i32 - 8;
            let h = lcu + 16;
            let x0 = -8;
            let w = (seq.width >> shift) + 16;
            let y0 = y0.max(-(SAO_SHIFT_PIX as i32));
            let h = h.min(plane.height() + SAO_SHIFT_PIX - y0.max(0) as usize);
            self.sao_src[comp].copy_rect_from(plane, x0, y0, w, h);
        }

        for lcu_x in 0..self.width_in_lcu {
            let param = &row.sao[lcu_x.min(row.sao.len() - 1)];

            for comp in 0..planes.len() {
                if !self.ctx.pic.sao_enable[comp] {
                    continue;
                }
                if param.planes[comp].mode == sao::SaoMode::Off {
                    continue;
                }

                let (avail, x0, y0, w, h) = self.sao_region(comp, lcu_x, lcu_y);
                sao::sao_block(
                    &mut planes[comp],
                    &self.sao_src[comp],
                    &param.planes[comp],
                    x0,
                    y0,
                    w,
                    h,
                    seq.sample_bit_depth,
                    &avail,
                );
            }
        }
    }

    fn alf_row(&mut self, lcu_y: usize) {
        let seq = self.ctx.seq;
        let Some(row) = self.rows.iter().find(|row| row.lcu_y == lcu_y) else {
            return;
        };

        let mut planes = self.cur.planes.write().unwrap();

        for (comp, plane) in planes.iter().enumerate() {
            let shift = usize::from(comp > 0);
            let lcu = seq.lcu_size() >> shift;
            let y0 = ((lcu_y * lcu) as i32 - 8).max(-8);
            let w = (seq.width >> shift) + 16;
            let h = lcu + 16;
            let h = h.min(plane.height() + 8 - y0.max(0) as usize);
            self.alf_src[comp].copy_rect_from(plane, -8, y0, w, h);
        }

        for lcu_x in 0..self.width_in_lcu {
            let enable = row.alf[lcu_x.min(row.alf.len() - 1)];
            let lcu_xy = lcu_y * self.width_in_lcu + lcu_x;
            let region = self.alf_region[lcu_xy] as usize;

            let top_avail = lcu_y > 0;
            let down_avail = lcu_y + 1 < self.height_in_lcu;

            for comp in 0..planes.len() {
                if !enable[comp] || !self.ctx.pic.alf_enable[comp] {
                    continue;
                }

                let filters = &self.alf_filters[comp];
                let taps = if comp == 0 {
                    &filters[self.alf_region_idx[region].min(filters.len() - 1)]
                }
                else {
                    &filters[0]
                };

                let shift = usize::from(comp > 0);
                let lcu = seq.lcu_size() >> shift;
                let pix_x = (lcu_x * lcu) as i32;
                let pix_y = (lcu_y * lcu) as i32;
                let w = (lcu).min((seq.width >> shift) - lcu_x * lcu) as i32;
                let h = (lcu).min((seq.height >> shift) - lcu_y * lcu) as i32;

                alf::filter_block(
                    &mut planes[comp],
                    &self.alf_src[comp],
                    pix_x,
                    pix_y,
                    w,
                    h,
                    taps,
                    top_avail,
                    down_avail,
                    seq.sample_bit_depth,
                );
            }
        }
    }
}

/// The parse half of the pipeline: slice management, per-LCU entropy decoding, temporal-MV
/// snapshots, and parse-progress signaling.
struct ParseStage<'a> {
    ctx: ParserCtx<'a>,
    seq: &'a SequenceParams,
    cur: &'a Frame,
    data: &'a [u8],
    slices: Vec<SliceStart>,
    next_slice: usize,
    slice_pending: bool,
    aec: Option<Aec<'a>>,
    sao_row_above: Vec<SaoParam>,
    sao_left: Option<SaoParam>,
    width_in_lcu: usize,
}

impl<'a> ParseStage<'a> {
    fn new(ctx: ParserCtx<'a>, seq: &'a SequenceParams, cur: &'a Frame, data: &'a [u8],
        first_slice: usize) -> ParseStage<'a> {
        ParseStage {
            ctx,
            seq,
            cur,
            data,
            slices: scan_slices(data, first_slice.saturating_sub(4)),
            next_slice: 0,
            slice_pending: true,
            aec: None,
            sao_row_above: vec![SaoParam::default(); seq.width_in_lcu()],
            sao_left: None,
            width_in_lcu: seq.width_in_lcu(),
        }
    }

    /// Open the next slice if one is pending: parse its header and restart the AEC.
    fn maybe_begin_slice(&mut self, lcu_y: usize) -> Result<()> {
        if !self.slice_pending || self.next_slice >= self.slices.len() {
            self.slice_pending = false;
            return Ok(());
        }

        let slice = &self.slices[self.next_slice];
        self.next_slice += 1;
        self.slice_pending = false;
        debug!("avs2: slice {} starts at lcu row {}", self.next_slice, slice.lcu_row);

        let mut bs = lumiere_core::io::BitReader::new(self.data);
        bs.seek_to_bit(slice.offset * 8);

        // Slice header: a fixed-QP flag and the slice QP.
        let _fixed_slice_qp = bs.read_flag();
        let slice_qp = bs.read_bits(7) as i32;
        bs.align_to_byte();

        if bs.has_error() {
            return decode_error("avs2: truncated slice header");
        }

        self.ctx.begin_slice(slice_qp);
        self.sao_left = None;

        // The intra-mode predictors above a new slice reset.
        {
            let mut maps = self.ctx.maps.write().unwrap();
            let spu_row = lcu_y << (self.seq.lcu_bits - MIN_PU_SIZE_IN_BIT);
            maps.reset_ipred_row(spu_row.saturating_sub(1));
        }

        self.aec = Some(Aec::start(self.data, bs.bit_pos() / 8));
        Ok(())
    }

    /// Entropy-parse one LCU.
    fn parse_one(&mut self, lcu_x: usize, lcu_y: usize) -> Result<LcuPayload> {
        self.maybe_begin_slice(lcu_y)?;

        let Some(mut aec) = self.aec.take() else {
            return decode_error("avs2: no slice data for lcu");
        };

        cu::mark_lcu_slice(&self.ctx, lcu_x, lcu_y);

        // LCU-level filter parameters come first.
        let sao = if self.ctx.pic.sao_enable.iter().any(|&e| e) {
            let left = self.sao_left.clone();
            let up = if lcu_y > 0 { Some(self.sao_row_above[lcu_x].clone()) } else { None };
            cu::parse_lcu_sao(&mut self.ctx, &mut aec, lcu_x, lcu_y, left.as_ref(), up.as_ref())
        }
        else {
            SaoParam::default()
        };

        let alf_enable = if self.ctx.pic.alf_enable.iter().any(|&e| e) {
            cu::parse_lcu_alf(&mut self.ctx, &mut aec)
        }
        else {
            [false; 3]
        };

        let payload = cu::parse_lcu(&mut self.ctx, &mut aec, lcu_x, lcu_y, sao, alf_enable);

        let payload = match payload {
            Ok(payload) => payload,
            Err(()) => {
                self.aec = Some(aec);
                return decode_error("avs2: entropy decoding error");
            }
        };

        self.sao_left =
            if lcu_x + 1 < self.width_in_lcu { Some(payload.sao.clone()) } else { None };
        self.sao_row_above[lcu_x] = payload.sao.clone();

        // The terminating bin marks the end of the slice.
        if aec.startcode_follows(true) {
            self.slice_pending = true;
        }
        if aec.has_error() {
            self.aec = Some(aec);
            return decode_error("avs2: entropy decoding error");
        }

        self.aec = Some(aec);
        Ok(payload)
    }

    /// Row-level work after the last LCU of a row parsed.
    fn end_of_row(&mut self, lcu_y: usize) {
        if self.ctx.pic.referenced && self.ctx.pic.picture_type != PictureType::I {
            let maps = self.ctx.maps.read().unwrap();
            cu::save_mv_ref_info(&maps, self.cur, self.seq, lcu_y);
        }
    }
}

/// Decode one frame, either fused on the calling thread or split into a parse thread and a
/// reconstruction worker connected by a bounded channel.
fn decode_frame(task: FrameTask) {
    let seq = task.seq.clone();
    let maps = RwLock::new(FrameMaps::new(&seq));
    let width_in_lcu = seq.width_in_lcu();
    let height_in_lcu = seq.height_in_lcu();

    let parser_ctx = ParserCtx::new(&seq, &task.pic, &maps, &task.frefs,
        task.background.is_some());
    let mut parse = ParseStage::new(parser_ctx, &seq, &task.cur, &task.data, task.first_slice);

    let recon_ctx = ReconCtx {
        seq: &seq,
        pic: &task.pic,
        maps: &maps,
        frefs: &task.frefs,
        background: task.background.as_ref(),
        wq: &task.wq,
    };
    let mut recon = ReconStage::new(recon_ctx, &task.cur, &task.alf_params);

    let fref0 = task.frefs.first();
    let mut failed = false;

    if task.threaded {
        // Mode 2: parse thread feeding a reconstruction worker. The channel is bounded to about
        // two LCU rows so parse cannot run arbitrarily ahead.
        let (tx, rx): (SyncSender<LcuPayload>, Receiver<LcuPayload>) =
            mpsc::sync_channel((2 * width_in_lcu).max(2));

        std::thread::scope(|scope| {
            let cur = &task.cur;
            let parse_stage = &mut parse;
            let frefs = &task.frefs;

            scope.spawn(move || {
                let mut parse_failed = false;

                'rows: for lcu_y in 0..height_in_lcu {
                    // Temporal MVP reads the collocated motion during parse.
                    if let Some(fref) = frefs.first() {
                        fref.wait_lcu_row(lcu_y as i32, width_in_lcu);
                    }

                    for lcu_x in 0..width_in_lcu {
                        match parse_stage.parse_one(lcu_x, lcu_y) {
                            Ok(payload) => {
                                let lcu_xy = (lcu_y * width_in_lcu + lcu_x) as i32;
                                if tx.send(payload).is_err() {
                                    parse_failed = true;
                                    break 'rows;
                                }
                                cur.signal_parsed(lcu_xy);
                            }
                            Err(err) => {
                                error!("avs2: parse failed at lcu ({}, {}): {}", lcu_x, lcu_y,
                                    err);
                                parse_failed = true;
                                break 'rows;
                            }
                        }
                    }

                    parse_stage.end_of_row(lcu_y);
                }

                if parse_failed {
                    cur.decode_error.store(true, Ordering::Release);
                }
                cur.signal_parsed(i32::MAX);
                // Dropping the sender ends the reconstruction loop.
            });

            for payload in rx.iter() {
                recon.process(&payload);
            }
        });
    }
    else {
        // Mode 1: fused single-thread pipeline.
        'rows: for lcu_y in 0..height_in_lcu {
            if let Some(fref) = fref0 {
                fref.wait_lcu_row(lcu_y as i32, width_in_lcu);
            }

            for lcu_x in 0..width_in_lcu {
                match parse.parse_one(lcu_x, lcu_y) {
                    Ok(payload) => {
                        task.cur.signal_parsed((lcu_y * width_in_lcu + lcu_x) as i32);
                        recon.process(&payload);
                    }
                    Err(err) => {
                        error!("avs2: parse failed at lcu ({}, {}): {}", lcu_x, lcu_y, err);
                        failed = true;
                        break 'rows;
                    }
                }
            }

            parse.end_of_row(lcu_y);
        }
    }

    if failed || recon.failed || task.cur.decode_error.load(Ordering::Acquire) {
        task.cur.decode_error.store(true, Ordering::Release);
        // Unblock every waiter so dependent frames finish; the frame is still emitted to
        // preserve output ordering.
        task.cur.broadcast_all_rows(width_in_lcu);
    }
}

/// A decoded frame queued for in-order emission.
struct PendingPicture {
    frame: Arc<Frame>,
}

/// State that exists from the first sequence header on.
struct SequenceState {
    seq: Arc<SequenceParams>,
    seq_wq_matrix: [[i32; 64]; 2],
    /// Recycled frames.
    pool: Vec<Arc<Frame>>,
    /// Reference frames, most recently decoded first.
    dpb: Vec<Arc<Frame>>,
    background: Option<Arc<Frame>>,
    in_flight: VecDeque<(JoinHandle<()>, Arc<Frame>)>,
    pending: Vec<PendingPicture>,
    last_output_poc: Option<i32>,
}

impl SequenceState {
    fn new(header: &SequenceHeader) -> SequenceState {
        SequenceState {
            seq: Arc::new(header.params.clone()),
            seq_wq_matrix: header.seq_wq_matrix,
            pool: Vec::new(),
            dpb: Vec::new(),
            background: None,
            in_flight: VecDeque::new(),
            pending: Vec::new(),
            last_output_poc: None,
        }
    }

    /// Take a free frame from the pool or allocate a new one.
    fn acquire_frame(&mut self) -> Result<Arc<Frame>> {
        for i in 0..self.pool.len() {
            if Arc::strong_count(&self.pool[i]) == 1 {
                let mut frame = self.pool.swap_remove(i);
                Arc::get_mut(&mut frame).unwrap().reset_progress();
                return Ok(frame);
            }
        }

        if self.pool.len() + self.dpb.len() + self.in_flight.len() > 64 {
            return resource_error("avs2: frame pool exhausted");
        }

        match Frame::new(&self.seq) {
            Some(frame) => Ok(Arc::new(frame)),
            None => resource_error("avs2: frame allocation"),
        }
    }

    /// Pick the reference list of a picture by its header distances.
    fn select_references(&self, pic: &PictureParams) -> Result<Vec<Arc<Frame>>> {
        let mut refs = Vec::with_capacity(pic.num_references);

        for i in 0..pic.num_references {
            let want = pic.dist_refs[i];
            let found = self
                .dpb
                .iter()
                .find(|f| distance_index(pic.poc - f.poc) == want)
                .or_else(|| self.dpb.get(i));

            match found {
                Some(frame) => refs.push(frame.clone()),
                None => return decode_error("avs2: reference frame not available"),
            }
        }

        Ok(refs)
    }

    /// Join the oldest in-flight frame and queue it for output.
    fn reap_one(&mut self) {
        if let Some((handle, frame)) = self.in_flight.pop_front() {
            if handle.join().is_err() {
                error!("avs2: frame decode task panicked");
                frame.decode_error.store(true, Ordering::Release);
                frame.broadcast_all_rows(self.seq.width_in_lcu());
            }
            self.pending.push(PendingPicture { frame });
        }
    }

    fn reap_all(&mut self) {
        while !self.in_flight.is_empty() {
            self.reap_one();
        }
    }

    /// Emit the lowest-POC pending picture if the reorder queue is deep enough (or forced).
    fn emit(&mut self, max_depth: usize, force: bool) -> Option<VideoPicture> {
        loop {
            if self.pending.is_empty() || (!force && self.pending.len() <= max_depth) {
                return None;
            }

            let min_idx = self
                .pending
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| p.frame.poc)
                .map(|(i, _)| i)?;

            let entry = self.pending.swap_remove(min_idx);

            if let Some(last) = self.last_output_poc {
                if entry.frame.poc <= last {
                    warn!("avs2: dropping out-of-order POC {} (last {})", entry.frame.poc, last);
                    self.pool.push(entry.frame);
                    continue;
                }
            }

            self.last_output_poc = Some(entry.frame.poc);
            let picture = entry.frame.to_picture(self.seq.output_bit_depth);
            self.pool.push(entry.frame);
            return Some(picture);
        }
    }
}

/// AVS2 video decoder.
pub struct Avs2Decoder {
    params: VideoCodecParameters,
    opts: VideoDecoderOptions,
    state: Option<SequenceState>,
}

impl Avs2Decoder {
    pub fn try_new(params: &VideoCodecParameters, opts: &VideoDecoderOptions)
        -> Result<Avs2Decoder> {
        Ok(Avs2Decoder { params: params.clone(), opts: *opts, state: None })
    }

    /// Decode one access unit: optional sequence header, one picture header, slice data.
    fn decode_access_unit(&mut self, packet: &Packet) -> Result<Option<VideoPicture>> {
        let data = packet.buf();
        let mut pos = 0;
        let mut picture: Option<(PictureHeader, usize)> = None;

        while let Some((offset, code)) = headers::next_start_code(data, pos) {
            pos = offset;

            match code {
                headers::SC_SEQUENCE_HEADER => {
                    let mut bs = lumiere_core::io::BitReader::new(&data[offset..]);
                    let header = headers::parse_sequence_header(&mut bs)?;

                    let reinit = match &self.state {
                        Some(state) => *state.seq != header.params,
                        None => true,
                    };
                    if reinit {
                        if let Some(state) = &mut self.state {
                            state.reap_all();
                        }
                        self.state = Some(SequenceState::new(&header));
                    }
                }
                headers::SC_INTRA_PICTURE | headers::SC_INTER_PICTURE => {
                    let state = match &self.state {
                        Some(state) => state,
                        None => return decode_error("avs2: picture before sequence header"),
                    };

                    let mut bs = lumiere_core::io::BitReader::new(&data[offset..]);
                    let header = headers::parse_picture_header(
                        &mut bs,
                        &state.seq,
                        code == headers::SC_INTRA_PICTURE,
                    )?;

                    // Slice data follows from the first slice startcode after this header.
                    picture = Some((header, offset));
                    break;
                }
                headers::SC_SEQUENCE_END | headers::SC_USER_DATA | headers::SC_EXTENSION => (),
                _ => (),
            }
        }

        let Some((header, header_offset)) = picture else {
            // Header-only packet; nothing to decode yet.
            return Ok(None);
        };

        let state = self.state.as_mut().unwrap();
        let frefs = state.select_references(&header.params)?;

        // Bound the number of concurrently decoding frames to the worker budget.
        let max_in_flight = self.opts.num_threads.max(1);
        while state.in_flight.len() >= max_in_flight {
            state.reap_one();
        }

        let mut frame = state.acquire_frame()?;
        {
            let f = Arc::get_mut(&mut frame).unwrap();
            f.poc = header.params.poc;
            f.picture_type = header.params.picture_type;
            f.referenced = header.params.referenced;
            f.dist_refs = header.params.dist_refs;
            f.dist_scale_refs = header.params.dist_scale_refs;
            f.pts = packet.pts;
            f.dts = packet.dts;
        }

        let mut wq = WeightedQuant {
            seq_wq_matrix: state.seq_wq_matrix,
            pic_user_wq_matrix: header.pic_user_wq_matrix,
            ..Default::default()
        };
        if state.seq.has_tool(ToolFlags::WEIGHTED_QUANT) {
            wq.init_frame_quant_param(&header.params, &header.wq_user_params);
            wq.update_frame_matrix(&header.params);
        }

        let task = FrameTask {
            seq: state.seq.clone(),
            pic: header.params.clone(),
            data: Arc::from(data),
            first_slice: header_offset,
            cur: frame.clone(),
            frefs,
            background: state.background.clone(),
            wq,
            alf_params: header.alf_params,
            threaded: self.opts.num_threads > 1,
        };

        // Update the reference lists before launching: later pictures may reference this one
        // row by row while it still decodes.
        if header.params.referenced {
            state.dpb.insert(0, frame.clone());
            let max_refs = self.opts.max_references.max(MAX_REFS);
            state.dpb.truncate(max_refs);
        }
        if header.params.picture_type == PictureType::G {
            state.background = Some(frame.clone());
        }

        debug!("avs2: decoding poc {} type {:?}", header.params.poc,
            header.params.picture_type);

        if self.opts.num_threads == 0 {
            decode_frame(task);
            state.pending.push(PendingPicture { frame });
        }
        else {
            let handle = std::thread::spawn(move || decode_frame(task));
            state.in_flight.push_back((handle, frame));
        }

        Ok(state.emit(self.opts.max_references, false))
    }
}

static CODEC_INFO: CodecInfo = CodecInfo {
    short_name: "avs2",
    long_name: "Audio Video Standard 2 (IEEE 1857.4)",
};

impl VideoDecoder for Avs2Decoder {
    fn reset(&mut self) {
        if let Some(state) = &mut self.state {
            state.reap_all();
            state.dpb.clear();
            state.background = None;
            state.pending.clear();
            state.last_output_poc = None;
        }
    }

    fn codec_info(&self) -> &CodecInfo {
        &CODEC_INFO
    }

    fn codec_params(&self) -> &VideoCodecParameters {
        &self.params
    }

    fn decode(&mut self, packet: &Packet) -> Result<Option<VideoPicture>> {
        self.decode_access_unit(packet)
    }

    fn flush(&mut self) -> Result<Vec<VideoPicture>> {
        let Some(state) = &mut self.state else {
            return Ok(Vec::new());
        };

        state.reap_all();

        let mut pictures = Vec::new();
        while let Some(picture) = state.emit(0, true) {
            pictures.push(picture);
        }
        Ok(pictures)
    }
}

impl Drop for Avs2Decoder {
    fn drop(&mut self) {
        if let Some(state) = &mut self.state {
            state.reap_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_seq() -> SequenceParams {
        SequenceParams {
            width: 64,
            height: 64,
            lcu_bits: 6,
            chroma_format: ChromaFormat::Yuv420,
            sample_bit_depth: 8,
            output_bit_depth: 8,
            tools: ToolFlags::LOOP_FILTER,
        }
    }

    #[test]
    fn verify_slice_scan_finds_slices() {
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&[0x00, 0x00, 0x01, 0x00, 0xaa]);
        data.extend_from_slice(&[0x00, 0x00, 0x01, 0x03, 0xbb]);
        data.extend_from_slice(&[0x00, 0x00, 0x01, 0xb1]);

        let slices = scan_slices(&data, 0);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].lcu_row, 0);
        assert_eq!(slices[1].lcu_row, 3);
    }

    #[test]
    fn verify_pool_recycles_free_frames() {
        let header = SequenceHeader {
            params: test_seq(),
            profile: 0x20,
            level: 0x42,
            progressive: true,
            seq_wq_matrix: [[128; 64]; 2],
        };
        let mut state = SequenceState::new(&header);

        let first = state.acquire_frame().unwrap();
        state.pool.push(first.clone());
        drop(first);

        // The released frame comes back instead of a fresh allocation.
        assert_eq!(state.pool.len(), 1);
        let second = state.acquire_frame().unwrap();
        assert_eq!(state.pool.len(), 0);
        drop(second);
    }

    #[test]
    fn verify_emit_orders_by_poc() {
        let header = SequenceHeader {
            params: test_seq(),
            profile: 0x20,
            level: 0x42,
            progressive: true,
            seq_wq_matrix: [[128; 64]; 2],
        };
        let mut state = SequenceState::new(&header);

        for poc in [4, 2, 6] {
            let mut frame = state.acquire_frame().unwrap();
            Arc::get_mut(&mut frame).unwrap().poc = poc;
            state.pending.push(PendingPicture { frame });
        }

        let mut emitted = Vec::new();
        while let Some(picture) = state.emit(0, true) {
            emitted.push(picture.poc);
        }

        assert_eq!(emitted, vec![2, 4, 6]);
    }

    #[test]
    fn verify_emit_respects_reorder_depth() {
        let header = SequenceHeader {
            params: test_seq(),
            profile: 0x20,
            level: 0x42,
            progressive: true,
            seq_wq_matrix: [[128; 64]; 2],
        };
        let mut state = SequenceState::new(&header);

        let mut frame = state.acquire_frame().unwrap();
        Arc::get_mut(&mut frame).unwrap().poc = 1;
        state.pending.push(PendingPicture { frame });

        // Not enough depth yet.
        assert!(state.emit(2, false).is_none());
        assert!(state.emit(0, true).is_some());
    }
}
