// Lumiere
// Copyright (c) 2025-2026 The Project Lumiere Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `headers` module reads the sequence and picture headers that configure the core before a
//! frame decodes. The surrounding NAL framing (startcode scan, emulation prevention) belongs to
//! the demuxer; this module consumes already-framed header payloads.

use log::debug;

use lumiere_core::errors::{decode_error, unsupported_error, Result};
use lumiere_core::io::BitReader;
use lumiere_core::video::{ChromaFormat, PictureType};

use crate::alf::AlfParam;
use crate::common::*;
use crate::transform::wq_default_matrix;

/// Startcode values of the unit types the decoder consumes.
pub const SC_SEQUENCE_HEADER: u8 = 0xb0;
pub const SC_SEQUENCE_END: u8 = 0xb1;
pub const SC_USER_DATA: u8 = 0xb2;
pub const SC_INTRA_PICTURE: u8 = 0xb3;
pub const SC_EXTENSION: u8 = 0xb5;
pub const SC_INTER_PICTURE: u8 = 0xb6;
pub const SC_SLICE_MAX: u8 = 0x8e;

/// Sequence-header payload beyond the core [`SequenceParams`].
#[derive(Clone, Debug)]
pub struct SequenceHeader {
    pub params: SequenceParams,
    pub profile: u8,
    pub level: u8,
    pub progressive: bool,
    /// Sequence weighting matrices (4x4 and 8x8) when weighted quant is enabled.
    pub seq_wq_matrix: [[i32; 64]; 2],
}

/// Parse a sequence header (startcode 0xB0), positioned after the startcode.
pub fn parse_sequence_header(bs: &mut BitReader<'_>) -> Result<SequenceHeader> {
    let profile = bs.read_bits(8) as u8;
    let level = bs.read_bits(8) as u8;
    let progressive = bs.read_flag();
    let field_coded = bs.read_flag();

    let width = bs.read_bits(14) as usize;
    let height = bs.read_bits(14) as usize;

    let chroma_format = match bs.read_bits(2) {
        0 => ChromaFormat::Monochrome,
        1 => ChromaFormat::Yuv420,
        _ => return unsupported_error("avs2: chroma format"),
    };

    let sample_precision = bs.read_bits(3);
    let encoding_precision = if profile == 0x22 { bs.read_bits(3) } else { sample_precision };

    let output_bit_depth = match sample_precision {
        1 => 8,
        2 => 10,
        _ => return unsupported_error("avs2: sample precision"),
    };
    let sample_bit_depth = match encoding_precision {
        1 => 8,
        2 => 10,
        _ => return unsupported_error("avs2: encoding precision"),
    };

    let _aspect_ratio = bs.read_bits(4);
    let _frame_rate_code = bs.read_bits(4);
    let _bit_rate_lower = bs.read_bits(18);
    let _marker = bs.read_bit();
    let _bit_rate_upper = bs.read_bits(12);
    let _low_delay = bs.read_flag();
    let _marker = bs.read_bit();
    let _bbv_buffer_size = bs.read_bits(18);

    let lcu_bits = bs.read_bits(3);
    if lcu_bits < 4 || lcu_bits > MAX_CU_SIZE_IN_BIT {
        return decode_error("avs2: lcu size out of range");
    }

    let mut tools = ToolFlags::LOOP_FILTER;
    let mut seq_wq_matrix = [[128i32; 64]; 2];

    if bs.read_flag() {
        tools |= ToolFlags::WEIGHTED_QUANT;
        // load_seq_weight_quant_data_flag selects explicit matrices over the defaults.
        if bs.read_flag() {
            for size_id in 0..2 {
                let count = if size_id == 0 { 16 } else { 64 };
                for i in 0..count {
                    seq_wq_matrix[size_id][i] = bs.read_ue() as i32;
                }
            }
        }
        else {
            for size_id in 0..2 {
                let count = if size_id == 0 { 16 } else { 64 };
                seq_wq_matrix[size_id][..count]
                    .copy_from_slice(&wq_default_matrix(size_id)[..count]);
            }
        }
    }

    let _scene_picture_disable = bs.read_flag();

    let mut flag = |bit: ToolFlags, on: bool, tools: &mut ToolFlags| {
        if on {
            *tools |= bit;
        }
    };

    flag(ToolFlags::MHP_SKIP, bs.read_flag(), &mut tools);
    flag(ToolFlags::DHP, bs.read_flag(), &mut tools);
    flag(ToolFlags::WSM, bs.read_flag(), &mut tools);
    flag(ToolFlags::AMP, bs.read_flag(), &mut tools);
    flag(ToolFlags::NSQT, bs.read_flag(), &mut tools);
    flag(ToolFlags::SDIP, bs.read_flag(), &mut tools);
    flag(ToolFlags::SECONDARY_TRANSFORM, bs.read_flag(), &mut tools);
    flag(ToolFlags::SAO, bs.read_flag(), &mut tools);
    flag(ToolFlags::ALF, bs.read_flag(), &mut tools);
    flag(ToolFlags::PMVR, bs.read_flag(), &mut tools);
    flag(ToolFlags::CROSS_LOOP_FILTER, bs.read_flag(), &mut tools);
    flag(ToolFlags::DMH, true, &mut tools);

    if field_coded && !progressive {
        tools |= ToolFlags::FIELD_CODING;
    }

    if bs.has_error() {
        return decode_error("avs2: truncated sequence header");
    }

    if width == 0 || height == 0 || width & 7 != 0 || height & 7 != 0 {
        return decode_error("avs2: picture dimensions");
    }

    debug!(
        "avs2: sequence {}x{} {:?} lcu {} bit depth {}/{}",
        width, height, chroma_format, 1 << lcu_bits, sample_bit_depth, output_bit_depth
    );

    Ok(SequenceHeader {
        params: SequenceParams {
            width,
            height,
            lcu_bits,
            chroma_format,
            sample_bit_depth,
            output_bit_depth,
            tools,
        },
        profile,
        level,
        progressive,
        seq_wq_matrix,
    })
}

/// Picture-header payload.
#[derive(Clone, Debug)]
pub struct PictureHeader {
    pub params: PictureParams,
    /// User weighting parameter vectors when carried by the picture.
    pub wq_user_params: [[i32; 6]; 2],
    /// Picture-level user weighting matrices.
    pub pic_user_wq_matrix: [[i32; 64]; 2],
    /// ALF coefficient payloads per component.
    pub alf_params: [AlfParam; 3],
}

fn parse_weighted_quant(bs: &mut BitReader<'_>, pic: &mut PictureParams,
    header: &mut PictureHeader) -> Result<()> {
    // pic_weight_quant_enable
    if !bs.read_flag() {
        return Ok(());
    }

    pic.wq_data_index = bs.read_bits(2) as u8;
    if pic.wq_data_index == 1 {
        let _reserved = bs.read_bit();
        pic.wq_param = bs.read_bits(2) as u8;
        pic.wq_model = bs.read_bits(2) as u8;

        if pic.wq_param != 0 {
            let which = if pic.wq_param == 1 { 1 } else { 0 };
            for i in 0..6 {
                header.wq_user_params[which][i] =
                    bs.read_se() + crate::transform::WQ_PARAM_DEFAULT[which][i];
            }
        }
    }
    else if pic.wq_data_index == 2 {
        for size_id in 0..2 {
            let count = if size_id == 0 { 16 } else { 64 };
            for i in 0..count {
                header.pic_user_wq_matrix[size_id][i] = bs.read_ue() as i32;
            }
        }
    }

    Ok(())
}

fn parse_alf_params(bs: &mut BitReader<'_>, pic: &mut PictureParams,
    header: &mut PictureHeader) -> Result<()> {
    pic.alf_enable[0] = bs.read_flag();
    pic.alf_enable[1] = bs.read_flag();
    pic.alf_enable[2] = bs.read_flag();

    if pic.alf_enable.iter().any(|&e| e) {
        if pic.alf_enable[0] {
            header.alf_params[0].read_luma(bs)?;
        }
        if pic.alf_enable[1] {
            header.alf_params[1].read_chroma(bs)?;
        }
        if pic.alf_enable[2] {
            header.alf_params[2].read_chroma(bs)?;
        }
    }

    Ok(())
}

/// Parse an intra (0xB3) or inter (0xB6) picture header, positioned after the startcode.
pub fn parse_picture_header(
    bs: &mut BitReader<'_>,
    seq: &SequenceParams,
    intra: bool,
) -> Result<PictureHeader> {
    let mut pic = PictureParams::default();
    let mut header = PictureHeader {
        params: PictureParams::default(),
        wq_user_params: crate::transform::WQ_PARAM_DEFAULT,
        pic_user_wq_matrix: [[128; 64]; 2],
        alf_params: Default::default(),
    };

    let _bbv_delay = bs.read_bits(32);

    if intra {
        pic.picture_type = PictureType::I;
        let time_code_flag = bs.read_flag();
        if time_code_flag {
            let _time_code = bs.read_bits(24);
        }
        // scene_picture / scene_pred markers select G and S pictures.
        let background_flag = bs.read_flag();
        if background_flag {
            pic.picture_type = PictureType::G;
        }
    }
    else {
        pic.picture_type = match bs.read_bits(2) {
            1 => PictureType::P,
            2 => PictureType::B,
            3 => PictureType::F,
            _ => return decode_error("avs2: picture coding type"),
        };

        // background_pred_flag turns a P picture into an S picture.
        if pic.picture_type == PictureType::P && bs.read_flag() {
            pic.picture_type = PictureType::S;
        }
    }

    pic.poc = bs.read_bits(8) as i32;
    pic.referenced = bs.read_flag();

    // The reference set: count and signed POC deltas of the active references.
    pic.num_references = bs.read_bits(3) as usize;
    if pic.num_references > MAX_REFS {
        return decode_error("avs2: too many reference frames");
    }
    for i in 0..pic.num_references {
        let delta = bs.read_ue() as i32 + 1;
        let dist = distance_index(delta);
        pic.dist_refs[i] = dist;
        pic.dist_scale_refs[i] = distance_scale(dist);
    }

    let fixed_qp = bs.read_flag();
    pic.qp = bs.read_bits(7) as i32;
    // Per-CU delta QP rides on the non-fixed-QP signal.
    pic.delta_qp_enable = !fixed_qp;

    if !intra && pic.picture_type != PictureType::S {
        pic.top_field = bs.read_flag();
    }

    if seq.has_tool(ToolFlags::WEIGHTED_QUANT) {
        parse_weighted_quant(bs, &mut pic, &mut header)?;
    }

    // Loop-filter controls.
    if bs.read_flag() {
        // loop_filter_parameter_flag with alpha/beta offsets.
        let _alpha_offset = bs.read_se();
        let _beta_offset = bs.read_se();
    }

    if seq.has_tool(ToolFlags::SAO) {
        pic.sao_enable[0] = bs.read_flag();
        pic.sao_enable[1] = bs.read_flag();
        pic.sao_enable[2] = bs.read_flag();
    }

    if seq.has_tool(ToolFlags::ALF) {
        parse_alf_params(bs, &mut pic, &mut header)?;
    }

    if bs.has_error() {
        return decode_error("avs2: truncated picture header");
    }

    header.params = pic;
    Ok(header)
}

/// Scan a packet for the next startcode at or after `from`. Returns (payload offset, code).
pub fn next_start_code(data: &[u8], from: usize) -> Option<(usize, u8)> {
    let mut i = from;
    while i + 3 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            return Some((i + 4, data[i + 3]));
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BitWriter {
        bytes: Vec<u8>,
        acc: u8,
        n: u32,
    }

    impl BitWriter {
        fn new() -> BitWriter {
            BitWriter { bytes: Vec::new(), acc: 0, n: 0 }
        }

        fn put(&mut self, value: u32, bits: u32) {
            for i in (0..bits).rev() {
                self.acc = (self.acc << 1) | (((value >> i) & 1) as u8);
                self.n += 1;
                if self.n == 8 {
                    self.bytes.push(self.acc);
                    self.acc = 0;
                    self.n = 0;
                }
            }
        }

        fn finish(mut self) -> Vec<u8> {
            while self.n != 0 {
                self.put(0, 1);
            }
            self.bytes
        }
    }

    fn write_sequence_header(width: u32, height: u32) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put(0x20, 8); // profile
        w.put(0x42, 8); // level
        w.put(1, 1); // progressive
        w.put(0, 1); // field coded
        w.put(width, 14);
        w.put(height, 14);
        w.put(1, 2); // 4:2:0
        w.put(1, 3); // 8-bit samples
        w.put(1, 4); // aspect
        w.put(2, 4); // frame rate
        w.put(0, 18); // bitrate lower
        w.put(1, 1); // marker
        w.put(0, 12); // bitrate upper
        w.put(0, 1); // low delay
        w.put(1, 1); // marker
        w.put(0, 18); // bbv
        w.put(6, 3); // lcu bits
        w.put(0, 1); // weighted quant
        w.put(0, 1); // scene picture disable
        for _ in 0..11 {
            w.put(1, 1); // every tool on
        }
        w.finish()
    }

    #[test]
    fn verify_sequence_header_roundtrip() {
        let bytes = write_sequence_header(1920, 1080);
        let mut bs = BitReader::new(&bytes);
        let header = parse_sequence_header(&mut bs).unwrap();

        assert_eq!(header.params.width, 1920);
        assert_eq!(header.params.height, 1080);
        assert_eq!(header.params.lcu_bits, 6);
        assert_eq!(header.params.sample_bit_depth, 8);
        assert_eq!(header.params.chroma_format, ChromaFormat::Yuv420);
        assert!(header.params.has_tool(ToolFlags::AMP));
        assert!(header.params.has_tool(ToolFlags::SAO));
        assert!(header.params.has_tool(ToolFlags::ALF));
        assert!(!header.params.has_tool(ToolFlags::WEIGHTED_QUANT));
        assert!(!header.params.has_tool(ToolFlags::FIELD_CODING));
    }

    #[test]
    fn verify_sequence_header_rejects_bad_dimensions() {
        let bytes = write_sequence_header(1921, 1080);
        let mut bs = BitReader::new(&bytes);
        assert!(parse_sequence_header(&mut bs).is_err());
    }

    #[test]
    fn verify_startcode_scan() {
        let data = [0x00, 0x00, 0x00, 0x01, 0xb0, 0xff, 0x00, 0x00, 0x01, 0xb3];
        let (pos, code) = next_start_code(&data, 0).unwrap();
        assert_eq!((pos, code), (5, 0xb0));
        let (pos, code) = next_start_code(&data, pos).unwrap();
        assert_eq!((pos, code), (10, 0xb3));
    }

    #[test]
    fn verify_intra_picture_header() {
        let seq = SequenceParams {
            width: 64,
            height: 64,
            lcu_bits: 6,
            chroma_format: ChromaFormat::Yuv420,
            sample_bit_depth: 8,
            output_bit_depth: 8,
            tools: ToolFlags::LOOP_FILTER,
        };

        let mut w = BitWriter::new();
        w.put(0, 32); // bbv delay
        w.put(0, 1); // time code flag
        w.put(0, 1); // background flag
        w.put(42, 8); // poc
        w.put(1, 1); // referenced
        w.put(0, 3); // no references
        w.put(1, 1); // fixed qp
        w.put(32, 7); // qp
        w.put(0, 1); // loop filter params
        let bytes = w.finish();

        let mut bs = BitReader::new(&bytes);
        let header = parse_picture_header(&mut bs, &seq, true).unwrap();

        assert_eq!(header.params.picture_type, PictureType::I);
        assert_eq!(header.params.poc, 42);
        assert_eq!(header.params.qp, 32);
        assert!(header.params.referenced);
        assert!(!header.params.delta_qp_enable);
    }
}
