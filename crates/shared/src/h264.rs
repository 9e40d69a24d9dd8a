//! H.264 sequence parameter set parsing.
//!
//! The scrcpy proxy sniffs SPS NAL units out of the video stream to learn the
//! true encoded resolution. Input is a full NAL unit: a four-byte start
//! prefix (`00 00 00 01`) followed by the NAL header whose low five bits are
//! 7 for an SPS. Emulation-prevention bytes are removed before bit parsing.
//!
//! Every bit read is bounds-checked; truncated or malformed payloads return
//! [`SpsError`] instead of panicking.

use thiserror::Error;

/// Predefined sample aspect ratios, indexed by `aspect_ratio_idc`
/// (ITU-T H.264 table E-1).
const PREDEFINED_SAR: [(u32, u32); 17] = [
    (0, 0),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpsError {
    #[error("SPS payload too short")]
    TooShort,

    #[error("NAL unit type {0} is not an SPS")]
    NotSps(u8),

    #[error("bitstream ended mid-field")]
    UnexpectedEof,

    #[error("malformed Exp-Golomb code")]
    MalformedExpGolomb,
}

/// Fields of an SPS needed to compute the coded picture dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub constraint_set_flags: u8,
    pub level_idc: u8,
    pub pic_width_in_mbs_minus1: u32,
    pub pic_height_in_map_units_minus1: u32,
    pub frame_mbs_only: bool,
    pub frame_crop_left_offset: u32,
    pub frame_crop_right_offset: u32,
    pub frame_crop_top_offset: u32,
    pub frame_crop_bottom_offset: u32,
    /// Sample aspect ratio as (width, height); (0, 0) when unspecified.
    pub sar: (u32, u32),
}

impl SpsInfo {
    /// Displayable picture size: macroblock grid minus cropping, with the
    /// sample aspect ratio applied to the width when specified.
    pub fn video_size(&self) -> (u32, u32) {
        let mut width = (self.pic_width_in_mbs_minus1 + 1) * 16;
        width = width
            .saturating_sub(2 * (self.frame_crop_left_offset + self.frame_crop_right_offset));

        let field_mult = if self.frame_mbs_only { 1 } else { 2 };
        let crop_mult = if self.frame_mbs_only { 1 } else { 2 };
        let mut height = (self.pic_height_in_map_units_minus1 + 1) * 16 * field_mult;
        height = height.saturating_sub(
            crop_mult * (self.frame_crop_top_offset + self.frame_crop_bottom_offset),
        );

        let (sar_w, sar_h) = self.sar;
        if sar_w != 0 && sar_h != 0 {
            width = (f64::from(width) * f64::from(sar_w) / f64::from(sar_h)).round() as u32;
        }

        (width, height)
    }

    /// RFC 6381 codec string, e.g. `avc1.42C028`.
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02X}{:02X}{:02X}",
            self.profile_idc, self.constraint_set_flags, self.level_idc
        )
    }
}

/// NAL unit type of a start-prefixed frame, when long enough to carry one.
pub fn nal_unit_type(frame: &[u8]) -> Option<u8> {
    if frame.len() >= 5 {
        Some(frame[4] & 0x1F)
    } else {
        None
    }
}

/// Parses an SPS NAL unit (including the four-byte start prefix).
pub fn parse_sps(data: &[u8]) -> Result<SpsInfo, SpsError> {
    if data.len() < 5 {
        return Err(SpsError::TooShort);
    }

    let rbsp = remove_emulation_prevention(&data[4..]);
    let mut reader = BitReader::new(&rbsp);

    // forbidden_zero_bit + nal_ref_idc
    reader.read_bits(3)?;
    let nal_unit_type = reader.read_bits(5)? as u8;
    if nal_unit_type != 7 {
        return Err(SpsError::NotSps(nal_unit_type));
    }

    let mut info = SpsInfo {
        profile_idc: reader.read_bits(8)? as u8,
        constraint_set_flags: reader.read_bits(8)? as u8,
        level_idc: reader.read_bits(8)? as u8,
        ..SpsInfo::default()
    };

    reader.read_ue()?; // seq_parameter_set_id

    if matches!(info.profile_idc, 100 | 110 | 122 | 144) {
        let chroma_format_idc = reader.read_ue()?;
        if chroma_format_idc == 3 {
            reader.read_bits(1)?; // residual_colour_transform_flag
        }
        reader.read_ue()?; // bit_depth_luma_minus8
        reader.read_ue()?; // bit_depth_chroma_minus8
        reader.read_bits(1)?; // qpprime_y_zero_transform_bypass_flag

        if reader.read_bits(1)? == 1 {
            // seq_scaling_matrix_present: skip the scaling lists
            for _ in 0..8 {
                if reader.read_bits(1)? == 1 {
                    for _ in 0..64 {
                        reader.read_ue()?;
                    }
                }
            }
        }
    }

    reader.read_ue()?; // log2_max_frame_num_minus4
    let pic_order_cnt_type = reader.read_ue()?;
    if pic_order_cnt_type == 0 {
        reader.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
    } else if pic_order_cnt_type == 1 {
        reader.read_bits(1)?; // delta_pic_order_always_zero_flag
        reader.read_se()?; // offset_for_non_ref_pic
        reader.read_se()?; // offset_for_top_to_bottom_field
        let cycle_len = reader.read_ue()?;
        for _ in 0..cycle_len {
            reader.read_se()?;
        }
    }

    reader.read_ue()?; // max_num_ref_frames
    reader.read_bits(1)?; // gaps_in_frame_num_value_allowed_flag

    info.pic_width_in_mbs_minus1 = reader.read_ue()?;
    info.pic_height_in_map_units_minus1 = reader.read_ue()?;

    info.frame_mbs_only = reader.read_bits(1)? == 1;
    if !info.frame_mbs_only {
        reader.read_bits(1)?; // mb_adaptive_frame_field_flag
    }

    reader.read_bits(1)?; // direct_8x8_inference_flag

    if reader.read_bits(1)? == 1 {
        info.frame_crop_left_offset = reader.read_ue()?;
        info.frame_crop_right_offset = reader.read_ue()?;
        info.frame_crop_top_offset = reader.read_ue()?;
        info.frame_crop_bottom_offset = reader.read_ue()?;
    }

    if reader.read_bits(1)? == 1 {
        // vui_parameters_present: only the aspect ratio matters here
        if reader.read_bits(1)? == 1 {
            let aspect_ratio_idc = reader.read_bits(8)?;
            if aspect_ratio_idc == 255 {
                let sar_width = reader.read_bits(16)?;
                let sar_height = reader.read_bits(16)?;
                info.sar = (sar_width, sar_height);
            } else if (aspect_ratio_idc as usize) < PREDEFINED_SAR.len() {
                info.sar = PREDEFINED_SAR[aspect_ratio_idc as usize];
            }
        }
    }

    Ok(info)
}

/// Strips the 0x03 emulation-prevention byte that follows any `00 00` pair.
fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if i + 2 < data.len() && data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 3 {
            out.push(0);
            out.push(0);
            i += 3;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

/// MSB-first bit cursor over a byte slice.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bit(&mut self) -> Result<u32, SpsError> {
        let byte = self.data.get(self.pos / 8).ok_or(SpsError::UnexpectedEof)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Ok(u32::from(bit))
    }

    fn read_bits(&mut self, count: u32) -> Result<u32, SpsError> {
        let mut value = 0u32;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()?;
        }
        Ok(value)
    }

    /// Unsigned Exp-Golomb code.
    fn read_ue(&mut self) -> Result<u32, SpsError> {
        let mut leading_zeros = 0u32;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(SpsError::MalformedExpGolomb);
            }
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok((1u32 << leading_zeros) - 1 + suffix)
    }

    /// Signed Exp-Golomb code.
    fn read_se(&mut self) -> Result<i32, SpsError> {
        let ue = self.read_ue()?;
        let magnitude = ue.div_ceil(2) as i32;
        if ue % 2 == 0 {
            Ok(-magnitude)
        } else {
            Ok(magnitude)
        }
    }
}
