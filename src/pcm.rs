//! Linear PCM packing for outbound audio.
//!
//! The server expects mono, 16 kHz, signed 16-bit little-endian samples. Capture hands us
//! normalized `f32` frames in `[-1.0, 1.0]`; this module is the only place that crosses
//! that boundary.

use std::time::Duration;

/// Sample rate of every frame the client produces (Hz).
pub const SAMPLE_RATE: u32 = 16_000;

/// Bytes per packed sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Convert one normalized sample to signed 16-bit PCM.
///
/// The input is clamped to `[-1.0, 1.0]` first. Negative values scale by `0x8000` and
/// non-negative values by `0x7FFF`, so both ends of the range map exactly onto
/// `i16::MIN` / `i16::MAX`. The fractional part is truncated toward zero; NaN maps to 0.
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32_768.0) as i16
    } else {
        (s * 32_767.0) as i16
    }
}

/// Pack a frame of normalized samples as 16-bit little-endian PCM.
///
/// The output is always exactly `2 * samples.len()` bytes.
pub fn f32_to_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &s in samples {
        out.extend_from_slice(&sample_to_i16(s).to_le_bytes());
    }
    out
}

/// Wall-clock duration of `frames` samples at [`SAMPLE_RATE`].
pub fn frames_to_duration(frames: usize) -> Duration {
    Duration::from_micros(frames as u64 * 1_000_000 / SAMPLE_RATE as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unpack(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn extremes_map_onto_i16_range() {
        assert_eq!(sample_to_i16(1.0), i16::MAX);
        assert_eq!(sample_to_i16(-1.0), i16::MIN);
        assert_eq!(sample_to_i16(0.0), 0);
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        assert_eq!(sample_to_i16(3.5), i16::MAX);
        assert_eq!(sample_to_i16(-7.0), i16::MIN);
        assert_eq!(sample_to_i16(f32::INFINITY), i16::MAX);
        assert_eq!(sample_to_i16(f32::NEG_INFINITY), i16::MIN);
        assert_eq!(sample_to_i16(f32::NAN), 0);
    }

    #[test]
    fn asymmetric_scaling_truncates_toward_zero() {
        // 0.5 * 32767 = 16383.5 -> 16383; -0.5 * 32768 = -16384 exactly.
        assert_eq!(sample_to_i16(0.5), 16_383);
        assert_eq!(sample_to_i16(-0.5), -16_384);
    }

    #[test]
    fn packed_length_is_twice_the_sample_count() {
        for n in [0usize, 1, 7, 4096] {
            let frame = vec![0.25f32; n];
            assert_eq!(f32_to_pcm16le(&frame).len(), n * 2);
        }
    }

    #[test]
    fn packing_is_little_endian() {
        let bytes = f32_to_pcm16le(&[1.0, -1.0]);
        assert_eq!(bytes, vec![0xFF, 0x7F, 0x00, 0x80]);
        assert_eq!(unpack(&bytes), vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn frame_duration_matches_sample_rate() {
        assert_eq!(frames_to_duration(16_000), Duration::from_secs(1));
        assert_eq!(frames_to_duration(4096), Duration::from_millis(256));
    }
}
