//! Normalized f32 to signed 16-bit PCM conversion
//!
//! The wire format carries raw little-endian int16 samples, so every block
//! goes through this fixed-point conversion right before framing.

/// Convert normalized `[-1.0, 1.0]` samples to signed 16-bit PCM.
///
/// Samples are clamped symmetrically before scaling. Gain stages upstream can
/// push values outside the nominal range; without the clamp those would wrap
/// through integer overflow and come out as full-scale noise of the opposite
/// sign.
pub fn encode(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_fixed_points() {
        assert_eq!(encode(&[1.0]), vec![32767]);
        assert_eq!(encode(&[0.0]), vec![0]);
        assert_eq!(encode(&[-1.0]), vec![-32767]);
    }

    #[test]
    fn test_clamps_both_bounds() {
        // Symmetric clamping is a deliberate choice: the upstream JS client
        // only clamped the upper bound, letting sub -1.0 samples wrap through
        // int16 overflow. Nothing depends on reproducing that bug.
        assert_eq!(encode(&[2.0]), vec![32767]);
        assert_eq!(encode(&[-1.5]), vec![-32767]);
    }

    #[test]
    fn test_length_preserved() {
        let input = vec![0.1f32; 480];
        assert_eq!(encode(&input).len(), 480);
    }

    #[test]
    fn test_midscale_values() {
        let out = encode(&[0.5, -0.5]);
        assert_eq!(out[0], (0.5f32 * 32767.0) as i16);
        assert_eq!(out[1], (-0.5f32 * 32767.0) as i16);
    }

    #[test]
    fn test_empty_input() {
        assert!(encode(&[]).is_empty());
    }
}
