//! Box-filter downsampler for microphone audio
//!
//! ASR backends expect mono 16 kHz input, while capture devices usually run at
//! 44.1 or 48 kHz. Converting on the client keeps that cost off the server.
//!
//! Each output sample is the unweighted mean of a window of input samples.
//! This is deliberate: no anti-aliasing pre-filter, so content above the new
//! Nyquist frequency aliases, in exchange for near-zero latency and a few
//! lines of code.

use super::AudioError;

/// Downsample `samples` from `input_rate` to `output_rate`.
///
/// Output length is `ceil(len / (input_rate / output_rate))`. The length rule
/// is part of the wire contract with the server: it determines how many
/// samples per callback the receiving side sees.
///
/// Upsampling is not supported; `input_rate < output_rate` (or a zero rate)
/// returns [`AudioError::UnsupportedRate`]. Equal rates return the input
/// unchanged.
pub fn downsample(
    samples: &[f32],
    input_rate: u32,
    output_rate: u32,
) -> Result<Vec<f32>, AudioError> {
    if output_rate == 0 || input_rate < output_rate {
        return Err(AudioError::UnsupportedRate {
            input: input_rate,
            output: output_rate,
        });
    }

    if input_rate == output_rate {
        return Ok(samples.to_vec());
    }

    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let ratio = input_rate as f64 / output_rate as f64;
    let new_len = (samples.len() as f64 / ratio).ceil() as usize;
    let mut result = Vec::with_capacity(new_len);

    let mut window_start = 0usize;
    for i in 0..new_len {
        let window_end = (((i + 1) as f64 * ratio).round() as usize).min(samples.len());

        if window_end > window_start {
            let sum: f64 = samples[window_start..window_end]
                .iter()
                .map(|&s| s as f64)
                .sum();
            result.push((sum / (window_end - window_start) as f64) as f32);
        } else {
            // Empty window from boundary rounding: take the nearest sample
            // rather than dividing by zero.
            result.push(samples[window_start.min(samples.len() - 1)]);
        }

        window_start = window_end;
    }

    Ok(result)
}
