//! Voice clean-up applied to every clip before transcription.
//!
//! The chain mirrors a typical speech pre-processing pass: band-limit to the
//! voice range, gate the background, bring the level to a common loudness and
//! compress peaks so quiet syllables survive.

use std::f32::consts::PI;

#[derive(Debug, Clone)]
pub struct VoiceFilterConfig {
    pub high_pass_hz: f32,
    pub low_pass_hz: f32,
    /// Gate opens this many times above the estimated noise floor.
    pub gate_ratio: f32,
    /// Gain applied to gated frames.
    pub gate_floor_gain: f32,
    pub target_rms: f32,
    pub max_normalize_gain: f32,
    pub compressor_threshold: f32,
    pub compressor_ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub makeup_gain: f32,
    pub frame_ms: f32,
}

impl Default for VoiceFilterConfig {
    fn default() -> Self {
        Self {
            high_pass_hz: 200.0,
            low_pass_hz: 3300.0,
            gate_ratio: 2.0,
            gate_floor_gain: 0.1,
            target_rms: 0.1,
            max_normalize_gain: 20.0,
            compressor_threshold: 0.125,
            compressor_ratio: 4.0,
            attack_ms: 5.0,
            release_ms: 50.0,
            makeup_gain: 1.5,
            frame_ms: 20.0,
        }
    }
}

/// Second-order IIR section (RBJ cookbook), transposed direct form II.
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Biquad {
    pub fn high_pass(sample_rate: u32, cutoff_hz: f32) -> Self {
        let (cos, alpha) = Self::prewarp(sample_rate, cutoff_hz);
        let b0 = (1.0 + cos) / 2.0;
        Self::normalized(b0, -(1.0 + cos), b0, 1.0 + alpha, -2.0 * cos, 1.0 - alpha)
    }

    pub fn low_pass(sample_rate: u32, cutoff_hz: f32) -> Self {
        let (cos, alpha) = Self::prewarp(sample_rate, cutoff_hz);
        let b0 = (1.0 - cos) / 2.0;
        Self::normalized(b0, 1.0 - cos, b0, 1.0 + alpha, -2.0 * cos, 1.0 - alpha)
    }

    fn prewarp(sample_rate: u32, cutoff_hz: f32) -> (f32, f32) {
        let nyquist = sample_rate as f32 / 2.0;
        let cutoff = cutoff_hz.clamp(1.0, nyquist * 0.99);
        let w0 = 2.0 * PI * cutoff / sample_rate as f32;
        (w0.cos(), w0.sin() / (2.0 * std::f32::consts::FRAC_1_SQRT_2))
    }

    fn normalized(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    pub fn run(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s = self.process(*s);
        }
    }
}

/// Runs the whole chain in place. Output is clamped to [-1, 1].
pub fn apply_voice_chain(samples: &mut [f32], sample_rate: u32, config: &VoiceFilterConfig) {
    if samples.is_empty() {
        return;
    }

    Biquad::high_pass(sample_rate, config.high_pass_hz).run(samples);
    Biquad::low_pass(sample_rate, config.low_pass_hz).run(samples);

    let frame_len = ((sample_rate as f32 * config.frame_ms / 1000.0) as usize).max(1);
    let threshold = noise_gate(samples, frame_len, config);
    normalize_loudness(samples, frame_len, threshold, config);
    compress(samples, sample_rate, config);

    for s in samples.iter_mut() {
        *s = s.clamp(-1.0, 1.0);
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Attenuates frames that sit near the noise floor. The floor is the 10th
/// percentile of frame RMS. Returns the gate threshold.
fn noise_gate(samples: &mut [f32], frame_len: usize, config: &VoiceFilterConfig) -> f32 {
    let mut levels: Vec<f32> = samples.chunks(frame_len).map(rms).collect();
    let gains_for = |level: f32, threshold: f32| {
        if level >= threshold { 1.0 } else { config.gate_floor_gain }
    };

    let frame_levels = levels.clone();
    levels.sort_by(|a, b| a.total_cmp(b));
    let floor = levels[levels.len() / 10];
    let threshold = floor * config.gate_ratio;

    if threshold <= f32::EPSILON {
        return threshold;
    }

    // Ramp linearly between frame gains to avoid zipper noise.
    let mut previous = gains_for(frame_levels[0], threshold);
    for (frame, level) in samples.chunks_mut(frame_len).zip(frame_levels) {
        let target = gains_for(level, threshold);
        let step = (target - previous) / frame.len() as f32;
        for (i, s) in frame.iter_mut().enumerate() {
            *s *= previous + step * (i + 1) as f32;
        }
        previous = target;
    }

    threshold
}

/// Scales the clip so its voiced frames reach the target RMS.
fn normalize_loudness(
    samples: &mut [f32],
    frame_len: usize,
    threshold: f32,
    config: &VoiceFilterConfig,
) {
    let voiced: Vec<f32> = samples
        .chunks(frame_len)
        .filter(|frame| rms(frame) > threshold)
        .flat_map(|frame| frame.iter().copied())
        .collect();

    let level = rms(if voiced.is_empty() { samples } else { &voiced });
    if level <= f32::EPSILON || !level.is_finite() {
        return;
    }

    let gain = (config.target_rms / level).min(config.max_normalize_gain);
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

/// Feed-forward peak compressor with makeup gain.
fn compress(samples: &mut [f32], sample_rate: u32, config: &VoiceFilterConfig) {
    let coefficient = |ms: f32| (-1.0 / (ms / 1000.0 * sample_rate as f32).max(1.0)).exp();
    let attack = coefficient(config.attack_ms);
    let release = coefficient(config.release_ms);

    let mut envelope = 0.0f32;
    for s in samples.iter_mut() {
        let level = s.abs();
        let coeff = if level > envelope { attack } else { release };
        envelope = coeff * envelope + (1.0 - coeff) * level;

        let gain = if envelope > config.compressor_threshold {
            let compressed = config.compressor_threshold
                + (envelope - config.compressor_threshold) / config.compressor_ratio;
            compressed / envelope
        } else {
            1.0
        };
        *s *= gain * config.makeup_gain;
    }
}
