use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{config::AnalyserConfig, Result};

/// Per-tick snapshot of frequency-bin magnitudes.
///
/// Frames borrow the analysis buffer and are consumed immediately; nothing
/// keeps them past the tick that produced them.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisFrame<'a> {
    bins: &'a [u8],
}

impl<'a> AnalysisFrame<'a> {
    pub fn new(bins: &'a [u8]) -> Self {
        Self { bins }
    }

    pub fn bins(&self) -> &'a [u8] {
        self.bins
    }

    /// Mean bin magnitude, 0 for an empty frame.
    pub fn average_magnitude(&self) -> f32 {
        if self.bins.is_empty() {
            return 0.0;
        }

        let sum: u32 = self.bins.iter().map(|&bin| u32::from(bin)).sum();
        sum as f32 / self.bins.len() as f32
    }

    /// Average magnitude rescaled so that `reference` maps to 1.0, capped at 1.0.
    pub fn normalized_loudness(&self, reference: f32) -> f32 {
        if reference <= 0.0 {
            return 0.0;
        }

        (self.average_magnitude() / reference).min(1.0)
    }

    /// Mouth weight for this frame: normalised loudness scaled by `ceiling`.
    pub fn mouth_weight(&self, reference: f32, ceiling: f32) -> f32 {
        self.normalized_loudness(reference) * ceiling
    }
}

/// Software analysis node producing byte frequency data.
///
/// Each call windows the most recent `fft_size` samples with a Blackman
/// window, takes the magnitude spectrum, blends it with the previous spectrum
/// using the smoothing time constant and maps the decibel range
/// `[min_decibels, max_decibels]` linearly onto `0..=255`.
pub struct FrequencyAnalyser {
    config: AnalyserConfig,
    plan: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    smoothed: Vec<f32>,
}

impl FrequencyAnalyser {
    pub fn new(config: AnalyserConfig) -> Result<Self> {
        config.validate()?;

        let size = config.fft_size;
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        let input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();
        let window = (0..size).map(|index| blackman_value(index, size)).collect();

        Ok(Self {
            smoothed: vec![0.0; config.frequency_bin_count()],
            config,
            plan,
            window,
            input,
            spectrum,
            scratch,
        })
    }

    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    pub fn fft_size(&self) -> usize {
        self.config.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.config.frequency_bin_count()
    }

    /// Forgets the smoothing history.
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }

    /// Analyses the most recent samples of `block` and writes one byte per
    /// bin into `out`.
    ///
    /// Blocks shorter than the FFT size are treated as preceded by silence.
    /// `out` may be shorter than the bin count, in which case only the lowest
    /// bins are written.
    pub fn byte_frequency_data(&mut self, block: &[f32], out: &mut [u8]) -> Result<()> {
        let size = self.config.fft_size;
        let tail = &block[block.len().saturating_sub(size)..];
        let padding = size - tail.len();

        self.input[..padding].fill(0.0);
        for (index, sample) in tail.iter().enumerate() {
            let slot = padding + index;
            self.input[slot] = sample * self.window[slot];
        }

        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        let tau = self.config.smoothing_time_constant;
        let scale = 1.0 / size as f32;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(&self.spectrum) {
            let magnitude = bin.norm() * scale;
            *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
        }

        let min_db = self.config.min_decibels;
        let range = self.config.max_decibels - min_db;
        for (byte, smoothed) in out.iter_mut().zip(&self.smoothed) {
            *byte = decibels_to_byte(to_decibels(*smoothed), min_db, range);
        }

        Ok(())
    }
}

impl fmt::Debug for FrequencyAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencyAnalyser")
            .field("config", &self.config)
            .finish()
    }
}

fn to_decibels(magnitude: f32) -> f32 {
    if magnitude <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * magnitude.log10()
    }
}

fn decibels_to_byte(db: f32, min_db: f32, range: f32) -> u8 {
    let scaled = (255.0 / range) * (db - min_db);
    if scaled.is_nan() || scaled <= 0.0 {
        0
    } else {
        scaled.min(255.0) as u8
    }
}

fn blackman_value(index: usize, len: usize) -> f32 {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    let phase = 2.0 * PI * index as f32 / len as f32;

    a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, sample_rate: f32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn loudness_of_uniform_frames() {
        for value in [0_u8, 32, 64, 127, 128, 200, 255] {
            let bins = [value; 128];
            let frame = AnalysisFrame::new(&bins);
            let expected = (value as f32 / 128.0).min(1.0);

            assert!((frame.normalized_loudness(128.0) - expected).abs() < 1e-6);
            assert!((frame.mouth_weight(128.0, 0.8) - expected * 0.8).abs() < 1e-6);
        }

        let loud = [128_u8; 128];
        assert_eq!(AnalysisFrame::new(&loud).mouth_weight(128.0, 0.8), 0.8);
    }

    #[test]
    fn empty_frame_is_silent() {
        let frame = AnalysisFrame::new(&[]);
        assert_eq!(frame.average_magnitude(), 0.0);
        assert_eq!(frame.normalized_loudness(128.0), 0.0);
    }

    #[test]
    fn silence_produces_zero_bins() {
        let mut analyser = FrequencyAnalyser::new(AnalyserConfig::default()).unwrap();
        let mut bins = vec![7_u8; analyser.frequency_bin_count()];

        analyser.byte_frequency_data(&[0.0; 256], &mut bins).unwrap();
        assert!(bins.iter().all(|&bin| bin == 0));
    }

    #[test]
    fn tone_lights_up_its_bin() {
        let config = AnalyserConfig {
            smoothing_time_constant: 0.0,
            ..Default::default()
        };
        let mut analyser = FrequencyAnalyser::new(config).unwrap();
        let mut bins = vec![0_u8; analyser.frequency_bin_count()];

        // Bin width is 8000 / 256 = 31.25 Hz, so 1000 Hz lands on bin 32.
        let block = sine(1_000.0, 8_000.0, 256, 0.01);
        analyser.byte_frequency_data(&block, &mut bins).unwrap();

        let peak = bins
            .iter()
            .enumerate()
            .max_by_key(|&(_, bin)| *bin)
            .map(|(index, _)| index)
            .unwrap();
        assert_eq!(peak, 32);
        assert!(bins[32] > bins[31] && bins[32] > bins[33]);
        assert_eq!(bins[100], 0);
    }

    #[test]
    fn smoothing_lags_behind_input() {
        let mut analyser = FrequencyAnalyser::new(AnalyserConfig::default()).unwrap();
        let mut first = vec![0_u8; analyser.frequency_bin_count()];
        let mut second = first.clone();
        let block = sine(1_000.0, 8_000.0, 256, 0.01);

        analyser.byte_frequency_data(&block, &mut first).unwrap();
        analyser.byte_frequency_data(&block, &mut second).unwrap();
        assert!(second[32] > first[32]);

        analyser.reset();
        let mut after_reset = vec![0_u8; analyser.frequency_bin_count()];
        analyser.byte_frequency_data(&block, &mut after_reset).unwrap();
        assert_eq!(after_reset[32], first[32]);
    }

    #[test]
    fn short_blocks_are_padded() {
        let mut analyser = FrequencyAnalyser::new(AnalyserConfig::default()).unwrap();
        let mut bins = vec![0_u8; 128];
        analyser.byte_frequency_data(&[0.5; 10], &mut bins).unwrap();
        analyser.byte_frequency_data(&[], &mut bins).unwrap();
    }

    #[test]
    fn rejects_invalid_sizes() {
        let config = AnalyserConfig {
            fft_size: 100,
            ..Default::default()
        };
        assert!(FrequencyAnalyser::new(config).is_err());
    }
}
