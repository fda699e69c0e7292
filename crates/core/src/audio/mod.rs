//! Audio loading and playback plumbing for the volume-driven strategy.
//!
//! An [`AudioContext`] is owned by the caller and handed to the lip sync
//! controller, so hosts can plug in their own audio stack and tests can
//! substitute a fake analysis source. [`SoftwareAudioContext`] is the bundled
//! implementation: it fetches through an [`AudioFetcher`], decodes with an
//! [`AudioDecoder`] and analyses a clock-driven [`BufferSource`].

use std::{fmt, io::Cursor, path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use crate::{
    analysis::{AnalysisFrame, FrequencyAnalyser},
    config::AnalyserConfig,
    timeline::PlaybackClock,
    LipSyncError, Result,
};

/// Fully decoded audio, down-mixed to mono.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    /// Channel count of the source before down-mixing.
    pub channels: u16,
    pub samples: Arc<[f32]>,
}

impl DecodedAudio {
    pub fn new(sample_rate: u32, channels: u16, samples: impl Into<Arc<[f32]>>) -> Self {
        Self {
            sample_rate,
            channels,
            samples: samples.into(),
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Retrieves the raw bytes behind an audio locator.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>>;
}

/// Reads local paths and `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

#[async_trait]
impl AudioFetcher for FileFetcher {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        let path = locator.strip_prefix("file://").unwrap_or(locator);
        tokio::fs::read(path)
            .await
            .map_err(|source| LipSyncError::Fetch {
                locator: locator.to_string(),
                source,
            })
    }
}

/// Turns an encoded payload into playable samples.
pub trait AudioDecoder: Send + Sync {
    /// `extension` is a container hint taken from the locator, if any.
    fn decode(&self, bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio>;
}

/// Decoder for the formats supported by symphonia's default registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio> {
        let stream = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
        let mut hint = Hint::new();
        if let Some(extension) = extension {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(decode_error)?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| LipSyncError::Decode("no decodable audio track".to_string()))?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channels = track
            .codec_params
            .channels
            .map(|channels| channels.count())
            .unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(decode_error)?;

        let mut mono = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(err) => return Err(decode_error(err)),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(reason)) => {
                    tracing::debug!(reason, "skipping undecodable packet");
                    continue;
                }
                Err(err) => return Err(decode_error(err)),
            };

            let spec = *decoded.spec();
            sample_rate = spec.rate;
            channels = spec.channels.count();

            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            downmix_into(buffer.samples(), channels, &mut mono);
        }

        if mono.is_empty() || sample_rate == 0 {
            return Err(LipSyncError::Decode(
                "audio payload contains no samples".to_string(),
            ));
        }

        Ok(DecodedAudio::new(
            sample_rate,
            u16::try_from(channels).unwrap_or(u16::MAX),
            mono,
        ))
    }
}

fn decode_error(err: SymphoniaError) -> LipSyncError {
    LipSyncError::Decode(err.to_string())
}

fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    let channels = channels.max(1);
    out.extend(
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
    );
}

/// Extension of the last path segment of a locator, used as a decoder hint.
fn locator_extension(locator: &str) -> Option<&str> {
    let path = locator.split(['?', '#']).next().unwrap_or(locator);
    Path::new(path).extension().and_then(|ext| ext.to_str())
}

/// A playing source wired through an analysis node.
pub trait AnalysedSource: Send {
    fn frequency_bin_count(&self) -> usize;

    /// Writes the current magnitude of each frequency bin into `out`.
    fn byte_frequency_data(&mut self, out: &mut [u8]) -> Result<()>;

    /// Whether playback has reached the end of the buffer.
    fn has_ended(&self) -> bool;

    /// Stops playback and detaches the analysis node. Safe to call twice.
    fn disconnect(&mut self);
}

/// Caller-owned audio processing context.
#[async_trait]
pub trait AudioContext: Send + Sync {
    /// Fetches and decodes the audio behind `locator`.
    async fn load(&self, locator: &str) -> Result<DecodedAudio>;

    /// Connects `audio` to a new analysis node and starts playback from the
    /// beginning.
    fn connect(
        &self,
        audio: DecodedAudio,
        analyser: &AnalyserConfig,
    ) -> Result<Box<dyn AnalysedSource>>;
}

/// Software audio context composed of a fetcher and a decoder.
///
/// Playback is silent: the source position follows a [`PlaybackClock`] and
/// hosts that need audible output render the same [`DecodedAudio`] on their
/// own device.
#[derive(Debug, Clone, Default)]
pub struct SoftwareAudioContext<F = FileFetcher, D = SymphoniaDecoder> {
    fetcher: F,
    decoder: D,
}

impl<F, D> SoftwareAudioContext<F, D> {
    pub fn new(fetcher: F, decoder: D) -> Self {
        Self { fetcher, decoder }
    }
}

#[async_trait]
impl<F: AudioFetcher, D: AudioDecoder> AudioContext for SoftwareAudioContext<F, D> {
    async fn load(&self, locator: &str) -> Result<DecodedAudio> {
        let bytes = self.fetcher.fetch(locator).await?;
        tracing::debug!(locator, bytes = bytes.len(), "fetched audio payload");

        let audio = self.decoder.decode(bytes, locator_extension(locator))?;
        tracing::debug!(
            locator,
            sample_rate = audio.sample_rate,
            channels = audio.channels,
            duration_ms = audio.duration().as_millis() as u64,
            "decoded audio"
        );
        Ok(audio)
    }

    fn connect(
        &self,
        audio: DecodedAudio,
        analyser: &AnalyserConfig,
    ) -> Result<Box<dyn AnalysedSource>> {
        let analyser = FrequencyAnalyser::new(analyser.clone())?;
        Ok(Box::new(BufferSource::start(audio, analyser)))
    }
}

/// Decoded buffer played back against a [`PlaybackClock`].
pub struct BufferSource {
    audio: DecodedAudio,
    analyser: FrequencyAnalyser,
    clock: PlaybackClock,
    connected: bool,
}

impl BufferSource {
    /// Starts playback at offset zero.
    pub fn start(audio: DecodedAudio, analyser: FrequencyAnalyser) -> Self {
        Self {
            audio,
            analyser,
            clock: PlaybackClock::start(),
            connected: true,
        }
    }

    /// Index of the sample currently being played.
    pub fn position(&self) -> usize {
        let elapsed = self.clock.elapsed().as_secs_f64();
        let position = (elapsed * f64::from(self.audio.sample_rate)) as usize;
        position.min(self.audio.samples.len())
    }
}

impl AnalysedSource for BufferSource {
    fn frequency_bin_count(&self) -> usize {
        self.analyser.frequency_bin_count()
    }

    fn byte_frequency_data(&mut self, out: &mut [u8]) -> Result<()> {
        if !self.connected {
            out.fill(0);
            return Ok(());
        }

        let end = self.position();
        let start = end.saturating_sub(self.analyser.fft_size());
        let block = &self.audio.samples[start..end];
        self.analyser.byte_frequency_data(block, out)
    }

    fn has_ended(&self) -> bool {
        !self.connected || self.position() >= self.audio.samples.len()
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.analyser.reset();
    }
}

impl fmt::Debug for BufferSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferSource")
            .field("sample_rate", &self.audio.sample_rate)
            .field("samples", &self.audio.samples.len())
            .field("position", &self.position())
            .field("connected", &self.connected)
            .finish()
    }
}

/// One playback exclusively owned by a lip sync controller.
pub struct AudioSession {
    locator: String,
    source: Box<dyn AnalysedSource>,
    bins: Vec<u8>,
}

impl AudioSession {
    pub fn new(locator: impl Into<String>, source: Box<dyn AnalysedSource>) -> Self {
        let bins = vec![0; source.frequency_bin_count()];
        Self {
            locator: locator.into(),
            source,
            bins,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn has_ended(&self) -> bool {
        self.source.has_ended()
    }

    /// Reads the current analysis frame.
    pub fn analyse(&mut self) -> Result<AnalysisFrame<'_>> {
        self.source.byte_frequency_data(&mut self.bins)?;
        Ok(AnalysisFrame::new(&self.bins))
    }

    /// Stops playback and releases the source.
    pub fn close(mut self) {
        self.source.disconnect();
    }
}

impl fmt::Debug for AudioSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSession")
            .field("locator", &self.locator)
            .field("bins", &self.bins.len())
            .finish()
    }
}
