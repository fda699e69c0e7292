//! Recording fakes shared by the unit tests.

use std::{
    collections::{HashMap, HashSet},
    io::Cursor,
    sync::{
        atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{
    audio::{AnalysedSource, AudioContext, DecodedAudio},
    config::AnalyserConfig,
    expression::{Avatar, BlendShapeProxy, ExpressionManager},
    LipSyncError, Result,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub at: Instant,
    pub name: String,
    pub weight: f32,
}

/// Control surface that records every write it accepts.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    writes: Mutex<Vec<Write>>,
    defined: Option<HashSet<String>>,
    failing: bool,
}

impl RecordingSurface {
    pub fn with_defined(mut self, names: &[&str]) -> Self {
        self.defined = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    /// Latest weight written to `name`.
    pub fn weight(&self, name: &str) -> Option<f32> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|write| write.name == name)
            .map(|write| write.weight)
    }

    pub fn weights(&self) -> HashMap<String, f32> {
        let mut weights = HashMap::new();
        for write in self.writes.lock().unwrap().iter() {
            weights.insert(write.name.clone(), write.weight);
        }
        weights
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }

    fn record(&self, name: &str, weight: f32) -> Result<()> {
        if self.failing {
            return Err(LipSyncError::Expression(format!("`{name}` is locked")));
        }

        self.writes.lock().unwrap().push(Write {
            at: Instant::now(),
            name: name.to_string(),
            weight,
        });
        Ok(())
    }
}

impl ExpressionManager for RecordingSurface {
    fn has_expression(&self, name: &str) -> bool {
        self.defined
            .as_ref()
            .map(|defined| defined.contains(name))
            .unwrap_or(true)
    }

    fn set_value(&self, name: &str, weight: f32) -> Result<()> {
        self.record(name, weight)
    }
}

impl BlendShapeProxy for RecordingSurface {
    fn set_value(&self, name: &str, weight: f32) -> Result<()> {
        self.record(name, weight)
    }
}

pub struct RecordingAvatar {
    expressions: Arc<RecordingSurface>,
    blend_shapes: Arc<RecordingSurface>,
    expose_expressions: bool,
    expose_blend_shapes: bool,
}

impl RecordingAvatar {
    fn new(expose_expressions: bool, expose_blend_shapes: bool) -> Self {
        Self {
            expressions: Arc::default(),
            blend_shapes: Arc::default(),
            expose_expressions,
            expose_blend_shapes,
        }
    }

    pub fn expressions_only() -> Self {
        Self::new(true, false)
    }

    pub fn blend_shapes_only() -> Self {
        Self::new(false, true)
    }

    pub fn with_both() -> Self {
        Self::new(true, true)
    }

    pub fn empty() -> Self {
        Self::new(false, false)
    }

    pub fn from_expressions(surface: RecordingSurface) -> Self {
        Self {
            expressions: Arc::new(surface),
            ..Self::expressions_only()
        }
    }

    pub fn expressions(&self) -> &RecordingSurface {
        &self.expressions
    }

    pub fn blend_shapes(&self) -> &RecordingSurface {
        &self.blend_shapes
    }
}

impl Avatar for RecordingAvatar {
    fn expression_manager(&self) -> Option<Arc<dyn ExpressionManager>> {
        self.expose_expressions
            .then(|| self.expressions.clone() as Arc<dyn ExpressionManager>)
    }

    fn blend_shape_proxy(&self) -> Option<Arc<dyn BlendShapeProxy>> {
        self.expose_blend_shapes
            .then(|| self.blend_shapes.clone() as Arc<dyn BlendShapeProxy>)
    }
}

/// Audio context whose sources report a fixed, adjustable bin level.
#[derive(Debug, Default)]
pub struct FakeAudioContext {
    level: Arc<AtomicU8>,
    ended: Arc<AtomicBool>,
    fail_loads: AtomicBool,
    loads: AtomicUsize,
    connects: AtomicUsize,
    disconnects: Arc<AtomicUsize>,
}

impl FakeAudioContext {
    pub fn with_level(level: u8) -> Self {
        let context = Self::default();
        context.set_level(level);
        context
    }

    pub fn set_level(&self, level: u8) {
        self.level.store(level, Ordering::SeqCst);
    }

    /// Makes every connected source report end of playback.
    pub fn finish_playback(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Sources currently connected and not yet torn down.
    pub fn live_sources(&self) -> usize {
        self.connects() - self.disconnects()
    }
}

#[async_trait]
impl AudioContext for FakeAudioContext {
    async fn load(&self, locator: &str) -> Result<DecodedAudio> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(LipSyncError::Decode(format!("cannot decode `{locator}`")));
        }
        Ok(DecodedAudio::new(48_000, 1, vec![0.0_f32; 48_000]))
    }

    fn connect(
        &self,
        _audio: DecodedAudio,
        analyser: &AnalyserConfig,
    ) -> Result<Box<dyn AnalysedSource>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.ended.store(false, Ordering::SeqCst);
        Ok(Box::new(FakeSource {
            bins: analyser.frequency_bin_count(),
            level: self.level.clone(),
            ended: self.ended.clone(),
            disconnects: self.disconnects.clone(),
            connected: true,
        }))
    }
}

struct FakeSource {
    bins: usize,
    level: Arc<AtomicU8>,
    ended: Arc<AtomicBool>,
    disconnects: Arc<AtomicUsize>,
    connected: bool,
}

impl AnalysedSource for FakeSource {
    fn frequency_bin_count(&self) -> usize {
        self.bins
    }

    fn byte_frequency_data(&mut self, out: &mut [u8]) -> Result<()> {
        out.fill(self.level.load(Ordering::SeqCst));
        Ok(())
    }

    fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn disconnect(&mut self) {
        if std::mem::replace(&mut self.connected, false) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Builds a 16-bit PCM WAV file in memory.
pub fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}
