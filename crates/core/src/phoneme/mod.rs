//! Text-driven lip sync.
//!
//! Text is mapped character by character onto a handful of visemes and played
//! back as a uniformly timed sequence of discrete mouth shapes. The mapping is
//! a coarse heuristic, not a phonetic analysis.

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::PhonemeConfig,
    expression::{ExpressionTarget, MouthShape},
    timeline::{PlaybackClock, Schedule, TimedTask},
    LipSyncError,
};

/// Discrete mouth-shape category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Viseme {
    A,
    E,
    I,
    O,
    U,
    /// Closed mouth.
    N,
    /// Teeth together.
    S,
}

impl Viseme {
    pub const ALL: [Viseme; 7] = [
        Viseme::A,
        Viseme::E,
        Viseme::I,
        Viseme::O,
        Viseme::U,
        Viseme::N,
        Viseme::S,
    ];

    /// Classifies a single lower-case character.
    pub fn from_char(c: char) -> Self {
        match c {
            'a' => Viseme::A,
            'e' => Viseme::E,
            'i' => Viseme::I,
            'o' => Viseme::O,
            'u' => Viseme::U,
            'n' | 'm' => Viseme::N,
            's' | 'h' => Viseme::S,
            _ => Viseme::N,
        }
    }

    pub fn code(self) -> char {
        match self {
            Viseme::A => 'A',
            Viseme::E => 'E',
            Viseme::I => 'I',
            Viseme::O => 'O',
            Viseme::U => 'U',
            Viseme::N => 'N',
            Viseme::S => 'S',
        }
    }

    /// Vowel shape raised to full weight for this viseme. Closed and teeth
    /// visemes raise none.
    pub fn mouth_shape(self) -> Option<MouthShape> {
        match self {
            Viseme::A => Some(MouthShape::A),
            Viseme::E => Some(MouthShape::E),
            Viseme::I => Some(MouthShape::I),
            Viseme::O => Some(MouthShape::O),
            Viseme::U => Some(MouthShape::U),
            Viseme::N | Viseme::S => None,
        }
    }
}

impl fmt::Display for Viseme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Viseme {
    type Err = LipSyncError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        Viseme::ALL
            .into_iter()
            .find(|viseme| {
                let mut buf = [0; 4];
                code.eq_ignore_ascii_case(viseme.code().encode_utf8(&mut buf))
            })
            .ok_or(LipSyncError::InvalidInput("unknown viseme code"))
    }
}

/// Immutable, ordered sequence of visemes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PhonemeSequence(Arc<[Viseme]>);

impl PhonemeSequence {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Viseme] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = Viseme> + '_ {
        self.0.iter().copied()
    }
}

impl From<Vec<Viseme>> for PhonemeSequence {
    fn from(visemes: Vec<Viseme>) -> Self {
        Self(visemes.into())
    }
}

impl FromIterator<Viseme> for PhonemeSequence {
    fn from_iter<I: IntoIterator<Item = Viseme>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for PhonemeSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for viseme in self.iter() {
            write!(f, "{viseme}")?;
        }
        Ok(())
    }
}

/// Maps text onto one viseme per non-whitespace character.
///
/// Word boundaries produce no pause, and `h` counts as a teeth shape on its
/// own rather than only as part of `sh`.
pub fn text_to_phonemes(text: &str) -> PhonemeSequence {
    text.to_lowercase()
        .split_whitespace()
        .flat_map(str::chars)
        .map(Viseme::from_char)
        .collect()
}

/// How a playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Every viseme was shown and the mouth closed.
    Completed,
    /// A newer playback or an explicit cancel took over the mouth.
    Superseded,
}

/// Plays viseme sequences on an expression target.
///
/// Only the newest playback animates: starting another one supersedes the
/// previous one at its next wait, and the superseded playback writes nothing
/// further.
pub struct PhonemeLipSync {
    target: ExpressionTarget,
    config: PhonemeConfig,
    active: Mutex<Option<TimedTask>>,
}

impl PhonemeLipSync {
    pub fn new(target: ExpressionTarget) -> Self {
        Self::with_config(target, PhonemeConfig::default())
    }

    pub fn with_config(target: ExpressionTarget, config: PhonemeConfig) -> Self {
        Self {
            target,
            config,
            active: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &ExpressionTarget {
        &self.target
    }

    pub fn config(&self) -> &PhonemeConfig {
        &self.config
    }

    /// Whether a playback is currently in flight.
    pub fn is_playing(&self) -> bool {
        self.lock_active()
            .as_ref()
            .is_some_and(|task| !task.is_cancelled())
    }

    /// Plays `phonemes` over the configured default duration.
    pub async fn play_phonemes(&self, phonemes: &PhonemeSequence) -> PlaybackOutcome {
        self.play_phonemes_for(phonemes, self.config.default_duration())
            .await
    }

    /// Maps `text` to visemes and plays them over the default duration.
    pub async fn play_text(&self, text: &str) -> PlaybackOutcome {
        let phonemes = text_to_phonemes(text);
        tracing::debug!(%phonemes, "playing text");
        self.play_phonemes(&phonemes).await
    }

    /// Shows each viseme for `total / len` and closes the mouth at the end.
    pub async fn play_phonemes_for(
        &self,
        phonemes: &PhonemeSequence,
        total: Duration,
    ) -> PlaybackOutcome {
        let task = self.begin();

        if phonemes.is_empty() {
            self.set_mouth(Viseme::N);
            self.finish(&task);
            return PlaybackOutcome::Completed;
        }

        let schedule = Schedule::uniform(phonemes.iter(), total);
        let clock = PlaybackClock::start();
        tracing::debug!(
            count = schedule.len(),
            total_ms = total.as_millis() as u64,
            "phoneme playback started"
        );

        for event in schedule.events() {
            let shown = task.wait_until(clock.at(event.offset)).await
                && self.show(&task, event.payload);
            if !shown {
                return self.superseded(&task);
            }
        }

        let closed = task.wait_until(clock.at(schedule.total())).await
            && self.show(&task, Viseme::N);
        if !closed {
            return self.superseded(&task);
        }

        self.finish(&task);
        PlaybackOutcome::Completed
    }

    /// Cancels any playback in flight and closes the mouth.
    pub fn cancel(&self) {
        if let Some(task) = self.lock_active().take() {
            task.cancel();
        }
        self.set_mouth(Viseme::N);
    }

    /// Shows a single viseme: every vowel shape drops to 0 and the viseme's
    /// own shape, if it has one, rises to 1.
    pub fn set_mouth(&self, viseme: Viseme) {
        for shape in MouthShape::ALL {
            self.target.set_mouth_weight(shape, 0.0);
        }

        if let Some(shape) = viseme.mouth_shape() {
            self.target.set_mouth_weight(shape, 1.0);
        }
    }

    /// Shows the viseme named by `code`. Unknown codes close the mouth.
    pub fn set_mouth_code(&self, code: &str) {
        let viseme = code.parse().unwrap_or_else(|_| {
            tracing::trace!(code, "unmapped viseme code; closing mouth");
            Viseme::N
        });
        self.set_mouth(viseme);
    }

    fn begin(&self) -> TimedTask {
        let task = TimedTask::new();
        if let Some(previous) = self.lock_active().replace(task.clone()) {
            tracing::debug!(task = previous.id(), "superseding phoneme playback");
            previous.cancel();
        }
        task
    }

    /// Writes `viseme` unless `task` has been superseded. Holds the active
    /// slot so a newer playback cannot cancel in between.
    fn show(&self, task: &TimedTask, viseme: Viseme) -> bool {
        let _active = self.lock_active();
        if task.is_cancelled() {
            return false;
        }
        self.set_mouth(viseme);
        true
    }

    fn finish(&self, task: &TimedTask) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|current| current.id() == task.id()) {
            *active = None;
        }
    }

    fn superseded(&self, task: &TimedTask) -> PlaybackOutcome {
        tracing::debug!(task = task.id(), "phoneme playback superseded");
        self.finish(task);
        PlaybackOutcome::Superseded
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<TimedTask>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PhonemeLipSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhonemeLipSync")
            .field("target", &self.target)
            .field("config", &self.config)
            .field("playing", &self.is_playing())
            .finish()
    }
}
