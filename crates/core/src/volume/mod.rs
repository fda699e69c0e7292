use std::{fmt, sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;

use crate::{
    audio::{AudioContext, AudioSession},
    config::VolumeConfig,
    expression::{ExpressionTarget, MouthShape},
    Result,
};

/// Lifecycle of a [`VolumeLipSync`] controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LipSyncState {
    Idle,
    Loading,
    Playing,
}

/// Result of a single animation frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// The mouth-open control was updated with `weight`.
    Animated { weight: f32 },
    /// Playback reached the end of the buffer and the controller stopped.
    Finished,
    /// Nothing is playing.
    Idle,
}

impl TickOutcome {
    /// Whether the driver should schedule another frame.
    pub fn is_animating(&self) -> bool {
        matches!(self, TickOutcome::Animated { .. })
    }
}

/// Animates the mouth-open control from the loudness of playing audio.
///
/// The controller holds at most one [`AudioSession`]. Frames are pulled by the
/// host: call [`VolumeLipSync::tick`] once per repaint, or let
/// [`VolumeLipSync::run`] drive it on a timer.
pub struct VolumeLipSync<C: AudioContext + ?Sized> {
    context: Arc<C>,
    target: ExpressionTarget,
    config: VolumeConfig,
    state: LipSyncState,
    session: Option<AudioSession>,
    last_weight: f32,
}

impl<C: AudioContext + ?Sized> VolumeLipSync<C> {
    pub fn new(context: Arc<C>, target: ExpressionTarget) -> Self {
        Self::with_config(context, target, VolumeConfig::default())
    }

    pub fn with_config(context: Arc<C>, target: ExpressionTarget, config: VolumeConfig) -> Self {
        Self {
            context,
            target,
            config,
            state: LipSyncState::Idle,
            session: None,
            last_weight: 0.0,
        }
    }

    pub fn state(&self) -> LipSyncState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == LipSyncState::Playing
    }

    /// Weight most recently written to the mouth-open control.
    pub fn last_weight(&self) -> f32 {
        self.last_weight
    }

    pub fn target(&self) -> &ExpressionTarget {
        &self.target
    }

    /// Replaces the expression target, e.g. once the avatar finished loading.
    pub fn set_target(&mut self, target: ExpressionTarget) {
        self.target = target;
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    /// Loads the audio behind `locator` and starts animating from it.
    ///
    /// A playback already in progress is torn down first. When loading fails
    /// the controller is left idle with the mouth closed and the error is
    /// returned; nothing is retried.
    pub async fn start(&mut self, locator: &str) -> Result<()> {
        if self.state != LipSyncState::Idle || self.session.is_some() {
            self.stop();
        }

        self.state = LipSyncState::Loading;
        tracing::debug!(locator, "loading lip sync audio");

        let source = match self.context.load(locator).await.and_then(|audio| {
            self.context.connect(audio, &self.config.analyser)
        }) {
            Ok(source) => source,
            Err(err) => {
                tracing::error!(locator, error = %err, "lip sync audio could not be started");
                self.stop();
                return Err(err);
            }
        };

        self.session = Some(AudioSession::new(locator, source));
        self.state = LipSyncState::Playing;
        tracing::info!(locator, "lip sync started");

        self.tick();
        Ok(())
    }

    /// Advances the animation by one frame.
    ///
    /// Never fails: analysis errors are logged and end the playback.
    pub fn tick(&mut self) -> TickOutcome {
        if self.state != LipSyncState::Playing {
            return TickOutcome::Idle;
        }

        let Some(session) = self.session.as_mut() else {
            self.stop();
            return TickOutcome::Idle;
        };

        if session.has_ended() {
            tracing::info!(locator = session.locator(), "lip sync audio finished");
            self.stop();
            return TickOutcome::Finished;
        }

        let weight = match session.analyse() {
            Ok(frame) => {
                frame.mouth_weight(self.config.loudness_reference, self.config.max_mouth_weight)
            }
            Err(err) => {
                tracing::warn!(error = %err, "audio analysis failed; stopping lip sync");
                self.stop();
                return TickOutcome::Idle;
            }
        };

        tracing::trace!(weight, "mouth open");
        self.target.set_mouth_weight(MouthShape::OPEN, weight);
        self.last_weight = weight;
        TickOutcome::Animated { weight }
    }

    /// Drives [`VolumeLipSync::tick`] every `frame_interval` until playback
    /// stops.
    pub async fn run(&mut self, frame_interval: Duration) {
        let mut frames = tokio::time::interval(frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            frames.tick().await;
            if !self.tick().is_animating() {
                break;
            }
        }
    }

    /// Stops playback and closes the mouth. Safe to call when idle.
    pub fn stop(&mut self) {
        self.state = LipSyncState::Idle;
        if let Some(session) = self.session.take() {
            tracing::debug!(locator = session.locator(), "closing audio session");
            session.close();
        }

        self.last_weight = 0.0;
        self.target.set_mouth_weight(MouthShape::OPEN, 0.0);
    }
}

impl<C: AudioContext + ?Sized> fmt::Debug for VolumeLipSync<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeLipSync")
            .field("target", &self.target)
            .field("state", &self.state)
            .field("session", &self.session)
            .field("last_weight", &self.last_weight)
            .finish()
    }
}
