use std::{path::PathBuf, sync::Arc, time::Duration};

use avatar_lipsync_core::{
    text_to_phonemes, Avatar, BlendShapeProxy, ExpressionManager, ExpressionTarget,
    LipSyncConfig, PhonemeLipSync, SoftwareAudioContext, VolumeLipSync,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> avatar_lipsync_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => LipSyncConfig::load(path)?,
        None => LipSyncConfig::default(),
    };

    match cli.command {
        Commands::Volume {
            locator,
            schema,
            fps,
        } => run_volume(config, &locator, schema, fps).await,
        Commands::Phonemes {
            text,
            duration_ms,
            schema,
        } => run_phonemes(config, &text, duration_ms, schema).await,
    }
}

async fn run_volume(
    config: LipSyncConfig,
    locator: &str,
    schema: Schema,
    fps: Option<u32>,
) -> avatar_lipsync_core::Result<()> {
    let frame_interval = fps
        .filter(|fps| *fps > 0)
        .map(|fps| Duration::from_secs_f64(1.0 / f64::from(fps)))
        .unwrap_or_else(|| config.volume.frame_interval());
    tracing::info!(locator, ?schema, ?frame_interval, "starting volume lip sync");

    let context: Arc<SoftwareAudioContext> = Arc::new(SoftwareAudioContext::default());
    let target = ExpressionTarget::detect(&ConsoleAvatar::new(schema));
    let mut lip_sync = VolumeLipSync::with_config(context, target, config.volume);

    lip_sync.start(locator).await?;
    lip_sync.run(frame_interval).await;

    tracing::info!("volume lip sync finished");
    Ok(())
}

async fn run_phonemes(
    config: LipSyncConfig,
    text: &str,
    duration_ms: Option<u64>,
    schema: Schema,
) -> avatar_lipsync_core::Result<()> {
    let phonemes = text_to_phonemes(text);
    let total = duration_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.phoneme.default_duration());
    tracing::info!(%phonemes, ?schema, ?total, "starting phoneme lip sync");

    let target = ExpressionTarget::detect(&ConsoleAvatar::new(schema));
    let lip_sync = PhonemeLipSync::with_config(target, config.phoneme);
    let outcome = lip_sync.play_phonemes_for(&phonemes, total).await;

    tracing::info!(?outcome, "phoneme lip sync finished");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Stand-in avatar that logs every control write.
#[derive(Debug, Clone, Copy)]
struct ConsoleAvatar {
    schema: Schema,
}

impl ConsoleAvatar {
    fn new(schema: Schema) -> Self {
        Self { schema }
    }
}

impl Avatar for ConsoleAvatar {
    fn expression_manager(&self) -> Option<Arc<dyn ExpressionManager>> {
        (self.schema == Schema::ExpressionManager)
            .then(|| Arc::new(ConsoleControls("expression")) as Arc<dyn ExpressionManager>)
    }

    fn blend_shape_proxy(&self) -> Option<Arc<dyn BlendShapeProxy>> {
        (self.schema == Schema::BlendShapeProxy)
            .then(|| Arc::new(ConsoleControls("blend-shape")) as Arc<dyn BlendShapeProxy>)
    }
}

struct ConsoleControls(&'static str);

impl ExpressionManager for ConsoleControls {
    fn set_value(&self, name: &str, weight: f32) -> avatar_lipsync_core::Result<()> {
        tracing::info!(schema = self.0, name, weight, "set control");
        Ok(())
    }
}

impl BlendShapeProxy for ConsoleControls {
    fn set_value(&self, name: &str, weight: f32) -> avatar_lipsync_core::Result<()> {
        tracing::info!(schema = self.0, name, weight, "set control");
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Avatar lip sync demo", long_about = None)]
struct Cli {
    /// Optional JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Animate the mouth from the loudness of an audio file.
    Volume {
        /// Path or `file://` URL of the audio to play.
        locator: String,
        /// Control schema the simulated avatar exposes.
        #[arg(short, long, value_enum, default_value_t = Schema::ExpressionManager)]
        schema: Schema,
        /// Frames per second; defaults to the configured frame interval.
        #[arg(long)]
        fps: Option<u32>,
    },
    /// Animate the mouth from text.
    Phonemes {
        /// Text to lip sync.
        text: String,
        /// Total playback time in milliseconds.
        #[arg(short, long)]
        duration_ms: Option<u64>,
        /// Control schema the simulated avatar exposes.
        #[arg(short, long, value_enum, default_value_t = Schema::ExpressionManager)]
        schema: Schema,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Schema {
    ExpressionManager,
    BlendShapeProxy,
    /// The avatar has not loaded; writes are dropped.
    None,
}
