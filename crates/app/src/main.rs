use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use stem_sync_core::{
    BookendAssets, FfmpegCodec, Pipeline, RenderConfig, RenderInputs, SequentialAllocator,
    SpectralAnalyzer,
};
use tracing_subscriber::EnvFilter;

fn main() -> stem_sync_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render(args) => run_render(args),
        Commands::Analyze {
            audio,
            snap_window,
            output,
        } => run_analyze(&audio, snap_window, output.as_deref()),
    }
}

fn run_render(args: RenderArgs) -> stem_sync_core::Result<()> {
    let mut config = match &args.config {
        Some(path) => RenderConfig::from_json_file(path)?,
        None => RenderConfig::default(),
    };
    args.options.apply(&mut config);
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    let seed = config.seed.unwrap_or_else(rand::random);
    tracing::info!(seed, "seeding random source");

    let assets_dir = match args.assets {
        Some(dir) => dir,
        None => install_dir()?,
    };
    let codec = FfmpegCodec::new(config.recording.clone());
    let pipeline = Pipeline::new(SpectralAnalyzer::new(), codec, config)
        .with_bookends(BookendAssets::discover(&assets_dir))
        .with_allocator(SequentialAllocator::new(args.output_dir));

    let inputs = RenderInputs {
        stem_audio: args.stems,
        stem_videos: args.videos,
        free_clips: args.free_clips,
        final_audio: args.final_audio,
        output: args.output,
    };
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let report = pipeline.render(&inputs, &mut rng)?;

    println!("{}", report.output.display());
    println!("{}", report.summary_path.display());
    Ok(())
}

fn run_analyze(
    audio: &Path,
    snap_window: Option<f64>,
    output: Option<&Path>,
) -> stem_sync_core::Result<()> {
    tracing::info!(?audio, "analysing");
    let mut config = RenderConfig::default();
    if let Some(window) = snap_window {
        config.snap_window = window;
    }
    config.validate()?;

    let pipeline = Pipeline::new(SpectralAnalyzer::new(), FfmpegCodec::default(), config);
    let analysis = pipeline.analyze(audio)?;
    let json = serde_json::to_string_pretty(&analysis)?;
    match output {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{json}"),
    }
    Ok(())
}

fn install_dir() -> stem_sync_core::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Beat-synchronised stem video editor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cut the stem videos to the final mix and write the edit.
    Render(RenderArgs),
    /// Print the beats and sections found in an audio file.
    Analyze {
        /// Audio file to analyse.
        audio: PathBuf,
        /// Maximum distance a beat may move toward an onset, in seconds.
        #[arg(long)]
        snap_window: Option<f64>,
        /// Write the analysis here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Isolated stem audio files.
    #[arg(long, num_args = 1.., required = true)]
    stems: Vec<PathBuf>,
    /// One video per stem, named after it.
    #[arg(long, num_args = 1.., required = true)]
    videos: Vec<PathBuf>,
    /// Optional B-roll clips.
    #[arg(long, num_args = 1..)]
    free_clips: Vec<PathBuf>,
    /// The final mixed track.
    #[arg(long)]
    final_audio: Option<PathBuf>,
    /// Output file; a fresh `render_NNN.mp4` is picked when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,
    /// Directory holding `intro.mp4` / `outro.mp4`. Defaults to the
    /// directory of this executable.
    #[arg(long)]
    assets: Option<PathBuf>,
    /// JSON file with render options.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    #[command(flatten)]
    options: OptionArgs,
}

/// Per-option overrides applied on top of the config file.
#[derive(Args, Debug)]
struct OptionArgs {
    #[arg(long)]
    snap_window: Option<f64>,
    #[arg(long)]
    chorus_aggression: Option<f64>,
    #[arg(long)]
    phrase_beats: Option<u32>,
    #[arg(long)]
    downbeat_bias: Option<u32>,
    #[arg(long)]
    cooldown: Option<f64>,
    #[arg(long)]
    free_clip_probability: Option<f64>,
    #[arg(long)]
    intro_min: Option<f64>,
    #[arg(long)]
    outro_min: Option<f64>,
    #[arg(long)]
    vocal_fallback_guard: bool,
}

impl OptionArgs {
    fn apply(&self, config: &mut RenderConfig) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field {
                    config.$field = value;
                })*
            };
        }
        set!(
            snap_window,
            chorus_aggression,
            phrase_beats,
            downbeat_bias,
            cooldown,
            free_clip_probability,
            intro_min,
            outro_min
        );
        if self.vocal_fallback_guard {
            config.vocal_fallback_guard = true;
        }
    }
}
