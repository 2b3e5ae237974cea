// ============================================================================
// MAIN.RS - chipsynth Command Line
// ============================================================================
//
// Commands:
//   chipsynth render <song> [-o out.wav]    render to a WAV file
//   chipsynth play <song>                   play through the audio device
//   chipsynth info <song>                   print a summary of the song
//   chipsynth convert <song> --to json      re-encode as JSON or base64
//
// A song argument is a file holding a song string (optionally a full URL
// ending in '#...') or a JSON document. Defaults for every command come from
// chipsynth.ini; flags override them for one run.
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use chipsynth::audio::{self, WavEncoding};
use chipsynth::player::SongPlayer;
use chipsynth::{Settings, Song, Synth};

/// chipsynth - render and play chiptune songs
#[derive(Parser)]
#[command(name = "chipsynth")]
#[command(about = "Render and play chiptune / FM / noise songs")]
#[command(version)]
struct Cli {
    /// Settings file (created with defaults when missing)
    #[arg(long, global = true, default_value = Settings::FILE_NAME)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a song to a WAV file
    Render(RenderArgs),

    /// Play a song through the default audio device
    Play(PlayArgs),

    /// Print a summary of a song
    Info {
        /// Song file (base64 string or JSON)
        song: PathBuf,
    },

    /// Re-encode a song as JSON or as a song string
    Convert(ConvertArgs),
}

/// Overrides shared by the commands that make sound
#[derive(Args)]
struct SynthArgs {
    /// Output sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Master volume
    #[arg(long)]
    volume: Option<f64>,

    /// Extra passes through the loop (-1 loops forever when playing)
    #[arg(long, allow_negative_numbers = true)]
    repeat: Option<i32>,

    /// Seed for noise start phases
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args)]
struct RenderArgs {
    /// Song file (base64 string or JSON)
    song: PathBuf,

    /// Output file, defaults to the song path with a .wav extension
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write 32-bit float samples instead of 16-bit PCM
    #[arg(long)]
    float: bool,

    /// Scale the result so its peak sits at the configured level
    #[arg(long)]
    normalize: bool,

    /// Seconds of release and reverb tail after the last bar
    #[arg(long)]
    tail: Option<f64>,

    #[command(flatten)]
    synth: SynthArgs,
}

#[derive(Args)]
struct PlayArgs {
    /// Song file (base64 string or JSON)
    song: PathBuf,

    /// Bar to start from
    #[arg(long, default_value_t = 0)]
    bar: usize,

    #[command(flatten)]
    synth: SynthArgs,
}

#[derive(Clone, Copy, ValueEnum)]
enum SongFormat {
    Json,
    Base64,
}

#[derive(Args)]
struct ConvertArgs {
    /// Song file (base64 string or JSON)
    song: PathBuf,

    /// Target format
    #[arg(long, value_enum)]
    to: SongFormat,

    /// Output file, defaults to stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Leave the bars before the loop out of the JSON bar sequence
    #[arg(long)]
    no_intro: bool,

    /// Leave the bars after the loop out of the JSON bar sequence
    #[arg(long)]
    no_outro: bool,

    /// Times the loop is written into the JSON bar sequence
    #[arg(long, default_value_t = 1)]
    loop_count: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load_or_create_at(&cli.settings);

    match cli.command {
        Commands::Render(args) => render(args, settings),
        Commands::Play(args) => play(args, settings),
        Commands::Info { song } => info(&song),
        Commands::Convert(args) => convert(args),
    }
}

fn load_song(path: &Path) -> Result<Song> {
    let mut song = Song::from_file(path).with_context(|| format!("failed to load song {}", path.display()))?;
    song.sanitize();
    tracing::info!(
        path = %path.display(),
        channels = song.channel_count(),
        bars = song.bar_count,
        notes = song.note_count(),
        "loaded song"
    );
    Ok(song)
}

fn apply_overrides(settings: &mut Settings, args: &SynthArgs) {
    if let Some(sample_rate) = args.sample_rate {
        settings.sample_rate = sample_rate.max(1);
    }
    if let Some(volume) = args.volume {
        settings.volume = volume;
    }
    if let Some(repeat) = args.repeat {
        settings.loop_repeat_count = repeat;
    }
    if let Some(seed) = args.seed {
        settings.seed = seed;
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

fn render(args: RenderArgs, mut settings: Settings) -> Result<()> {
    apply_overrides(&mut settings, &args.synth);
    if let Some(tail) = args.tail {
        settings.tail_seconds = tail.max(0.0);
    }
    let song = load_song(&args.song)?;
    let mut synth = Synth::with_song(song, settings.synth_config());

    let mut samples = synth.render_to_buffer(settings.tail_seconds);
    if args.normalize || settings.normalize_audio {
        let gain = audio::normalize_audio(&mut samples, settings.normalize_peak);
        tracing::info!(gain, "normalized");
    }

    let stats = audio::analyze_audio(&samples, settings.sample_rate);
    tracing::info!(
        seconds = stats.duration_seconds,
        peak = stats.peak_amplitude,
        rms = stats.rms_amplitude,
        clipped = stats.clipped_samples,
        "render finished"
    );

    let output = args.output.unwrap_or_else(|| audio::generate_wav_filename(&args.song));
    let encoding = WavEncoding::from_float_flag(args.float || settings.float_wav);
    audio::write_wav_file(&output, &samples, settings.sample_rate, encoding)?;
    println!("Wrote {} ({:.2}s)", output.display(), stats.duration_seconds);
    Ok(())
}

fn play(args: PlayArgs, mut settings: Settings) -> Result<()> {
    apply_overrides(&mut settings, &args.synth);
    let song = load_song(&args.song)?;
    let synth = Synth::with_song(song, settings.synth_config());

    let mut player = SongPlayer::new(synth).with_buffer_frames(settings.buffer_frames);
    player.seek_to_bar(args.bar);
    player.start()?;
    player.play();

    if settings.loop_repeat_count < 0 {
        println!("Looping forever, press Ctrl+C to stop");
    }

    let mut last_bar = usize::MAX;
    while player.is_playing() {
        let bar = player.playhead() as usize;
        if bar != last_bar {
            tracing::debug!(bar, "playing");
            last_bar = bar;
        }
        thread::sleep(Duration::from_millis(50));
    }

    // Let the device drain its last buffer
    thread::sleep(Duration::from_millis(200));
    Ok(())
}

fn info(path: &Path) -> Result<()> {
    let song = load_song(path)?;
    let synth = Synth::with_song(song, Settings::default().synth_config());
    let song = synth.song();

    println!("Song:         {}", path.display());
    println!("Tempo:        {} bpm", song.get_beats_per_minute());
    println!("Beats/bar:    {}", song.beats_per_bar);
    println!("Rhythm:       {}", song.get_rhythm().name);
    println!("Bars:         {} (loop {}..{})", song.bar_count, song.loop_start, song.loop_start + song.loop_length);
    println!("Channels:     {} pitch + {} noise", song.pitch_channel_count, song.noise_channel_count);
    println!("Instruments:  {} per channel", song.instruments_per_channel);
    println!("Patterns:     {} per channel", song.patterns_per_channel);
    println!("Notes:        {}", song.note_count());
    println!("Reverb:       {}", song.reverb);
    println!("Duration:     {:.2}s (once through)", synth.total_seconds());

    for (index, channel) in song.channels.iter().enumerate() {
        let kind = if song.channel_is_noise(index) { "noise" } else { "pitch" };
        let used_bars = channel.bars.iter().filter(|&&bar| bar != 0).count();
        let instruments: Vec<&str> = channel.instruments.iter().map(|instrument| instrument.instrument_type.name()).collect();
        println!("  [{index}] {kind:<5} {used_bars:>3} bars  {}", instruments.join(", "));
    }
    Ok(())
}

fn convert(args: ConvertArgs) -> Result<()> {
    let song = load_song(&args.song)?;
    let text = match args.to {
        SongFormat::Base64 => song.to_base64(),
        SongFormat::Json => {
            let value = song.to_json_value(!args.no_intro, args.loop_count, !args.no_outro);
            serde_json::to_string_pretty(&value).context("failed to format song JSON")?
        }
    };

    match args.output {
        Some(path) => {
            fs::write(&path, format!("{text}\n")).with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "wrote song");
        }
        None => println!("{text}"),
    }
    Ok(())
}
