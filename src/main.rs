use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wavepeek::audio::decoder::SymphoniaOpener;
use wavepeek::audio::engine::CpalDevice;
use wavepeek::audio::source::SourceOpener;
use wavepeek::config::{ExtractorConfig, PlayerConfig};
use wavepeek::player::{PlaybackStatus, Player, PlayerCore, PlayerSnapshot};
use wavepeek::waveform::{spawn_extraction, MinMaxSampler, WaveformExtractor};

#[derive(Parser, Debug)]
#[command(name = "wavepeek", version)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract waveform peaks from a file and print a summary
    Peaks {
        path: PathBuf,

        /// Peaks emitted per second of audio
        #[arg(long, default_value_t = 10)]
        peaks_per_second: u32,

        /// Bytes per read (defaults to one second of audio)
        #[arg(long)]
        chunk_bytes: Option<usize>,

        /// Also sample the last read, which reaches the end of the file
        #[arg(long)]
        include_final_buffer: bool,

        /// Number of columns in the printed envelope
        #[arg(long, default_value_t = 16)]
        columns: usize,
    },

    /// Play a file until it ends
    Play {
        path: PathBuf,

        /// Output volume in [0, 1]
        #[arg(long, default_value_t = 1.0)]
        volume: f32,

        /// Balance in [-1, 1]
        #[arg(long)]
        pan: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wavepeek=info")),
        )
        .init();

    match args.cmd {
        Command::Peaks {
            path,
            peaks_per_second,
            chunk_bytes,
            include_final_buffer,
            columns,
        } => {
            let config = ExtractorConfig {
                chunk_bytes,
                include_final_buffer,
            };
            print_peaks(path, peaks_per_second, config, columns).await
        }
        Command::Play { path, volume, pan } => play(path, volume, pan).await,
    }
}

async fn print_peaks(
    path: PathBuf,
    peaks_per_second: u32,
    config: ExtractorConfig,
    columns: usize,
) -> Result<()> {
    let uri = path.to_string_lossy().to_string();
    let source = tokio::task::spawn_blocking(move || SymphoniaOpener.open(&uri))
        .await
        .context("decoder task failed")??;

    let sampler = MinMaxSampler::new(peaks_per_second);
    let extractor = WaveformExtractor::new(Box::new(sampler), config);
    let waveform = spawn_extraction(extractor, source)
        .join()
        .await
        .with_context(|| format!("extracting {}", path.display()))?;

    println!("file:      {}", path.display());
    println!("duration:  {:.3}s", waveform.total_time().as_secs_f64());
    println!("peaks:     {}", waveform.len());
    if let Some(span) = waveform.duration_per_peak() {
        println!("per peak:  {:.1}ms", span.as_secs_f64() * 1000.0);
    }
    for (i, peak) in waveform.peaks_for_width(columns).iter().enumerate() {
        println!("{i:>4}  {:+.3}  {:+.3}", peak.min, peak.max);
    }
    Ok(())
}

async fn play(path: PathBuf, volume: f32, pan: Option<f32>) -> Result<()> {
    let config = PlayerConfig {
        initial_volume: volume,
        ..PlayerConfig::default()
    };
    let interval = config.poll_interval;
    let core = PlayerCore::new(
        Box::new(SymphoniaOpener),
        Box::new(CpalDevice::new()),
        config,
    );
    let player = Player::new(core, interval);

    let (status_tx, mut status_rx) = tokio::sync::mpsc::unbounded_channel::<PlaybackStatus>();
    player.subscribe(Box::new(move |snap: &PlayerSnapshot| {
        let _ = status_tx.send(snap.status);
    }));

    let uri = path.to_string_lossy().to_string();
    player
        .open(&uri)
        .with_context(|| format!("opening {}", path.display()))?;

    if let Some(pan) = pan {
        if let Err(e) = player.with_core(|c| c.set_pan(pan)) {
            tracing::warn!("ignoring --pan: {e}");
        }
    }

    if !player.play() {
        let reason = player
            .snapshot()
            .last_error
            .unwrap_or_else(|| "player refused to start".into());
        anyhow::bail!("cannot play {}: {reason}", path.display());
    }

    // Observers also saw the Stopped state from before play(); wait for a real end.
    let mut started = false;
    while let Some(status) = status_rx.recv().await {
        match status {
            PlaybackStatus::Playing => started = true,
            PlaybackStatus::Stopped if started => break,
            _ => {}
        }
    }

    if let Some(err) = player.snapshot().last_error {
        anyhow::bail!("playback ended with error: {err}");
    }
    tracing::info!("playback finished");
    Ok(())
}
