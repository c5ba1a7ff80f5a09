use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use tutor_live::config::file::config_file_path;
use tutor_live::voice::codec::samples_to_wav;
use tutor_live::voice::{
    AudioBuffer, BLOCK_SIZE, Microphone, MicrophoneInput, MessagePart, PLAYBACK_SAMPLE_RATE,
    PlaybackScheduler, SAMPLE_RATE, Sender, SpeakerOutput, TranscriptStore,
};
use tutor_live::{Config, CpalBackend, GeminiConnector, VoiceSession};

/// Tutor - real-time voice conversations with a tutoring assistant
#[derive(Parser)]
#[command(name = "tutor", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Start a voice conversation (default)
    Talk,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the captured audio to a WAV file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Test gapless speaker output
    TestSpeaker,
    /// Print the config file location
    ConfigPath,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,tutor_live=info",
        1 => "info,tutor_live=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Talk) {
        Command::Talk => talk().await,
        Command::TestMic { duration, save } => test_mic(duration, save).await,
        Command::TestSpeaker => test_speaker().await,
        Command::ConfigPath => {
            match config_file_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("no config directory available on this platform"),
            }
            Ok(())
        }
    }
}

/// Prints finished turns to the terminal
struct TerminalTranscript;

impl TranscriptStore for TerminalTranscript {
    fn add_message(&self, sender: Sender, parts: Vec<MessagePart>) {
        let who = match sender {
            Sender::User => "You",
            Sender::Model => "Tutor",
        };
        for text in parts.into_iter().filter_map(|p| p.text) {
            println!("{who}: {text}");
        }
    }
}

/// Run a voice conversation until Ctrl-C
#[allow(clippy::future_not_send)]
async fn talk() -> anyhow::Result<()> {
    let config = Config::load();
    let connector = GeminiConnector::new(&config.live)?;

    let mut session = VoiceSession::new(
        CpalBackend,
        connector,
        config.live.session_setup(),
        Arc::new(TerminalTranscript),
    );

    let mut status_rx = session.signals().subscribe_status();
    let mut notice_rx = session.signals().subscribe_notice();
    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    println!("[{}]", *status_rx.borrow_and_update());
                }
                changed = notice_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(notice) = *notice_rx.borrow_and_update() {
                        eprintln!("! {notice}");
                    }
                }
            }
        }
    });

    session.start().await?;
    println!("Talking with the tutor, press Ctrl-C to stop\n");

    session
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    let notice = session.signals().notice();
    drop(session);
    let _ = printer.await;

    if let Some(notice) = notice {
        anyhow::bail!("{notice}");
    }
    Ok(())
}

/// Test microphone input through the capture framer
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, save: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<f32>>();
    let mut microphone = MicrophoneInput::open(BLOCK_SIZE)?;
    microphone.connect(Box::new(move |block| {
        let _ = tx.send(block.to_vec());
    }));

    println!("Sample rate: {SAMPLE_RATE} Hz, block size: {BLOCK_SIZE}");
    println!("---");

    let mut recording = Vec::new();
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut samples = Vec::new();
        while let Ok(block) = rx.try_recv() {
            samples.extend(block);
        }
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        if save.is_some() {
            recording.extend(samples);
        }
    }

    microphone.stop_tracks();
    microphone.disconnect();

    if let Some(path) = save {
        let wav = samples_to_wav(&recording, SAMPLE_RATE)?;
        std::fs::write(&path, wav)?;
        println!("\nSaved {} samples to {}", recording.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with three back-to-back tones
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear three rising tones with no gaps between them\n");

    let mut scheduler = PlaybackScheduler::new();
    let output = SpeakerOutput::open(scheduler.completion_sender())?;
    scheduler.attach(Box::new(output));

    for frequency in [440.0_f32, 554.37, 659.25] {
        let buffer = AudioBuffer::new(tone(frequency, 0.6), PLAYBACK_SAMPLE_RATE, 1);
        if let Some(chunk) = scheduler.schedule(buffer) {
            println!(
                "{frequency:>7.2} Hz at {:.3}s for {:.3}s",
                chunk.start_at(),
                chunk.duration()
            );
        }
    }

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while !scheduler.is_idle() {
            if scheduler.next_completion().await.is_none() {
                break;
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(remaining = scheduler.active_len(), "playback did not drain in time");
    }
    scheduler.stop_all();

    println!("\n---");
    println!("If you heard the tones, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Sine tone at 30% volume
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tone(frequency: f32, seconds: f32) -> Vec<f32> {
    let sample_rate = PLAYBACK_SAMPLE_RATE as f32;
    let num_samples = (sample_rate * seconds) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect()
}
