use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use talkback::capture::{AudioSource, MicrophoneSource, WavSource};
use talkback::opts::{DEFAULT_FRAME_SIZE, DEFAULT_SERVER_URL};
use talkback::playback::{NullPlayer, Player, RodioPlayer};
use talkback::transport::SocketIoConnector;
use talkback::vad::{DEFAULT_VAD_POLICY, VadPolicy};
use talkback::{Client, Command, Opts, OutputType, TranscriptMode};

#[derive(Parser, Debug)]
#[command(name = "talkback")]
#[command(about = "Talk to a voice agent from the terminal")]
#[command(
    after_help = "Commands on stdin: <enter> or `toggle` connects/disconnects, `connect`, \
                  `disconnect`, `done` ends your turn now, `quit` exits."
)]
struct Params {
    /// Base URL of the voice server.
    #[arg(short = 's', long = "server", env = "TALKBACK_SERVER", default_value = DEFAULT_SERVER_URL)]
    server_url: String,

    /// Agent/chat id forwarded to the server.
    #[arg(long = "agent-id", env = "TALKBACK_AGENT_ID")]
    agent_id: Option<String>,

    /// Let the agent decide when you're done talking (older servers).
    #[arg(long = "disable-vad", env = "TALKBACK_DISABLE_VAD")]
    disable_vad: bool,

    /// Speech threshold on the scaled RMS energy of a frame.
    #[arg(long = "threshold", env = "TALKBACK_THRESHOLD", default_value_t = DEFAULT_VAD_POLICY.threshold)]
    threshold: f32,

    /// Trailing silence (milliseconds) that ends your turn.
    #[arg(long = "silence-ms", env = "TALKBACK_SILENCE_MS", default_value_t = DEFAULT_VAD_POLICY.silence.as_millis() as u64)]
    silence_ms: u64,

    /// Samples per captured frame at 16 kHz.
    #[arg(long = "frame-size", env = "TALKBACK_FRAME_SIZE", default_value_t = DEFAULT_FRAME_SIZE)]
    frame_size: usize,

    #[arg(
        long = "transcript-mode",
        env = "TALKBACK_TRANSCRIPT_MODE",
        value_enum,
        default_value_t = TranscriptMode::Replace
    )]
    transcript_mode: TranscriptMode,

    #[arg(
        short = 'o',
        long = "output",
        env = "TALKBACK_OUTPUT",
        value_enum,
        default_value_t = OutputType::Text
    )]
    output_type: OutputType,

    /// Speak from a WAV file instead of the microphone.
    #[arg(short = 'i', long = "input-wav", env = "TALKBACK_INPUT_WAV")]
    input_wav: Option<PathBuf>,

    /// Capture from this input device instead of the system default.
    #[arg(long = "input-device", env = "TALKBACK_INPUT_DEVICE", conflicts_with = "input_wav")]
    input_device: Option<String>,

    /// Print the available input devices and exit.
    #[arg(long = "list-devices")]
    list_devices: bool,

    /// Don't play the agent's audio.
    #[arg(long = "mute", env = "TALKBACK_MUTE")]
    mute: bool,

    /// Wait for a `connect` command instead of connecting at startup.
    #[arg(long = "no-autoconnect", env = "TALKBACK_NO_AUTOCONNECT")]
    no_autoconnect: bool,
}

impl Params {
    fn opts(&self) -> Opts {
        Opts {
            server_url: self.server_url.clone(),
            agent_id: self.agent_id.clone(),
            enable_voice_activity_detection: !self.disable_vad,
            vad_policy: VadPolicy {
                threshold: self.threshold,
                silence: Duration::from_millis(self.silence_ms),
                ..VadPolicy::default()
            },
            frame_size: self.frame_size,
            transcript_mode: self.transcript_mode,
            output_type: self.output_type,
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    talkback::init_logging();

    if let Err(err) = run().await {
        error!(error = ?err, "talkback failed");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let params = Params::parse();
    if params.list_devices {
        for name in MicrophoneSource::list_devices()? {
            println!("{name}");
        }
        return Ok(());
    }
    ensure!(params.frame_size > 0, "--frame-size must be positive");
    let opts = params.opts();

    let connector = SocketIoConnector::new(&opts.server_url, opts.agent_id.as_deref())
        .context("invalid --server")?;

    let source: Box<dyn AudioSource> = match &params.input_wav {
        Some(path) => Box::new(
            WavSource::open(path).with_context(|| format!("cannot use {}", path.display()))?,
        ),
        None => match &params.input_device {
            Some(name) => Box::new(MicrophoneSource::with_device(name.as_str())),
            None => Box::new(MicrophoneSource::new()),
        },
    };
    let player: Box<dyn Player> = if params.mute {
        Box::new(NullPlayer)
    } else {
        Box::new(RodioPlayer::new())
    };
    let renderer = opts.output_type.renderer(io::stdout());

    let mut client = Client::new(&opts, connector, source, player, renderer);

    let (commands_tx, commands_rx) = mpsc::channel(16);
    if !params.no_autoconnect {
        commands_tx.send(Command::Connect).await?;
    }
    spawn_stdin_reader(commands_tx.clone())?;
    tokio::spawn(quit_on_ctrl_c(commands_tx));

    info!(server = %opts.server_url, "talkback ready");
    client.run(commands_rx).await?;
    Ok(())
}

/// Read commands from stdin on a plain thread; tokio's stdin would hold up runtime shutdown.
fn spawn_stdin_reader(commands: mpsc::Sender<Command>) -> Result<()> {
    thread::Builder::new()
        .name("talkback-stdin".to_owned())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                let Some(command) = parse_command(&line) else {
                    warn!(input = line.trim(), "unknown command");
                    continue;
                };
                if commands.blocking_send(command).is_err() || command == Command::Quit {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(())
}

async fn quit_on_ctrl_c(commands: mpsc::Sender<Command>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("interrupted");
        let _ = commands.send(Command::Quit).await;
    }
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "t" | "toggle" => Some(Command::Toggle),
        "c" | "connect" => Some(Command::Connect),
        "d" | "disconnect" => Some(Command::Disconnect),
        "done" | "end" => Some(Command::EndTurn),
        "q" | "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}
