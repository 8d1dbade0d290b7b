use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use talkback::capture::{AudioSource, Capture, FRAME_QUEUE_DEPTH};
use talkback::playback::{Clip, Playback, Player};
use talkback::protocol::{ClientEvent, ServerEvent};
use talkback::render::{RenderEvent, Renderer};
use talkback::transcript::Sender;
use talkback::transport::{Connection, Connector, Transport, TransportEvent};
use talkback::{AgentState, Client, Command, Error, Opts};

const FRAME: usize = 4096;

/// Shared view of the fake server side of the socket.
#[derive(Default)]
struct Wire {
    sent: Mutex<Vec<ClientEvent>>,
    /// Sending this event fails as if the socket had broken.
    broken_on: Mutex<Option<ClientEvent>>,
    server: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl Wire {
    fn sent(&self) -> Vec<ClientEvent> {
        self.sent.lock().unwrap().clone()
    }

    fn push(&self, event: TransportEvent) {
        let server = self.server.lock().unwrap();
        server.as_ref().expect("connected").send(event).unwrap();
    }
}

struct FakeConnector {
    wire: Arc<Wire>,
}

struct FakeTransport {
    wire: Arc<Wire>,
}

impl Connector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect(&mut self) -> talkback::Result<Connection<FakeTransport>> {
        let (tx, events) = mpsc::unbounded_channel();
        *self.wire.server.lock().unwrap() = Some(tx);
        self.wire.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Connection {
            transport: FakeTransport {
                wire: Arc::clone(&self.wire),
            },
            events,
        })
    }
}

impl Transport for FakeTransport {
    fn send(&mut self, event: ClientEvent) -> talkback::Result<()> {
        if self.wire.broken_on.lock().unwrap().as_ref() == Some(&event) {
            return Err(Error::Transport("broken pipe".to_owned()));
        }
        self.wire.sent.lock().unwrap().push(event);
        Ok(())
    }

    fn close(&mut self) {
        self.wire.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A microphone the test speaks into.
#[derive(Clone, Default)]
struct Mic {
    feed: Arc<Mutex<Option<mpsc::Sender<Vec<f32>>>>>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    denied: bool,
}

impl Mic {
    fn denied() -> Self {
        Self {
            denied: true,
            ..Self::default()
        }
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn feed(&self) -> mpsc::Sender<Vec<f32>> {
        self.feed.lock().unwrap().clone().expect("capture started")
    }
}

impl AudioSource for Mic {
    fn start(&mut self, frame_size: usize) -> talkback::Result<Capture> {
        assert_eq!(frame_size, FRAME);
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.denied {
            return Err(Error::PermissionDenied("not allowed".to_owned()));
        }
        let (tx, rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        *self.feed.lock().unwrap() = Some(tx);
        let stops = Arc::clone(&self.stops);
        Ok(Capture::new(rx, move || {
            stops.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// Records clips and "plays" them instantly.
#[derive(Clone, Default)]
struct Speaker {
    clips: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Player for Speaker {
    fn play(&mut self, clip: Clip) -> talkback::Result<Playback> {
        self.clips.lock().unwrap().push(clip.into_bytes());
        Ok(Playback::finished())
    }
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<RenderEvent>>>,
    closed: Arc<AtomicBool>,
}

impl Recorder {
    fn states(&self) -> Vec<AgentState> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                RenderEvent::State(state) => Some(*state),
                _ => None,
            })
            .collect()
    }
}

impl Renderer for Recorder {
    fn render(&mut self, event: &RenderEvent) -> talkback::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn close(&mut self) -> talkback::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    wire: Arc<Wire>,
    mic: Mic,
    speaker: Speaker,
    recorder: Recorder,
    client: Client<FakeConnector, Mic, Speaker, Recorder>,
}

fn harness(opts: Opts, mic: Mic) -> Harness {
    let wire = Arc::new(Wire::default());
    let speaker = Speaker::default();
    let recorder = Recorder::default();
    let client = Client::new(
        &opts,
        FakeConnector {
            wire: Arc::clone(&wire),
        },
        mic.clone(),
        speaker.clone(),
        recorder.clone(),
    );
    Harness {
        wire,
        mic,
        speaker,
        recorder,
        client,
    }
}

/// Let the client loop run until `ready` holds.
async fn until(mut ready: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if ready() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never became true");
}

fn frame(amplitude: f32) -> Vec<f32> {
    (0..FRAME)
        .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
        .collect()
}

fn audio_chunks(sent: &[ClientEvent]) -> Vec<usize> {
    sent.iter()
        .filter_map(|event| match event {
            ClientEvent::AudioChunk(bytes) => Some(bytes.len()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn trailing_silence_ends_the_turn() -> anyhow::Result<()> {
    let Harness {
        wire,
        mic,
        recorder,
        mut client,
        ..
    } = harness(Opts::default(), Mic::default());
    let (commands, rx) = mpsc::channel(8);

    let script = async {
        commands.send(Command::Connect).await?;
        until(|| mic.starts() == 1).await;
        let feed = mic.feed();

        feed.send(frame(0.5)).await?;
        // Quiet frames every 256 ms; the 1.5 s timer armed by the first one fires before the
        // seventh arrives.
        for _ in 0..7 {
            tokio::time::sleep(Duration::from_millis(256)).await;
            let _ = feed.send(frame(0.0)).await;
        }
        until(|| mic.stops() == 1).await;
        commands.send(Command::Quit).await?;
        anyhow::Ok(())
    };

    let (run, script) = tokio::join!(client.run(rx), script);
    run?;
    script?;

    let sent = wire.sent();
    assert_eq!(audio_chunks(&sent), vec![FRAME * 2; 7]);
    assert_eq!(
        sent.iter()
            .filter(|event| **event == ClientEvent::StopStream)
            .count(),
        1
    );
    assert_eq!(sent.last(), Some(&ClientEvent::StopStream));
    assert!(!sent.contains(&ClientEvent::StartStream));

    assert_eq!(
        recorder.states(),
        vec![
            AgentState::Connecting,
            AgentState::Listening,
            AgentState::Processing,
            AgentState::Disconnected,
        ]
    );
    assert_eq!(mic.starts(), 1);
    assert_eq!(mic.stops(), 1);
    assert_eq!(wire.closes.load(Ordering::SeqCst), 1);
    assert!(recorder.closed.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn silent_turn_is_discarded_and_capture_restarts() -> anyhow::Result<()> {
    let Harness {
        wire,
        mic,
        mut client,
        ..
    } = harness(Opts::default(), Mic::default());
    let (commands, rx) = mpsc::channel(8);

    let script = async {
        commands.send(Command::Connect).await?;
        until(|| mic.starts() == 1).await;
        mic.feed().send(frame(0.0)).await?;
        until(|| wire.sent().len() == 1).await;

        commands.send(Command::EndTurn).await?;
        until(|| mic.starts() == 2).await;
        commands.send(Command::Quit).await?;
        anyhow::Ok(())
    };

    let (run, script) = tokio::join!(client.run(rx), script);
    run?;
    script?;

    assert_eq!(wire.sent(), vec![ClientEvent::AudioChunk(vec![0; FRAME * 2])]);
    assert_eq!(mic.stops(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn agent_audio_plays_and_capture_resumes() -> anyhow::Result<()> {
    let Harness {
        wire,
        mic,
        speaker,
        recorder,
        mut client,
    } = harness(Opts::default(), Mic::default());
    let (commands, rx) = mpsc::channel(8);

    let script = async {
        commands.send(Command::Connect).await?;
        until(|| mic.starts() == 1).await;
        mic.feed().send(frame(0.5)).await?;
        until(|| wire.sent().len() == 1).await;

        commands.send(Command::EndTurn).await?;
        until(|| wire.sent().contains(&ClientEvent::StopStream)).await;

        wire.push(TransportEvent::Server(ServerEvent::TranscriptUpdate {
            transcript: "what time is it".to_owned(),
            is_final: true,
        }));
        wire.push(TransportEvent::Server(ServerEvent::AgentResponse {
            text: "half past nine".to_owned(),
        }));
        wire.push(TransportEvent::Server(ServerEvent::AudioChunk(vec![1, 2])));
        wire.push(TransportEvent::Server(ServerEvent::AudioChunk(vec![3])));
        wire.push(TransportEvent::Server(ServerEvent::AudioStreamEnd));

        until(|| mic.starts() == 2).await;
        commands.send(Command::Quit).await?;
        anyhow::Ok(())
    };

    let (run, script) = tokio::join!(client.run(rx), script);
    run?;
    script?;

    assert_eq!(*speaker.clips.lock().unwrap(), vec![vec![1, 2, 3]]);
    assert_eq!(
        recorder.states(),
        vec![
            AgentState::Connecting,
            AgentState::Listening,
            AgentState::Processing,
            AgentState::Speaking,
            AgentState::Listening,
            AgentState::Disconnected,
        ]
    );

    let events = recorder.events.lock().unwrap();
    let bubbles: Vec<(Sender, &str)> = events
        .iter()
        .filter_map(|event| match event {
            RenderEvent::MessageAdded { sender, text, .. } => Some((*sender, text.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(
        bubbles,
        vec![
            (Sender::User, "what time is it"),
            (Sender::Agent, "half past nine"),
        ]
    );
    assert_eq!(client.session().transcript().messages().len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_send_abandons_the_rest_of_the_turn() -> anyhow::Result<()> {
    let Harness {
        wire,
        mic,
        speaker,
        recorder,
        mut client,
    } = harness(Opts::default(), Mic::default());
    *wire.broken_on.lock().unwrap() = Some(ClientEvent::StopStream);
    let (commands, rx) = mpsc::channel(8);

    let script = async {
        commands.send(Command::Connect).await?;
        until(|| mic.starts() == 1).await;
        mic.feed().send(frame(0.5)).await?;
        until(|| wire.sent().len() == 1).await;

        // The greeting preempts the spoken turn; its stop_stream hits the broken socket.
        wire.push(TransportEvent::Server(ServerEvent::AudioChunk(vec![7])));
        wire.push(TransportEvent::Server(ServerEvent::AudioStreamEnd));
        until(|| wire.closes.load(Ordering::SeqCst) == 1).await;
        commands.send(Command::Quit).await?;
        anyhow::Ok(())
    };

    let (run, script) = tokio::join!(client.run(rx), script);
    run?;
    script?;

    assert_eq!(client.session().state(), AgentState::Disconnected);
    assert_eq!(
        recorder.states(),
        vec![
            AgentState::Connecting,
            AgentState::Listening,
            AgentState::Disconnected,
        ]
    );
    assert!(speaker.clips.lock().unwrap().is_empty());
    assert_eq!(mic.starts(), 1);
    assert_eq!(mic.stops(), 1);
    assert_eq!(wire.closes.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn denied_microphone_disconnects() -> anyhow::Result<()> {
    let Harness {
        wire,
        mic,
        recorder,
        mut client,
        ..
    } = harness(Opts::default(), Mic::denied());
    let (commands, rx) = mpsc::channel(8);

    commands.send(Command::Connect).await?;
    commands.send(Command::Quit).await?;
    client.run(rx).await?;

    assert_eq!(
        recorder.states(),
        vec![AgentState::Connecting, AgentState::Disconnected]
    );
    assert_eq!(mic.starts(), 1);
    assert_eq!(wire.connects.load(Ordering::SeqCst), 1);
    assert_eq!(wire.closes.load(Ordering::SeqCst), 1);
    assert!(wire.sent().is_empty());
    assert_eq!(client.session().state(), AgentState::Disconnected);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn server_close_releases_the_microphone() -> anyhow::Result<()> {
    let Harness {
        wire,
        mic,
        recorder,
        mut client,
        ..
    } = harness(Opts::default(), Mic::default());
    let (commands, rx) = mpsc::channel(8);

    let script = async {
        commands.send(Command::Connect).await?;
        until(|| mic.starts() == 1).await;
        wire.push(TransportEvent::Closed {
            reason: Some("server disconnected".to_owned()),
        });
        until(|| mic.stops() == 1).await;
        commands.send(Command::Quit).await?;
        anyhow::Ok(())
    };

    let (run, script) = tokio::join!(client.run(rx), script);
    run?;
    script?;

    assert_eq!(
        recorder.states(),
        vec![
            AgentState::Connecting,
            AgentState::Listening,
            AgentState::Disconnected,
        ]
    );
    assert_eq!(mic.stops(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn toggle_reconnects_after_disconnect() -> anyhow::Result<()> {
    let Harness {
        wire,
        mic,
        recorder,
        mut client,
        ..
    } = harness(Opts::default(), Mic::default());
    let (commands, rx) = mpsc::channel(8);

    let script = async {
        commands.send(Command::Toggle).await?;
        until(|| mic.starts() == 1).await;
        commands.send(Command::Toggle).await?;
        until(|| mic.stops() == 1).await;
        commands.send(Command::Toggle).await?;
        until(|| mic.starts() == 2).await;
        commands.send(Command::Quit).await?;
        anyhow::Ok(())
    };

    let (run, script) = tokio::join!(client.run(rx), script);
    run?;
    script?;

    assert_eq!(wire.connects.load(Ordering::SeqCst), 2);
    assert_eq!(wire.closes.load(Ordering::SeqCst), 2);
    assert_eq!(
        recorder.states(),
        vec![
            AgentState::Connecting,
            AgentState::Listening,
            AgentState::Disconnected,
            AgentState::Connecting,
            AgentState::Listening,
            AgentState::Disconnected,
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn legacy_mode_lets_the_agent_end_the_turn() -> anyhow::Result<()> {
    let opts = Opts {
        enable_voice_activity_detection: false,
        ..Opts::default()
    };
    let Harness {
        wire,
        mic,
        speaker,
        mut client,
        ..
    } = harness(opts, Mic::default());
    let (commands, rx) = mpsc::channel(8);

    let script = async {
        commands.send(Command::Connect).await?;
        until(|| mic.starts() == 1).await;
        mic.feed().send(frame(0.0)).await?;
        until(|| wire.sent().len() == 2).await;

        wire.push(TransportEvent::Server(ServerEvent::AudioChunk(vec![9])));
        wire.push(TransportEvent::Server(ServerEvent::AudioStreamEnd));
        until(|| mic.starts() == 2).await;
        commands.send(Command::Quit).await?;
        anyhow::Ok(())
    };

    let (run, script) = tokio::join!(client.run(rx), script);
    run?;
    script?;

    assert_eq!(
        wire.sent(),
        vec![
            ClientEvent::StartStream,
            ClientEvent::AudioChunk(vec![0; FRAME * 2]),
            ClientEvent::StopStream,
            ClientEvent::StartStream,
        ]
    );
    assert_eq!(*speaker.clips.lock().unwrap(), vec![vec![9]]);
    assert_eq!(mic.stops(), 2);
    Ok(())
}
