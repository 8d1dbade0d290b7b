//! Async driver for a [`Session`].
//!
//! Responsibilities:
//! - Wait on everything that can happen next (user commands, server events, capture frames,
//!   the silence deadline, playback completion) in one `select!` loop
//! - Feed each stimulus to the session and carry out the actions it returns
//!
//! Notes:
//! - Only the sources relevant to the current state are polled: no transport, no event arm;
//!   no capture, no frame arm; no armed deadline, no timer.
//! - Actions run in order. Follow-ups produced while executing an action (e.g. "capture
//!   started" after `StartCapture`) run before the remaining actions of the batch.
//! - If executing an action disconnects the session (a failed send, a refused microphone),
//!   the rest of its batch is dropped except for resource releases.

use std::collections::VecDeque;
use std::future::pending;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::capture::{AudioSource, Capture};
use crate::opts::Opts;
use crate::playback::{Playback, Player};
use crate::render::Renderer;
use crate::session::{Action, Session};
use crate::state::AgentState;
use crate::transport::{Connection, Connector, Transport, TransportEvent};

/// What the user asks of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Disconnect,
    /// Connect when disconnected, disconnect otherwise.
    Toggle,
    /// End the user's turn without waiting for trailing silence.
    EndTurn,
    /// Disconnect and stop the client loop.
    Quit,
}

enum Step {
    Command(Command),
    Transport(Option<TransportEvent>),
    Frame(Option<Vec<f32>>),
    SilenceTimeout,
    PlaybackDone(Result<()>),
}

/// A voice client: a [`Session`] wired to a connector, an audio source, a player and a
/// renderer.
pub struct Client<C: Connector, S, P, R> {
    session: Session,
    frame_size: usize,

    connector: C,
    source: S,
    player: P,
    renderer: R,

    transport: Option<C::Transport>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    capture: Option<Capture>,
    playback: Option<Playback>,
}

impl<C, S, P, R> Client<C, S, P, R>
where
    C: Connector,
    S: AudioSource,
    P: Player,
    R: Renderer,
{
    pub fn new(opts: &Opts, connector: C, source: S, player: P, renderer: R) -> Self {
        Self {
            session: Session::new(opts),
            frame_size: opts.frame_size,
            connector,
            source,
            player,
            renderer,
            transport: None,
            events: None,
            capture: None,
            playback: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run until [`Command::Quit`] arrives or the command channel closes.
    ///
    /// On the way out the session is disconnected, so the microphone, the output device and
    /// the socket are all released.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>) -> Result<()> {
        info!(state = %self.session.state(), "client started");
        loop {
            let deadline = self.session.silence_deadline();
            let step = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Quit) | None => break,
                    Some(command) => Step::Command(command),
                },
                event = recv_event(&mut self.events), if self.events.is_some() => {
                    Step::Transport(event)
                }
                frame = next_frame(&mut self.capture), if self.capture.is_some() => {
                    Step::Frame(frame)
                }
                () = sleep_until(deadline), if deadline.is_some() => Step::SilenceTimeout,
                outcome = wait_playback(&mut self.playback), if self.playback.is_some() => {
                    Step::PlaybackDone(outcome)
                }
            };

            let actions = self.dispatch(step);
            self.execute(actions).await?;
        }

        info!("client stopping");
        let actions = self.session.disconnect();
        self.execute(actions).await?;
        self.renderer.close()
    }

    fn dispatch(&mut self, step: Step) -> Vec<Action> {
        match step {
            Step::Command(command) => {
                debug!(?command, "command");
                match command {
                    Command::Connect => self.session.connect(),
                    Command::Disconnect => self.session.disconnect(),
                    Command::Toggle => self.session.toggle(),
                    Command::EndTurn => self.session.end_turn(),
                    Command::Quit => Vec::new(),
                }
            }
            Step::Transport(Some(TransportEvent::Server(event))) => {
                self.session.on_server_event(event)
            }
            Step::Transport(Some(TransportEvent::Closed { reason })) => {
                self.events = None;
                self.session.on_transport_closed(reason.as_deref())
            }
            Step::Transport(None) => {
                self.events = None;
                self.session.on_transport_closed(Some("event stream ended"))
            }
            Step::Frame(Some(frame)) => self.session.on_frame(&frame, Instant::now()),
            Step::Frame(None) => {
                self.capture = None;
                self.session.on_capture_ended()
            }
            Step::SilenceTimeout => self.session.on_silence_timeout(Instant::now()),
            Step::PlaybackDone(outcome) => {
                self.playback = None;
                self.session.on_playback_finished(outcome)
            }
        }
    }

    async fn execute(&mut self, actions: Vec<Action>) -> Result<()> {
        let mut queue: VecDeque<Action> = actions.into();
        while let Some(action) = queue.pop_front() {
            let was_connected = self.session.state() != AgentState::Disconnected;
            let follow_up = self.apply(action).await?;

            // A failure that disconnected the session voids the rest of the batch; only
            // releases still run.
            if was_connected && self.session.state() == AgentState::Disconnected {
                let before = queue.len();
                queue.retain(releases_resources);
                if queue.len() < before {
                    debug!(dropped = before - queue.len(), "discarding actions after disconnect");
                }
            }
            for action in follow_up.into_iter().rev() {
                queue.push_front(action);
            }
        }
        Ok(())
    }

    async fn apply(&mut self, action: Action) -> Result<Vec<Action>> {
        let follow_up = match action {
            Action::OpenTransport => match self.connector.connect().await {
                Ok(Connection { transport, events }) => {
                    self.transport = Some(transport);
                    self.events = Some(events);
                    self.session.on_transport_ready()
                }
                Err(err) => {
                    error!(error = %err, "failed to connect");
                    self.session.on_transport_closed(Some(&err.to_string()))
                }
            },
            Action::CloseTransport => {
                if let Some(mut transport) = self.transport.take() {
                    transport.close();
                }
                self.events = None;
                Vec::new()
            }
            Action::StartCapture => match self.source.start(self.frame_size) {
                Ok(capture) => {
                    self.capture = Some(capture);
                    self.session.on_capture_started()
                }
                Err(err) => self.session.on_capture_failed(&err),
            },
            Action::StopCapture => {
                if let Some(capture) = self.capture.take() {
                    capture.stop();
                }
                Vec::new()
            }
            Action::Emit(event) => match self.transport.as_mut() {
                Some(transport) => match transport.send(event) {
                    Ok(()) => Vec::new(),
                    Err(err) => {
                        warn!(error = %err, "failed to send event");
                        self.session.on_transport_closed(Some(&err.to_string()))
                    }
                },
                None => {
                    debug!(event = event.name(), "no transport; dropping event");
                    Vec::new()
                }
            },
            Action::Play(clip) => match self.player.play(clip) {
                Ok(playback) => {
                    self.playback = Some(playback);
                    Vec::new()
                }
                Err(err) => self.session.on_playback_finished(Err(err)),
            },
            Action::StopPlayback => {
                if let Some(playback) = self.playback.take() {
                    playback.stop();
                }
                Vec::new()
            }
            Action::Render(event) => {
                self.renderer.render(&event)?;
                Vec::new()
            }
        };
        Ok(follow_up)
    }
}

fn releases_resources(action: &Action) -> bool {
    matches!(
        action,
        Action::StopCapture | Action::StopPlayback | Action::CloseTransport
    )
}

async fn recv_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => pending().await,
    }
}

async fn next_frame(capture: &mut Option<Capture>) -> Option<Vec<f32>> {
    match capture {
        Some(capture) => capture.next_frame().await,
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn wait_playback(playback: &mut Option<Playback>) -> Result<()> {
    match playback {
        Some(playback) => playback.wait().await,
        None => pending().await,
    }
}
