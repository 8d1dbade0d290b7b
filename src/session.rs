//! Turn-taking state machine.
//!
//! Responsibilities:
//! - Track the agent state (`disconnected → connecting → listening → processing → speaking`)
//! - Own the current user turn (VAD state, `has_spoken`) and decide when it ends
//! - Buffer agent audio and sequence playback so capture and playback never overlap
//! - Keep the chat transcript and describe every visible change as a render event
//!
//! Notes:
//! - `Session` is synchronous and does no I/O. Every stimulus (a command, a transport event, a
//!   captured frame, the clock) is a method call returning the [`Action`]s the driver must carry
//!   out, in order. See `client::Client` for the driver.
//! - With VAD disabled the session speaks the older server protocol: `start_stream` when
//!   capture starts, and the turn ends when the agent starts answering.

use std::collections::VecDeque;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::opts::Opts;
use crate::pcm::f32_to_pcm16le;
use crate::playback::{Clip, PlaybackQueue};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::render::RenderEvent;
use crate::state::AgentState;
use crate::transcript::{Sender, Transcript};
use crate::vad::{EnergyVad, VadDecision, VadPolicy};
use crate::{Error, Result};

/// Side effects requested by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenTransport,
    CloseTransport,
    StartCapture,
    StopCapture,
    Emit(ClientEvent),
    Play(Clip),
    StopPlayback,
    Render(RenderEvent),
}

/// One user turn: everything captured between a capture start and its stop.
#[derive(Debug, Clone)]
pub struct Turn {
    vad: EnergyVad,
    frames_sent: u64,
}

impl Turn {
    fn new(policy: VadPolicy) -> Self {
        Self {
            vad: EnergyVad::new(policy),
            frames_sent: 0,
        }
    }

    pub fn has_spoken(&self) -> bool {
        self.vad.has_spoken()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn silence_deadline(&self) -> Option<Instant> {
        self.vad.deadline()
    }
}

#[derive(Debug, Clone)]
enum CapturePhase {
    Off,
    /// Capture was requested and the driver has not reported back yet.
    Starting,
    On(Turn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopCause {
    /// Trailing silence, or an explicit end of turn.
    EndOfTurn,
    /// The agent started answering while capture was still running.
    AgentAudio,
}

pub struct Session {
    vad_enabled: bool,
    vad_policy: VadPolicy,
    state: AgentState,
    capture: CapturePhase,
    queue: PlaybackQueue,
    /// Clips completed while another one was still playing.
    ready: VecDeque<Clip>,
    playing: bool,
    transcript: Transcript,
}

impl Session {
    pub fn new(opts: &Opts) -> Self {
        Self {
            vad_enabled: opts.enable_voice_activity_detection,
            vad_policy: opts.vad_policy,
            state: AgentState::Disconnected,
            capture: CapturePhase::Off,
            queue: PlaybackQueue::new(),
            ready: VecDeque::new(),
            playing: false,
            transcript: Transcript::new(opts.transcript_mode),
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// The active turn, while capture is running.
    pub fn turn(&self) -> Option<&Turn> {
        match &self.capture {
            CapturePhase::On(turn) => Some(turn),
            _ => None,
        }
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.capture, CapturePhase::On(_))
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// When the driver should call [`Session::on_silence_timeout`], if at all.
    pub fn silence_deadline(&self) -> Option<Instant> {
        self.turn().and_then(Turn::silence_deadline)
    }

    pub fn connect(&mut self) -> Vec<Action> {
        if self.state != AgentState::Disconnected {
            debug!(state = %self.state, "connect ignored");
            return Vec::new();
        }
        let mut actions = Vec::new();
        self.set_state(AgentState::Connecting, &mut actions);
        actions.push(Action::OpenTransport);
        actions
    }

    pub fn disconnect(&mut self) -> Vec<Action> {
        if self.state == AgentState::Disconnected {
            debug!("disconnect ignored");
            return Vec::new();
        }

        let mut actions = Vec::new();
        match std::mem::replace(&mut self.capture, CapturePhase::Off) {
            CapturePhase::On(turn) => {
                info!(
                    frames = turn.frames_sent,
                    "capture cancelled by disconnect"
                );
                actions.push(Action::StopCapture);
            }
            CapturePhase::Starting => actions.push(Action::StopCapture),
            CapturePhase::Off => {}
        }
        if self.playing {
            self.playing = false;
            actions.push(Action::StopPlayback);
        }
        self.queue.clear();
        self.ready.clear();
        self.transcript.start_turn();

        actions.push(Action::CloseTransport);
        self.set_state(AgentState::Disconnected, &mut actions);
        actions
    }

    /// The single connect/disconnect control.
    pub fn toggle(&mut self) -> Vec<Action> {
        if self.state == AgentState::Disconnected {
            self.connect()
        } else {
            self.disconnect()
        }
    }

    pub fn on_transport_ready(&mut self) -> Vec<Action> {
        match self.state {
            AgentState::Connecting => {
                let mut actions = Vec::new();
                self.request_capture(&mut actions);
                actions
            }
            AgentState::Disconnected => vec![Action::CloseTransport],
            _ => Vec::new(),
        }
    }

    pub fn on_transport_closed(&mut self, reason: Option<&str>) -> Vec<Action> {
        if self.state == AgentState::Disconnected {
            return Vec::new();
        }
        warn!(reason = reason.unwrap_or(""), "transport closed");
        self.disconnect()
    }

    pub fn on_capture_started(&mut self) -> Vec<Action> {
        if !matches!(self.capture, CapturePhase::Starting) {
            debug!("capture started but is no longer wanted");
            return vec![Action::StopCapture];
        }

        self.transcript.start_turn();
        self.capture = CapturePhase::On(Turn::new(self.vad_policy));

        let mut actions = Vec::new();
        self.set_state(AgentState::Listening, &mut actions);
        if !self.vad_enabled {
            actions.push(Action::Emit(ClientEvent::StartStream));
        }
        actions
    }

    /// Capture could not start; the session cannot continue without a microphone.
    pub fn on_capture_failed(&mut self, err: &Error) -> Vec<Action> {
        if !matches!(self.capture, CapturePhase::Starting) {
            return Vec::new();
        }
        self.capture = CapturePhase::Off;
        error!(
            error = %err,
            permission_denied = err.is_permission_denied(),
            "capture failed to start"
        );
        self.disconnect()
    }

    /// The capture stream ended on its own (device unplugged, recording exhausted).
    pub fn on_capture_ended(&mut self) -> Vec<Action> {
        if !self.is_capturing() {
            return Vec::new();
        }
        warn!("capture ended unexpectedly");
        self.disconnect()
    }

    /// Process one captured frame.
    pub fn on_frame(&mut self, samples: &[f32], now: Instant) -> Vec<Action> {
        let CapturePhase::On(turn) = &mut self.capture else {
            return Vec::new();
        };

        if self.vad_enabled && turn.vad.on_frame(samples, now) == VadDecision::EndOfTurn {
            return self.finish_capture(StopCause::EndOfTurn);
        }

        turn.frames_sent += 1;
        vec![Action::Emit(ClientEvent::AudioChunk(f32_to_pcm16le(samples)))]
    }

    /// The silence deadline may have passed.
    pub fn on_silence_timeout(&mut self, now: Instant) -> Vec<Action> {
        let CapturePhase::On(turn) = &mut self.capture else {
            return Vec::new();
        };
        match turn.vad.poll(now) {
            VadDecision::EndOfTurn => self.finish_capture(StopCause::EndOfTurn),
            VadDecision::Continue => Vec::new(),
        }
    }

    /// End the user's turn now.
    ///
    /// A turn without speech is discarded: capture restarts and the server hears nothing.
    pub fn end_turn(&mut self) -> Vec<Action> {
        if !self.is_capturing() {
            return Vec::new();
        }
        self.finish_capture(StopCause::EndOfTurn)
    }

    pub fn on_server_event(&mut self, event: ServerEvent) -> Vec<Action> {
        if self.state == AgentState::Disconnected {
            debug!("dropping server event after disconnect");
            return Vec::new();
        }

        match event {
            ServerEvent::AgentResponse { text } => {
                let id = self.transcript.add_message(Sender::Agent, text.clone());
                vec![Action::Render(RenderEvent::MessageAdded {
                    id,
                    sender: Sender::Agent,
                    text,
                })]
            }
            ServerEvent::TranscriptUpdate {
                transcript,
                is_final,
            } => {
                let (id, created) = self.transcript.update_user_message(&transcript, is_final);
                let text = self
                    .transcript
                    .message(id)
                    .map(|m| m.text.clone())
                    .unwrap_or_default();
                let event = if created {
                    RenderEvent::MessageAdded {
                        id,
                        sender: Sender::User,
                        text,
                    }
                } else {
                    RenderEvent::MessageUpdated { id, text }
                };
                vec![Action::Render(event)]
            }
            ServerEvent::AudioChunk(fragment) => {
                let mut actions = Vec::new();
                if !self.vad_enabled && self.capture_pending_or_on() {
                    actions.extend(self.finish_capture(StopCause::AgentAudio));
                }
                self.queue.push(fragment);
                actions
            }
            ServerEvent::AudioStreamEnd => self.on_stream_end(),
        }
    }

    pub fn on_playback_finished(&mut self, outcome: Result<()>) -> Vec<Action> {
        if !self.playing {
            return Vec::new();
        }
        self.playing = false;
        if let Err(err) = outcome {
            warn!(error = %err, "playback failed");
        }

        let mut actions = Vec::new();
        match self.ready.pop_front() {
            Some(clip) => self.start_playback(clip, &mut actions),
            None => self.request_capture(&mut actions),
        }
        actions
    }

    fn on_stream_end(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.capture_pending_or_on() {
            debug!("agent audio preempts capture");
            actions.extend(self.finish_capture(StopCause::AgentAudio));
        }

        match self.queue.take_clip() {
            Some(clip) if self.playing => self.ready.push_back(clip),
            Some(clip) => self.start_playback(clip, &mut actions),
            None => {
                debug!("audio stream ended without audio");
                if !self.playing {
                    self.request_capture(&mut actions);
                }
            }
        }
        actions
    }

    fn finish_capture(&mut self, cause: StopCause) -> Vec<Action> {
        let turn = match std::mem::replace(&mut self.capture, CapturePhase::Off) {
            CapturePhase::On(turn) => turn,
            CapturePhase::Starting => {
                debug!("pending capture start cancelled");
                return Vec::new();
            }
            CapturePhase::Off => return Vec::new(),
        };

        let notify = !self.vad_enabled || turn.has_spoken();
        info!(
            frames = turn.frames_sent,
            has_spoken = turn.has_spoken(),
            ?cause,
            "capture stopped"
        );

        let mut actions = vec![Action::StopCapture];
        if cause == StopCause::EndOfTurn && !notify {
            debug!("turn had no speech; restarting capture");
            self.request_capture(&mut actions);
            return actions;
        }

        // A preempted turn without speech leaves the next state to the caller.
        if notify {
            actions.push(Action::Emit(ClientEvent::StopStream));
            self.set_state(AgentState::Processing, &mut actions);
        }
        actions
    }

    fn start_playback(&mut self, clip: Clip, actions: &mut Vec<Action>) {
        self.playing = true;
        self.set_state(AgentState::Speaking, actions);
        actions.push(Action::Play(clip));
    }

    fn request_capture(&mut self, actions: &mut Vec<Action>) {
        if matches!(self.capture, CapturePhase::Off) {
            self.capture = CapturePhase::Starting;
            actions.push(Action::StartCapture);
        }
    }

    fn capture_pending_or_on(&self) -> bool {
        !matches!(self.capture, CapturePhase::Off)
    }

    fn set_state(&mut self, next: AgentState, actions: &mut Vec<Action>) {
        if self.state == next {
            return;
        }
        info!(from = %self.state, to = %next, "state changed");
        self.state = next;
        actions.push(Action::Render(RenderEvent::State(next)));
    }
}
