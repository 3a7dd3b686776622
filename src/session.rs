//! Session controller
//!
//! One session owns one capture stream, one transport, and the lifecycle
//! state machine. Everything runs on a single loop task (the single-writer
//! invariant): user commands, transport events and audio blocks are all
//! funneled into the same `select!` and handled sequentially, so no locking
//! is needed around session state.
//!
//! ```text
//! SessionHandle ──commands──▶ ┌──────────────────────────────┐
//! capture thread ──blocks──▶  │ session loop                 │──▶ TranscriptSink
//! reader task ──transcripts─▶ │  reduce() + execute effects  │──▶ error channel
//!                             └──────────────────────────────┘──▶ state watch
//! ```
//!
//! Audio path while recording: each captured block is downsampled to 16 kHz,
//! encoded to int16 PCM and sent as one binary frame, in callback order.
//! There is no backpressure and no retry queue; blocks that cannot be sent
//! are dropped.

use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::audio::{downsample, encode, start_capture, CaptureHandle, TARGET_SAMPLE_RATE};
use crate::protocol::{build_config_message, encode_frame, SessionConfig};
use crate::state_machine::{reduce, Effect, Event, RecordingOptions, SessionError, State};
use crate::transcript::TranscriptSink;
use crate::transport::{ServerEvent, Transport};

const EVENT_QUEUE_CAPACITY: usize = 64;
const BLOCK_QUEUE_CAPACITY: usize = 32;
const ERROR_QUEUE_CAPACITY: usize = 16;

/// Handle for driving a session from outside the loop.
///
/// Command methods return once the loop has run the command through the
/// reducer and published the resulting state, so a state read immediately
/// afterwards always reflects the command and never a stale pre-command
/// value. Outcomes of the work a command kicked off arrive later as further
/// state changes (observable via [`SessionHandle::state`] /
/// [`SessionHandle::wait_for`]) and as [`SessionError`] notifications on the
/// channel returned by [`spawn_session`].
#[derive(Clone)]
pub struct SessionHandle {
    commands_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<State>,
}

impl SessionHandle {
    pub async fn connect(&self, address: impl Into<String>) {
        self.dispatch(Event::ConnectRequested {
            address: address.into(),
        })
        .await;
    }

    pub async fn start_recording(&self, options: RecordingOptions) {
        self.dispatch(Event::StartRequested { options }).await;
    }

    pub async fn stop_recording(&self) {
        self.dispatch(Event::StopRequested).await;
    }

    pub async fn disconnect(&self) {
        self.dispatch(Event::DisconnectRequested).await;
    }

    /// Current session state.
    pub fn state(&self) -> State {
        self.state_rx.borrow().clone()
    }

    /// Wait until the state satisfies `pred`. Returns `None` if the session
    /// loop has exited.
    pub async fn wait_for(&mut self, pred: impl FnMut(&State) -> bool) -> Option<State> {
        match self.state_rx.wait_for(pred).await {
            Ok(state) => Some(state.clone()),
            Err(_) => None,
        }
    }

    async fn dispatch(&self, event: Event) {
        let (done_tx, done_rx) = oneshot::channel();
        let command = Command {
            event,
            done: done_tx,
        };

        if self.commands_tx.send(command).await.is_err() {
            log::warn!("Session: loop has exited, dropping command");
            return;
        }

        // Wait for the loop's acknowledgment; if the loop exits first the
        // sender is dropped and this resolves anyway.
        let _ = done_rx.await;
    }
}

/// A user command plus the acknowledgment fired once the loop has run it
/// through the reducer and published the resulting state.
struct Command {
    event: Event,
    done: oneshot::Sender<()>,
}

/// Spawn a session loop onto the current tokio runtime.
///
/// Returns the control handle and the channel on which failures are
/// reported. The loop exits when every handle has been dropped.
pub fn spawn_session(
    sink: Box<dyn TranscriptSink>,
) -> (SessionHandle, mpsc::Receiver<SessionError>) {
    let (commands_tx, commands_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (errors_tx, errors_rx) = mpsc::channel(ERROR_QUEUE_CAPACITY);
    let (state_tx, state_rx) = watch::channel(State::Idle);
    let (capture_done_tx, capture_done_rx) = mpsc::channel(4);

    let session = SessionLoop {
        state: State::Idle,
        pending: VecDeque::new(),
        transport: None,
        server_rx: None,
        capture: None,
        blocks_rx: None,
        capture_rate: 0,
        config_sent: false,
        sink,
        errors_tx,
        state_tx,
        capture_done_tx,
        capture_done_rx,
    };

    tokio::spawn(session.run(commands_rx));

    (
        SessionHandle {
            commands_tx,
            state_rx,
        },
        errors_rx,
    )
}

/// Result of an in-flight device acquisition, delivered back to the loop.
enum CaptureOutcome {
    Ready {
        id: Uuid,
        handle: CaptureHandle,
        blocks_rx: mpsc::Receiver<Vec<f32>>,
    },
    Failed {
        id: Uuid,
        err: String,
    },
}

struct SessionLoop {
    state: State,
    /// Events produced while handling an event or effect; drained before
    /// polling external sources so completions cannot interleave with fresh
    /// commands or audio.
    pending: VecDeque<Event>,
    transport: Option<Transport>,
    server_rx: Option<mpsc::Receiver<ServerEvent>>,
    capture: Option<CaptureHandle>,
    blocks_rx: Option<mpsc::Receiver<Vec<f32>>>,
    /// Native rate of the active capture device.
    capture_rate: u32,
    /// Whether the config message has gone out on the current connection.
    /// Audio frames are gated on this: config always precedes audio.
    config_sent: bool,
    sink: Box<dyn TranscriptSink>,
    errors_tx: mpsc::Sender<SessionError>,
    state_tx: watch::Sender<State>,
    /// Completions from in-flight device acquisitions. The loop keeps its
    /// own sender so the receiver never closes.
    capture_done_tx: mpsc::Sender<CaptureOutcome>,
    capture_done_rx: mpsc::Receiver<CaptureOutcome>,
}

impl SessionLoop {
    async fn run(mut self, mut commands_rx: mpsc::Receiver<Command>) {
        log::debug!("Session: loop started");

        loop {
            while let Some(event) = self.pending.pop_front() {
                self.handle_event(event).await;
            }

            tokio::select! {
                command = commands_rx.recv() => match command {
                    Some(command) => {
                        self.handle_event(command.event).await;
                        let _ = command.done.send(());
                    }
                    None => break,
                },
                outcome = self.capture_done_rx.recv() => {
                    if let Some(outcome) = outcome {
                        self.handle_capture_outcome(outcome).await;
                    }
                },
                server_event = recv_or_pending(&mut self.server_rx) => match server_event {
                    Some(ServerEvent::Transcript(event)) => {
                        log::debug!("Session: transcript: {:?}", event.text);
                        self.sink.on_event(event);
                    }
                    Some(ServerEvent::Closed { reason }) => {
                        self.pending.push_back(Event::TransportClosed { reason });
                    }
                    None => self.server_rx = None,
                },
                block = recv_or_pending(&mut self.blocks_rx) => match block {
                    Some(block) => self.process_block(block).await,
                    None => self.blocks_rx = None,
                },
            }
        }

        // All handles gone: release whatever is still held.
        if let Some(mut capture) = self.capture.take() {
            let _ = tokio::task::spawn_blocking(move || capture.stop()).await;
        }
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        log::debug!("Session: loop exited");
    }

    async fn handle_event(&mut self, event: Event) {
        let (next, effects) = reduce(&self.state, event);
        log::debug!("Session: state {:?}", next);
        self.state = next;
        self.state_tx.send_replace(self.state.clone());

        for effect in effects {
            self.run_effect(effect).await;
        }
    }

    async fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport { address } => {
                let (server_tx, server_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
                match Transport::connect(&address, server_tx).await {
                    Ok(transport) => {
                        self.transport = Some(transport);
                        self.server_rx = Some(server_rx);
                        self.pending.push_back(Event::TransportOpened);
                    }
                    Err(e) => {
                        self.pending
                            .push_back(Event::TransportFailed { err: e.to_string() });
                    }
                }
            }

            Effect::StartCapture { id } => {
                let (blocks_tx, blocks_rx) = mpsc::channel(BLOCK_QUEUE_CAPACITY);
                let done_tx = self.capture_done_tx.clone();

                // Device acquisition touches the OS audio layer and can take
                // a while; run it off the loop task so queued commands and
                // inbound transcripts keep flowing meanwhile.
                let _ = tokio::task::spawn_blocking(move || {
                    let outcome = match start_capture(blocks_tx) {
                        Ok(handle) => CaptureOutcome::Ready {
                            id,
                            handle,
                            blocks_rx,
                        },
                        Err(e) => CaptureOutcome::Failed {
                            id,
                            err: e.to_string(),
                        },
                    };
                    let _ = done_tx.blocking_send(outcome);
                });
            }

            Effect::SendConfig { config } => self.send_config(config).await,

            Effect::StopCapture { id } => {
                self.config_sent = false;
                self.blocks_rx = None;

                if let Some(mut capture) = self.capture.take() {
                    // stop() joins the capture thread
                    if tokio::task::spawn_blocking(move || capture.stop())
                        .await
                        .is_err()
                    {
                        log::warn!("Session: capture teardown task panicked");
                    }
                }

                self.pending.push_back(Event::CaptureStopped { id });
            }

            Effect::CloseTransport => {
                self.config_sent = false;
                self.server_rx = None;
                if let Some(transport) = self.transport.take() {
                    transport.close().await;
                }
            }

            Effect::Report { error } => self.report(error),
        }
    }

    async fn handle_capture_outcome(&mut self, outcome: CaptureOutcome) {
        match outcome {
            CaptureOutcome::Ready {
                id,
                mut handle,
                blocks_rx,
            } => {
                let still_arming = matches!(
                    &self.state,
                    State::Arming { session_id, .. } if *session_id == id
                );
                if !still_arming {
                    // The recording was stopped or torn down while the
                    // device was coming up; release it straight away.
                    log::debug!("Session: discarding capture for torn-down recording");
                    if tokio::task::spawn_blocking(move || handle.stop())
                        .await
                        .is_err()
                    {
                        log::warn!("Session: capture teardown task panicked");
                    }
                    return;
                }

                let sample_rate = handle.sample_rate();
                self.capture = Some(handle);
                self.blocks_rx = Some(blocks_rx);
                self.capture_rate = sample_rate;
                self.handle_event(Event::CaptureStarted { id, sample_rate })
                    .await;
            }
            CaptureOutcome::Failed { id, err } => {
                self.handle_event(Event::CaptureFailed { id, err }).await;
            }
        }
    }

    async fn send_config(&mut self, config: SessionConfig) {
        let text = match build_config_message(&config) {
            Ok(text) => text,
            Err(e) => {
                self.report(SessionError::Pipeline(e.to_string()));
                self.pending.push_back(Event::StopRequested);
                return;
            }
        };

        match self.transport.as_mut() {
            Some(transport) => match transport.send_text(text).await {
                Ok(()) => {
                    self.config_sent = true;
                    log::info!(
                        "Session: config sent ({} Hz capture -> {} Hz wire)",
                        config.sample_rate,
                        TARGET_SAMPLE_RATE
                    );
                }
                Err(e) => {
                    log::warn!("Session: failed to send config: {}", e);
                    self.pending.push_back(Event::TransportClosed {
                        reason: Some(e.to_string()),
                    });
                }
            },
            None => {
                self.pending.push_back(Event::TransportClosed {
                    reason: Some("transport gone before config".to_string()),
                });
            }
        }
    }

    /// Run one captured block through the pipeline and send it.
    ///
    /// The send guard: frames go out only while recording, after the config
    /// message, on an open connection. Anything else is dropped.
    async fn process_block(&mut self, block: Vec<f32>) {
        if !matches!(self.state, State::Recording { .. }) || !self.config_sent {
            return;
        }

        let transport = match self.transport.as_mut() {
            Some(t) if t.is_open() => t,
            _ => return,
        };

        let resampled = match downsample(&block, self.capture_rate, TARGET_SAMPLE_RATE) {
            Ok(resampled) => resampled,
            Err(e) => {
                // Rate mismatch is fatal to this recording attempt; stop
                // before any partial frame is sent.
                self.report(SessionError::Pipeline(e.to_string()));
                self.pending.push_back(Event::StopRequested);
                return;
            }
        };

        let frame = encode_frame(&encode(&resampled));
        if let Err(e) = transport.send_binary(frame).await {
            // The reader task reports the close; nothing else to do here
            log::warn!("Session: failed to send audio frame: {}", e);
        }
    }

    fn report(&mut self, error: SessionError) {
        log::warn!("Session: {}", error);
        if self.errors_tx.try_send(error).is_err() {
            log::debug!("Session: error channel full or closed");
        }
    }
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
