//! Session lifecycle state machine
//!
//! All transitions go through the pure `reduce()` function, which returns the
//! next state and a list of effects for the session loop to execute. Events
//! carry the session id of the recording attempt they belong to; events with
//! a stale id are dropped silently so late completions from a torn-down
//! recording cannot corrupt a newer one.

use uuid::Uuid;

use crate::protocol::{BufferingStrategy, SessionConfig};

/// User-chosen options for one recording attempt. The device's sample rate
/// is filled in once capture is up.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingOptions {
    pub language: Option<String>,
    pub strategy: BufferingStrategy,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            language: None,
            strategy: BufferingStrategy::Immediate,
        }
    }
}

/// Failures surfaced to the caller as discrete notifications.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// Microphone unavailable or denied. The session stays connected.
    Device(String),
    /// Connection failed or dropped. The session resets to idle.
    Transport(String),
    /// Audio processing failed (e.g. device rate below the wire rate).
    /// Fatal to the recording attempt, not to the connection.
    Pipeline(String),
    /// An operation was requested in a state that does not allow it.
    NotConnected,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Device(e) => write!(f, "Audio device error: {}", e),
            SessionError::Transport(e) => write!(f, "Transport error: {}", e),
            SessionError::Pipeline(e) => write!(f, "Audio pipeline error: {}", e),
            SessionError::NotConnected => write!(f, "Not connected to a server"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Session lifecycle state. `Arming` covers the async window between a start
/// request and the device coming up; externally it still counts as connected
/// (a capture failure drops back to `Connected`).
#[derive(Debug, Clone)]
pub enum State {
    Idle,
    Connecting {
        address: String,
    },
    Connected,
    Arming {
        session_id: Uuid,
        options: RecordingOptions,
    },
    Recording {
        session_id: Uuid,
    },
    Stopping {
        session_id: Uuid,
    },
}

impl Default for State {
    fn default() -> Self {
        State::Idle
    }
}

impl State {
    fn session_id(&self) -> Option<Uuid> {
        match self {
            State::Idle | State::Connecting { .. } | State::Connected => None,
            State::Arming { session_id, .. }
            | State::Recording { session_id }
            | State::Stopping { session_id } => Some(*session_id),
        }
    }
}

/// Events that drive the state machine: user commands plus completions from
/// the transport and the capture device.
#[derive(Debug, Clone)]
pub enum Event {
    // User commands
    ConnectRequested { address: String },
    StartRequested { options: RecordingOptions },
    StopRequested,
    DisconnectRequested,

    // Transport events
    TransportOpened,
    TransportFailed { err: String },
    TransportClosed { reason: Option<String> },

    // Capture events
    CaptureStarted { id: Uuid, sample_rate: u32 },
    CaptureFailed { id: Uuid, err: String },
    CaptureStopped { id: Uuid },
}

/// Effects to be executed by the session loop after a transition.
#[derive(Debug, Clone)]
pub enum Effect {
    OpenTransport { address: String },
    StartCapture { id: Uuid },
    SendConfig { config: SessionConfig },
    StopCapture { id: Uuid },
    CloseTransport,
    Report { error: SessionError },
}

/// Reducer: (state, event) -> (next_state, effects).
///
/// Unhandled (state, event) pairs are no-ops: double-stop, stale timeouts and
/// late completions all fall through to the catch-all.
pub fn reduce(state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    let current_id = state.session_id();
    let is_stale = |eid: Uuid| current_id != Some(eid);

    match (state, event) {
        // -----------------
        // Connecting
        // -----------------
        (Idle, ConnectRequested { address }) => (
            Connecting {
                address: address.clone(),
            },
            vec![OpenTransport { address }],
        ),
        (Connecting { .. }, TransportOpened) => (Connected, vec![]),
        (Connecting { .. }, TransportFailed { err }) => (
            Idle,
            vec![Report {
                error: SessionError::Transport(err),
            }],
        ),
        (Connecting { .. }, TransportClosed { reason }) => (
            Idle,
            vec![Report {
                error: SessionError::Transport(
                    reason.unwrap_or_else(|| "closed before open".to_string()),
                ),
            }],
        ),

        // -----------------
        // Starting a recording
        // -----------------
        (Connected, StartRequested { options }) => {
            let id = Uuid::new_v4();
            (
                Arming {
                    session_id: id,
                    options,
                },
                vec![StartCapture { id }],
            )
        }
        // Start is only valid while connected and not already recording;
        // no device is acquired on the failure path.
        (_, StartRequested { .. }) => (
            state.clone(),
            vec![Report {
                error: SessionError::NotConnected,
            }],
        ),

        (Arming { session_id, options }, CaptureStarted { id, sample_rate })
            if *session_id == id =>
        {
            let config = SessionConfig::new(
                sample_rate,
                options.language.clone(),
                options.strategy.clone(),
            );
            (Recording { session_id: id }, vec![SendConfig { config }])
        }
        (Arming { session_id, .. }, CaptureFailed { id, err }) if *session_id == id => (
            Connected,
            vec![Report {
                error: SessionError::Device(err),
            }],
        ),
        // Stop while still arming: tear the capture down as soon as it is up
        (Arming { session_id, .. }, StopRequested) => (
            Stopping {
                session_id: *session_id,
            },
            vec![StopCapture { id: *session_id }],
        ),

        // -----------------
        // Recording / stopping
        // -----------------
        (Recording { session_id }, StopRequested) => (
            Stopping {
                session_id: *session_id,
            },
            vec![StopCapture { id: *session_id }],
        ),
        (Stopping { session_id }, CaptureStopped { id }) if *session_id == id => {
            (Connected, vec![])
        }

        // -----------------
        // Disconnecting
        // -----------------
        (Idle, DisconnectRequested) => (Idle, vec![]),
        (Connecting { .. }, DisconnectRequested) | (Connected, DisconnectRequested) => {
            (Idle, vec![CloseTransport])
        }
        (_, DisconnectRequested) => {
            // Recording, arming or stopping: stop capture first, then close
            let mut effects = Vec::new();
            if let Some(id) = current_id {
                effects.push(StopCapture { id });
            }
            effects.push(CloseTransport);
            (Idle, effects)
        }

        // -----------------
        // Unexpected transport loss: defensive teardown straight to Idle
        // -----------------
        // A close racing a completed disconnect is not an error
        (Idle, TransportClosed { .. }) => (Idle, vec![]),
        (_, TransportClosed { reason }) => {
            let mut effects = Vec::new();
            if let Some(id) = current_id {
                effects.push(StopCapture { id });
            }
            effects.push(CloseTransport);
            effects.push(Report {
                error: SessionError::Transport(
                    reason.unwrap_or_else(|| "connection closed".to_string()),
                ),
            });
            (Idle, effects)
        }

        // -----------------
        // Stale capture events (drop silently)
        // -----------------
        (_, CaptureStarted { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureStopped { id }) if is_stale(id) => (state.clone(), vec![]),

        // A device that comes up after its recording was torn down never
        // reaches the reducer; the session loop releases it on seeing the
        // stale completion id.
        _ => (state.clone(), vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RecordingOptions {
        RecordingOptions::default()
    }

    #[test]
    fn test_idle_connect_transitions_to_connecting() {
        let (next, effects) = reduce(
            &State::Idle,
            Event::ConnectRequested {
                address: "ws://localhost:8765".to_string(),
            },
        );
        assert!(matches!(next, State::Connecting { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::OpenTransport { .. })));
    }

    #[test]
    fn test_transport_open_transitions_to_connected() {
        let state = State::Connecting {
            address: "ws://localhost:8765".to_string(),
        };
        let (next, effects) = reduce(&state, Event::TransportOpened);
        assert!(matches!(next, State::Connected));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_connect_failure_reports_and_resets() {
        let state = State::Connecting {
            address: "ws://localhost:8765".to_string(),
        };
        let (next, effects) = reduce(
            &state,
            Event::TransportFailed {
                err: "refused".to_string(),
            },
        );
        assert!(matches!(next, State::Idle));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Report {
                error: SessionError::Transport(_)
            }
        )));
    }

    #[test]
    fn test_start_while_idle_fails_without_side_effects() {
        let (next, effects) = reduce(
            &State::Idle,
            Event::StartRequested { options: options() },
        );
        assert!(matches!(next, State::Idle));
        // Reported, but no capture started
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::StartCapture { .. })));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Report {
                error: SessionError::NotConnected
            }
        )));
    }

    #[test]
    fn test_start_while_recording_is_rejected() {
        let id = Uuid::new_v4();
        let state = State::Recording { session_id: id };
        let (next, effects) = reduce(&state, Event::StartRequested { options: options() });
        assert!(matches!(next, State::Recording { .. }));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::StartCapture { .. })));
    }

    #[test]
    fn test_connected_start_arms_capture() {
        let (next, effects) = reduce(
            &State::Connected,
            Event::StartRequested { options: options() },
        );
        assert!(matches!(next, State::Arming { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartCapture { .. })));
    }

    #[test]
    fn test_capture_started_sends_config_before_recording() {
        let (armed, _) = reduce(
            &State::Connected,
            Event::StartRequested {
                options: RecordingOptions {
                    language: Some("en".to_string()),
                    strategy: BufferingStrategy::Immediate,
                },
            },
        );
        let id = match &armed {
            State::Arming { session_id, .. } => *session_id,
            other => panic!("expected Arming, got {:?}", other),
        };

        let (next, effects) = reduce(
            &armed,
            Event::CaptureStarted {
                id,
                sample_rate: 48000,
            },
        );
        assert!(matches!(next, State::Recording { .. }));

        match &effects[..] {
            [Effect::SendConfig { config }] => {
                assert_eq!(config.sample_rate, 48000);
                assert_eq!(config.channels, 1);
                assert_eq!(config.language.as_deref(), Some("en"));
            }
            other => panic!("expected single SendConfig effect, got {:?}", other),
        }
    }

    #[test]
    fn test_capture_failure_stays_connected() {
        let (armed, _) = reduce(
            &State::Connected,
            Event::StartRequested { options: options() },
        );
        let id = match &armed {
            State::Arming { session_id, .. } => *session_id,
            other => panic!("expected Arming, got {:?}", other),
        };

        let (next, effects) = reduce(
            &armed,
            Event::CaptureFailed {
                id,
                err: "mic denied".to_string(),
            },
        );
        assert!(matches!(next, State::Connected));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Report {
                error: SessionError::Device(_)
            }
        )));
    }

    #[test]
    fn test_stop_then_capture_stopped_returns_to_connected() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&State::Recording { session_id: id }, Event::StopRequested);
        assert!(matches!(next, State::Stopping { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopCapture { .. })));

        let (next, effects) = reduce(&next, Event::CaptureStopped { id });
        assert!(matches!(next, State::Connected));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_double_stop_is_noop() {
        let id = Uuid::new_v4();
        let (stopping, _) = reduce(&State::Recording { session_id: id }, Event::StopRequested);

        let (next, effects) = reduce(&stopping, Event::StopRequested);
        assert!(matches!(next, State::Stopping { .. }));
        assert!(effects.is_empty());

        // Stop while merely connected is also a no-op
        let (next, effects) = reduce(&State::Connected, Event::StopRequested);
        assert!(matches!(next, State::Connected));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_disconnect_while_recording_stops_capture_first() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(
            &State::Recording { session_id: id },
            Event::DisconnectRequested,
        );
        assert!(matches!(next, State::Idle));

        // Capture teardown ordered before transport close
        let stop_pos = effects
            .iter()
            .position(|e| matches!(e, Effect::StopCapture { .. }));
        let close_pos = effects
            .iter()
            .position(|e| matches!(e, Effect::CloseTransport));
        assert!(stop_pos.unwrap() < close_pos.unwrap());
    }

    #[test]
    fn test_disconnect_while_idle_is_noop() {
        let (next, effects) = reduce(&State::Idle, Event::DisconnectRequested);
        assert!(matches!(next, State::Idle));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_unexpected_close_while_recording_tears_down_to_idle() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(
            &State::Recording { session_id: id },
            Event::TransportClosed {
                reason: Some("server went away".to_string()),
            },
        );
        assert!(matches!(next, State::Idle));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopCapture { .. })));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::CloseTransport)));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Report {
                error: SessionError::Transport(_)
            }
        )));
    }

    #[test]
    fn test_unexpected_close_while_connected_goes_idle() {
        let (next, effects) = reduce(&State::Connected, Event::TransportClosed { reason: None });
        assert!(matches!(next, State::Idle));
        // No capture to stop
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::StopCapture { .. })));
    }

    #[test]
    fn test_stale_capture_events_are_dropped() {
        let id = Uuid::new_v4();
        let stale = Uuid::new_v4();
        let state = State::Recording { session_id: id };

        let (next, effects) = reduce(
            &state,
            Event::CaptureFailed {
                id: stale,
                err: "late".to_string(),
            },
        );
        assert!(matches!(next, State::Recording { .. }));
        assert!(effects.is_empty());

        let (next, effects) = reduce(&state, Event::CaptureStopped { id: stale });
        assert!(matches!(next, State::Recording { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_session_error_display() {
        assert!(SessionError::NotConnected.to_string().contains("Not connected"));
        assert!(SessionError::Device("denied".to_string())
            .to_string()
            .contains("denied"));
    }
}
