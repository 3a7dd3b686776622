//! streamscribe: live microphone streaming to a WebSocket transcription server
//!
//! The pipeline: CPAL capture callback → mono f32 blocks → box-filter
//! downsample to 16 kHz → int16 PCM → binary WebSocket frame. A JSON config
//! message precedes all audio on each recording; transcript events come back
//! as JSON text frames and are delivered to a [`transcript::TranscriptSink`].
//!
//! Session lifecycle is a reducer-style state machine
//! (`Idle → Connecting → Connected → Recording → Stopping`), driven by a
//! single loop task in [`session`].

pub mod audio;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod state_machine;
pub mod transcript;
pub mod transport;

pub use protocol::{BufferingStrategy, SessionConfig, TranscriptEvent, WordScore};
pub use session::{spawn_session, SessionHandle};
pub use settings::{load_settings, save_settings, AppSettings};
pub use state_machine::{RecordingOptions, SessionError, State};
pub use transcript::{TranscriptCollector, TranscriptSink};
