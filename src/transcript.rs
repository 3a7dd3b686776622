//! Transcript delivery and collection
//!
//! The session loop hands every parsed [`TranscriptEvent`] to a
//! [`TranscriptSink`]. Display (colour-coding by word probability, panels,
//! etc.) lives outside the core; the sink is the seam.

use std::sync::{Arc, Mutex};

use crate::protocol::TranscriptEvent;

/// Receives parsed transcript events from the session.
///
/// Called on the session loop task, so implementations should be quick;
/// anything slow belongs behind a channel.
pub trait TranscriptSink: Send {
    fn on_event(&mut self, event: TranscriptEvent);
}

/// Closures work as sinks directly.
impl<F: FnMut(TranscriptEvent) + Send> TranscriptSink for F {
    fn on_event(&mut self, event: TranscriptEvent) {
        self(event)
    }
}

/// Shared sinks let the caller keep reading while the session owns the other
/// handle.
impl<S: TranscriptSink> TranscriptSink for Arc<Mutex<S>> {
    fn on_event(&mut self, event: TranscriptEvent) {
        self.lock().unwrap().on_event(event)
    }
}

/// Collects transcript events into a running text plus the latest language
/// and timing info reported by the server.
#[derive(Debug, Clone, Default)]
pub struct TranscriptCollector {
    segments: Vec<String>,
    language: Option<(String, Option<f64>)>,
    last_processing_time: Option<f64>,
    event_count: u64,
}

impl TranscriptCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full transcript so far, one line per server event.
    pub fn text(&self) -> String {
        self.segments.join("\n")
    }

    /// Latest detected language and its probability, if the server reported one.
    pub fn language(&self) -> Option<(&str, Option<f64>)> {
        self.language
            .as_ref()
            .map(|(lang, prob)| (lang.as_str(), *prob))
    }

    /// Processing time of the most recent event, in seconds.
    pub fn last_processing_time(&self) -> Option<f64> {
        self.last_processing_time
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Clear everything for a new recording.
    pub fn reset(&mut self) {
        self.segments.clear();
        self.language = None;
        self.last_processing_time = None;
        self.event_count = 0;
    }
}

impl TranscriptSink for TranscriptCollector {
    fn on_event(&mut self, event: TranscriptEvent) {
        self.event_count += 1;

        if !event.text.is_empty() {
            self.segments.push(event.text);
        }
        if let Some(language) = event.language {
            self.language = Some((language, event.language_probability));
        }
        if let Some(t) = event.processing_time {
            self.last_processing_time = Some(t);
        }

        if self.event_count % 10 == 0 {
            log::debug!(
                "TranscriptCollector: {} events, {} segments",
                self.event_count,
                self.segments.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> TranscriptEvent {
        TranscriptEvent {
            text: text.to_string(),
            words: None,
            language: None,
            language_probability: None,
            processing_time: None,
        }
    }

    #[test]
    fn test_new_collector_is_empty() {
        let collector = TranscriptCollector::new();
        assert!(collector.is_empty());
        assert_eq!(collector.text(), "");
        assert_eq!(collector.event_count(), 0);
        assert!(collector.language().is_none());
    }

    #[test]
    fn test_segments_accumulate_in_order() {
        let mut collector = TranscriptCollector::new();
        collector.on_event(event("first segment"));
        collector.on_event(event("second segment"));

        assert_eq!(collector.text(), "first segment\nsecond segment");
        assert_eq!(collector.event_count(), 2);
    }

    #[test]
    fn test_empty_text_counted_but_not_collected() {
        let mut collector = TranscriptCollector::new();
        collector.on_event(event(""));
        assert!(collector.is_empty());
        assert_eq!(collector.event_count(), 1);
    }

    #[test]
    fn test_language_tracks_latest() {
        let mut collector = TranscriptCollector::new();

        let mut first = event("hola");
        first.language = Some("es".to_string());
        first.language_probability = Some(0.6);
        collector.on_event(first);

        let mut second = event("hello");
        second.language = Some("en".to_string());
        second.language_probability = Some(0.95);
        collector.on_event(second);

        let (lang, prob) = collector.language().unwrap();
        assert_eq!(lang, "en");
        assert_eq!(prob, Some(0.95));
    }

    #[test]
    fn test_processing_time_tracks_latest() {
        let mut collector = TranscriptCollector::new();

        let mut e = event("a");
        e.processing_time = Some(0.5);
        collector.on_event(e);

        let mut e = event("b");
        e.processing_time = Some(0.7);
        collector.on_event(e);

        assert_eq!(collector.last_processing_time(), Some(0.7));
    }

    #[test]
    fn test_reset() {
        let mut collector = TranscriptCollector::new();
        let mut e = event("text");
        e.language = Some("en".to_string());
        collector.on_event(e);

        collector.reset();

        assert!(collector.is_empty());
        assert!(collector.language().is_none());
        assert_eq!(collector.event_count(), 0);
    }

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |e: TranscriptEvent| seen.push(e.text);
            sink.on_event(event("one"));
            sink.on_event(event("two"));
        }
        assert_eq!(seen, vec!["one", "two"]);
    }

    #[test]
    fn test_shared_sink() {
        let collector = Arc::new(Mutex::new(TranscriptCollector::new()));
        let mut handle = collector.clone();
        handle.on_event(event("shared"));

        assert_eq!(collector.lock().unwrap().text(), "shared");
    }
}
