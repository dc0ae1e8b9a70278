//! Content loop detector: flags a response whose emitted text settles
//! into a repeating pattern before the model ever produces a
//! `finish_reason`, and cuts it off.
//!
//! Grounded on the teacher's `llm::loop_detector::LoopDetector` (ring
//! buffer + pattern-window comparison), retargeted from tool-call
//! records to a rolling text buffer: instead of comparing discrete
//! calls, it compares adjacent windows of the same character count at
//! the tail of everything emitted so far.

use crate::canonical::{CanonicalChatResponse, Choice, FinishReason};
use crate::session::state::LoopDetectionState;

/// Per-request detector. Not shared across requests: a fresh instance
/// is built for each response/stream.
#[derive(Debug)]
pub struct ContentLoopDetector {
    enabled: bool,
    min_len: usize,
    max_len: usize,
    min_reps: usize,
    buffer: Vec<char>,
    triggered: bool,
}

impl ContentLoopDetector {
    pub fn new(config: &LoopDetectionState) -> Self {
        let min_len = config.min_pattern_len.max(1);
        Self {
            enabled: config.enabled,
            min_len,
            max_len: config.max_pattern_len.max(min_len),
            min_reps: config.min_repetitions.max(1),
            buffer: Vec::new(),
            triggered: false,
        }
    }

    pub fn triggered(&self) -> bool {
        self.triggered
    }

    /// Feed one delta of text. Returns the text that is actually safe to
    /// forward downstream (the full delta, unless this call crosses the
    /// loop threshold, in which case only the prefix up to and including
    /// the trigger boundary) and whether the trigger fired on this call.
    ///
    /// Content exactly `min_pattern_len * min_repetitions` chars long
    /// triggers; one char short does not.
    pub fn feed(&mut self, delta: &str) -> (String, bool) {
        if self.triggered || !self.enabled || delta.is_empty() {
            return (delta.to_string(), false);
        }

        let before = self.buffer.len();
        self.buffer.extend(delta.chars());

        let mut boundary = None;
        for pattern_len in self.min_len..=self.max_len {
            let window = pattern_len.saturating_mul(self.min_reps);
            if window == 0 || self.buffer.len() < window {
                continue;
            }
            let tail = &self.buffer[self.buffer.len() - window..];
            let pattern = &tail[..pattern_len];
            if tail.chunks(pattern_len).all(|chunk| chunk == pattern) {
                boundary = Some(window);
                break;
            }
        }

        match boundary {
            Some(boundary) => {
                self.triggered = true;
                let allowed = boundary.saturating_sub(before);
                let truncated: String = delta.chars().take(allowed).collect();
                (truncated, true)
            }
            None => (delta.to_string(), false),
        }
    }

    /// Scan a whole piece of text from scratch (non-streaming path),
    /// returning the truncated text up to the first detected repetition.
    pub fn scan(&mut self, text: &str) -> Option<String> {
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            let (_, triggered) = self.feed(ch.encode_utf8(&mut buf));
            if triggered {
                return Some(self.buffer.iter().collect());
            }
        }
        None
    }
}

/// Non-streaming middleware entry point: scans every choice's message
/// text, truncating and marking `finish_reason = ContentFilter` on the
/// first detected loop.
pub fn apply_response(config: &LoopDetectionState, mut response: CanonicalChatResponse) -> CanonicalChatResponse {
    if !config.enabled {
        return response;
    }
    for choice in &mut response.choices {
        apply_choice(config, choice);
    }
    response
}

fn apply_choice(config: &LoopDetectionState, choice: &mut Choice) {
    let text = choice.message.text();
    let mut detector = ContentLoopDetector::new(config);
    if let Some(truncated) = detector.scan(&text) {
        choice.message.content = crate::canonical::Content::Text(truncated);
        choice.finish_reason = FinishReason::ContentFilter;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::state::LoopDetectionState;

    fn config() -> LoopDetectionState {
        LoopDetectionState {
            enabled: true,
            min_pattern_len: 3,
            max_pattern_len: 64,
            min_repetitions: 3,
        }
    }

    #[test]
    fn detects_minimal_repeating_pattern_at_exact_boundary() {
        let mut detector = ContentLoopDetector::new(&config());
        assert!(detector.scan("abcabcabc").is_some());
    }

    #[test]
    fn one_char_short_of_boundary_does_not_trigger() {
        let mut detector = ContentLoopDetector::new(&config());
        assert!(detector.scan("abcabcab").is_none());
    }

    #[test]
    fn non_repeating_text_never_triggers() {
        let mut detector = ContentLoopDetector::new(&config());
        assert!(detector.scan("the quick brown fox jumps over the lazy dog").is_none());
    }

    #[test]
    fn streaming_feed_truncates_the_delta_that_crosses_the_boundary() {
        let mut detector = ContentLoopDetector::new(&config());
        let (out1, t1) = detector.feed("abcabc");
        assert_eq!(out1, "abcabc");
        assert!(!t1);
        let (out2, t2) = detector.feed("abcxyz");
        assert!(t2);
        assert_eq!(out2, "abc");
    }

    #[test]
    fn disabled_detector_never_triggers() {
        let mut config = config();
        config.enabled = false;
        let mut detector = ContentLoopDetector::new(&config);
        assert!(detector.scan("abcabcabcabcabcabc").is_none());
    }

    #[test]
    fn apply_response_marks_content_filter_on_detection() {
        let response = CanonicalChatResponse {
            id: "r1".into(),
            created_unix: 0,
            model: "m".into(),
            choices: vec![Choice {
                index: 0,
                message: crate::canonical::Message::assistant("abcabcabc"),
                finish_reason: FinishReason::Stop,
            }],
            usage: Default::default(),
        };
        let response = apply_response(&config(), response);
        assert_eq!(response.choices[0].finish_reason, FinishReason::ContentFilter);
        assert_eq!(response.choices[0].message.text(), "abcabcabc");
    }
}
