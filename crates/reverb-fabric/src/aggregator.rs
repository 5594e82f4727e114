use std::collections::BTreeMap;

use reverb_models::{Segment, Word};

use crate::ResultEntry;

/// A read-side combined view of a session's transcription progress so
/// far, joining the latest results-stream entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedView {
    pub text: String,
    pub words: Vec<Word>,
    pub segments: Vec<Segment>,
    pub chunk_count: usize,
    pub provider: Option<String>,
}

impl AggregatedView {
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Speech duration estimate: span from first to last word, in
    /// seconds, used by the `has_speech` predicate.
    pub fn speech_duration_seconds(&self) -> f64 {
        match (self.words.first(), self.words.last()) {
            (Some(first), Some(last)) => (last.end - first.start).max(0.0),
            _ => 0.0,
        }
    }

    /// Timestamp (audio time, seconds) of the last word, used by the
    /// inactivity timer, which is measured in audio time rather than
    /// wall-clock.
    pub fn last_word_end(&self) -> Option<f64> {
        self.words.last().map(|w| w.end)
    }
}

/// Join result-stream entries into a combined view.
///
/// Entries are keyed by `chunk_index`; a later entry for the same index
/// replaces an earlier one (an interim result superseded by its final),
/// matching at-least-once redelivery and interim->final progression.
/// The combined text is the concatenation of per-chunk texts in
/// ascending `chunk_index` order, preserving order.
pub fn aggregate(entries: &[ResultEntry]) -> AggregatedView {
    let mut by_chunk: BTreeMap<u64, &ResultEntry> = BTreeMap::new();
    for entry in entries {
        match by_chunk.get(&entry.chunk_index) {
            // Keep the later entry in the input, but never downgrade a
            // final result back to an interim one for the same chunk.
            Some(existing) if existing.is_final && !entry.is_final => {}
            _ => {
                by_chunk.insert(entry.chunk_index, entry);
            }
        }
    }

    let mut view = AggregatedView {
        chunk_count: by_chunk.len(),
        ..Default::default()
    };

    let mut texts = Vec::with_capacity(by_chunk.len());
    for entry in by_chunk.values() {
        if !entry.text.is_empty() {
            texts.push(entry.text.as_str());
        }
        view.words.extend(entry.words.iter().cloned());
        view.segments.extend(entry.segments.iter().cloned());
        view.provider = Some(entry.provider.clone());
    }
    view.text = texts.join(" ");

    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverb_models::SegmentType;

    fn word(text: &str, start: f64, end: f64) -> Word {
        Word {
            word: text.to_string(),
            start,
            end,
            confidence: 0.9,
            speaker: None,
        }
    }

    fn entry(chunk_index: u64, text: &str, is_final: bool, words: Vec<Word>) -> ResultEntry {
        ResultEntry {
            chunk_index,
            text: text.to_string(),
            words,
            segments: vec![],
            provider: "deepgram".to_string(),
            is_final,
        }
    }

    #[test]
    fn concatenates_preserving_chunk_order() {
        let entries = vec![
            entry(1, "world", true, vec![word("world", 1.0, 1.5)]),
            entry(0, "hello", true, vec![word("hello", 0.0, 0.5)]),
        ];
        let view = aggregate(&entries);
        assert_eq!(view.text, "hello world");
        assert_eq!(view.word_count(), 2);
    }

    #[test]
    fn final_result_supersedes_interim_for_same_chunk() {
        let entries = vec![
            entry(0, "hel", false, vec![word("hel", 0.0, 0.3)]),
            entry(0, "hello", true, vec![word("hello", 0.0, 0.5)]),
        ];
        let view = aggregate(&entries);
        assert_eq!(view.text, "hello");
        assert_eq!(view.word_count(), 1);
    }

    #[test]
    fn a_later_interim_does_not_downgrade_an_earlier_final() {
        let entries = vec![
            entry(0, "hello", true, vec![word("hello", 0.0, 0.5)]),
            entry(0, "hel", false, vec![word("hel", 0.0, 0.3)]),
        ];
        let view = aggregate(&entries);
        assert_eq!(view.text, "hello");
    }

    #[test]
    fn empty_aggregate_has_no_speech() {
        let view = aggregate(&[]);
        assert_eq!(view.word_count(), 0);
        assert_eq!(view.speech_duration_seconds(), 0.0);
        assert_eq!(view.last_word_end(), None);
    }

    #[test]
    fn speech_duration_spans_first_to_last_word() {
        let entries = vec![entry(
            0,
            "hello there friend",
            true,
            vec![
                word("hello", 0.0, 0.4),
                word("there", 0.5, 0.9),
                word("friend", 1.0, 1.6),
            ],
        )];
        let view = aggregate(&entries);
        assert_eq!(view.speech_duration_seconds(), 1.6);
        assert_eq!(view.last_word_end(), Some(1.6));
    }

    #[test]
    fn segments_accumulate_across_chunks() {
        let mut e0 = entry(0, "hi", true, vec![]);
        e0.segments.push(Segment {
            start: 0.0,
            end: 1.0,
            text: "hi".into(),
            speaker: "SPEAKER_00".into(),
            segment_type: SegmentType::Speech,
        });
        let view = aggregate(&[e0]);
        assert_eq!(view.segments.len(), 1);
    }
}
