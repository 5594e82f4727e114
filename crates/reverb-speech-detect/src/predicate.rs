use reverb_config::limits;
use reverb_fabric::AggregatedView;

/// "Meaningful speech" predicate, evaluated against the combined
/// aggregator view for the session so far.
pub fn has_speech(view: &AggregatedView) -> bool {
    view.word_count() >= limits::SPEECH_MIN_WORDS
        && view.speech_duration_seconds() >= limits::SPEECH_MIN_SECONDS
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverb_models::Word;

    fn word(start: f64, end: f64) -> Word {
        Word {
            word: "hi".into(),
            start,
            end,
            confidence: 1.0,
            speaker: None,
        }
    }

    #[test]
    fn empty_view_has_no_speech() {
        assert!(!has_speech(&AggregatedView::default()));
    }

    #[test]
    fn short_blip_below_duration_threshold_is_not_speech() {
        let view = AggregatedView {
            words: vec![word(0.0, 0.1)],
            ..Default::default()
        };
        assert!(!has_speech(&view));
    }

    #[test]
    fn one_word_spanning_half_a_second_is_speech() {
        let view = AggregatedView {
            words: vec![word(0.0, 0.5)],
            ..Default::default()
        };
        assert!(has_speech(&view));
    }
}
