use reverb_models::Segment;

/// Segment validation: drop segments whose text is empty after trim,
/// repair a non-positive duration by estimating it from word count
/// (`end = start + 0.5 * word_count`), and normalize the speaker field.
pub fn validate_and_normalize_segments(segments: &[Segment]) -> Vec<Segment> {
    segments
        .iter()
        .filter(|s| !s.text.trim().is_empty())
        .cloned()
        .map(|mut s| {
            if s.end <= s.start {
                let word_count = s.text.split_whitespace().count().max(1) as f64;
                s.end = s.start + 0.5 * word_count;
            }
            s.speaker = Segment::normalize_speaker(Some(&s.speaker));
            s
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverb_models::SegmentType;

    fn segment(start: f64, end: f64, text: &str, speaker: &str) -> Segment {
        Segment {
            start,
            end,
            text: text.to_string(),
            speaker: speaker.to_string(),
            segment_type: SegmentType::Speech,
        }
    }

    #[test]
    fn blank_segments_are_dropped() {
        let segments = vec![segment(0.0, 1.0, "   ", "1")];
        assert!(validate_and_normalize_segments(&segments).is_empty());
    }

    #[test]
    fn non_positive_duration_is_repaired_from_word_count() {
        let segments = vec![segment(2.0, 2.0, "hello there friend", "1")];
        let fixed = validate_and_normalize_segments(&segments);
        assert_eq!(fixed[0].end, 2.0 + 0.5 * 3.0);
    }

    #[test]
    fn speaker_field_is_normalized() {
        let segments = vec![
            segment(0.0, 1.0, "hi", ""),
            segment(0.0, 1.0, "hi", "2"),
            segment(0.0, 1.0, "hi", "Alice"),
        ];
        let fixed = validate_and_normalize_segments(&segments);
        assert_eq!(fixed[0].speaker, "SPEAKER_00");
        assert_eq!(fixed[1].speaker, "Speaker 2");
        assert_eq!(fixed[2].speaker, "Alice");
    }

    #[test]
    fn well_formed_segment_passes_through() {
        let segments = vec![segment(0.0, 1.5, "hello there", "SPEAKER_00")];
        let fixed = validate_and_normalize_segments(&segments);
        assert_eq!(fixed.len(), 1);
        assert_eq!(fixed[0].end, 1.5);
    }
}
