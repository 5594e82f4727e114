//! Pure functions behind the speaker-recognition stage: windowing a long
//! recording and merging the overlapping windows' results back into one
//! timeline — kept free of any service client so both are unit-testable
//! on their own.

/// A speaker-labeled span as returned by the speaker-recognition service,
/// before it is folded into a [`reverb_models::Segment`] (which has no
/// confidence field — that's only needed transiently, to pick a winner
/// where two windows disagree).
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub speaker: String,
    pub confidence: f32,
}

/// `(start, end)` windows covering `[0, total)`, each `segment` long
/// except possibly the last, overlapping the previous by `overlap`.
/// Returns a single `(0, total)` window if `total <= segment`.
pub fn split_into_windows(total: f64, segment: f64, overlap: f64) -> Vec<(f64, f64)> {
    if total <= segment {
        return vec![(0.0, total)];
    }

    let step = (segment - overlap).max(1.0);
    let mut windows = Vec::new();
    let mut start = 0.0;
    loop {
        let end = (start + segment).min(total);
        windows.push((start, end));
        if end >= total {
            break;
        }
        start += step;
    }
    windows
}

/// Merge possibly-overlapping speaker segments from one or more windows
/// into a single non-overlapping timeline. Segments must already be
/// sorted by `start` (callers sort after concatenating all windows'
/// results).
///
/// Same speaker, overlapping time -> extend the running segment's end
/// and append new text (skipping it if already a substring, since
/// overlapping windows commonly re-transcribe the shared tail).
/// Different speakers, overlapping time -> keep whichever segment is
/// more confident; the loser's boundary is pushed to make room for the
/// winner rather than discarded outright.
pub fn merge_overlapping_speaker_segments(mut segments: Vec<SpeakerSegment>) -> Vec<SpeakerSegment> {
    if segments.is_empty() {
        return segments;
    }
    segments.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

    let mut merged = Vec::with_capacity(segments.len());
    let mut iter = segments.into_iter();
    let mut current = iter.next().expect("checked non-empty above");

    for mut next in iter {
        if next.start < current.end {
            if next.speaker == current.speaker {
                current.end = current.end.max(next.end);
                if !current.text.contains(&next.text) {
                    current.text.push(' ');
                    current.text.push_str(&next.text);
                }
                current.confidence = current.confidence.max(next.confidence);
            } else if next.confidence > current.confidence {
                merged.push(current);
                current = next;
            } else {
                merged.push(current.clone());
                next.start = current.end;
                current = next;
            }
        } else {
            merged.push(current);
            current = next;
        }
    }
    merged.push(current);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, speaker: &str, confidence: f32, text: &str) -> SpeakerSegment {
        SpeakerSegment {
            start,
            end,
            text: text.to_string(),
            speaker: speaker.to_string(),
            confidence,
        }
    }

    #[test]
    fn short_recording_is_a_single_window() {
        assert_eq!(split_into_windows(300.0, 900.0, 30.0), vec![(0.0, 300.0)]);
    }

    #[test]
    fn long_recording_splits_into_overlapping_windows() {
        let windows = split_into_windows(2000.0, 900.0, 30.0);
        assert_eq!(windows[0], (0.0, 900.0));
        assert_eq!(windows[1], (870.0, 1770.0));
        assert_eq!(*windows.last().unwrap(), (1740.0, 2000.0));
        // consecutive windows overlap by exactly 30s except the final one
        assert_eq!(windows[1].0, windows[0].1 - 30.0);
    }

    #[test]
    fn non_overlapping_segments_pass_through_unchanged() {
        let segments = vec![seg(0.0, 1.0, "A", 0.9, "hi"), seg(1.0, 2.0, "B", 0.9, "there")];
        let merged = merge_overlapping_speaker_segments(segments.clone());
        assert_eq!(merged, segments);
    }

    #[test]
    fn same_speaker_overlap_extends_and_appends_new_text() {
        let segments = vec![
            seg(0.0, 5.0, "A", 0.8, "hello there"),
            seg(4.0, 8.0, "A", 0.7, "there friend"),
        ];
        let merged = merge_overlapping_speaker_segments(segments);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].end, 8.0);
        assert_eq!(merged[0].text, "hello there friend");
        assert_eq!(merged[0].confidence, 0.8);
    }

    #[test]
    fn same_speaker_overlap_does_not_duplicate_repeated_text() {
        let segments = vec![
            seg(0.0, 5.0, "A", 0.8, "hello there friend"),
            seg(4.0, 8.0, "A", 0.7, "hello there friend"),
        ];
        let merged = merge_overlapping_speaker_segments(segments);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "hello there friend");
    }

    #[test]
    fn different_speakers_overlap_keeps_higher_confidence_and_pushes_boundary() {
        let segments = vec![
            seg(0.0, 5.0, "A", 0.6, "hello"),
            seg(4.0, 8.0, "B", 0.9, "world"),
        ];
        let merged = merge_overlapping_speaker_segments(segments);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].speaker, "A");
        assert_eq!(merged[1].speaker, "B");
        assert_eq!(merged[1].start, 5.0);
    }

    #[test]
    fn different_speakers_overlap_first_more_confident_keeps_first_and_advances() {
        let segments = vec![
            seg(0.0, 5.0, "A", 0.9, "hello"),
            seg(4.0, 8.0, "B", 0.5, "world"),
        ];
        let merged = merge_overlapping_speaker_segments(segments);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].speaker, "A");
        assert_eq!(merged[0].end, 5.0);
        assert_eq!(merged[1].speaker, "B");
    }
}
