//! Wake-word normalization and command extraction.

use regex::RegexBuilder;

/// Lowercase, map ASCII punctuation to spaces, collapse whitespace, trim.
pub fn normalize_text_for_wake_word(text: &str) -> String {
    let lowered = text.to_lowercase();
    let despunctuated: String = lowered
        .chars()
        .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
        .collect();
    despunctuated.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the command following `wake_word` from the original
/// (unnormalized) `transcript`. Falls back to the full transcript if the
/// wake word boundary can't be located.
pub fn extract_command_after_wake_word(transcript: &str, wake_word: &str) -> String {
    let parts: Vec<String> = normalize_text_for_wake_word(wake_word)
        .split_whitespace()
        .map(str::to_string)
        .collect();

    if parts.is_empty() {
        return transcript.trim().to_string();
    }

    let escaped: Vec<String> = parts.iter().map(|p| regex::escape(p)).collect();
    let joined = escaped.join(r"[\s,.\-!?;:]*");
    let pattern = format!(r"^{joined}[\s,.\-!?;:]*");

    let Ok(re) = RegexBuilder::new(&pattern).case_insensitive(true).build() else {
        return transcript.trim().to_string();
    };

    match re.find(transcript) {
        Some(m) => transcript[m.end()..].trim().to_string(),
        None => {
            tracing::warn!(wake_word, transcript, "could not find wake word boundary, using full transcript");
            transcript.trim().to_string()
        }
    }
}

/// True if `normalized_transcript` starts with `normalize(wake_word)`,
/// the check behind the `wake_word` plugin condition.
pub fn transcript_starts_with_wake_word(normalized_transcript: &str, wake_word: &str) -> bool {
    let normalized_wake_word = normalize_text_for_wake_word(wake_word);
    !normalized_wake_word.is_empty() && normalized_transcript.starts_with(&normalized_wake_word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_idempotent_and_collapses_punctuation() {
        assert_eq!(normalize_text_for_wake_word("Hey, Vivi!"), "hey vivi");
        assert_eq!(normalize_text_for_wake_word("hey  vivi"), "hey vivi");
        assert_eq!(normalize_text_for_wake_word("Hey-Vivi"), "hey vivi");
        assert_eq!(
            normalize_text_for_wake_word(&normalize_text_for_wake_word("Hey, Vivi!")),
            "hey vivi"
        );
    }

    #[test]
    fn extracts_command_after_wake_word_with_punctuation() {
        let command = extract_command_after_wake_word("Hey, Vivi, turn off lights", "hey vivi");
        assert_eq!(command, "turn off lights");
    }

    #[test]
    fn extracts_command_case_insensitively() {
        let command = extract_command_after_wake_word("HEY VIVI turn on the fan", "Hey Vivi");
        assert_eq!(command, "turn on the fan");
    }

    #[test]
    fn falls_back_to_full_transcript_when_boundary_not_found() {
        let command = extract_command_after_wake_word("turn off the lights", "hey vivi");
        assert_eq!(command, "turn off the lights");
    }

    #[test]
    fn empty_wake_word_returns_trimmed_transcript() {
        assert_eq!(extract_command_after_wake_word("  hello there  ", ""), "hello there");
    }
}
