use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One fixed-duration compressed slice of a conversation's audio.
/// Written only by the Audio Persistence Worker; read-only everywhere
/// else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioChunk {
    pub conversation_id: Uuid,
    /// Dense, monotonic, starts at 0 per conversation.
    pub chunk_index: u64,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u8,
    pub sample_width: u8,
    /// Opus-compressed payload.
    pub audio_data: Vec<u8>,
}

impl AudioChunk {
    /// Validate that `chunks` form the contiguous, monotonic timeline.
    /// Chunks need not be pre-sorted; this sorts a copy of the indices.
    pub fn indices_are_contiguous(chunks: &[AudioChunk]) -> bool {
        let mut indices: Vec<u64> = chunks.iter().map(|c| c.chunk_index).collect();
        indices.sort_unstable();
        indices
            .iter()
            .enumerate()
            .all(|(i, &idx)| idx == i as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(idx: u64) -> AudioChunk {
        AudioChunk {
            conversation_id: Uuid::nil(),
            chunk_index: idx,
            start_time: idx as f64 * 30.0,
            end_time: (idx + 1) as f64 * 30.0,
            duration: 30.0,
            sample_rate: 16_000,
            channels: 1,
            sample_width: 2,
            audio_data: vec![],
        }
    }

    #[test]
    fn contiguous_indices_pass() {
        let chunks = vec![chunk(0), chunk(1), chunk(2)];
        assert!(AudioChunk::indices_are_contiguous(&chunks));
    }

    #[test]
    fn out_of_order_but_contiguous_still_passes() {
        let chunks = vec![chunk(2), chunk(0), chunk(1)];
        assert!(AudioChunk::indices_are_contiguous(&chunks));
    }

    #[test]
    fn gap_fails() {
        let chunks = vec![chunk(0), chunk(2)];
        assert!(!AudioChunk::indices_are_contiguous(&chunks));
    }

    #[test]
    fn duplicate_fails() {
        let chunks = vec![chunk(0), chunk(0), chunk(1)];
        assert!(!AudioChunk::indices_are_contiguous(&chunks));
    }
}
