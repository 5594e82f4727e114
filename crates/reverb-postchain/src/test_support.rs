//! Shared test fixtures, kept out of `#[cfg(test)]` modules so more than
//! one file in this crate can use them.

/// One 20ms frame of silent 16kHz mono PCM, Opus-encoded — a valid
/// `AudioChunk::audio_data` payload for tests that only care about chunk
/// bookkeeping (timing, ordering), never the decoded audio itself.
pub(crate) fn silent_opus_frame() -> Vec<u8> {
    reverb_persistence::encode_opus_frame(&[0i16; 320], 16_000, 1).expect("encode silent opus frame")
}
