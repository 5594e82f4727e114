mod wake_word_logger;

pub use wake_word_logger::WakeWordLogger;
