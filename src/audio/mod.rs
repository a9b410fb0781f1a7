pub mod chunker;
pub mod loader;
pub mod processor;
pub mod vad;

pub use loader::load_audio_file;
pub use processor::AudioBuffer;
