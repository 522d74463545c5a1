//! Audio input.

pub mod wav;

pub use wav::WavAudio;
