pub mod config;
pub mod error;
pub mod extract;
pub mod generator;
pub mod markov;
pub mod midi;
pub mod notes;
pub mod scale;
pub mod writer;

pub use config::{Config, GeneratorConfig, WriterConfig};
pub use error::{Error, Result};
pub use generator::{generate, GeneratedNote, MelodyGenerator};
pub use markov::TransitionModel;
pub use scale::{Key, KeyDetector, KrumhanslSchmuckler, Mode, ScaleContext};
