use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::notes::QuarterLength;

/// Longest silence, in quarter notes, allowed between the input and its continuation.
pub const MAX_GAP: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Parameters for the sampling engine.
pub struct GeneratorConfig {
    /// Markov order: the window length recorded in both tables and the number of previous
    /// durations forming the duration lookup key. Degrees are looked up from the last degree.
    pub order: usize,
    /// Number of notes to generate.
    pub length: usize,
    /// Largest interval, in semitones, allowed between two consecutive generated pitches.
    pub max_leap: u8,
    /// Chance that a generated note gets a harmony pitch added to it.
    pub harmony_probability: f64,
    /// Scale-degree offsets a harmony note may sit at. The default of [2, 4] gives a third or a
    /// fifth above the melody degree.
    pub harmony_intervals: Vec<u8>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            order: 2,
            length: 50,
            max_leap: 5,
            harmony_probability: 0.3,
            harmony_intervals: vec![2, 4],
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.order == 0 {
            return Err(Error::InvalidConfig("order must be at least 1".into()));
        }
        if self.length == 0 {
            return Err(Error::InvalidConfig("length must be at least 1".into()));
        }
        if self.max_leap == 0 {
            return Err(Error::InvalidConfig("max_leap must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.harmony_probability) {
            return Err(Error::InvalidConfig(format!(
                "harmony_probability must be within [0, 1], got {}",
                self.harmony_probability
            )));
        }
        if self.harmony_probability > 0.0 && self.harmony_intervals.is_empty() {
            return Err(Error::InvalidConfig(
                "harmony_intervals must not be empty when harmony is enabled".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Parameters for laying the continuation out after the original notes and encoding it.
pub struct WriterConfig {
    /// Silence, in quarter notes, between the end of the original notes and the continuation.
    pub gap: f64,
    pub ticks_per_beat: u16,
    pub velocity: u8,
    pub channel: u8,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            gap: 2.0,
            ticks_per_beat: 480,
            velocity: 64,
            channel: 0,
        }
    }
}

impl WriterConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.gap > 0.0 && self.gap <= MAX_GAP) {
            return Err(Error::InvalidConfig(format!(
                "gap must be within (0, {MAX_GAP}], got {}",
                self.gap
            )));
        }
        if self.ticks_per_beat == 0 || self.ticks_per_beat > 0x7FFF {
            return Err(Error::InvalidConfig(format!(
                "ticks_per_beat must be within 1..=32767, got {}",
                self.ticks_per_beat
            )));
        }
        if self.velocity == 0 || self.velocity > 127 {
            return Err(Error::InvalidConfig(format!(
                "velocity must be within 1..=127, got {}",
                self.velocity
            )));
        }
        if self.channel > 15 {
            return Err(Error::InvalidConfig(format!(
                "channel must be within 0..=15, got {}",
                self.channel
            )));
        }
        Ok(())
    }

    pub fn gap(&self) -> QuarterLength {
        QuarterLength::from_quarters(self.gap)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub generator: GeneratorConfig,
    pub writer: WriterConfig,
}

impl Config {
    /// Load a config from a JSON file. Missing fields take their default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.generator.validate()?;
        self.writer.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "generator": { "order": 1, "max_leap": 3 } }"#).unwrap();
        assert_eq!(config.generator.order, 1);
        assert_eq!(config.generator.max_leap, 3);
        assert_eq!(config.generator.length, 50);
        assert_eq!(config.generator.harmony_intervals, vec![2, 4]);
        assert_eq!(config.writer, WriterConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_order() {
        let config = GeneratorConfig {
            order: 0,
            ..GeneratorConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_bad_probability() {
        let config = GeneratorConfig {
            harmony_probability: 1.5,
            ..GeneratorConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_out_of_range_gap() {
        for gap in [-1.0, 0.0, 1e7, f64::NAN] {
            let config = WriterConfig {
                gap,
                ..WriterConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(Error::InvalidConfig(_))),
                "gap {gap} was accepted"
            );
        }
        let config = WriterConfig {
            gap: MAX_GAP,
            ..WriterConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
