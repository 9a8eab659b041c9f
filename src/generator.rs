use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GeneratorConfig;
use crate::error::Result;
use crate::extract::NoteEvent;
use crate::markov::TransitionModel;
use crate::notes::QuarterLength;
use crate::scale::{clamp_pitch, wrap_degree, ScaleContext};

/// One generated step: a melody pitch, optionally decorated with a harmony pitch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedNote {
    /// Ascending, without duplicates, never empty.
    pitches: Vec<u8>,
    /// The pitch carrying the melody line. Always one of `pitches`.
    melody: u8,
    duration: QuarterLength,
}

impl GeneratedNote {
    pub fn single(pitch: u8, duration: QuarterLength) -> GeneratedNote {
        GeneratedNote {
            pitches: vec![pitch],
            melody: pitch,
            duration,
        }
    }

    /// A note sounding `melody` together with `others`. Duplicate pitches collapse, so a unison
    /// harmony yields a single-pitch note.
    pub fn chord(
        melody: u8,
        others: impl IntoIterator<Item = u8>,
        duration: QuarterLength,
    ) -> GeneratedNote {
        let pitches = others
            .into_iter()
            .chain([melody])
            .sorted()
            .dedup()
            .collect();
        GeneratedNote {
            pitches,
            melody,
            duration,
        }
    }

    pub fn pitches(&self) -> &[u8] {
        &self.pitches
    }

    pub fn melody(&self) -> u8 {
        self.melody
    }

    pub fn duration(&self) -> QuarterLength {
        self.duration
    }

    pub fn is_chord(&self) -> bool {
        self.pitches.len() > 1
    }
}

/// Where the melody currently is, plus the duration history for the next lookup. Degrees are
/// looked up from `degree` alone.
#[derive(Debug, Clone)]
struct Voice {
    degree: u8,
    pitch: u8,
    durations: Vec<QuarterLength>,
}

/// Append `value` and keep only the last `order` entries.
fn push_window<T>(history: &mut Vec<T>, value: T, order: usize) {
    history.push(value);
    if history.len() > order {
        history.drain(..history.len() - order);
    }
}

/// Samples continuations of a melody from a [`TransitionModel`], keeping every pitch in the scale
/// and every melodic interval within `max_leap` semitones.
#[derive(Debug, Clone)]
pub struct MelodyGenerator {
    config: GeneratorConfig,
}

impl MelodyGenerator {
    pub fn new(config: GeneratorConfig) -> Result<MelodyGenerator> {
        config.validate()?;
        Ok(MelodyGenerator { config })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn build_model(&self, events: &[NoteEvent], scale: &ScaleContext) -> TransitionModel {
        TransitionModel::build(events, self.config.order, scale.degrees())
    }

    /// Build a model from `events` and sample `length` notes continuing them.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        events: &[NoteEvent],
        scale: &ScaleContext,
        rng: &mut R,
    ) -> Result<Vec<GeneratedNote>> {
        let model = self.build_model(events, scale);
        self.generate_with(&model, events, scale, rng)
    }

    /// Sample `length` notes from an already built model, continuing from the end of `events`.
    pub fn generate_with<R: Rng + ?Sized>(
        &self,
        model: &TransitionModel,
        events: &[NoteEvent],
        scale: &ScaleContext,
        rng: &mut R,
    ) -> Result<Vec<GeneratedNote>> {
        model.validate()?;
        let order = model.order();
        let mut voice = self.seed(model, events, scale, rng)?;
        debug!(
            degree = voice.degree,
            pitch = voice.pitch,
            order,
            length = self.config.length,
            "seeded melody"
        );

        let mut melody = Vec::with_capacity(self.config.length);
        for _ in 0..self.config.length {
            // Rhythm first, so that it follows the input's pattern regardless of pitch choices.
            let duration = model.sample_duration(&voice.durations, rng);
            push_window(&mut voice.durations, duration, order);

            let sampled = model.sample_degree(&[voice.degree], rng)?;
            let (degree, pitch) = self.lead(scale, &voice, sampled);

            let note = if rng.gen_bool(self.config.harmony_probability) {
                self.harmonize(model, scale, degree, pitch, duration, rng)
            } else {
                GeneratedNote::single(pitch, duration)
            };
            melody.push(note);

            voice.degree = degree;
            voice.pitch = pitch;
        }
        Ok(melody)
    }

    /// Start from the last input note, snapped into the scale. Without input, start on a random
    /// scale degree in the middle of the scale's register.
    fn seed<R: Rng + ?Sized>(
        &self,
        model: &TransitionModel,
        events: &[NoteEvent],
        scale: &ScaleContext,
        rng: &mut R,
    ) -> Result<Voice> {
        let order = model.order();
        let Some(last) = events.last() else {
            let degree = model.sample_degree(&[], rng)?;
            return Ok(Voice {
                degree,
                pitch: scale.pitch_of(degree, scale.center()),
                durations: vec![],
            });
        };

        let degree = last.resolved_degree(scale);
        let recent = &events[events.len().saturating_sub(order)..];
        Ok(Voice {
            degree,
            pitch: scale.pitch_of(degree, last.pitch),
            durations: recent.iter().map(|event| event.duration).collect(),
        })
    }

    /// Place `sampled` in the octave nearest the previous pitch. When that is still more than
    /// `max_leap` away, step to the adjacent scale pitch in the same direction instead, and when
    /// even a step is too wide, repeat the previous pitch.
    fn lead(&self, scale: &ScaleContext, voice: &Voice, sampled: u8) -> (u8, u8) {
        let max_leap = self.config.max_leap as i16;
        let from = voice.pitch as i16;
        let target = scale.pitch_of(sampled, voice.pitch);
        let leap = target as i16 - from;
        if leap.abs() <= max_leap {
            return (sampled, target);
        }

        match scale.step(voice.pitch, leap.signum()) {
            Some(step) if (step as i16 - from).abs() <= max_leap => {
                (scale.degree_of(step), step)
            }
            _ => (voice.degree, clamp_pitch(from)),
        }
    }

    /// Add a third or fifth (or whichever intervals are configured) above `degree`, voiced in the
    /// octave at or above the melody pitch. Degrees outside the model's scale fall back to a unison.
    fn harmonize<R: Rng + ?Sized>(
        &self,
        model: &TransitionModel,
        scale: &ScaleContext,
        degree: u8,
        pitch: u8,
        duration: QuarterLength,
        rng: &mut R,
    ) -> GeneratedNote {
        let interval = self
            .config
            .harmony_intervals
            .choose(rng)
            .copied()
            .unwrap_or(0);
        let harmony_degree = wrap_degree(degree as i16 + interval as i16);
        let harmony_degree = if model.scale_degrees().contains(&harmony_degree) {
            harmony_degree
        } else {
            degree
        };
        let harmony_pitch = scale.pitch_above(harmony_degree, pitch);
        GeneratedNote::chord(pitch, [harmony_pitch], duration)
    }
}

/// Continue `input_notes` by `length` notes using an order-`order` model, with melodic leaps
/// limited to `max_leap` semitones and the default harmony settings. The result depends only on
/// the inputs and the state of `rng`.
pub fn generate<R: Rng + ?Sized>(
    input_notes: &[NoteEvent],
    scale: &ScaleContext,
    order: usize,
    length: usize,
    max_leap: u8,
    rng: &mut R,
) -> Result<Vec<GeneratedNote>> {
    let generator = MelodyGenerator::new(GeneratorConfig {
        order,
        length,
        max_leap,
        ..GeneratorConfig::default()
    })?;
    generator.generate(input_notes, scale, rng)
}
