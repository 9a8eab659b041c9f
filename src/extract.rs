use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::notes::{QuarterLength, TimedNote};
use crate::scale::ScaleContext;

/// Where a pitch sits relative to the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Degree {
    /// Degree 1 through 7.
    Scale(u8),
    /// A chromatic pitch. Transitions through it are never recorded.
    OutOfScale,
}

impl Degree {
    pub fn in_scale(&self) -> Option<u8> {
        match self {
            Degree::Scale(degree) => Some(*degree),
            Degree::OutOfScale => None,
        }
    }
}

/// A single melodic note annotated with its scale degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub degree: Degree,
    pub duration: QuarterLength,
    pub offset: QuarterLength,
}

impl NoteEvent {
    /// The degree to continue from: the exact degree when in scale, otherwise the nearest one.
    pub fn resolved_degree(&self, scale: &ScaleContext) -> u8 {
        self.degree
            .in_scale()
            .unwrap_or_else(|| scale.degree_of(self.pitch))
    }
}

/// Pitches sounding together from the same onset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordEvent {
    /// Ascending, without duplicates.
    pub pitches: Vec<u8>,
    pub duration: QuarterLength,
    pub offset: QuarterLength,
}

/// The annotated contents of an input sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Single-note onsets, in time order. These drive the transition model.
    pub notes: Vec<NoteEvent>,
    /// Onsets with two or more pitches, in time order. These are carried into the output timeline
    /// but are not part of the melodic model.
    pub chords: Vec<ChordEvent>,
}

impl Extraction {
    /// Where the input stops sounding: the latest note or chord release.
    pub fn end(&self) -> QuarterLength {
        let notes = self
            .notes
            .iter()
            .map(|note| note.offset.saturating_add(note.duration));
        let chords = self
            .chords
            .iter()
            .map(|chord| chord.offset.saturating_add(chord.duration));
        notes.chain(chords).max().unwrap_or(QuarterLength::ZERO)
    }
}

/// Turns a decoded note stream into scale-annotated events.
pub struct EventExtractor<'a> {
    scale: &'a ScaleContext,
}

impl<'a> EventExtractor<'a> {
    pub fn new(scale: &'a ScaleContext) -> Self {
        EventExtractor { scale }
    }

    /// Group `notes` by onset. Lone onsets become [`NoteEvent`]s tagged with their exact degree
    /// (or [`Degree::OutOfScale`]); simultaneous onsets become [`ChordEvent`]s lasting as long as
    /// their longest member.
    pub fn extract(&self, notes: &[TimedNote]) -> Extraction {
        let mut onsets = BTreeMap::new();
        for note in notes {
            onsets
                .entry(note.offset)
                .or_insert_with(Vec::new)
                .push(*note);
        }

        let mut extraction = Extraction::default();
        for (offset, group) in onsets {
            let pitches = group
                .iter()
                .map(|note| note.pitch)
                .sorted()
                .dedup()
                .collect::<Vec<_>>();
            let duration = group
                .iter()
                .map(|note| note.duration)
                .max()
                .unwrap_or(QuarterLength::QUARTER);

            if let [pitch] = pitches[..] {
                extraction.notes.push(self.annotate(pitch, duration, offset));
            } else {
                extraction.chords.push(ChordEvent {
                    pitches,
                    duration,
                    offset,
                });
            }
        }
        extraction
    }

    pub fn annotate(
        &self,
        pitch: u8,
        duration: QuarterLength,
        offset: QuarterLength,
    ) -> NoteEvent {
        let degree = match self.scale.exact_degree(pitch) {
            Some(degree) => Degree::Scale(degree),
            None => Degree::OutOfScale,
        };
        NoteEvent {
            pitch,
            degree,
            duration,
            offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::{Key, Mode};

    fn timed(pitch: u8, offset: f64, duration: f64) -> TimedNote {
        TimedNote {
            pitch,
            offset: QuarterLength::from_quarters(offset),
            duration: QuarterLength::from_quarters(duration),
        }
    }

    #[test]
    fn test_extract_annotates_degrees() {
        let scale = ScaleContext::new(Key::new(0, Mode::Major), &[60, 67]);
        let notes = [timed(60, 0.0, 1.0), timed(61, 1.0, 1.0), timed(67, 2.0, 0.5)];
        let extraction = EventExtractor::new(&scale).extract(&notes);
        let degrees = extraction
            .notes
            .iter()
            .map(|note| note.degree)
            .collect::<Vec<_>>();
        assert_eq!(
            degrees,
            [Degree::Scale(1), Degree::OutOfScale, Degree::Scale(5)]
        );
        assert!(extraction.chords.is_empty());
        assert_eq!(extraction.notes[1].resolved_degree(&scale), 1);
    }

    #[test]
    fn test_simultaneous_onsets_become_chords() {
        let scale = ScaleContext::new(Key::new(0, Mode::Major), &[60, 67]);
        let notes = [
            timed(60, 0.0, 1.0),
            timed(67, 1.0, 2.0),
            timed(64, 1.0, 1.0),
            timed(60, 1.0, 1.0),
            timed(62, 3.0, 1.0),
        ];
        let extraction = EventExtractor::new(&scale).extract(&notes);
        assert_eq!(extraction.notes.len(), 2);
        assert_eq!(extraction.chords.len(), 1);
        let chord = &extraction.chords[0];
        assert_eq!(chord.pitches, vec![60, 64, 67]);
        assert_eq!(chord.duration, QuarterLength::from_quarters(2.0));
        assert_eq!(extraction.end(), QuarterLength::from_quarters(4.0));
    }

    #[test]
    fn test_empty_input() {
        let scale = ScaleContext::new(Key::default(), &[]);
        let extraction = EventExtractor::new(&scale).extract(&[]);
        assert_eq!(extraction, Extraction::default());
        assert_eq!(extraction.end(), QuarterLength::ZERO);
    }
}
