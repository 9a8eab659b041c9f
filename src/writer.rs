use midly::{
    num::{u15, u24, u28, u4, u7},
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::WriterConfig;
use crate::error::{Error, Result};
use crate::extract::Extraction;
use crate::generator::GeneratedNote;
use crate::notes::{Note, QuarterLength, DEFAULT_TEMPO};
use crate::scale::ScaleContext;

/// Pitches sounding together for a span of time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub offset: QuarterLength,
    pub duration: QuarterLength,
    pub pitches: Vec<u8>,
}

/// Original and generated events on one time axis, ready to be encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    /// Ordered by offset.
    pub events: Vec<TimelineEvent>,
    /// Microseconds per quarter note.
    pub tempo: u32,
    pub program: Option<u8>,
    /// Index of the first generated event in `events`.
    pub generated_from: usize,
}

impl Timeline {
    pub fn generated(&self) -> &[TimelineEvent] {
        &self.events[self.generated_from..]
    }

    pub fn original(&self) -> &[TimelineEvent] {
        &self.events[..self.generated_from]
    }
}

/// Lays generated notes out after the original ones and encodes the result as a midi file.
pub struct SequenceWriter<'a> {
    scale: &'a ScaleContext,
    config: WriterConfig,
}

impl<'a> SequenceWriter<'a> {
    pub fn new(scale: &'a ScaleContext, config: WriterConfig) -> Result<Self> {
        config.validate()?;
        Ok(SequenceWriter { scale, config })
    }

    /// Keep the original notes and chords where they are, then place `generated` back to back,
    /// starting `gap` after the last original release. Generated pitches outside the scale are
    /// dropped; a note left with no pitches sounds the tonic instead. Fails when the continuation
    /// would run past the end of the representable timeline.
    pub fn merge(&self, original: &Extraction, generated: &[GeneratedNote]) -> Result<Timeline> {
        let mut events = original
            .notes
            .iter()
            .map(|note| TimelineEvent {
                offset: note.offset,
                duration: note.duration,
                pitches: vec![note.pitch],
            })
            .chain(original.chords.iter().map(|chord| TimelineEvent {
                offset: chord.offset,
                duration: chord.duration,
                pitches: chord.pitches.clone(),
            }))
            .collect::<Vec<_>>();
        events.sort_by_key(|event| event.offset);
        let generated_from = events.len();

        let too_long = || Error::InvalidConfig("continuation does not fit on the timeline".into());
        let start = if events.is_empty() {
            QuarterLength::ZERO
        } else {
            original
                .end()
                .checked_add(self.config.gap())
                .ok_or_else(too_long)?
        };
        let mut offset = start;
        for note in generated {
            events.push(TimelineEvent {
                offset,
                duration: note.duration(),
                pitches: self.scale_pitches(note.pitches()),
            });
            offset = offset.checked_add(note.duration()).ok_or_else(too_long)?;
        }
        debug!(
            original = generated_from,
            generated = generated.len(),
            start = start.as_quarters(),
            "merged timeline"
        );

        Ok(Timeline {
            events,
            tempo: DEFAULT_TEMPO,
            program: None,
            generated_from,
        })
    }

    /// The in-scale subset of `pitches`, or the tonic alone when none are in the scale.
    pub fn scale_pitches(&self, pitches: &[u8]) -> Vec<u8> {
        let valid = pitches
            .iter()
            .copied()
            .filter(|&p| self.scale.contains(p))
            .collect::<Vec<_>>();
        if valid.is_empty() {
            vec![self.scale.tonic_pitch()]
        } else {
            valid
        }
    }

    /// Encode `timeline` as a single-track (format 0) midi file.
    pub fn encode_timeline(&self, timeline: &Timeline) -> Result<Vec<u8>> {
        let ticks_per_beat = self.config.ticks_per_beat;
        let channel = u4::new(self.config.channel.min(15));

        let mut track: Track<'static> = vec![TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(
                timeline.tempo.min(0xFF_FFFF),
            ))),
        }];
        if let Some(program) = timeline.program {
            track.push(TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::ProgramChange {
                        program: u7::new(program.min(127)),
                    },
                },
            });
        }

        let mut notes = vec![];
        for event in &timeline.events {
            let (Some(start), Some(length)) = (
                event.offset.to_ticks(ticks_per_beat),
                event.duration.to_ticks(ticks_per_beat),
            ) else {
                return Err(Error::InvalidConfig(format!(
                    "event at {} quarters does not fit in 32-bit ticks at {} ticks per beat",
                    event.offset.as_quarters(),
                    ticks_per_beat
                )));
            };
            notes.extend(event.pitches.iter().map(|&pitch| {
                Note::new(
                    pitch,
                    self.config.velocity,
                    start,
                    length.max(1),
                    self.config.channel,
                )
            }));
        }
        track.append(&mut Note::to_events(notes)?);
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(ticks_per_beat)),
        ));
        smf.tracks.push(track);

        let mut buf = Vec::new();
        smf.write_std(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::EventExtractor;
    use crate::notes::{parse_note_events, TimedNote};
    use crate::scale::{Key, Mode};

    fn q(quarters: f64) -> QuarterLength {
        QuarterLength::from_quarters(quarters)
    }

    fn c_major() -> ScaleContext {
        ScaleContext::new(Key::new(0, Mode::Major), &[60, 67])
    }

    fn original(scale: &ScaleContext) -> Extraction {
        let notes = [
            TimedNote {
                pitch: 60,
                offset: q(0.0),
                duration: q(1.0),
            },
            TimedNote {
                pitch: 64,
                offset: q(1.0),
                duration: q(1.5),
            },
        ];
        EventExtractor::new(scale).extract(&notes)
    }

    #[test]
    fn test_merge_places_notes_after_gap() {
        let scale = c_major();
        let writer = SequenceWriter::new(&scale, WriterConfig::default()).unwrap();
        let generated = [
            GeneratedNote::single(62, q(0.5)),
            GeneratedNote::chord(64, [67], q(1.0)),
            GeneratedNote::single(65, q(0.5)),
        ];
        let timeline = writer.merge(&original(&scale), &generated).unwrap();
        assert_eq!(timeline.original().len(), 2);
        let offsets = timeline
            .generated()
            .iter()
            .map(|event| event.offset)
            .collect::<Vec<_>>();
        assert_eq!(offsets, [q(4.5), q(5.0), q(6.0)]);
        assert_eq!(timeline.generated()[1].pitches, vec![64, 67]);
    }

    #[test]
    fn test_merge_without_original_starts_at_zero() {
        let scale = c_major();
        let writer = SequenceWriter::new(&scale, WriterConfig::default()).unwrap();
        let timeline = writer
            .merge(&Extraction::default(), &[GeneratedNote::single(60, q(1.0))])
            .unwrap();
        assert_eq!(timeline.generated()[0].offset, QuarterLength::ZERO);
    }

    #[test]
    fn test_merge_rejects_overflowing_timeline() {
        let scale = c_major();
        let writer = SequenceWriter::new(&scale, WriterConfig::default()).unwrap();
        let far_gap = WriterConfig {
            gap: 1e7,
            ..WriterConfig::default()
        };
        assert!(matches!(
            SequenceWriter::new(&scale, far_gap),
            Err(Error::InvalidConfig(_))
        ));

        let huge = QuarterLength::from_quarters(8_000_000.0);
        let generated = [GeneratedNote::single(62, huge), GeneratedNote::single(64, huge)];
        assert!(matches!(
            writer.merge(&original(&scale), &generated),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_encode_rejects_ticks_past_32_bits() {
        let scale = c_major();
        let config = WriterConfig {
            ticks_per_beat: 960,
            ..WriterConfig::default()
        };
        let writer = SequenceWriter::new(&scale, config).unwrap();
        let timeline = Timeline {
            events: vec![TimelineEvent {
                offset: q(5_000_000.0),
                duration: q(1.0),
                pitches: vec![60],
            }],
            tempo: DEFAULT_TEMPO,
            program: None,
            generated_from: 0,
        };
        assert!(matches!(
            writer.encode_timeline(&timeline),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_out_of_scale_pitches_are_filtered() {
        let scale = c_major();
        let writer = SequenceWriter::new(&scale, WriterConfig::default()).unwrap();
        assert_eq!(writer.scale_pitches(&[61, 64]), vec![64]);
        assert_eq!(writer.scale_pitches(&[61, 63]), vec![scale.tonic_pitch()]);
        assert_eq!(writer.scale_pitches(&[]), vec![scale.tonic_pitch()]);
    }

    #[test]
    fn test_encode_round_trip() {
        let scale = c_major();
        let config = WriterConfig {
            ticks_per_beat: 96,
            ..WriterConfig::default()
        };
        let writer = SequenceWriter::new(&scale, config).unwrap();
        let mut timeline = writer
            .merge(
                &original(&scale),
                &[GeneratedNote::chord(62, [65], q(0.5))],
            )
            .unwrap();
        timeline.tempo = 400_000;
        timeline.program = Some(5);

        let bytes = writer.encode_timeline(&timeline).unwrap();
        let parsed = parse_note_events(&bytes).unwrap();
        assert_eq!(parsed.info.tempo(), 400_000);
        assert_eq!(parsed.program, Some(5));
        let notes = parsed
            .notes
            .iter()
            .map(|note| (note.pitch, note.offset, note.duration))
            .collect::<Vec<_>>();
        assert_eq!(
            notes,
            [
                (60, q(0.0), q(1.0)),
                (64, q(1.0), q(1.5)),
                (62, q(4.5), q(0.5)),
                (65, q(4.5), q(0.5)),
            ]
        );
    }
}
