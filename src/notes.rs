use std::collections::{hash_map, HashMap};

use derive_more::{Add, AddAssign, From, Sub, SubAssign};
use midly::{
    num::{u24, u28, u4, u7},
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Resolution of a [`QuarterLength`]: how many divisions make up one quarter note.
pub const DIVISIONS_PER_QUARTER: u32 = 480;

/// Tempo used when a file does not specify one: 120 BPM (500,000 microseconds per beat).
pub const DEFAULT_TEMPO: u32 = 500_000;

#[derive(
    From,
    Add,
    AddAssign,
    Sub,
    SubAssign,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Clone,
    Copy,
    Debug,
    Default,
    Serialize,
    Deserialize,
)]
#[serde(into = "f64", from = "f64")]
/// A length of musical time measured in quarter notes. Stored as an exact count of
/// [`DIVISIONS_PER_QUARTER`] so that it can be hashed, ordered and summed without drift.
pub struct QuarterLength(u32);

impl QuarterLength {
    pub const ZERO: QuarterLength = QuarterLength(0);
    pub const QUARTER: QuarterLength = QuarterLength(DIVISIONS_PER_QUARTER);

    /// Round a floating point number of quarter notes to the nearest division. Negative and NaN
    /// values become zero.
    pub fn from_quarters(quarters: f64) -> QuarterLength {
        let divisions = (quarters * DIVISIONS_PER_QUARTER as f64).round();
        if divisions.is_nan() || divisions <= 0.0 {
            QuarterLength(0)
        } else {
            QuarterLength(divisions.min(u32::MAX as f64) as u32)
        }
    }

    pub fn as_quarters(&self) -> f64 {
        self.0 as f64 / DIVISIONS_PER_QUARTER as f64
    }

    pub fn divisions(&self) -> u32 {
        self.0
    }

    /// Convert metrical midi ticks at the given resolution into quarter lengths. `None` when the
    /// result does not fit.
    pub fn from_ticks(ticks: u32, ticks_per_beat: u16) -> Option<QuarterLength> {
        let scaled = ticks as u64 * DIVISIONS_PER_QUARTER as u64;
        let tpb = ticks_per_beat.max(1) as u64;
        u32::try_from((scaled + tpb / 2) / tpb)
            .ok()
            .map(QuarterLength)
    }

    /// Convert to metrical midi ticks at the given resolution. `None` when the result does not fit.
    pub fn to_ticks(&self, ticks_per_beat: u16) -> Option<u32> {
        let scaled = self.0 as u64 * ticks_per_beat as u64;
        let divisions = DIVISIONS_PER_QUARTER as u64;
        u32::try_from((scaled + divisions / 2) / divisions).ok()
    }

    pub fn checked_add(self, other: QuarterLength) -> Option<QuarterLength> {
        self.0.checked_add(other.0).map(QuarterLength)
    }

    pub fn saturating_add(self, other: QuarterLength) -> QuarterLength {
        QuarterLength(self.0.saturating_add(other.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<f64> for QuarterLength {
    fn from(quarters: f64) -> Self {
        QuarterLength::from_quarters(quarters)
    }
}

impl From<QuarterLength> for f64 {
    fn from(x: QuarterLength) -> f64 {
        x.as_quarters()
    }
}

#[derive(Debug, Clone, Copy)]
/// A struct which records the timing information about a midi (specifically, the Tempo and Timing
/// of the midi).
pub struct MidiInfo {
    timing: Timing,
    tempo: u24,
}

impl MidiInfo {
    /// Create a new MidiInfo from the given header and set of tracks. This will attempt to find the
    /// tempo midi messages. If there are multiple, warnings are logged and only the first one is used.
    /// If no tempo is specified, the tempo defaults to 120 BPM.
    pub fn new<'a>(
        header: Header,
        tracks: impl IntoIterator<Item = impl IntoIterator<Item = &'a TrackEvent<'a>>>,
    ) -> MidiInfo {
        let meta_events = tracks.into_iter().flatten().filter_map(|x| match x.kind {
            TrackEventKind::Meta(meta_msg) => Some(meta_msg),
            _ => None,
        });

        let mut tempo = None;
        for event in meta_events {
            if let MetaMessage::Tempo(new_tempo) = event {
                if let Some(tempo) = tempo {
                    warn!(old = ?tempo, new = ?new_tempo, "tempo already set, ignoring");
                } else {
                    tempo = Some(new_tempo)
                }
            }
        }

        if tempo.is_none() {
            if let Timing::Timecode(..) = header.timing {
                warn!("timecode midi has no tempo, defaulting to 120 BPM");
            }
        }

        MidiInfo {
            timing: header.timing,
            tempo: tempo.unwrap_or(u24::new(DEFAULT_TEMPO)),
        }
    }

    /// Microseconds per beat.
    pub fn tempo(&self) -> u32 {
        self.tempo.as_int()
    }

    /// Convert midi Ticks into quarter lengths, using the Timing recorded by the MidiInfo. Timecode
    /// timings are converted to seconds first and then to beats through the tempo. `None` when the
    /// time is too long to represent.
    pub fn to_quarters(&self, ticks: Ticks) -> Option<QuarterLength> {
        match self.timing {
            Timing::Metrical(ticks_per_beat) => {
                QuarterLength::from_ticks(ticks.0, ticks_per_beat.as_int())
            }
            Timing::Timecode(fps, ticks_per_frame) => {
                let fps = fps.as_f32() as f64;
                let ticks_per_frame = ticks_per_frame.max(1) as f64;
                let seconds = ticks.0 as f64 / fps / ticks_per_frame;
                let quarters = seconds / self.seconds_per_beat();
                if quarters * DIVISIONS_PER_QUARTER as f64 > u32::MAX as f64 {
                    None
                } else {
                    Some(QuarterLength::from_quarters(quarters))
                }
            }
        }
    }

    /// Get the number of seconds per beat that this Midi file specifies. This is based off of the
    /// given tempo value.
    fn seconds_per_beat(&self) -> f64 {
        // Tempo is in microseconds per beat, so 500,000 is half a second per beat (120 BPM).
        self.tempo.as_int().max(1) as f64 / 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy)]
/// A midi note, represented with a start time and length. Note that midi does not really have a notion
/// of "notes"--instead there are just NoteOn and NoteOff events.
pub struct Note {
    key: u7,
    vel: u7,
    start: Ticks,
    length: Ticks,
    channel: u4,
}

impl Note {
    /// Build a note from plain integers. Key, velocity and channel are clamped to their midi ranges.
    pub fn new(key: u8, vel: u8, start: u32, length: u32, channel: u8) -> Note {
        Note {
            key: u7::new(key.min(127)),
            vel: u7::new(vel.min(127)),
            start: Ticks(start),
            length: Ticks(length),
            channel: u4::new(channel.min(15)),
        }
    }

    pub fn key(&self) -> u8 {
        self.key.as_int()
    }

    /// Attempt to turn a set of TrackEvents into a set of Notes. A note is created whenever a NoteOn
    /// event of a specific key is later followed by a NoteOff event (or a zero-velocity NoteOn) of
    /// the same key and channel. The velocity will be equal to the NoteOn event's velocity. NoteOff
    /// events without a corresponding NoteOn event are dropped, as are NoteOn events that have no
    /// corresponding NoteOff event. Fails when the track runs past the end of a 32-bit tick clock.
    pub fn from_events(events: &[TrackEvent]) -> Result<Vec<Note>> {
        let mut notes = vec![];
        let mut ticks = Ticks::from(0);

        let mut active_notes = HashMap::<(u4, u7), Vec<(Ticks, u7)>>::new();

        for event in events {
            ticks = ticks.checked_add(event.delta.into()).ok_or_else(|| {
                Error::UnsupportedMidi("track is longer than 2^32 ticks".into())
            })?;
            let TrackEventKind::Midi { message, channel } = event.kind else {
                continue;
            };
            let released = match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    active_notes
                        .entry((channel, key))
                        .or_default()
                        .push((ticks, vel));
                    None
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => Some(key),
                _ => None,
            };
            let Some(key) = released else {
                continue;
            };

            let note_on = match active_notes.entry((channel, key)) {
                hash_map::Entry::Occupied(mut entry) => entry.get_mut().pop(),
                hash_map::Entry::Vacant(_) => None,
            };
            match note_on {
                Some((start, vel)) => notes.push(Note {
                    channel,
                    key,
                    vel,
                    start,
                    length: ticks - start,
                }),
                None => warn!(
                    ?event,
                    "dropping NoteOff event with no corresponding NoteOn event"
                ),
            }
        }

        let dangling: usize = active_notes.values().map(Vec::len).sum();
        if dangling > 0 {
            warn!(dangling, "dropping NoteOn events that were never released");
        }

        notes.sort_by_key(|note| (note.start, note.key));
        Ok(notes)
    }

    /// Turn notes back into delta-timed track events. Fails when a note ends past the 32-bit tick
    /// clock or when two consecutive events are further apart than a midi delta can express.
    pub fn to_events(notes: impl IntoIterator<Item = Note>) -> Result<Vec<TrackEvent<'static>>> {
        let mut events = vec![];
        for note in notes {
            let note_on = TrackEventKind::Midi {
                channel: note.channel,
                message: MidiMessage::NoteOn {
                    key: note.key,
                    vel: note.vel,
                },
            };
            let note_off = TrackEventKind::Midi {
                channel: note.channel,
                message: MidiMessage::NoteOff {
                    key: note.key,
                    vel: note.vel,
                },
            };
            let end = note.start.checked_add(note.length).ok_or_else(|| {
                Error::UnsupportedMidi("note ends past the last representable tick".into())
            })?;
            events.push((note.start, true, note_on));
            events.push((end, false, note_off));
        }
        // Releases sort ahead of attacks on the same tick so repeated keys are not cut short.
        events.sort_by_key(|(time, is_on, _)| (*time, *is_on));

        let mut track_events = vec![];
        let mut prev_time = Ticks::from(0);
        for (time, _, event) in events {
            let delta = time - prev_time;
            if delta > Ticks(MAX_DELTA) {
                return Err(Error::UnsupportedMidi(format!(
                    "{} ticks between events exceeds the midi delta limit",
                    delta.0
                )));
            }
            track_events.push(TrackEvent {
                delta: delta.into(),
                kind: event,
            });
            prev_time = time;
        }
        Ok(track_events)
    }
}

/// A note placed in musical time, before any scale analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedNote {
    pub pitch: u8,
    pub offset: QuarterLength,
    pub duration: QuarterLength,
}

/// Everything the continuation pipeline needs from an input midi file.
#[derive(Debug, Clone)]
pub struct ParsedMidi {
    /// Notes from every track, ordered by onset and then pitch.
    pub notes: Vec<TimedNote>,
    pub info: MidiInfo,
    /// First program change found in the file, if any.
    pub program: Option<u8>,
}

/// Decode a standard midi file into timed notes. Format 0 and 1 files are supported; the notes of
/// every track are merged into one stream.
pub fn parse_note_events(raw: &[u8]) -> Result<ParsedMidi> {
    let smf = Smf::parse(raw)?;
    if smf.header.format == Format::Sequential {
        return Err(Error::UnsupportedMidi(
            "format 2 (sequential) midi files are not supported".into(),
        ));
    }

    let info = MidiInfo::new(smf.header, &smf.tracks);
    let program = smf.tracks.iter().flatten().find_map(|event| match event.kind {
        TrackEventKind::Midi {
            message: MidiMessage::ProgramChange { program },
            ..
        } => Some(program.as_int()),
        _ => None,
    });

    let mut notes = vec![];
    for track in &smf.tracks {
        for note in Note::from_events(track)? {
            if note.length == Ticks(0) {
                continue;
            }
            let timed = match (info.to_quarters(note.start), info.to_quarters(note.length)) {
                (Some(offset), Some(duration)) if offset.checked_add(duration).is_some() => {
                    TimedNote {
                        pitch: note.key.as_int(),
                        offset,
                        duration,
                    }
                }
                _ => {
                    return Err(Error::UnsupportedMidi(
                        "note lies too far into the file to be timed".into(),
                    ))
                }
            };
            if !timed.duration.is_zero() {
                notes.push(timed);
            }
        }
    }
    notes.sort_by_key(|note| (note.offset, note.pitch));

    Ok(ParsedMidi {
        notes,
        info,
        program,
    })
}

#[derive(
    From, Add, AddAssign, Sub, SubAssign, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug,
)]
/// Wrapper struct for the Midi Tick unit.
pub struct Ticks(u32);

/// Largest delta time a midi event can carry.
const MAX_DELTA: u32 = 0x0FFF_FFFF;

impl Ticks {
    fn checked_add(self, other: Ticks) -> Option<Ticks> {
        self.0.checked_add(other.0).map(Ticks)
    }
}

impl From<u28> for Ticks {
    fn from(x: u28) -> Self {
        Ticks(x.as_int())
    }
}

impl From<Ticks> for u28 {
    fn from(x: Ticks) -> Self {
        u28::new(x.0.min(MAX_DELTA))
    }
}
