use std::path::Path;

use midly::{MidiMessage, Smf, TrackEventKind};
use rand::Rng;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::extract::{EventExtractor, Extraction};
use crate::generator::{GeneratedNote, MelodyGenerator};
use crate::notes::parse_note_events;
use crate::scale::{Key, KeyDetector, KrumhanslSchmuckler, ScaleContext};
use crate::writer::{SequenceWriter, Timeline};

/// Log every event of a midi file except note on/off messages.
pub fn describe_midi(raw: &[u8]) -> Result<()> {
    let smf = Smf::parse(raw)?;
    info!(header = ?smf.header, tracks = smf.tracks.len(), "midi file");
    for (i, track) in smf.tracks.iter().enumerate() {
        for event in track {
            if let TrackEventKind::Midi {
                message: MidiMessage::NoteOn { .. } | MidiMessage::NoteOff { .. },
                ..
            } = event.kind
            {
                continue;
            }
            info!(track = i, delta = event.delta.as_int(), kind = ?event.kind);
        }
    }
    Ok(())
}

/// The result of continuing one input sequence.
#[derive(Debug, Clone)]
pub struct Continuation {
    pub key: Key,
    pub extraction: Extraction,
    pub generated: Vec<GeneratedNote>,
    pub timeline: Timeline,
    /// The encoded midi file: the original notes followed by the continuation.
    pub midi: Vec<u8>,
}

/// Decode `raw`, detect its key with `detector`, and append a generated continuation. The tempo and
/// first program change of the input are carried over.
pub fn continue_midi<R: Rng + ?Sized>(
    raw: &[u8],
    config: &Config,
    detector: &impl KeyDetector,
    rng: &mut R,
) -> Result<Continuation> {
    config.validate()?;
    let parsed = parse_note_events(raw)?;
    let pitches = parsed.notes.iter().map(|note| note.pitch).collect::<Vec<_>>();
    let scale = ScaleContext::detect(detector, &pitches);
    info!(key = %scale.key(), notes = parsed.notes.len(), "detected key");

    let extraction = EventExtractor::new(&scale).extract(&parsed.notes);
    let generator = MelodyGenerator::new(config.generator.clone())?;
    let model = generator.build_model(&extraction.notes, &scale);
    let (degrees, durations) = model.stats();
    info!("degree model: {}", degrees);
    info!("duration model: {}", durations);

    let generated = generator.generate_with(&model, &extraction.notes, &scale, rng)?;

    let writer = SequenceWriter::new(&scale, config.writer.clone())?;
    let mut timeline = writer.merge(&extraction, &generated)?;
    timeline.tempo = parsed.info.tempo();
    timeline.program = parsed.program;
    let midi = writer.encode_timeline(&timeline)?;

    Ok(Continuation {
        key: scale.key(),
        extraction,
        generated,
        timeline,
        midi,
    })
}

/// Read a midi file, continue it, and write the result to `out_path`.
pub fn continue_midi_file<R: Rng + ?Sized>(
    in_path: impl AsRef<Path>,
    out_path: impl AsRef<Path>,
    config: &Config,
    rng: &mut R,
) -> Result<Continuation> {
    let raw = std::fs::read(in_path)?;
    let continuation = continue_midi(&raw, config, &KrumhanslSchmuckler::default(), rng)?;
    std::fs::write(out_path, &continuation.midi)?;
    Ok(continuation)
}
