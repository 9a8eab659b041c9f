//! Keys, modes and the degree <-> pitch mapping the generator samples through.
//!
//! A [`ScaleContext`] is built once per request, either directly from a known [`Key`] or by
//! running a [`KeyDetector`] over the input pitches, and is read-only afterwards.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// The scale degrees every supported mode defines.
pub const SCALE_DEGREES: [u8; 7] = [1, 2, 3, 4, 5, 6, 7];

const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
];

/// Seven-note diatonic modes, each defined by its interval pattern from the tonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Major,
    /// Natural minor.
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
}

impl Mode {
    /// Semitone offsets from the tonic for degrees 1 through 7.
    pub fn intervals(self) -> [u8; 7] {
        match self {
            Mode::Major => [0, 2, 4, 5, 7, 9, 11],
            Mode::Minor => [0, 2, 3, 5, 7, 8, 10],
            Mode::Dorian => [0, 2, 3, 5, 7, 9, 10],
            Mode::Phrygian => [0, 1, 3, 5, 7, 8, 10],
            Mode::Lydian => [0, 2, 4, 6, 7, 9, 11],
            Mode::Mixolydian => [0, 2, 4, 5, 7, 9, 10],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::Major => "major",
            Mode::Minor => "minor",
            Mode::Dorian => "dorian",
            Mode::Phrygian => "phrygian",
            Mode::Lydian => "lydian",
            Mode::Mixolydian => "mixolydian",
        }
    }
}

/// A tonic pitch class (0 = C) and a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "KeyFields")]
pub struct Key {
    tonic: u8,
    mode: Mode,
}

#[derive(Deserialize)]
struct KeyFields {
    tonic: u8,
    mode: Mode,
}

impl From<KeyFields> for Key {
    fn from(fields: KeyFields) -> Self {
        Key::new(fields.tonic, fields.mode)
    }
}

impl Key {
    /// `tonic` is reduced to a pitch class, so any midi pitch may be passed.
    pub fn new(tonic: u8, mode: Mode) -> Key {
        Key {
            tonic: tonic % 12,
            mode,
        }
    }

    /// Pitch class of the tonic, 0 through 11.
    pub fn tonic(&self) -> u8 {
        self.tonic
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

impl Default for Key {
    fn default() -> Self {
        Key::new(0, Mode::Major)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}",
            PITCH_CLASS_NAMES[self.tonic as usize],
            self.mode.name()
        )
    }
}

/// Infers the key of a set of midi pitches.
pub trait KeyDetector {
    fn detect_key(&self, pitches: &[u8]) -> Key;
}

/// Krumhansl-Schmuckler key finding: the pitch-class histogram of the input is correlated against
/// the Krumhansl-Kessler major and minor profiles rotated to each of the twelve tonics, and the
/// best match wins. Empty input yields C major.
#[derive(Debug, Clone)]
pub struct KrumhanslSchmuckler {
    major_profile: [f64; 12],
    minor_profile: [f64; 12],
}

impl Default for KrumhanslSchmuckler {
    fn default() -> Self {
        KrumhanslSchmuckler {
            major_profile: [
                6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
            ],
            minor_profile: [
                6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
            ],
        }
    }
}

impl KeyDetector for KrumhanslSchmuckler {
    fn detect_key(&self, pitches: &[u8]) -> Key {
        if pitches.is_empty() {
            return Key::default();
        }

        let mut histogram = [0.0f64; 12];
        for &pitch in pitches {
            histogram[(pitch % 12) as usize] += 1.0;
        }

        let mut best = Key::default();
        let mut best_correlation = f64::NEG_INFINITY;
        for tonic in 0..12 {
            let rotated: [f64; 12] = std::array::from_fn(|i| histogram[(i + tonic) % 12]);
            for (mode, profile) in [
                (Mode::Major, &self.major_profile),
                (Mode::Minor, &self.minor_profile),
            ] {
                let correlation = pearson(&rotated, profile);
                if correlation > best_correlation {
                    best_correlation = correlation;
                    best = Key::new(tonic as u8, mode);
                }
            }
        }
        debug!(key = %best, correlation = best_correlation, "detected key");
        best
    }
}

fn pearson(a: &[f64; 12], b: &[f64; 12]) -> f64 {
    let mean_a = a.iter().sum::<f64>() / 12.0;
    let mean_b = b.iter().sum::<f64>() / 12.0;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a > 0.0 && var_b > 0.0 {
        cov / (var_a.sqrt() * var_b.sqrt())
    } else {
        0.0
    }
}

/// A key materialized over a pitch range. Pitches are in the scale when their pitch class belongs
/// to the key, in any octave; the range only anchors the register used when there is no better
/// hint (see [`ScaleContext::center`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleContext {
    key: Key,
    low: u8,
    high: u8,
    degrees: Vec<u8>,
}

impl ScaleContext {
    /// Build a context for `key` over the observed `pitches`. The range is widened outward to the
    /// tonic at or below the lowest pitch and the tonic at or above the highest, so every degree
    /// has at least one instance in it. Without pitches the range is the octave starting at the
    /// tonic above middle C's octave start (C4 = 60).
    pub fn new(key: Key, pitches: &[u8]) -> ScaleContext {
        let tonic = key.tonic as i16;
        let (low, high) = match (pitches.iter().min(), pitches.iter().max()) {
            (Some(&min), Some(&max)) => {
                let (min, max) = (min as i16, max as i16);
                let low = min - (min - tonic).rem_euclid(12);
                let high = max + (tonic - max).rem_euclid(12);
                (low, high.max(low + 12))
            }
            _ => (60 + tonic, 72 + tonic),
        };
        // Any twelve consecutive semitones hold every pitch class, so the clamped range still
        // contains each degree.
        let (low, high) = if high > 127 {
            (low.min(116), 127)
        } else if low < 0 {
            (0, high.max(11))
        } else {
            (low, high)
        };

        ScaleContext {
            key,
            low: low as u8,
            high: high as u8,
            degrees: SCALE_DEGREES.to_vec(),
        }
    }

    /// Detect the key of `pitches` with `detector` and build a context over them.
    pub fn detect(detector: &impl KeyDetector, pitches: &[u8]) -> ScaleContext {
        ScaleContext::new(detector.detect_key(pitches), pitches)
    }

    pub fn key(&self) -> Key {
        self.key
    }

    /// The valid scale degrees, always 1 through 7.
    pub fn degrees(&self) -> &[u8] {
        &self.degrees
    }

    pub fn range(&self) -> (u8, u8) {
        (self.low, self.high)
    }

    /// Every in-scale pitch within the materialized range, ascending.
    pub fn scale_pitches(&self) -> Vec<u8> {
        (self.low..=self.high).filter(|&p| self.contains(p)).collect()
    }

    /// Whether a midi pitch belongs to the scale (in any octave).
    pub fn contains(&self, pitch: u8) -> bool {
        self.exact_degree(pitch).is_some()
    }

    /// The degree of `pitch` if its pitch class is in the scale.
    pub fn exact_degree(&self, pitch: u8) -> Option<u8> {
        let pc = (pitch % 12 + 12 - self.key.tonic) % 12;
        self.key
            .mode
            .intervals()
            .iter()
            .position(|&iv| iv == pc)
            .map(|i| i as u8 + 1)
    }

    /// The degree of `pitch`, or of the nearest in-scale pitch when it is chromatic. Ties go to the
    /// lower pitch.
    pub fn degree_of(&self, pitch: u8) -> u8 {
        let pitch = pitch as i16;
        for distance in 0..12 {
            for candidate in [pitch - distance, pitch + distance] {
                if !(0..=127).contains(&candidate) {
                    continue;
                }
                if let Some(degree) = self.exact_degree(candidate as u8) {
                    return degree;
                }
            }
        }
        1
    }

    /// The instance of `degree` closest to `hint`, ties going to the lower pitch. Degrees outside
    /// 1..=7 wrap around (8 is the tonic, 0 is the seventh).
    pub fn pitch_of(&self, degree: u8, hint: u8) -> u8 {
        let pc = self.pitch_class_of(degree);
        (pc..=127)
            .step_by(12)
            .min_by_key(|&candidate| ((candidate as i16 - hint as i16).abs(), candidate))
            .unwrap_or(pc)
    }

    /// The lowest instance of `degree` at or above `floor`. When that would pass the top of the
    /// midi range, the instance an octave lower is used.
    pub fn pitch_above(&self, degree: u8, floor: u8) -> u8 {
        let pc = self.pitch_class_of(degree) as i16;
        let floor = floor as i16;
        let above = floor + (pc - floor).rem_euclid(12);
        if above > 127 {
            (above - 12) as u8
        } else {
            above as u8
        }
    }

    fn pitch_class_of(&self, degree: u8) -> u8 {
        let degree = wrap_degree(degree as i16);
        (self.key.tonic + self.key.mode.intervals()[degree as usize - 1]) % 12
    }

    /// The nearest in-scale pitch strictly above (`direction > 0`) or below `pitch`, if one exists
    /// within the midi range.
    pub fn step(&self, pitch: u8, direction: i16) -> Option<u8> {
        let direction = direction.signum();
        if direction == 0 {
            return None;
        }
        let mut candidate = pitch as i16 + direction;
        while (0..=127).contains(&candidate) {
            if self.contains(candidate as u8) {
                return Some(candidate as u8);
            }
            candidate += direction;
        }
        None
    }

    /// The tonic nearest the middle of the range.
    pub fn tonic_pitch(&self) -> u8 {
        self.pitch_of(1, self.center())
    }

    /// Middle of the materialized range, used as the register when nothing else is known.
    pub fn center(&self) -> u8 {
        ((self.low as u16 + self.high as u16) / 2) as u8
    }
}

/// Map any integer onto 1..=7, so that 8 wraps to 1 and 0 to 7.
pub fn wrap_degree(degree: i16) -> u8 {
    ((degree - 1).rem_euclid(7) + 1) as u8
}

/// Clamp a pitch computed in a wider integer type into the midi range.
pub fn clamp_pitch(pitch: i16) -> u8 {
    pitch.clamp(0, 127) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c_major() -> ScaleContext {
        ScaleContext::new(Key::new(0, Mode::Major), &[60, 72])
    }

    #[test]
    fn test_detects_c_major_scale() {
        let pitches = [60, 62, 64, 65, 67, 69, 71, 72, 60, 64, 67, 60];
        let key = KrumhanslSchmuckler::default().detect_key(&pitches);
        assert_eq!(key, Key::new(0, Mode::Major));
    }

    #[test]
    fn test_detects_a_minor_arpeggio() {
        let pitches = [57, 60, 64, 57, 60, 64, 57, 69, 59, 57, 64, 57];
        let key = KrumhanslSchmuckler::default().detect_key(&pitches);
        assert_eq!(key, Key::new(9, Mode::Minor));
    }

    #[test]
    fn test_empty_input_defaults_to_c_major() {
        let scale = ScaleContext::detect(&KrumhanslSchmuckler::default(), &[]);
        assert_eq!(scale.key(), Key::default());
        assert_eq!(scale.range(), (60, 72));
        assert_eq!(
            scale.scale_pitches(),
            vec![60, 62, 64, 65, 67, 69, 71, 72]
        );
    }

    #[test]
    fn test_range_widens_to_whole_octaves() {
        let scale = ScaleContext::new(Key::new(2, Mode::Dorian), &[64, 65]);
        assert_eq!(scale.range(), (62, 74));
        for degree in SCALE_DEGREES {
            assert!(scale
                .scale_pitches()
                .iter()
                .any(|&p| scale.degree_of(p) == degree));
        }
    }

    #[test]
    fn test_range_clamped_at_top() {
        let scale = ScaleContext::new(Key::new(0, Mode::Major), &[125, 127]);
        let (low, high) = scale.range();
        assert_eq!(high, 127);
        assert!(high - low >= 11);
    }

    #[test]
    fn test_degree_of_exact_and_nearest() {
        let scale = c_major();
        assert_eq!(scale.degree_of(60), 1);
        assert_eq!(scale.degree_of(67), 5);
        assert_eq!(scale.degree_of(83), 7);
        // C# is equidistant from C and D, the lower pitch wins.
        assert_eq!(scale.degree_of(61), 1);
        assert_eq!(scale.degree_of(66), 4);
        assert_eq!(scale.degree_of(0), 1);
        assert_eq!(scale.exact_degree(61), None);
    }

    #[test]
    fn test_pitch_of_follows_hint() {
        let scale = c_major();
        assert_eq!(scale.pitch_of(1, 60), 60);
        assert_eq!(scale.pitch_of(5, 64), 67);
        assert_eq!(scale.pitch_of(5, 60), 55);
        assert_eq!(scale.pitch_of(7, 60), 59);
        assert_eq!(scale.pitch_of(8, 71), 72);
        // F# is 6 semitones from both C4 and C5, the lower one wins.
        assert_eq!(scale.pitch_of(1, 66), 60);
    }

    #[test]
    fn test_step_moves_to_adjacent_scale_pitch() {
        let scale = c_major();
        assert_eq!(scale.step(64, 1), Some(65));
        assert_eq!(scale.step(64, -1), Some(62));
        assert_eq!(scale.step(61, 1), Some(62));
        assert_eq!(scale.step(127, 1), None);
        assert_eq!(scale.step(0, -1), None);
    }

    #[test]
    fn test_pitch_above_stays_above() {
        let scale = c_major();
        assert_eq!(scale.pitch_above(5, 60), 67);
        assert_eq!(scale.pitch_above(1, 60), 60);
        assert_eq!(scale.pitch_above(3, 67), 76);
        assert_eq!(scale.pitch_above(4, 71), 77);
        assert_eq!(scale.pitch_above(5, 124), 127);
        // The next C above 125 would be 132, so it drops an octave.
        assert_eq!(scale.pitch_above(1, 125), 120);
    }

    #[test]
    fn test_key_is_normalized_when_deserialized() {
        let key: Key = serde_json::from_str(r#"{ "tonic": 38, "mode": "Minor" }"#).unwrap();
        assert_eq!(key, Key::new(2, Mode::Minor));
        assert_eq!(key.tonic(), 2);
        let scale = ScaleContext::new(key, &[62, 74]);
        assert_eq!(scale.degree_of(65), 3);
        assert_eq!(key.to_string(), "D minor");
    }

    #[test]
    fn test_wrap_degree() {
        assert_eq!(wrap_degree(8), 1);
        assert_eq!(wrap_degree(0), 7);
        assert_eq!(wrap_degree(-6), 1);
        assert_eq!(wrap_degree(10), 3);
    }
}
