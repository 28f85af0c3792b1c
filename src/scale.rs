//! Key and mode, and which pitches belong to the resulting scale.

use crate::pattern::NOTE_NAMES;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScaleError {
    #[error("unknown key: {0}")]
    UnknownKey(String),
    #[error("unknown mode: {0}")]
    UnknownMode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Major,
    Minor,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Major, Mode::Minor];

    /// Semitone offsets from the root.
    pub fn intervals(self) -> [u8; 7] {
        match self {
            Mode::Major => [0, 2, 4, 5, 7, 9, 11],
            Mode::Minor => [0, 2, 3, 5, 7, 8, 10],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Major => "major",
            Mode::Minor => "minor",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ScaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "major" | "maj" => Ok(Mode::Major),
            "minor" | "min" => Ok(Mode::Minor),
            _ => Err(ScaleError::UnknownMode(s.to_string())),
        }
    }
}

/// Computer-keyboard keys that preview scale notes, lowest note first.
pub const KEYBOARD_KEYS: [char; 19] = [
    'a', 's', 'd', 'f', 'g', 'h', 'j', 'k', 'l', 'q', 'w', 'e', 'r', 't', 'y', 'u', 'i', 'o', 'p',
];

/// C3 through B6.
const KEYBOARD_RANGE: std::ops::RangeInclusive<u8> = 48..=95;

/// How a pitch relates to the current scale, for grid highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteClass {
    Root,
    InScale,
    OutOfScale,
}

/// Parses a key name ("C", "F#", "Bb") into a pitch class.
fn parse_key(name: &str) -> Result<u8, ScaleError> {
    let upper = name.trim().to_uppercase();
    let pc = match upper.as_str() {
        "C" | "B#" => 0,
        "C#" | "DB" => 1,
        "D" => 2,
        "D#" | "EB" => 3,
        "E" | "FB" => 4,
        "F" | "E#" => 5,
        "F#" | "GB" => 6,
        "G" => 7,
        "G#" | "AB" => 8,
        "A" => 9,
        "A#" | "BB" => 10,
        "B" | "CB" => 11,
        _ => return Err(ScaleError::UnknownKey(name.to_string())),
    };
    Ok(pc)
}

/// The current key and mode. Defaults to C major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scale {
    key: u8,
    mode: Mode,
}

impl Scale {
    pub fn new(key: &str, mode: Mode) -> Result<Self, ScaleError> {
        Ok(Self {
            key: parse_key(key)?,
            mode,
        })
    }

    /// Parses a stored label such as `"C major"` or `"f# minor"`.
    pub fn parse_label(label: &str) -> Result<Self, ScaleError> {
        let mut parts = label.split_whitespace();
        let key = parts
            .next()
            .ok_or_else(|| ScaleError::UnknownKey(label.to_string()))?;
        let mode = match parts.next() {
            Some(m) => m.parse()?,
            None => Mode::Major,
        };
        Self::new(key, mode)
    }

    /// The stored form, e.g. `"C major"`.
    pub fn label(&self) -> String {
        format!("{} {}", self.key_name(), self.mode)
    }

    pub fn key_name(&self) -> &'static str {
        NOTE_NAMES[self.key as usize]
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_key(&mut self, key: &str) -> Result<(), ScaleError> {
        self.key = parse_key(key)?;
        Ok(())
    }

    pub fn set_mode(&mut self, mode: &str) -> Result<(), ScaleError> {
        self.mode = mode.parse()?;
        Ok(())
    }

    /// Pitch classes of the scale, root first.
    pub fn pitch_classes(&self) -> [u8; 7] {
        self.mode.intervals().map(|i| (self.key + i) % 12)
    }

    pub fn contains(&self, pitch: u8) -> bool {
        self.pitch_classes().contains(&(pitch % 12))
    }

    pub fn is_root(&self, pitch: u8) -> bool {
        pitch % 12 == self.key
    }

    pub fn classify(&self, pitch: u8) -> NoteClass {
        if self.is_root(pitch) {
            NoteClass::Root
        } else if self.contains(pitch) {
            NoteClass::InScale
        } else {
            NoteClass::OutOfScale
        }
    }

    /// The in-scale pitches the preview keys play, in key order.
    ///
    /// Walks upward from C3 and stops at B6 or once every key has a note.
    pub fn keyboard_notes(&self) -> Vec<u8> {
        KEYBOARD_RANGE
            .filter(|pitch| self.contains(*pitch))
            .take(KEYBOARD_KEYS.len())
            .collect()
    }

    /// The pitch a preview key plays, if it is one of [`KEYBOARD_KEYS`].
    pub fn key_to_note(&self, key: char) -> Option<u8> {
        let key = key.to_ascii_lowercase();
        let index = KEYBOARD_KEYS.iter().position(|k| *k == key)?;
        self.keyboard_notes().get(index).copied()
    }

    /// Names of every in-scale note across octaves 0 through 8.
    pub fn note_names(&self) -> Vec<String> {
        let classes = self.pitch_classes();
        (0..=8)
            .flat_map(|octave| {
                classes
                    .iter()
                    .map(move |pc| format!("{}{}", NOTE_NAMES[*pc as usize], octave))
            })
            .collect()
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_major() {
        let scale = Scale::default();
        assert_eq!(scale.pitch_classes(), [0, 2, 4, 5, 7, 9, 11]);
        assert_eq!(scale.classify(60), NoteClass::Root);
        assert_eq!(scale.classify(64), NoteClass::InScale);
        assert_eq!(scale.classify(61), NoteClass::OutOfScale);
    }

    #[test]
    fn test_a_minor_shares_c_major_notes() {
        let minor = Scale::new("A", Mode::Minor).unwrap();
        let mut a: Vec<u8> = minor.pitch_classes().to_vec();
        let mut c: Vec<u8> = Scale::default().pitch_classes().to_vec();
        a.sort();
        c.sort();
        assert_eq!(a, c);
        assert!(minor.is_root(57));
        assert!(!minor.is_root(60));
    }

    #[test]
    fn test_label_round_trip() {
        let scale = Scale::parse_label("f# minor").unwrap();
        assert_eq!(scale.label(), "F# minor");
        assert_eq!(Scale::parse_label("Bb").unwrap().label(), "A# major");
        assert!(Scale::parse_label("H major").is_err());
        assert!(Scale::parse_label("C lydian").is_err());
        assert!(Scale::parse_label("").is_err());
    }

    #[test]
    fn test_setters() {
        let mut scale = Scale::default();
        scale.set_key("D").unwrap();
        scale.set_mode("minor").unwrap();
        assert_eq!(scale.label(), "D minor");
        assert_eq!(
            scale.set_mode("dorian"),
            Err(ScaleError::UnknownMode("dorian".into()))
        );
        assert_eq!(scale.label(), "D minor");
    }

    #[test]
    fn test_keyboard_mapping() {
        let scale = Scale::default();
        let notes = scale.keyboard_notes();
        assert_eq!(notes.len(), KEYBOARD_KEYS.len());
        assert_eq!(notes[0], 48);
        assert!(notes.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(scale.key_to_note('a'), Some(48));
        assert_eq!(scale.key_to_note('K'), Some(60));
        assert_eq!(scale.key_to_note('p'), Some(79));
        assert_eq!(scale.key_to_note('z'), None);

        let sharp = Scale::new("F#", Mode::Major).unwrap();
        assert_eq!(sharp.key_to_note('a'), Some(49));
        assert!(sharp.keyboard_notes().iter().all(|p| sharp.contains(*p)));
    }

    #[test]
    fn test_note_names() {
        let names = Scale::default().note_names();
        assert_eq!(names.len(), 63);
        assert_eq!(names[0], "C0");
        assert_eq!(names.last().map(String::as_str), Some("B8"));
        assert!(!names.iter().any(|n| n.contains('#')));
    }
}
