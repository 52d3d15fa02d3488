/*!
 # Ring-tone tunes

 Parser for the RTTTL text format (`name:d=4,o=5,b=63:8c6,8p,4e.6`) used to
 describe the night signal. A parsed [`Tune`] is a flat list of notes with
 absolute frequencies and durations, ready for synthesis.
*/

use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Opening phrase of Maoz Tzur
pub const MAOZ_TZUR: &str = "MaozTzur:d=4,o=5,b=112:g,c6,g,c6,e6,2d6,8p,d6,e6,f6,e6,2d6,8p,c6,b,c6,a,2g";

const VALID_DURATIONS: [u32; 6] = [1, 2, 4, 8, 16, 32];

/// A single note or rest
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    /// Pitch in Hz, `None` for a rest
    pub frequency: Option<f32>,
    /// How long the note lasts
    pub duration: Duration,
}

/// A parsed RTTTL tune
#[derive(Debug, Clone, PartialEq)]
pub struct Tune {
    /// Name from the RTTTL header
    pub name: String,
    /// Notes in playing order
    pub notes: Vec<Note>,
}

impl Tune {
    /// Parses an RTTTL string
    pub fn parse(text: &str) -> Result<Self> {
        let mut sections = text.trim().splitn(3, ':');
        let name = sections.next().unwrap_or_default().trim().to_string();
        let (defaults, body) = match (sections.next(), sections.next()) {
            (Some(defaults), Some(body)) => (defaults, body),
            _ => {
                return Err(Error::Tune(
                    "expected name:defaults:notes".to_string(),
                ))
            }
        };

        let mut default_duration = 4;
        let mut default_octave = 6;
        let mut bpm = 63;
        for setting in defaults.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = setting
                .split_once('=')
                .ok_or_else(|| Error::Tune(format!("malformed setting {:?}", setting)))?;
            let value: u32 = value
                .trim()
                .parse()
                .map_err(|_| Error::Tune(format!("malformed setting {:?}", setting)))?;
            match key.trim() {
                "d" => default_duration = value,
                "o" => default_octave = value,
                "b" => bpm = value,
                other => return Err(Error::Tune(format!("unknown setting {:?}", other))),
            }
        }

        if !VALID_DURATIONS.contains(&default_duration) {
            return Err(Error::Tune(format!("invalid default duration {}", default_duration)));
        }
        if !(4..=7).contains(&default_octave) {
            return Err(Error::Tune(format!("invalid default octave {}", default_octave)));
        }
        if bpm == 0 {
            return Err(Error::Tune("tempo must be positive".to_string()));
        }

        // Duration of a whole note at this tempo, beats being quarter notes
        let whole = Duration::from_secs(240).div_f64(f64::from(bpm));

        let notes = body
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| parse_note(token, default_duration, default_octave, whole))
            .collect::<Result<Vec<_>>>()?;

        if notes.is_empty() {
            return Err(Error::Tune("tune has no notes".to_string()));
        }

        Ok(Self { name, notes })
    }

    /// Total playing time
    pub fn duration(&self) -> Duration {
        self.notes.iter().map(|note| note.duration).sum()
    }
}

impl FromStr for Tune {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parses one `[duration]note[#][.][octave][.]` token
fn parse_note(token: &str, default_duration: u32, default_octave: u32, whole: Duration) -> Result<Note> {
    let lower = token.to_ascii_lowercase();
    let mut rest = lower.as_str();
    let invalid = || Error::Tune(format!("invalid note {:?}", token));

    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    let duration = if digits == 0 {
        default_duration
    } else {
        rest[..digits].parse().map_err(|_| invalid())?
    };
    if !VALID_DURATIONS.contains(&duration) {
        return Err(invalid());
    }
    rest = &rest[digits..];

    let mut chars = rest.chars();
    let semitone = match chars.next() {
        Some('c') => Some(0),
        Some('d') => Some(2),
        Some('e') => Some(4),
        Some('f') => Some(5),
        Some('g') => Some(7),
        Some('a') => Some(9),
        Some('b') | Some('h') => Some(11),
        Some('p') => None,
        _ => return Err(invalid()),
    };
    rest = chars.as_str();

    let sharp = rest.starts_with('#');
    if sharp {
        rest = &rest[1..];
    }

    let mut dotted = false;
    if rest.starts_with('.') {
        dotted = true;
        rest = &rest[1..];
    }

    let octave = match rest.chars().next() {
        Some(c @ '4'..='7') => {
            rest = &rest[1..];
            c.to_digit(10).unwrap_or(default_octave)
        }
        _ => default_octave,
    };

    if rest.starts_with('.') {
        dotted = true;
        rest = &rest[1..];
    }
    if !rest.is_empty() {
        return Err(invalid());
    }

    let mut length = whole / duration;
    if dotted {
        length += length / 2;
    }

    let frequency = semitone.map(|semitone| {
        let midi = 12 * (octave as i32 + 1) + semitone + i32::from(sharp);
        440.0 * 2f32.powf((midi - 69) as f32 / 12.0)
    });

    Ok(Note {
        frequency,
        duration: length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn parses_defaults_and_notes() {
        let tune = Tune::parse("Test:d=4,o=4,b=60:a,8c5,p").unwrap();
        assert_eq!(tune.name, "Test");
        assert_eq!(tune.notes.len(), 3);

        assert!(close(tune.notes[0].frequency.unwrap(), 440.0));
        assert_eq!(tune.notes[0].duration, Duration::from_secs(1));

        assert!(close(tune.notes[1].frequency.unwrap(), 523.25));
        assert_eq!(tune.notes[1].duration, Duration::from_millis(500));

        assert_eq!(tune.notes[2].frequency, None);
        assert_eq!(tune.duration(), Duration::from_millis(3500));
    }

    #[test]
    fn dotted_and_sharp_notes() {
        let tune = Tune::parse("x:d=4,o=5,b=120:4f#.,4c#6,2g.5").unwrap();
        assert!(close(tune.notes[0].frequency.unwrap(), 739.99));
        assert_eq!(tune.notes[0].duration, Duration::from_millis(750));
        assert!(close(tune.notes[1].frequency.unwrap(), 1108.73));
        assert_eq!(tune.notes[2].duration, Duration::from_millis(1500));
    }

    #[test]
    fn missing_defaults_use_rtttl_defaults() {
        let tune = Tune::parse("x::c").unwrap();
        // o=6, d=4, b=63
        assert!(close(tune.notes[0].frequency.unwrap(), 1046.50));
        assert_eq!(
            tune.notes[0].duration,
            Duration::from_secs(240).div_f64(63.0) / 4
        );
    }

    #[test]
    fn rejects_malformed_tunes() {
        assert!(Tune::parse("no sections").is_err());
        assert!(Tune::parse("x:d=3:c").is_err());
        assert!(Tune::parse("x:b=0:c").is_err());
        assert!(Tune::parse("x:d=4:").is_err());
        assert!(Tune::parse("x:d=4:q").is_err());
        assert!(Tune::parse("x:d=4:3c").is_err());
        assert!(Tune::parse("x:d=4:c9").is_err());
        assert!(Tune::parse("x:z=4:c").is_err());
    }

    #[test]
    fn bundled_tune_parses() {
        let tune: Tune = MAOZ_TZUR.parse().unwrap();
        assert_eq!(tune.name, "MaozTzur");
        assert!(tune.duration() > Duration::from_secs(5));
    }
}
