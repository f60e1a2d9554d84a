//! Audio upload and model collaborator payloads

use serde::{Deserialize, Serialize};

use super::job::JobSpec;

/// Raw upload accepted by the Stage Runner
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub spec: JobSpec,
    pub bytes: Vec<u8>,
}

impl AudioUpload {
    pub fn new(filename: impl Into<String>, num_speakers: Option<u32>, bytes: Vec<u8>) -> Self {
        Self {
            spec: JobSpec {
                filename: filename.into(),
                num_speakers,
            },
            bytes,
        }
    }
}

/// Text recognized between two offsets (seconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedText {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Transcription model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    /// Detected or requested language code
    pub language: String,
    /// Audio duration in seconds
    pub duration: f64,
    pub segments: Vec<TimedText>,
}

/// One contiguous stretch of a single speaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerTurn {
    pub speaker: String,
    pub start: f64,
    pub end: f64,
}

impl SpeakerTurn {
    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }
}

/// Diarization model output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diarization {
    pub turns: Vec<SpeakerTurn>,
}

impl Diarization {
    /// Number of distinct speaker labels
    pub fn speaker_count(&self) -> usize {
        let mut speakers: Vec<&str> = self.turns.iter().map(|t| t.speaker.as_str()).collect();
        speakers.sort_unstable();
        speakers.dedup();
        speakers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_count_dedups() {
        let diarization = Diarization {
            turns: vec![
                SpeakerTurn { speaker: "SPEAKER_01".into(), start: 0.0, end: 1.0 },
                SpeakerTurn { speaker: "SPEAKER_00".into(), start: 1.0, end: 2.0 },
                SpeakerTurn { speaker: "SPEAKER_01".into(), start: 2.0, end: 3.0 },
            ],
        };
        assert_eq!(diarization.speaker_count(), 2);
        assert_eq!(Diarization::default().speaker_count(), 0);
    }

    #[test]
    fn test_transcription_wire_format() {
        let json = r#"{"language":"en","duration":4.5,"segments":[{"start":0.0,"end":2.0,"text":"hi"}]}"#;
        let t: Transcription = serde_json::from_str(json).unwrap();
        assert_eq!(t.language, "en");
        assert_eq!(t.segments[0].text, "hi");
    }
}
