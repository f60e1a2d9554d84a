//! Speaker alignment
//!
//! Assigns a speaker to every transcript segment from the diarization
//! turns, then merges consecutive segments of the same speaker.

use scribe_common::api::TranscriptSegment;

use crate::models::{Diarization, SpeakerTurn, TimedText, Transcription};

/// Label used when diarization produced no turns
pub const DEFAULT_SPEAKER: &str = "SPEAKER_00";

/// Build the speaker-attributed transcript
///
/// Speaker choice per segment:
/// 1. the turn with the largest time overlap
/// 2. with no overlap, the turn whose midpoint is nearest
/// 3. with no turns at all, [`DEFAULT_SPEAKER`]
///
/// Segments with blank text are dropped.
pub fn align(transcription: &Transcription, diarization: &Diarization) -> Vec<TranscriptSegment> {
    let mut aligned: Vec<TranscriptSegment> = Vec::with_capacity(transcription.segments.len());

    for segment in &transcription.segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }

        let speaker = pick_speaker(segment, &diarization.turns);

        match aligned.last_mut() {
            Some(last) if last.speaker == speaker => {
                last.text.push(' ');
                last.text.push_str(text);
                last.end = last.end.max(segment.end);
            }
            _ => aligned.push(TranscriptSegment {
                speaker: speaker.to_string(),
                text: text.to_string(),
                start: segment.start,
                end: segment.end,
            }),
        }
    }

    aligned
}

fn overlap(segment: &TimedText, turn: &SpeakerTurn) -> f64 {
    (segment.end.min(turn.end) - segment.start.max(turn.start)).max(0.0)
}

fn pick_speaker<'a>(segment: &TimedText, turns: &'a [SpeakerTurn]) -> &'a str {
    let best_overlap = turns
        .iter()
        .map(|turn| (turn, overlap(segment, turn)))
        .filter(|(_, o)| *o > 0.0)
        // First turn wins ties
        .fold(None::<(&SpeakerTurn, f64)>, |best, (turn, o)| match best {
            Some((_, best_o)) if best_o >= o => best,
            _ => Some((turn, o)),
        });

    if let Some((turn, _)) = best_overlap {
        return &turn.speaker;
    }

    let midpoint = (segment.start + segment.end) / 2.0;
    turns
        .iter()
        .fold(None::<(&SpeakerTurn, f64)>, |best, turn| {
            let distance = (turn.midpoint() - midpoint).abs();
            match best {
                Some((_, best_d)) if best_d <= distance => best,
                _ => Some((turn, distance)),
            }
        })
        .map(|(turn, _)| turn.speaker.as_str())
        .unwrap_or(DEFAULT_SPEAKER)
}
