/// Export - each merged step becomes one beat of fixed-length note events
use serde::Serialize;

use crate::midi::midi_key;
use crate::sequencer::merge::MergedBeat;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportNote {
    pub step: usize,
    pub start_seconds: f64,
    pub duration_seconds: f64,
    pub channel: u8,
    /// MIDI note number
    pub key: u8,
    pub velocity: u8,
}

pub fn export_notes(merged: &[MergedBeat], bpm: f64, channel: u8) -> Vec<ExportNote> {
    let beat_duration = 60.0 / bpm;

    merged
        .iter()
        .enumerate()
        .flat_map(|(step, beat)| {
            beat.notes.values().map(move |note| ExportNote {
                step,
                start_seconds: step as f64 * beat_duration,
                duration_seconds: beat_duration,
                channel,
                key: midi_key(note.pitch),
                velocity: note.velocity,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::colour::Colour;
    use crate::sequencer::grid::{Grid, Note};
    use crate::sequencer::merge::{merge_grids, MergedNote};

    #[test]
    fn test_one_event_per_pitch_per_step() {
        let mut a = Grid::new(2, Colour::from_hue(0));
        a.set_or_update_note(0, Note::new(0, 100));
        a.set_or_update_note(0, Note::new(5, 60));
        a.set_or_update_note(1, Note::new(5, 70));

        let notes = export_notes(&merge_grids(&[a]), 120.0, 1);

        assert_eq!(notes.len(), 3);
        assert_eq!(notes[0].key, 21);
        assert_eq!(notes[1].key, 26);
        assert_eq!(notes[2].step, 1);
        assert_eq!(notes[2].start_seconds, 0.5);
        assert!(notes.iter().all(|n| n.duration_seconds == 0.5 && n.channel == 1));
    }

    #[test]
    fn test_keys_stay_in_midi_range() {
        let mut beat = MergedBeat::new();
        beat.notes.insert(
            250,
            MergedNote {
                pitch: 250,
                velocity: 90,
                colour: Colour::from_hue(0),
            },
        );

        let notes = export_notes(&[beat], 120.0, 0);
        assert_eq!(notes[0].key, 127);
    }

    #[test]
    fn test_empty_merge_exports_nothing() {
        assert!(export_notes(&[], 120.0, 0).is_empty());
    }
}
