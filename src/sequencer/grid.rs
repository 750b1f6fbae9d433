/// Grid model - sparse per-pitch note storage for one looping phrase
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::colour::Colour;

/// Number of addressable pitches (an 88-key range).
pub const PITCH_RANGE: u8 = 88;
pub const MAX_VELOCITY: u8 = 127;
/// Longest loop a grid may have.
pub const MAX_COLUMNS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
}

impl Note {
    pub fn new(pitch: u8, velocity: u8) -> Self {
        Self { pitch, velocity }
    }
}

/// One time slot of a grid. Absent pitches are silent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beat {
    pub notes: BTreeMap<u8, Note>,
}

impl Beat {
    pub fn get(&self, pitch: u8) -> Option<&Note> {
        self.notes.get(&pitch)
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }
}

static EMPTY_BEAT: Beat = Beat {
    notes: BTreeMap::new(),
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "GridData")]
pub struct Grid {
    beats: Vec<Beat>,
    num_columns: usize,
    colour: Colour,
}

impl Grid {
    pub fn new(num_columns: usize, colour: Colour) -> Self {
        let num_columns = num_columns.clamp(1, MAX_COLUMNS);
        Self {
            beats: vec![Beat::default(); num_columns],
            num_columns,
            colour,
        }
    }

    /// Builds a grid from untrusted beats. Notes with an out-of-range pitch
    /// or zero velocity are dropped and the column count is clamped.
    pub fn from_beats(beats: Vec<Beat>, num_columns: usize, colour: Colour) -> Self {
        let mut grid = Self {
            beats: Vec::with_capacity(beats.len()),
            num_columns: num_columns.clamp(1, MAX_COLUMNS),
            colour,
        };

        for (index, beat) in beats.into_iter().enumerate() {
            grid.beat_mut(index);
            for note in beat.notes.into_values() {
                if note.velocity > 0 {
                    grid.set_or_update_note(index, note);
                }
            }
        }
        grid
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn colour(&self) -> &Colour {
        &self.colour
    }

    pub fn set_colour(&mut self, colour: Colour) {
        self.colour = colour;
    }

    /// The stored beats, which may be shorter or longer than `num_columns`.
    pub fn beats(&self) -> &[Beat] {
        &self.beats
    }

    /// Beat at `index`; missing beats read as empty.
    pub fn beat(&self, index: usize) -> &Beat {
        self.beats.get(index).unwrap_or(&EMPTY_BEAT)
    }

    /// Beat at `index` wrapped around the loop length.
    pub fn beat_at_step(&self, step: usize) -> &Beat {
        self.beat(step % self.num_columns)
    }

    pub fn get(&self, beat_index: usize, pitch: u8) -> Option<&Note> {
        self.beat(beat_index).get(pitch)
    }

    fn beat_mut(&mut self, index: usize) -> &mut Beat {
        if index >= self.beats.len() {
            self.beats.resize_with(index + 1, Beat::default);
        }
        &mut self.beats[index]
    }

    /// Inserts or overwrites a note. Velocity 0 deletes instead.
    pub fn set_or_update_note(&mut self, beat_index: usize, note: Note) {
        if note.pitch >= PITCH_RANGE {
            debug!(pitch = note.pitch, "ignoring note outside pitch range");
            return;
        }

        if note.velocity == 0 {
            self.delete_note(beat_index, note.pitch);
            return;
        }

        let note = Note::new(note.pitch, note.velocity.min(MAX_VELOCITY));
        self.beat_mut(beat_index).notes.insert(note.pitch, note);
    }

    /// Changes the velocity of an existing note only. Velocity 0 deletes it.
    pub fn update_note_velocity(&mut self, beat_index: usize, pitch: u8, velocity: u8) {
        if velocity == 0 {
            self.delete_note(beat_index, pitch);
            return;
        }

        if let Some(note) = self
            .beats
            .get_mut(beat_index)
            .and_then(|beat| beat.notes.get_mut(&pitch))
        {
            note.velocity = velocity.min(MAX_VELOCITY);
        }
    }

    pub fn delete_note(&mut self, beat_index: usize, pitch: u8) {
        if let Some(beat) = self.beats.get_mut(beat_index) {
            beat.notes.remove(&pitch);
        }
    }

    /// Adds a note at `velocity` if the cell is empty, removes it otherwise.
    pub fn toggle(&mut self, beat_index: usize, pitch: u8, velocity: u8) {
        if self.get(beat_index, pitch).is_some() {
            self.delete_note(beat_index, pitch);
        } else {
            self.set_or_update_note(beat_index, Note::new(pitch, velocity));
        }
    }

    /// Changes the loop length without touching stored beats. Zero is
    /// ignored and lengths past `MAX_COLUMNS` are clamped.
    pub fn set_num_columns(&mut self, num_columns: usize) {
        if num_columns == 0 {
            debug!("ignoring zero column count");
            return;
        }
        self.num_columns = num_columns.min(MAX_COLUMNS);
    }

    /// Drops every stored beat. The column count is kept.
    pub fn clear(&mut self) {
        self.beats.clear();
    }

    /// Makes the stored beats exactly `num_columns` long.
    fn normalise(&mut self) {
        self.beats.resize_with(self.num_columns, Beat::default);
    }

    /// Inserts an empty beat after every beat, doubling the loop length.
    pub fn double_size(&mut self) {
        if self.num_columns * 2 > MAX_COLUMNS {
            debug!(num_columns = self.num_columns, "grid too long to double");
            return;
        }
        self.normalise();

        let beats = std::mem::take(&mut self.beats);
        self.beats = beats
            .into_iter()
            .flat_map(|beat| [beat, Beat::default()])
            .collect();
        self.num_columns = self.beats.len();
    }

    /// Keeps the first beat of every pair, dropping an unpaired trailing beat.
    pub fn halve_size(&mut self) {
        self.normalise();

        if self.beats.len() < 2 {
            debug!("grid too short to halve");
            return;
        }

        let beats = std::mem::take(&mut self.beats);
        self.beats = beats
            .chunks_exact(2)
            .map(|pair| pair[0].clone())
            .collect();
        self.num_columns = self.beats.len();
    }
}

/// Serialized form of a grid, normalised through `Grid::from_beats` on load.
#[derive(Deserialize)]
struct GridData {
    beats: Vec<Beat>,
    num_columns: usize,
    colour: Colour,
}

impl From<GridData> for Grid {
    fn from(data: GridData) -> Self {
        Grid::from_beats(data.beats, data.num_columns, data.colour)
    }
}
