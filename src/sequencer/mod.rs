/// Core sequencer logic - application state and historied edit entry points
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;

pub mod colour;
pub mod grid;
pub mod history;
pub mod merge;
pub mod playback;
pub mod step_input;

use colour::Colour;
use grid::{Grid, Note, MAX_VELOCITY};
use history::History;
use merge::MergedBeat;

pub const MIN_BPM: f64 = 1.0;
pub const MAX_BPM: f64 = 300.0;

/// Column counts of the grids a new session starts with.
pub const SEED_GRIDS: [usize; 2] = [3, 4];

/// The historied part of the state: what undo restores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub bpm: f64,
    pub grids: Vec<Grid>,
}

pub struct Sequencer {
    bpm: f64,
    default_velocity: u8,
    output_channel: u8,
    grids: Vec<Grid>,
    history: History<Snapshot>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    pub fn from_config(config: &Config) -> Self {
        let mut sequencer = Self {
            bpm: config.bpm.clamp(MIN_BPM, MAX_BPM),
            default_velocity: config.default_velocity.clamp(1, MAX_VELOCITY),
            output_channel: config.output_channel & 0x0F,
            grids: SEED_GRIDS
                .iter()
                .map(|&columns| Grid::new(columns, Colour::from_hue(0)))
                .collect(),
            history: History::new(config.history_capacity),
        };
        sequencer.recolour();
        sequencer
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Length of one grid column in seconds.
    pub fn beat_duration(&self) -> f64 {
        60.0 / self.bpm
    }

    pub fn default_velocity(&self) -> u8 {
        self.default_velocity
    }

    pub fn output_channel(&self) -> u8 {
        self.output_channel
    }

    /// Not historied, like device selection.
    pub fn set_output_channel(&mut self, channel: u8) {
        self.output_channel = channel & 0x0F;
    }

    pub fn grids(&self) -> &[Grid] {
        &self.grids
    }

    pub fn grid(&self, index: usize) -> Option<&Grid> {
        self.grids.get(index)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            bpm: self.bpm,
            grids: self.grids.clone(),
        }
    }

    /// Replaces tempo and grids wholesale and forgets the undo history.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.bpm = snapshot.bpm.clamp(MIN_BPM, MAX_BPM);
        self.grids = snapshot.grids;
        self.history.clear();
    }

    /// Recomputes the LCM-aligned merged view.
    pub fn merged(&self) -> Vec<MergedBeat> {
        merge::merge_grids(&self.grids)
    }

    pub fn can_undo(&self) -> bool {
        self.history.has_undo()
    }

    /// Restores the most recent snapshot. Returns false when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        match self.history.undo() {
            Some(snapshot) => {
                self.bpm = snapshot.bpm;
                self.grids = snapshot.grids;
                true
            }
            None => {
                debug!("undo stack is empty");
                false
            }
        }
    }

    fn checkpoint(&mut self) {
        let snapshot = self.snapshot();
        self.history.push(snapshot);
    }

    fn recolour(&mut self) {
        let count = self.grids.len();
        for (index, grid) in self.grids.iter_mut().enumerate() {
            grid.set_colour(Colour::for_position(index, count));
        }
    }

    fn edit_grid(&mut self, index: usize, edit: impl FnOnce(&mut Grid)) -> bool {
        if index >= self.grids.len() {
            debug!(index, "no such grid");
            return false;
        }

        self.checkpoint();
        edit(&mut self.grids[index]);
        true
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        if !bpm.is_finite() || bpm <= 0.0 {
            debug!(bpm, "ignoring non-positive tempo");
            return;
        }

        self.checkpoint();
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
    }

    /// Velocity 0 is ignored; anything above 127 is clamped.
    pub fn set_default_velocity(&mut self, velocity: u8) {
        if velocity == 0 {
            return;
        }

        self.checkpoint();
        self.default_velocity = velocity.min(MAX_VELOCITY);
    }

    pub fn add_grid(&mut self, num_columns: usize) -> usize {
        self.insert_grid(self.grids.len(), num_columns)
    }

    /// Inserts a new empty grid at `index` (clamped to the end) and returns its index.
    pub fn insert_grid(&mut self, index: usize, num_columns: usize) -> usize {
        let index = index.min(self.grids.len());

        self.checkpoint();
        self.grids
            .insert(index, Grid::new(num_columns, Colour::from_hue(0)));
        self.recolour();
        index
    }

    pub fn remove_grid(&mut self, index: usize) -> bool {
        if index >= self.grids.len() {
            debug!(index, "no such grid");
            return false;
        }

        self.checkpoint();
        self.grids.remove(index);
        self.recolour();
        true
    }

    pub fn set_note(&mut self, grid: usize, beat: usize, note: Note) -> bool {
        self.edit_grid(grid, |g| g.set_or_update_note(beat, note))
    }

    /// Toggles a note at the default velocity.
    pub fn toggle_note(&mut self, grid: usize, beat: usize, pitch: u8) -> bool {
        let velocity = self.default_velocity;
        self.edit_grid(grid, |g| g.toggle(beat, pitch, velocity))
    }

    pub fn update_note_velocity(&mut self, grid: usize, beat: usize, pitch: u8, velocity: u8) -> bool {
        self.edit_grid(grid, |g| g.update_note_velocity(beat, pitch, velocity))
    }

    pub fn delete_note(&mut self, grid: usize, beat: usize, pitch: u8) -> bool {
        self.edit_grid(grid, |g| g.delete_note(beat, pitch))
    }

    pub fn set_num_columns(&mut self, grid: usize, num_columns: usize) -> bool {
        if num_columns == 0 {
            debug!("ignoring zero column count");
            return false;
        }
        self.edit_grid(grid, |g| g.set_num_columns(num_columns))
    }

    pub fn clear_grid(&mut self, grid: usize) -> bool {
        self.edit_grid(grid, Grid::clear)
    }

    pub fn double_grid(&mut self, grid: usize) -> bool {
        self.edit_grid(grid, Grid::double_size)
    }

    pub fn halve_grid(&mut self, grid: usize) -> bool {
        self.edit_grid(grid, Grid::halve_size)
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_undo_restores(mut sequencer: Sequencer, edit: impl FnOnce(&mut Sequencer)) {
        let before = sequencer.snapshot();
        edit(&mut sequencer);
        assert!(sequencer.undo());
        assert_eq!(sequencer.snapshot(), before);
    }

    fn populated() -> Sequencer {
        let mut sequencer = Sequencer::new();
        sequencer.set_note(0, 0, Note::new(10, 100));
        sequencer.set_note(1, 2, Note::new(20, 60));
        sequencer
    }

    #[test]
    fn test_seed_grids() {
        let sequencer = Sequencer::new();
        let columns: Vec<_> = sequencer.grids().iter().map(Grid::num_columns).collect();
        assert_eq!(columns, vec![3, 4]);
        assert_eq!(sequencer.grids()[0].colour(), &Colour::from_hue(0));
        assert_eq!(sequencer.grids()[1].colour(), &Colour::from_hue(180));
        assert!(!sequencer.can_undo());
    }

    #[test]
    fn test_undo_each_operation() {
        assert_undo_restores(populated(), |s| s.set_bpm(90.0));
        assert_undo_restores(populated(), |s| {
            s.add_grid(5);
        });
        assert_undo_restores(populated(), |s| {
            s.insert_grid(0, 2);
        });
        assert_undo_restores(populated(), |s| {
            s.remove_grid(1);
        });
        assert_undo_restores(populated(), |s| {
            s.set_note(0, 1, Note::new(3, 30));
        });
        assert_undo_restores(populated(), |s| {
            s.toggle_note(0, 0, 10);
        });
        assert_undo_restores(populated(), |s| {
            s.update_note_velocity(1, 2, 20, 5);
        });
        assert_undo_restores(populated(), |s| {
            s.delete_note(0, 0, 10);
        });
        assert_undo_restores(populated(), |s| {
            s.set_num_columns(1, 7);
        });
        assert_undo_restores(populated(), |s| {
            s.clear_grid(0);
        });
        assert_undo_restores(populated(), |s| {
            s.double_grid(1);
        });
        assert_undo_restores(populated(), |s| {
            s.halve_grid(1);
        });
    }

    #[test]
    fn test_undo_empty_is_noop() {
        let mut sequencer = Sequencer::new();
        let before = sequencer.snapshot();
        assert!(!sequencer.undo());
        assert_eq!(sequencer.snapshot(), before);
    }

    #[test]
    fn test_invalid_grid_index_skips_history() {
        let mut sequencer = Sequencer::new();
        assert!(!sequencer.set_note(9, 0, Note::new(1, 1)));
        assert!(!sequencer.remove_grid(9));
        assert!(!sequencer.can_undo());
    }

    #[test]
    fn test_repeated_edit_pushes_once() {
        let mut sequencer = Sequencer::new();
        sequencer.set_note(0, 0, Note::new(1, 50));
        sequencer.set_note(0, 0, Note::new(1, 50));
        sequencer.set_note(0, 0, Note::new(1, 50));

        assert!(sequencer.undo());
        assert!(sequencer.undo());
        assert!(!sequencer.undo());
        assert!(sequencer.grids()[0].get(0, 1).is_none());
    }

    #[test]
    fn test_bpm_guard() {
        let mut sequencer = Sequencer::new();
        sequencer.set_bpm(0.0);
        sequencer.set_bpm(f64::NAN);
        assert_eq!(sequencer.bpm(), 120.0);
        assert!(!sequencer.can_undo());

        sequencer.set_bpm(1000.0);
        assert_eq!(sequencer.bpm(), MAX_BPM);
        assert_eq!(sequencer.beat_duration(), 0.2);
    }

    #[test]
    fn test_toggle_uses_default_velocity() {
        let mut sequencer = Sequencer::new();
        sequencer.set_default_velocity(42);
        sequencer.toggle_note(1, 3, 7);
        assert_eq!(sequencer.grids()[1].get(3, 7).map(|n| n.velocity), Some(42));
    }

    #[test]
    fn test_recolour_on_add_and_remove() {
        let mut sequencer = Sequencer::new();
        sequencer.add_grid(5);
        let hues: Vec<_> = sequencer
            .grids()
            .iter()
            .map(|g| g.colour().hue().unwrap())
            .collect();
        assert_eq!(hues, vec![0, 120, 240]);

        sequencer.remove_grid(0);
        assert_eq!(sequencer.grids()[0].num_columns(), 4);
        assert_eq!(sequencer.grids()[1].colour(), &Colour::from_hue(180));
    }

    #[test]
    fn test_history_capacity() {
        let config = Config {
            history_capacity: 2,
            ..Config::default()
        };
        let mut sequencer = Sequencer::from_config(&config);
        for beat in 0..3 {
            sequencer.set_note(0, beat, Note::new(1, 100));
        }

        assert!(sequencer.undo());
        assert!(sequencer.undo());
        assert!(!sequencer.undo());
        assert!(sequencer.grids()[0].get(0, 1).is_some());
    }
}
