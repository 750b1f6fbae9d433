/// Step input - writes incoming MIDI notes into successive beats of a grid
use tracing::{debug, info};

use super::grid::{Note, PITCH_RANGE};
use super::Sequencer;
use crate::midi::{BASE_PITCH, NOTE_ON};

#[derive(Debug, Default)]
pub struct StepInput {
    grid: Option<usize>,
    cursor: usize,
}

impl StepInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, grid: usize) {
        self.grid = Some(grid);
        self.cursor = 0;
        info!(grid, "step input armed");
    }

    pub fn disarm(&mut self) {
        if self.grid.take().is_some() {
            info!("step input disarmed");
        }
        self.cursor = 0;
    }

    pub fn is_armed(&self) -> bool {
        self.grid.is_some()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Feeds one raw MIDI message. Returns true when a note was placed.
    ///
    /// Filling the last column disarms step input.
    pub fn handle_message(&mut self, sequencer: &mut Sequencer, message: &[u8]) -> bool {
        let Some(grid) = self.grid else {
            return false;
        };

        let &[status, key, velocity, ..] = message else {
            return false;
        };
        if status & 0xF0 != NOTE_ON || velocity == 0 {
            return false;
        }

        let Some(pitch) = key.checked_sub(BASE_PITCH).filter(|&p| p < PITCH_RANGE) else {
            debug!(key, "note outside the 88-key range");
            return false;
        };

        let Some(num_columns) = sequencer.grid(grid).map(|g| g.num_columns()) else {
            debug!(grid, "step input grid no longer exists");
            self.disarm();
            return false;
        };

        sequencer.set_note(grid, self.cursor, Note::new(pitch, velocity));
        self.cursor += 1;
        if self.cursor >= num_columns {
            self.disarm();
        }
        true
    }
}
