/// Merge engine - folds independently sized grids into one LCM-aligned superpattern
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use super::colour::Colour;
use super::grid::Grid;

/// Longest superpattern `merge_grids` will build.
pub const MAX_MERGED_STEPS: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedNote {
    pub pitch: u8,
    pub velocity: u8,
    pub colour: Colour,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergedBeat {
    pub notes: BTreeMap<u8, MergedNote>,
}

impl MergedBeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one grid beat into this merged beat.
    ///
    /// The first grid to claim a pitch keeps its velocity; every later grid
    /// on the same pitch blends its hue into the existing colour.
    pub fn merge_with_grid_beat(&mut self, grid: &Grid, beat_index: usize) {
        for note in grid.beat(beat_index).notes() {
            match self.notes.get_mut(&note.pitch) {
                None => {
                    self.notes.insert(
                        note.pitch,
                        MergedNote {
                            pitch: note.pitch,
                            velocity: note.velocity,
                            colour: grid.colour().clone(),
                        },
                    );
                }
                Some(existing) => match existing.colour.blend(grid.colour()) {
                    Ok(colour) => existing.colour = colour,
                    Err(err) => warn!(pitch = note.pitch, %err, "skipping colour blend"),
                },
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

pub fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Least common multiple, or `None` if it does not fit in a `usize`.
pub fn lcm(a: usize, b: usize) -> Option<usize> {
    if a == 0 || b == 0 {
        return Some(0);
    }
    (a / gcd(a, b)).checked_mul(b)
}

/// Length of the superpattern: the LCM of every grid's column count.
///
/// `None` when the LCM overflows or exceeds `MAX_MERGED_STEPS`.
pub fn merged_length(grids: &[Grid]) -> Option<usize> {
    grids
        .iter()
        .map(Grid::num_columns)
        .try_fold(1, |acc, n| lcm(acc, n).filter(|&len| len <= MAX_MERGED_STEPS))
        .map(|len| if grids.is_empty() { 0 } else { len })
}

/// Merges all grids, in storage order, into `merged_length(grids)` steps.
/// Returns nothing if the superpattern would be too long to build.
pub fn merge_grids(grids: &[Grid]) -> Vec<MergedBeat> {
    let Some(length) = merged_length(grids) else {
        let lengths: Vec<_> = grids.iter().map(Grid::num_columns).collect();
        warn!(?lengths, max = MAX_MERGED_STEPS, "superpattern too long to merge");
        return Vec::new();
    };

    (0..length)
        .map(|step| {
            let mut merged = MergedBeat::new();
            for grid in grids {
                merged.merge_with_grid_beat(grid, step % grid.num_columns());
            }
            merged
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::grid::Note;

    fn grid(num_columns: usize, hue: u16) -> Grid {
        Grid::new(num_columns, Colour::from_hue(hue))
    }

    #[test]
    fn test_lcm() {
        assert_eq!(lcm(3, 4), Some(12));
        assert_eq!(lcm(4, 4), Some(4));
        assert_eq!(lcm(4, 6), Some(12));
        assert_eq!(lcm(usize::MAX, usize::MAX - 1), None);
    }

    #[test]
    fn test_oversized_superpattern_is_refused() {
        // 1021, 1019 and 1013 are prime, so their LCM is their product.
        let grids = [grid(1021, 0), grid(1019, 120), grid(1013, 240)];
        assert_eq!(merged_length(&grids), None);
        assert!(merge_grids(&grids).is_empty());

        let grids = [grid(256, 0), grid(255, 180)];
        assert_eq!(merged_length(&grids), Some(256 * 255));
        assert_eq!(merged_length(&[]), Some(0));
    }

    #[test]
    fn test_merged_length() {
        assert_eq!(merge_grids(&[grid(3, 0), grid(4, 180)]).len(), 12);
        assert_eq!(merge_grids(&[grid(4, 0), grid(4, 180)]).len(), 4);
        assert_eq!(merge_grids(&[grid(5, 0)]).len(), 5);
        assert!(merge_grids(&[]).is_empty());
    }

    #[test]
    fn test_first_velocity_wins_and_colour_blends() {
        let mut a = grid(2, 0);
        let mut b = grid(2, 100);
        a.set_or_update_note(0, Note::new(10, 100));
        b.set_or_update_note(0, Note::new(10, 50));

        let merged = merge_grids(&[a, b]);
        let note = &merged[0].notes[&10];
        assert_eq!(note.velocity, 100);
        assert_eq!(note.colour, Colour::from_hue(50));
        assert_eq!(merged[0].notes.len(), 1);
    }

    #[test]
    fn test_three_way_blend_is_pairwise() {
        let mut grids = vec![grid(1, 0), grid(1, 100), grid(1, 200)];
        for (i, g) in grids.iter_mut().enumerate() {
            g.set_or_update_note(0, Note::new(5, 10 + i as u8));
        }

        let merged = merge_grids(&grids);
        let note = &merged[0].notes[&5];
        // (0 + 100) / 2 = 50, then (50 + 200) / 2 = 125
        assert_eq!(note.colour, Colour::from_hue(125));
        assert_eq!(note.velocity, 10);
    }

    #[test]
    fn test_malformed_colour_keeps_first() {
        let mut a = Grid::new(1, Colour::parse("red"));
        let mut b = grid(1, 100);
        a.set_or_update_note(0, Note::new(1, 90));
        b.set_or_update_note(0, Note::new(1, 20));

        let merged = merge_grids(&[a, b]);
        assert_eq!(merged[0].notes[&1].colour, Colour::parse("red"));
    }

    #[test]
    fn test_beats_past_loop_are_not_merged() {
        let mut a = grid(2, 0);
        a.set_or_update_note(3, Note::new(9, 100));
        let merged = merge_grids(&[a]);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().all(MergedBeat::is_empty));
    }

    #[test]
    fn test_cleared_grid_merges_empty() {
        let mut a = grid(3, 0);
        a.set_or_update_note(1, Note::new(9, 100));
        a.clear();
        let merged = merge_grids(&[a]);
        assert_eq!(merged.len(), 3);
        assert!(merged.iter().all(MergedBeat::is_empty));
    }
}
