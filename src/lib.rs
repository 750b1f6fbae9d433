/// phaseq - phase pattern sequencer library
///
/// Independent looping grids of different lengths, played together so their
/// notes drift in and out of alignment:
/// - Sparse per-pitch grid model with resize and undo
/// - LCM-aligned merge of all grids into one superpattern
/// - Lookahead playback scheduler emitting timestamped MIDI
/// - Audio-clock and MIDI I/O boundaries

pub mod audio;
pub mod config;
pub mod error;
pub mod export;
pub mod midi;
pub mod project;
pub mod sequencer;

// Re-export commonly used types
pub use audio::{AudioClock, InstantClock, ManualClock, StreamClock};
pub use config::Config;
pub use error::{Error, Result};
pub use midi::{midi_note_name, ClockMonitor, MidiInputDevice, MidiOutputDevice, NoteSink};
pub use sequencer::colour::Colour;
pub use sequencer::grid::{Beat, Grid, Note};
pub use sequencer::merge::{merge_grids, MergedBeat, MergedNote};
pub use sequencer::playback::{PlaybackEngine, PlaybackEvent, PlaybackState};
pub use sequencer::step_input::StepInput;
pub use sequencer::{Sequencer, Snapshot};
