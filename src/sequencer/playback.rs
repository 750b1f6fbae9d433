/// Playback engine - lookahead scheduling of timestamped note events
use std::sync::mpsc::{channel, Receiver, Sender};
use tracing::{debug, info};

use super::grid::PITCH_RANGE;
use super::Sequencer;
use crate::audio::AudioClock;
use crate::error::Result;
use crate::midi::{note_off, note_on, NoteSink};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    Started,
    Stopped,
    /// Global step about to sound. Grid `g` is on beat `step % g.num_columns()`.
    StepAdvanced(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackState {
    Stopped,
    Playing { step: usize, next_event_time: f64 },
}

pub struct PlaybackEngine {
    state: PlaybackState,
    lookahead: f64,
    subscribers: Vec<Sender<PlaybackEvent>>,
}

impl PlaybackEngine {
    pub fn new(lookahead_seconds: f64) -> Self {
        Self {
            state: PlaybackState::Stopped,
            lookahead: lookahead_seconds,
            subscribers: Vec::new(),
        }
    }

    /// Registers a listener for step and transport notifications.
    pub fn subscribe(&mut self) -> Receiver<PlaybackEvent> {
        let (sender, receiver) = channel();
        self.subscribers.push(sender);
        receiver
    }

    fn emit(&mut self, event: PlaybackEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event).is_ok());
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, PlaybackState::Playing { .. })
    }

    /// Starts from step 0 at the clock's current time. Always restarts, there
    /// is no resume.
    pub fn start(&mut self, clock: &dyn AudioClock) -> Result<()> {
        clock.ensure_active()?;

        let now = clock.current_time();
        self.state = PlaybackState::Playing {
            step: 0,
            next_event_time: now,
        };
        info!(now, "playback started");
        self.emit(PlaybackEvent::Started);
        Ok(())
    }

    /// Cancels future passes. Note-offs already handed to the sink still fire.
    pub fn stop(&mut self) {
        if self.is_running() {
            self.state = PlaybackState::Stopped;
            info!("playback stopped");
            self.emit(PlaybackEvent::Stopped);
        }
    }

    /// One scheduling pass: schedules every step whose time falls before
    /// `now + lookahead` and returns how many steps were scheduled.
    pub fn run_pass(
        &mut self,
        sequencer: &Sequencer,
        sink: Option<&mut dyn NoteSink>,
        now: f64,
    ) -> usize {
        let PlaybackState::Playing {
            mut step,
            mut next_event_time,
        } = self.state
        else {
            return 0;
        };

        let Some(sink) = sink else {
            debug!("no note sink selected, skipping pass");
            return 0;
        };

        let beat_duration = sequencer.beat_duration();
        let channel = sequencer.output_channel();
        let mut scheduled = 0;

        while next_event_time < now + self.lookahead {
            for grid in sequencer.grids() {
                for note in grid.beat_at_step(step).notes() {
                    sink.send(note_on(channel, note.pitch, note.velocity), next_event_time);
                    sink.send(note_off(channel, note.pitch), next_event_time + beat_duration);
                }
            }

            self.emit(PlaybackEvent::StepAdvanced(step));

            step += 1;
            next_event_time += beat_duration;
            scheduled += 1;
        }

        self.state = PlaybackState::Playing {
            step,
            next_event_time,
        };
        scheduled
    }

    /// Sounds a note immediately for one beat, outside the step cursor.
    pub fn play_note_now(
        &self,
        sequencer: &Sequencer,
        sink: Option<&mut dyn NoteSink>,
        pitch: u8,
        velocity: u8,
        now: f64,
    ) {
        let Some(sink) = sink else {
            debug!("no note sink selected, dropping note");
            return;
        };
        if pitch >= PITCH_RANGE || velocity == 0 {
            debug!(pitch, velocity, "ignoring unplayable note");
            return;
        }

        let channel = sequencer.output_channel();
        sink.send(note_on(channel, pitch, velocity.min(127)), now);
        sink.send(note_off(channel, pitch), now + sequencer.beat_duration());
    }
}
