/// MIDI I/O using midir
///
/// Output is timestamped: messages are queued on a dispatch thread and sent
/// when the shared clock reaches their time, so scheduling jitter never
/// reaches the wire.
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::AudioClock;
use crate::error::{Error, Result};

pub const NOTE_ON: u8 = 0x90;
pub const NOTE_OFF: u8 = 0x80;
pub const TIMING_CLOCK: u8 = 0xF8;
pub const CLOCK_START: u8 = 0xFA;
pub const CLOCK_STOP: u8 = 0xFC;
/// MIDI clock resolution (pulses per quarter note).
pub const CLOCKS_PER_BEAT: u32 = 24;
/// MIDI note of pitch index 0 (A0, the bottom of an 88-key range).
pub const BASE_PITCH: u8 = 21;

const CLIENT_NAME: &str = "phaseq";
const MAX_DISPATCH_WAIT: f64 = 0.005;

/// Anything that accepts timestamped three-byte MIDI messages.
pub trait NoteSink {
    fn send(&mut self, message: [u8; 3], timestamp: f64);
}

/// MIDI key for a pitch index, pinned to the 7-bit data range.
pub fn midi_key(pitch: u8) -> u8 {
    BASE_PITCH.saturating_add(pitch).min(0x7F)
}

pub fn note_on(channel: u8, pitch: u8, velocity: u8) -> [u8; 3] {
    [NOTE_ON + (channel & 0x0F), midi_key(pitch), velocity.min(0x7F)]
}

pub fn note_off(channel: u8, pitch: u8) -> [u8; 3] {
    [NOTE_OFF + (channel & 0x0F), midi_key(pitch), 0]
}

pub fn is_note_off(message: &[u8; 3]) -> bool {
    message[0] & 0xF0 == NOTE_OFF
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}

/// Index of the first port whose name contains `name`.
pub fn find_port(ports: &[String], name: &str) -> Result<usize> {
    ports
        .iter()
        .position(|port| port.contains(name))
        .ok_or_else(|| Error::NoSuchPort(name.to_string()))
}

struct Pending {
    due: f64,
    seq: u64,
    message: [u8; 3],
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed so the heap pops the earliest message first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .total_cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Time-ordered message queue. Equal timestamps keep insertion order.
#[derive(Default)]
pub struct PendingQueue {
    heap: BinaryHeap<Pending>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn push(&mut self, message: [u8; 3], due: f64) {
        self.heap.push(Pending {
            due,
            seq: self.next_seq,
            message,
        });
        self.next_seq += 1;
    }

    pub fn next_due(&self) -> Option<f64> {
        self.heap.peek().map(|pending| pending.due)
    }

    pub fn pop_due(&mut self, now: f64) -> Vec<[u8; 3]> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|pending| pending.due <= now) {
            if let Some(pending) = self.heap.pop() {
                due.push(pending.message);
            }
        }
        due
    }

    /// Empties the queue, returning only the note-offs in time order.
    pub fn drain_note_offs(&mut self) -> Vec<[u8; 3]> {
        let mut offs = Vec::new();
        while let Some(pending) = self.heap.pop() {
            if is_note_off(&pending.message) {
                offs.push(pending.message);
            }
        }
        offs
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

enum DispatchCommand {
    Send { message: [u8; 3], timestamp: f64 },
    Disconnect,
}

pub struct MidiOutputDevice {
    clock: Arc<dyn AudioClock>,
    sender: Option<Sender<DispatchCommand>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl MidiOutputDevice {
    pub fn new(clock: Arc<dyn AudioClock>) -> Self {
        Self {
            clock,
            sender: None,
            thread_handle: None,
        }
    }

    pub fn available_ports() -> Vec<String> {
        if let Ok(midi_out) = MidiOutput::new("phaseq port scan") {
            midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect()
        } else {
            vec![]
        }
    }

    pub fn connect(&mut self, port_index: usize) -> Result<()> {
        self.disconnect();

        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| Error::MidiInit(e.to_string()))?;

        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| Error::NoSuchPort(format!("#{port_index}")))?;
        let name = midi_out.port_name(port).unwrap_or_default();

        let connection = midi_out
            .connect(port, "phaseq-output")
            .map_err(|e| Error::MidiConnect(e.to_string()))?;
        info!(port = %name, "connected MIDI output");

        let (sender, receiver) = channel();
        let clock = Arc::clone(&self.clock);
        let handle = thread::spawn(move || dispatch_thread(receiver, connection, clock));

        self.sender = Some(sender);
        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn connect_by_name(&mut self, name: &str) -> Result<()> {
        let index = find_port(&Self::available_ports(), name)?;
        self.connect(index)
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_some()
    }

    /// Closes the port after sending any queued note-offs.
    pub fn disconnect(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(DispatchCommand::Disconnect);
        }

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl NoteSink for MidiOutputDevice {
    fn send(&mut self, message: [u8; 3], timestamp: f64) {
        let Some(sender) = &self.sender else {
            debug!("no MIDI output connected, dropping message");
            return;
        };

        if sender
            .send(DispatchCommand::Send { message, timestamp })
            .is_err()
        {
            warn!("MIDI dispatch thread has gone away");
            self.sender = None;
        }
    }
}

impl Drop for MidiOutputDevice {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn dispatch_thread(
    receiver: Receiver<DispatchCommand>,
    mut connection: MidiOutputConnection,
    clock: Arc<dyn AudioClock>,
) {
    let mut queue = PendingQueue::default();

    loop {
        let now = clock.current_time();
        for message in queue.pop_due(now) {
            if let Err(e) = connection.send(&message) {
                warn!("{}", Error::MidiSend(e.to_string()));
            }
        }

        let wait = queue
            .next_due()
            .map(|due| (due - now).clamp(0.0, MAX_DISPATCH_WAIT))
            .unwrap_or(MAX_DISPATCH_WAIT);

        match receiver.recv_timeout(Duration::from_secs_f64(wait)) {
            Ok(DispatchCommand::Send { message, timestamp }) => queue.push(message, timestamp),
            Ok(DispatchCommand::Disconnect) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    for message in queue.drain_note_offs() {
        let _ = connection.send(&message);
    }
    connection.close();
    debug!("MIDI dispatch thread finished");
}

pub struct MidiInputDevice {
    connection: Option<MidiInputConnection<()>>,
}

impl MidiInputDevice {
    pub fn new() -> Self {
        Self { connection: None }
    }

    pub fn available_ports() -> Vec<String> {
        if let Ok(midi_in) = MidiInput::new("phaseq port scan") {
            midi_in
                .ports()
                .iter()
                .filter_map(|p| midi_in.port_name(p).ok())
                .collect()
        } else {
            vec![]
        }
    }

    /// Connects to an input port. Incoming messages arrive on the returned
    /// channel with their driver timestamp in seconds.
    pub fn connect(&mut self, port_index: usize) -> Result<Receiver<(f64, Vec<u8>)>> {
        self.disconnect();

        let mut midi_in =
            MidiInput::new(CLIENT_NAME).map_err(|e| Error::MidiInit(e.to_string()))?;
        // Clock ticks are needed by `ClockMonitor`; only sysex is dropped.
        midi_in.ignore(Ignore::Sysex);

        let ports = midi_in.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| Error::NoSuchPort(format!("#{port_index}")))?;

        let (sender, receiver) = channel();
        let connection = midi_in
            .connect(
                port,
                "phaseq-input",
                move |stamp, message, _| {
                    let _ = sender.send((stamp as f64 / 1_000_000.0, message.to_vec()));
                },
                (),
            )
            .map_err(|e| Error::MidiConnect(e.to_string()))?;

        self.connection = Some(connection);
        Ok(receiver)
    }

    pub fn connect_by_name(&mut self, name: &str) -> Result<Receiver<(f64, Vec<u8>)>> {
        let index = find_port(&Self::available_ports(), name)?;
        self.connect(index)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

impl Default for MidiInputDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Follows an external MIDI clock and estimates its tempo once per beat.
#[derive(Debug, Default)]
pub struct ClockMonitor {
    ticks: u32,
    beat_start: Option<f64>,
}

impl ClockMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the current beat. Start and stop messages call this too.
    pub fn reset(&mut self) {
        self.ticks = 0;
        self.beat_start = None;
    }

    /// Feeds one raw message received at `timestamp` seconds. Returns the
    /// estimated bpm whenever a full beat of clock ticks has arrived.
    pub fn handle_message(&mut self, message: &[u8], timestamp: f64) -> Option<f64> {
        match *message.first()? {
            TIMING_CLOCK => {}
            CLOCK_START | CLOCK_STOP => {
                debug!(status = message[0], "clock transport message");
                self.reset();
                return None;
            }
            _ => return None,
        }

        let Some(start) = self.beat_start else {
            self.beat_start = Some(timestamp);
            return None;
        };

        self.ticks += 1;
        if self.ticks < CLOCKS_PER_BEAT {
            return None;
        }

        self.ticks = 0;
        self.beat_start = Some(timestamp);
        let elapsed = timestamp - start;
        (elapsed > 0.0).then(|| 60.0 / elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_messages() {
        assert_eq!(note_on(0, 10, 100), [0x90, 31, 100]);
        assert_eq!(note_off(2, 0), [0x82, 21, 0]);
        assert!(is_note_off(&note_off(5, 3)));
        assert!(!is_note_off(&note_on(5, 3, 1)));
    }

    #[test]
    fn test_data_bytes_stay_seven_bit() {
        assert_eq!(midi_key(87), 108);
        assert_eq!(midi_key(250), 0x7F);
        assert_eq!(note_on(0, 250, 200), [0x90, 0x7F, 0x7F]);
        assert_eq!(note_off(3, 255), [0x83, 0x7F, 0]);
    }

    #[test]
    fn test_midi_note_name() {
        assert_eq!(midi_note_name(BASE_PITCH), "A0");
        assert_eq!(midi_note_name(60), "C4");
    }

    #[test]
    fn test_find_port() {
        let ports = vec!["Midi Through".to_string(), "Focusrite USB".to_string()];
        assert_eq!(find_port(&ports, "Focusrite").unwrap(), 1);
        assert!(matches!(find_port(&ports, "Nope"), Err(Error::NoSuchPort(_))));
    }

    #[test]
    fn test_pending_queue_orders_by_time() {
        let mut queue = PendingQueue::default();
        queue.push(note_off(0, 1), 0.5);
        queue.push(note_on(0, 1, 90), 0.0);
        queue.push(note_on(0, 2, 90), 0.5);

        assert_eq!(queue.next_due(), Some(0.0));
        assert_eq!(queue.pop_due(0.1), vec![note_on(0, 1, 90)]);
        assert_eq!(queue.pop_due(0.5), vec![note_off(0, 1), note_on(0, 2, 90)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clock_monitor_reports_once_per_beat() {
        let tick = 0.5 / CLOCKS_PER_BEAT as f64;
        let mut monitor = ClockMonitor::new();

        let reports: Vec<(usize, f64)> = (0..=48)
            .filter_map(|i| {
                monitor
                    .handle_message(&[TIMING_CLOCK], i as f64 * tick)
                    .map(|bpm| (i, bpm))
            })
            .collect();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].0, 24);
        assert_eq!(reports[1].0, 48);
        assert!(reports.iter().all(|(_, bpm)| (bpm - 120.0).abs() < 1e-6));
    }

    #[test]
    fn test_clock_monitor_resets_on_transport() {
        let mut monitor = ClockMonitor::new();
        for i in 0..20 {
            monitor.handle_message(&[TIMING_CLOCK], i as f64 * 0.01);
        }
        assert_eq!(monitor.handle_message(&[CLOCK_START], 0.2), None);
        assert_eq!(monitor.handle_message(&note_on(0, 1, 90), 0.21), None);

        let bpm = (0..=24)
            .filter_map(|i| monitor.handle_message(&[TIMING_CLOCK], 1.0 + i as f64 / 48.0))
            .last()
            .unwrap();
        assert!((bpm - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_drain_keeps_note_offs() {
        let mut queue = PendingQueue::default();
        queue.push(note_on(0, 1, 90), 1.0);
        queue.push(note_off(0, 1), 2.0);
        queue.push(note_off(0, 4), 1.5);

        assert_eq!(queue.drain_note_offs(), vec![note_off(0, 4), note_off(0, 1)]);
        assert_eq!(queue.len(), 0);
    }
}
