//! phaseq CLI - play, inspect and step-record phase patterns over MIDI

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use phaseq::export::export_notes;
use phaseq::project::{load_project, save_project};
use phaseq::{
    midi_note_name, AudioClock, ClockMonitor, Config, InstantClock, MidiInputDevice, MidiOutputDevice,
    NoteSink, PlaybackEngine, PlaybackEvent, Sequencer, StepInput, StreamClock,
};

#[derive(Parser)]
#[command(name = "phaseq")]
#[command(about = "Phase pattern sequencer", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/phaseq/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List MIDI input and output ports
    Ports,

    /// Print the merged superpattern of a project
    Merge {
        /// Project file (JSON)
        project: PathBuf,

        /// Print export note events as JSON instead of lanes
        #[arg(long)]
        json: bool,
    },

    /// Play a project to a MIDI output. Reads commands from stdin while playing.
    Play {
        /// Project file (JSON); the seed grids are used when omitted
        project: Option<PathBuf>,

        /// MIDI output port name (substring match)
        #[arg(short, long)]
        port: Option<String>,

        /// Stop after this many seconds
        #[arg(short, long)]
        seconds: Option<f64>,
    },

    /// Step-record notes from a MIDI input into one grid, then save
    Record {
        /// Project file (JSON); created from the seed grids if missing
        project: PathBuf,

        /// Grid to record into
        #[arg(short, long, default_value = "0")]
        grid: usize,

        /// MIDI input port name (substring match)
        #[arg(short, long)]
        port: Option<String>,
    },

    /// Report the tempo of an external MIDI clock on an input port
    Clock {
        /// MIDI input port name (substring match)
        #[arg(short, long)]
        port: Option<String>,

        /// Stop after this many beats
        #[arg(short, long)]
        beats: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading config")?;

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Merge { project, json } => print_merge(&config, &project, json),
        Commands::Play {
            project,
            port,
            seconds,
        } => play(&config, project.as_deref(), port.or(config.midi_output.clone()), seconds),
        Commands::Record {
            project,
            grid,
            port,
        } => record(&config, &project, grid, port.or(config.midi_input.clone())),
        Commands::Clock { port, beats } => follow_clock(port.or(config.midi_input.clone()), beats),
    }
}

fn load_sequencer(config: &Config, project: Option<&Path>) -> anyhow::Result<Sequencer> {
    let mut sequencer = Sequencer::from_config(config);
    if let Some(path) = project {
        if path.exists() {
            let snapshot = load_project(path)
                .with_context(|| format!("loading project {}", path.display()))?;
            sequencer.restore(snapshot);
            info!(path = %path.display(), grids = sequencer.grids().len(), "project loaded");
        }
    }
    Ok(sequencer)
}

fn list_ports() -> anyhow::Result<()> {
    println!("MIDI outputs:");
    for (i, name) in MidiOutputDevice::available_ports().iter().enumerate() {
        println!("  {i}: {name}");
    }
    println!("MIDI inputs:");
    for (i, name) in MidiInputDevice::available_ports().iter().enumerate() {
        println!("  {i}: {name}");
    }
    Ok(())
}

fn print_merge(config: &Config, project: &Path, json: bool) -> anyhow::Result<()> {
    if !project.exists() {
        bail!("project {} not found", project.display());
    }
    let sequencer = load_sequencer(config, Some(project))?;
    let merged = sequencer.merged();

    if json {
        let notes = export_notes(&merged, sequencer.bpm(), sequencer.output_channel());
        println!("{}", serde_json::to_string_pretty(&notes)?);
        return Ok(());
    }

    let lengths: Vec<_> = sequencer.grids().iter().map(|g| g.num_columns()).collect();
    println!("grids {:?} -> {} merged steps", lengths, merged.len());

    let mut pitches: Vec<u8> = merged
        .iter()
        .flat_map(|beat| beat.notes.keys().copied())
        .collect();
    pitches.sort_unstable();
    pitches.dedup();

    for pitch in pitches.into_iter().rev() {
        let lane: String = merged
            .iter()
            .map(|beat| if beat.notes.contains_key(&pitch) { '#' } else { '.' })
            .collect();
        println!("{:>4} {}", midi_note_name(phaseq::midi::midi_key(pitch)), lane);
    }
    Ok(())
}

enum Command {
    Play,
    Stop,
    Note(u8, u8),
    Toggle(usize, usize, u8),
    Bpm(f64),
    Undo,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let command = match words.next()? {
        "play" => Command::Play,
        "stop" | "pause" => Command::Stop,
        "note" => Command::Note(words.next()?.parse().ok()?, words.next().unwrap_or("100").parse().ok()?),
        "toggle" => Command::Toggle(
            words.next()?.parse().ok()?,
            words.next()?.parse().ok()?,
            words.next()?.parse().ok()?,
        ),
        "bpm" => Command::Bpm(words.next()?.parse().ok()?),
        "undo" => Command::Undo,
        "quit" | "exit" => Command::Quit,
        _ => return None,
    };
    Some(command)
}

fn spawn_stdin_reader() -> Receiver<Command> {
    let (sender, receiver) = channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_command(&line) {
                Some(command) => {
                    if sender.send(command).is_err() {
                        break;
                    }
                }
                None => eprintln!("commands: play | stop | note P [V] | toggle G B P | bpm N | undo | quit"),
            }
        }
    });
    receiver
}

fn open_clock() -> (Option<StreamClock>, Arc<dyn AudioClock>) {
    match StreamClock::open() {
        Ok(stream) => {
            let clock: Arc<dyn AudioClock> = Arc::new(stream.handle());
            (Some(stream), clock)
        }
        Err(e) => {
            warn!("audio clock unavailable ({}), falling back to wall clock", e);
            let clock: Arc<dyn AudioClock> = Arc::new(InstantClock::new());
            (None, clock)
        }
    }
}

fn play(
    config: &Config,
    project: Option<&Path>,
    port: Option<String>,
    seconds: Option<f64>,
) -> anyhow::Result<()> {
    let mut sequencer = load_sequencer(config, project)?;

    // The stream must outlive playback; dropping it stops the clock.
    let (_stream, clock) = open_clock();

    let mut output = MidiOutputDevice::new(Arc::clone(&clock));
    match &port {
        Some(name) => output
            .connect_by_name(name)
            .with_context(|| format!("connecting to MIDI output '{name}'"))?,
        None => warn!("no MIDI output selected; playback will be silent"),
    }

    let mut engine = PlaybackEngine::new(config.lookahead_seconds);
    let events = engine.subscribe();
    let commands = spawn_stdin_reader();
    let pass_interval = Duration::from_millis(config.pass_interval_ms.max(1));
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs_f64(s.max(0.0)));

    engine.start(clock.as_ref())?;

    loop {
        while let Ok(command) = commands.try_recv() {
            let sink = output.is_connected().then_some(&mut output as &mut dyn NoteSink);
            match command {
                Command::Play => engine.start(clock.as_ref())?,
                Command::Stop => engine.stop(),
                Command::Note(pitch, velocity) => {
                    engine.play_note_now(&sequencer, sink, pitch, velocity, clock.current_time())
                }
                Command::Toggle(grid, beat, pitch) => {
                    sequencer.toggle_note(grid, beat, pitch);
                }
                Command::Bpm(bpm) => sequencer.set_bpm(bpm),
                Command::Undo => {
                    if !sequencer.undo() {
                        println!("nothing to undo");
                    }
                }
                Command::Quit => {
                    engine.stop();
                    output.disconnect();
                    return Ok(());
                }
            }
        }

        let sink = output.is_connected().then_some(&mut output as &mut dyn NoteSink);
        engine.run_pass(&sequencer, sink, clock.current_time());

        for event in events.try_iter() {
            if let PlaybackEvent::StepAdvanced(step) = event {
                let beats: Vec<_> = sequencer
                    .grids()
                    .iter()
                    .map(|g| step % g.num_columns())
                    .collect();
                debug!(step, ?beats, "step");
            }
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        thread::sleep(pass_interval);
    }

    engine.stop();
    output.disconnect();
    Ok(())
}

fn record(
    config: &Config,
    project: &Path,
    grid: usize,
    port: Option<String>,
) -> anyhow::Result<()> {
    let mut sequencer = load_sequencer(config, Some(project))?;
    if sequencer.grid(grid).is_none() {
        bail!("project has no grid {grid}");
    }

    let Some(name) = port else {
        bail!("no MIDI input selected (use --port or midi_input in the config)");
    };

    let mut input = MidiInputDevice::new();
    let messages = input
        .connect_by_name(&name)
        .with_context(|| format!("connecting to MIDI input '{name}'"))?;

    let mut step_input = StepInput::new();
    step_input.arm(grid);
    println!("recording {} steps into grid {grid}", sequencer.grids()[grid].num_columns());

    while step_input.is_armed() {
        let Ok((_, message)) = messages.recv() else { break };
        if step_input.handle_message(&mut sequencer, &message) {
            println!("step {}", step_input.cursor());
        }
    }

    input.disconnect();
    save_project(project, &sequencer.snapshot())
        .with_context(|| format!("saving project {}", project.display()))?;
    info!(path = %project.display(), "project saved");
    Ok(())
}

fn follow_clock(port: Option<String>, beats: Option<usize>) -> anyhow::Result<()> {
    let Some(name) = port else {
        bail!("no MIDI input selected (use --port or midi_input in the config)");
    };

    let mut input = MidiInputDevice::new();
    let messages = input
        .connect_by_name(&name)
        .with_context(|| format!("connecting to MIDI input '{name}'"))?;

    let mut monitor = ClockMonitor::new();
    let mut reported = 0;
    info!(port = %name, "waiting for MIDI clock");

    while beats.map_or(true, |beats| reported < beats) {
        let Ok((timestamp, message)) = messages.recv() else { break };
        if let Some(bpm) = monitor.handle_message(&message, timestamp) {
            println!("{bpm:.1} bpm");
            reported += 1;
        }
    }

    input.disconnect();
    Ok(())
}
