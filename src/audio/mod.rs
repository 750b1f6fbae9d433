/// Audio clock using cpal
///
/// Playback timestamps live on this clock. The stream itself is silent; its
/// callback only counts rendered frames, so time advances with the device.
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::error::{Error, Result};

const START_TIMEOUT: Duration = Duration::from_secs(1);

/// Monotonic time source, in seconds, shared by the scheduler and note sinks.
pub trait AudioClock: Send + Sync {
    fn current_time(&self) -> f64;

    /// Blocks until the clock is running. Must succeed before the first
    /// note is scheduled, otherwise early events are lost.
    fn ensure_active(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct ClockHandle {
    frames: Arc<AtomicU64>,
    started: Arc<AtomicBool>,
    sample_rate: f64,
}

impl AudioClock for ClockHandle {
    fn current_time(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate
    }

    fn ensure_active(&self) -> Result<()> {
        let deadline = Instant::now() + START_TIMEOUT;
        while !self.started.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                return Err(Error::ClockUnavailable(START_TIMEOUT));
            }
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

pub struct StreamClock {
    _stream: cpal::Stream,
    handle: ClockHandle,
}

impl StreamClock {
    /// Opens the default output device and starts a silent stream on it.
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        info!("Audio host: {:?}", host.id());

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device found".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| Error::Audio(e.to_string()))?;

        let sample_rate = config.sample_rate().0 as f64;
        let channels = config.channels().max(1) as usize;

        let handle = ClockHandle {
            frames: Arc::new(AtomicU64::new(0)),
            started: Arc::new(AtomicBool::new(false)),
            sample_rate,
        };

        let frames = Arc::clone(&handle.frames);
        let started = Arc::clone(&handle.started);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device
                .build_output_stream(
                    &config.into(),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        data.fill(0.0);
                        frames.fetch_add((data.len() / channels) as u64, Ordering::Release);
                        started.store(true, Ordering::Release);
                    },
                    |err| error!("Audio stream error: {}", err),
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?,
            format => {
                return Err(Error::Audio(format!("unsupported sample format {format:?}")));
            }
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        info!(sample_rate, "audio clock stream started");

        Ok(Self {
            _stream: stream,
            handle,
        })
    }

    pub fn handle(&self) -> ClockHandle {
        self.handle.clone()
    }
}

/// Wall clock fallback for machines without an audio device.
#[derive(Clone)]
pub struct InstantClock {
    origin: Instant,
}

impl InstantClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for InstantClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for InstantClock {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to. Used to drive the scheduler in tests.
#[derive(Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(time: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(time.to_bits())),
        }
    }

    pub fn set(&self, time: f64) {
        self.bits.store(time.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.current_time() + seconds);
    }
}

impl AudioClock for ManualClock {
    fn current_time(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1.5);
        assert_eq!(clock.current_time(), 1.5);
        clock.advance(0.25);
        assert_eq!(clock.current_time(), 1.75);
        assert!(clock.ensure_active().is_ok());
    }

    #[test]
    fn test_instant_clock_is_monotonic() {
        let clock = InstantClock::new();
        let first = clock.current_time();
        assert!(clock.current_time() >= first);
    }
}
