use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create MIDI client: {0}")]
    MidiInit(String),

    #[error("no MIDI port matching '{0}'")]
    NoSuchPort(String),

    #[error("failed to connect to MIDI port: {0}")]
    MidiConnect(String),

    #[error("failed to send MIDI message: {0}")]
    MidiSend(String),

    #[error("audio device error: {0}")]
    Audio(String),

    #[error("audio clock did not start within {0:?}")]
    ClockUnavailable(std::time::Duration),

    #[error("invalid HSL colour '{0}'")]
    MalformedColour(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
