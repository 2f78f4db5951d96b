//! Detector configuration, read once at startup from the JSON memory file the
//! host application maintains. Only the audio and wake-word keys matter here;
//! everything else in the file is ignored. A missing or unreadable file means
//! defaults, never a startup failure.

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::audio::echo::SuppressorParams;
use crate::{Error, Result};

/// Opaque device id as stored by the host: an index or a device name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Index(i64),
    Name(String),
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Index(i) => write!(f, "#{i}"),
            DeviceSelector::Name(name) => write!(f, "{name}"),
        }
    }
}

impl<'de> Deserialize<'de> for DeviceSelector {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(i) => DeviceSelector::Index(i),
            Raw::Text(s) => match s.trim().parse::<i64>() {
                Ok(i) => DeviceSelector::Index(i),
                Err(_) => DeviceSelector::Name(s),
            },
        })
    }
}

/// Which wake-word engine to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WakeLanguage {
    /// Streaming transcript + phrase search.
    #[default]
    French,
    /// Neural keyword scoring.
    English,
}

impl fmt::Display for WakeLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WakeLanguage::French => write!(f, "FR"),
            WakeLanguage::English => write!(f, "EN"),
        }
    }
}

impl<'de> Deserialize<'de> for WakeLanguage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim().to_ascii_uppercase().as_str() {
            "FR" => Ok(WakeLanguage::French),
            "EN" => Ok(WakeLanguage::English),
            other => Err(serde::de::Error::custom(format!(
                "unknown wake language {other:?}, expected FR or EN"
            ))),
        }
    }
}

/// Microphone stream settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MicrophoneConfig {
    pub enabled: bool,
    pub device: Option<DeviceSelector>,
}

/// System-output reference stream settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceConfig {
    pub enabled: bool,
    pub device: Option<DeviceSelector>,
    /// Acoustic round-trip delay to compensate, in milliseconds.
    pub delay_ms: u32,
}

/// `audio_config` object as the host writes it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawAudioConfig {
    mic_enabled: bool,
    mic_index: Option<DeviceSelector>,
    sys_enabled: bool,
    sys_index: Option<DeviceSelector>,
    sys_delay: i64,
    debug_audio: bool,
    echo_strength: Option<f32>,
    echo_floor: Option<f32>,
    echo_silence_threshold: Option<u64>,
}

impl Default for RawAudioConfig {
    fn default() -> Self {
        Self {
            mic_enabled: true,
            mic_index: None,
            sys_enabled: false,
            sys_index: None,
            sys_delay: 0,
            debug_audio: false,
            echo_strength: None,
            echo_floor: None,
            echo_silence_threshold: None,
        }
    }
}

/// Top-level memory file, reduced to the keys the detector reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct MemoryFile {
    audio_config: RawAudioConfig,
    wake_lang: Option<WakeLanguage>,
    wake_words: Option<Vec<String>>,
}

/// Everything the detection loop needs from the persisted configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub microphone: MicrophoneConfig,
    pub reference: ReferenceConfig,
    pub debug_audio: bool,
    pub language: WakeLanguage,
    /// Phrases for the transcript engine; `None` means the built-in list.
    pub wake_words: Option<Vec<String>>,
    pub echo: SuppressorParams,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            microphone: MicrophoneConfig {
                enabled: true,
                device: None,
            },
            reference: ReferenceConfig {
                enabled: false,
                device: None,
                delay_ms: 0,
            },
            debug_audio: false,
            language: WakeLanguage::default(),
            wake_words: None,
            echo: SuppressorParams::default(),
        }
    }
}

impl DetectorConfig {
    /// Parse the memory file JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the text is not valid JSON of the expected shape,
    /// or [`Error::Config`] for a negative delay.
    pub fn from_json(text: &str) -> Result<Self> {
        let memory: MemoryFile = serde_json::from_str(text)?;
        Self::from_memory(memory)
    }

    /// Load from `path`, falling back to defaults if the file is missing or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config not readable, using defaults");
                return Self::default();
            }
        };
        match Self::from_json(&text) {
            Ok(config) => {
                info!(path = %path.display(), "config loaded");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config invalid, using defaults");
                Self::default()
            }
        }
    }

    fn from_memory(memory: MemoryFile) -> Result<Self> {
        let audio = memory.audio_config;
        let defaults = SuppressorParams::default();
        let delay_ms = u32::try_from(audio.sys_delay)
            .map_err(|_| Error::Config(format!("sys_delay must be >= 0, got {}", audio.sys_delay)))?;
        Ok(Self {
            microphone: MicrophoneConfig {
                enabled: audio.mic_enabled,
                device: audio.mic_index,
            },
            reference: ReferenceConfig {
                enabled: audio.sys_enabled,
                device: audio.sys_index,
                delay_ms,
            },
            debug_audio: audio.debug_audio,
            language: memory.wake_lang.unwrap_or_default(),
            wake_words: memory.wake_words,
            echo: SuppressorParams {
                strength: audio.echo_strength.unwrap_or(defaults.strength),
                floor: audio.echo_floor.unwrap_or(defaults.floor),
                silence_threshold: audio
                    .echo_silence_threshold
                    .unwrap_or(defaults.silence_threshold),
            },
        })
    }

    /// Reject values the loop cannot honor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.echo.strength) {
            return Err(Error::Config(format!(
                "echo_strength must be within [0, 1], got {}",
                self.echo.strength
            )));
        }
        if !(0.0..=1.0).contains(&self.echo.floor) {
            return Err(Error::Config(format!(
                "echo_floor must be within [0, 1], got {}",
                self.echo.floor
            )));
        }
        if let Some(words) = &self.wake_words {
            if words.iter().all(|w| w.trim().is_empty()) {
                return Err(Error::Config("wake_words must contain at least one phrase".into()));
            }
        }
        Ok(())
    }
}
