use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait};

/// An audio endpoint the user can pick in settings.
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub name: String,
    pub is_default: bool,
}

/// Which side of the audio hardware we are talking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Capture,
    Playback,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Self::Capture => "input",
            Self::Playback => "output",
        }
    }
}

fn enumerate(direction: Direction) -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = match direction {
        Direction::Capture => host.default_input_device(),
        Direction::Playback => host.default_output_device(),
    }
    .and_then(|d| d.name().ok());

    let all: Box<dyn Iterator<Item = cpal::Device>> = match direction {
        Direction::Capture => Box::new(host.input_devices()?),
        Direction::Playback => Box::new(host.output_devices()?),
    };

    // Devices without a readable name can't be selected, so they are
    // left out of the list entirely.
    Ok(all
        .filter_map(|d| d.name().ok())
        .map(|name| AudioDevice {
            is_default: default_name.as_deref() == Some(&name),
            name,
        })
        .collect())
}

fn open(direction: Direction, preferred: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(wanted) = preferred {
        let mut all: Box<dyn Iterator<Item = cpal::Device>> = match direction {
            Direction::Capture => Box::new(host.input_devices()?),
            Direction::Playback => Box::new(host.output_devices()?),
        };
        if let Some(device) = all.find(|d| d.name().ok().as_deref() == Some(wanted)) {
            return Ok(device);
        }
        // The configured device may have been unplugged since it was
        // saved; fall through to the system default.
    }

    match direction {
        Direction::Capture => host.default_input_device(),
        Direction::Playback => host.default_output_device(),
    }
    .ok_or_else(|| anyhow!("no usable {} device", direction.label()))
}

/// List microphones the user can choose from.
pub fn list_input_devices() -> Result<Vec<AudioDevice>> {
    enumerate(Direction::Capture)
}

/// List speakers/headphones the user can choose from.
pub fn list_output_devices() -> Result<Vec<AudioDevice>> {
    enumerate(Direction::Playback)
}

/// Open the named microphone, or the system default when the name is
/// absent or no longer present.
pub fn get_input_device(preferred: Option<&str>) -> Result<cpal::Device> {
    open(Direction::Capture, preferred)
}

/// Open the named playback device, or the system default when the name is
/// absent or no longer present.
pub fn get_output_device(preferred: Option<&str>) -> Result<cpal::Device> {
    open(Direction::Playback, preferred)
}
