use anyhow::Result;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use ringbuf::traits::{Consumer, Split};
use ringbuf::HeapRb;
use tracing::{error, info, warn};

use crate::device;
use crate::OPUS_SAMPLE_RATE;

/// A live speaker stream fed from the shared playback ring.
pub struct PlaybackStream {
    #[allow(dead_code)] // held to keep the stream alive
    stream: cpal::Stream,
    sample_rate: u32,
}

/// Playback ring depth: 50 ms at 48kHz. This doubles as the target output
/// latency — the receive path appends decoded frames and anything past the
/// ring's capacity is discarded rather than letting latency grow.
const PLAYBACK_BUFFER_SIZE: usize = 2_400;

/// Open the playback device (by name, or the system default). The
/// receive path writes decoded mono i16 PCM into the returned ring
/// producer.
pub fn start_playback(
    device_name: Option<&str>,
) -> Result<(PlaybackStream, ringbuf::HeapProd<i16>)> {
    let device = device::get_output_device(device_name)?;
    let config = device.default_output_config()?;
    let channels = config.channels() as usize;

    // Decoded Opus comes out at 48kHz; playing at any other rate would
    // shift pitch, so push for 48kHz and probe before giving up on it.
    let native_rate = config.sample_rate().0;
    let requested = StreamConfig {
        channels: config.channels(),
        sample_rate: cpal::SampleRate(OPUS_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };
    let (stream_config, actual_rate) = if native_rate == OPUS_SAMPLE_RATE {
        (requested, OPUS_SAMPLE_RATE)
    } else {
        let probe = device.build_output_stream(
            &requested,
            |_: &mut [f32], _: &cpal::OutputCallbackInfo| {},
            |_| {},
            None,
        );
        match probe {
            Ok(_stream) => {
                info!(native_rate, "playback device accepts 48kHz, using it");
                (requested, OPUS_SAMPLE_RATE)
            }
            Err(_) => {
                warn!(
                    native_rate,
                    "playback device refuses 48kHz; keeping the native rate, voice will sound degraded"
                );
                let native = StreamConfig {
                    channels: config.channels(),
                    sample_rate: config.sample_rate(),
                    buffer_size: cpal::BufferSize::Default,
                };
                (native, native_rate)
            }
        }
    };

    info!(
        device = device.name().unwrap_or_default(),
        rate = actual_rate,
        channels,
        "opening playback stream"
    );

    let rb = HeapRb::<i16>::new(PLAYBACK_BUFFER_SIZE);
    let (producer, mut consumer) = rb.split();

    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mono_frames = data.len() / channels.max(1);
                let mut last_sample = 0.0f32;
                let mut underrun_at = mono_frames; // index where underrun starts

                for (i, frame) in data.chunks_mut(channels.max(1)).enumerate() {
                    let sample = match consumer.try_pop() {
                        Some(s) => {
                            let f = s as f32 / i16::MAX as f32;
                            last_sample = f;
                            f
                        }
                        None => {
                            if underrun_at == mono_frames {
                                underrun_at = i;
                            }
                            // Fade out over 32 samples from the underrun
                            // point to avoid an audible click
                            let fade_i = i - underrun_at;
                            if fade_i < 32 {
                                last_sample * (1.0 - fade_i as f32 / 32.0)
                            } else {
                                0.0
                            }
                        }
                    };
                    for ch in frame.iter_mut() {
                        *ch = sample;
                    }
                }
            },
            move |err| {
                error!("playback stream error: {err}");
            },
            None,
        )?,
        format => anyhow::bail!("unsupported output sample format: {:?}", format),
    };

    stream.play()?;

    Ok((
        PlaybackStream {
            stream,
            sample_rate: actual_rate,
        },
        producer,
    ))
}

// SAFETY: PlaybackStream only holds the cpal::Stream handle to keep it alive.
// We never call methods on it from multiple threads. The cpal Stream's
// !Send/!Sync markers are overly conservative for hold-only usage.
unsafe impl Send for PlaybackStream {}
unsafe impl Sync for PlaybackStream {}

impl PlaybackStream {
    /// Rate the stream actually runs at after negotiation.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
