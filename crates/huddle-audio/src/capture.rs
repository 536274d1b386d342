use anyhow::Result;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use ringbuf::traits::{Producer, Split};
use ringbuf::HeapRb;
use tracing::{error, info, warn};

use crate::device;
use crate::OPUS_SAMPLE_RATE;

/// A live microphone stream.
///
/// The cpal callback converts whatever the device delivers into mono i16
/// and writes it into a lock-free ring the voice send engine drains. The
/// callback only ever writes the ring; it never blocks.
pub struct CaptureStream {
    #[allow(dead_code)] // held to keep the stream alive
    stream: cpal::Stream,
    sample_rate: u32,
}

/// Capture ring depth: a fifth of a second at 48kHz. Enough slack for the
/// frame builder to fall behind briefly without the callback overwriting.
const CAPTURE_BUFFER_SIZE: usize = 48_000 / 5;

/// Open the microphone (by name, or the system default) and begin
/// capturing. The returned ring consumer yields raw mono i16 PCM.
pub fn start_capture(
    device_name: Option<&str>,
) -> Result<(CaptureStream, ringbuf::HeapCons<i16>)> {
    let device = device::get_input_device(device_name)?;
    let config = device.default_input_config()?;
    let channels = config.channels() as usize;
    let sample_format = config.sample_format();

    let rb = HeapRb::<i16>::new(CAPTURE_BUFFER_SIZE);
    let (mut producer, consumer) = rb.split();

    // Ask for 48kHz outright so captured samples feed Opus without a
    // resampling stage; not every device honours the request.
    let native_rate = config.sample_rate().0;
    let requested = StreamConfig {
        channels: config.channels(),
        sample_rate: cpal::SampleRate(OPUS_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };
    let (stream_config, actual_rate) = if native_rate == OPUS_SAMPLE_RATE {
        (requested, OPUS_SAMPLE_RATE)
    } else {
        // Probe with a throwaway stream to see whether the device takes
        // 48kHz at all
        let probe = device.build_input_stream(
            &requested,
            |_: &[f32], _: &cpal::InputCallbackInfo| {},
            |_| {},
            None,
        );
        match probe {
            Ok(_stream) => {
                info!(native_rate, "capture device accepts 48kHz, using it");
                (requested, OPUS_SAMPLE_RATE)
            }
            Err(_) => {
                warn!(
                    native_rate,
                    "capture device refuses 48kHz; keeping the native rate, voice will sound degraded"
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
        "opening capture stream"
    );

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Take the first channel and convert to i16; full rings
                // drop the newest samples rather than blocking.
                for chunk in data.chunks(channels) {
                    let sample = (chunk[0].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    let _ = producer.try_push(sample);
                }
            },
            move |err| {
                error!("capture stream error: {err}");
            },
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                for chunk in data.chunks(channels) {
                    let _ = producer.try_push(chunk[0]);
                }
            },
            move |err| {
                error!("capture stream error: {err}");
            },
            None,
        )?,
        format => anyhow::bail!("unsupported sample format: {:?}", format),
    };

    stream.play()?;

    Ok((
        CaptureStream {
            stream,
            sample_rate: actual_rate,
        },
        consumer,
    ))
}

// SAFETY: CaptureStream only holds the cpal::Stream handle to keep it alive.
// We never call methods on it from multiple threads. The cpal Stream's
// !Send/!Sync markers are overly conservative for hold-only usage.
unsafe impl Send for CaptureStream {}
unsafe impl Sync for CaptureStream {}

impl CaptureStream {
    /// Rate the stream actually runs at after negotiation.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
