use anyhow::{anyhow, bail, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::codec::{self, decoder, encoder};
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;
use ffmpeg::util::frame::video::Video;
use ffmpeg::{Dictionary, Rational};
use std::sync::Once;
use tracing::info;

use crate::pixel::PixelBuffer;

static FFMPEG_INIT: Once = Once::new();

/// Initialize FFmpeg library (must be called before using any FFmpeg APIs)
pub(crate) fn init_ffmpeg() -> Result<()> {
    let mut failed = false;
    FFMPEG_INIT.call_once(|| {
        if ffmpeg::init().is_err() {
            failed = true;
        }
    });
    if failed {
        bail!("failed to initialize FFmpeg");
    }
    Ok(())
}

/// Hardware encoders to try before falling back to libx264 software encoding.
/// Order: NVIDIA → Intel Quick Sync → AMD, then software fallback.
const HW_ENCODERS: &[(&str, &str)] = &[
    ("h264_nvenc", "NVIDIA NVENC"),
    ("h264_qsv", "Intel Quick Sync"),
    ("h264_amf", "AMD AMF"),
];

/// An H.264 encoder for screen share frames.
///
/// Takes BGRA bitmaps, converts them to the encoder's planar format with a
/// reusable SwsContext, and emits Annex-B byte streams.
pub struct H264Encoder {
    encoder: encoder::Video,
    scaler: scaling::Context,
    width: u32,
    height: u32,
    frame_index: i64,
    /// Pixel format used by this encoder (YUV420P for most, NV12 for QSV).
    pixel_format: Pixel,
}

// SAFETY: The FFmpeg encoder context is not Send by default due to raw pointers,
// but FFmpeg encoding is safe to use from a single thread at a time.
unsafe impl Send for H264Encoder {}

impl H264Encoder {
    /// Create a new H.264 encoder.
    ///
    /// Tries hardware encoders first (NVENC, QSV, AMF), falling back to
    /// libx264 software encoding if none are available.
    ///
    /// `width` and `height` must be divisible by 2.
    /// `bitrate_kbps` is the target bitrate in kilobits per second.
    pub fn new(width: u32, height: u32, bitrate_kbps: u32, fps: u32) -> Result<Self> {
        if width % 2 != 0 || height % 2 != 0 {
            bail!("H.264 encoder: width and height must be divisible by 2");
        }
        if fps == 0 {
            bail!("H.264 encoder: fps must be non-zero");
        }

        init_ffmpeg()?;

        for &(name, label) in HW_ENCODERS {
            if let Some(codec) = encoder::find_by_name(name) {
                match Self::try_open_hw(codec, name, width, height, bitrate_kbps, fps) {
                    Ok(enc) => {
                        info!("H.264 encoder: using {} hardware encoder ({})", label, name);
                        return Ok(enc);
                    }
                    Err(e) => {
                        info!("H.264 encoder: {} not usable: {}", name, e);
                    }
                }
            }
        }

        let enc = Self::open_x264(width, height, bitrate_kbps, fps)?;
        info!("H.264 encoder: using libx264 software encoder");
        Ok(enc)
    }

    fn try_open_hw(
        codec: ffmpeg::Codec,
        name: &str,
        width: u32,
        height: u32,
        bitrate_kbps: u32,
        fps: u32,
    ) -> Result<Self> {
        // QSV doesn't support YUV420P — it needs NV12 (semi-planar UV).
        let formats_to_try = if name == "h264_qsv" {
            &[Pixel::NV12][..]
        } else {
            &[Pixel::YUV420P, Pixel::NV12]
        };

        let mut last_err = None;
        for &pixel_format in formats_to_try {
            let mut opts = Dictionary::new();
            match name {
                "h264_nvenc" => {
                    opts.set("preset", "p1"); // Fastest NVENC preset
                    opts.set("tune", "ull"); // Ultra low latency
                    opts.set("rc", "cbr");
                    opts.set("delay", "0");
                    opts.set("zerolatency", "1");
                }
                "h264_qsv" => {
                    opts.set("preset", "veryfast");
                    opts.set("async_depth", "1");
                    opts.set("low_power", "1");
                }
                "h264_amf" => {
                    opts.set("usage", "ultralowlatency");
                    opts.set("quality", "speed");
                    opts.set("rc", "cbr");
                }
                _ => {}
            }

            match Self::open_with(codec, width, height, bitrate_kbps, fps, pixel_format, opts) {
                Ok(enc) => return Ok(enc),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("{}: no compatible pixel format", name)))
    }

    /// Open the libx264 software encoder with ultrafast + zerolatency settings.
    fn open_x264(width: u32, height: u32, bitrate_kbps: u32, fps: u32) -> Result<Self> {
        let codec = encoder::find_by_name("libx264")
            .ok_or_else(|| anyhow!("libx264 codec not found (is FFmpeg built with x264?)"))?;

        let mut opts = Dictionary::new();
        opts.set("preset", "ultrafast");
        opts.set("tune", "zerolatency");

        let x264_params = ["scenecut=0", "keyint=60", "min-keyint=60"].join(":");
        opts.set("x264-params", &x264_params);

        Self::open_with(codec, width, height, bitrate_kbps, fps, Pixel::YUV420P, opts)
    }

    fn open_with(
        codec: ffmpeg::Codec,
        width: u32,
        height: u32,
        bitrate_kbps: u32,
        fps: u32,
        pixel_format: Pixel,
        opts: Dictionary,
    ) -> Result<Self> {
        let mut enc = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("failed to create encoder context")?;

        enc.set_width(width);
        enc.set_height(height);
        enc.set_format(pixel_format);
        enc.set_time_base(Rational::new(1, fps as i32));
        enc.set_frame_rate(Some(Rational::new(fps as i32, 1)));
        if bitrate_kbps > 0 {
            enc.set_bit_rate(bitrate_kbps as usize * 1000);
        }
        enc.set_max_b_frames(0);

        let encoder = enc
            .open_with(opts)
            .with_context(|| format!("{}: failed to open", codec.name()))?;

        let scaler = scaling::Context::get(
            Pixel::BGRA,
            width,
            height,
            pixel_format,
            width,
            height,
            scaling::Flags::FAST_BILINEAR,
        )
        .context("failed to create BGRA conversion context")?;

        Ok(Self {
            encoder,
            scaler,
            width,
            height,
            frame_index: 0,
            pixel_format,
        })
    }

    /// Encode one BGRA frame.
    ///
    /// Returns the Annex-B payload for this frame, or an empty vector if
    /// the encoder has not produced output yet (e.g. before the first
    /// keyframe is available).
    pub fn encode(&mut self, frame: &PixelBuffer, force_keyframe: bool) -> Result<Vec<u8>> {
        if !frame.is_size(self.width, self.height) {
            bail!(
                "H.264 encoder: frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }

        let mut src = Video::new(Pixel::BGRA, self.width, self.height);
        let dst_stride = src.stride(0);
        let src_width_bytes = self.width as usize * 4;
        {
            let dst_data = src.data_mut(0);
            for y in 0..self.height {
                let dst_off = y as usize * dst_stride;
                dst_data[dst_off..dst_off + src_width_bytes].copy_from_slice(frame.row(y));
            }
        }

        let mut planar = Video::empty();
        self.scaler
            .run(&src, &mut planar)
            .context("BGRA conversion failed")?;

        planar.set_pts(Some(self.frame_index));
        if force_keyframe {
            planar.set_kind(ffmpeg::picture::Type::I);
        } else {
            planar.set_kind(ffmpeg::picture::Type::None);
        }

        self.encoder
            .send_frame(&planar)
            .context("H.264 encoder: failed to send frame")?;
        self.frame_index += 1;

        let mut out = Vec::new();
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            out.extend_from_slice(packet.data().unwrap_or(&[]));
        }
        Ok(out)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Planar format this encoder consumes internally.
    pub fn pixel_format(&self) -> Pixel {
        self.pixel_format
    }
}

impl Drop for H264Encoder {
    fn drop(&mut self) {
        // Flush encoder
        let _ = self.encoder.send_eof();
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            // Drain remaining packets
        }
    }
}

/// An H.264 decoder for remote screen-share frames. One instance per sender.
pub struct H264Decoder {
    decoder: decoder::Video,
    /// Lazily created once the output dimensions are known.
    scaler: Option<scaling::Context>,
}

// SAFETY: The FFmpeg decoder context is not Send by default due to raw pointers,
// but FFmpeg decoding is safe to use from a single thread at a time.
unsafe impl Send for H264Decoder {}

impl H264Decoder {
    pub fn new() -> Result<Self> {
        init_ffmpeg()?;

        let codec = decoder::find(codec::Id::H264)
            .ok_or_else(|| anyhow!("H.264 decoder: codec not found"))?;

        let decoder = codec::context::Context::new_with_codec(codec)
            .decoder()
            .open_as(codec)
            .context("H.264 decoder: failed to open decoder")?
            .video()?;

        Ok(Self {
            decoder,
            scaler: None,
        })
    }

    /// Decode one Annex-B frame into a BGRA bitmap.
    ///
    /// Returns `None` when the decoder buffered the input without producing
    /// output (e.g. waiting for a keyframe). When the packet yields multiple
    /// frames, the newest wins.
    pub fn decode(&mut self, data: &[u8]) -> Result<Option<PixelBuffer>> {
        let packet = ffmpeg::Packet::copy(data);
        self.decoder
            .send_packet(&packet)
            .context("H.264 decoder: failed to send packet")?;

        let mut latest = None;
        let mut decoded = Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            latest = Some(self.to_bgra(&decoded)?);
        }
        Ok(latest)
    }

    fn to_bgra(&mut self, frame: &Video) -> Result<PixelBuffer> {
        let width = frame.width();
        let height = frame.height();

        let needs_new = match &self.scaler {
            Some(s) => s.input().width != width || s.input().height != height,
            None => true,
        };
        if needs_new {
            self.scaler = Some(
                scaling::Context::get(
                    frame.format(),
                    width,
                    height,
                    Pixel::BGRA,
                    width,
                    height,
                    scaling::Flags::FAST_BILINEAR,
                )
                .context("H.264 decoder: failed to create BGRA scaler")?,
            );
        }

        let scaler = self.scaler.as_mut().ok_or_else(|| anyhow!("scaler missing"))?;
        let mut bgra = Video::empty();
        scaler
            .run(frame, &mut bgra)
            .context("H.264 decoder: BGRA conversion failed")?;

        let stride = bgra.stride(0);
        let plane = bgra.data(0);
        let row_bytes = width as usize * 4;
        let mut out = PixelBuffer::new(width, height);
        for y in 0..height {
            let src_off = y as usize * stride;
            out.row_mut(y)
                .copy_from_slice(&plane[src_off..src_off + row_bytes]);
        }
        Ok(out)
    }
}

impl Drop for H264Decoder {
    fn drop(&mut self) {
        // Flush decoder
        let _ = self.decoder.send_eof();
        let mut frame = Video::empty();
        while self.decoder.receive_frame(&mut frame).is_ok() {
            // Drain remaining frames
        }
    }
}
