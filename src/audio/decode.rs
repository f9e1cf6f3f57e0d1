//! Incremental file decoding with symphonia
//!
//! Probing happens up front so unsupported files fail at load time; the
//! packets themselves are decoded chunk by chunk on a background thread.
//! Every chunk carries the frame it starts at, so the reader can line up
//! samples after a seek.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, warn};

use super::backend::BackendError;

/// What is known about a track before decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackInfo {
    pub sample_rate: u32,
    /// 0 until the first packet is decoded, for containers that omit it
    pub channels: usize,
    pub total_frames: Option<u64>,
}

impl TrackInfo {
    pub fn duration_ms(&self) -> Option<u64> {
        self.total_frames
            .map(|frames| frames_to_ms(frames, self.sample_rate))
    }
}

pub fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames.saturating_mul(1000) / u64::from(sample_rate)
}

pub fn ms_to_frames(ms: u64, sample_rate: u32) -> u64 {
    ms.saturating_mul(u64::from(sample_rate)) / 1000
}

/// Interleaved f32 samples from one packet
#[derive(Debug)]
pub struct Chunk {
    pub start_frame: u64,
    pub channels: usize,
    pub samples: Vec<f32>,
}

pub struct MediaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    time_base: Option<TimeBase>,
    /// Frame the next chunk starts at
    next_frame: u64,
}

impl MediaDecoder {
    /// Probe the container and set up the codec for its first audio track
    pub fn open(path: &Path) -> Result<(Self, TrackInfo), BackendError> {
        let load_err = |reason: String| BackendError::Load {
            path: path.display().to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| load_err(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| load_err(e.to_string()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| load_err("no audio track found".into()))?;

        let info = TrackInfo {
            sample_rate: track
                .codec_params
                .sample_rate
                .ok_or_else(|| load_err("unknown sample rate".into()))?,
            channels: track.codec_params.channels.map(|c| c.count()).unwrap_or(0),
            total_frames: track.codec_params.n_frames,
        };
        let track_id = track.id;
        let time_base = track.codec_params.time_base;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| load_err(e.to_string()))?;

        debug!(
            path = %path.display(),
            sample_rate = info.sample_rate,
            channels = info.channels,
            frames = ?info.total_frames,
            "media probed"
        );

        Ok((
            Self {
                format,
                decoder,
                track_id,
                sample_rate: info.sample_rate,
                time_base,
                next_frame: 0,
            },
            info,
        ))
    }

    /// Decode the next packet of our track. `Ok(None)` at end of stream.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, BackendError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(BackendError::Device(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let frames = decoded.frames() as u64;
                    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    let start_frame = self.next_frame;
                    self.next_frame += frames;
                    return Ok(Some(Chunk {
                        start_frame,
                        channels: spec.channels.count(),
                        samples: buffer.samples().to_vec(),
                    }));
                }
                // corrupt packet: skip it and keep going
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(error = %e, "skipping undecodable packet");
                }
                Err(e) => return Err(BackendError::Device(e.to_string())),
            }
        }
    }

    /// Frames handed out so far, counted from the last seek target
    pub fn next_frame(&self) -> u64 {
        self.next_frame
    }

    /// Reposition the reader. Returns the frame decoding resumes at, which
    /// may be slightly before the requested position.
    pub fn seek(&mut self, position_ms: u64) -> Result<u64, BackendError> {
        let time = Time::new(position_ms / 1000, (position_ms % 1000) as f64 / 1000.0);
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| BackendError::SeekUnsupported(e.to_string()))?;
        self.decoder.reset();

        let frame = match self.time_base {
            Some(base) => {
                let at = base.calc_time(seeked.actual_ts);
                ((at.seconds as f64 + at.frac) * f64::from(self.sample_rate)).round() as u64
            }
            None => seeked.actual_ts,
        };
        debug!(position_ms, frame, "decoder repositioned");
        self.next_frame = frame;
        Ok(frame)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Write a 16-bit PCM WAV file of silence
    pub(crate) fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: u32) {
        let data_len = frames * u32::from(channels) * 2;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * u32::from(channels) * 2).to_le_bytes());
        bytes.extend_from_slice(&(channels * 2).to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.resize(44 + data_len as usize, 0);

        let mut file = File::create(path).unwrap();
        file.write_all(&bytes).unwrap();
    }

    #[test]
    fn test_decode_wav_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8000, 2, 4000);

        let (mut decoder, info) = MediaDecoder::open(&path).unwrap();
        assert_eq!(info.sample_rate, 8000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.duration_ms(), Some(500));

        let mut samples = 0;
        while let Some(chunk) = decoder.next_chunk().unwrap() {
            assert_eq!(chunk.channels, 2);
            assert_eq!(chunk.start_frame, samples as u64 / 2);
            samples += chunk.samples.len();
        }
        assert_eq!(samples, 8000);
        assert_eq!(decoder.next_frame(), 4000);
    }

    #[test]
    fn test_seek_repositions_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8000, 1, 8000);

        let (mut decoder, _) = MediaDecoder::open(&path).unwrap();
        decoder.next_chunk().unwrap();

        let frame = decoder.seek(500).unwrap();
        assert!(frame <= 4000);
        let chunk = decoder.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.start_frame, frame);
    }

    #[test]
    fn test_non_audio_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();

        let err = MediaDecoder::open(&path).err().expect("probe should fail");
        assert!(matches!(err, BackendError::Load { .. }));
    }

    #[test]
    fn test_frame_conversions() {
        assert_eq!(frames_to_ms(44_100, 44_100), 1000);
        assert_eq!(ms_to_frames(1500, 48_000), 72_000);
        assert_eq!(frames_to_ms(10, 0), 0);
    }
}
