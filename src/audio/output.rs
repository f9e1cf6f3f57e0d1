//! cpal output backend
//!
//! A background thread decodes the file a bounded number of packets ahead
//! of the output stream, which plays them at the device rate. Seeking is
//! forwarded to the decoder; pausing pauses the device stream.

use std::path::Path;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use crossbeam_channel::Sender;
use tracing::{error, info};

use super::backend::{BackendError, BackendState, MediaBackend};
use super::decode::{frames_to_ms, ms_to_frames, MediaDecoder, TrackInfo};
use super::feed::{spawn_decoder, Control, Playhead, Transport, BLOCKS_AHEAD};

struct Loaded {
    // dropped first, which also ends the decoder thread
    stream: cpal::Stream,
    control: Sender<Control>,
    transport: Arc<Transport>,
    info: TrackInfo,
    paused: bool,
}

/// Default output device backend
pub struct CpalBackend {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    media: Option<Loaded>,
}

impl CpalBackend {
    pub fn new() -> Result<Self, BackendError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| BackendError::Unavailable("no default output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".into()),
            sample_rate = config.sample_rate().0,
            channels = config.channels(),
            "audio output ready"
        );

        Ok(Self {
            device,
            config,
            media: None,
        })
    }

    fn loaded(&self) -> Result<&Loaded, BackendError> {
        self.media.as_ref().ok_or(BackendError::NoMedia)
    }

    fn loaded_mut(&mut self) -> Result<&mut Loaded, BackendError> {
        self.media.as_mut().ok_or(BackendError::NoMedia)
    }

    fn build_stream(&self, playhead: Playhead) -> Result<cpal::Stream, BackendError> {
        let config: cpal::StreamConfig = self.config.clone().into();
        match self.config.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&self.device, &config, playhead),
            SampleFormat::I16 => build_stream::<i16>(&self.device, &config, playhead),
            SampleFormat::U16 => build_stream::<u16>(&self.device, &config, playhead),
            SampleFormat::I32 => build_stream::<i32>(&self.device, &config, playhead),
            other => Err(BackendError::Device(format!(
                "unsupported output sample format: {other:?}"
            ))),
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut playhead: Playhead,
) -> Result<cpal::Stream, BackendError>
where
    T: SizedSample + FromSample<f32>,
{
    let out_channels = usize::from(config.channels);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                playhead.fill(data, out_channels, T::EQUILIBRIUM, |v| T::from_sample(v));
            },
            |err| error!(%err, "audio output stream error"),
            None,
        )
        .map_err(|e| BackendError::Device(e.to_string()))
}

impl MediaBackend for CpalBackend {
    fn load(&mut self, path: &Path) -> Result<(), BackendError> {
        self.media = None;

        let (decoder, info) = MediaDecoder::open(path)?;
        let (feed_tx, feed_rx) = crossbeam_channel::bounded(BLOCKS_AHEAD);
        let (control, control_rx) = crossbeam_channel::unbounded();
        let transport = Arc::new(Transport::default());

        let playhead = Playhead::new(
            feed_rx,
            Arc::clone(&transport),
            info.sample_rate,
            self.config.sample_rate().0,
        );
        let stream = self.build_stream(playhead)?;
        // some hosts start streams on creation
        stream
            .pause()
            .map_err(|e| BackendError::Device(e.to_string()))?;

        spawn_decoder(decoder, feed_tx, control_rx)
            .map_err(|e| BackendError::Device(format!("failed to spawn decoder thread: {e}")))?;

        self.media = Some(Loaded {
            stream,
            control,
            transport,
            info,
            paused: true,
        });
        Ok(())
    }

    fn play(&mut self) -> Result<(), BackendError> {
        let media = self.loaded_mut()?;
        media
            .stream
            .play()
            .map_err(|e| BackendError::Device(e.to_string()))?;
        media.paused = false;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), BackendError> {
        let media = self.loaded_mut()?;
        media
            .stream
            .pause()
            .map_err(|e| BackendError::Device(e.to_string()))?;
        media.paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), BackendError> {
        self.play()
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        if let Some(media) = self.media.take() {
            // dropping the stream closes the device
            let _ = media.stream.pause();
        }
        Ok(())
    }

    fn seek_to(&mut self, position_ms: u64) -> Result<(), BackendError> {
        let media = self.loaded()?;
        let rate = media.info.sample_rate;
        let mut frame = ms_to_frames(position_ms, rate);
        if let Some(total) = media.info.total_frames.or(media.transport.end_frame()) {
            frame = frame.min(total);
        }

        let generation = media.transport.begin_seek(frame);
        media
            .control
            .send(Control::Seek {
                position_ms: frames_to_ms(frame, rate),
                generation,
            })
            .map_err(|_| BackendError::SeekUnsupported("decoder has stopped".into()))
    }

    fn position_ms(&self) -> Result<u64, BackendError> {
        let media = self.loaded()?;
        Ok(frames_to_ms(
            media.transport.position_frames(),
            media.info.sample_rate,
        ))
    }

    fn duration_ms(&self) -> Result<Option<u64>, BackendError> {
        let media = self.loaded()?;
        if let Some(ms) = media.info.duration_ms() {
            return Ok(Some(ms));
        }
        Ok(media
            .transport
            .end_frame()
            .map(|frames| frames_to_ms(frames, media.info.sample_rate)))
    }

    fn state(&self) -> Result<BackendState, BackendError> {
        let Some(media) = &self.media else {
            return Ok(BackendState::Stopped);
        };
        if media.transport.ended() {
            return Ok(BackendState::Ended);
        }
        Ok(if media.paused {
            BackendState::Paused
        } else {
            BackendState::Playing
        })
    }
}
