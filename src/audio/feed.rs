//! Bounded hand-off between the decoder thread and the output callback
//!
//! The decoder runs at most [`BLOCKS_AHEAD`] packets ahead of playback and
//! blocks once the channel is full, so memory stays flat whatever the file
//! length. The output side never takes a lock: it pulls blocks with
//! `try_recv` and publishes its position through [`Transport`].
//!
//! Seeks bump a generation counter. Blocks decoded for an older generation
//! are dropped by the reader.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use super::decode::MediaDecoder;

/// Decoded packets buffered ahead of the output
pub const BLOCKS_AHEAD: usize = 32;

const UNKNOWN: u64 = u64::MAX;

/// Interleaved samples starting at `start_frame`
#[derive(Debug)]
pub struct Block {
    generation: u64,
    start_frame: u64,
    channels: usize,
    samples: Vec<f32>,
}

impl Block {
    fn end_frame(&self) -> u64 {
        if self.channels == 0 {
            return self.start_frame;
        }
        self.start_frame + (self.samples.len() / self.channels) as u64
    }
}

#[derive(Debug)]
pub enum Feed {
    Samples(Block),
    /// Decoder reached the end, or gave up, after `frames` frames
    End { generation: u64, frames: u64 },
}

#[derive(Debug)]
pub enum Control {
    Seek { position_ms: u64, generation: u64 },
}

/// Playback position and end-of-media flag shared with the output callback
#[derive(Debug)]
pub struct Transport {
    generation: AtomicU64,
    seek_frame: AtomicU64,
    position: AtomicU64,
    end_frame: AtomicU64,
    ended: AtomicBool,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            generation: AtomicU64::new(0),
            seek_frame: AtomicU64::new(0),
            position: AtomicU64::new(0),
            end_frame: AtomicU64::new(UNKNOWN),
            ended: AtomicBool::new(false),
        }
    }
}

impl Transport {
    pub fn position_frames(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    /// Total frames, once the decoder has reached the end
    pub fn end_frame(&self) -> Option<u64> {
        match self.end_frame.load(Ordering::SeqCst) {
            UNKNOWN => None,
            frames => Some(frames),
        }
    }

    pub fn ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Move the playhead to `frame` and return the new generation
    pub fn begin_seek(&self, frame: u64) -> u64 {
        self.seek_frame.store(frame, Ordering::SeqCst);
        self.position.store(frame, Ordering::SeqCst);
        self.ended.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Output-side reader. Lives inside the device callback.
pub struct Playhead {
    feed: Receiver<Feed>,
    transport: Arc<Transport>,
    generation: u64,
    block: Option<Block>,
    /// Read position in source frames
    cursor: f64,
    step: f64,
    finished: bool,
}

impl Playhead {
    pub fn new(feed: Receiver<Feed>, transport: Arc<Transport>, source_rate: u32, output_rate: u32) -> Self {
        let step = if output_rate == 0 {
            1.0
        } else {
            f64::from(source_rate) / f64::from(output_rate)
        };
        Self {
            feed,
            transport,
            generation: 0,
            block: None,
            cursor: 0.0,
            step,
            finished: false,
        }
    }

    /// Fill one device buffer. Frames not decoded yet come out as `silence`.
    pub fn fill<T: Copy>(
        &mut self,
        out: &mut [T],
        out_channels: usize,
        silence: T,
        convert: impl Fn(f32) -> T,
    ) {
        self.sync_generation();

        for frame in out.chunks_mut(out_channels.max(1)) {
            if !self.ready() {
                frame.fill(silence);
                continue;
            }
            let Some(block) = &self.block else {
                frame.fill(silence);
                continue;
            };

            let index = self.cursor as u64;
            let base = (index - block.start_frame) as usize * block.channels;
            let source = &block.samples[base..base + block.channels];
            for (c, sample) in frame.iter_mut().enumerate() {
                let value = if out_channels == 1 {
                    source.iter().sum::<f32>() / block.channels as f32
                } else {
                    source[c % block.channels]
                };
                *sample = convert(value);
            }
            self.cursor += self.step;
        }

        // a seek that landed mid-buffer owns the position now
        if self.transport.generation() == self.generation {
            self.transport.position.store(self.cursor as u64, Ordering::SeqCst);
            if self.finished && self.block.is_none() {
                self.transport.ended.store(true, Ordering::SeqCst);
            }
        }
    }

    fn sync_generation(&mut self) {
        let generation = self.transport.generation();
        if generation != self.generation {
            self.generation = generation;
            self.block = None;
            self.finished = false;
            self.cursor = self.transport.seek_frame.load(Ordering::SeqCst) as f64;
        }
    }

    /// Make `self.block` cover the cursor, pulling blocks as needed.
    /// False on underrun or at the end.
    fn ready(&mut self) -> bool {
        loop {
            let index = self.cursor as u64;
            if let Some(block) = &self.block {
                if index < block.start_frame {
                    self.cursor = block.start_frame as f64;
                    return true;
                }
                if index < block.end_frame() {
                    return true;
                }
                self.block = None;
            }
            if self.finished {
                return false;
            }

            match self.feed.try_recv() {
                Ok(Feed::Samples(block)) if block.generation == self.generation => {
                    self.block = Some(block);
                }
                Ok(Feed::End { generation, frames }) => {
                    self.transport.end_frame.store(frames, Ordering::SeqCst);
                    self.finished = generation == self.generation;
                }
                // decoded before the last seek
                Ok(Feed::Samples(_)) => {}
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => self.finished = true,
            }
        }
    }
}

enum Step {
    Sent,
    Control(Control),
    Quit,
}

/// Decode on a background thread into `feed`. The thread exits when
/// either the output side or the control sender goes away.
pub fn spawn_decoder(
    decoder: MediaDecoder,
    feed: Sender<Feed>,
    control: Receiver<Control>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("audio-decoder".to_string())
        .spawn(move || run_decoder(decoder, feed, control))
}

fn run_decoder(mut decoder: MediaDecoder, feed: Sender<Feed>, control: Receiver<Control>) {
    let mut generation = 0;

    loop {
        let (message, at_end) = match decoder.next_chunk() {
            Ok(Some(chunk)) => (
                Feed::Samples(Block {
                    generation,
                    start_frame: chunk.start_frame,
                    channels: chunk.channels,
                    samples: chunk.samples,
                }),
                false,
            ),
            Ok(None) => {
                debug!(frames = decoder.next_frame(), "decoding finished");
                let frames = decoder.next_frame();
                (Feed::End { generation, frames }, true)
            }
            Err(e) => {
                warn!(error = %e, "decoding stopped early");
                let frames = decoder.next_frame();
                (Feed::End { generation, frames }, true)
            }
        };

        let step = select! {
            send(feed, message) -> sent => match sent {
                Ok(()) => Step::Sent,
                Err(_) => Step::Quit,
            },
            recv(control) -> command => match command {
                Ok(command) => Step::Control(command),
                Err(_) => Step::Quit,
            },
        };

        let command = match step {
            Step::Sent if at_end => match control.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
            Step::Sent => continue,
            Step::Control(command) => command,
            Step::Quit => break,
        };

        // only the newest of several queued seeks matters
        let Control::Seek {
            position_ms,
            generation: next,
        } = control.try_iter().last().unwrap_or(command);
        generation = next;
        if let Err(e) = decoder.seek(position_ms) {
            warn!(error = %e, position_ms, "decoder seek failed");
        }
    }

    debug!("decoder thread exiting");
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::audio::decode::tests::write_wav;

    fn block(generation: u64, start_frame: u64, samples: Vec<f32>) -> Feed {
        Feed::Samples(Block {
            generation,
            start_frame,
            channels: 1,
            samples,
        })
    }

    fn playhead() -> (Playhead, Sender<Feed>, Arc<Transport>) {
        let (tx, rx) = crossbeam_channel::bounded(BLOCKS_AHEAD);
        let transport = Arc::new(Transport::default());
        (Playhead::new(rx, Arc::clone(&transport), 1, 1), tx, transport)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_playhead_reads_across_blocks() {
        let (mut head, tx, transport) = playhead();
        tx.send(block(0, 0, vec![0.1, 0.2])).unwrap();
        tx.send(block(0, 2, vec![0.3])).unwrap();

        let mut out = [0.0f32; 4];
        head.fill(&mut out, 1, 0.0, |v| v);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.0]);
        assert_eq!(transport.position_frames(), 3);
        assert!(!transport.ended());
    }

    #[test]
    fn test_stereo_source_downmixed_for_mono_output() {
        let (tx, rx) = crossbeam_channel::bounded(BLOCKS_AHEAD);
        let mut head = Playhead::new(rx, Arc::new(Transport::default()), 1, 1);
        tx.send(Feed::Samples(Block {
            generation: 0,
            start_frame: 0,
            channels: 2,
            samples: vec![0.2, 0.4],
        }))
        .unwrap();

        let mut out = [0.0f32; 1];
        head.fill(&mut out, 1, 0.0, |v| v);
        assert!((out[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_end_marker_sets_ended() {
        let (mut head, tx, transport) = playhead();
        tx.send(block(0, 0, vec![0.5])).unwrap();
        tx.send(Feed::End {
            generation: 0,
            frames: 1,
        })
        .unwrap();

        let mut out = [0.0f32; 3];
        head.fill(&mut out, 1, 0.0, |v| v);
        assert!(transport.ended());
        assert_eq!(transport.end_frame(), Some(1));
    }

    #[test]
    fn test_seek_drops_stale_blocks() {
        let (mut head, tx, transport) = playhead();
        let generation = transport.begin_seek(10);
        assert_eq!(transport.position_frames(), 10);

        tx.send(block(0, 0, vec![0.9, 0.9])).unwrap();
        // decoder landed a little early; the playhead skips ahead
        tx.send(block(generation, 8, vec![0.0, 0.0, 0.7, 0.8])).unwrap();

        let mut out = [0.0f32; 2];
        head.fill(&mut out, 1, 0.0, |v| v);
        assert_eq!(out, [0.7, 0.8]);
        assert_eq!(transport.position_frames(), 12);
    }

    #[test]
    fn test_underrun_outputs_silence_without_ending() {
        let (mut head, _tx, transport) = playhead();
        let mut out = [1.0f32; 4];
        head.fill(&mut out, 1, 0.0, |v| v);
        assert_eq!(out, [0.0; 4]);
        assert!(!transport.ended());
        assert_eq!(transport.position_frames(), 0);
    }

    #[test]
    fn test_decoder_stays_bounded_ahead() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");
        // far more packets than the channel holds
        write_wav(&path, 8000, 1, 8000 * 60);

        let (decoder, info) = MediaDecoder::open(&path).unwrap();
        let (feed_tx, feed_rx) = crossbeam_channel::bounded(4);
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let handle = spawn_decoder(decoder, feed_tx, control_rx).unwrap();

        wait_until(|| feed_rx.is_full());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(feed_rx.len(), 4);
        assert!(!handle.is_finished());

        // a seek near the end lets the reader finish quickly
        let transport = Arc::new(Transport::default());
        let target = info.total_frames.unwrap() - 100;
        let generation = transport.begin_seek(target);
        control_tx
            .send(Control::Seek {
                position_ms: crate::audio::decode::frames_to_ms(target, info.sample_rate),
                generation,
            })
            .unwrap();

        let mut head = Playhead::new(feed_rx, Arc::clone(&transport), 8000, 8000);
        let mut out = vec![0.0f32; 256];
        wait_until(|| {
            head.fill(&mut out, 1, 0.0, |v| v);
            transport.ended()
        });
        assert_eq!(transport.end_frame(), info.total_frames);

        drop(control_tx);
        drop(head);
        handle.join().unwrap();
    }
}
