use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use rodio::{Decoder, OutputStream, Sink, Source};

use crate::error::AudioError;
use crate::log_warn;

use super::{AudioElement, ClockElement};

const ENABLE_LOGS: bool = true;

enum AudioCommand {
    Play,
    Pause,
    Seek(f64),
    SetMuted(bool),
}

/// Plays the match track on the default output device.
///
/// The output stream is not `Send`, so it lives on a dedicated thread that
/// receives commands over a channel. Position bookkeeping is done locally
/// with a [`ClockElement`].
pub struct RodioElement {
    tx: Sender<AudioCommand>,
    clock: ClockElement,
}

impl RodioElement {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AudioError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let (tx, rx) = mpsc::channel::<AudioCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<Option<f64>, AudioError>>();

        thread::Builder::new()
            .name("match-audio".to_string())
            .spawn(move || {
                let opened = (|| -> Result<(OutputStream, Sink, Option<f64>), AudioError> {
                    let (stream, handle) = OutputStream::try_default().map_err(|e| {
                        AudioError::Device(format!("Failed to create audio output stream: {e}"))
                    })?;
                    let sink = Sink::try_new(&handle).map_err(|e| {
                        AudioError::Device(format!("Failed to create audio sink: {e}"))
                    })?;
                    let file = File::open(&path).map_err(|e| {
                        AudioError::Device(format!("Failed to open {}: {e}", path.display()))
                    })?;
                    let source = Decoder::new(BufReader::new(file)).map_err(|e| {
                        AudioError::Device(format!("Failed to decode {}: {e}", path.display()))
                    })?;
                    let duration = source.total_duration().map(|d| d.as_secs_f64());
                    sink.pause();
                    sink.append(source);
                    Ok((stream, sink, duration))
                })();

                let (_stream, sink) = match opened {
                    Ok((stream, sink, duration)) => {
                        let _ = ready_tx.send(Ok(duration));
                        (stream, sink)
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        AudioCommand::Play => sink.play(),
                        AudioCommand::Pause => sink.pause(),
                        AudioCommand::Seek(secs) => {
                            if let Err(err) = sink.try_seek(Duration::from_secs_f64(secs)) {
                                log_warn!("Audio seek to {:.1}s failed: {}", secs, err);
                            }
                        }
                        AudioCommand::SetMuted(muted) => {
                            sink.set_volume(if muted { 0.0 } else { 1.0 })
                        }
                    }
                }
                sink.stop();
            })
            .map_err(|e| AudioError::Device(e.to_string()))?;

        let duration = ready_rx
            .recv()
            .map_err(|_| AudioError::Device("audio thread exited during start-up".into()))??;

        Ok(Self {
            tx,
            clock: ClockElement::new(duration),
        })
    }

    fn send(&self, cmd: AudioCommand) -> Result<(), AudioError> {
        self.tx
            .send(cmd)
            .map_err(|_| AudioError::Device("audio thread is gone".into()))
    }
}

impl AudioElement for RodioElement {
    fn play(&mut self) -> Result<(), AudioError> {
        self.send(AudioCommand::Play)?;
        self.clock.play()
    }

    fn pause(&mut self) {
        let _ = self.send(AudioCommand::Pause);
        self.clock.pause();
    }

    fn is_paused(&self) -> bool {
        self.clock.is_paused()
    }

    fn current_time(&self) -> f64 {
        self.clock.current_time()
    }

    fn set_current_time(&mut self, secs: f64) {
        self.clock.set_current_time(secs);
        let _ = self.send(AudioCommand::Seek(self.clock.current_time()));
    }

    fn set_muted(&mut self, muted: bool) {
        let _ = self.send(AudioCommand::SetMuted(muted));
        self.clock.set_muted(muted);
    }

    fn is_muted(&self) -> bool {
        self.clock.is_muted()
    }

    fn duration(&self) -> Option<f64> {
        self.clock.duration()
    }
}
