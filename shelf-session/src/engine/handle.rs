//! Engine owner task
//!
//! The engine is not thread-safe, so exactly one task owns it. Every other
//! component talks to it through a cloneable [`EngineHandle`] that sends
//! commands over an mpsc channel and awaits a oneshot reply.

use super::{EngineEvent, EngineEventSink, EngineStatus, MediaEngine, MediaSource};
use crate::error::EngineError;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

const COMMAND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 256;

enum EngineCommand {
    Insert {
        index: usize,
        source: MediaSource,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    SeekTo {
        index: usize,
        offset_ms: u64,
        reply: oneshot::Sender<()>,
    },
    SeekToDefault {
        index: usize,
        reply: oneshot::Sender<()>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Prepare {
        reply: oneshot::Sender<()>,
    },
    SetPlayWhenReady {
        play: bool,
        reply: oneshot::Sender<()>,
    },
    Release {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Cloneable handle to the engine owner task
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    events: EngineEventSink,
}

impl EngineHandle {
    /// Move `engine` onto its own task and return a handle to it
    ///
    /// `poll_interval` drives [`MediaEngine::poll`]. Must be called from within a
    /// tokio runtime. The task exits when the last handle is dropped.
    pub fn spawn<E: MediaEngine>(mut engine: E, poll_interval: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        engine.attach(events.clone());

        tokio::spawn(run_engine(engine, command_rx, poll_interval));

        Self { command_tx, events }
    }

    /// Subscribe to engine events
    ///
    /// Only events published after this call are received.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::Closed)?;
        reply_rx.await.map_err(|_| EngineError::Closed)
    }

    pub async fn insert_track_at(&self, index: usize, source: MediaSource) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::Insert {
            index,
            source,
            reply,
        })
        .await?
    }

    pub async fn seek_to(&self, index: usize, offset_ms: u64) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::SeekTo {
            index,
            offset_ms,
            reply,
        })
        .await
    }

    pub async fn seek_to_default_position(&self, index: usize) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::SeekToDefault { index, reply })
            .await
    }

    pub async fn clear(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::Clear { reply }).await
    }

    pub async fn prepare(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::Prepare { reply }).await
    }

    pub async fn set_play_when_ready(&self, play: bool) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::SetPlayWhenReady { play, reply })
            .await
    }

    pub async fn release(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineCommand::Release { reply }).await
    }

    /// Full engine readout
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineCommand::Status { reply }).await
    }

    pub async fn current_index(&self) -> Result<Option<usize>, EngineError> {
        Ok(self.status().await?.current_index)
    }

    pub async fn track_count(&self) -> Result<usize, EngineError> {
        Ok(self.status().await?.track_count)
    }
}

async fn run_engine<E: MediaEngine>(
    mut engine: E,
    mut command_rx: mpsc::Receiver<EngineCommand>,
    poll_interval: Duration,
) {
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                let Some(command) = command else {
                    debug!("All engine handles dropped, stopping engine task");
                    break;
                };
                apply(&mut engine, command);
            }
            _ = tick.tick() => {
                engine.poll();
            }
        }
    }
}

fn apply<E: MediaEngine>(engine: &mut E, command: EngineCommand) {
    // A dropped reply receiver just means the caller stopped waiting.
    match command {
        EngineCommand::Insert {
            index,
            source,
            reply,
        } => {
            let result = engine.insert_track_at(index, source);
            if let Err(e) = &result {
                warn!("Engine rejected insert at {}: {}", index, e);
            }
            let _ = reply.send(result);
        }
        EngineCommand::SeekTo {
            index,
            offset_ms,
            reply,
        } => {
            engine.seek_to(index, offset_ms);
            let _ = reply.send(());
        }
        EngineCommand::SeekToDefault { index, reply } => {
            engine.seek_to_default_position(index);
            let _ = reply.send(());
        }
        EngineCommand::Clear { reply } => {
            engine.clear();
            let _ = reply.send(());
        }
        EngineCommand::Prepare { reply } => {
            engine.prepare();
            let _ = reply.send(());
        }
        EngineCommand::SetPlayWhenReady { play, reply } => {
            engine.set_play_when_ready(play);
            let _ = reply.send(());
        }
        EngineCommand::Release { reply } => {
            engine.release();
            let _ = reply.send(());
        }
        EngineCommand::Status { reply } => {
            let _ = reply.send(engine.status());
        }
    }
}
