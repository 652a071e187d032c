//! Transport commands and the thread that runs them.

use crate::traits::TransportControls;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// One playback command
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TransportCommand {
    Play,
    Pause,
    TogglePlayPause,
    Next,
    Previous,
    Stop,
    /// Absolute position
    Seek(Duration),
}

impl TransportCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportCommand::Play => "play",
            TransportCommand::Pause => "pause",
            TransportCommand::TogglePlayPause => "toggle",
            TransportCommand::Next => "next",
            TransportCommand::Previous => "previous",
            TransportCommand::Stop => "stop",
            TransportCommand::Seek(_) => "seek",
        }
    }

    /// Run the command synchronously; a panicking backend counts as a failure
    pub fn apply(&self, controls: &dyn TransportControls) -> bool {
        let command = *self;
        let outcome = catch_unwind(AssertUnwindSafe(|| match command {
            TransportCommand::Play => controls.play(),
            TransportCommand::Pause => controls.pause(),
            TransportCommand::TogglePlayPause => controls.toggle_play_pause(),
            TransportCommand::Next => controls.next(),
            TransportCommand::Previous => controls.previous(),
            TransportCommand::Stop => controls.stop(),
            TransportCommand::Seek(position) => controls.seek(position),
        }));
        outcome.unwrap_or_else(|_| {
            warn!("Transport command {} panicked", command.as_str());
            false
        })
    }
}

struct Job {
    controls: Arc<dyn TransportControls>,
    command: TransportCommand,
    reply: oneshot::Sender<bool>,
}

/// Single OS thread that executes transport commands in submission order.
///
/// Platform control calls block (process spawns, COM waits), so they are kept
/// off the async workers that drive the tick timers.
pub struct ControlExecutor {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
}

impl ControlExecutor {
    pub fn spawn() -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("nowplaying-control".to_string())
            .spawn(move || {
                for job in receiver {
                    let accepted = job.command.apply(job.controls.as_ref());
                    debug!("Transport command {} -> {}", job.command.as_str(), accepted);
                    let _ = job.reply.send(accepted);
                }
                debug!("Control executor stopped");
            })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
        })
    }

    /// Queue a command and wait for its outcome; `false` once shut down
    pub async fn send(&self, controls: Arc<dyn TransportControls>, command: TransportCommand) -> bool {
        let (reply, outcome) = oneshot::channel();
        let queued = {
            let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
            match sender.as_ref() {
                Some(sender) => sender
                    .send(Job {
                        controls,
                        command,
                        reply,
                    })
                    .is_ok(),
                None => false,
            }
        };
        if !queued {
            return false;
        }
        outcome.await.unwrap_or(false)
    }

    /// Stop accepting commands. Queued commands still run.
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
