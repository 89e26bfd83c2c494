// Serialized execution context for all controllers in the process
//
// One worker thread owns every `PlaybackController`. Host commands, engine
// signals and report ticks all arrive as messages on the same queue, so
// controller state is only ever touched from that thread.

use crate::callback::Notifier;
use crate::commands::{dispatch, Command, Reply};
use crate::config::PlayerConfig;
use crate::controller::PlaybackController;
use crate::engine::{EngineFactory, EngineListener, EngineSignal};
use crate::error::{PlayerError, Result};
use crate::state::PlaybackState;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

enum Message {
    Create {
        player_key: String,
        reply: Sender<()>,
    },
    Call {
        player_key: String,
        command: Command,
        reply: Sender<Result<Reply>>,
    },
    State {
        player_key: String,
        reply: Sender<Option<PlaybackState>>,
    },
    Dispose {
        player_key: String,
        reply: Sender<bool>,
    },
    Engine {
        player_key: String,
        signal: EngineSignal,
    },
    Shutdown,
}

/// Routes one controller's engine signals onto the worker queue
struct RuntimeListener {
    player_key: String,
    tx: Sender<Message>,
}

impl EngineListener for RuntimeListener {
    fn on_engine_signal(&self, signal: EngineSignal) {
        let message = Message::Engine {
            player_key: self.player_key.clone(),
            signal,
        };
        if self.tx.send(message).is_err() {
            log::debug!("[{}] engine signal after runtime shutdown", self.player_key);
        }
    }
}

/// Handle to the worker thread
///
/// Calls block until the worker answers or the command timeout elapses.
/// Do not call back into the runtime from a [`Notifier`]: notifiers run on
/// the worker thread.
pub struct PlayerRuntime {
    tx: Sender<Message>,
    worker: Option<thread::JoinHandle<()>>,
    config: PlayerConfig,
}

impl PlayerRuntime {
    pub fn start(
        config: PlayerConfig,
        factory: Arc<dyn EngineFactory>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            controllers: HashMap::new(),
            config: config.clone(),
            factory,
            notifier,
            tx: tx.clone(),
        };

        let handle = thread::Builder::new()
            .name("ncplayer-runtime".to_string())
            .spawn(move || worker.run(rx))
            .map_err(|e| PlayerError::Disconnected(format!("failed to spawn runtime: {}", e)))?;

        log::info!("player runtime started");
        Ok(Self {
            tx,
            worker: Some(handle),
            config,
        })
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Create the controller for `player_key`; existing controllers are kept.
    pub fn create_player(&self, player_key: &str) -> Result<()> {
        self.request(|reply| Message::Create {
            player_key: player_key.to_string(),
            reply,
        })
    }

    pub fn call(&self, player_key: &str, command: Command) -> Result<Reply> {
        self.request(|reply| Message::Call {
            player_key: player_key.to_string(),
            command,
            reply,
        })?
    }

    /// Controller state, or None for an unknown key.
    pub fn state(&self, player_key: &str) -> Result<Option<PlaybackState>> {
        self.request(|reply| Message::State {
            player_key: player_key.to_string(),
            reply,
        })
    }

    /// Release and forget a controller. Returns false for an unknown key.
    pub fn dispose_player(&self, player_key: &str) -> Result<bool> {
        self.request(|reply| Message::Dispose {
            player_key: player_key.to_string(),
            reply,
        })
    }

    /// Stop the worker, releasing every controller.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = self.tx.send(Message::Shutdown);
            if handle.join().is_err() {
                log::error!("player runtime panicked");
            }
            log::info!("player runtime stopped");
        }
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Message) -> Result<T> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| PlayerError::Disconnected("runtime stopped".to_string()))?;
        reply_rx
            .recv_timeout(self.config.command_timeout)
            .map_err(|err| match err {
                RecvTimeoutError::Timeout => PlayerError::Disconnected(format!(
                    "no answer within {:?}",
                    self.config.command_timeout
                )),
                RecvTimeoutError::Disconnected => {
                    PlayerError::Disconnected("runtime stopped".to_string())
                }
            })
    }
}

impl Drop for PlayerRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    controllers: HashMap<String, PlaybackController>,
    config: PlayerConfig,
    factory: Arc<dyn EngineFactory>,
    notifier: Arc<dyn Notifier>,
    tx: Sender<Message>,
}

impl Worker {
    fn run(mut self, rx: Receiver<Message>) {
        loop {
            let message = match self.next_deadline() {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline <= now {
                        self.tick(now);
                        continue;
                    }
                    match rx.recv_timeout(deadline - now) {
                        Ok(message) => message,
                        Err(RecvTimeoutError::Timeout) => {
                            self.tick(Instant::now());
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };

            if !self.handle(message) {
                break;
            }
        }

        for (_, mut controller) in self.controllers.drain() {
            let _ = controller.release();
        }
        log::debug!("runtime worker exited");
    }

    /// Returns false on shutdown.
    fn handle(&mut self, message: Message) -> bool {
        match message {
            Message::Create { player_key, reply } => {
                if !self.controllers.contains_key(&player_key) {
                    let listener = Arc::new(RuntimeListener {
                        player_key: player_key.clone(),
                        tx: self.tx.clone(),
                    });
                    let controller = PlaybackController::new(
                        player_key.clone(),
                        &self.config,
                        self.factory.clone(),
                        self.notifier.clone(),
                        listener,
                    );
                    self.controllers.insert(player_key, controller);
                }
                let _ = reply.send(());
            }
            Message::Call {
                player_key,
                command,
                reply,
            } => {
                let result = match self.controllers.get_mut(&player_key) {
                    Some(controller) => dispatch(controller, command),
                    // duration queries never fail
                    None if matches!(command, Command::GetDuration(_)) => Ok(Reply::Int(0)),
                    None => Err(PlayerError::NotPrepared(format!(
                        "no player for key {}",
                        player_key
                    ))),
                };
                if let Err(err) = &result {
                    log::warn!("[{}] command failed: {}", player_key, err);
                }
                let _ = reply.send(result);
            }
            Message::State { player_key, reply } => {
                let _ = reply.send(self.controllers.get(&player_key).map(|c| c.state()));
            }
            Message::Dispose { player_key, reply } => {
                let existed = self.controllers.remove(&player_key).is_some();
                let _ = reply.send(existed);
            }
            Message::Engine { player_key, signal } => match self.controllers.get_mut(&player_key) {
                Some(controller) => controller.handle_engine_signal(signal),
                None => log::debug!("[{}] signal for disposed player", player_key),
            },
            Message::Shutdown => return false,
        }
        true
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.controllers
            .values()
            .filter_map(PlaybackController::next_report_due)
            .min()
    }

    fn tick(&mut self, now: Instant) {
        for controller in self.controllers.values_mut() {
            controller.on_tick(now);
        }
    }
}
