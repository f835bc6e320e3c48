//! Command dispatch bus.
//!
//! Producers (modules, the arbiter, remote bridges) call
//! [`CommandBus::submit`], which only enqueues. The [`CommandDispatcher`]
//! loop drains the queue and runs every command on its own tracked worker,
//! bounded by a semaphore. [`CommandBus::execute`] is the blocking mode: it
//! runs the handler inline on the caller's task.
//!
//! # Reentrancy
//!
//! `execute` from inside a handler runs the handler recursively on the same
//! task. Handlers that hold a lock across `execute` of a command that takes
//! the same lock deadlock; callers must release such locks first.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::constants::LOOP_IDLE_TIMEOUT;
use crate::error::{MonitorError, MonitorResult};
use crate::runtime::{panic_message, TaskSpawner, TokioSpawner};

/// A routed request: `target` names a module or built-in handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub target: String,
    pub verb: String,
    #[serde(default)]
    pub payload: Value,
    /// Run inline on the submitting task instead of the worker pool.
    #[serde(default)]
    pub blocking: bool,
}

impl Command {
    pub fn new(target: impl Into<String>, verb: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            target: target.into(),
            verb: verb.into(),
            payload: payload.into(),
            blocking: false,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_null() {
            write!(f, "{} {}", self.target, self.verb)
        } else {
            write!(f, "{} {} ({})", self.target, self.verb, self.payload)
        }
    }
}

/// Routes commands to their targets.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command) -> MonitorResult<()>;
}

struct BusInner {
    queue: mpsc::UnboundedSender<Command>,
    /// Late-bound so the orchestrator can own the bus without a cycle.
    handler: RwLock<Option<Weak<dyn CommandHandler>>>,
}

/// Cheap, cloneable handle for submitting commands.
#[derive(Clone)]
pub struct CommandBus {
    inner: Arc<BusInner>,
}

impl CommandBus {
    /// Creates a bus and the dispatcher that will drain it.
    pub fn new() -> (Self, CommandDispatcher) {
        let (queue, rx) = mpsc::unbounded_channel();
        let bus = Self {
            inner: Arc::new(BusInner {
                queue,
                handler: RwLock::new(None),
            }),
        };
        let dispatcher = CommandDispatcher {
            rx: Mutex::new(Some(rx)),
            bus: bus.clone(),
        };
        (bus, dispatcher)
    }

    /// Binds the handler that commands are routed to.
    pub fn bind_handler(&self, handler: Weak<dyn CommandHandler>) {
        *self.inner.handler.write() = Some(handler);
    }

    fn handler(&self) -> Option<Arc<dyn CommandHandler>> {
        self.inner.handler.read().as_ref().and_then(Weak::upgrade)
    }

    /// Enqueues a command for asynchronous dispatch. Never blocks.
    pub fn submit(&self, target: &str, verb: &str, payload: impl Into<Value>) {
        self.submit_command(Command::new(target, verb, payload));
    }

    /// Enqueues a prepared command. The `blocking` flag is ignored here.
    pub fn submit_command(&self, command: Command) {
        log::debug!("[CommandBus] Queued {}", command);
        if let Err(e) = self.inner.queue.send(command) {
            log::warn!("[CommandBus] Dispatcher gone, dropping {}", e.0);
        }
    }

    /// Runs a command inline and returns its result.
    pub async fn execute(
        &self,
        target: &str,
        verb: &str,
        payload: impl Into<Value>,
    ) -> MonitorResult<()> {
        let mut command = Command::new(target, verb, payload);
        command.blocking = true;
        self.run(command).await
    }

    /// Runs or enqueues a decoded command according to its `blocking` flag.
    pub async fn dispatch(&self, command: Command) -> MonitorResult<()> {
        if command.blocking {
            self.run(command).await
        } else {
            self.submit_command(command);
            Ok(())
        }
    }

    async fn run(&self, command: Command) -> MonitorResult<()> {
        let handler = self
            .handler()
            .ok_or_else(|| MonitorError::Internal("no command handler bound".into()))?;
        handler.handle(command).await
    }
}

/// Drains the command queue onto the worker pool.
pub struct CommandDispatcher {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    bus: CommandBus,
}

impl CommandDispatcher {
    /// Spawns the dispatch loop. Only the first call has any effect.
    ///
    /// The loop sleeps while the queue is empty, waking on every submit or
    /// after [`LOOP_IDLE_TIMEOUT`], and exits when `cancel` fires.
    pub fn start(&self, spawner: TokioSpawner, workers: usize, cancel: CancellationToken) {
        let Some(mut rx) = self.rx.lock().take() else {
            log::warn!("[CommandBus] Dispatcher already started");
            return;
        };
        let bus = self.bus.clone();
        let workers = Arc::new(Semaphore::new(workers.max(1)));
        let loop_spawner = spawner.clone();

        loop_spawner.spawn(async move {
            log::debug!("[CommandBus] Dispatch loop started");
            loop {
                let command = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = tokio::time::timeout(LOOP_IDLE_TIMEOUT, rx.recv()) => match received {
                        Ok(Some(command)) => command,
                        Ok(None) => break,
                        Err(_) => {
                            log::trace!("[CommandBus] Idle wake");
                            continue;
                        }
                    },
                };

                let mut next = Some(command);
                while let Some(command) = next.take() {
                    let permit = tokio::select! {
                        _ = cancel.cancelled() => None,
                        permit = Arc::clone(&workers).acquire_owned() => permit.ok(),
                    };
                    let Some(permit) = permit else {
                        log::debug!("[CommandBus] Dropping {} on shutdown", command);
                        break;
                    };
                    let bus = bus.clone();
                    spawner.spawn(async move {
                        run_worker(&bus, command).await;
                        drop(permit);
                    });
                    next = rx.try_recv().ok();
                }
                if cancel.is_cancelled() {
                    break;
                }
            }
            log::debug!("[CommandBus] Dispatch loop stopped");
        });
    }

    /// Drains queued commands without running them.
    #[cfg(test)]
    pub(crate) fn take_queued(&self) -> Vec<Command> {
        let mut commands = Vec::new();
        if let Some(rx) = self.rx.lock().as_mut() {
            while let Ok(command) = rx.try_recv() {
                commands.push(command);
            }
        }
        commands
    }
}

/// Runs one command, containing errors and panics.
async fn run_worker(bus: &CommandBus, command: Command) {
    let label = command.to_string();
    match AssertUnwindSafe(bus.run(command)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("[CommandBus] {} failed: {}", label, e),
        Err(panic) => log::error!("[CommandBus] {} panicked: {}", label, panic_message(&panic)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Command>>,
    }

    #[async_trait]
    impl CommandHandler for Recorder {
        async fn handle(&self, command: Command) -> MonitorResult<()> {
            match command.verb.as_str() {
                "fail" => Err(MonitorError::CommandFailed("nope".into())),
                "panic" => panic!("handler exploded"),
                _ => {
                    self.seen.lock().push(command);
                    Ok(())
                }
            }
        }
    }

    fn bound() -> (CommandBus, CommandDispatcher, Arc<Recorder>) {
        let (bus, dispatcher) = CommandBus::new();
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn CommandHandler> = recorder.clone();
        bus.bind_handler(Arc::downgrade(&handler));
        // The recorder Arc keeps the handler alive for the test.
        drop(handler);
        (bus, dispatcher, recorder)
    }

    #[tokio::test]
    async fn execute_runs_inline() {
        let (bus, _dispatcher, recorder) = bound();
        bus.execute("power", "poweroff", Value::Null).await.unwrap();
        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].blocking);
    }

    #[tokio::test]
    async fn execute_without_handler_is_an_error() {
        let (bus, _dispatcher) = CommandBus::new();
        let err = bus.execute("player", "play", Value::Null).await.unwrap_err();
        assert_eq!(err.code(), "internal_error");
    }

    #[tokio::test]
    async fn submitted_commands_reach_handler_past_failures() {
        let (bus, dispatcher, recorder) = bound();
        let spawner = TokioSpawner::current();
        let cancel = CancellationToken::new();
        dispatcher.start(spawner.clone(), 4, cancel.clone());

        bus.submit("player", "fail", Value::Null);
        bus.submit("player", "panic", Value::Null);
        bus.submit("player", "volume_set", 40);
        bus.submit("player", "next", Value::Null);

        for _ in 0..100 {
            if recorder.seen.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let verbs: Vec<String> = recorder.seen.lock().iter().map(|c| c.verb.clone()).collect();
        assert_eq!(verbs.len(), 2);
        assert!(verbs.contains(&"volume_set".to_string()));

        cancel.cancel();
        assert!(spawner.drain(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn dispatch_honours_blocking_flag() {
        let (bus, _dispatcher, recorder) = bound();
        let command: Command =
            serde_json::from_value(json!({"target": "player", "verb": "play", "blocking": true}))
                .unwrap();
        bus.dispatch(command).await.unwrap();
        assert_eq!(recorder.seen.lock().len(), 1);

        let queued: Command =
            serde_json::from_value(json!({"target": "player", "verb": "play"})).unwrap();
        bus.dispatch(queued).await.unwrap();
        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[test]
    fn display_includes_payload() {
        assert_eq!(Command::new("player", "next", Value::Null).to_string(), "player next");
        assert_eq!(
            Command::new("player", "volume_set", 30).to_string(),
            "player volume_set (30)"
        );
    }
}
