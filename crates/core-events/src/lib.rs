//! Control-plane event types and channel helpers for ledsync.
//!
//! The high-rate frame path (§5 of the design) never touches this channel —
//! frames move between the processing thread and the serial thread over a
//! dedicated bounded `crossbeam-channel` in `core-pipeline`. This crate only
//! carries the low-rate control plane: config reloads, mode switches,
//! disconnect notifications, and periodic ticks used to drive smart-fallback
//! back-off retries.

use std::fmt;
use std::sync::atomic::AtomicU64;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

/// Capacity of the control-plane event channel. Control events are rare
/// (human/config speed, not frame speed) so a small bound is sufficient;
/// it exists purely to bound memory, not to apply backpressure.
pub const EVENT_CHANNEL_CAP: usize = 256;

/// Count of events dropped because the channel was closed (no live consumer).
pub static CHANNEL_SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
/// Count of `Event::Disconnected` notifications observed this process.
pub static DISCONNECT_EVENTS: AtomicU64 = AtomicU64::new(0);
/// Count of `Event::Tick` events emitted (back-off scheduling heartbeat).
pub static TICK_EVENTS: AtomicU64 = AtomicU64::new(0);

/// Top-level control-plane event consumed by the pipeline coordinator.
#[derive(Debug, Clone)]
pub enum Event {
    /// The persisted or CLI-provided configuration bundle changed; the
    /// coordinator must restart affected subsystems (§4.J).
    ConfigChanged,
    /// A mode switch was requested (`sync`, `effect`, `music`, `manual`).
    ModeChanged(Mode),
    /// The serial transport closed its descriptor after a fatal write error.
    Disconnected,
    /// The serial transport re-established a connection after back-off.
    Reconnected,
    /// Periodic monotonic tick driving back-off scheduling and idle checks.
    Tick,
    /// Graceful shutdown request.
    Shutdown,
}

/// Pipeline operating mode (§4.J). Only `Sync` is implemented by this core;
/// the others feed the same output pipeline from an external generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Sync,
    Effect,
    Music,
    Manual,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Sync => write!(f, "sync"),
            Mode::Effect => write!(f, "effect"),
            Mode::Music => write!(f, "music"),
            Mode::Manual => write!(f, "manual"),
        }
    }
}

/// Trait implemented by any async event producer. Implementors usually hold
/// configuration and spawn one background task that pushes `Event`s into the
/// shared channel. Minimal surface (spawn + name) to keep integration
/// friction low; each source is independent and failure-isolated.
pub trait AsyncEventSource: Send + 'static {
    /// Human-readable stable identifier (used for logging/diagnostics).
    fn name(&self) -> &'static str;
    /// Consume self and spawn the background task, returning a `JoinHandle`.
    /// Implementors must stop when `tx.send(..).await` returns `Err` (channel
    /// closed) and must avoid busy loops.
    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()>;
}

/// Built-in monotonic tick source. Emits `Event::Tick` on a fixed interval;
/// the coordinator uses ticks to drive `smartFallback` reconnect back-off.
pub struct TickEventSource {
    interval: std::time::Duration,
}

impl TickEventSource {
    pub fn new(interval: std::time::Duration) -> Self {
        Self { interval }
    }
}

impl AsyncEventSource for TickEventSource {
    fn name(&self) -> &'static str {
        "tick"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let dur = self.interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(dur);
            loop {
                interval.tick().await;
                TICK_EVENTS.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if tx.send(Event::Tick).await.is_err() {
                    break;
                }
            }
        })
    }
}

/// Registry of event sources, spawned together at coordinator startup.
pub struct EventSourceRegistry {
    sources: Vec<Box<dyn AsyncEventSource>>,
}

impl Default for EventSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn register<S: AsyncEventSource>(&mut self, source: S) {
        self.sources.push(Box::new(source));
    }

    pub fn spawn_all(self, tx: &Sender<Event>) -> Vec<JoinHandle<()>> {
        self.sources
            .into_iter()
            .map(|source| {
                tracing::debug!(target: "events", source = source.name(), "spawning event source");
                source.spawn(tx.clone())
            })
            .collect()
    }
}

/// Helper result type for channel creation.
pub type EventResult<T> = anyhow::Result<T>;
