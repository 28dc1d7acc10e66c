//! `ledsync` entrypoint: wires the frame source, the processing thread
//! (sampling through ABL, §4.C-§4.H), and the serial I/O thread together,
//! plus the low-rate control plane (config reload, mode switch, tick-driven
//! reconnect back-off) described in §5.

use anyhow::{Context, Result};
use clap::Parser;
use core_events::{Event, EventSourceRegistry, TickEventSource};
use core_pipeline::{Coordinator, SmartFallback};
use core_vision::Frame;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

mod frame_source;

use frame_source::{FrameSource, OwnedFrame, SyntheticFrameSource};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "ledsync", version, about = "Addressable-LED ambient lighting sync")]
struct Args {
    /// Optional configuration file path (overrides discovery of `ledsync.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Serial device path (overrides `[serial].selected_port` and auto-enumeration).
    #[arg(long = "port")]
    pub port: Option<String>,
    /// Run the synthetic frame source instead of a real capture backend.
    #[arg(long = "synthetic")]
    pub synthetic: bool,
}

fn configure_logging() -> Result<Option<WorkerGuard>> {
    let log_dir = Path::new(".");
    let log_path = log_dir.join("ledsync.log");
    if log_path.exists() {
        let _ = std::fs::remove_file(&log_path);
    }

    let file_appender = tracing_appender::rolling::never(log_dir, "ledsync.log");
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .try_init()
    {
        Ok(_) => Ok(Some(guard)),
        Err(_) => Ok(None),
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

fn resolve_port(args: &Args, cfg: &core_config::Config) -> Result<PathBuf> {
    if let Some(port) = &args.port {
        return Ok(PathBuf::from(port));
    }
    if let Some(port) = &cfg.file.serial.selected_port {
        return Ok(PathBuf::from(port));
    }
    core_serial::enumerate::candidates()
        .into_iter()
        .next()
        .context("no serial device found; pass --port or set [serial].selected_port")
}

/// Serial I/O thread body (§5: normal priority, owns the descriptor, one
/// write in flight at a time). Receives Adalight-framed packets from the
/// processing thread, reports errors over the control-plane channel, and
/// implements `smartFallback`'s "retries connection" half (§4.H): on
/// disconnect it drops buffered frames and backs off, reopening the
/// descriptor, rather than giving up the thread entirely.
fn run_serial_thread(
    port_path: PathBuf,
    baud: u32,
    packet_rx: crossbeam_channel::Receiver<Vec<u8>>,
    control_tx: mpsc::Sender<Event>,
) {
    let mut backoff = Duration::from_millis(250);
    const MAX_BACKOFF: Duration = Duration::from_secs(5);

    'reconnect: loop {
        let mut connection = loop {
            match core_serial::open(&port_path.to_string_lossy(), baud) {
                Ok(conn) => break conn,
                Err(e) => {
                    error!(target: "serial", path = %port_path.display(), error = %e, "open_failed");
                    match packet_rx.recv_timeout(backoff) {
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
                        _ => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        };
        backoff = Duration::from_millis(250);

        let disconnected = Arc::new(AtomicBool::new(false));
        let disconnected_cb = disconnected.clone();
        let disconnect_tx = control_tx.clone();
        connection.set_on_disconnect(move || {
            disconnected_cb.store(true, Ordering::SeqCst);
            let _ = disconnect_tx.blocking_send(Event::Disconnected);
        });

        info!(target: "serial", path = %port_path.display(), baud, "serial_thread_connected");
        let _ = control_tx.blocking_send(Event::Reconnected);

        loop {
            let packet = match packet_rx.recv() {
                Ok(packet) => packet,
                Err(_) => {
                    info!(target: "serial", "serial_thread_stopped");
                    return;
                }
            };
            if let Err(e) = connection.send(&packet) {
                warn!(target: "serial", error = %e, "send_failed");
            }
            if disconnected.load(Ordering::SeqCst) {
                continue 'reconnect;
            }
        }
    }
}

/// Processing thread body (§5: high priority, sole mutator of zone/spring
/// state). Pulls frames from the source, runs §4.C-§4.H, and hands the
/// Adalight-framed packet off to the serial thread.
fn run_processing_thread(
    mut coordinator: Coordinator,
    mut source: Box<dyn FrameSource>,
    target_fps: f32,
    packet_tx: crossbeam_channel::Sender<Vec<u8>>,
    control_rx: std::sync::mpsc::Receiver<core_events::Event>,
) {
    let mut last_frame = Instant::now();
    let mut fallback = SmartFallback::new();

    loop {
        while let Ok(event) = control_rx.try_recv() {
            match event {
                Event::Shutdown => {
                    let off = vec![[0u8; 3]; coordinator.zone_count()];
                    let _ = packet_tx.send(core_output::frame_packet(&off));
                    info!(target: "pipeline", "shutdown_all_off_sent");
                    return;
                }
                Event::Disconnected => fallback.on_serial_error(Instant::now()),
                Event::Reconnected => fallback.on_reconnected(),
                other => {
                    if let Err(e) = coordinator.handle_event(&other, None) {
                        error!(target: "pipeline", error = %e, "event_handling_failed");
                    }
                }
            }
        }

        let Some(OwnedFrame {
            data,
            width,
            height,
            bytes_per_row,
        }) = source.next_frame()
        else {
            info!(target: "pipeline", "frame_source_exhausted");
            return;
        };

        let frame = Frame {
            data: &data,
            width,
            height,
            bytes_per_row,
        };

        let now = Instant::now();
        let dt = now.duration_since(last_frame).as_secs_f64().clamp(0.001, 0.1);
        last_frame = now;

        let sequence = coordinator.process_frame(&frame, dt);
        if coordinator.is_power_limited() {
            tracing::debug!(target: "pipeline", "power_limited_frame");
        }
        let packet = core_output::frame_packet(&sequence);
        if packet_tx.send(packet).is_err() {
            warn!(target: "pipeline", "serial_thread_gone");
            return;
        }

        let effective_fps = target_fps.min(fallback.current_fps()).max(1.0);
        let budget = Duration::from_secs_f32(1.0 / effective_fps);
        let elapsed = now.elapsed();
        if elapsed < budget {
            std::thread::sleep(budget - elapsed);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = configure_logging()?;
    install_panic_hook();

    info!(target: "runtime", "startup");

    let cfg = core_config::load_from(args.config.clone())?;
    let bundle = cfg.bundle().context("invalid configuration")?;
    let port_path = resolve_port(&args, &cfg)?;

    let rect = core_geometry::CaptureRect {
        x: 0.0,
        y: 0.0,
        width: 1920.0,
        height: 1080.0,
    };
    let coordinator = Coordinator::new(bundle, rect)?;

    let source: Box<dyn FrameSource> = Box::new(SyntheticFrameSource::new(1920, 1080));
    if !args.synthetic {
        warn!(target: "runtime", "no platform capture backend wired; falling back to synthetic source");
    }

    let (packet_tx, packet_rx) = crossbeam_channel::bounded::<Vec<u8>>(2);
    let (control_tx, mut control_rx_async) = mpsc::channel::<Event>(core_events::EVENT_CHANNEL_CAP);
    let (control_tx_sync, control_rx_sync) = std::sync::mpsc::channel::<Event>();

    let mut registry = EventSourceRegistry::new();
    registry.register(TickEventSource::new(Duration::from_millis(250)));
    let source_handles = registry.spawn_all(&control_tx);

    let bridge = tokio::spawn(async move {
        while let Some(event) = control_rx_async.recv().await {
            if control_tx_sync.send(event).is_err() {
                break;
            }
        }
    });

    let baud = {
        let bundle_for_serial = cfg.bundle().context("invalid configuration")?;
        bundle_for_serial.baud_rate
    };
    let serial_control_tx = control_tx.clone();
    let serial_handle = std::thread::spawn(move || {
        run_serial_thread(port_path, baud, packet_rx, serial_control_tx);
    });

    let target_fps = cfg.bundle().context("invalid configuration")?.target_frame_rate;
    let processing_handle = std::thread::spawn(move || {
        run_processing_thread(coordinator, source, target_fps, packet_tx, control_rx_sync);
    });

    let ctrl_c_tx = control_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_tx.send(Event::Shutdown).await;
        }
    });

    let _ = processing_handle.join();
    let _ = serial_handle.join();
    drop(control_tx);
    bridge.abort();
    for handle in source_handles {
        handle.abort();
    }

    info!(target: "runtime", "shutdown_complete");
    Ok(())
}
