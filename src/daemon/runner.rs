//! Service orchestration: start-up order, worker threads, shutdown sequence.
//!
//! Threads:
//! - **dch-churn**: the churn engine tick loop (sole writer of the slot pool)
//! - **dch-ws**: WebSocket accept loop, plus one `dch-ws-N` thread per observer
//! - **dch-http**: dashboard static file server
//! - **dch-console**: interactive console (optional, never joined)
//! - **dch-logger**: JSONL activity writer
//!
//! Everything that can fail fatally (capacity probe, directory lock, listener
//! binds) happens in `ChurnService::new`, before any worker thread starts.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::churn::engine::{ChurnEngine, ChurnSettings, StressView};
use crate::console::Console;
use crate::core::config::Config;
use crate::core::errors::{ChurnError, Result};
use crate::daemon::signals::SignalHandler;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
use crate::logger::jsonl::JsonlConfig;
use crate::monitor::capacity::CapacityMonitor;
use crate::platform::pal::{Platform, detect_platform};
use crate::telemetry::protocol::TelemetryProtocol;
use crate::telemetry::server::TelemetryServer;
use crate::telemetry::static_files::{StaticServer, advertised_address, write_websocket_info};

const MAIN_POLL: Duration = Duration::from_millis(100);

pub struct ChurnService {
    config: Config,
    signal_handler: SignalHandler,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<JoinHandle<()>>,
    engine: ChurnEngine,
    view: StressView,
    ws_server: TelemetryServer,
    http_server: StaticServer,
    start_time: Instant,
}

impl ChurnService {
    /// Build every component using the host platform.
    pub fn new(config: Config, signal_handler: SignalHandler) -> Result<Self> {
        Self::with_platform(config, signal_handler, detect_platform()?)
    }

    pub fn with_platform(
        config: Config,
        signal_handler: SignalHandler,
        platform: Arc<dyn Platform>,
    ) -> Result<Self> {
        let start_time = Instant::now();

        // 1. Activity logger.
        let (logger_handle, logger_join) =
            spawn_logger(JsonlConfig::for_path(&config.paths.activity_log))?;

        // 2. Capacity probe of the churn directory; unreachable storage is fatal.
        let directory = &config.churn.directory;
        fs::create_dir_all(directory).map_err(|e| ChurnError::io(directory, e))?;
        let monitor = Arc::new(CapacityMonitor::new(platform, directory)?);

        // 3. Engine: lock + clean the directory, size the pool.
        let mut engine = ChurnEngine::new(
            ChurnSettings::from(&config.churn),
            monitor,
            logger_handle.clone(),
        );
        engine.start()?;
        let view = engine.view();

        // 4. Telemetry listener.
        let protocol = TelemetryProtocol::new(view.clone());
        let ws_server = TelemetryServer::bind(&config.telemetry, protocol, logger_handle.clone())?;
        let ws_port = ws_server.local_addr()?.port();

        // 5. Dashboard: point it at the live WebSocket port, then bind.
        let advertised = advertised_address(&config.telemetry.bind_address);
        match write_websocket_info(&config.telemetry.www_dir, &advertised, ws_port) {
            Ok(path) => eprintln!(
                "[DCH-HTTP] dashboard will connect to ws://{advertised}:{ws_port} ({})",
                path.display()
            ),
            Err(e) => eprintln!("[DCH-HTTP] could not write websocket info: {e}"),
        }
        let http_server = StaticServer::bind(&config.telemetry)?;

        Ok(Self {
            config,
            signal_handler,
            logger_handle,
            logger_join: Some(logger_join),
            engine,
            view,
            ws_server,
            http_server,
            start_time,
        })
    }

    pub fn view(&self) -> StressView {
        self.view.clone()
    }

    pub fn websocket_addr(&self) -> Result<SocketAddr> {
        self.ws_server.local_addr()
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_server.local_addr()
    }

    /// Run until shutdown is requested (signal, console `quit` or a fatal worker error).
    pub fn run(mut self, with_console: bool) -> Result<()> {
        let config_hash = self.config.stable_hash().unwrap_or_default();
        self.logger_handle.send(ActivityEvent::ServerStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
            directory: self.config.churn.directory.display().to_string(),
        });
        if let Ok(addr) = self.ws_server.local_addr() {
            eprintln!("[DCH-RUN] telemetry on ws://{addr}");
        }
        if let Some(addr) = self.http_server.local_addr() {
            eprintln!("[DCH-RUN] dashboard on http://{addr}");
        }

        let ws_registry = self.ws_server.registry();
        let shutdown = self.signal_handler.clone();

        let churn_join = spawn_named("dch-churn", {
            let mut engine = self.engine;
            let shutdown = shutdown.clone();
            let logger = self.logger_handle.clone();
            move || {
                if let Err(e) = engine.run(&shutdown) {
                    eprintln!("[DCH-CHURN] churn loop stopped: {e}");
                    logger.send(ActivityEvent::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                    shutdown.request_shutdown();
                }
            }
        })?;
        let ws_join = spawn_named("dch-ws", {
            let server = self.ws_server;
            let shutdown = shutdown.clone();
            move || server.run(&shutdown)
        })?;
        let http_join = spawn_named("dch-http", {
            let server = self.http_server;
            let shutdown = shutdown.clone();
            move || server.run(&shutdown)
        })?;

        if with_console {
            let console = Console::new(self.view.clone(), shutdown.clone(), Some(ws_registry));
            // Blocked on stdin at shutdown, so it is detached rather than joined.
            let _detached = spawn_named("dch-console", move || {
                if let Err(e) = console.run(io::stdin().lock(), io::stdout()) {
                    eprintln!("[DCH-RUN] console stopped: {e}");
                }
            })?;
        }

        while !shutdown.should_shutdown() {
            thread::sleep(MAIN_POLL);
        }
        eprintln!("[DCH-RUN] shutdown requested");

        for (name, join) in [("churn", churn_join), ("ws", ws_join), ("http", http_join)] {
            if join.join().is_err() {
                eprintln!("[DCH-RUN] {name} thread panicked");
            }
        }

        let uptime_secs = self.start_time.elapsed().as_secs();
        let stats = self.view.stats();
        self.logger_handle.send(ActivityEvent::ServerStopped {
            reason: "clean shutdown".to_string(),
            uptime_secs,
            created: stats.created,
            removed: stats.removed,
        });
        self.logger_handle.shutdown();
        if let Some(logger_join) = self.logger_join.take() {
            let _ = logger_join.join();
        }

        eprintln!(
            "[DCH-RUN] shutdown complete (uptime={uptime_secs}s created={} removed={})",
            stats.created, stats.removed
        );
        Ok(())
    }
}

fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| ChurnError::Runtime {
            details: format!("failed to spawn {name} thread: {source}"),
        })
}
