#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use disk_churn::churn::engine::{ChurnEngine, ChurnSettings};
use disk_churn::logger::activity::ActivityLoggerHandle;
use disk_churn::monitor::capacity::CapacityMonitor;
use disk_churn::platform::pal::MockPlatform;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_dchurn") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "dchurn.exe" } else { "dchurn" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve dchurn binary path for integration test"),
    }
}

/// Run the binary with `args`, keeping a transcript under the temp dir.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("dchurn-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute dchurn command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let log_content = format!(
        "case={case_name}\nbin={}\nargs={args:?}\nstatus={}\n----- stdout -----\n{stdout}\n----- stderr -----\n{stderr}\n",
        bin_path.display(),
        output.status,
    );
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// A started engine over `dir` with a mocked filesystem reporting `free_bytes`.
pub fn started_engine(
    dir: &Path,
    free_bytes: u64,
    max_file_size: u64,
    slots: Option<usize>,
    seed: u64,
) -> ChurnEngine {
    let platform = Arc::new(MockPlatform::with_free_bytes(free_bytes * 4, free_bytes));
    let monitor = Arc::new(CapacityMonitor::new(platform, dir).expect("capacity probe"));
    let mut engine = ChurnEngine::new(
        ChurnSettings {
            directory: dir.to_path_buf(),
            max_file_size,
            slot_count_override: slots,
            sleep_interval_micros: 1_000,
            seed: Some(seed),
            ..ChurnSettings::default()
        },
        monitor,
        ActivityLoggerHandle::detached(),
    );
    engine.start().expect("engine start");
    engine
}
