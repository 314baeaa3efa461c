//! Interactive operator console: reads commands from stdin and prints
//! read-only views of the running churn.
//!
//! Commands are case-insensitive; arguments may be single- or double-quoted.

#![allow(missing_docs)]

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use colored::Colorize;

use crate::churn::engine::{StressView, slot_file_name, unix_now};
use crate::churn::slot_pool::{BITMAP_WORD_BITS, OccupancyBitmap};
use crate::daemon::signals::SignalHandler;
use crate::monitor::capacity::group_thousands;
use crate::telemetry::protocol::UptimeInfo;
use crate::telemetry::server::ObserverRegistry;

const PROMPT: &str = "dchurn> ";

// ──────────────────── commands ────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Disk,
    File,
    FileList,
    Map,
    Stats,
    Quit,
    Empty,
    Unknown(String),
}

/// Split a line on whitespace, keeping quoted runs together.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for ch in line.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                in_token = true;
            }
            None if ch.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(ch);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

pub fn parse_command(line: &str) -> Command {
    let tokens: Vec<String> = tokenize(line)
        .into_iter()
        .map(|t| t.to_lowercase())
        .collect();
    let words: Vec<&str> = tokens.iter().map(String::as_str).collect();
    match words.as_slice() {
        [] => Command::Empty,
        ["help" | "?"] => Command::Help,
        ["disk"] => Command::Disk,
        ["file"] => Command::File,
        ["file", "list"] => Command::FileList,
        ["map"] => Command::Map,
        ["stats"] => Command::Stats,
        ["quit" | "exit"] => Command::Quit,
        _ => Command::Unknown(line.trim().to_string()),
    }
}

// ──────────────────── rendering ────────────────────

/// Occupancy as `@` (occupied) and `.` (empty), 64 slots per row, each row
/// prefixed with its first slot index.
pub fn render_map(bitmap: &OccupancyBitmap) -> String {
    let mut out = String::new();
    for row_start in (0..bitmap.len()).step_by(BITMAP_WORD_BITS) {
        let row_end = (row_start + BITMAP_WORD_BITS).min(bitmap.len());
        out.push_str(&format!("{row_start:7} : "));
        out.extend((row_start..row_end).map(|i| if bitmap.get(i) { '@' } else { '.' }));
        out.push('\n');
    }
    out
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map_or_else(|| secs.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

// ──────────────────── console ────────────────────

pub struct Console {
    view: StressView,
    shutdown: SignalHandler,
    observers: Option<Arc<ObserverRegistry>>,
}

impl Console {
    pub fn new(
        view: StressView,
        shutdown: SignalHandler,
        observers: Option<Arc<ObserverRegistry>>,
    ) -> Self {
        Self {
            view,
            shutdown,
            observers,
        }
    }

    /// Read commands until `quit`, end of input or shutdown.
    pub fn run(&self, input: impl BufRead, mut out: impl Write) -> io::Result<()> {
        write!(out, "{PROMPT}")?;
        out.flush()?;
        for line in input.lines() {
            if self.shutdown.should_shutdown() {
                break;
            }
            let command = parse_command(&line?);
            if !self.execute(&command, &mut out)? {
                break;
            }
            write!(out, "{PROMPT}")?;
            out.flush()?;
        }
        Ok(())
    }

    /// Run one command. Returns `false` once the console should stop.
    pub fn execute(&self, command: &Command, out: &mut impl Write) -> io::Result<bool> {
        match command {
            Command::Empty => {}
            Command::Help => self.help(out)?,
            Command::Disk => self.disk(out)?,
            Command::File => self.file_summary(out)?,
            Command::FileList => self.file_list(out)?,
            Command::Map => write!(out, "{}", render_map(&self.view.occupancy_bitmap()))?,
            Command::Stats => self.stats(out)?,
            Command::Quit => {
                writeln!(out, "shutting down")?;
                self.shutdown.request_shutdown();
                return Ok(false);
            }
            Command::Unknown(text) => {
                writeln!(out, "{} {text}", "unknown command:".red())?;
                writeln!(out, "type 'help' for a list of commands")?;
            }
        }
        Ok(true)
    }

    #[allow(clippy::unused_self)]
    fn help(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "{}", "commands".bold())?;
        for (name, text) in [
            ("help", "show this list"),
            ("disk", "capacity of the volume under stress"),
            ("file", "number and size of churn files"),
            ("file list", "every churn file with size and timestamp"),
            ("map", "slot occupancy, @ = file present"),
            ("stats", "churn counters and uptime"),
            ("quit", "stop churning and exit"),
        ] {
            writeln!(out, "  {:<10} {text}", name.cyan())?;
        }
        Ok(())
    }

    fn disk(&self, out: &mut impl Write) -> io::Result<()> {
        let snap = self.view.capacity();
        writeln!(
            out,
            "{} {} ({})",
            "volume".bold(),
            snap.mount_point.display(),
            snap.fs_type
        )?;
        writeln!(out, "  {:<8} {:>26} {:>26} {:>26}", "", "total", "free", "used")?;
        for (label, total, free, used) in [
            ("bytes", snap.total_bytes, snap.free_bytes, snap.used_bytes()),
            ("blocks", snap.total_blocks, snap.free_blocks, snap.used_blocks()),
            ("inodes", snap.total_inodes, snap.free_inodes, snap.used_inodes()),
        ] {
            writeln!(
                out,
                "  {label:<8} {:>26} {:>26} {:>26}",
                group_thousands(total),
                group_thousands(free),
                group_thousands(used)
            )?;
        }
        writeln!(out, "  block size {}", group_thousands(snap.block_size))
    }

    fn file_summary(&self, out: &mut impl Write) -> io::Result<()> {
        let stats = self.view.stats();
        writeln!(
            out,
            "{} of {} slots occupied, {} bytes",
            group_thousands(stats.occupied as u64),
            group_thousands(stats.capacity as u64),
            group_thousands(stats.occupied_bytes)
        )
    }

    fn file_list(&self, out: &mut impl Write) -> io::Result<()> {
        let slots = self.view.occupied_slots();
        if slots.is_empty() {
            return writeln!(out, "no churn files present");
        }
        for slot in &slots {
            writeln!(
                out,
                "{:>8}  {}  {:>14}  {}",
                slot.index,
                slot_file_name(slot.index),
                group_thousands(slot.size),
                format_timestamp(slot.last_change)
            )?;
        }
        writeln!(out, "{} files", slots.len())
    }

    fn stats(&self, out: &mut impl Write) -> io::Result<()> {
        let stats = self.view.stats();
        let uptime = UptimeInfo::between(stats.start_time, unix_now());
        writeln!(out, "{}", "churn".bold())?;
        writeln!(out, "  directory       {}", self.view.directory().display())?;
        writeln!(out, "  slots           {}", group_thousands(stats.capacity as u64))?;
        writeln!(out, "  file size       {}", group_thousands(stats.max_file_size))?;
        writeln!(out, "  sleep (us)      {}", group_thousands(stats.sleep_interval_micros))?;
        writeln!(out, "  created         {}", group_thousands(stats.created))?;
        writeln!(out, "  removed         {}", group_thousands(stats.removed))?;
        writeln!(out, "  failed creates  {}", group_thousands(stats.failed_creates))?;
        writeln!(out, "  failed removes  {}", group_thousands(stats.failed_removes))?;
        writeln!(out, "  started         {}", format_timestamp(stats.start_time))?;
        writeln!(
            out,
            "  uptime          {}d {:02}:{:02}:{:02}",
            uptime.updays, uptime.uphours, uptime.upminutes, uptime.upseconds
        )?;
        if let Some(observers) = &self.observers {
            writeln!(out, "  observers       {}", observers.len())?;
        }
        Ok(())
    }
}

// ──────────────────── tests ────────────────────
