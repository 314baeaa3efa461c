//! Telemetry wire protocol: JSON request/response envelopes exchanged with
//! dashboard observers.
//!
//! ```text
//! {"packettype":"request","packetid":7,"type":"getdiskinfo"}
//! {"packettype":"response","packetid":7,"time":1700000000,"type":"diskinfo",
//!  "status":"OK","body":{"diskinfo":{...}}}
//! ```
//!
//! Bodies are typed structs serialized through one encoder; field names are
//! what existing dashboards read and must not change.

#![allow(missing_docs)]

use serde::Serialize;
use serde_json::Value;

use crate::churn::engine::{StressStats, StressView, unix_now};
use crate::core::errors::Result;
use crate::monitor::capacity::DiskInfo;

pub const PACKET_REQUEST: &str = "request";
pub const PACKET_RESPONSE: &str = "response";
pub const STATUS_OK: &str = "OK";
/// The value dashboards compare against to detect a failed request.
pub const STATUS_ERROR: &str = "Error";
const ERROR_TYPE: &str = "error";

// ──────────────────── request kinds ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Init,
    DiskInfo,
    FileInfo,
    RuntimeInfo,
    BlockInfo,
    ServerInfo,
    StressInfo,
}

impl RequestKind {
    pub const ALL: [Self; 7] = [
        Self::Init,
        Self::DiskInfo,
        Self::FileInfo,
        Self::RuntimeInfo,
        Self::BlockInfo,
        Self::ServerInfo,
        Self::StressInfo,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.request_name() == name)
    }

    pub const fn request_name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::DiskInfo => "getdiskinfo",
            Self::FileInfo => "getfileinfo",
            Self::RuntimeInfo => "getruntimeinfo",
            Self::BlockInfo => "getblockinfo",
            Self::ServerInfo => "getserverinfo",
            Self::StressInfo => "getstressinfo",
        }
    }

    /// Response `type`: the request name without its `get` prefix.
    pub const fn response_name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::DiskInfo => "diskinfo",
            Self::FileInfo => "fileinfo",
            Self::RuntimeInfo => "runtimeinfo",
            Self::BlockInfo => "blockinfo",
            Self::ServerInfo => "serverinfo",
            Self::StressInfo => "stressinfo",
        }
    }
}

// ──────────────────── bodies ────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    /// Bytes held by occupied slots.
    pub size: u64,
    pub count: usize,
    pub created: u64,
    pub destroyed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSizeInfo {
    pub maxfiles: usize,
    pub maxfilesize: u64,
    /// Same as `maxfiles`; the dashboard sizes its block grid from this field.
    pub maxfilesint: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMapInfo {
    pub map: String,
    pub mapsize: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    pub filemapinfo: FileMapInfo,
}

/// Shared shape of `runtimeinfo` and `serverinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UptimeInfo {
    pub starttime: i64,
    pub currenttime: i64,
    pub updays: i64,
    pub uphours: i64,
    pub upminutes: i64,
    pub upseconds: i64,
}

impl UptimeInfo {
    pub fn between(start: i64, now: i64) -> Self {
        let elapsed = (now - start).max(0);
        Self {
            starttime: start,
            currenttime: now,
            updays: elapsed / 86_400,
            uphours: elapsed % 86_400 / 3_600,
            upminutes: elapsed % 3_600 / 60,
            upseconds: elapsed % 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StressInfo {
    pub size: u64,
    pub count: usize,
    pub created: u64,
    pub destroyed: u64,
    pub failedcreates: u64,
    pub failedremoves: u64,
    pub maxfiles: usize,
    pub maxfilesize: u64,
    pub sleepinterval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitBody {
    pub diskinfo: DiskInfo,
    pub fileinfo: FileInfo,
    pub filesizeinfo: FileSizeInfo,
    pub serverinfo: UptimeInfo,
}

/// Response body; each section is nested under its own name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Init(Box<InitBody>),
    DiskInfo { diskinfo: DiskInfo },
    FileInfo { fileinfo: FileInfo },
    RuntimeInfo { runtimeinfo: UptimeInfo },
    BlockInfo { blockinfo: BlockInfo },
    ServerInfo { serverinfo: UptimeInfo },
    StressInfo { stressinfo: StressInfo },
    Empty {},
}

impl From<&StressStats> for FileInfo {
    fn from(stats: &StressStats) -> Self {
        Self {
            size: stats.occupied_bytes,
            count: stats.occupied,
            created: stats.created,
            destroyed: stats.removed,
        }
    }
}

impl From<&StressStats> for FileSizeInfo {
    fn from(stats: &StressStats) -> Self {
        Self {
            maxfiles: stats.capacity,
            maxfilesize: stats.max_file_size,
            maxfilesint: stats.capacity,
        }
    }
}

impl From<&StressStats> for StressInfo {
    fn from(stats: &StressStats) -> Self {
        Self {
            size: stats.occupied_bytes,
            count: stats.occupied,
            created: stats.created,
            destroyed: stats.removed,
            failedcreates: stats.failed_creates,
            failedremoves: stats.failed_removes,
            maxfiles: stats.capacity,
            maxfilesize: stats.max_file_size,
            sleepinterval: stats.sleep_interval_micros,
        }
    }
}

// ──────────────────── envelope ────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub packettype: &'static str,
    pub packetid: i64,
    pub time: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub body: ResponseBody,
}

impl Envelope {
    pub fn ok(kind: RequestKind, packetid: i64, time: i64, body: ResponseBody) -> Self {
        Self {
            packettype: PACKET_RESPONSE,
            packetid,
            time,
            kind: kind.response_name().to_string(),
            status: STATUS_OK,
            message: None,
            body,
        }
    }

    pub fn error(kind: impl Into<String>, packetid: i64, time: i64, message: String) -> Self {
        Self {
            packettype: PACKET_RESPONSE,
            packetid,
            time,
            kind: kind.into(),
            status: STATUS_ERROR,
            message: Some(message),
            body: ResponseBody::Empty {},
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == STATUS_ERROR
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// What to do with one inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Not a request (e.g. an echoed response); send nothing.
    Ignored,
    Reply(Envelope),
}

// ──────────────────── protocol ────────────────────

/// Stateless request handler over a read-only engine view.
#[derive(Clone)]
pub struct TelemetryProtocol {
    view: StressView,
}

impl TelemetryProtocol {
    pub const fn new(view: StressView) -> Self {
        Self { view }
    }

    pub fn view(&self) -> &StressView {
        &self.view
    }

    /// Parse one inbound frame and build the reply, if any.
    ///
    /// Malformed JSON and unknown types yield an `Error` envelope, never a panic.
    pub fn dispatch(&self, text: &str) -> Dispatch {
        let now = unix_now();
        let request: Value = match serde_json::from_str(text) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => {
                return Dispatch::Reply(Envelope::error(
                    ERROR_TYPE,
                    0,
                    now,
                    "request must be a JSON object".to_string(),
                ));
            }
            Err(e) => {
                return Dispatch::Reply(Envelope::error(
                    ERROR_TYPE,
                    0,
                    now,
                    format!("malformed request: {e}"),
                ));
            }
        };

        if request.get("packettype").and_then(Value::as_str) != Some(PACKET_REQUEST) {
            return Dispatch::Ignored;
        }
        let packetid = request.get("packetid").and_then(Value::as_i64).unwrap_or(0);
        let Some(name) = request.get("type").and_then(Value::as_str) else {
            return Dispatch::Reply(Envelope::error(
                ERROR_TYPE,
                packetid,
                now,
                "request has no type".to_string(),
            ));
        };
        let Some(kind) = RequestKind::parse(name) else {
            return Dispatch::Reply(Envelope::error(
                name,
                packetid,
                now,
                format!("unknown request type '{name}'"),
            ));
        };

        Dispatch::Reply(self.respond(kind, packetid))
    }

    /// Build the OK response for `kind`.
    pub fn respond(&self, kind: RequestKind, packetid: i64) -> Envelope {
        let now = unix_now();
        let body = match kind {
            RequestKind::Init => {
                let stats = self.view.stats();
                ResponseBody::Init(Box::new(InitBody {
                    diskinfo: self.view.disk_info(),
                    fileinfo: FileInfo::from(&stats),
                    filesizeinfo: FileSizeInfo::from(&stats),
                    serverinfo: UptimeInfo::between(stats.start_time, now),
                }))
            }
            RequestKind::DiskInfo => ResponseBody::DiskInfo {
                diskinfo: self.view.disk_info(),
            },
            RequestKind::FileInfo => ResponseBody::FileInfo {
                fileinfo: FileInfo::from(&self.view.stats()),
            },
            RequestKind::RuntimeInfo => ResponseBody::RuntimeInfo {
                runtimeinfo: UptimeInfo::between(self.view.start_time(), now),
            },
            RequestKind::ServerInfo => ResponseBody::ServerInfo {
                serverinfo: UptimeInfo::between(self.view.start_time(), now),
            },
            RequestKind::BlockInfo => {
                let bitmap = self.view.occupancy_bitmap();
                ResponseBody::BlockInfo {
                    blockinfo: BlockInfo {
                        filemapinfo: FileMapInfo {
                            map: bitmap.to_bit_string(),
                            mapsize: bitmap.len(),
                        },
                    },
                }
            }
            RequestKind::StressInfo => ResponseBody::StressInfo {
                stressinfo: StressInfo::from(&self.view.stats()),
            },
        };
        Envelope::ok(kind, packetid, now, body)
    }

    /// Unsolicited `fileinfo` push (packetid 0).
    pub fn broadcast_snapshot(&self) -> Envelope {
        self.respond(RequestKind::FileInfo, 0)
    }
}

// ──────────────────── tests ────────────────────
