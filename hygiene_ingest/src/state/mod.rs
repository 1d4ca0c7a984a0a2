//! # Host Scan State
//!
//! A host moves through the scan pipeline as a (stage, status) pair:
//! discovery (`NetScan1`, then `NetScan2` for hosts that looked down), port
//! scan, then vulnerability scan. `BaseScan` is a single-stage pipeline.
//! Status tracks scheduling within a stage; `Done` is terminal.

use hygiene_core::log_success;
use hygiene_core::logging::codes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    BaseScan,
    NetScan1,
    NetScan2,
    PortScan,
    VulnScan,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::BaseScan,
        Stage::NetScan1,
        Stage::NetScan2,
        Stage::PortScan,
        Stage::VulnScan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::BaseScan => "BASESCAN",
            Stage::NetScan1 => "NETSCAN1",
            Stage::NetScan2 => "NETSCAN2",
            Stage::PortScan => "PORTSCAN",
            Stage::VulnScan => "VULNSCAN",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Done,
    Ready,
    Running,
    Waiting,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Done, Status::Ready, Status::Running, Status::Waiting];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Done => "DONE",
            Status::Ready => "READY",
            Status::Running => "RUNNING",
            Status::Waiting => "WAITING",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostState {
    pub ip: Ipv4Addr,
    pub owner: String,
    pub stage: Stage,
    pub status: Status,
}

impl HostState {
    pub fn new(ip: Ipv4Addr, owner: impl Into<String>, stage: Stage, status: Status) -> Self {
        Self {
            ip,
            owner: owner.into(),
            stage,
            status,
        }
    }
}

/// Scan results that drive a transition; absent signals count as false
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionSignal {
    pub up: Option<bool>,
    pub has_open_ports: Option<bool>,
    pub was_failure: bool,
}

impl TransitionSignal {
    pub fn up(up: bool) -> Self {
        Self {
            up: Some(up),
            ..Default::default()
        }
    }

    pub fn open_ports(has_open_ports: bool) -> Self {
        Self {
            has_open_ports: Some(has_open_ports),
            ..Default::default()
        }
    }

    pub fn failure() -> Self {
        Self {
            was_failure: true,
            ..Default::default()
        }
    }
}

/// Computed next state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub stage: Stage,
    pub status: Status,
    pub changed: bool,
    pub finished_stage: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub changed: bool,
    pub finished_stage: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HostStateManager;

impl HostStateManager {
    pub fn new() -> Self {
        Self
    }

    pub fn new_state(&self, stage: Stage, status: Status, signal: &TransitionSignal) -> Transition {
        let next = |stage, status, changed, finished_stage| Transition {
            stage,
            status,
            changed,
            finished_stage,
        };

        if status == Status::Done {
            return next(stage, status, false, false);
        }

        if signal.was_failure {
            return next(stage, Status::Waiting, status != Status::Waiting, false);
        }

        if matches!(status, Status::Waiting | Status::Ready) {
            return next(stage, Status::Running, true, false);
        }

        let up = signal.up.unwrap_or(false);
        let has_open_ports = signal.has_open_ports.unwrap_or(false);

        match stage {
            Stage::NetScan1 if up => next(Stage::PortScan, Status::Waiting, true, true),
            Stage::NetScan1 => next(Stage::NetScan2, Status::Waiting, true, true),
            Stage::NetScan2 if up => next(Stage::PortScan, Status::Waiting, true, true),
            Stage::NetScan2 => next(Stage::NetScan2, Status::Done, true, true),
            Stage::PortScan if has_open_ports => next(Stage::VulnScan, Status::Waiting, true, true),
            Stage::PortScan => next(Stage::PortScan, Status::Done, true, true),
            Stage::VulnScan | Stage::BaseScan => next(stage, Status::Done, true, true),
        }
    }

    /// Apply the transition for `signal` to `host`
    pub fn transition(&self, host: &mut HostState, signal: &TransitionSignal) -> TransitionOutcome {
        let transition = self.new_state(host.stage, host.status, signal);

        if transition.changed {
            log_success!(
                codes::success::HOST_STATE_CHANGED,
                "Host state changed",
                "ip" => host.ip,
                "from" => format!("{}/{}", host.stage, host.status),
                "to" => format!("{}/{}", transition.stage, transition.status)
            );
            host.stage = transition.stage;
            host.status = transition.status;
        }

        TransitionOutcome {
            changed: transition.changed,
            finished_stage: transition.finished_stage,
        }
    }
}
