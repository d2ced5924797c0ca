//! Mode controller for GivEnergy Local
//!
//! Validates user-facing mode requests, fills in "leave unchanged" fields
//! from the latest snapshot and executes the resulting write plan one
//! register at a time. A failing write aborts the plan; completed writes are
//! reported and never rolled back. Once a plan has touched the device the
//! coordinator is asked for an immediate refresh.

use crate::codec::TimeSlot;
use crate::coordinator::{Coordinator, PollStatus};
use crate::error::ControlError;
use crate::logging::{StructuredLogger, get_logger};
use crate::model::plan::check_charge_target;
use crate::model::{
    DeviceSnapshot, ResolvedMode, SettingCommand, WritePlan, WriteStep, plan_for,
};
use crate::planner::RequestPlanner;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// A field that is either given explicitly or left as the device has it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settable<T> {
    Explicit(T),
    UseExisting,
}

impl<T> Default for Settable<T> {
    fn default() -> Self {
        Settable::UseExisting
    }
}

impl<T> Settable<T> {
    pub fn explicit(&self) -> Option<&T> {
        match self {
            Settable::Explicit(v) => Some(v),
            Settable::UseExisting => None,
        }
    }
}

impl<T> From<Option<T>> for Settable<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Settable::Explicit(v),
            None => Settable::UseExisting,
        }
    }
}

/// Start and end as (hour, minute); the end may be earlier than the start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: (u32, u32),
    pub end: (u32, u32),
}

fn parse_time(text: &str) -> Result<(u32, u32), ControlError> {
    let invalid = || ControlError::InvalidWindow {
        message: format!("{:?} is not a HH:MM time", text),
    };
    let mut parts = text.trim().split(':');
    let hour = parts.next().ok_or_else(invalid)?;
    let minute = parts.next().ok_or_else(invalid)?;
    // Seconds are accepted and ignored
    if let Some(seconds) = parts.next()
        && seconds.parse::<u32>().is_err()
    {
        return Err(invalid());
    }
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok((
        hour.parse().map_err(|_| invalid())?,
        minute.parse().map_err(|_| invalid())?,
    ))
}

impl TimeWindow {
    pub fn new(start: (u32, u32), end: (u32, u32)) -> Self {
        Self { start, end }
    }

    /// Parse `HH:MM` (or `HH:MM:SS`) start and end times
    pub fn parse(start: &str, end: &str) -> Result<Self, ControlError> {
        Ok(Self {
            start: parse_time(start)?,
            end: parse_time(end)?,
        })
    }

    /// Check the hour/minute ranges and convert to a slot
    pub fn validate(&self) -> Result<TimeSlot, ControlError> {
        for (label, (hour, minute)) in [("start", self.start), ("end", self.end)] {
            if hour > 23 || minute > 59 {
                return Err(ControlError::InvalidWindow {
                    message: format!("{} time {:02}:{:02} is out of range", label, hour, minute),
                });
            }
        }
        TimeSlot::from_hm(self.start, self.end).ok_or_else(|| ControlError::InvalidWindow {
            message: "window is out of range".to_string(),
        })
    }
}

impl From<TimeSlot> for TimeWindow {
    fn from(slot: TimeSlot) -> Self {
        use chrono::Timelike;
        Self {
            start: (slot.start.hour(), slot.start.minute()),
            end: (slot.end.hour(), slot.end.minute()),
        }
    }
}

/// User-facing operating modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeRequest {
    EcoMode,
    TimedDischarge {
        window: TimeWindow,
    },
    TimedExport {
        window: TimeWindow,
    },
    TimedCharge {
        window: Settable<TimeWindow>,
        charge_target: Settable<u16>,
    },
    DisableTimedCharge,
}

impl fmt::Display for ModeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModeRequest::EcoMode => "eco",
            ModeRequest::TimedDischarge { .. } => "timed discharge",
            ModeRequest::TimedExport { .. } => "timed export",
            ModeRequest::TimedCharge { .. } => "timed charge",
            ModeRequest::DisableTimedCharge => "disable timed charge",
        };
        write!(f, "{}", name)
    }
}

/// Structured service invocation from the host platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCall {
    pub service: String,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_target: Option<u16>,
}

impl ServiceCall {
    fn window(&self) -> Result<Option<TimeWindow>, ControlError> {
        match (&self.start_time, &self.end_time) {
            (Some(start), Some(end)) => TimeWindow::parse(start, end).map(Some),
            (None, None) => Ok(None),
            _ => Err(ControlError::InvalidWindow {
                message: "start_time and end_time must be given together".to_string(),
            }),
        }
    }

    fn required_window(&self) -> Result<TimeWindow, ControlError> {
        self.window()?.ok_or_else(|| ControlError::InvalidWindow {
            message: format!("{} requires start_time and end_time", self.service),
        })
    }

    /// Map the service name and arguments onto a mode request
    pub fn to_mode_request(&self) -> Result<ModeRequest, ControlError> {
        match self.service.as_str() {
            "activate_mode_eco" => Ok(ModeRequest::EcoMode),
            "activate_mode_timed_discharge" => Ok(ModeRequest::TimedDischarge {
                window: self.required_window()?,
            }),
            "activate_mode_timed_export" => Ok(ModeRequest::TimedExport {
                window: self.required_window()?,
            }),
            "enable_timed_charge" => Ok(ModeRequest::TimedCharge {
                window: self.window()?.into(),
                charge_target: self.charge_target.into(),
            }),
            "disable_timed_charge" => Ok(ModeRequest::DisableTimedCharge),
            other => Err(ControlError::InvalidSetting {
                setting: "service".to_string(),
                message: format!("unknown service {:?}", other),
            }),
        }
    }
}

/// Outcome of a fully executed plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub steps: Vec<WriteStep>,
}

/// Turns mode requests and setting commands into register writes
pub struct ModeController {
    planner: RequestPlanner,
    status: watch::Receiver<Arc<PollStatus>>,
    refresh: Option<mpsc::UnboundedSender<()>>,
    logger: StructuredLogger,
}

impl ModeController {
    pub fn new(planner: RequestPlanner, status: watch::Receiver<Arc<PollStatus>>) -> Self {
        Self {
            planner,
            status,
            refresh: None,
            logger: get_logger("controls"),
        }
    }

    /// Controller sharing the coordinator's transport, snapshot and refresh trigger
    pub fn for_coordinator(coordinator: &Coordinator) -> Self {
        Self::new(coordinator.planner().clone(), coordinator.subscribe())
            .with_refresh(coordinator.refresh_handle())
    }

    /// Signal `refresh` after every executed plan
    pub fn with_refresh(mut self, refresh: mpsc::UnboundedSender<()>) -> Self {
        self.refresh = Some(refresh);
        self
    }

    pub fn latest_snapshot(&self) -> Option<Arc<DeviceSnapshot>> {
        self.status.borrow().snapshot.clone()
    }

    /// Validate `request` and fill in unchanged fields from `snapshot`
    pub fn resolve(
        request: &ModeRequest,
        snapshot: Option<&DeviceSnapshot>,
    ) -> Result<ResolvedMode, ControlError> {
        // Input errors take precedence over a missing snapshot
        let validated_window = match request {
            ModeRequest::TimedDischarge { window } | ModeRequest::TimedExport { window } => {
                Some(window.validate()?)
            }
            ModeRequest::TimedCharge {
                window: Settable::Explicit(window),
                ..
            } => Some(window.validate()?),
            _ => None,
        };
        if let ModeRequest::TimedCharge {
            charge_target: Settable::Explicit(target),
            ..
        } = request
        {
            check_charge_target(*target)?;
        }

        let snapshot = snapshot.ok_or(ControlError::NoSnapshot)?;
        let inverter = &snapshot.inverter;

        let resolved = match (request, validated_window) {
            (ModeRequest::EcoMode, _) => ResolvedMode::Eco,
            (ModeRequest::DisableTimedCharge, _) => ResolvedMode::DisableTimedCharge,
            (ModeRequest::TimedDischarge { .. }, Some(slot)) => {
                ResolvedMode::TimedDischarge { slot }
            }
            (ModeRequest::TimedExport { .. }, Some(slot)) => ResolvedMode::TimedExport { slot },
            (ModeRequest::TimedCharge { charge_target, .. }, window) => {
                let slot = match window {
                    Some(slot) => slot,
                    None => inverter.charge_slot_1().ok_or(ControlError::Unresolved {
                        field: "charge_slot_1",
                    })?,
                };
                let target = match charge_target {
                    Settable::Explicit(target) => *target,
                    // A stored target outside 4-100 cannot be written back
                    Settable::UseExisting => inverter
                        .charge_target_soc()
                        .and_then(|target| check_charge_target(target).ok())
                        .ok_or(ControlError::Unresolved {
                            field: "charge_target_soc",
                        })?,
                };
                ResolvedMode::TimedCharge { slot, target }
            }
            (ModeRequest::TimedDischarge { .. } | ModeRequest::TimedExport { .. }, None) => {
                return Err(ControlError::InvalidWindow {
                    message: "window is required".to_string(),
                });
            }
        };
        Ok(resolved)
    }

    /// Build the write plan for `request` against the latest snapshot
    pub fn plan(&self, request: &ModeRequest) -> Result<WritePlan, ControlError> {
        let snapshot = self.latest_snapshot();
        let resolved = Self::resolve(request, snapshot.as_deref())?;
        Ok(plan_for(&resolved))
    }

    /// Switch the inverter into `request`
    pub async fn apply(&self, request: &ModeRequest) -> Result<Applied, ControlError> {
        let plan = self.plan(request).inspect_err(|e| {
            self.logger
                .warn(&format!("Rejected {} mode request: {}", request, e));
        })?;
        self.logger.info(&format!(
            "Activating {} mode with {} writes",
            request,
            plan.len()
        ));
        self.execute(plan).await
    }

    /// Change a single setting
    pub async fn apply_command(&self, command: &SettingCommand) -> Result<Applied, ControlError> {
        let plan = command.plan()?;
        self.logger
            .info(&format!("Applying {:?} with {} writes", command, plan.len()));
        self.execute(plan).await
    }

    pub async fn handle_service_call(&self, call: &ServiceCall) -> Result<Applied, ControlError> {
        self.logger.debug(&format!(
            "Service call {} for device {}",
            call.service, call.device_id
        ));
        let request = call.to_mode_request()?;
        self.apply(&request).await
    }

    async fn execute(&self, plan: WritePlan) -> Result<Applied, ControlError> {
        if plan.is_empty() {
            return Ok(Applied { steps: Vec::new() });
        }
        let result = self.write_steps(plan).await;
        self.request_refresh();
        result
    }

    fn request_refresh(&self) {
        let Some(refresh) = &self.refresh else {
            return;
        };
        if refresh.send(()).is_err() {
            self.logger
                .debug("Coordinator is not running, skipping refresh");
        }
    }

    async fn write_steps(&self, plan: WritePlan) -> Result<Applied, ControlError> {
        let mut completed = Vec::with_capacity(plan.len());
        for step in plan {
            match self.planner.write_register(step.register, step.value).await {
                Ok(()) => {
                    self.logger.debug(&format!("Wrote {}", step));
                    completed.push(step);
                }
                Err(source) => {
                    self.logger.error(&format!(
                        "Write {} failed after {} completed writes: {}",
                        step,
                        completed.len(),
                        source
                    ));
                    return Err(ControlError::PartialApplication {
                        completed,
                        failed_step: step,
                        source,
                    });
                }
            }
        }
        Ok(Applied { steps: completed })
    }
}
