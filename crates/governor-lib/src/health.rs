//! Health reporting for the governor
//!
//! Maps monitor pressure to component status for liveness and readiness
//! probes.

use crate::models::PressureLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is under pressure but still operational
    Degraded,
    /// Component is at critical pressure
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub pressure: PressureLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    /// none/moderate -> healthy, high -> degraded, critical -> unhealthy
    pub fn from_pressure(pressure: PressureLevel, message: impl Into<String>) -> Self {
        let status = match pressure {
            PressureLevel::None | PressureLevel::Moderate => ComponentStatus::Healthy,
            PressureLevel::High => ComponentStatus::Degraded,
            PressureLevel::Critical => ComponentStatus::Unhealthy,
        };
        Self {
            status,
            pressure,
            message: (status != ComponentStatus::Healthy).then(|| message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    pub fn new(components: HashMap<String, ComponentHealth>) -> Self {
        let status = Self::compute_status(&components);
        Self { status, components }
    }

    /// Compute overall status from component statuses
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReadinessResponse {
    pub fn ready() -> Self {
        Self {
            ready: true,
            reason: None,
        }
    }

    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self {
            ready: false,
            reason: Some(reason.into()),
        }
    }
}

/// Component names for health tracking
pub mod components {
    pub const MEMORY_MONITOR: &str = "memory_monitor";
    pub const CPU_MONITOR: &str = "cpu_monitor";
}
