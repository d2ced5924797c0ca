use super::battery::Battery;
use super::inverter::Inverter;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything decoded in one successful poll cycle
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub inverter: Inverter,
    pub batteries: Vec<Battery>,
}

impl DeviceSnapshot {
    pub fn new(inverter: Inverter, batteries: Vec<Battery>) -> Self {
        Self::with_timestamp(Utc::now(), inverter, batteries)
    }

    pub fn with_timestamp(
        timestamp: DateTime<Utc>,
        inverter: Inverter,
        batteries: Vec<Battery>,
    ) -> Self {
        Self {
            timestamp,
            inverter,
            batteries,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: std::time::Duration) -> bool {
        chrono::Duration::from_std(stale_after)
            .map(|limit| self.age(now) > limit)
            .unwrap_or(false)
    }

    pub fn battery(&self, slot: u8) -> Option<&Battery> {
        self.batteries.iter().find(|b| b.slot == slot)
    }

    /// Per-field decode problems across inverter and batteries
    pub fn decode_warnings(&self) -> impl Iterator<Item = &String> {
        self.inverter
            .decode_warnings
            .iter()
            .chain(self.batteries.iter().flat_map(|b| b.decode_warnings.iter()))
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        let inv = &self.inverter;
        format!(
            "{} {} serial={} soc={}% battery={}W grid={}W batteries={}",
            inv.model,
            inv.firmware_version.as_deref().unwrap_or("?"),
            inv.serial_number().unwrap_or("?"),
            fmt_opt(inv.battery_percent()),
            fmt_opt(inv.p_battery()),
            fmt_opt(inv.p_grid_out()),
            self.batteries.len()
        )
    }
}

fn fmt_opt<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "?".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RegisterCache;
    use std::time::Duration;

    #[test]
    fn test_staleness() {
        let start = Utc::now();
        let snap = DeviceSnapshot::with_timestamp(
            start,
            Inverter::from_cache(RegisterCache::new()),
            Vec::new(),
        );
        let later = start + chrono::Duration::seconds(90);
        assert_eq!(snap.age(later).num_seconds(), 90);
        assert!(snap.is_stale(later, Duration::from_secs(60)));
        assert!(!snap.is_stale(later, Duration::from_secs(120)));
    }

    #[test]
    fn test_summary_with_unknown_fields() {
        let snap = DeviceSnapshot::new(Inverter::from_cache(RegisterCache::new()), Vec::new());
        assert_eq!(
            snap.summary(),
            "Unknown ? serial=? soc=?% battery=?W grid=?W batteries=0"
        );
        assert_eq!(snap.decode_warnings().count(), 0);
    }
}
