//! Translation of modes and setting commands into ordered register writes
//!
//! The write order is part of the protocol: the inverter evaluates some
//! registers against the ones written before them, so plans are executed
//! exactly as built.

use super::registers::hr;
use crate::codec::{TimeSlot, encode_datetime, encode_time_slot};
use crate::error::ControlError;
use chrono::NaiveDateTime;
use std::fmt;

/// A single holding register write, labelled with the setting it changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteStep {
    pub register: u16,
    pub value: u16,
    pub setting: &'static str,
}

impl fmt::Display for WriteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (HR({})={})", self.setting, self.register, self.value)
    }
}

/// Ordered list of writes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WritePlan {
    steps: Vec<WriteStep>,
}

impl WritePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, setting: &'static str, register: u16, value: u16) -> &mut Self {
        self.steps.push(WriteStep {
            register,
            value,
            setting,
        });
        self
    }

    fn push_slot(
        &mut self,
        setting: (&'static str, &'static str),
        registers: (u16, u16),
        slot: &TimeSlot,
    ) -> &mut Self {
        let [start, end] = encode_time_slot(slot);
        self.push(setting.0, registers.0, start)
            .push(setting.1, registers.1, end)
    }

    pub fn steps(&self) -> &[WriteStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// `(register, value)` pairs in execution order
    pub fn pairs(&self) -> Vec<(u16, u16)> {
        self.steps.iter().map(|s| (s.register, s.value)).collect()
    }
}

impl IntoIterator for WritePlan {
    type Item = WriteStep;
    type IntoIter = std::vec::IntoIter<WriteStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}

/// A mode with every optional field filled in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedMode {
    Eco,
    TimedDischarge { slot: TimeSlot },
    TimedExport { slot: TimeSlot },
    TimedCharge { slot: TimeSlot, target: u16 },
    DisableTimedCharge,
}

const DISCHARGE_SLOT_1: (&str, &str) = ("discharge_slot_1_start", "discharge_slot_1_end");
const CHARGE_SLOT_1: (&str, &str) = ("charge_slot_1_start", "charge_slot_1_end");

pub fn plan_for(mode: &ResolvedMode) -> WritePlan {
    let mut plan = WritePlan::new();
    match mode {
        ResolvedMode::Eco => {
            plan.push("eco_mode", hr::BATTERY_POWER_MODE, 1)
                .push("dc_discharge", hr::ENABLE_DISCHARGE, 0);
        }
        ResolvedMode::TimedDischarge { slot } => {
            // Firmware only honours the slot with eco left on
            plan.push("eco_mode", hr::BATTERY_POWER_MODE, 1)
                .push("dc_discharge", hr::ENABLE_DISCHARGE, 1)
                .push_slot(
                    DISCHARGE_SLOT_1,
                    (hr::DISCHARGE_SLOT_1_START, hr::DISCHARGE_SLOT_1_END),
                    slot,
                );
        }
        ResolvedMode::TimedExport { slot } => {
            plan.push("eco_mode", hr::BATTERY_POWER_MODE, 0)
                .push("dc_discharge", hr::ENABLE_DISCHARGE, 1)
                .push_slot(
                    DISCHARGE_SLOT_1,
                    (hr::DISCHARGE_SLOT_1_START, hr::DISCHARGE_SLOT_1_END),
                    slot,
                );
        }
        ResolvedMode::TimedCharge { slot, target } => {
            plan.push("ac_charging", hr::ENABLE_CHARGE, 1)
                .push("ac_charge_limit", hr::CHARGE_TARGET_SOC, *target)
                .push(
                    "ac_charge_limit_switch",
                    hr::ENABLE_CHARGE_TARGET,
                    u16::from(*target < 100),
                )
                .push_slot(
                    CHARGE_SLOT_1,
                    (hr::CHARGE_SLOT_1_START, hr::CHARGE_SLOT_1_END),
                    slot,
                );
        }
        ResolvedMode::DisableTimedCharge => {
            plan.push("ac_charging", hr::ENABLE_CHARGE, 0);
        }
    }
    plan
}

/// Individual settings outside the mode table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingCommand {
    SetChargeTarget(u16),
    SetEnableCharge(bool),
    SetEnableDischarge(bool),
    SetBatterySocReserve(u16),
    SetBatteryChargeLimit(u16),
    SetBatteryDischargeLimit(u16),
    SetBatteryPowerReserve(u16),
    /// Slot 1 or 2; `None` clears it
    SetChargeSlot { index: u8, slot: Option<TimeSlot> },
    SetDischargeSlot { index: u8, slot: Option<TimeSlot> },
    SetSystemDateTime(NaiveDateTime),
    SetActivePowerRate(u16),
    CalibrateBatterySoc,
    RebootInverter,
}

fn check_range(
    setting: &'static str,
    value: u16,
    range: std::ops::RangeInclusive<u16>,
) -> Result<u16, ControlError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ControlError::InvalidSetting {
            setting: setting.to_string(),
            message: format!(
                "{} outside {}-{}",
                value,
                range.start(),
                range.end()
            ),
        })
    }
}

pub fn check_charge_target(target: u16) -> Result<u16, ControlError> {
    if (4..=100).contains(&target) {
        Ok(target)
    } else {
        Err(ControlError::InvalidTarget { target })
    }
}

fn slot_registers(
    charge: bool,
    index: u8,
) -> Result<((&'static str, &'static str), (u16, u16)), ControlError> {
    match (charge, index) {
        (true, 1) => Ok((CHARGE_SLOT_1, (hr::CHARGE_SLOT_1_START, hr::CHARGE_SLOT_1_END))),
        (true, 2) => Ok((
            ("charge_slot_2_start", "charge_slot_2_end"),
            (hr::CHARGE_SLOT_2_START, hr::CHARGE_SLOT_2_END),
        )),
        (false, 1) => Ok((
            DISCHARGE_SLOT_1,
            (hr::DISCHARGE_SLOT_1_START, hr::DISCHARGE_SLOT_1_END),
        )),
        (false, 2) => Ok((
            ("discharge_slot_2_start", "discharge_slot_2_end"),
            (hr::DISCHARGE_SLOT_2_START, hr::DISCHARGE_SLOT_2_END),
        )),
        (charge, index) => Err(ControlError::InvalidSetting {
            setting: (if charge { "charge_slot" } else { "discharge_slot" }).to_string(),
            message: format!("slot {} does not exist", index),
        }),
    }
}

impl SettingCommand {
    /// Validate and build the writes for this command
    pub fn plan(&self) -> Result<WritePlan, ControlError> {
        let mut plan = WritePlan::new();
        match *self {
            SettingCommand::SetChargeTarget(target) => {
                let target = check_charge_target(target)?;
                plan.push("ac_charging", hr::ENABLE_CHARGE, 1);
                if target == 100 {
                    plan.push("ac_charge_limit_switch", hr::ENABLE_CHARGE_TARGET, 0)
                        .push("ac_charge_limit", hr::CHARGE_TARGET_SOC, 100);
                } else {
                    plan.push("ac_charge_limit_switch", hr::ENABLE_CHARGE_TARGET, 1)
                        .push("ac_charge_limit", hr::CHARGE_TARGET_SOC, target);
                }
            }
            SettingCommand::SetEnableCharge(on) => {
                plan.push("ac_charging", hr::ENABLE_CHARGE, u16::from(on));
            }
            SettingCommand::SetEnableDischarge(on) => {
                plan.push("dc_discharge", hr::ENABLE_DISCHARGE, u16::from(on));
            }
            SettingCommand::SetBatterySocReserve(v) => {
                let v = check_range("battery_soc_reserve", v, 4..=100)?;
                plan.push("battery_soc_reserve", hr::BATTERY_SOC_RESERVE, v);
            }
            SettingCommand::SetBatteryChargeLimit(v) => {
                let v = check_range("battery_charge_limit", v, 0..=50)?;
                plan.push("battery_charge_limit", hr::BATTERY_CHARGE_LIMIT, v);
            }
            SettingCommand::SetBatteryDischargeLimit(v) => {
                let v = check_range("battery_discharge_limit", v, 0..=50)?;
                plan.push("battery_discharge_limit", hr::BATTERY_DISCHARGE_LIMIT, v);
            }
            SettingCommand::SetBatteryPowerReserve(v) => {
                let v = check_range("battery_discharge_min_power_reserve", v, 4..=100)?;
                plan.push(
                    "battery_discharge_min_power_reserve",
                    hr::BATTERY_DISCHARGE_MIN_POWER_RESERVE,
                    v,
                );
            }
            SettingCommand::SetChargeSlot { index, slot } => {
                let (settings, registers) = slot_registers(true, index)?;
                push_optional_slot(&mut plan, settings, registers, slot);
            }
            SettingCommand::SetDischargeSlot { index, slot } => {
                let (settings, registers) = slot_registers(false, index)?;
                push_optional_slot(&mut plan, settings, registers, slot);
            }
            SettingCommand::SetSystemDateTime(dt) => {
                let regs = encode_datetime(&dt).map_err(|e| ControlError::InvalidSetting {
                    setting: "system_time".to_string(),
                    message: e.to_string(),
                })?;
                const NAMES: [&str; 6] = [
                    "system_time_year",
                    "system_time_month",
                    "system_time_day",
                    "system_time_hour",
                    "system_time_minute",
                    "system_time_second",
                ];
                for (offset, (name, value)) in NAMES.into_iter().zip(regs).enumerate() {
                    plan.push(name, hr::SYSTEM_TIME_YEAR + offset as u16, value);
                }
            }
            SettingCommand::SetActivePowerRate(v) => {
                let v = check_range("active_power_rate", v, 0..=100)?;
                plan.push("active_power_rate", hr::ACTIVE_POWER_RATE, v);
            }
            SettingCommand::CalibrateBatterySoc => {
                plan.push("soc_force_adjust", hr::SOC_FORCE_ADJUST, 1);
            }
            SettingCommand::RebootInverter => {
                plan.push("reboot", hr::REBOOT, 100);
            }
        }
        Ok(plan)
    }
}

fn push_optional_slot(
    plan: &mut WritePlan,
    settings: (&'static str, &'static str),
    registers: (u16, u16),
    slot: Option<TimeSlot>,
) {
    match slot {
        Some(slot) => {
            plan.push_slot(settings, registers, &slot);
        }
        None => {
            plan.push(settings.0, registers.0, 0)
                .push(settings.1, registers.1, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::registers::is_write_safe;

    fn window(s: (u32, u32), e: (u32, u32)) -> TimeSlot {
        TimeSlot::from_hm(s, e).unwrap()
    }

    #[test]
    fn test_eco_plan() {
        assert_eq!(plan_for(&ResolvedMode::Eco).pairs(), vec![(27, 1), (59, 0)]);
    }

    #[test]
    fn test_timed_discharge_keeps_eco_on() {
        let plan = plan_for(&ResolvedMode::TimedDischarge {
            slot: window((16, 0), (19, 30)),
        });
        assert_eq!(plan.pairs(), vec![(27, 1), (59, 1), (56, 1600), (57, 1930)]);
    }

    #[test]
    fn test_timed_export_turns_eco_off() {
        let plan = plan_for(&ResolvedMode::TimedExport {
            slot: window((23, 0), (2, 0)),
        });
        assert_eq!(plan.pairs(), vec![(27, 0), (59, 1), (56, 2300), (57, 200)]);
    }

    #[test]
    fn test_timed_charge_limit_switch() {
        let slot = window((22, 0), (6, 0));
        let plan = plan_for(&ResolvedMode::TimedCharge { slot, target: 50 });
        assert_eq!(
            plan.pairs(),
            vec![(96, 1), (116, 50), (20, 1), (94, 2200), (95, 600)]
        );
        let plan = plan_for(&ResolvedMode::TimedCharge { slot, target: 100 });
        assert_eq!(plan.steps()[2].value, 0);
        assert_eq!(plan.steps()[2].setting, "ac_charge_limit_switch");
    }

    #[test]
    fn test_disable_timed_charge() {
        assert_eq!(plan_for(&ResolvedMode::DisableTimedCharge).pairs(), vec![(96, 0)]);
    }

    #[test]
    fn test_charge_target_command() {
        assert_eq!(
            SettingCommand::SetChargeTarget(80).plan().unwrap().pairs(),
            vec![(96, 1), (20, 1), (116, 80)]
        );
        assert_eq!(
            SettingCommand::SetChargeTarget(100).plan().unwrap().pairs(),
            vec![(96, 1), (20, 0), (116, 100)]
        );
        assert_eq!(
            SettingCommand::SetChargeTarget(3).plan().unwrap_err(),
            ControlError::InvalidTarget { target: 3 }
        );
    }

    #[test]
    fn test_range_checked_commands() {
        assert!(SettingCommand::SetBatteryChargeLimit(51).plan().is_err());
        assert!(SettingCommand::SetBatterySocReserve(3).plan().is_err());
        assert!(SettingCommand::SetActivePowerRate(101).plan().is_err());
        assert_eq!(
            SettingCommand::SetBatteryPowerReserve(4).plan().unwrap().pairs(),
            vec![(114, 4)]
        );
    }

    #[test]
    fn test_slot_commands() {
        let plan = SettingCommand::SetDischargeSlot {
            index: 2,
            slot: Some(window((5, 30), (7, 0))),
        }
        .plan()
        .unwrap();
        assert_eq!(plan.pairs(), vec![(44, 530), (45, 700)]);

        let plan = SettingCommand::SetChargeSlot {
            index: 2,
            slot: None,
        }
        .plan()
        .unwrap();
        assert_eq!(plan.pairs(), vec![(31, 0), (32, 0)]);

        assert!(
            SettingCommand::SetChargeSlot {
                index: 3,
                slot: None
            }
            .plan()
            .is_err()
        );
    }

    #[test]
    fn test_system_time_command() {
        let dt = chrono::NaiveDate::from_ymd_opt(2024, 3, 31)
            .unwrap()
            .and_hms_opt(1, 2, 3)
            .unwrap();
        let plan = SettingCommand::SetSystemDateTime(dt).plan().unwrap();
        assert_eq!(
            plan.pairs(),
            vec![(35, 24), (36, 3), (37, 31), (38, 1), (39, 2), (40, 3)]
        );
    }

    #[test]
    fn test_every_planned_register_is_write_safe() {
        let slot = window((1, 0), (2, 0));
        let mut plans = vec![
            plan_for(&ResolvedMode::Eco),
            plan_for(&ResolvedMode::TimedDischarge { slot }),
            plan_for(&ResolvedMode::TimedExport { slot }),
            plan_for(&ResolvedMode::TimedCharge { slot, target: 40 }),
            plan_for(&ResolvedMode::DisableTimedCharge),
        ];
        for cmd in [
            SettingCommand::SetEnableDischarge(true),
            SettingCommand::SetBatteryDischargeLimit(20),
            SettingCommand::CalibrateBatterySoc,
            SettingCommand::RebootInverter,
        ] {
            plans.push(cmd.plan().unwrap());
        }
        for plan in plans {
            for step in plan.steps() {
                assert!(is_write_safe(step.register), "{}", step);
            }
        }
    }

    #[test]
    fn test_step_display() {
        let step = WriteStep {
            register: 96,
            value: 1,
            setting: "ac_charging",
        };
        assert_eq!(step.to_string(), "ac_charging (HR(96)=1)");
    }
}
