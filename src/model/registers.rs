//! Static register catalogues
//!
//! Each entry maps a snake_case field name to its register type, absolute
//! address and [`FieldKind`]. Addresses are absolute so a definition can be
//! decoded against any bank or cache holding that register.

use crate::codec::{FieldKind, RegisterCache, Value};
use crate::modbus::RegisterType;
use std::collections::BTreeMap;

/// Location and layout of one named field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub register_type: RegisterType,
    pub address: u16,
    pub kind: FieldKind,
}

const fn holding(name: &'static str, address: u16, kind: FieldKind) -> FieldDef {
    FieldDef {
        name,
        register_type: RegisterType::Holding,
        address,
        kind,
    }
}

const fn input(name: &'static str, address: u16, kind: FieldKind) -> FieldDef {
    FieldDef {
        name,
        register_type: RegisterType::Input,
        address,
        kind,
    }
}

/// Holding register addresses referenced by write plans
pub mod hr {
    pub const DEVICE_TYPE_CODE: u16 = 0;
    pub const ENABLE_CHARGE_TARGET: u16 = 20;
    pub const BATTERY_POWER_MODE: u16 = 27;
    pub const SOC_FORCE_ADJUST: u16 = 29;
    pub const CHARGE_SLOT_2_START: u16 = 31;
    pub const CHARGE_SLOT_2_END: u16 = 32;
    pub const SYSTEM_TIME_YEAR: u16 = 35;
    pub const DISCHARGE_SLOT_2_START: u16 = 44;
    pub const DISCHARGE_SLOT_2_END: u16 = 45;
    pub const ACTIVE_POWER_RATE: u16 = 50;
    pub const DISCHARGE_SLOT_1_START: u16 = 56;
    pub const DISCHARGE_SLOT_1_END: u16 = 57;
    pub const ENABLE_DISCHARGE: u16 = 59;
    pub const CHARGE_SLOT_1_START: u16 = 94;
    pub const CHARGE_SLOT_1_END: u16 = 95;
    pub const ENABLE_CHARGE: u16 = 96;
    pub const BATTERY_SOC_RESERVE: u16 = 110;
    pub const BATTERY_CHARGE_LIMIT: u16 = 111;
    pub const BATTERY_DISCHARGE_LIMIT: u16 = 112;
    pub const BATTERY_DISCHARGE_MIN_POWER_RESERVE: u16 = 114;
    pub const CHARGE_TARGET_SOC: u16 = 116;
    pub const REBOOT: u16 = 163;
}

/// Holding registers the inverter accepts writes to
pub const WRITE_SAFE_REGISTERS: &[u16] = &[
    20, 27, 29, 31, 32, 35, 36, 37, 38, 39, 40, 44, 45, 50, 56, 57, 59, 94, 95, 96, 110, 111,
    112, 114, 116, 163,
];

pub fn is_write_safe(register: u16) -> bool {
    WRITE_SAFE_REGISTERS.contains(&register)
}

use crate::codec::FieldKind::*;

pub const INVERTER_HOLDING: &[FieldDef] = &[
    holding("device_type_code", 0, Hex),
    holding("inverter_module", 1, U32),
    holding("num_mppt", 3, HighByte),
    holding("num_phases", 3, LowByte),
    holding("first_battery_serial_number", 8, Ascii(5)),
    holding("serial_number", 13, Ascii(5)),
    holding("first_battery_bms_firmware_version", 18, U16),
    holding("dsp_firmware_version", 19, U16),
    holding("enable_charge_target", 20, Bool),
    holding("arm_firmware_version", 21, U16),
    holding("usb_device_inserted", 22, U16),
    holding("select_arm_chip", 23, Bool),
    holding("battery_power_mode", 27, Bool),
    holding("soc_force_adjust", 29, U16),
    holding("charge_slot_2", 31, TimeSlot),
    holding("modbus_version", 34, Centi),
    holding("system_time", 35, DateTime),
    holding("charge_soc", 43, HighByte),
    holding("discharge_soc", 43, LowByte),
    holding("discharge_slot_2", 44, TimeSlot),
    holding("meter_type", 47, U16),
    holding("active_power_rate", 50, U16),
    holding("reactive_power_rate", 51, U16),
    holding("power_factor", 52, U16),
    holding("battery_type", 54, U16),
    holding("battery_nominal_capacity", 55, U16),
    holding("discharge_slot_1", 56, TimeSlot),
    holding("enable_discharge", 59, Bool),
    holding("v_pv_start", 60, Deci),
    holding("charge_slot_1", 94, TimeSlot),
    holding("enable_charge", 96, Bool),
    holding("battery_soc_reserve", 110, U16),
    holding("battery_charge_limit", 111, U16),
    holding("battery_discharge_limit", 112, U16),
    holding("battery_discharge_min_power_reserve", 114, U16),
    holding("charge_target_soc", 116, U16),
    holding("reboot", 163, U16),
    holding("battery_pause_mode", 318, U16),
    holding("battery_pause_slot_1", 319, TimeSlot),
];

pub const INVERTER_INPUT: &[FieldDef] = &[
    input("status", 0, U16),
    input("v_pv1", 1, Deci),
    input("v_pv2", 2, Deci),
    input("v_p_bus", 3, Deci),
    input("v_n_bus", 4, Deci),
    input("v_ac1", 5, Deci),
    input("e_battery_throughput_total", 6, DeciU32),
    input("i_pv1", 8, Centi),
    input("i_pv2", 9, Centi),
    input("i_ac1", 10, Centi),
    input("e_pv_total", 11, DeciU32),
    input("f_ac1", 13, Centi),
    input("e_pv1_day", 17, Deci),
    input("p_pv1", 18, U16),
    input("e_pv2_day", 19, Deci),
    input("p_pv2", 20, U16),
    input("e_grid_out_total", 21, DeciU32),
    input("p_inverter_out", 24, I16),
    input("e_grid_out_day", 25, Deci),
    input("e_grid_in_day", 26, Deci),
    input("e_inverter_in_total", 27, DeciU32),
    input("p_grid_out", 30, I16),
    input("p_eps_backup", 31, U16),
    input("e_grid_in_total", 32, DeciU32),
    input("e_inverter_in_day", 35, Deci),
    input("e_battery_charge_today", 36, Deci),
    input("e_battery_discharge_today", 37, Deci),
    input("temp_inverter_heatsink", 41, DeciI16),
    input("p_load_demand", 42, U16),
    input("e_inverter_out_day", 44, Deci),
    input("e_inverter_out_total", 45, DeciU32),
    input("work_time_total", 47, U32),
    input("system_mode", 49, U16),
    input("v_battery", 50, Centi),
    input("i_battery", 51, CentiI16),
    input("p_battery", 52, I16),
    input("v_eps_backup", 53, Deci),
    input("f_eps_backup", 54, Centi),
    input("temp_charger", 55, DeciI16),
    input("temp_battery", 56, DeciI16),
    input("i_grid_port", 58, Centi),
    input("battery_percent", 59, U16),
];

pub const BATTERY_INPUT: &[FieldDef] = &[
    input("v_cell_01", 60, Milli),
    input("v_cell_02", 61, Milli),
    input("v_cell_03", 62, Milli),
    input("v_cell_04", 63, Milli),
    input("v_cell_05", 64, Milli),
    input("v_cell_06", 65, Milli),
    input("v_cell_07", 66, Milli),
    input("v_cell_08", 67, Milli),
    input("v_cell_09", 68, Milli),
    input("v_cell_10", 69, Milli),
    input("v_cell_11", 70, Milli),
    input("v_cell_12", 71, Milli),
    input("v_cell_13", 72, Milli),
    input("v_cell_14", 73, Milli),
    input("v_cell_15", 74, Milli),
    input("v_cell_16", 75, Milli),
    input("t_cells_01_04", 76, DeciI16),
    input("t_cells_05_08", 77, DeciI16),
    input("t_cells_09_12", 78, DeciI16),
    input("t_cells_13_16", 79, DeciI16),
    input("v_cells_sum", 80, Milli),
    input("t_bms_mosfet", 81, DeciI16),
    input("v_out", 82, MilliU32),
    input("cap_calibrated", 84, CentiU32),
    input("cap_design", 86, CentiU32),
    input("cap_remaining", 88, CentiU32),
    input("status_1_2", 90, U16),
    input("status_3_4", 91, U16),
    input("status_5_6", 92, U16),
    input("status_7", 93, U16),
    input("warning_1_2", 94, U16),
    input("num_cycles", 96, U16),
    input("num_cells", 97, U16),
    input("bms_firmware_version", 98, U16),
    input("soc", 100, U16),
    input("cap_design2", 101, CentiU32),
    input("t_max", 103, DeciI16),
    input("t_min", 104, DeciI16),
    input("serial_number", 110, Ascii(5)),
    input("usb_inserted", 115, U16),
];

/// Decoded fields plus the per-field failures that were skipped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    pub values: BTreeMap<&'static str, Value>,
    pub warnings: Vec<String>,
}

/// Decode every definition whose registers are present in `cache`.
///
/// Fields whose registers were never read are left out. A field that fails
/// to decode (blank time slot, impossible date) is left out and recorded as
/// a warning; the rest of the set is still usable.
pub fn decode_fields(defs: &[FieldDef], cache: &RegisterCache) -> FieldSet {
    let mut set = FieldSet::default();
    for def in defs {
        if !cache.contains(def.register_type, def.address, def.kind.width()) {
            continue;
        }
        match cache.decode(def.register_type, def.address, def.kind) {
            Ok(value) => {
                set.values.insert(def.name, value);
            }
            Err(e) => set.warnings.push(format!(
                "{} at {}({}): {}",
                def.name,
                def.register_type.prefix(),
                def.address,
                e
            )),
        }
    }
    set
}

pub fn find(defs: &[FieldDef], name: &str) -> Option<FieldDef> {
    defs.iter().find(|d| d.name == name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RegisterBank;

    #[test]
    fn test_catalogue_names_are_unique() {
        for defs in [INVERTER_HOLDING, INVERTER_INPUT, BATTERY_INPUT] {
            let mut names: Vec<_> = defs.iter().map(|d| d.name).collect();
            names.sort();
            let before = names.len();
            names.dedup();
            assert_eq!(before, names.len());
        }
    }

    #[test]
    fn test_battery_catalogue_fits_one_bank() {
        for def in BATTERY_INPUT {
            assert!(def.address >= 60);
            assert!(def.address as usize + def.kind.width() <= 120, "{}", def.name);
        }
    }

    #[test]
    fn test_write_safe_whitelist() {
        assert!(is_write_safe(hr::ENABLE_CHARGE));
        assert!(is_write_safe(38));
        assert!(!is_write_safe(0));
        assert!(!is_write_safe(41));
        assert!(!is_write_safe(318));
    }

    #[test]
    fn test_decode_fields_skips_missing_and_records_blank_slots() {
        let mut values = vec![0u16; 60];
        values[31] = 60;
        values[32] = 60;
        values[56] = 2200;
        values[57] = 600;
        let cache =
            RegisterCache::from_banks(&[RegisterBank::new(RegisterType::Holding, 0x32, 0, values)]);
        let set = decode_fields(INVERTER_HOLDING, &cache);

        assert!(set.values.contains_key("discharge_slot_1"));
        assert!(!set.values.contains_key("charge_slot_2"));
        assert!(!set.values.contains_key("charge_slot_1"));
        assert!(!set.values.contains_key("battery_pause_mode"));
        assert!(set.warnings.iter().any(|w| w.starts_with("charge_slot_2")));
        assert!(set.warnings.iter().any(|w| w.starts_with("system_time")));
    }

    #[test]
    fn test_find() {
        assert_eq!(find(INVERTER_HOLDING, "charge_slot_1").unwrap().address, 94);
        assert!(find(INVERTER_INPUT, "nope").is_none());
    }
}
