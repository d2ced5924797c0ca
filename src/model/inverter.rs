use super::registers::{self, FieldSet, INVERTER_HOLDING, INVERTER_INPUT};
use crate::codec::{RegisterCache, TimeSlot, Value};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Product family, from the first digit of the device type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Model {
    Hybrid,
    Ac,
    Hybrid3ph,
    Ems,
    Ac3ph,
    Gateway,
    AllInOne,
    Unknown,
}

impl Model {
    pub fn from_device_type_code(code: &str) -> Self {
        match code.chars().next() {
            Some('2') => Model::Hybrid,
            Some('3') => Model::Ac,
            Some('4') => Model::Hybrid3ph,
            Some('5') => Model::Ems,
            Some('6') => Model::Ac3ph,
            Some('7') => Model::Gateway,
            Some('8') => Model::AllInOne,
            _ => Model::Unknown,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Model::Hybrid => "Hybrid",
            Model::Ac => "AC",
            Model::Hybrid3ph => "Hybrid - 3ph",
            Model::Ems => "EMS",
            Model::Ac3ph => "AC - 3ph",
            Model::Gateway => "Gateway",
            Model::AllInOne => "All in One",
            Model::Unknown => "Unknown",
        };
        write!(f, "{}", name)
    }
}

/// Hardware generation, from the ARM firmware version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    Gen1,
    Gen2,
    Gen3,
}

impl Generation {
    pub fn from_arm_firmware(arm: u32) -> Self {
        match arm / 100 {
            3 => Generation::Gen3,
            8 | 9 => Generation::Gen2,
            _ => Generation::Gen1,
        }
    }
}

/// Rated output in watts for known device type codes
pub fn max_inverter_power_w(device_type_code: &str) -> Option<u32> {
    let watts = match device_type_code {
        "2001" => 5000,
        "2002" => 4600,
        "2003" => 3600,
        "3001" => 3000,
        "3002" => 3600,
        "4001" => 6000,
        "4002" => 8000,
        "4003" => 10000,
        "4004" => 11000,
        "8001" => 6000,
        _ => return None,
    };
    Some(watts)
}

/// Decoded inverter state
#[derive(Debug, Clone, Serialize)]
pub struct Inverter {
    pub model: Model,
    pub generation: Generation,
    pub firmware_version: Option<String>,
    pub max_inverter_power_w: Option<u32>,
    #[serde(flatten)]
    pub fields: BTreeMap<&'static str, Value>,
    /// Raw registers every field was decoded from
    #[serde(skip)]
    pub registers: RegisterCache,
    #[serde(skip)]
    pub decode_warnings: Vec<String>,
}

impl Inverter {
    /// Decode holding and input registers of the inverter slave
    pub fn from_cache(registers: RegisterCache) -> Self {
        let FieldSet {
            values: mut fields,
            mut warnings,
        } = registers::decode_fields(INVERTER_HOLDING, &registers);
        let input = registers::decode_fields(INVERTER_INPUT, &registers);
        fields.extend(input.values);
        warnings.extend(input.warnings);

        let code = fields.get("device_type_code").and_then(Value::as_str);
        let model = code
            .map(Model::from_device_type_code)
            .unwrap_or(Model::Unknown);
        let max_power = code.and_then(max_inverter_power_w);
        let arm = fields.get("arm_firmware_version").and_then(Value::as_u32);
        let dsp = fields.get("dsp_firmware_version").and_then(Value::as_u32);
        let firmware_version = match (dsp, arm) {
            (Some(dsp), Some(arm)) => Some(format!("D0.{}-A0.{}", dsp, arm)),
            _ => None,
        };
        let generation = Generation::from_arm_firmware(arm.unwrap_or(0));

        Self {
            model,
            generation,
            firmware_version,
            max_inverter_power_w: max_power,
            fields,
            registers,
            decode_warnings: warnings,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    fn flag(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    fn slot(&self, name: &str) -> Option<TimeSlot> {
        self.get(name).and_then(Value::as_slot)
    }

    fn number(&self, name: &str) -> Option<u32> {
        self.get(name).and_then(Value::as_u32)
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.get("serial_number").and_then(Value::as_str)
    }

    pub fn device_type_code(&self) -> Option<&str> {
        self.get("device_type_code").and_then(Value::as_str)
    }

    /// Battery power mode: on means eco (demand following)
    pub fn eco_mode(&self) -> Option<bool> {
        self.flag("battery_power_mode")
    }

    pub fn enable_discharge(&self) -> Option<bool> {
        self.flag("enable_discharge")
    }

    pub fn enable_charge(&self) -> Option<bool> {
        self.flag("enable_charge")
    }

    pub fn enable_charge_target(&self) -> Option<bool> {
        self.flag("enable_charge_target")
    }

    pub fn charge_target_soc(&self) -> Option<u16> {
        self.number("charge_target_soc")
            .and_then(|v| u16::try_from(v).ok())
    }

    pub fn charge_slot_1(&self) -> Option<TimeSlot> {
        self.slot("charge_slot_1")
    }

    pub fn charge_slot_2(&self) -> Option<TimeSlot> {
        self.slot("charge_slot_2")
    }

    pub fn discharge_slot_1(&self) -> Option<TimeSlot> {
        self.slot("discharge_slot_1")
    }

    pub fn discharge_slot_2(&self) -> Option<TimeSlot> {
        self.slot("discharge_slot_2")
    }

    pub fn system_time(&self) -> Option<NaiveDateTime> {
        self.get("system_time").and_then(Value::as_datetime)
    }

    pub fn battery_percent(&self) -> Option<u32> {
        self.number("battery_percent")
    }

    pub fn status(&self) -> Option<u32> {
        self.number("status")
    }

    /// Battery power in watts, positive when discharging
    pub fn p_battery(&self) -> Option<i32> {
        self.get("p_battery").and_then(Value::as_i32)
    }

    pub fn p_grid_out(&self) -> Option<i32> {
        self.get("p_grid_out").and_then(Value::as_i32)
    }
}
