use super::registers::{self, BATTERY_INPUT};
use crate::codec::{RegisterBank, RegisterCache, Value};
use serde::Serialize;
use std::collections::BTreeMap;

/// One battery pack read from its own slave address
#[derive(Debug, Clone, Serialize)]
pub struct Battery {
    /// Zero-based slot; the pack answers on slave `0x32 + slot`
    pub slot: u8,
    #[serde(flatten)]
    pub fields: BTreeMap<&'static str, Value>,
    #[serde(skip)]
    pub decode_warnings: Vec<String>,
}

/// A slot with nothing attached reads back as zeros or a blank serial
pub fn is_present(bank: &RegisterBank) -> bool {
    if bank.is_all_zero() {
        return false;
    }
    match bank.decode(110, crate::codec::FieldKind::Ascii(5)) {
        Ok(Value::Text(serial)) => !serial.trim().is_empty(),
        _ => false,
    }
}

impl Battery {
    /// Decode a battery bank, or `None` if the slot is empty
    pub fn from_bank(slot: u8, bank: &RegisterBank) -> Option<Self> {
        if !is_present(bank) {
            return None;
        }
        let cache = RegisterCache::from_banks([bank]);
        let set = registers::decode_fields(BATTERY_INPUT, &cache);
        Some(Self {
            slot,
            fields: set.values,
            decode_warnings: set.warnings,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.get("serial_number").and_then(Value::as_str)
    }

    pub fn soc(&self) -> Option<u32> {
        self.get("soc").and_then(Value::as_u32)
    }

    pub fn num_cycles(&self) -> Option<u32> {
        self.get("num_cycles").and_then(Value::as_u32)
    }

    /// Remaining capacity in Ah
    pub fn cap_remaining(&self) -> Option<f64> {
        self.get("cap_remaining").and_then(Value::as_f64)
    }

    /// Per-cell voltages in cell order, skipping unused cells
    pub fn cell_voltages(&self) -> Vec<f64> {
        self.fields
            .iter()
            .filter(|(name, _)| name.starts_with("v_cell_"))
            .filter_map(|(_, v)| v.as_f64())
            .filter(|v| *v > 0.0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::RegisterType;

    fn bank(values: Vec<u16>) -> RegisterBank {
        RegisterBank::new(RegisterType::Input, 0x32, 60, values)
    }

    fn populated() -> Vec<u16> {
        let mut v = vec![0u16; 60];
        for cell in 0..16 {
            v[cell] = 3300 + cell as u16;
        }
        v[28] = 0x0000;
        v[29] = 16000;
        v[36] = 412;
        v[40] = 64;
        v[50..55].copy_from_slice(&[0x4247, 0x3132, 0x3334, 0x4735, 0x3637]);
        v
    }

    #[test]
    fn test_all_zero_bank_is_absent() {
        assert!(!is_present(&bank(vec![0; 60])));
        assert!(Battery::from_bank(0, &bank(vec![0; 60])).is_none());
    }

    #[test]
    fn test_blank_serial_is_absent() {
        let mut v = populated();
        v[50..55].copy_from_slice(&[0x2020; 5]);
        assert!(!is_present(&bank(v)));
    }

    #[test]
    fn test_battery_decodes_fields() {
        let battery = Battery::from_bank(1, &bank(populated())).unwrap();
        assert_eq!(battery.slot, 1);
        assert_eq!(battery.serial_number(), Some("BG1234G567"));
        assert_eq!(battery.soc(), Some(64));
        assert_eq!(battery.num_cycles(), Some(412));
        assert_eq!(battery.cap_remaining(), Some(160.0));
        let cells = battery.cell_voltages();
        assert_eq!(cells.len(), 16);
        assert!((cells[0] - 3.3).abs() < 1e-9);
        assert!((cells[15] - 3.315).abs() < 1e-9);
    }
}
