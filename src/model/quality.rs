//! Plausibility checks on decoded inverter readings
//!
//! The adapter occasionally returns a bank that passes its checksum but
//! carries garbage. A snapshot holding any reading outside these bounds is
//! not published.

use super::inverter::Inverter;
use crate::codec::Value;
use crate::error::PollError;
use std::fmt;

/// Accepted range for one decoded field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityCheck {
    pub field: &'static str,
    pub min: f64,
    pub max: f64,
    pub min_inclusive: bool,
    pub max_inclusive: bool,
}

impl QualityCheck {
    pub const fn new(field: &'static str, min: f64, max: f64) -> Self {
        Self {
            field,
            min,
            max,
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    pub const fn exclusive_min(self) -> Self {
        Self {
            min_inclusive: false,
            ..self
        }
    }

    pub fn accepts(&self, value: f64) -> bool {
        let above = value > self.min || (self.min_inclusive && value == self.min);
        let below = value < self.max || (self.max_inclusive && value == self.max);
        above && below
    }
}

impl fmt::Display for QualityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}, {}{}",
            if self.min_inclusive { '[' } else { '(' },
            self.min,
            self.max,
            if self.max_inclusive { ']' } else { ')' }
        )
    }
}

/// Lifetime totals of zero mean the bank was read before the meters settled
pub const INVERTER_CHECKS: &[QualityCheck] = &[
    QualityCheck::new("temp_inverter_heatsink", -10.0, 100.0),
    QualityCheck::new("temp_charger", -10.0, 100.0),
    QualityCheck::new("temp_battery", -10.0, 100.0),
    QualityCheck::new("e_inverter_out_total", 0.0, 1e6).exclusive_min(),
    QualityCheck::new("e_grid_in_total", 0.0, 1e6).exclusive_min(),
    QualityCheck::new("e_grid_out_total", 0.0, 1e6).exclusive_min(),
    QualityCheck::new("battery_percent", 0.0, 100.0),
    QualityCheck::new("p_eps_backup", -15e3, 15e3),
    QualityCheck::new("p_grid_out", -1e6, 15e3),
    QualityCheck::new("p_battery", -15e3, 15e3),
];

/// First implausible reading of `inverter`; fields that failed to decode are skipped
pub fn check_inverter(inverter: &Inverter) -> Result<(), PollError> {
    for check in INVERTER_CHECKS {
        let Some(value) = inverter.get(check.field).and_then(Value::as_f64) else {
            continue;
        };
        if !check.accepts(value) {
            return Err(PollError::Implausible {
                field: check.field,
                value,
                range: check.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RegisterBank, RegisterCache};
    use crate::modbus::RegisterType;

    fn inverter(input: &[(usize, u16)]) -> Inverter {
        let mut ir = vec![0u16; 60];
        ir[22] = 5120;
        ir[33] = 4400;
        ir[46] = 9876;
        ir[41] = 352;
        ir[59] = 64;
        for (index, value) in input {
            ir[*index] = *value;
        }
        let bank = RegisterBank::new(RegisterType::Input, 0x32, 0, ir);
        Inverter::from_cache(RegisterCache::from_banks(&[bank]))
    }

    #[test]
    fn test_bounds_inclusivity() {
        let temp = QualityCheck::new("temp_battery", -10.0, 100.0);
        assert!(temp.accepts(-10.0));
        assert!(temp.accepts(100.0));
        assert!(!temp.accepts(100.1));
        assert!(!temp.accepts(f64::NAN));

        let total = QualityCheck::new("e_grid_in_total", 0.0, 1e6).exclusive_min();
        assert!(!total.accepts(0.0));
        assert!(total.accepts(0.1));
        assert_eq!(total.to_string(), "(0, 1000000]");
    }

    #[test]
    fn test_plausible_inverter_passes() {
        assert!(check_inverter(&inverter(&[])).is_ok());
    }

    #[test]
    fn test_hot_heatsink_is_implausible() {
        let err = check_inverter(&inverter(&[(41, 1500)])).unwrap_err();
        match err {
            PollError::Implausible { field, value, .. } => {
                assert_eq!(field, "temp_inverter_heatsink");
                assert_eq!(value, 150.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_zero_lifetime_total_is_implausible() {
        let err = check_inverter(&inverter(&[(46, 0)])).unwrap_err();
        assert!(matches!(
            err,
            PollError::Implausible {
                field: "e_inverter_out_total",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_fields_are_skipped() {
        let empty = Inverter::from_cache(RegisterCache::default());
        assert!(check_inverter(&empty).is_ok());
    }
}
