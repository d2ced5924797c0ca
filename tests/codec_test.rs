use chrono::{NaiveDate, NaiveTime};
use givenergy_local::codec::{
    self, FieldKind, RegisterBank, RegisterCache, TimeSlot, Value, decode_time_slot, encode_ascii,
};
use givenergy_local::model::{Inverter, Model};
use givenergy_local::modbus::RegisterType;

fn holding_bank(base: u16, set: &[(u16, u16)]) -> RegisterBank {
    let mut values = vec![0u16; 60];
    for (address, value) in set {
        values[(address - base) as usize] = *value;
    }
    RegisterBank::new(RegisterType::Holding, 0x32, base, values)
}

#[test]
fn overnight_slot_decodes_without_normalising() {
    let slot = decode_time_slot(2330, 530).unwrap();
    assert_eq!(slot.start, NaiveTime::from_hms_opt(23, 30, 0).unwrap());
    assert_eq!(slot.end, NaiveTime::from_hms_opt(5, 30, 0).unwrap());
    assert!(slot.crosses_midnight());
    assert_eq!(slot.to_string(), "23:30-05:30");
}

#[test]
fn invalid_slot_values_are_errors() {
    assert!(decode_time_slot(2400, 0).is_err());
    assert!(decode_time_slot(1260, 0).is_err());
    assert!(decode_time_slot(0, 2359).is_ok());
}

#[test]
fn datetime_uses_two_digit_year() {
    let regs = [24, 2, 29, 13, 5, 9];
    let dt = codec::decode_datetime(&regs).unwrap();
    assert_eq!(
        dt,
        NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 5, 9)
            .unwrap()
    );
    assert_eq!(codec::encode_datetime(&dt).unwrap(), regs);
    assert!(codec::decode_datetime(&[23, 2, 29, 0, 0, 0]).is_err());
}

#[test]
fn scaled_and_signed_values() {
    assert_eq!(
        codec::decode(FieldKind::CentiI16, &[0xFF38]).unwrap(),
        Value::Decimal(-2.0)
    );
    assert_eq!(
        codec::decode(FieldKind::DeciU32, &[0x0001, 0x0000]).unwrap(),
        Value::Decimal(6553.6)
    );
    assert_eq!(
        codec::encode(FieldKind::Deci, &Value::Decimal(23.4)).unwrap(),
        vec![234]
    );
    assert!(codec::encode(FieldKind::Deci, &Value::Decimal(-1.0)).is_err());
    assert!(codec::encode(FieldKind::U16, &Value::Text("1".into())).is_err());
}

#[test]
fn cache_spans_banks() {
    let low = holding_bank(0, &[(59, 1)]);
    let high = holding_bank(60, &[(60, 1500)]);
    let cache = RegisterCache::from_banks([&low, &high]);
    assert_eq!(cache.len(), 120);
    assert!(cache.contains(RegisterType::Holding, 58, 3));
    assert!(!cache.contains(RegisterType::Input, 0, 1));
    assert_eq!(
        cache
            .decode(RegisterType::Holding, 59, FieldKind::U32)
            .unwrap(),
        Value::Unsigned(0x0001_05DC)
    );
    assert!(
        cache
            .decode(RegisterType::Holding, 119, FieldKind::U32)
            .is_err()
    );
}

#[test]
fn inverter_decodes_from_holding_banks() {
    let mut set = vec![(0, 0x2001), (19, 449), (21, 449), (27, 1), (56, 1600), (57, 1900), (59, 1)];
    for (i, r) in encode_ascii("SA1234G567", 5).unwrap().into_iter().enumerate() {
        set.push((13 + i as u16, r));
    }
    let low = holding_bank(0, &set);
    let high = holding_bank(60, &[(94, 2330), (95, 530), (96, 1), (116, 85)]);
    let inverter = Inverter::from_cache(RegisterCache::from_banks([&low, &high]));

    assert_eq!(inverter.model, Model::Hybrid);
    assert_eq!(inverter.max_inverter_power_w, Some(5000));
    assert_eq!(inverter.firmware_version.as_deref(), Some("D0.449-A0.449"));
    assert_eq!(inverter.serial_number(), Some("SA1234G567"));
    assert_eq!(inverter.eco_mode(), Some(true));
    assert_eq!(inverter.enable_discharge(), Some(true));
    assert_eq!(
        inverter.discharge_slot_1(),
        TimeSlot::from_hm((16, 0), (19, 0))
    );
    assert_eq!(
        inverter.charge_slot_1(),
        TimeSlot::from_hm((23, 30), (5, 30))
    );
    assert_eq!(inverter.charge_target_soc(), Some(85));
    // Zeroed date registers are not a valid date
    assert!(inverter.system_time().is_none());
    assert!(
        inverter
            .decode_warnings
            .iter()
            .any(|w| w.contains("system_time"))
    );
    // Input registers were never read
    assert!(inverter.battery_percent().is_none());
}
