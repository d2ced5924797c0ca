#![allow(dead_code)]

use givenergy_local::codec::encode_ascii;
use givenergy_local::config::PollingConfig;
use givenergy_local::coordinator::Coordinator;
use givenergy_local::error::TransportError;
use givenergy_local::modbus::pdu::{Request, Response, Serial};
use givenergy_local::modbus::{RegisterType, Transport};
use givenergy_local::planner::{RequestPlanner, RetryPolicy};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

/// How the fake device answers the next read
#[derive(Debug, Clone)]
pub enum ReadFault {
    Unreachable,
    Corrupt,
    Exception,
}

/// Register image plus a log of everything the client asked for
#[derive(Debug, Default)]
pub struct DeviceState {
    pub registers: BTreeMap<(u8, RegisterType, u16), u16>,
    pub calls: usize,
    pub writes: Vec<(u16, u16)>,
    pub read_faults: VecDeque<ReadFault>,
    /// Every read fails with this until cleared
    pub offline: bool,
    /// Writes to this register are answered with an exception
    pub reject_write: Option<u16>,
}

impl DeviceState {
    pub fn set(&mut self, slave: u8, register_type: RegisterType, address: u16, values: &[u16]) {
        for (offset, value) in values.iter().enumerate() {
            self.registers
                .insert((slave, register_type, address + offset as u16), *value);
        }
    }

    pub fn set_holding(&mut self, address: u16, values: &[u16]) {
        self.set(INVERTER, RegisterType::Holding, address, values);
    }

    pub fn set_input(&mut self, address: u16, values: &[u16]) {
        self.set(INVERTER, RegisterType::Input, address, values);
    }

    fn answer(&mut self, request: &Request) -> Result<Response, TransportError> {
        self.calls += 1;
        match request {
            Request::ReadRegisters {
                slave,
                register_type,
                base,
                count,
            } => {
                if self.offline {
                    return Err(TransportError::unreachable("connection refused"));
                }
                match self.read_faults.pop_front() {
                    Some(ReadFault::Unreachable) => {
                        return Err(TransportError::unreachable("timed out"));
                    }
                    Some(ReadFault::Corrupt) => {
                        return Err(TransportError::corrupt("bad crc"));
                    }
                    Some(ReadFault::Exception) => {
                        return Ok(Response::Exception {
                            slave: *slave,
                            function: register_type.read_function(),
                        });
                    }
                    None => {}
                }
                let values = (*base..*base + *count)
                    .map(|a| {
                        self.registers
                            .get(&(*slave, *register_type, a))
                            .copied()
                            .unwrap_or(0)
                    })
                    .collect();
                Ok(Response::ReadRegisters {
                    slave: *slave,
                    register_type: *register_type,
                    base: *base,
                    values,
                    inverter_serial: Serial::default(),
                })
            }
            Request::WriteHoldingRegister {
                slave,
                register,
                value,
            } => {
                if self.reject_write == Some(*register) {
                    return Ok(Response::Exception {
                        slave: *slave,
                        function: request.function(),
                    });
                }
                self.writes.push((*register, *value));
                self.registers
                    .insert((INVERTER, RegisterType::Holding, *register), *value);
                Ok(Response::WriteHoldingRegister {
                    slave: *slave,
                    register: *register,
                    value: *value,
                    inverter_serial: Serial::default(),
                })
            }
        }
    }
}

pub const INVERTER: u8 = 0x32;

/// In-memory transport backed by a shared [`DeviceState`]
#[derive(Clone, Default)]
pub struct FakeDevice {
    pub state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
    /// A hybrid inverter with serial SA1234G567, a 22:00-06:00 charge slot,
    /// an 80% charge target and non-zero lifetime energy totals
    pub fn hybrid() -> Self {
        let device = Self::default();
        {
            let mut state = device.state.lock().unwrap();
            state.set_holding(0, &[0x2001]);
            state.set_holding(13, &encode_ascii("SA1234G567", 5).unwrap());
            state.set_holding(94, &[2200, 600]);
            state.set_holding(116, &[80]);
            state.set_input(21, &[0, 5120]);
            state.set_input(32, &[0, 4400]);
            state.set_input(45, &[0, 9876]);
            state.set_input(59, &[64]);
        }
        device
    }

    pub fn set_input(&self, address: u16, values: &[u16]) {
        self.state.lock().unwrap().set_input(address, values);
    }

    pub fn set_holding(&self, address: u16, values: &[u16]) {
        self.state.lock().unwrap().set_holding(address, values);
    }

    /// Attach a battery with `serial` and `soc` in `slot`
    pub fn with_battery(self, slot: u8, serial: &str, soc: u16) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let slave = INVERTER + slot;
            state.set(slave, RegisterType::Input, 110, &encode_ascii(serial, 5).unwrap());
            state.set(slave, RegisterType::Input, 100, &[soc]);
            state.set(slave, RegisterType::Input, 96, &[250]);
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn push_read_faults(&self, faults: impl IntoIterator<Item = ReadFault>) {
        self.state.lock().unwrap().read_faults.extend(faults);
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn reject_write(&self, register: u16) {
        self.state.lock().unwrap().reject_write = Some(register);
    }

    pub fn planner(&self) -> RequestPlanner {
        RequestPlanner::new(Box::new(self.clone()), RetryPolicy::default())
    }

    pub fn coordinator(&self, polling: PollingConfig) -> Coordinator {
        Coordinator::new(self.planner(), &polling)
    }
}

#[async_trait::async_trait]
impl Transport for FakeDevice {
    async fn send(&mut self, request: &Request) -> Result<Response, TransportError> {
        self.answer(request)
    }
}

impl FakeDevice {
    fn answer(&self, request: &Request) -> Result<Response, TransportError> {
        self.state.lock().unwrap().answer(request)
    }
}
