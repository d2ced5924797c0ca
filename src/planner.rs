//! Request planner and retry engine
//!
//! Bank reads go through a [`RetryPolicy`]; writes are sent exactly once.
//! The transport sits behind a `tokio::sync::Mutex` so polling and control
//! requests queue behind whatever exchange is in flight.

use crate::codec::RegisterBank;
use crate::error::{RequestError, TransportError};
use crate::logging::{LogContext, StructuredLogger, get_logger, get_logger_with_context};
use crate::model::registers::is_write_safe;
use crate::modbus::Transport;
use crate::modbus::pdu::{INVERTER_SLAVE, MAX_REGISTER_COUNT, Request, Response, is_suspicious};
use crate::modbus::RegisterType;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Transport shared between the coordinator and the controller
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Bounded retry for operations whose transport failures are transient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3 }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempts are used up. Attempts are numbered from 1.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, RequestError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(RequestError::Transport(last)) if attempt >= self.attempts => {
                    return Err(RequestError::Exhausted {
                        attempts: attempt,
                        last,
                    });
                }
                Err(_) => continue,
            }
        }
    }
}

/// Which contiguous block of registers to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BankDescriptor {
    pub slave: u8,
    pub register_type: RegisterType,
    pub base: u16,
    pub count: u16,
}

impl BankDescriptor {
    pub fn new(slave: u8, register_type: RegisterType, base: u16, count: u16) -> Self {
        Self {
            slave,
            register_type,
            base,
            count,
        }
    }

    pub fn inverter_input(base: u16) -> Self {
        Self::new(INVERTER_SLAVE, RegisterType::Input, base, MAX_REGISTER_COUNT)
    }

    pub fn inverter_holding(base: u16) -> Self {
        Self::new(INVERTER_SLAVE, RegisterType::Holding, base, MAX_REGISTER_COUNT)
    }

    /// Input registers 60-119 of the battery in `slot`
    pub fn battery(slot: u8) -> Self {
        Self::new(
            INVERTER_SLAVE.wrapping_add(slot),
            RegisterType::Input,
            60,
            MAX_REGISTER_COUNT,
        )
    }

    pub fn to_request(&self) -> Request {
        Request::read(self.slave, self.register_type, self.base, self.count)
    }
}

impl fmt::Display for BankDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}+{})@{:#04x}",
            self.register_type.prefix(),
            self.base,
            self.count,
            self.slave
        )
    }
}

/// Issues reads and writes against the shared transport
#[derive(Clone)]
pub struct RequestPlanner {
    transport: SharedTransport,
    read_policy: RetryPolicy,
    logger: StructuredLogger,
}

impl RequestPlanner {
    pub fn new(transport: Box<dyn Transport>, read_policy: RetryPolicy) -> Self {
        Self::from_shared(Arc::new(Mutex::new(transport)), read_policy)
    }

    pub fn from_shared(transport: SharedTransport, read_policy: RetryPolicy) -> Self {
        Self {
            transport,
            read_policy,
            logger: get_logger("planner"),
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.logger = get_logger_with_context(LogContext::new("planner").with_device(device));
        self
    }

    pub fn transport(&self) -> SharedTransport {
        Arc::clone(&self.transport)
    }

    pub fn read_policy(&self) -> RetryPolicy {
        self.read_policy
    }

    /// Whether the underlying transport reports a live connection
    pub async fn connection_status(&self) -> Option<bool> {
        self.transport.lock().await.connection_status()
    }

    async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        let mut transport = self.transport.lock().await;
        transport.send(request).await
    }

    /// Read one bank, retrying transport failures and garbled banks
    pub async fn read_bank(&self, bank: &BankDescriptor) -> Result<RegisterBank, RequestError> {
        if bank.count == 0 || bank.count > MAX_REGISTER_COUNT {
            self.logger.warn(&format!(
                "Refusing to read {}: count must be 1-{}",
                bank, MAX_REGISTER_COUNT
            ));
            return Err(RequestError::InvalidRequest {
                message: format!(
                    "{} asks for {} registers, at most {} per request",
                    bank, bank.count, MAX_REGISTER_COUNT
                ),
            });
        }
        let request = bank.to_request();
        let result = self
            .read_policy
            .run(|attempt| {
                let request = &request;
                async move {
                    let response = self.send(request).await;
                    let outcome = response
                        .map_err(RequestError::from)
                        .and_then(|r| Self::validate_read(bank, r));
                    if let Err(e) = &outcome
                        && e.is_retryable()
                    {
                        self.logger.warn(&format!(
                            "{} attempt {}/{} failed: {}",
                            bank, attempt, self.read_policy.attempts, e
                        ));
                    }
                    outcome
                }
            })
            .await;

        if let Err(e) = &result {
            self.logger.error(&format!("Reading {} failed: {}", bank, e));
        }
        result
    }

    fn validate_read(
        bank: &BankDescriptor,
        response: Response,
    ) -> Result<RegisterBank, RequestError> {
        match response {
            Response::ReadRegisters {
                register_type,
                base,
                values,
                ..
            } => {
                if register_type != bank.register_type
                    || base != bank.base
                    || values.len() != bank.count as usize
                {
                    return Err(TransportError::corrupt(format!(
                        "asked for {} but got {}({}+{})",
                        bank,
                        register_type.prefix(),
                        base,
                        values.len()
                    ))
                    .into());
                }
                if is_suspicious(base, &values) {
                    return Err(TransportError::corrupt(format!(
                        "{} carries the known garbage pattern",
                        bank
                    ))
                    .into());
                }
                Ok(RegisterBank::new(register_type, bank.slave, base, values))
            }
            Response::Exception { slave, function } => {
                Err(RequestError::Rejected { slave, function })
            }
            other => Err(TransportError::corrupt(format!(
                "unexpected response to {}: {:?}",
                bank, other
            ))
            .into()),
        }
    }

    /// Write one holding register; exactly one transport call, no retry
    pub async fn write_register(&self, register: u16, value: u16) -> Result<(), RequestError> {
        if !is_write_safe(register) {
            self.logger
                .warn(&format!("Refusing write to unsafe register HR({})", register));
            return Err(RequestError::UnsafeRegister { register });
        }

        let request = Request::write(register, value);
        self.logger.info(&format!("Writing HR({})={}", register, value));
        match self.send(&request).await? {
            Response::WriteHoldingRegister {
                register: echoed,
                value: echoed_value,
                ..
            } if echoed == register => {
                if echoed_value != value {
                    return Err(TransportError::corrupt(format!(
                        "HR({}) echoed {} instead of {}",
                        register, echoed_value, value
                    ))
                    .into());
                }
                Ok(())
            }
            Response::Exception { slave, function } => {
                Err(RequestError::Rejected { slave, function })
            }
            other => Err(TransportError::corrupt(format!(
                "unexpected response to {}: {:?}",
                request, other
            ))
            .into()),
        }
    }

    /// Write consecutive holding registers starting at `address`, one
    /// request per register, stopping at the first failure. Returns the
    /// number of registers written.
    pub async fn write_registers(
        &self,
        address: u16,
        values: &[u16],
    ) -> Result<usize, RequestError> {
        for register in address..address.saturating_add(values.len() as u16) {
            if !is_write_safe(register) {
                return Err(RequestError::UnsafeRegister { register });
            }
        }
        for (offset, value) in values.iter().enumerate() {
            self.write_register(address + offset as u16, *value).await?;
        }
        Ok(values.len())
    }
}
