//! # GivEnergy Local - inverter and battery client
//!
//! Polls and controls GivEnergy solar inverters and their batteries over the
//! local Modbus/TCP "transparent" protocol spoken by the WiFi data adapter.
//!
//! ## Features
//!
//! - **Async transport**: Tokio TCP client with heartbeat handling and frame resync
//! - **Typed telemetry**: Register catalogues decoded into named, typed values
//! - **Tolerant polling**: Bounded retries, garbled-frame detection, stale snapshots
//! - **Mode control**: Eco, timed discharge/export/charge as ordered register writes
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! - `modbus`: TCP transport, frame codec and message bodies
//! - `codec`: Register ↔ value conversion
//! - `planner`: Bank reads with retry, single-attempt writes
//! - `model`: Register catalogue, device views, mode → write plan table
//! - `coordinator`: Periodic polling and snapshot publication
//! - `controls`: Mode and setting requests
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing

pub mod codec;
pub mod config;
pub mod controls;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod modbus;
pub mod model;
pub mod planner;

// Re-export commonly used types
pub use config::Config;
pub use controls::{ModeController, ModeRequest, ServiceCall, Settable, TimeWindow};
pub use coordinator::{Coordinator, CoordinatorState, PollStatus};
pub use error::{GivEnergyError, Result};
pub use model::DeviceSnapshot;
pub use planner::{BankDescriptor, RequestPlanner, RetryPolicy};
