//! Device model for GivEnergy inverters and batteries
//!
//! Holds the register catalogues, the decoded inverter and battery views,
//! the immutable [`DeviceSnapshot`], plausibility checks and the mode → write
//! plan table.

pub mod battery;
pub mod inverter;
pub mod plan;
pub mod quality;
pub mod registers;
pub mod snapshot;

pub use battery::Battery;
pub use inverter::{Generation, Inverter, Model};
pub use plan::{ResolvedMode, SettingCommand, WritePlan, WriteStep, plan_for};
pub use quality::{QualityCheck, check_inverter};
pub use snapshot::DeviceSnapshot;
