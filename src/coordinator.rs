//! Polling coordinator
//!
//! Reads every configured bank on a fixed interval, assembles a
//! [`DeviceSnapshot`] and publishes it through a `watch` channel. A failed
//! cycle keeps the previous snapshot and records why; the timer keeps going.
//! Snapshots with implausible readings are re-read a bounded number of times
//! before the cycle counts as failed. A refresh request runs a cycle
//! immediately and restarts the timer.

mod types;

pub use types::{CoordinatorState, PollStatus};

use crate::codec::{RegisterBank, RegisterCache};
use crate::config::PollingConfig;
use crate::error::{PollError, RequestError};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::model::{Battery, DeviceSnapshot, Inverter, check_inverter};
use crate::planner::{BankDescriptor, RequestPlanner};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, interval, sleep};

/// Owns the polling cycle and the published snapshot
pub struct Coordinator {
    planner: RequestPlanner,
    polling: PollingConfig,
    status_tx: watch::Sender<Arc<PollStatus>>,
    status_rx: watch::Receiver<Arc<PollStatus>>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
    refresh_tx: mpsc::UnboundedSender<()>,
    refresh_rx: mpsc::UnboundedReceiver<()>,
    logger: StructuredLogger,
}

impl Coordinator {
    pub fn new(planner: RequestPlanner, polling: &PollingConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(Arc::new(PollStatus::default()));
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let context =
            LogContext::new("coordinator").with_field("battery_slots", polling.battery_slots);
        Self {
            planner,
            polling: polling.clone(),
            status_tx,
            status_rx,
            shutdown_tx,
            shutdown_rx,
            refresh_tx,
            refresh_rx,
            logger: get_logger_with_context(context),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<PollStatus>> {
        self.status_rx.clone()
    }

    pub fn status(&self) -> Arc<PollStatus> {
        self.status_rx.borrow().clone()
    }

    pub fn latest_snapshot(&self) -> Option<Arc<DeviceSnapshot>> {
        self.status_rx.borrow().snapshot.clone()
    }

    pub fn planner(&self) -> &RequestPlanner {
        &self.planner
    }

    /// Sender that stops [`Coordinator::run`] when signalled
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    /// Request shutdown
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send(()).ok();
    }

    /// Sender that makes [`Coordinator::run`] poll ahead of the timer
    pub fn refresh_handle(&self) -> mpsc::UnboundedSender<()> {
        self.refresh_tx.clone()
    }

    /// Ask the running loop for an immediate cycle
    pub fn request_refresh(&self) {
        self.refresh_tx.send(()).ok();
    }

    /// Inverter banks in read order
    pub fn inverter_banks(&self) -> Vec<BankDescriptor> {
        let mut banks = vec![
            BankDescriptor::inverter_input(0),
            BankDescriptor::inverter_input(60),
            BankDescriptor::inverter_input(120),
            BankDescriptor::inverter_holding(0),
            BankDescriptor::inverter_holding(60),
            BankDescriptor::inverter_holding(120),
        ];
        if self.polling.read_holding_300 {
            banks.push(BankDescriptor::inverter_holding(300));
        }
        banks
    }

    fn publish(&self, update: impl FnOnce(&mut PollStatus)) {
        let mut next = (**self.status_rx.borrow()).clone();
        update(&mut next);
        let stale_after = Duration::from_millis(self.polling.stale_after_ms);
        next.stale = next
            .snapshot
            .as_ref()
            .map(|s| s.is_stale(Utc::now(), stale_after))
            .unwrap_or(false);
        self.status_tx.send_replace(Arc::new(next));
    }

    /// Read every bank and assemble a snapshot without checking or publishing it
    pub async fn read_snapshot(&self) -> Result<DeviceSnapshot, RequestError> {
        let mut inverter_banks: Vec<RegisterBank> = Vec::new();
        for desc in self.inverter_banks() {
            inverter_banks.push(self.planner.read_bank(&desc).await?);
        }

        let mut batteries = Vec::new();
        for slot in 0..self.polling.battery_slots {
            let desc = BankDescriptor::battery(slot);
            let already_read = inverter_banks.iter().find(|b| {
                b.slave == desc.slave
                    && b.register_type == desc.register_type
                    && b.base == desc.base
            });
            let bank = match already_read {
                Some(bank) => bank.clone(),
                None => self.planner.read_bank(&desc).await?,
            };
            match Battery::from_bank(slot, &bank) {
                Some(battery) => batteries.push(battery),
                None => self
                    .logger
                    .debug(&format!("No battery present in slot {}", slot)),
            }
        }

        let inverter = Inverter::from_cache(RegisterCache::from_banks(&inverter_banks));
        Ok(DeviceSnapshot::new(inverter, batteries))
    }

    /// Read a snapshot whose readings pass the plausibility checks
    ///
    /// Request failures end the cycle at once; implausible data is re-read up
    /// to `refresh_attempts` times in total.
    pub async fn refresh(&self) -> Result<DeviceSnapshot, PollError> {
        let attempts = self.polling.refresh_attempts.max(1);
        let delay = Duration::from_millis(self.polling.refresh_retry_delay_ms);
        let mut attempt = 1;
        loop {
            let snapshot = self.read_snapshot().await?;
            match check_inverter(&snapshot.inverter) {
                Ok(()) => return Ok(snapshot),
                Err(e) if attempt < attempts => {
                    self.logger.warn(&format!(
                        "Discarding read {}/{}: {}",
                        attempt, attempts, e
                    ));
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run one cycle and publish its outcome
    pub async fn poll_once(&self) -> Result<Arc<DeviceSnapshot>, PollError> {
        self.publish(|s| s.state = CoordinatorState::Polling);
        let started = Instant::now();
        let result = self.refresh().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(snapshot) => {
                for warning in snapshot.decode_warnings() {
                    self.logger.warn(&format!("Skipped field {}", warning));
                }
                let snapshot = Arc::new(snapshot);
                self.logger.debug(&format!(
                    "Poll completed in {} ms: {}",
                    duration_ms,
                    snapshot.summary()
                ));
                let published = Arc::clone(&snapshot);
                self.publish(move |s| {
                    s.state = CoordinatorState::Ready;
                    s.last_success = Some(published.timestamp);
                    s.snapshot = Some(published);
                    s.last_error = None;
                    s.total_polls += 1;
                    s.last_poll_duration_ms = Some(duration_ms);
                });
                Ok(snapshot)
            }
            Err(e) => {
                self.logger.error(&format!("Poll failed: {}", e));
                let reason = e.to_string();
                self.publish(move |s| {
                    s.state = CoordinatorState::Failed(reason.clone());
                    s.last_error = Some(reason);
                    s.total_polls += 1;
                    s.failed_polls += 1;
                    s.last_poll_duration_ms = Some(duration_ms);
                });
                Err(e)
            }
        }
    }

    /// Poll on the configured interval until shutdown is requested
    pub async fn run(&mut self) {
        self.logger.info(&format!(
            "Starting polling every {} ms ({} battery slots)",
            self.polling.interval_ms, self.polling.battery_slots
        ));
        let mut poll_interval = interval(Duration::from_millis(self.polling.interval_ms.max(1)));

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    // Failures are published; the next tick retries
                    let _ = self.poll_once().await;
                }
                Some(()) = self.refresh_rx.recv() => {
                    // Pending requests are covered by this cycle
                    while self.refresh_rx.try_recv().is_ok() {}
                    self.logger.debug("Refresh requested");
                    let _ = self.poll_once().await;
                    poll_interval.reset();
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown requested");
                    break;
                }
            }
        }
        self.logger.info("Coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::error::TransportError;
    use crate::modbus::Transport;
    use crate::modbus::pdu::{Request, Response, Serial};
    use crate::planner::RetryPolicy;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Answers every read with a mostly zero bank: a serial in holding 0
    /// and lifetime totals in input 0
    struct FakeInverter {
        fail: Arc<AtomicBool>,
        reads: Arc<AtomicUsize>,
        /// Input 0 reads left that report an overheated heatsink
        overheated: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Transport for FakeInverter {
        async fn send(&mut self, request: &Request) -> Result<Response, TransportError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::unreachable("unplugged"));
            }
            match request {
                Request::ReadRegisters {
                    slave,
                    register_type,
                    base,
                    count,
                } => {
                    let mut values = vec![0u16; *count as usize];
                    if *register_type == crate::modbus::RegisterType::Holding && *base == 0 {
                        values[0] = 0x2001;
                        values[13..18].copy_from_slice(&[0x5341, 0x3132, 0x3334, 0x4735, 0x3637]);
                    }
                    if *register_type == crate::modbus::RegisterType::Input && *base == 0 {
                        values[22] = 5120;
                        values[33] = 4400;
                        values[46] = 9876;
                        let hot = self
                            .overheated
                            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                            .is_ok();
                        if hot {
                            values[41] = 1500;
                        }
                    }
                    Ok(Response::ReadRegisters {
                        slave: *slave,
                        register_type: *register_type,
                        base: *base,
                        values,
                        inverter_serial: Serial::default(),
                    })
                }
                Request::WriteHoldingRegister { .. } => {
                    Err(TransportError::corrupt("unexpected write"))
                }
            }
        }
    }

    struct Handles {
        fail: Arc<AtomicBool>,
        reads: Arc<AtomicUsize>,
        overheated: Arc<AtomicUsize>,
    }

    fn coordinator(polling: PollingConfig) -> (Coordinator, Handles) {
        let handles = Handles {
            fail: Arc::new(AtomicBool::new(false)),
            reads: Arc::new(AtomicUsize::new(0)),
            overheated: Arc::new(AtomicUsize::new(0)),
        };
        let transport = FakeInverter {
            fail: handles.fail.clone(),
            reads: handles.reads.clone(),
            overheated: handles.overheated.clone(),
        };
        let planner = RequestPlanner::new(Box::new(transport), RetryPolicy::new(3));
        (Coordinator::new(planner, &polling), handles)
    }

    #[test]
    fn test_bank_list_follows_config() {
        let (c, _) = coordinator(PollingConfig::default());
        assert_eq!(c.inverter_banks().len(), 7);
        assert_eq!(
            c.logger.context().extra_fields.get("battery_slots").map(String::as_str),
            Some("1")
        );
        let (c, _) = coordinator(PollingConfig {
            read_holding_300: false,
            ..Default::default()
        });
        assert_eq!(c.inverter_banks().len(), 6);
        assert_eq!(c.status().state, CoordinatorState::Idle);
    }

    #[tokio::test]
    async fn test_successful_cycle_publishes_ready_snapshot() {
        let (c, handles) = coordinator(PollingConfig::default());
        let mut rx = c.subscribe();
        let snapshot = c.poll_once().await.unwrap();

        assert_eq!(snapshot.inverter.serial_number(), Some("SA1234G567"));
        // Slot 0 shares IR(60) with the inverter bank list
        assert_eq!(handles.reads.load(Ordering::SeqCst), 7);
        assert!(snapshot.batteries.is_empty());

        assert!(rx.has_changed().unwrap());
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.state, CoordinatorState::Ready);
        assert_eq!(status.total_polls, 1);
        assert!(!status.stale);
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_previous_snapshot() {
        let (c, handles) = coordinator(PollingConfig {
            stale_after_ms: 0,
            ..Default::default()
        });
        let first = c.poll_once().await.unwrap();

        handles.fail.store(true, Ordering::SeqCst);
        let err = c.poll_once().await.unwrap_err();
        assert!(matches!(
            err,
            PollError::Request(RequestError::Exhausted { attempts: 3, .. })
        ));

        let status = c.status();
        assert!(matches!(status.state, CoordinatorState::Failed(_)));
        assert_eq!(status.failed_polls, 1);
        assert_eq!(status.total_polls, 2);
        assert!(status.last_error.is_some());
        assert!(Arc::ptr_eq(status.snapshot.as_ref().unwrap(), &first));
        tokio::time::sleep(Duration::from_millis(5)).await;
        c.publish(|_| {});
        assert!(c.status().stale);
    }

    #[tokio::test]
    async fn test_implausible_read_is_retried_within_cycle() {
        let (c, handles) = coordinator(PollingConfig {
            refresh_retry_delay_ms: 0,
            ..Default::default()
        });
        handles.overheated.store(1, Ordering::SeqCst);

        let snapshot = c.poll_once().await.unwrap();
        assert_eq!(handles.reads.load(Ordering::SeqCst), 14);
        assert_eq!(
            snapshot.inverter.get("temp_inverter_heatsink").and_then(Value::as_f64),
            Some(0.0)
        );
        assert_eq!(c.status().failed_polls, 0);
    }

    #[tokio::test]
    async fn test_persistently_implausible_cycle_fails() {
        let (c, handles) = coordinator(PollingConfig {
            refresh_retry_delay_ms: 0,
            ..Default::default()
        });
        let first = c.poll_once().await.unwrap();
        handles.reads.store(0, Ordering::SeqCst);
        handles.overheated.store(3, Ordering::SeqCst);

        let err = c.poll_once().await.unwrap_err();
        assert!(matches!(
            err,
            PollError::Implausible {
                field: "temp_inverter_heatsink",
                ..
            }
        ));
        assert_eq!(handles.reads.load(Ordering::SeqCst), 21);

        let status = c.status();
        assert_eq!(status.failed_polls, 1);
        assert!(status.last_error.as_deref().unwrap().contains("temp_inverter_heatsink"));
        assert!(Arc::ptr_eq(status.snapshot.as_ref().unwrap(), &first));
    }

    #[tokio::test]
    async fn test_refresh_request_polls_ahead_of_timer() {
        let (mut c, handles) = coordinator(PollingConfig {
            interval_ms: 3_600_000,
            ..Default::default()
        });
        let mut rx = c.subscribe();
        let refresh = c.refresh_handle();
        let shutdown = c.shutdown_handle();
        let handle = tokio::spawn(async move {
            c.run().await;
        });
        rx.wait_for(|s| s.total_polls == 1).await.unwrap();

        refresh.send(()).unwrap();
        refresh.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.total_polls >= 2))
            .await
            .unwrap()
            .unwrap();
        shutdown.send(()).unwrap();
        handle.await.unwrap();
        assert!(handles.reads.load(Ordering::SeqCst) >= 14);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (mut c, _) = coordinator(PollingConfig {
            interval_ms: 10,
            ..Default::default()
        });
        let mut rx = c.subscribe();
        let shutdown = c.shutdown_handle();
        let handle = tokio::spawn(async move {
            c.run().await;
            c
        });
        rx.wait_for(|s| s.is_ready()).await.unwrap();
        shutdown.send(()).unwrap();
        let c = handle.await.unwrap();
        assert!(c.latest_snapshot().is_some());
    }
}
