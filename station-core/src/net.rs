//! Network session manager: the connect/retry state machine.
//!
//! Link-layer notifications arrive from the driver's callback context as
//! [`LinkEvent`]s and are dispatched into a single transition function.
//! The handler only mutates state and requests a status color; the one
//! blocking entry point is [`NetSession::wait_until_connected`], used
//! once during startup.

use std::net::Ipv4Addr;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::status::{StatusColor, StatusLed, StatusReporter};

/// Asynchronous notifications from the link driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The station interface started; time to issue a connect request.
    LinkStarted,
    /// Association lost (or the initial attempt failed).
    LinkLost,
    /// DHCP handed us an address; the link is usable.
    AddressAcquired(Ipv4Addr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    /// Reconnecting; carries the current attempt number (1-based).
    Retrying(u32),
    /// Retry budget exhausted. Terminal until an external restart.
    Failed,
}

/// Bounded reconnect budget. `current_attempt <= max_attempts` always;
/// reset to zero on every successful connection.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    current_attempt: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            current_attempt: 0,
        }
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Claims the next attempt, or reports the budget spent.
    fn advance(&mut self) -> Option<u32> {
        if self.current_attempt < self.max_attempts {
            self.current_attempt += 1;
            Some(self.current_attempt)
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Connect request failed inside the driver. Carries the driver's raw
/// error code for the log line.
#[derive(Debug)]
pub struct LinkError(pub i32);

/// The low-level radio/association driver, reduced to what the state
/// machine needs. Notifications arrive separately as [`LinkEvent`]s.
pub trait LinkDriver {
    fn connect(&mut self) -> Result<(), LinkError>;
    /// Called once per successful connection so large transfers are not
    /// interrupted by modem sleep.
    fn disable_power_save(&mut self);
}

/// Outcome of the bounded startup wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Connected,
    Failed,
    TimedOut,
}

struct NetInner {
    state: ConnectionState,
    retry: RetryPolicy,
}

/// Owns the connection state and retry budget. Shared between the
/// notification callback context and the startup task.
pub struct NetSession {
    inner: Mutex<NetInner>,
    settled: Condvar,
}

impl NetSession {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            inner: Mutex::new(NetInner {
                state: ConnectionState::Idle,
                retry: RetryPolicy::new(max_attempts),
            }),
            settled: Condvar::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().unwrap().state
    }

    pub fn current_attempt(&self) -> u32 {
        self.inner.lock().unwrap().retry.current_attempt()
    }

    /// The single transition function. Runs in the notification callback
    /// context and must stay short: state changes, a connect request and
    /// a status request only.
    pub fn handle_event<D, L>(&self, event: LinkEvent, driver: &mut D, status: &StatusReporter<L>)
    where
        D: LinkDriver + ?Sized,
        L: StatusLed,
    {
        let mut inner = self.inner.lock().unwrap();
        match event {
            LinkEvent::LinkStarted => {
                info!("link started, issuing connect request");
                inner.retry.reset();
                inner.state = ConnectionState::Connecting;
                if let Err(e) = driver.connect() {
                    warn!("connect request failed: {:?}", e);
                }
            }
            LinkEvent::LinkLost => match inner.state {
                ConnectionState::Idle => {
                    debug!("link lost while idle, ignoring");
                }
                ConnectionState::Failed => {
                    debug!("link lost while already failed, ignoring");
                }
                ConnectionState::Connecting
                | ConnectionState::Retrying(_)
                | ConnectionState::Connected => match inner.retry.advance() {
                    Some(attempt) => {
                        info!(
                            "link lost, reconnect attempt {} of {}",
                            attempt,
                            inner.retry.max_attempts()
                        );
                        inner.state = ConnectionState::Retrying(attempt);
                        if let Err(e) = driver.connect() {
                            warn!("connect request failed: {:?}", e);
                        }
                        status.set_connectivity(StatusColor::Retrying);
                    }
                    None => {
                        error!(
                            "giving up after {} reconnect attempts",
                            inner.retry.max_attempts()
                        );
                        inner.state = ConnectionState::Failed;
                        status.set_connectivity(StatusColor::Failed);
                        self.settled.notify_all();
                    }
                },
            },
            LinkEvent::AddressAcquired(ip) => {
                info!("address acquired: {}", ip);
                inner.retry.reset();
                inner.state = ConnectionState::Connected;
                status.set_connectivity(StatusColor::Connected);
                driver.disable_power_save();
                self.settled.notify_all();
            }
        }
    }

    /// Blocks the caller until the session settles in `Connected` or
    /// `Failed`, or the timeout elapses.
    pub fn wait_until_connected(&self, timeout: Duration) -> WaitOutcome {
        let inner = self.inner.lock().unwrap();
        let (inner, result) = self
            .settled
            .wait_timeout_while(inner, timeout, |inner| {
                !matches!(
                    inner.state,
                    ConnectionState::Connected | ConnectionState::Failed
                )
            })
            .unwrap();
        if result.timed_out()
            && !matches!(
                inner.state,
                ConnectionState::Connected | ConnectionState::Failed
            )
        {
            WaitOutcome::TimedOut
        } else if inner.state == ConnectionState::Connected {
            WaitOutcome::Connected
        } else {
            WaitOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct MockDriver {
        connects: u32,
        power_save_disables: u32,
    }

    impl LinkDriver for MockDriver {
        fn connect(&mut self) -> Result<(), LinkError> {
            self.connects += 1;
            Ok(())
        }

        fn disable_power_save(&mut self) {
            self.power_save_disables += 1;
        }
    }

    #[derive(Default)]
    struct TraceLed {
        trace: Vec<Option<Rgb>>,
    }

    use crate::status::Rgb;

    impl StatusLed for Arc<Mutex<TraceLed>> {
        fn set_all(&mut self, color: Rgb) {
            self.lock().unwrap().trace.push(Some(color));
        }

        fn clear(&mut self) {
            self.lock().unwrap().trace.push(None);
        }
    }

    fn harness() -> (NetSession, MockDriver, StatusReporter<Arc<Mutex<TraceLed>>>, Arc<Mutex<TraceLed>>) {
        let led = Arc::new(Mutex::new(TraceLed::default()));
        let reporter = StatusReporter::new(led.clone());
        (NetSession::new(5), MockDriver::default(), reporter, led)
    }

    #[test]
    fn retry_budget_is_bounded() {
        let (session, mut driver, status, _led) = harness();
        session.handle_event(LinkEvent::LinkStarted, &mut driver, &status);
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert_eq!(driver.connects, 1);

        for n in 1..=5 {
            session.handle_event(LinkEvent::LinkLost, &mut driver, &status);
            assert_eq!(session.state(), ConnectionState::Retrying(n));
        }
        assert_eq!(driver.connects, 6);

        // Sixth disconnect exhausts the budget: Failed, no connect issued.
        session.handle_event(LinkEvent::LinkLost, &mut driver, &status);
        assert_eq!(session.state(), ConnectionState::Failed);
        assert_eq!(driver.connects, 6);

        // Further disconnects are no-ops.
        session.handle_event(LinkEvent::LinkLost, &mut driver, &status);
        session.handle_event(LinkEvent::LinkLost, &mut driver, &status);
        assert_eq!(session.state(), ConnectionState::Failed);
        assert_eq!(driver.connects, 6);
    }

    #[test]
    fn failed_is_reported_exactly_once() {
        let (session, mut driver, status, led) = harness();
        session.handle_event(LinkEvent::LinkStarted, &mut driver, &status);
        for _ in 0..8 {
            session.handle_event(LinkEvent::LinkLost, &mut driver, &status);
        }
        let failed_rgb = StatusColor::Failed.rgb();
        let failures = led
            .lock()
            .unwrap()
            .trace
            .iter()
            .filter(|c| **c == failed_rgb)
            .count();
        assert_eq!(failures, 1);
    }

    #[test]
    fn successful_connection_resets_the_budget() {
        let (session, mut driver, status, _led) = harness();
        session.handle_event(LinkEvent::LinkStarted, &mut driver, &status);
        for _ in 0..3 {
            session.handle_event(LinkEvent::LinkLost, &mut driver, &status);
        }
        session.handle_event(
            LinkEvent::AddressAcquired(Ipv4Addr::new(192, 168, 1, 40)),
            &mut driver,
            &status,
        );
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.current_attempt(), 0);
        assert_eq!(driver.power_save_disables, 1);

        // Counting starts from 1 again after a drop.
        session.handle_event(LinkEvent::LinkLost, &mut driver, &status);
        assert_eq!(session.state(), ConnectionState::Retrying(1));
    }

    #[test]
    fn midrun_reconnect_latches_the_connected_color() {
        let (session, mut driver, status, led) = harness();
        session.handle_event(LinkEvent::LinkStarted, &mut driver, &status);
        session.handle_event(
            LinkEvent::AddressAcquired(Ipv4Addr::new(10, 0, 0, 7)),
            &mut driver,
            &status,
        );
        session.handle_event(LinkEvent::LinkLost, &mut driver, &status);
        session.handle_event(
            LinkEvent::AddressAcquired(Ipv4Addr::new(10, 0, 0, 7)),
            &mut driver,
            &status,
        );
        assert_eq!(session.state(), ConnectionState::Connected);

        // The handler never pushes Off; after a mid-run reconnect green
        // stays on until the next status request. Only the startup path
        // clears it, from the orchestrator after the wait returns.
        let expected = vec![
            StatusColor::Connected.rgb(),
            StatusColor::Retrying.rgb(),
            StatusColor::Connected.rgb(),
        ];
        assert_eq!(led.lock().unwrap().trace, expected);
    }

    #[test]
    fn five_drops_then_address_scenario() {
        let (session, mut driver, status, led) = harness();
        session.handle_event(LinkEvent::LinkStarted, &mut driver, &status);
        for n in 1..=5 {
            session.handle_event(LinkEvent::LinkLost, &mut driver, &status);
            assert_eq!(session.state(), ConnectionState::Retrying(n));
        }
        session.handle_event(
            LinkEvent::AddressAcquired(Ipv4Addr::new(10, 0, 0, 7)),
            &mut driver,
            &status,
        );
        assert_eq!(session.state(), ConnectionState::Connected);

        let expected: Vec<Option<Rgb>> = std::iter::repeat(StatusColor::Retrying.rgb())
            .take(5)
            .chain(std::iter::once(StatusColor::Connected.rgb()))
            .collect();
        assert_eq!(led.lock().unwrap().trace, expected);
    }

    #[test]
    fn wait_times_out_while_unsettled() {
        let session = NetSession::new(3);
        assert_eq!(
            session.wait_until_connected(Duration::from_millis(20)),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn wait_observes_failure() {
        let (session, mut driver, status, _led) = harness();
        session.handle_event(LinkEvent::LinkStarted, &mut driver, &status);
        for _ in 0..6 {
            session.handle_event(LinkEvent::LinkLost, &mut driver, &status);
        }
        assert_eq!(
            session.wait_until_connected(Duration::from_millis(20)),
            WaitOutcome::Failed
        );
    }

    #[test]
    fn wait_wakes_on_connection() {
        let session = Arc::new(NetSession::new(3));
        let waiter = {
            let session = session.clone();
            std::thread::spawn(move || session.wait_until_connected(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));

        let led = Arc::new(Mutex::new(TraceLed::default()));
        let status = StatusReporter::new(led);
        let mut driver = MockDriver::default();
        session.handle_event(
            LinkEvent::AddressAcquired(Ipv4Addr::new(172, 16, 0, 2)),
            &mut driver,
            &status,
        );
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Connected);
    }
}
