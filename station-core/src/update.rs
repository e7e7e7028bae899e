//! Update session manager: the OTA lifecycle state machine.
//!
//! Strictly sequential: Idle → Opening → DescriptorRead → Validating →
//! Transferring → Verifying → Committing → Succeeded, with any step able
//! to drop to Aborted(reason). At most one session is live at a time,
//! and every path out of an open transfer session releases it exactly
//! once (finish or abort, never both, never neither).

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::rollback::SystemImage;
use crate::status::{StatusColor, StatusLed, StatusReporter};

/// How long the success color holds before the restart request.
const SUCCESS_HOLD: Duration = Duration::from_secs(2);

/// Why an update session terminated early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The transfer collaborator could not open a session.
    OpenFailed,
    /// The image descriptor could not be read.
    DescriptorUnreadable,
    /// Candidate version equals the running version.
    SameVersion,
    /// Candidate security version is below the hardware floor.
    DowngradeRejected,
    /// A transport error interrupted the chunk loop.
    TransferFailed,
    /// The loop finished but the collaborator reports missing data.
    IncompleteImage,
    /// Finish-time cryptographic/structural validation failed.
    ImageCorrupt,
    /// Validation passed but activating the new image failed.
    CommitFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Opening,
    DescriptorRead,
    Validating,
    Transferring { bytes_read: usize },
    Verifying,
    Committing,
    Succeeded,
    Aborted(AbortReason),
}

/// Metadata read from the image header before the image is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub version: String,
    pub security_version: u32,
    pub target_hardware: String,
}

/// Opaque transport failure; carries the collaborator's message for the log.
#[derive(Debug)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure modes of the finish/commit step.
#[derive(Debug)]
pub enum FinishError {
    /// The received image failed validation; data transferred fine but
    /// the image is not trustworthy.
    Corrupt(String),
    /// The image verified but could not be made bootable.
    Commit(String),
}

/// Progress report from one chunk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// More data follows; `bytes_read` is the running total.
    InProgress { bytes_read: usize },
    Done,
}

/// The secure transport and firmware-transfer collaborator.
///
/// `finish` and `abort` both consume the session: whichever runs is the
/// single release point for the collaborator's resources.
pub trait UpdateTransport {
    type Session;

    fn open(&mut self, source: &str) -> Result<Self::Session, TransportError>;
    fn read_descriptor(&mut self, session: &mut Self::Session)
        -> Result<ImageDescriptor, TransportError>;
    fn read_next_chunk(&mut self, session: &mut Self::Session)
        -> Result<ChunkStatus, TransportError>;
    fn is_complete(&mut self, session: &Self::Session) -> bool;
    fn finish(&mut self, session: Self::Session) -> Result<(), FinishError>;
    fn abort(&mut self, session: Self::Session);
}

/// Device-level effects the session needs at the very end.
pub trait Platform {
    fn delay(&mut self, duration: Duration);
    fn restart(&mut self);
}

/// Which validation gates are enforced. Both default on; development
/// builds may switch either off, but the downgrade gate is the one
/// irreversible safety mechanism when enabled.
#[derive(Debug, Clone, Copy)]
pub struct UpdatePolicy {
    pub check_same_version: bool,
    pub check_downgrade: bool,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            check_same_version: true,
            check_downgrade: true,
        }
    }
}

/// Indicator action for one transfer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkStep {
    On,
    Off,
}

/// Low-rate pulse tied to transfer-chunk cadence, so indicator pushes
/// never starve the transfer loop. One On and one Off per period.
pub struct ProgressBlinker {
    period: u32,
    ticks: u32,
}

impl ProgressBlinker {
    pub const DEFAULT_PERIOD: u32 = 10;

    pub fn new() -> Self {
        Self::with_period(Self::DEFAULT_PERIOD)
    }

    pub fn with_period(period: u32) -> Self {
        Self {
            period: period.max(2),
            ticks: 0,
        }
    }

    pub fn tick(&mut self) -> Option<BlinkStep> {
        self.ticks = self.ticks.wrapping_add(1);
        match self.ticks % self.period {
            0 => Some(BlinkStep::On),
            p if p == self.period / 2 => Some(BlinkStep::Off),
            _ => None,
        }
    }
}

impl Default for ProgressBlinker {
    fn default() -> Self {
        Self::new()
    }
}

/// A second `begin` while a session is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    AlreadyInProgress,
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::AlreadyInProgress => f.write_str("an update session is already running"),
        }
    }
}

impl std::error::Error for UpdateError {}

/// Owns the update lifecycle state. Lives for the process lifetime; the
/// session itself is created per `run` call and reset to Idle on every
/// terminal outcome.
pub struct UpdateManager {
    state: Mutex<UpdateState>,
}

impl UpdateManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(UpdateState::Idle),
        }
    }

    pub fn state(&self) -> UpdateState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: UpdateState) {
        *self.state.lock().unwrap() = state;
    }

    /// Runs one complete update session to a terminal state and returns
    /// it. Fails with `AlreadyInProgress` when a session is live, without
    /// touching the in-progress session.
    ///
    /// On success the platform restart is requested from here; the call
    /// only returns afterwards in tests, where restart is a recorded
    /// no-op.
    pub fn run<T, S, L, P>(
        &self,
        source: &str,
        transport: &mut T,
        system: &S,
        status: &StatusReporter<L>,
        platform: &mut P,
        policy: &UpdatePolicy,
    ) -> Result<UpdateState, UpdateError>
    where
        T: UpdateTransport,
        S: SystemImage,
        L: StatusLed,
        P: Platform,
    {
        {
            let mut state = self.state.lock().unwrap();
            if *state != UpdateState::Idle {
                warn!("update requested while one is in progress");
                return Err(UpdateError::AlreadyInProgress);
            }
            *state = UpdateState::Opening;
        }

        info!("starting firmware update from {}", source);
        status.begin_update_session();
        status.set_update(StatusColor::Updating);

        let terminal = self.drive(source, transport, system, status, policy);

        match terminal {
            UpdateState::Succeeded => {
                info!("update committed, restarting into the new image");
                status.set_update(StatusColor::Connected);
                platform.delay(SUCCESS_HOLD);
                status.end_update_session();
                self.set_state(UpdateState::Idle);
                platform.restart();
            }
            UpdateState::Aborted(reason) => {
                error!("update aborted: {:?}", reason);
                status.set_update(StatusColor::Failed);
                status.end_update_session();
                self.set_state(UpdateState::Idle);
            }
            other => unreachable!("non-terminal update outcome {:?}", other),
        }

        Ok(terminal)
    }

    fn drive<T, S, L>(
        &self,
        source: &str,
        transport: &mut T,
        system: &S,
        status: &StatusReporter<L>,
        policy: &UpdatePolicy,
    ) -> UpdateState
    where
        T: UpdateTransport,
        S: SystemImage,
        L: StatusLed,
    {
        let mut session = match transport.open(source) {
            Ok(session) => session,
            Err(e) => {
                error!("failed to open transfer session: {}", e);
                return UpdateState::Aborted(AbortReason::OpenFailed);
            }
        };

        let descriptor = match transport.read_descriptor(&mut session) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!("failed to read image descriptor: {}", e);
                transport.abort(session);
                return UpdateState::Aborted(AbortReason::DescriptorUnreadable);
            }
        };
        self.set_state(UpdateState::DescriptorRead);
        info!(
            "candidate image: version {}, security version {}, target {}",
            descriptor.version, descriptor.security_version, descriptor.target_hardware
        );

        self.set_state(UpdateState::Validating);
        if let Some(reason) = validate_descriptor(&descriptor, system, policy) {
            transport.abort(session);
            return UpdateState::Aborted(reason);
        }

        self.set_state(UpdateState::Transferring { bytes_read: 0 });
        let mut blinker = ProgressBlinker::new();
        let mut bytes_read = 0usize;
        loop {
            match transport.read_next_chunk(&mut session) {
                Ok(ChunkStatus::InProgress { bytes_read: total }) => {
                    // Monotonic even if the collaborator misreports.
                    bytes_read = bytes_read.max(total);
                    self.set_state(UpdateState::Transferring { bytes_read });
                    match blinker.tick() {
                        Some(BlinkStep::On) => status.set_update(StatusColor::Updating),
                        Some(BlinkStep::Off) => status.set_update(StatusColor::Off),
                        None => {}
                    }
                }
                Ok(ChunkStatus::Done) => break,
                Err(e) => {
                    error!("transfer failed after {} bytes: {}", bytes_read, e);
                    transport.abort(session);
                    return UpdateState::Aborted(AbortReason::TransferFailed);
                }
            }
        }
        debug!("transfer loop done, {} bytes read", bytes_read);

        self.set_state(UpdateState::Verifying);
        if !transport.is_complete(&session) {
            error!("transfer ended but image data is incomplete");
            transport.abort(session);
            return UpdateState::Aborted(AbortReason::IncompleteImage);
        }

        self.set_state(UpdateState::Committing);
        match transport.finish(session) {
            Ok(()) => UpdateState::Succeeded,
            Err(FinishError::Corrupt(e)) => {
                error!("image validation failed, image corrupt: {}", e);
                UpdateState::Aborted(AbortReason::ImageCorrupt)
            }
            Err(FinishError::Commit(e)) => {
                error!("failed to activate verified image: {}", e);
                UpdateState::Aborted(AbortReason::CommitFailed)
            }
        }
    }
}

impl Default for UpdateManager {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_descriptor<S: SystemImage>(
    descriptor: &ImageDescriptor,
    system: &S,
    policy: &UpdatePolicy,
) -> Option<AbortReason> {
    if policy.check_same_version {
        match system.running_version() {
            Some(running) => {
                info!("running image version: {}", running);
                if descriptor.version == running {
                    warn!("candidate version matches the running version, not updating");
                    return Some(AbortReason::SameVersion);
                }
            }
            None => warn!("running image version unavailable, skipping same-version check"),
        }
    }
    if policy.check_downgrade {
        let floor = system.security_version_floor();
        if descriptor.security_version < floor {
            warn!(
                "candidate security version {} is below the device floor {}",
                descriptor.security_version, floor
            );
            return Some(AbortReason::DowngradeRejected);
        }
    }
    None
}
