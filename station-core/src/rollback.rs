//! Post-update validity commitment.
//!
//! On the first boot after an update the bootloader leaves the running
//! image in a pending-verification state and will roll back unless the
//! application marks it valid. Once all startup phases succeed, the
//! orchestrator commits; the commitment is irreversible for this boot.

use std::fmt;

use log::{debug, info, warn};

/// Bootloader bookkeeping for the running image, as reported by the
/// partition collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    New,
    PendingVerify,
    Valid,
    Invalid,
    Aborted,
    Undefined,
}

/// The mark-valid call failed; carries the collaborator's message.
#[derive(Debug)]
pub struct CommitError(pub String);

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The secure-boot/partition collaborator.
pub trait SystemImage {
    /// Version token of the currently running image, if readable.
    fn running_version(&self) -> Option<String>;
    /// Hardware-enforced anti-downgrade floor.
    fn security_version_floor(&self) -> u32;
    fn image_state(&self) -> ImageState;
    fn mark_valid_cancel_rollback(&mut self) -> Result<(), CommitError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// First boot after an update; the image is now valid and the
    /// pending rollback is cancelled.
    Committed,
    /// Not a first boot; nothing to do.
    NotPending,
    /// The commit call failed. The device keeps running, but the
    /// bootloader may roll back on the next boot.
    CommitFailed,
}

/// Commits the running image if this boot is the first after an update.
/// A failed commit is surfaced, not fatal: the device must stay alive.
pub fn commit_running_image<S: SystemImage>(system: &mut S) -> CommitOutcome {
    match system.image_state() {
        ImageState::PendingVerify => match system.mark_valid_cancel_rollback() {
            Ok(()) => {
                info!("first boot after update: image marked valid, rollback cancelled");
                CommitOutcome::Committed
            }
            Err(e) => {
                warn!(
                    "failed to mark running image valid: {}; rollback may occur on next boot",
                    e
                );
                CommitOutcome::CommitFailed
            }
        },
        state => {
            debug!("running image state {:?}, no commit needed", state);
            CommitOutcome::NotPending
        }
    }
}
