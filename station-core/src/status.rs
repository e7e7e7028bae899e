//! Shared visual status indicator.
//!
//! Both the network session and the update session request colors from
//! independent execution contexts. The rule is simple: while an update
//! session is live, update status wins; otherwise connectivity status
//! shows. Last writer wins, there is no queue or history.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A single RGB color pushed to every element of the strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// The fixed set of system states the indicator can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusColor {
    /// Indicator dark. Also used for the "blink off" phase of a transfer.
    Off,
    /// Orange: reconnect attempt in progress.
    Retrying,
    /// Red: connectivity exhausted its retry budget, or an update aborted.
    Failed,
    /// Green: connected, or an update committed successfully.
    Connected,
    /// Blue: an update session is transferring.
    Updating,
}

impl StatusColor {
    /// `None` means "clear the strip".
    pub fn rgb(self) -> Option<Rgb> {
        match self {
            StatusColor::Off => None,
            StatusColor::Retrying => Some(Rgb::new(255, 120, 0)),
            StatusColor::Failed => Some(Rgb::new(255, 0, 0)),
            StatusColor::Connected => Some(Rgb::new(0, 200, 60)),
            StatusColor::Updating => Some(Rgb::new(0, 60, 255)),
        }
    }
}

/// The addressable-light driver: set every element, or go dark.
pub trait StatusLed {
    fn set_all(&mut self, color: Rgb);
    fn clear(&mut self);
}

struct Shown<L> {
    led: L,
    color: StatusColor,
}

/// Arbitrates indicator access between the two state machines.
pub struct StatusReporter<L: StatusLed> {
    shown: Mutex<Shown<L>>,
    update_active: AtomicBool,
}

impl<L: StatusLed> StatusReporter<L> {
    pub fn new(led: L) -> Self {
        Self {
            shown: Mutex::new(Shown {
                led,
                color: StatusColor::Off,
            }),
            update_active: AtomicBool::new(false),
        }
    }

    /// Requests a color on behalf of the network session. Dropped (not
    /// queued) while an update session holds the indicator.
    pub fn set_connectivity(&self, color: StatusColor) {
        if self.update_active.load(Ordering::Acquire) {
            return;
        }
        self.apply(color);
    }

    /// Requests a color on behalf of the update session.
    pub fn set_update(&self, color: StatusColor) {
        self.apply(color);
    }

    /// Marks the start of an update session; connectivity requests are
    /// ignored until [`end_update_session`](Self::end_update_session).
    pub fn begin_update_session(&self) {
        self.update_active.store(true, Ordering::Release);
    }

    /// Releases the indicator back to connectivity-driven status. The
    /// last update color keeps showing until the next request.
    pub fn end_update_session(&self) {
        self.update_active.store(false, Ordering::Release);
    }

    /// The most recently applied color.
    pub fn shown(&self) -> StatusColor {
        self.shown.lock().unwrap().color
    }

    fn apply(&self, color: StatusColor) {
        let mut shown = self.shown.lock().unwrap();
        match color.rgb() {
            Some(rgb) => shown.led.set_all(rgb),
            None => shown.led.clear(),
        }
        shown.color = color;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingLed {
        writes: Vec<Option<Rgb>>,
    }

    impl StatusLed for &mut RecordingLed {
        fn set_all(&mut self, color: Rgb) {
            self.writes.push(Some(color));
        }

        fn clear(&mut self) {
            self.writes.push(None);
        }
    }

    #[test]
    fn connectivity_status_shows_when_no_update() {
        let mut led = RecordingLed::default();
        let reporter = StatusReporter::new(&mut led);
        reporter.set_connectivity(StatusColor::Retrying);
        assert_eq!(reporter.shown(), StatusColor::Retrying);
    }

    #[test]
    fn update_session_overrides_connectivity() {
        let mut led = RecordingLed::default();
        let reporter = StatusReporter::new(&mut led);

        reporter.begin_update_session();
        reporter.set_update(StatusColor::Updating);
        reporter.set_connectivity(StatusColor::Retrying);
        assert_eq!(reporter.shown(), StatusColor::Updating);

        reporter.end_update_session();
        reporter.set_connectivity(StatusColor::Retrying);
        assert_eq!(reporter.shown(), StatusColor::Retrying);
    }

    #[test]
    fn off_clears_the_strip() {
        let mut led = RecordingLed::default();
        {
            let reporter = StatusReporter::new(&mut led);
            reporter.set_connectivity(StatusColor::Connected);
            reporter.set_connectivity(StatusColor::Off);
        }
        assert_eq!(led.writes.len(), 2);
        assert!(led.writes[0].is_some());
        assert!(led.writes[1].is_none());
    }

    #[test]
    fn last_update_color_persists_after_session_ends() {
        let mut led = RecordingLed::default();
        let reporter = StatusReporter::new(&mut led);

        reporter.begin_update_session();
        reporter.set_update(StatusColor::Failed);
        reporter.end_update_session();
        // No replay of connectivity state; red stays until the next event.
        assert_eq!(reporter.shown(), StatusColor::Failed);
    }
}
