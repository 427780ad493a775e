// SPDX-License-Identifier: GPL-3.0-only

//! Suspend-signal aggregation
//!
//! All window/screen/lock conditions that forbid holding an open camera
//! stream are folded into one predicate, [`SuspendSignals::should_suspend`].

use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Individual environment condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Session is idle-locked
    Locked,
    /// Window is minimized
    Minimized,
    /// Screen was turned off automatically
    ScreenOffAuto,
    /// An external screen is connected
    HasExternalScreen,
    /// Caller explicitly asked to release the camera
    ExplicitSuspend,
    /// Device is in tablet mode
    TabletMode,
    /// Window is hidden (not visible)
    WindowHidden,
}

/// Current value of every suspend signal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuspendSignals {
    pub locked: bool,
    pub minimized: bool,
    pub screen_off_auto: bool,
    pub has_external_screen: bool,
    pub explicit_suspend_requested: bool,
    pub tablet_mode: bool,
    pub window_hidden: bool,
}

impl SuspendSignals {
    /// Tablet mode with the window hidden
    pub fn tablet_background(&self) -> bool {
        self.tablet_mode && self.window_hidden
    }

    /// Whether the camera must be released
    pub fn should_suspend(&self) -> bool {
        self.locked
            || self.minimized
            || self.explicit_suspend_requested
            || (self.screen_off_auto && !self.has_external_screen)
            || self.tablet_background()
    }

    /// Set one signal, returning its previous value
    pub fn set(&mut self, signal: Signal, value: bool) -> bool {
        let slot = match signal {
            Signal::Locked => &mut self.locked,
            Signal::Minimized => &mut self.minimized,
            Signal::ScreenOffAuto => &mut self.screen_off_auto,
            Signal::HasExternalScreen => &mut self.has_external_screen,
            Signal::ExplicitSuspend => &mut self.explicit_suspend_requested,
            Signal::TabletMode => &mut self.tablet_mode,
            Signal::WindowHidden => &mut self.window_hidden,
        };
        std::mem::replace(slot, value)
    }
}

/// Thread-safe owner of [`SuspendSignals`]
#[derive(Debug, Default)]
pub struct SuspendAggregator {
    signals: Mutex<SuspendSignals>,
}

impl SuspendAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update one signal
    ///
    /// Returns true when the derived suspend predicate changed.
    pub fn update_signal(&self, signal: Signal, value: bool) -> bool {
        let mut signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        let before = signals.should_suspend();
        signals.set(signal, value);
        let after = signals.should_suspend();

        if before != after {
            debug!(?signal, value, should_suspend = after, "Suspend predicate changed");
        }
        before != after
    }

    /// Current suspend predicate
    pub fn should_suspend(&self) -> bool {
        self.snapshot().should_suspend()
    }

    /// Copy of all signal values
    pub fn snapshot(&self) -> SuspendSignals {
        *self.signals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_not_suspended() {
        assert!(!SuspendSignals::default().should_suspend());
    }

    #[test]
    fn test_each_direct_signal_suspends() {
        for signal in [Signal::Locked, Signal::Minimized, Signal::ExplicitSuspend] {
            let mut signals = SuspendSignals::default();
            signals.set(signal, true);
            assert!(signals.should_suspend(), "{:?} should suspend", signal);
        }
    }

    #[test]
    fn test_screen_off_ignored_with_external_screen() {
        let mut signals = SuspendSignals::default();
        signals.set(Signal::ScreenOffAuto, true);
        assert!(signals.should_suspend());

        signals.set(Signal::HasExternalScreen, true);
        assert!(!signals.should_suspend());
    }

    #[test]
    fn test_tablet_background_needs_both() {
        let mut signals = SuspendSignals::default();
        signals.set(Signal::TabletMode, true);
        assert!(!signals.should_suspend());
        signals.set(Signal::WindowHidden, true);
        assert!(signals.tablet_background());
        assert!(signals.should_suspend());

        // Hidden window outside tablet mode does not suspend
        signals.set(Signal::TabletMode, false);
        assert!(!signals.should_suspend());
    }

    #[test]
    fn test_update_reports_predicate_changes_only() {
        let aggregator = SuspendAggregator::new();
        assert!(aggregator.update_signal(Signal::Locked, true));
        // Already suspended, second reason does not change the predicate
        assert!(!aggregator.update_signal(Signal::Minimized, true));
        assert!(!aggregator.update_signal(Signal::Locked, false));
        assert!(aggregator.update_signal(Signal::Minimized, false));
        assert!(!aggregator.should_suspend());
    }

    #[test]
    fn test_set_returns_previous_value() {
        let mut signals = SuspendSignals::default();
        assert!(!signals.set(Signal::Locked, true));
        assert!(signals.set(Signal::Locked, false));
    }
}
