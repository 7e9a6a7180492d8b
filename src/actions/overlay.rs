//! Hiding the floating status window around touch operations.
//!
//! A visible overlay can swallow injected touches and steal focus from the
//! input field being typed into, so every touch-sensitive operation runs
//! inside [`OverlaySuppressor::scoped_hide`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::session::DeviceSession;

/// Default settle time after each visibility change.
pub const DEFAULT_OVERLAY_SETTLE: Duration = Duration::from_millis(150);

/// The persistent on-screen status window.
///
/// Implementations are responsible for running the visibility change on
/// whatever context owns their window operations.
pub trait StatusOverlay: Send + Sync {
    fn is_visible(&self) -> bool;
    fn hide(&self);
    fn show(&self);
}

/// Overlay for hosts that render no status window.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOverlay;

impl StatusOverlay for NoOverlay {
    fn is_visible(&self) -> bool {
        false
    }

    fn hide(&self) {}

    fn show(&self) {}
}

/// Restores the overlay when dropped, so unwinding and cancelled futures
/// still put the window back.
struct OverlayGuard<'a> {
    overlay: &'a dyn StatusOverlay,
    restore: bool,
}

impl OverlayGuard<'_> {
    fn disarm(mut self) -> bool {
        let restore = self.restore;
        if restore {
            self.overlay.show();
        }
        self.restore = false;
        restore
    }
}

impl Drop for OverlayGuard<'_> {
    fn drop(&mut self) {
        if self.restore {
            tracing::debug!("restoring overlay on abnormal exit");
            self.overlay.show();
        }
    }
}

/// Scoped hide/show of the status overlay.
#[derive(Clone)]
pub struct OverlaySuppressor {
    overlay: Arc<dyn StatusOverlay>,
    settle: Duration,
}

impl OverlaySuppressor {
    pub fn new(session: &DeviceSession) -> Self {
        Self {
            overlay: session.overlay(),
            settle: DEFAULT_OVERLAY_SETTLE,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Hide the overlay, run `body`, then show it again.
    ///
    /// The overlay is only touched when it was visible on entry, so the
    /// visibility on return always equals the visibility on entry.
    pub async fn scoped_hide<F, T>(&self, body: F) -> T
    where
        F: Future<Output = T>,
    {
        let was_visible = self.overlay.is_visible();
        if was_visible {
            self.overlay.hide();
        }
        let guard = OverlayGuard {
            overlay: self.overlay.as_ref(),
            restore: was_visible,
        };
        if was_visible {
            sleep(self.settle).await;
        }

        let output = body.await;

        if guard.disarm() {
            sleep(self.settle).await;
        }
        output
    }
}
