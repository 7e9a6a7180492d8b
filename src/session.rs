//! The device session shared by capture, dispatch and text entry.

use std::sync::Arc;

use crate::actions::{NoOverlay, StatusOverlay};
use crate::actuator::DeviceActuator;
use crate::adb::AdbDevice;

/// Handle to one controlled device and the process-wide state that goes with it.
///
/// Components are built from a session instead of reaching for globals, and
/// the session is cheap to clone.
#[derive(Clone)]
pub struct DeviceSession {
    actuator: Arc<dyn DeviceActuator>,
    overlay: Arc<dyn StatusOverlay>,
}

impl DeviceSession {
    pub fn new(actuator: Arc<dyn DeviceActuator>, overlay: Arc<dyn StatusOverlay>) -> Self {
        Self { actuator, overlay }
    }

    /// Session over ADB without a status overlay.
    pub fn adb(device_id: Option<String>) -> Self {
        Self::new(Arc::new(AdbDevice::new(device_id)), Arc::new(NoOverlay))
    }

    pub fn actuator(&self) -> Arc<dyn DeviceActuator> {
        self.actuator.clone()
    }

    pub fn overlay(&self) -> Arc<dyn StatusOverlay> {
        self.overlay.clone()
    }

    /// Replace the status overlay, e.g. once a UI layer has created its window.
    pub fn with_overlay(mut self, overlay: Arc<dyn StatusOverlay>) -> Self {
        self.overlay = overlay;
        self
    }
}
