//! Device registry: serial number to camera.
//!
//! The registry is the identity map of a [`CameraSystem`](crate::system::CameraSystem).
//! It is keyed by serial only; handles are session tokens and change on every
//! reconnect, so they are never used as keys. Registering a serial that is
//! already known rebinds the existing camera instead of creating a second one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::camera::Camera;
use crate::error::{CameraError, CameraResult};
use crate::hardware::DeviceDescriptor;

/// Serial-keyed map of cameras.
#[derive(Debug, Default)]
pub struct Registry {
    cameras: Mutex<HashMap<String, Arc<Camera>>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the camera with `serial`.
    pub fn resolve(&self, serial: &str) -> CameraResult<Arc<Camera>> {
        self.lock()
            .get(serial)
            .cloned()
            .ok_or_else(|| CameraError::DeviceNotFound {
                serial: serial.to_string(),
            })
    }

    /// Insert the camera described by `descriptor`, or rebind the existing
    /// camera with the same serial to the descriptor's handle.
    ///
    /// The returned camera is the same instance for every call with the
    /// same serial, for as long as the entry is not removed.
    pub async fn register(&self, descriptor: &DeviceDescriptor) -> Arc<Camera> {
        let (camera, created) = {
            let mut cameras = self.lock();
            match cameras.get(&descriptor.serial) {
                Some(camera) => (Arc::clone(camera), false),
                None => {
                    let camera = Arc::new(Camera::new(descriptor.clone()));
                    cameras.insert(descriptor.serial.clone(), Arc::clone(&camera));
                    (camera, true)
                }
            }
        };

        if created {
            info!(serial = %descriptor.serial, "Registered camera '{}' ({})", descriptor.name, descriptor.model);
        } else if let Some(previous) = camera.rebind(descriptor).await {
            warn!(
                serial = %descriptor.serial,
                "Rebound camera while handle {} was still bound",
                previous
            );
        } else {
            debug!(serial = %descriptor.serial, "Camera rebound to {}", descriptor.handle);
        }
        camera
    }

    /// Drop the entry for `serial`.
    pub fn remove(&self, serial: &str) -> Option<Arc<Camera>> {
        let removed = self.lock().remove(serial);
        if removed.is_some() {
            debug!(serial, "Camera removed from registry");
        }
        removed
    }

    /// Drop every entry and return how many there were.
    pub fn clear(&self) -> usize {
        let mut cameras = self.lock();
        let count = cameras.len();
        cameras.clear();
        count
    }

    /// Whether `serial` is registered.
    pub fn contains(&self, serial: &str) -> bool {
        self.lock().contains_key(serial)
    }

    /// Number of registered cameras.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no camera is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registered serials, sorted.
    pub fn serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self.lock().keys().cloned().collect();
        serials.sort();
        serials
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Camera>>> {
        match self.cameras.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Registry mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }
}
