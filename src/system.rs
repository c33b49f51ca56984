//! Camera system orchestrator.
//!
//! [`CameraSystem`] is the public entry point. It owns the hardware adapter,
//! the registry, the configuration and the set of managed cameras, and it
//! wires the camera state machine to the polling scheduler.
//!
//! ## Locking
//!
//! The managed set sits behind its own lock which is only ever held for map
//! operations, never across a hardware call. Hardware calls go through each
//! camera's own lock, so a slow call on one camera never blocks another.
//! Discovery is serialised so two concurrent adds cannot bind the same
//! device twice.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::camera::{Camera, CameraStatus};
use crate::config::{SystemConfig, TeardownPolicy};
use crate::error::{CameraError, CameraResult};
use crate::hardware::{DeviceDescriptor, FliAdapter, HardwareBinding};
use crate::poller::{self, Cadence, ExposureHandle, PollTask};
use crate::registry::Registry;

/// A device seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Domain-scoped device name.
    pub name: String,
    /// Serial number.
    pub serial: String,
    /// Model string.
    pub model: String,
    /// Whether the device is bound to a managed camera.
    pub managed: bool,
}

#[derive(Debug)]
struct ManagedCamera {
    camera: Arc<Camera>,
    device_name: String,
    task: Option<PollTask>,
}

/// Orchestrates discovery, exposures and teardown of a set of cameras.
#[derive(Debug)]
pub struct CameraSystem {
    adapter: FliAdapter,
    config: SystemConfig,
    registry: Registry,
    managed: Mutex<HashMap<String, ManagedCamera>>,
    discovery: Mutex<()>,
    library_version: String,
}

impl CameraSystem {
    /// Create a system over `binding`.
    ///
    /// # Errors
    ///
    /// Fails with `LibraryUnavailable` if the library does not respond, and
    /// with `Config` if `config` does not validate.
    pub async fn new(
        binding: Arc<dyn HardwareBinding>,
        config: SystemConfig,
    ) -> CameraResult<Self> {
        config.validate()?;
        let adapter = FliAdapter::new(binding, config.offload_blocking);

        let library_version = adapter.library_version().await.map_err(|e| {
            error!("Camera library unavailable: {}", e);
            CameraError::LibraryUnavailable(e)
        })?;
        info!("Camera system started ({})", library_version);

        Ok(Self {
            adapter,
            config,
            registry: Registry::new(),
            managed: Mutex::new(HashMap::new()),
            discovery: Mutex::new(()),
            library_version,
        })
    }

    /// Version string reported by the library.
    pub fn library_version(&self) -> &str {
        &self.library_version
    }

    /// Active configuration.
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// The identity map backing this system.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Find the camera `id` (logical name or serial) and start managing it.
    ///
    /// Adding a camera that is already managed returns the same instance
    /// without touching the hardware.
    pub async fn add_camera(&self, id: &str) -> CameraResult<Arc<Camera>> {
        let serial = self.config.resolve_serial(id).to_string();
        let _discovery = self.discovery.lock().await;

        if let Some(entry) = self.managed.lock().await.get(&serial) {
            debug!(serial = %serial, "Camera already managed");
            return Ok(Arc::clone(&entry.camera));
        }

        let skip = self.bound_device_names().await;
        let descriptors = self
            .adapter
            .discover(self.config.domain(), &skip)
            .await
            .map_err(|e| CameraError::from_hardware(serial.clone(), e))?;

        let mut matched = None;
        for descriptor in descriptors {
            if matched.is_none() && descriptor.serial == serial {
                matched = Some(descriptor);
            } else {
                self.close_quietly(&descriptor).await;
            }
        }
        let Some(descriptor) = matched else {
            warn!(serial = %serial, "Camera not found during discovery");
            return Err(CameraError::DeviceNotFound { serial });
        };

        if let Err(e) = self.check_expectations(&descriptor) {
            warn!(serial = %serial, "{}", e);
            self.close_quietly(&descriptor).await;
            return Err(e);
        }

        // A registered but unmanaged camera may still hold a session.
        if let Ok(existing) = self.registry.resolve(&serial) {
            if existing.handle().await.is_some() {
                if let Err(e) = existing.release(&self.adapter).await {
                    warn!(serial = %serial, "Failed to release previous session: {}", e);
                }
            }
        }

        let camera = self.registry.register(&descriptor).await;
        self.managed.lock().await.insert(
            serial.clone(),
            ManagedCamera {
                camera: Arc::clone(&camera),
                device_name: descriptor.name.clone(),
                task: None,
            },
        );
        info!(
            serial = %serial,
            "Camera added ({} on {}, handle {})",
            descriptor.model,
            descriptor.name,
            descriptor.handle
        );
        Ok(camera)
    }

    /// List visible devices without keeping any session open.
    ///
    /// Managed cameras are reported from their binding and not reopened.
    pub async fn discover(&self) -> CameraResult<Vec<DeviceInfo>> {
        let _discovery = self.discovery.lock().await;

        let mut devices: Vec<DeviceInfo> = self
            .managed
            .lock()
            .await
            .iter()
            .map(|(serial, entry)| DeviceInfo {
                name: entry.device_name.clone(),
                serial: serial.clone(),
                model: entry.camera.model().to_string(),
                managed: true,
            })
            .collect();

        let skip = devices.iter().map(|d| d.name.clone()).collect();
        let descriptors = self
            .adapter
            .discover(self.config.domain(), &skip)
            .await
            .map_err(CameraError::LibraryUnavailable)?;

        for descriptor in descriptors {
            self.close_quietly(&descriptor).await;
            devices.push(DeviceInfo {
                name: descriptor.name,
                serial: descriptor.serial,
                model: descriptor.model,
                managed: false,
            });
        }
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    /// Start an exposure of `exposure_time` seconds on a managed camera.
    ///
    /// Returns as soon as the hardware exposure has started; use the handle
    /// to follow it.
    pub async fn expose(&self, serial: &str, exposure_time: f64) -> CameraResult<ExposureHandle> {
        let camera = self.camera(serial).await?;
        let exposure = camera.arm(&self.adapter, exposure_time).await?;

        let (task, handle) = poller::spawn(
            Arc::clone(&camera),
            self.adapter.clone(),
            exposure,
            exposure_time,
            Cadence::from_config(&self.config),
        );

        let mut managed = self.managed.lock().await;
        let previous = match managed.get_mut(serial) {
            Some(entry) if Arc::ptr_eq(&entry.camera, &camera) => entry.task.replace(task),
            _ => {
                drop(managed);
                // Disconnected while arming.
                handle.cancel().await;
                task.shutdown().await;
                return Err(CameraError::NotManaged {
                    serial: serial.to_string(),
                });
            }
        };
        drop(managed);

        // The previous exposure ended before this arm succeeded, so its task
        // is done or about to notice.
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
        Ok(handle)
    }

    /// Expose several cameras concurrently and wait for all of them.
    ///
    /// Results are returned in request order; one camera failing does not
    /// affect the others.
    ///
    /// Cameras that completed are left in `ReadingOut`. Call
    /// [`finish_readout`](Self::finish_readout) on each before exposing
    /// them again; until then a new arm fails with `InvalidState`.
    pub async fn expose_many(
        &self,
        requests: &[(String, f64)],
    ) -> Vec<(String, CameraResult<Duration>)> {
        let exposures = requests.iter().map(|(serial, exposure_time)| async move {
            let result = match self.expose(serial, *exposure_time).await {
                Ok(handle) => handle.wait().await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                warn!(serial = %serial, "Exposure failed: {}", e);
            }
            (serial.clone(), result)
        });
        join_all(exposures).await
    }

    /// Expose every managed camera for `exposure_time` seconds.
    ///
    /// Leaves completed cameras in `ReadingOut`, as
    /// [`expose_many`](Self::expose_many) does.
    pub async fn expose_all(&self, exposure_time: f64) -> Vec<(String, CameraResult<Duration>)> {
        let requests: Vec<(String, f64)> = self
            .serials()
            .await
            .into_iter()
            .map(|serial| (serial, exposure_time))
            .collect();
        self.expose_many(&requests).await
    }

    /// A managed camera.
    pub async fn camera(&self, serial: &str) -> CameraResult<Arc<Camera>> {
        self.managed
            .lock()
            .await
            .get(serial)
            .map(|entry| Arc::clone(&entry.camera))
            .ok_or_else(|| CameraError::NotManaged {
                serial: serial.to_string(),
            })
    }

    /// All managed cameras, ordered by serial.
    pub async fn cameras(&self) -> Vec<Arc<Camera>> {
        let mut cameras: Vec<Arc<Camera>> = self
            .managed
            .lock()
            .await
            .values()
            .map(|entry| Arc::clone(&entry.camera))
            .collect();
        cameras.sort_by(|a, b| a.serial().cmp(b.serial()));
        cameras
    }

    /// Serials of all managed cameras, sorted.
    pub async fn serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self.managed.lock().await.keys().cloned().collect();
        serials.sort();
        serials
    }

    /// Snapshot of a managed camera.
    pub async fn status(&self, serial: &str) -> CameraResult<CameraStatus> {
        Ok(self.camera(serial).await?.status().await)
    }

    /// Mark the readout of the last exposure as done.
    pub async fn finish_readout(&self, serial: &str) -> CameraResult<()> {
        self.camera(serial).await?.finish_readout().await
    }

    /// Clear a fault so the camera can be armed again.
    pub async fn reset(&self, serial: &str) -> CameraResult<()> {
        self.camera(serial).await?.reset().await
    }

    /// Whether a polling task is running for `serial`.
    pub async fn is_exposure_active(&self, serial: &str) -> bool {
        self.managed
            .lock()
            .await
            .get(serial)
            .and_then(|entry| entry.task.as_ref())
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop managing a camera: stop its polling task, abort any exposure and
    /// close its session.
    ///
    /// Teardown always completes; a hardware failure on the way is returned
    /// afterwards.
    pub async fn disconnect(&self, serial: &str) -> CameraResult<()> {
        let entry = self
            .managed
            .lock()
            .await
            .remove(serial)
            .ok_or_else(|| CameraError::NotManaged {
                serial: serial.to_string(),
            })?;

        if let Some(task) = entry.task {
            task.shutdown().await;
        }
        let released = entry.camera.release(&self.adapter).await;

        if self.config.teardown == TeardownPolicy::Remove {
            self.registry.remove(serial);
        }

        match released {
            Ok(()) => {
                info!(serial, "Camera disconnected");
                Ok(())
            }
            Err(e) => {
                error!(serial, "Camera disconnected with errors: {}", e);
                Err(CameraError::from_hardware(serial, e))
            }
        }
    }

    /// Disconnect every managed camera concurrently.
    ///
    /// Returns the first failure after all cameras were torn down.
    pub async fn disconnect_all(&self) -> CameraResult<()> {
        let serials = self.serials().await;
        let results = join_all(serials.iter().map(|serial| self.disconnect(serial))).await;
        results.into_iter().collect()
    }

    /// Disconnect everything and clear the registry.
    pub async fn shutdown(&self) -> CameraResult<()> {
        let result = self.disconnect_all().await;
        let dropped = self.registry.clear();
        info!("Camera system shut down ({} cameras released)", dropped);
        result
    }

    async fn bound_device_names(&self) -> HashSet<String> {
        self.managed
            .lock()
            .await
            .values()
            .map(|entry| entry.device_name.clone())
            .collect()
    }

    fn check_expectations(&self, descriptor: &DeviceDescriptor) -> CameraResult<()> {
        match self.config.definition_for_serial(&descriptor.serial) {
            Some((name, definition)) => match &definition.model {
                Some(model) if *model != descriptor.model => Err(CameraError::ConfigMismatch {
                    serial: descriptor.serial.clone(),
                    reason: format!(
                        "camera '{}' expects model '{}', device reports '{}'",
                        name, model, descriptor.model
                    ),
                }),
                _ => Ok(()),
            },
            None if self.config.require_configured => Err(CameraError::ConfigMismatch {
                serial: descriptor.serial.clone(),
                reason: "serial is not listed in the configuration".to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn close_quietly(&self, descriptor: &DeviceDescriptor) {
        if let Err(e) = self.adapter.close(descriptor.handle).await {
            warn!(
                "Failed to close {} ({}): {}",
                descriptor.name, descriptor.handle, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraDefinition;
    use crate::error::ErrorKind;
    use crate::hardware::MockFliLibrary;

    fn config() -> SystemConfig {
        let mut config = SystemConfig {
            offload_blocking: false,
            ..SystemConfig::default()
        };
        config.cameras.insert(
            "gfa1".to_string(),
            CameraDefinition {
                serial: "ML0000".to_string(),
                model: Some("MicroLine ML50100".to_string()),
            },
        );
        config
    }

    async fn system() -> (Arc<MockFliLibrary>, CameraSystem) {
        let lib = Arc::new(
            MockFliLibrary::new()
                .with_camera("flipro0", "ML0000", "MicroLine ML50100")
                .with_camera("flipro1", "ML0001", "MicroLine ML16803"),
        );
        let system = CameraSystem::new(lib.clone(), config()).await.unwrap();
        (lib, system)
    }

    #[tokio::test]
    async fn test_add_by_logical_name() {
        let (lib, system) = system().await;
        let camera = system.add_camera("gfa1").await.unwrap();

        assert_eq!(camera.serial(), "ML0000");
        assert_eq!(camera.device_name().await, "flipro0");
        // Only the matching device stays open.
        assert_eq!(lib.open_sessions(), 1);
    }

    #[tokio::test]
    async fn test_discover_lists_without_holding_sessions() {
        let (lib, system) = system().await;
        system.add_camera("ML0001").await.unwrap();

        let devices = system.discover().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "ML0000");
        assert!(!devices[0].managed);
        assert_eq!(devices[1].serial, "ML0001");
        assert!(devices[1].managed);
        assert_eq!(lib.open_sessions(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let lib = Arc::new(MockFliLibrary::new());
        let config = SystemConfig {
            poll_interval_ms: 0,
            ..SystemConfig::default()
        };
        let err = CameraSystem::new(lib, config).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_unmanaged_operations() {
        let (_lib, system) = system().await;
        for err in [
            system.expose("ML0000", 1.0).await.map(|_| ()).unwrap_err(),
            system.status("ML0000").await.map(|_| ()).unwrap_err(),
            system.disconnect("ML0000").await.unwrap_err(),
        ] {
            assert_eq!(err.kind(), ErrorKind::NotManaged);
        }
        assert!(!system.is_exposure_active("ML0000").await);
    }
}
