//! Hardware integration tests against a real FLI camera
//!
//! These tests require libfli and at least one camera on USB.
//! Run with: cargo test --test hardware_libfli_test --features libfli_hardware,hardware_tests -- --ignored --nocapture
//!
//! Set FLICAMERA_TEST_SERIAL to pick the camera; otherwise the first one found is used.

#![cfg(all(feature = "libfli_hardware", feature = "hardware_tests"))]

use std::sync::Arc;
use std::time::Duration;

use flicamera::{CameraSystem, ExposureProgress, ExposureState, LibFliBinding, SystemConfig};

async fn hardware_system() -> CameraSystem {
    let binding = LibFliBinding::load().expect("libfli not available");
    CameraSystem::new(Arc::new(binding), SystemConfig::default())
        .await
        .expect("Failed to create camera system")
}

async fn first_serial(system: &CameraSystem) -> String {
    if let Ok(serial) = std::env::var("FLICAMERA_TEST_SERIAL") {
        return serial;
    }
    let devices = system.discover().await.expect("Discovery failed");
    devices
        .first()
        .map(|d| d.serial.clone())
        .expect("No FLI camera attached")
}

#[tokio::test]
#[ignore] // Hardware-only test
async fn test_discover_lists_cameras() {
    let system = hardware_system().await;
    let devices = system.discover().await.unwrap();

    println!("libfli {}", system.library_version());
    for device in &devices {
        println!("  {} {} {}", device.name, device.serial, device.model);
    }
    assert!(!devices.is_empty(), "no cameras found");
}

#[tokio::test]
#[ignore]
async fn test_short_exposure_completes() {
    let system = hardware_system().await;
    let serial = first_serial(&system).await;
    system.add_camera(&serial).await.unwrap();

    let handle = system.expose(&serial, 0.5).await.unwrap();
    let elapsed = handle.wait_timeout(Duration::from_secs(10)).await.unwrap();
    println!("{}: exposed for {:?}", serial, elapsed);

    assert!(elapsed >= Duration::from_millis(500));
    assert_eq!(
        system.status(&serial).await.unwrap().state,
        ExposureState::ReadingOut
    );
    system.shutdown().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_cancel_stops_exposure() {
    let system = hardware_system().await;
    let serial = first_serial(&system).await;
    system.add_camera(&serial).await.unwrap();

    let handle = system.expose(&serial, 20.0).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(handle.cancel().await, ExposureProgress::Cancelled);
    assert_eq!(
        system.status(&serial).await.unwrap().state,
        ExposureState::Idle
    );
    system.shutdown().await.unwrap();
}
