//! Common test utilities for flicamera integration tests
//!
//! This module provides reusable test helpers for:
//! - Building a camera system over the mock library
//! - Timing assertions with appropriate tolerances

#![allow(dead_code)] // Not every test file uses every helper

use std::sync::Arc;
use std::time::Duration;

use flicamera::config::CameraDefinition;
use flicamera::{CameraSystem, MockFliLibrary, SystemConfig};

/// Default model reported by mock cameras.
pub const MODEL: &str = "MicroLine ML50100";

/// Serials attached to the fixture library.
pub const SERIALS: [&str; 2] = ["ML0000", "ML0001"];

/// Configuration for deterministic tests.
///
/// Hardware calls run in place so that `start_paused = true` drives the
/// whole exposure lifecycle from the tokio clock.
pub fn paused_config() -> SystemConfig {
    let mut config = SystemConfig {
        poll_interval_ms: 100,
        min_poll_interval_ms: 10,
        offload_blocking: false,
        ..SystemConfig::default()
    };
    for (index, serial) in SERIALS.iter().enumerate() {
        config.cameras.insert(
            format!("gfa{}", index + 1),
            CameraDefinition {
                serial: serial.to_string(),
                model: Some(MODEL.to_string()),
            },
        );
    }
    config
}

/// Configuration that offloads hardware calls to the blocking pool.
pub fn realtime_config() -> SystemConfig {
    SystemConfig {
        poll_interval_ms: 20,
        min_poll_interval_ms: 5,
        offload_blocking: true,
        ..paused_config()
    }
}

/// Mock library with one camera per fixture serial (`flipro0`, `flipro1`).
pub fn mock_library() -> Arc<MockFliLibrary> {
    let lib = MockFliLibrary::new();
    for (index, serial) in SERIALS.iter().enumerate() {
        lib.add_camera(&format!("flipro{}", index), serial, MODEL);
    }
    Arc::new(lib)
}

/// A camera system over `lib` with every fixture camera added.
pub async fn system_with_cameras(
    lib: &Arc<MockFliLibrary>,
    config: SystemConfig,
) -> CameraSystem {
    let system = CameraSystem::new(lib.clone(), config)
        .await
        .expect("Failed to create camera system");
    for serial in SERIALS {
        system
            .add_camera(serial)
            .await
            .expect("Failed to add fixture camera");
    }
    system
}

/// Tolerance levels for real-time timing assertions.
///
/// Use these when `start_paused = true` is not appropriate (e.g., testing
/// hardware calls offloaded to the blocking pool).
#[derive(Debug, Clone, Copy)]
pub enum TimingTolerance {
    /// Exact match - only for simulated time with `start_paused = true`
    Exact,
    /// 20% tolerance - default for local development
    Normal,
    /// 50% tolerance - for CI environments with variable load
    Relaxed,
}

impl TimingTolerance {
    /// Get the tolerance factor as a fraction (0.0 to 1.0)
    pub fn factor(&self) -> f64 {
        match self {
            TimingTolerance::Exact => 0.0,
            TimingTolerance::Normal => 0.20,
            TimingTolerance::Relaxed => 0.50,
        }
    }
}

/// Assert that a duration is within tolerance of an expected value.
///
/// # Panics
/// Panics if the actual duration is outside the tolerance range.
pub fn assert_duration_near(
    actual: Duration,
    expected: Duration,
    tolerance: TimingTolerance,
    context: &str,
) {
    let factor = tolerance.factor();
    let min = expected.mul_f64(1.0 - factor);
    let max = expected.mul_f64(1.0 + factor);

    assert!(
        actual >= min && actual <= max,
        "{}: expected {:?} +/-{:.0}%, got {:?} (acceptable range: {:?} to {:?})",
        context,
        expected,
        factor * 100.0,
        actual,
        min,
        max
    );
}

/// Timing tolerance for the current environment (`Relaxed` under CI).
pub fn env_timing_tolerance() -> TimingTolerance {
    if std::env::var("CI").is_ok() {
        TimingTolerance::Relaxed
    } else {
        TimingTolerance::Normal
    }
}
