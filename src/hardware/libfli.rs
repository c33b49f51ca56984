//! Native `libfli` binding.
//!
//! Thin wrapper over the `libfli-sys` FFI. Every function maps one-to-one to
//! a `libfli` entry point and runs its status through [`check_status`].
//! Without the `libfli_hardware` feature the binding still exists but every
//! call fails with `LibraryUnavailable`, so callers can fall back to the mock.
//!
//! ## Thread safety
//!
//! `libfli` serialises calls per device internally. The crate never issues
//! two calls on the same handle concurrently anyway: each camera funnels its
//! hardware calls through its own state lock.

use std::time::Duration;

use super::{DeviceEntry, Domain, Handle, HardwareBinding, HwResult};
use crate::error::HardwareError;

#[cfg(feature = "libfli_hardware")]
use super::check_status;
#[cfg(feature = "libfli_hardware")]
use std::ffi::{CStr, CString};
#[cfg(feature = "libfli_hardware")]
use std::os::raw::{c_char, c_long};

#[cfg(feature = "libfli_hardware")]
use libfli_sys as ffi;

/// Size of string buffers handed to `libfli`.
#[cfg(feature = "libfli_hardware")]
const STRING_BUFFER_LEN: usize = 256;

/// Binding over the native FLI library.
#[derive(Debug, Default)]
pub struct LibFliBinding {
    _private: (),
}

impl LibFliBinding {
    /// Check that `libfli` is usable and return a binding to it.
    pub fn load() -> HwResult<Self> {
        let binding = Self { _private: () };
        let version = binding.library_version()?;
        tracing::info!("libfli loaded: {}", version);
        Ok(binding)
    }
}

/// Read a NUL-terminated string written by libfli into `buffer`.
#[cfg(feature = "libfli_hardware")]
fn buffer_to_string(buffer: &[c_char]) -> String {
    // SAFETY: buffer is zero-initialised and libfli writes at most len - 1
    // bytes plus the terminator, so a NUL is always present.
    unsafe { CStr::from_ptr(buffer.as_ptr()) }
        .to_string_lossy()
        .trim()
        .to_string()
}

/// Split a `FLIList` entry of the form `name;model`.
#[cfg_attr(not(feature = "libfli_hardware"), allow(dead_code))]
fn parse_list_entry(raw: &str) -> DeviceEntry {
    match raw.split_once(';') {
        Some((name, model)) => DeviceEntry {
            name: name.to_string(),
            model: model.to_string(),
        },
        None => DeviceEntry {
            name: raw.to_string(),
            model: String::new(),
        },
    }
}

#[cfg(feature = "libfli_hardware")]
impl HardwareBinding for LibFliBinding {
    fn library_version(&self) -> HwResult<String> {
        let mut buffer = vec![0 as c_char; STRING_BUFFER_LEN];
        // SAFETY: buffer is writable and its length is passed along.
        let status = unsafe { ffi::FLIGetLibVersion(buffer.as_mut_ptr(), buffer.len() as _) };
        check_status(status as i64).map_err(|_| HardwareError::LibraryUnavailable)?;
        Ok(buffer_to_string(&buffer))
    }

    fn list(&self, domain: Domain) -> HwResult<Vec<DeviceEntry>> {
        let mut names: *mut *mut c_char = std::ptr::null_mut();
        // SAFETY: names is a valid out pointer; libfli allocates the list.
        let status = unsafe { ffi::FLIList(domain.0 as _, &mut names) };
        check_status(status as i64)?;

        let mut entries = Vec::new();
        if names.is_null() {
            return Ok(entries);
        }

        // SAFETY: the list is NULL-terminated and every entry is a C string.
        unsafe {
            let mut cursor = names;
            while !(*cursor).is_null() {
                let raw = CStr::from_ptr(*cursor).to_string_lossy();
                entries.push(parse_list_entry(&raw));
                cursor = cursor.add(1);
            }
            ffi::FLIFreeList(names);
        }

        Ok(entries)
    }

    fn open(&self, name: &str, domain: Domain) -> HwResult<Handle> {
        let c_name = CString::new(name).map_err(|_| HardwareError::DeviceNotFound)?;
        let mut dev: c_long = -1;
        // SAFETY: c_name outlives the call; dev is a valid out pointer.
        let status =
            unsafe { ffi::FLIOpen(&mut dev as *mut c_long as *mut _, c_name.as_ptr() as *mut _, domain.0 as _) };
        check_status(status as i64)?;
        Ok(Handle(dev as i64))
    }

    fn close(&self, handle: Handle) -> HwResult<()> {
        // SAFETY: closing an unknown handle is reported as an error status.
        let status = unsafe { ffi::FLIClose(handle.0 as _) };
        check_status(status as i64)
    }

    fn read_serial(&self, handle: Handle) -> HwResult<String> {
        let mut buffer = vec![0 as c_char; STRING_BUFFER_LEN];
        // SAFETY: buffer is writable and its length is passed along.
        let status = unsafe {
            ffi::FLIGetSerialString(handle.0 as _, buffer.as_mut_ptr(), buffer.len() as _)
        };
        check_status(status as i64)?;
        Ok(buffer_to_string(&buffer))
    }

    fn set_exposure_time(&self, handle: Handle, seconds: f64) -> HwResult<()> {
        if crate::exposure::exposure_duration(seconds).is_none() {
            return Err(HardwareError::Io { code: libc::EINVAL });
        }
        // libfli takes milliseconds
        let millis = (seconds * 1000.0).round() as c_long;
        // SAFETY: plain value arguments.
        let status = unsafe { ffi::FLISetExposureTime(handle.0 as _, millis as _) };
        check_status(status as i64)
    }

    fn exposure_status(&self, handle: Handle) -> HwResult<Duration> {
        let mut time_left: c_long = 0;
        // SAFETY: time_left is a valid out pointer.
        let status =
            unsafe { ffi::FLIGetExposureStatus(handle.0 as _, &mut time_left as *mut c_long as *mut _) };
        check_status(status as i64)?;
        Ok(Duration::from_millis(time_left.max(0) as u64))
    }

    fn expose_frame(&self, handle: Handle) -> HwResult<()> {
        // SAFETY: plain value argument.
        let status = unsafe { ffi::FLIExposeFrame(handle.0 as _) };
        check_status(status as i64)
    }

    fn cancel_exposure(&self, handle: Handle) -> HwResult<()> {
        // SAFETY: plain value argument.
        let status = unsafe { ffi::FLICancelExposure(handle.0 as _) };
        check_status(status as i64)
    }
}

#[cfg(not(feature = "libfli_hardware"))]
impl HardwareBinding for LibFliBinding {
    fn library_version(&self) -> HwResult<String> {
        Err(HardwareError::LibraryUnavailable)
    }

    fn list(&self, _domain: Domain) -> HwResult<Vec<DeviceEntry>> {
        Err(HardwareError::LibraryUnavailable)
    }

    fn open(&self, _name: &str, _domain: Domain) -> HwResult<Handle> {
        Err(HardwareError::LibraryUnavailable)
    }

    fn close(&self, _handle: Handle) -> HwResult<()> {
        Err(HardwareError::LibraryUnavailable)
    }

    fn read_serial(&self, _handle: Handle) -> HwResult<String> {
        Err(HardwareError::LibraryUnavailable)
    }

    fn set_exposure_time(&self, _handle: Handle, _seconds: f64) -> HwResult<()> {
        Err(HardwareError::LibraryUnavailable)
    }

    fn exposure_status(&self, _handle: Handle) -> HwResult<Duration> {
        Err(HardwareError::LibraryUnavailable)
    }

    fn expose_frame(&self, _handle: Handle) -> HwResult<()> {
        Err(HardwareError::LibraryUnavailable)
    }

    fn cancel_exposure(&self, _handle: Handle) -> HwResult<()> {
        Err(HardwareError::LibraryUnavailable)
    }
}
