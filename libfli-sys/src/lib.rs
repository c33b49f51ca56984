//! Raw FFI bindings to the FLI camera library (`libfli`).
//!
//! Bindings are generated by `bindgen` at build time when the `libfli-sdk`
//! feature is enabled. Without the feature the crate compiles to an empty
//! module so that dependents can still build in mock mode.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(dead_code)]
#![allow(missing_docs)]
#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
