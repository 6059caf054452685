//! FFI boundary with the host bridge
//!
//! Every function here is `extern "C"` and exported unmangled; the header
//! for the bridge is generated from this module by the build script.

pub mod exports;
