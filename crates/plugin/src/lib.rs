//! quietblast plugin - FFI layer
//!
//! Compiles to a cdylib loaded by the host's native plugin bridge. The bridge
//! forwards load/unload and client events to the exports in [`ffi`]; the
//! hook itself lives in [`tinnitus`].

pub mod ffi;
pub mod tinnitus;
