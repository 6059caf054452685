//! quietblast core
//!
//! Per-instance virtual function interception for Source engine servers:
//! - [`gamedata`] loads vtable offsets from a gamedata file
//! - [`hooks`] registers hooks, patches vtable slots and dispatches callbacks
//! - [`listeners`] carries client events from the host
//! - [`lifecycle`] ties them together for a plugin's load and unload
//! - [`config`] reads the TOML configuration

pub mod config;
pub mod gamedata;
pub mod hooks;
pub mod lifecycle;
pub mod listeners;

#[doc(hidden)]
pub use paste;

// Re-export commonly used items
pub use config::{ConfigError, ConfigResult, CoreConfig, PluginConfig};
pub use gamedata::{GamedataError, OffsetEntry, OffsetTable, Platform};
pub use hooks::{
    Decision, HookCall, HookDescriptor, HookError, HookFlags, HookHandle, InstanceId, Param,
    ParamBundle, ParamType, TargetKind,
};
pub use lifecycle::{replay_clients, start, stop, StartError, StartOptions, StartReport};
pub use listeners::{on_client_disconnect, on_client_put_in_server, remove_listener, ListenerKey};
