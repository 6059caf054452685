//! Hook system
//!
//! Intercepts virtual functions on individual objects:
//! - [`registry`] owns hook descriptors and which instances they are attached to
//! - [`vtable`] patches and restores the vtable slots
//! - [`dispatch`] runs callbacks and decides whether the original executes
//! - [`vtable_thunk!`](crate::vtable_thunk) generates the native entry point
//!
//! All installation and removal is expected on the game's main thread.
//! Removals requested from inside a callback are deferred until the outermost
//! dispatch returns.

mod deferred;
pub mod dispatch;
pub mod param;
pub mod registry;
mod thunk;
pub(crate) mod vtable;

pub use deferred::pending_removals;
pub use dispatch::{Decision, HookCall};
pub use param::{HookArg, Param, ParamBundle, ParamType};
pub use registry::{
    active_count, attach, attach_global, detach, detach_instance, detach_key, find, init,
    is_attached, register, registered_count, state, teardown, unregister, ActiveHookKey,
    HookCallback, HookDescriptor, HookFlags, HookHandle, HookState, InstanceId, TargetKind,
};

/// Error type for hook operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Hook '{symbol}' is already registered")]
    DuplicateHook {
        symbol: String,
        existing: HookHandle,
    },

    #[error("No offset resolved for hook '{0}'")]
    Unresolved(String),

    #[error("Hook not found")]
    NotFound,

    #[error("Hook '{0}' does not support this target kind")]
    WrongTarget(String),

    #[error("Failed to install '{symbol}' on {target}: {reason}")]
    InstallFailure {
        symbol: String,
        target: String,
        reason: String,
    },

    #[error("Instance pointer is null")]
    NullInstance,

    #[error("Invalid address: {0:x}")]
    InvalidAddress(usize),

    #[error("Memory protection failed: {0}")]
    MemoryProtection(String),
}

impl HookError {
    /// Whether this error leaves one instance unhooked rather than the hook unusable
    pub fn is_install_failure(&self) -> bool {
        matches!(self, HookError::InstallFailure { .. })
    }
}
