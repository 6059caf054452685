//! Callback dispatch
//!
//! Runs synchronously inside the thunk, on the calling thread, at the moment
//! the original call would have happened. The registry lock is released
//! before the callback runs, so callbacks may attach, detach or call the
//! hooked function again.

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::deferred::DispatchGuard;
use super::param::{Param, ParamBundle};
use super::registry::{self, HookCallback, HookFlags, InstanceId, Route};

/// What a callback wants done with the intercepted call
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Skip the original; the caller receives this value
    Handled(Param),
    /// Run the original unchanged and return its result
    Ignored,
    /// Run the original with these arguments instead
    ModifiedParams(ParamBundle),
}

/// One intercepted call as seen by a callback
#[derive(Debug, Clone)]
pub struct HookCall {
    /// Object the function was called on
    pub instance: InstanceId,
    /// Arguments, excluding `this`
    pub params: ParamBundle,
    /// Return value of the original; only set for [`HookFlags::POST`] hooks
    pub return_value: Option<Param>,
}

/// Calls the original implementation with a given argument bundle
///
/// Returns `None` if the bundle can't be converted to the native signature.
pub type CallOriginal<'a> = &'a dyn Fn(*const (), &ParamBundle) -> Option<Param>;

/// Whether a value converts to the native return type
///
/// [`ParamType`](super::ParamType) is wider than the native types: an `i32`
/// return is reported as `Int`, which also holds values an `i32` can't.
pub type AcceptsReturn = fn(Param) -> bool;

/// Entry point for generated thunks
///
/// Returns the value the native caller should receive. If no route exists for
/// this call (the slot is not ours any more) the result is `Param::Void`,
/// which the thunk turns into the return type's zero value.
pub fn invoke(
    symbol: &str,
    this: *mut c_void,
    params: ParamBundle,
    call_original: CallOriginal<'_>,
    accepts_return: AcceptsReturn,
) -> Param {
    let Some(route) = registry::route(symbol, this) else {
        tracing::error!(
            "Thunk for '{}' reached on {:#x} without an installed hook",
            symbol,
            this as usize
        );
        return Param::Void;
    };

    let _guard = DispatchGuard::enter();

    let Some(callback) = route.callback.clone() else {
        return forward(symbol, &route, call_original, &params);
    };

    if route.flags.contains(HookFlags::POST) {
        let ret = forward(symbol, &route, call_original, &params);
        let call = HookCall {
            instance: route.instance,
            params,
            return_value: Some(ret),
        };

        return match run_callback(symbol, &*callback, &call) {
            Decision::Handled(value) if returnable(symbol, &route, value, accepts_return) => value,
            Decision::Handled(_) => ret,
            Decision::Ignored => ret,
            Decision::ModifiedParams(_) => {
                tracing::warn!(
                    "Hook '{}' runs after the original; parameter changes are ignored",
                    symbol
                );
                ret
            }
        };
    }

    let call = HookCall {
        instance: route.instance,
        params,
        return_value: None,
    };

    match run_callback(symbol, &*callback, &call) {
        Decision::Handled(value) if returnable(symbol, &route, value, accepts_return) => value,
        Decision::Handled(_) => forward(symbol, &route, call_original, &call.params),
        Decision::Ignored => forward(symbol, &route, call_original, &call.params),
        Decision::ModifiedParams(modified) if modified.matches(&route.params) => {
            match call_original(route.original, &modified) {
                Some(ret) => ret,
                None => {
                    tracing::warn!(
                        "Hook '{}' supplied out-of-range arguments; calling original unchanged",
                        symbol
                    );
                    forward(symbol, &route, call_original, &call.params)
                }
            }
        }
        Decision::ModifiedParams(_) => {
            tracing::error!(
                "Hook '{}' supplied arguments that don't match its signature; calling original unchanged",
                symbol
            );
            forward(symbol, &route, call_original, &call.params)
        }
    }
}

/// Check a `Handled` value against the hooked signature, logging a mismatch
fn returnable(symbol: &str, route: &Route, value: Param, accepts_return: AcceptsReturn) -> bool {
    if value.kind() != route.returns {
        tracing::error!(
            "Hook '{}' returned {:?}, expected {:?}; using the original result",
            symbol,
            value.kind(),
            route.returns
        );
        return false;
    }
    if !accepts_return(value) {
        tracing::error!(
            "Hook '{}' returned {:?}, out of range for the native return type; using the original result",
            symbol,
            value
        );
        return false;
    }
    true
}

fn forward(symbol: &str, route: &Route, call_original: CallOriginal<'_>, params: &ParamBundle) -> Param {
    call_original(route.original, params).unwrap_or_else(|| {
        tracing::error!("Could not forward '{}' to the original", symbol);
        route.returns.zero()
    })
}

/// Run a callback, treating a panic as `Ignored`
///
/// Unwinding into native code would abort the host process.
fn run_callback(symbol: &str, callback: &HookCallback, call: &HookCall) -> Decision {
    match catch_unwind(AssertUnwindSafe(|| callback(call))) {
        Ok(decision) => decision,
        Err(_) => {
            tracing::error!("Hook '{}' panicked; running original", symbol);
            Decision::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::hooks::registry::{attach, detach, detach_key, register, state, unregister, HookState};
    use crate::hooks::testing::{serial, FakeClass, SLOT_EXPLOSION, SLOT_TAKE_DAMAGE};
    use crate::hooks::{pending_removals, HookHandle};

    crate::vtable_thunk! {
        fn take_damage_thunk("Dispatch_TakeDamage")(amount: i32) -> i32;
    }

    crate::vtable_thunk! {
        fn explosion_thunk("Dispatch_OnDamagedByExplosion")(info: *const c_void) -> i32;
    }

    fn hook_take_damage(flags: HookFlags, callback: impl Fn(&HookCall) -> Decision + Send + Sync + 'static) -> HookHandle {
        register(
            take_damage_thunk_descriptor()
                .offset(SLOT_TAKE_DAMAGE)
                .flags(flags)
                .callback(callback),
        )
        .unwrap()
    }

    #[test]
    fn test_handled_zero_suppresses_original() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();

        let handle = register(
            explosion_thunk_descriptor()
                .offset(SLOT_EXPLOSION)
                .callback(|_| Decision::Handled(Param::Int(0))),
        )
        .unwrap();
        unsafe { attach(handle, player.as_ptr()).unwrap() };

        let info = 0x5000usize as *const c_void;
        assert_eq!(player.damaged_by_explosion(info), 0);
        assert_eq!(player.explosions, 0);
    }

    #[test]
    fn test_ignored_matches_unhooked_behavior() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut hooked = class.spawn();
        let mut plain = class.spawn();

        let handle = hook_take_damage(HookFlags::empty(), |_| Decision::Ignored);
        unsafe { attach(handle, hooked.as_ptr()).unwrap() };

        for amount in [0, 7, 55] {
            assert_eq!(hooked.take_damage(amount), plain.take_damage(amount));
        }
        assert_eq!(hooked.health, plain.health);
    }

    #[test]
    fn test_callback_sees_instance_and_params() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();
        let expected = player.as_ptr() as usize;

        let handle = hook_take_damage(HookFlags::empty(), move |call| {
            assert_eq!(call.instance.addr(), expected);
            assert_eq!(call.params.get(0), Some(Param::Int(12)));
            assert_eq!(call.return_value, None);
            Decision::Ignored
        });
        unsafe { attach(handle, player.as_ptr()).unwrap() };

        assert_eq!(player.take_damage(12), 88);
    }

    #[test]
    fn test_modified_params_reach_original() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();

        let handle = hook_take_damage(HookFlags::empty(), |call| {
            let mut params = call.params.clone();
            params.set(0, Param::Int(1));
            Decision::ModifiedParams(params)
        });
        unsafe { attach(handle, player.as_ptr()).unwrap() };

        assert_eq!(player.take_damage(50), 99);
    }

    #[test]
    fn test_mismatched_decisions_fall_back_to_original() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();

        let handle = hook_take_damage(HookFlags::empty(), |call| match call.params.get(0) {
            Some(Param::Int(1)) => Decision::Handled(Param::Bool(true)),
            Some(Param::Int(2)) => Decision::ModifiedParams(ParamBundle::new(vec![Param::Float(1.0)])),
            // Doesn't fit in an i32
            _ => Decision::ModifiedParams(ParamBundle::new(vec![Param::Int(i64::MAX)])),
        });
        unsafe { attach(handle, player.as_ptr()).unwrap() };

        assert_eq!(player.take_damage(1), 99);
        assert_eq!(player.take_damage(2), 97);
        assert_eq!(player.take_damage(3), 94);
    }

    #[test]
    fn test_out_of_range_return_falls_back_to_original() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();

        // Right kind, but no i32 can hold it
        let handle = hook_take_damage(HookFlags::empty(), |_| Decision::Handled(Param::Int(i64::MAX)));
        unsafe { attach(handle, player.as_ptr()).unwrap() };

        assert_eq!(player.take_damage(30), 70);
        assert_eq!(player.health, 70);
    }

    #[test]
    fn test_post_hook_out_of_range_keeps_original_result() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();

        let handle = hook_take_damage(HookFlags::POST, |_| Decision::Handled(Param::Int(i64::from(i32::MIN) - 1)));
        unsafe { attach(handle, player.as_ptr()).unwrap() };

        assert_eq!(player.take_damage(25), 75);
    }

    #[test]
    fn test_post_hook_replaces_return_value() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();

        let handle = hook_take_damage(HookFlags::POST, |call| match call.return_value {
            Some(Param::Int(health)) if health < 50 => Decision::Handled(Param::Int(50)),
            _ => Decision::Ignored,
        });
        unsafe { attach(handle, player.as_ptr()).unwrap() };

        assert_eq!(player.take_damage(10), 90);
        // Original still ran; only the reported value changed
        assert_eq!(player.take_damage(60), 50);
        assert_eq!(player.health, 30);
    }

    #[test]
    fn test_panicking_callback_runs_original() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();

        let handle = hook_take_damage(HookFlags::empty(), |_| panic!("callback failure"));
        unsafe { attach(handle, player.as_ptr()).unwrap() };

        assert_eq!(player.take_damage(5), 95);
    }

    #[test]
    fn test_reentrant_call_is_tolerated() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();
        let depth = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&depth);
        let handle = hook_take_damage(HookFlags::empty(), move |call| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                // Call the hooked function on the same object from inside the hook
                let object = call.instance.as_ptr() as *mut crate::hooks::testing::FakeObject;
                let inner = unsafe { (*object).take_damage(1) };
                return Decision::Handled(Param::Int(inner as i64));
            }
            Decision::Ignored
        });
        unsafe { attach(handle, player.as_ptr()).unwrap() };

        assert_eq!(player.take_damage(40), 99);
        assert_eq!(depth.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_detach_from_callback_is_deferred() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();
        let before = class.slot(SLOT_TAKE_DAMAGE);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let handle = hook_take_damage(HookFlags::empty(), move |call| {
            counter.fetch_add(1, Ordering::SeqCst);
            let handle = crate::hooks::find("Dispatch_TakeDamage").unwrap();
            assert!(detach(handle, call.instance.as_ptr()));
            // Still mid-dispatch: the slot stays patched until we return
            assert_eq!(pending_removals(), 1);
            Decision::Handled(Param::Int(0))
        });
        let key = unsafe { attach(handle, player.as_ptr()).unwrap() };

        assert_eq!(player.take_damage(10), 0);
        assert_eq!(state(key), None);
        assert_eq!(pending_removals(), 0);
        assert_eq!(class.slot(SLOT_TAKE_DAMAGE), before);

        // Unhooked from now on
        assert_eq!(player.take_damage(10), 90);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_from_callback_is_deferred() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();
        let before = class.slot(SLOT_TAKE_DAMAGE);

        let handle = hook_take_damage(HookFlags::empty(), |_| {
            let handle = crate::hooks::find("Dispatch_TakeDamage").unwrap();
            assert!(unregister(handle));
            // Second call while pending is a no-op
            assert!(!unregister(handle));
            Decision::Ignored
        });
        let key = unsafe { attach(handle, player.as_ptr()).unwrap() };

        assert_eq!(player.take_damage(10), 90);
        assert_eq!(state(key), None);
        assert_eq!(crate::hooks::find("Dispatch_TakeDamage"), None);
        assert_eq!(class.slot(SLOT_TAKE_DAMAGE), before);
    }

    #[test]
    fn test_reattach_while_pending_cancels_removal() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();
        let patched_keys = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let keys = Arc::clone(&patched_keys);
        let counter = Arc::clone(&calls);
        let handle = hook_take_damage(HookFlags::empty(), move |call| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                let handle = crate::hooks::find("Dispatch_TakeDamage").unwrap();
                assert!(detach(handle, call.instance.as_ptr()));
                let key = unsafe { attach(handle, call.instance.as_ptr()).unwrap() };
                keys.lock().push((key, state(key)));
            }
            Decision::Handled(Param::Int(0))
        });
        let key = unsafe { attach(handle, player.as_ptr()).unwrap() };
        let patched = class.slot(SLOT_TAKE_DAMAGE);

        assert_eq!(player.take_damage(10), 0);
        assert_eq!(*patched_keys.lock(), vec![(key, Some(HookState::Installed))]);

        // The queued detach was dropped on flush
        assert_eq!(pending_removals(), 0);
        assert_eq!(state(key), Some(HookState::Installed));
        assert_eq!(class.slot(SLOT_TAKE_DAMAGE), patched);
        assert_eq!(player.take_damage(10), 0);
        assert_eq!(player.health, 100);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pending_detach_marks_state() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();

        let key_cell: Arc<parking_lot::Mutex<Option<crate::hooks::ActiveHookKey>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let observed = Arc::new(parking_lot::Mutex::new(None));

        let keys = Arc::clone(&key_cell);
        let seen = Arc::clone(&observed);
        let handle = hook_take_damage(HookFlags::empty(), move |_| {
            if let Some(key) = *keys.lock() {
                assert!(detach_key(key));
                *seen.lock() = state(key);
            }
            Decision::Ignored
        });
        let key = unsafe { attach(handle, player.as_ptr()).unwrap() };
        *key_cell.lock() = Some(key);

        assert_eq!(player.take_damage(1), 99);
        assert_eq!(*observed.lock(), Some(HookState::PendingRemoval));
        assert_eq!(state(key), None);
    }
}
