//! Hook registry
//!
//! Process-wide table of registered hooks, the instances they are attached to
//! and the vtable slots patched on their behalf.
//!
//! Lifecycle per attachment: `attach` installs (Uninstalled -> Installed),
//! `detach` removes (Installed -> Uninstalled). A failed install leaves
//! nothing behind. At most one attachment exists per (hook, target) pair.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::thread::ThreadId;

use bitflags::bitflags;
use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};

use super::deferred::{self, Removal};
use super::dispatch::{Decision, HookCall};
use super::param::ParamType;
use super::vtable::{self, SlotPatch};
use super::HookError;
use crate::gamedata::{GamedataError, OffsetTable, Platform};

new_key_type! {
    /// Handle for a registered hook
    pub struct HookHandle;

    /// Handle for one attachment of a hook to a target
    pub struct ActiveHookKey;
}

bitflags! {
    /// Flags that control hook behavior
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HookFlags: u32 {
        /// Run the callback after the original, with its return value visible
        const POST = 0x01;
        /// Attach to every client as it is put in the server
        const AUTO_ATTACH = 0x02;
    }
}

/// What a hook is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Individual objects; other objects of the class run unhooked
    PerInstance,
    /// A whole vtable; every object using it is intercepted
    Global,
}

/// Address of a hooked object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(usize);

impl InstanceId {
    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr as usize)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance {:#x}", self.0)
    }
}

/// Callback invoked for each intercepted call
pub type HookCallback = dyn Fn(&HookCall) -> Decision + Send + Sync;

/// Description of one function to intercept
pub struct HookDescriptor {
    symbol: String,
    target: TargetKind,
    params: Vec<ParamType>,
    returns: ParamType,
    flags: HookFlags,
    thunk: usize,
    offset: Option<usize>,
    callback: Arc<HookCallback>,
}

impl HookDescriptor {
    /// Create a descriptor for `symbol` whose native entry point is `thunk`
    ///
    /// Usually obtained from the `<name>_descriptor()` function generated by
    /// [`vtable_thunk!`](crate::vtable_thunk), which fills in the signature.
    pub fn new(symbol: &str, thunk: *const ()) -> Self {
        Self {
            symbol: symbol.to_string(),
            target: TargetKind::PerInstance,
            params: Vec::new(),
            returns: ParamType::Void,
            flags: HookFlags::empty(),
            thunk: thunk as usize,
            offset: None,
            callback: Arc::new(|_: &HookCall| Decision::Ignored),
        }
    }

    pub fn target(mut self, target: TargetKind) -> Self {
        self.target = target;
        self
    }

    pub fn params(mut self, params: Vec<ParamType>) -> Self {
        self.params = params;
        self
    }

    pub fn returns(mut self, returns: ParamType) -> Self {
        self.returns = returns;
        self
    }

    pub fn flags(mut self, flags: HookFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the vtable index directly
    pub fn offset(mut self, index: usize) -> Self {
        self.offset = Some(index);
        self
    }

    /// Resolve the vtable index from gamedata
    pub fn resolve(
        mut self,
        table: &OffsetTable,
        game: &str,
        platform: Platform,
    ) -> Result<Self, GamedataError> {
        let offset = table.lookup(game, &self.symbol, platform)?;
        self.offset = Some(offset as usize);
        Ok(self)
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&HookCall) -> Decision + Send + Sync + 'static,
    {
        self.callback = Arc::new(callback);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn target_kind(&self) -> TargetKind {
        self.target
    }

    pub fn hook_flags(&self) -> HookFlags {
        self.flags
    }

    pub fn resolved_offset(&self) -> Option<usize> {
        self.offset
    }
}

impl fmt::Debug for HookDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookDescriptor")
            .field("symbol", &self.symbol)
            .field("target", &self.target)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .field("flags", &self.flags)
            .field("thunk", &format_args!("{:#x}", self.thunk))
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// State of one attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Installed,
    /// Detached from inside a callback; the callback no longer fires and the
    /// slot is restored once dispatch unwinds
    PendingRemoval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Target {
    Instance(InstanceId),
    VTable(usize),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Instance(id) => id.fmt(f),
            Target::VTable(addr) => write!(f, "vtable {:#x}", addr),
        }
    }
}

struct RegisteredHook {
    symbol: String,
    target: TargetKind,
    params: Arc<[ParamType]>,
    returns: ParamType,
    flags: HookFlags,
    thunk: usize,
    index: usize,
    callback: Arc<HookCallback>,
    /// Unregistered from inside a callback, removal pending
    retiring: bool,
}

struct ActiveHook {
    hook: HookHandle,
    target: Target,
    slot: usize,
    state: HookState,
}

/// Everything dispatch needs for one call, copied out of the registry
pub(crate) struct Route {
    pub original: *const (),
    pub instance: InstanceId,
    pub params: Arc<[ParamType]>,
    pub returns: ParamType,
    pub flags: HookFlags,
    /// `None` when this object is not attached; the call passes through
    pub callback: Option<Arc<HookCallback>>,
}

#[derive(Default)]
struct Registry {
    hooks: SlotMap<HookHandle, RegisteredHook>,
    by_symbol: HashMap<String, HookHandle>,
    active: SlotMap<ActiveHookKey, ActiveHook>,
    by_target: HashMap<(HookHandle, Target), ActiveHookKey>,
    /// Patched slots keyed by slot address
    patches: HashMap<usize, SlotPatch>,
    main_thread: Option<ThreadId>,
}

/// Global hook registry
static REGISTRY: LazyLock<RwLock<Registry>> = LazyLock::new(|| RwLock::new(Registry::default()));

impl Registry {
    fn check_thread(&self, operation: &str) {
        if let Some(main) = self.main_thread {
            if main != std::thread::current().id() {
                tracing::warn!("Hook {} called off the main thread", operation);
            }
        }
    }

    fn install(
        &mut self,
        handle: HookHandle,
        target: Target,
        slot: *mut *const (),
    ) -> Result<ActiveHookKey, HookError> {
        let hook = self.hooks.get(handle).ok_or(HookError::NotFound)?;
        let symbol = hook.symbol.clone();
        let thunk = hook.thunk as *const ();
        let index = hook.index;

        match self.patches.get_mut(&(slot as usize)) {
            Some(patch) if patch.replacement() == thunk => patch.acquire(),
            Some(patch) => {
                return Err(HookError::InstallFailure {
                    symbol,
                    target: target.to_string(),
                    reason: format!("slot is already patched by '{}'", patch.name()),
                })
            }
            None => {
                // SAFETY: slot was resolved and validated by the caller, and the
                // thunk was generated for this symbol's signature
                let patch = unsafe { SlotPatch::install(&symbol, slot, index, thunk) }.map_err(|e| {
                    HookError::InstallFailure {
                        symbol: symbol.clone(),
                        target: target.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                self.patches.insert(slot as usize, patch);
            }
        }

        let key = self.active.insert(ActiveHook {
            hook: handle,
            target,
            slot: slot as usize,
            state: HookState::Installed,
        });
        self.by_target.insert((handle, target), key);

        tracing::info!("Attached hook '{}' to {}", symbol, target);
        Ok(key)
    }

    /// Restore the patch at `slot` and forget it
    ///
    /// A patch whose slot was taken over by another hooker stays registered
    /// with no users, so calls that still come through our thunk reach the
    /// original.
    fn retire_patch(&mut self, slot: usize) {
        let Some(patch) = self.patches.get(&slot) else {
            return;
        };

        // SAFETY: the vtable belongs to the game binary and outlives the hook
        match unsafe { patch.restore() } {
            Ok(true) => {
                self.patches.remove(&slot);
            }
            Ok(false) => {
                tracing::warn!(
                    "Keeping '{}' thunk routed to the original while another hook chains through it",
                    patch.name()
                );
            }
            Err(e) => {
                tracing::error!("Failed to restore vtable slot for '{}': {}", patch.name(), e);
            }
        }
    }

    /// Remove one attachment, restoring the slot if it was the last user
    fn remove_active(&mut self, key: ActiveHookKey) -> bool {
        let Some(active) = self.active.remove(key) else {
            return false;
        };
        self.by_target.remove(&(active.hook, active.target));

        let symbol = self
            .hooks
            .get(active.hook)
            .map(|h| h.symbol.as_str())
            .unwrap_or("<unknown>");

        let last_user = self
            .patches
            .get_mut(&active.slot)
            .map(|patch| patch.release())
            .unwrap_or(false);

        tracing::info!("Detached hook '{}' from {}", symbol, active.target);

        if last_user {
            self.retire_patch(active.slot);
        }
        true
    }

    fn remove_hook(&mut self, handle: HookHandle) -> bool {
        let keys: Vec<ActiveHookKey> = self
            .active
            .iter()
            .filter(|(_, a)| a.hook == handle)
            .map(|(k, _)| k)
            .collect();

        for key in keys {
            self.remove_active(key);
        }

        match self.hooks.remove(handle) {
            Some(hook) => {
                self.by_symbol.remove(&hook.symbol);
                tracing::info!("Unregistered hook '{}'", hook.symbol);
                true
            }
            None => false,
        }
    }

    fn mark_pending(&mut self, key: ActiveHookKey) -> bool {
        match self.active.get_mut(key) {
            Some(active) => {
                active.state = HookState::PendingRemoval;
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        let handles: Vec<HookHandle> = self.hooks.keys().collect();
        for handle in handles {
            self.remove_hook(handle);
        }

        // Anything left has no users; patches still chained through stay
        let slots: Vec<usize> = self.patches.keys().copied().collect();
        for slot in slots {
            self.retire_patch(slot);
        }
        self.active.clear();
        self.by_target.clear();
        self.main_thread = None;
    }

    /// Route for a thunk reached through a patch no hook owns any more
    fn passthrough_route(&self, symbol: &str, this: *mut c_void) -> Option<Route> {
        let patch = self.patches.iter().find_map(|(&slot, patch)| {
            // SAFETY: `this` is the object currently being called through its vtable
            let live = unsafe { vtable::slot_of_live(this, patch.index()) };
            (patch.name() == symbol && live == slot).then_some(patch)
        })?;

        Some(Route {
            original: patch.original(),
            instance: InstanceId::from_ptr(this),
            params: Arc::from(Vec::new()),
            returns: ParamType::Void,
            flags: HookFlags::empty(),
            callback: None,
        })
    }
}

/// Initialize the registry for this process
///
/// Records the calling thread as the main thread. Calling it again is harmless.
pub fn init() {
    let mut registry = REGISTRY.write();
    let current = std::thread::current().id();
    if registry.main_thread.is_some_and(|t| t != current) {
        tracing::warn!("Hook registry re-initialized from a different thread");
    }
    registry.main_thread = Some(current);
    tracing::debug!("Hook registry initialized on {:?}", current);
}

/// Detach every hook, restore every slot and forget all registrations
///
/// Safe to call at any time, including when nothing was ever installed.
/// From inside a callback the teardown happens once dispatch unwinds.
pub fn teardown() {
    if deferred::in_dispatch() {
        {
            let mut registry = REGISTRY.write();
            let keys: Vec<ActiveHookKey> = registry.active.keys().collect();
            for key in keys {
                registry.mark_pending(key);
            }
        }
        deferred::defer(Removal::Teardown);
        return;
    }

    let mut registry = REGISTRY.write();
    let hooks = registry.hooks.len();
    registry.clear();
    if hooks > 0 {
        tracing::info!("Hook registry torn down ({} hooks removed)", hooks);
    }
}

/// Register a hook
///
/// The descriptor must have its offset resolved. Registering a symbol that is
/// already registered fails with [`HookError::DuplicateHook`], which carries
/// the handle of the hook that stays in place.
pub fn register(descriptor: HookDescriptor) -> Result<HookHandle, HookError> {
    let index = descriptor
        .offset
        .ok_or_else(|| HookError::Unresolved(descriptor.symbol.clone()))?;

    let mut registry = REGISTRY.write();
    registry.check_thread("registration");

    if let Some(&existing) = registry.by_symbol.get(&descriptor.symbol) {
        tracing::warn!(
            "Hook '{}' is already registered; keeping the existing hook",
            descriptor.symbol
        );
        return Err(HookError::DuplicateHook {
            symbol: descriptor.symbol,
            existing,
        });
    }

    let symbol = descriptor.symbol.clone();
    let handle = registry.hooks.insert(RegisteredHook {
        symbol: descriptor.symbol,
        target: descriptor.target,
        params: descriptor.params.into(),
        returns: descriptor.returns,
        flags: descriptor.flags,
        thunk: descriptor.thunk,
        index,
        callback: descriptor.callback,
        retiring: false,
    });
    registry.by_symbol.insert(symbol.clone(), handle);

    tracing::info!("Registered hook '{}' at vtable index {}", symbol, index);
    Ok(handle)
}

/// Unregister a hook, detaching it from everything
///
/// Returns `false` if the handle was already gone.
pub fn unregister(handle: HookHandle) -> bool {
    if deferred::in_dispatch() {
        {
            let mut registry = REGISTRY.write();
            let Some(hook) = registry.hooks.get_mut(handle) else {
                return false;
            };
            if hook.retiring {
                return false;
            }
            hook.retiring = true;

            let keys: Vec<ActiveHookKey> = registry
                .active
                .iter()
                .filter(|(_, a)| a.hook == handle)
                .map(|(k, _)| k)
                .collect();
            for key in keys {
                registry.mark_pending(key);
            }
        }
        deferred::defer(Removal::Unregister(handle));
        return true;
    }

    let mut registry = REGISTRY.write();
    registry.check_thread("unregistration");
    registry.remove_hook(handle)
}

/// Attach a per-instance hook to one object
///
/// Attaching an object that is already attached returns its existing key.
///
/// # Safety
/// `instance` must be null or point at a live object whose first field is
/// its vtable pointer, and the hook's thunk must match the signature of the
/// slot at the resolved offset.
pub unsafe fn attach(handle: HookHandle, instance: *mut c_void) -> Result<ActiveHookKey, HookError> {
    let mut registry = REGISTRY.write();
    registry.check_thread("attach");

    let (symbol, index) = hook_for_target(&registry, handle, TargetKind::PerInstance)?;

    let target = Target::Instance(InstanceId::from_ptr(instance));
    if let Some(key) = existing_attachment(&mut registry, handle, target) {
        return Ok(key);
    }

    let slot = vtable::resolve_slot(instance, index).map_err(|e| HookError::InstallFailure {
        symbol,
        target: target.to_string(),
        reason: e.to_string(),
    })?;

    registry.install(handle, target, slot)
}

/// Attach a global hook to a vtable
///
/// # Safety
/// `vtable` must be a live vtable containing the hook's resolved offset, and
/// the thunk must match that slot's signature.
pub unsafe fn attach_global(
    handle: HookHandle,
    vtable: *mut *const (),
) -> Result<ActiveHookKey, HookError> {
    let mut registry = REGISTRY.write();
    registry.check_thread("attach");

    let (symbol, index) = hook_for_target(&registry, handle, TargetKind::Global)?;

    let target = Target::VTable(vtable as usize);
    if let Some(key) = existing_attachment(&mut registry, handle, target) {
        return Ok(key);
    }

    let slot = vtable::slot_in(vtable, index).map_err(|e| HookError::InstallFailure {
        symbol,
        target: target.to_string(),
        reason: e.to_string(),
    })?;

    registry.install(handle, target, slot)
}

/// Symbol and vtable index of a live hook of the given kind
fn hook_for_target(
    registry: &Registry,
    handle: HookHandle,
    kind: TargetKind,
) -> Result<(String, usize), HookError> {
    let hook = registry.hooks.get(handle).ok_or(HookError::NotFound)?;
    if hook.retiring {
        return Err(HookError::NotFound);
    }
    if hook.target != kind {
        return Err(HookError::WrongTarget(hook.symbol.clone()));
    }
    Ok((hook.symbol.clone(), hook.index))
}

/// Existing key for a target, reviving it if a removal was pending
fn existing_attachment(
    registry: &mut Registry,
    handle: HookHandle,
    target: Target,
) -> Option<ActiveHookKey> {
    let key = *registry.by_target.get(&(handle, target))?;
    if let Some(active) = registry.active.get_mut(key) {
        if active.state == HookState::PendingRemoval {
            tracing::debug!("Re-attached {} before its pending removal", target);
            active.state = HookState::Installed;
        } else {
            tracing::debug!("{} is already attached", target);
        }
    }
    Some(key)
}

/// Detach one attachment by key
///
/// Never fails; returns `false` if the key was already detached.
pub fn detach_key(key: ActiveHookKey) -> bool {
    if deferred::in_dispatch() {
        let marked = REGISTRY.write().mark_pending(key);
        if marked {
            deferred::defer(Removal::Detach(key));
        }
        return marked;
    }

    let mut registry = REGISTRY.write();
    registry.check_thread("detach");
    registry.remove_active(key)
}

/// Detach a per-instance hook from one object
///
/// Detaching an object that was never attached is a no-op.
pub fn detach(handle: HookHandle, instance: *mut c_void) -> bool {
    let target = Target::Instance(InstanceId::from_ptr(instance));
    let key = REGISTRY.read().by_target.get(&(handle, target)).copied();
    key.is_some_and(detach_key)
}

/// Detach every hook attached to an object
///
/// Returns how many attachments were removed (or scheduled for removal).
pub fn detach_instance(instance: *mut c_void) -> usize {
    let target = Target::Instance(InstanceId::from_ptr(instance));
    let keys: Vec<ActiveHookKey> = REGISTRY
        .read()
        .active
        .iter()
        .filter(|(_, a)| a.target == target)
        .map(|(k, _)| k)
        .collect();

    keys.into_iter().filter(|key| detach_key(*key)).count()
}

/// Look up a registered hook by symbol
pub fn find(symbol: &str) -> Option<HookHandle> {
    REGISTRY.read().by_symbol.get(symbol).copied()
}

/// Whether the hook is installed (and firing) on an object
pub fn is_attached(handle: HookHandle, instance: *mut c_void) -> bool {
    let registry = REGISTRY.read();
    let target = Target::Instance(InstanceId::from_ptr(instance));
    registry
        .by_target
        .get(&(handle, target))
        .and_then(|key| registry.active.get(*key))
        .is_some_and(|a| a.state == HookState::Installed)
}

/// State of an attachment, `None` once removed
pub fn state(key: ActiveHookKey) -> Option<HookState> {
    REGISTRY.read().active.get(key).map(|a| a.state)
}

pub fn registered_count() -> usize {
    REGISTRY.read().hooks.len()
}

pub fn active_count() -> usize {
    REGISTRY.read().active.len()
}

/// Per-instance hooks flagged [`HookFlags::AUTO_ATTACH`]
pub fn auto_attach_hooks() -> Vec<HookHandle> {
    REGISTRY
        .read()
        .hooks
        .iter()
        .filter(|(_, h)| {
            !h.retiring
                && h.target == TargetKind::PerInstance
                && h.flags.contains(HookFlags::AUTO_ATTACH)
        })
        .map(|(k, _)| k)
        .collect()
}

/// Resolve how a call reaching `symbol`'s thunk on `this` should be handled
pub(crate) fn route(symbol: &str, this: *mut c_void) -> Option<Route> {
    let registry = REGISTRY.read();
    let Some((handle, hook)) = registry
        .by_symbol
        .get(symbol)
        .and_then(|&handle| Some((handle, registry.hooks.get(handle)?)))
    else {
        return registry.passthrough_route(symbol, this);
    };

    // SAFETY: `this` is the object currently being called through its vtable
    let slot = unsafe { vtable::slot_of_live(this, hook.index) };
    let Some(patch) = registry.patches.get(&slot) else {
        return registry.passthrough_route(symbol, this);
    };

    let instance = InstanceId::from_ptr(this);
    let target = match hook.target {
        TargetKind::PerInstance => Target::Instance(instance),
        TargetKind::Global => Target::VTable(slot - hook.index * std::mem::size_of::<usize>()),
    };

    let callback = registry
        .by_target
        .get(&(handle, target))
        .and_then(|key| registry.active.get(*key))
        .filter(|a| a.state == HookState::Installed && !hook.retiring)
        .map(|_| Arc::clone(&hook.callback));

    Some(Route {
        original: patch.original(),
        instance,
        params: Arc::clone(&hook.params),
        returns: hook.returns,
        flags: hook.flags,
        callback,
    })
}

/// Apply a removal deferred while dispatching
pub(crate) fn apply_removal(removal: Removal) {
    let mut registry = REGISTRY.write();
    match removal {
        Removal::Detach(key) => {
            // Skip if re-attached in the meantime
            if registry
                .active
                .get(key)
                .is_some_and(|a| a.state == HookState::PendingRemoval)
            {
                registry.remove_active(key);
            }
        }
        Removal::Unregister(handle) => {
            if registry.hooks.get(handle).is_some_and(|h| h.retiring) {
                registry.remove_hook(handle);
            }
        }
        Removal::Teardown => registry.clear(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::hooks::testing::{serial, FakeClass, SLOT_EXPLOSION, SLOT_TAKE_DAMAGE};
    use crate::hooks::Param;

    crate::vtable_thunk! {
        fn take_damage_thunk("Test_TakeDamage")(amount: i32) -> i32;
    }

    crate::vtable_thunk! {
        fn explosion_thunk("Test_OnDamagedByExplosion")(info: *const c_void) -> i32;
    }

    /// Entry the chained hook forwards to, i.e. whatever it found in the slot
    static CHAINED_NEXT: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn chained_take_damage(this: *mut c_void, amount: i32) -> i32 {
        let next: extern "C" fn(*mut c_void, i32) -> i32 =
            unsafe { std::mem::transmute(CHAINED_NEXT.load(Ordering::SeqCst)) };
        next(this, amount)
    }

    /// Install `chained_take_damage` over whatever is in the slot now
    fn chain_over(class: &mut FakeClass) -> *const () {
        let found = class.slot(SLOT_TAKE_DAMAGE);
        CHAINED_NEXT.store(found as usize, Ordering::SeqCst);
        class.set_slot(SLOT_TAKE_DAMAGE, chained_take_damage as *const ());
        found
    }

    fn take_damage_hook(callback: impl Fn(&HookCall) -> Decision + Send + Sync + 'static) -> HookHandle {
        register(
            take_damage_thunk_descriptor()
                .offset(SLOT_TAKE_DAMAGE)
                .callback(callback),
        )
        .unwrap()
    }

    #[test]
    fn test_register_requires_offset() {
        let _guard = serial();
        let err = register(take_damage_thunk_descriptor()).unwrap_err();
        assert!(matches!(err, HookError::Unresolved(s) if s == "Test_TakeDamage"));
        assert_eq!(registered_count(), 0);
    }

    #[test]
    fn test_duplicate_registration_keeps_existing() {
        let _guard = serial();
        let first = take_damage_hook(|_| Decision::Ignored);

        let err = register(take_damage_thunk_descriptor().offset(SLOT_TAKE_DAMAGE)).unwrap_err();
        match err {
            HookError::DuplicateHook { existing, .. } => assert_eq!(existing, first),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registered_count(), 1);
        assert_eq!(find("Test_TakeDamage"), Some(first));
    }

    #[test]
    fn test_attach_detach_restores_slot() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();
        let before = class.slot(SLOT_TAKE_DAMAGE);

        let handle = take_damage_hook(|_| Decision::Handled(Param::Int(0)));
        unsafe { attach(handle, player.as_ptr()).unwrap() };
        assert_ne!(class.slot(SLOT_TAKE_DAMAGE), before);
        assert!(is_attached(handle, player.as_ptr()));

        assert!(detach(handle, player.as_ptr()));
        assert_eq!(class.slot(SLOT_TAKE_DAMAGE), before);
        assert_eq!(active_count(), 0);
    }

    #[test]
    fn test_reattach_is_noop() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();

        let handle = take_damage_hook(|_| Decision::Ignored);
        let first = unsafe { attach(handle, player.as_ptr()).unwrap() };
        let second = unsafe { attach(handle, player.as_ptr()).unwrap() };
        assert_eq!(first, second);
        assert_eq!(active_count(), 1);

        // One detach fully removes it
        assert!(detach(handle, player.as_ptr()));
        assert!(!detach(handle, player.as_ptr()));
    }

    #[test]
    fn test_detach_never_attached_is_noop() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();
        let handle = take_damage_hook(|_| Decision::Ignored);

        assert!(!detach(handle, player.as_ptr()));
        assert_eq!(detach_instance(player.as_ptr()), 0);
        assert!(!detach(handle, std::ptr::null_mut()));
    }

    #[test]
    fn test_only_attached_instance_is_intercepted() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut hooked = class.spawn();
        let mut bystander = class.spawn();

        let handle = take_damage_hook(|_| Decision::Handled(Param::Int(0)));
        unsafe { attach(handle, hooked.as_ptr()).unwrap() };

        assert_eq!(hooked.take_damage(30), 0);
        assert_eq!(hooked.health, 100);

        // Same vtable, not attached: original runs
        assert_eq!(bystander.take_damage(30), 70);
        assert_eq!(bystander.health, 70);
    }

    #[test]
    fn test_shared_slot_restored_after_last_detach() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut a = class.spawn();
        let mut b = class.spawn();
        let before = class.slot(SLOT_TAKE_DAMAGE);

        let handle = take_damage_hook(|_| Decision::Ignored);
        unsafe {
            attach(handle, a.as_ptr()).unwrap();
            attach(handle, b.as_ptr()).unwrap();
        }

        detach(handle, a.as_ptr());
        assert_ne!(class.slot(SLOT_TAKE_DAMAGE), before);
        assert_eq!(b.take_damage(10), 90);

        detach(handle, b.as_ptr());
        assert_eq!(class.slot(SLOT_TAKE_DAMAGE), before);
    }

    #[test]
    fn test_slot_owned_by_other_hook() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();

        let damage = take_damage_hook(|_| Decision::Ignored);
        // Misconfigured offset pointing at the same slot
        let explosion = register(explosion_thunk_descriptor().offset(SLOT_TAKE_DAMAGE)).unwrap();

        unsafe { attach(damage, player.as_ptr()).unwrap() };
        let err = unsafe { attach(explosion, player.as_ptr()) }.unwrap_err();
        assert!(err.is_install_failure());
        assert_eq!(active_count(), 1);
    }

    #[test]
    fn test_attach_null_instance_fails() {
        let _guard = serial();
        let handle = take_damage_hook(|_| Decision::Ignored);
        let err = unsafe { attach(handle, std::ptr::null_mut()) }.unwrap_err();
        assert!(err.is_install_failure());
        assert_eq!(active_count(), 0);
    }

    #[test]
    fn test_unregister_restores_and_is_repeatable() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut a = class.spawn();
        let mut b = class.spawn();
        let before = class.slot(SLOT_TAKE_DAMAGE);

        let handle = take_damage_hook(|_| Decision::Ignored);
        unsafe {
            attach(handle, a.as_ptr()).unwrap();
            attach(handle, b.as_ptr()).unwrap();
        }

        assert!(unregister(handle));
        assert!(!unregister(handle));
        assert_eq!(class.slot(SLOT_TAKE_DAMAGE), before);
        assert_eq!(find("Test_TakeDamage"), None);
        assert!(matches!(
            unsafe { attach(handle, a.as_ptr()) },
            Err(HookError::NotFound)
        ));
    }

    #[test]
    fn test_teardown_restores_everything() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();
        let damage_before = class.slot(SLOT_TAKE_DAMAGE);
        let explosion_before = class.slot(SLOT_EXPLOSION);

        let damage = take_damage_hook(|_| Decision::Ignored);
        let explosion = register(explosion_thunk_descriptor().offset(SLOT_EXPLOSION)).unwrap();
        unsafe {
            attach(damage, player.as_ptr()).unwrap();
            attach(explosion, player.as_ptr()).unwrap();
        }

        teardown();
        assert_eq!(class.slot(SLOT_TAKE_DAMAGE), damage_before);
        assert_eq!(class.slot(SLOT_EXPLOSION), explosion_before);
        assert_eq!(registered_count(), 0);

        // Harmless when empty
        teardown();
    }

    #[test]
    fn test_detach_under_chained_hook_keeps_forwarding() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();
        let before = class.slot(SLOT_TAKE_DAMAGE);

        let handle = take_damage_hook(|_| Decision::Handled(Param::Int(0)));
        unsafe { attach(handle, player.as_ptr()).unwrap() };
        let thunk = chain_over(&mut class);
        assert_eq!(thunk, take_damage_thunk as *const ());
        assert_eq!(player.take_damage(30), 0);

        // Can't restore under the other hook; it still calls our thunk
        assert!(detach(handle, player.as_ptr()));
        assert_eq!(class.slot(SLOT_TAKE_DAMAGE), chained_take_damage as *const ());
        assert_eq!(player.take_damage(30), 70);
        assert_eq!(player.health, 70);

        // Once the other hook unwinds, teardown puts the original back
        class.set_slot(SLOT_TAKE_DAMAGE, thunk);
        teardown();
        assert_eq!(class.slot(SLOT_TAKE_DAMAGE), before);
    }

    #[test]
    fn test_unregister_under_chained_hook_keeps_forwarding() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut player = class.spawn();
        let before = class.slot(SLOT_TAKE_DAMAGE);

        let handle = take_damage_hook(|_| Decision::Handled(Param::Int(0)));
        unsafe { attach(handle, player.as_ptr()).unwrap() };
        let thunk = chain_over(&mut class);

        assert!(unregister(handle));
        assert_eq!(find("Test_TakeDamage"), None);
        assert_eq!(player.take_damage(30), 70);

        // Teardown leaves it in place too while the chain is there
        teardown();
        assert_eq!(player.take_damage(30), 40);

        // A new registration picks the retained patch back up
        let handle = take_damage_hook(|_| Decision::Handled(Param::Int(0)));
        unsafe { attach(handle, player.as_ptr()).unwrap() };
        assert_eq!(player.take_damage(30), 0);
        assert_eq!(player.health, 40);

        class.set_slot(SLOT_TAKE_DAMAGE, thunk);
        teardown();
        assert_eq!(class.slot(SLOT_TAKE_DAMAGE), before);
    }

    #[test]
    fn test_global_hook_intercepts_every_instance() {
        let _guard = serial();
        let mut class = FakeClass::new();
        let mut a = class.spawn();
        let mut b = class.spawn();

        let handle = register(
            take_damage_thunk_descriptor()
                .offset(SLOT_TAKE_DAMAGE)
                .target(TargetKind::Global)
                .callback(|_| Decision::Handled(Param::Int(-1))),
        )
        .unwrap();

        assert!(matches!(
            unsafe { attach(handle, a.as_ptr()) },
            Err(HookError::WrongTarget(_))
        ));

        let key = unsafe { attach_global(handle, class.vtable()).unwrap() };
        assert_eq!(a.take_damage(5), -1);
        assert_eq!(b.take_damage(5), -1);

        assert!(detach_key(key));
        assert_eq!(a.take_damage(5), 95);
    }

    #[test]
    fn test_auto_attach_listing() {
        let _guard = serial();
        let auto = register(
            explosion_thunk_descriptor()
                .offset(SLOT_EXPLOSION)
                .flags(HookFlags::AUTO_ATTACH),
        )
        .unwrap();
        take_damage_hook(|_| Decision::Ignored);

        assert_eq!(auto_attach_hooks(), vec![auto]);
    }
}
