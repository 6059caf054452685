//! VTable slot patching
//!
//! A [`SlotPatch`] owns one patched vtable slot: it remembers the original
//! entry so calls can be forwarded and so the slot can be restored exactly as
//! it was found. Objects of the same class share a vtable, so one patch serves
//! every attached instance of that class and is reference counted.

use std::ffi::c_void;
use std::mem::size_of;

use super::HookError;

/// An installed vtable slot replacement
#[derive(Debug)]
pub(crate) struct SlotPatch {
    /// Address of the vtable slot
    slot: *mut *const (),

    /// Entry found in the slot before patching
    original: *const (),

    /// Thunk written into the slot
    replacement: *const (),

    /// Index of the slot within its vtable
    index: usize,

    /// Active hooks routed through this slot
    users: usize,

    /// Debug name
    name: String,
}

// SAFETY: patches are only touched under the registry lock, and the slot they
// point at lives in the game binary for the process lifetime.
unsafe impl Send for SlotPatch {}
unsafe impl Sync for SlotPatch {}

impl SlotPatch {
    /// Write `replacement` into `slot`, recording the original entry
    ///
    /// # Safety
    /// `slot` must come from [`resolve_slot`] (or otherwise point at a live
    /// vtable slot), and `replacement` must have the slot's signature.
    pub(crate) unsafe fn install(
        name: &str,
        slot: *mut *const (),
        index: usize,
        replacement: *const (),
    ) -> Result<Self, HookError> {
        let original = std::ptr::read_volatile(slot);

        tracing::debug!(
            "Patching vtable slot for '{}': slot={:x}, original={:x}, thunk={:x}",
            name,
            slot as usize,
            original as usize,
            replacement as usize
        );

        write_slot(slot, replacement)?;

        Ok(Self {
            slot,
            original,
            replacement,
            index,
            users: 1,
            name: name.to_string(),
        })
    }

    /// Put the original entry back
    ///
    /// Returns `Ok(false)` without writing if something else has overwritten
    /// the slot since we patched it. A hook chained on top of ours may still
    /// call our thunk, so the caller must keep this patch around to route
    /// those calls to the original.
    ///
    /// # Safety
    /// The vtable must still be mapped.
    pub(crate) unsafe fn restore(&self) -> Result<bool, HookError> {
        let current = std::ptr::read_volatile(self.slot);
        if current != self.replacement {
            tracing::warn!(
                "VTable slot for '{}' at {:x} was overwritten ({:x}); leaving it alone",
                self.name,
                self.slot as usize,
                current as usize
            );
            return Ok(false);
        }

        write_slot(self.slot, self.original)?;
        tracing::debug!(
            "Restored vtable slot for '{}' at {:x}",
            self.name,
            self.slot as usize
        );
        Ok(true)
    }

    pub(crate) fn original(&self) -> *const () {
        self.original
    }

    pub(crate) fn replacement(&self) -> *const () {
        self.replacement
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn acquire(&mut self) {
        self.users += 1;
    }

    /// Drop one user, returning `true` when none remain
    pub(crate) fn release(&mut self) -> bool {
        self.users = self.users.saturating_sub(1);
        self.users == 0
    }
}

/// Write a function pointer into a vtable slot
///
/// Vtables normally live in read-only data, so the page is made writable for
/// the duration of the write and its previous protection is put back when the
/// guard drops.
unsafe fn write_slot(slot: *mut *const (), value: *const ()) -> Result<(), HookError> {
    let _guard = region::protect_with_handle(
        slot as *const u8,
        size_of::<usize>(),
        region::Protection::READ_WRITE,
    )
    .map_err(|e| HookError::MemoryProtection(e.to_string()))?;

    std::ptr::write_volatile(slot, value);
    Ok(())
}

/// Check that `len` bytes at `address` are mapped and readable
fn ensure_readable(address: usize, len: usize) -> Result<(), HookError> {
    let readable = |addr: usize| {
        region::query(addr as *const u8)
            .map(|r| r.protection().contains(region::Protection::READ))
            .unwrap_or(false)
    };

    let last = address
        .checked_add(len.saturating_sub(1))
        .ok_or(HookError::InvalidAddress(address))?;

    if address == 0 || !readable(address) || !readable(last) {
        return Err(HookError::InvalidAddress(address));
    }
    Ok(())
}

/// Read an object's vtable pointer (its first pointer-sized field)
///
/// # Safety
/// `instance` must be null or point at memory that stays mapped for the call.
pub(crate) unsafe fn vtable_of(instance: *mut c_void) -> Result<*mut *const (), HookError> {
    if instance.is_null() {
        return Err(HookError::NullInstance);
    }
    ensure_readable(instance as usize, size_of::<usize>())?;

    let vtable = *(instance as *const *mut *const ());
    if vtable.is_null() {
        return Err(HookError::InvalidAddress(0));
    }
    Ok(vtable)
}

/// Address of slot `index` in `vtable`, validated as readable
///
/// # Safety
/// `vtable` must be null or a vtable pointer read from a live object.
pub(crate) unsafe fn slot_in(vtable: *mut *const (), index: usize) -> Result<*mut *const (), HookError> {
    let slot = vtable.wrapping_add(index);
    ensure_readable(slot as usize, size_of::<usize>())?;
    Ok(slot)
}

/// Resolve the vtable slot `index` of `instance`
///
/// # Safety
/// `instance` must be null or point at memory that stays mapped for the call.
pub(crate) unsafe fn resolve_slot(instance: *mut c_void, index: usize) -> Result<*mut *const (), HookError> {
    let vtable = vtable_of(instance)?;
    slot_in(vtable, index)
}

/// Slot address used by dispatch for a live `this` pointer
///
/// No validation: `this` is being called through its vtable right now.
///
/// # Safety
/// `this` must point at a live object.
pub(crate) unsafe fn slot_of_live(this: *mut c_void, index: usize) -> usize {
    let vtable = *(this as *const *mut *const ());
    vtable.wrapping_add(index) as usize
}
