//! Deferred hook removal
//!
//! Detaching or unregistering from inside a callback must not pull the slot out
//! from under the dispatch that is still running. Such requests are queued
//! here and applied when the outermost dispatch on the thread returns.

use std::cell::Cell;
use std::sync::LazyLock;

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::registry::{self, ActiveHookKey, HookHandle};

/// A removal waiting for dispatch to unwind
#[derive(Debug, Clone, Copy)]
pub(crate) enum Removal {
    Detach(ActiveHookKey),
    Unregister(HookHandle),
    Teardown,
}

struct RemovalQueue {
    sender: Sender<Removal>,
    receiver: Receiver<Removal>,
}

static QUEUE: LazyLock<RemovalQueue> = LazyLock::new(|| {
    let (sender, receiver) = unbounded();
    RemovalQueue { sender, receiver }
});

thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Whether a hook callback is currently running on this thread
pub(crate) fn in_dispatch() -> bool {
    DEPTH.with(|d| d.get() > 0)
}

/// Marks one dispatch in progress; flushes the queue when the last one exits
pub(crate) struct DispatchGuard(());

impl DispatchGuard {
    pub(crate) fn enter() -> Self {
        DEPTH.with(|d| d.set(d.get() + 1));
        DispatchGuard(())
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        let depth = DEPTH.with(|d| {
            let depth = d.get().saturating_sub(1);
            d.set(depth);
            depth
        });

        if depth == 0 {
            let applied = flush();
            if applied > 0 {
                tracing::trace!("Applied {} deferred hook removals", applied);
            }
        }
    }
}

pub(crate) fn defer(removal: Removal) {
    tracing::debug!("Deferring {:?} until dispatch returns", removal);
    if let Err(e) = QUEUE.sender.send(removal) {
        tracing::error!("Failed to queue deferred removal: {}", e);
    }
}

/// Apply every queued removal
pub(crate) fn flush() -> usize {
    let mut count = 0;
    while let Ok(removal) = QUEUE.receiver.try_recv() {
        registry::apply_removal(removal);
        count += 1;
    }
    count
}

/// Number of removals waiting for dispatch to unwind
pub fn pending_removals() -> usize {
    QUEUE.receiver.len()
}
