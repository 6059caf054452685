//! Global listeners for client events
//!
//! Callbacks are stored in thread-safe registries and invoked when the host
//! reports the corresponding event through the FFI layer.
//!
//! # Example
//!
//! ```ignore
//! use quietblast_core::listeners;
//!
//! let key = listeners::on_client_disconnect(|slot| {
//!     tracing::info!("Client {} left", slot);
//! });
//!
//! // Later, unregister if needed
//! listeners::remove_listener(key);
//! ```

pub mod client;

use std::sync::LazyLock;

use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Key for registered listeners, used for removal
    pub struct ListenerKey;
}

/// Which registry a listener belongs to
#[derive(Clone, Copy, Debug)]
enum ListenerType {
    ClientPutInServer,
    ClientDisconnect,
}

/// Mapping from ListenerKey to its type for removal
struct KeyRegistry {
    keys: SlotMap<ListenerKey, ListenerType>,
}

static KEY_REGISTRY: LazyLock<RwLock<KeyRegistry>> = LazyLock::new(|| {
    RwLock::new(KeyRegistry {
        keys: SlotMap::with_key(),
    })
});

/// Register a key in the global registry
fn register_key(listener_type: ListenerType) -> ListenerKey {
    KEY_REGISTRY.write().keys.insert(listener_type)
}

/// Remove a listener by its key
///
/// Returns `true` if the listener was found and removed.
pub fn remove_listener(key: ListenerKey) -> bool {
    let listener_type = KEY_REGISTRY.write().keys.remove(key);

    match listener_type {
        Some(ListenerType::ClientPutInServer) => client::remove_client_put_in_server(key),
        Some(ListenerType::ClientDisconnect) => client::remove_client_disconnect(key),
        None => false,
    }
}

pub use client::{on_client_disconnect, on_client_put_in_server};

// Fire functions for the FFI layer
pub use client::{fire_client_disconnect, fire_client_put_in_server};
