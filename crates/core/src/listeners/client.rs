//! Client listeners
//!
//! - OnClientPutInServer: Called when a client fully enters the game
//! - OnClientDisconnect: Called when a client disconnects

use std::sync::LazyLock;

use parking_lot::RwLock;
use slotmap::SecondaryMap;

use super::{register_key, ListenerKey, ListenerType};
use crate::hooks::InstanceId;

/// Callback for client put in server: (slot, player object)
pub type ClientPutInServerCallback = Box<dyn Fn(i32, InstanceId) + Send + Sync>;
/// Callback for client disconnect: (slot)
pub type ClientDisconnectCallback = Box<dyn Fn(i32) + Send + Sync>;

static CLIENT_PUT_IN_SERVER_REGISTRY: LazyLock<RwLock<SecondaryMap<ListenerKey, ClientPutInServerCallback>>> =
    LazyLock::new(|| RwLock::new(SecondaryMap::new()));

static CLIENT_DISCONNECT_REGISTRY: LazyLock<RwLock<SecondaryMap<ListenerKey, ClientDisconnectCallback>>> =
    LazyLock::new(|| RwLock::new(SecondaryMap::new()));

// === OnClientPutInServer ===

/// Register a callback to be called when a client is put in server
///
/// The callback receives the player slot and the player's game object.
///
/// # Returns
/// A key that can be used to unregister the callback via `remove_listener`.
pub fn on_client_put_in_server<F>(callback: F) -> ListenerKey
where
    F: Fn(i32, InstanceId) + Send + Sync + 'static,
{
    let key = register_key(ListenerType::ClientPutInServer);
    CLIENT_PUT_IN_SERVER_REGISTRY
        .write()
        .insert(key, Box::new(callback));
    key
}

pub(super) fn remove_client_put_in_server(key: ListenerKey) -> bool {
    CLIENT_PUT_IN_SERVER_REGISTRY.write().remove(key).is_some()
}

/// Fire all client put in server callbacks
pub fn fire_client_put_in_server(slot: i32, instance: InstanceId) {
    tracing::debug!("Firing OnClientPutInServer: slot={}, {}", slot, instance);
    let registry = CLIENT_PUT_IN_SERVER_REGISTRY.read();
    for (_, callback) in registry.iter() {
        callback(slot, instance);
    }
}

// === OnClientDisconnect ===

/// Register a callback to be called when a client disconnects
///
/// # Returns
/// A key that can be used to unregister the callback via `remove_listener`.
pub fn on_client_disconnect<F>(callback: F) -> ListenerKey
where
    F: Fn(i32) + Send + Sync + 'static,
{
    let key = register_key(ListenerType::ClientDisconnect);
    CLIENT_DISCONNECT_REGISTRY
        .write()
        .insert(key, Box::new(callback));
    key
}

pub(super) fn remove_client_disconnect(key: ListenerKey) -> bool {
    CLIENT_DISCONNECT_REGISTRY.write().remove(key).is_some()
}

/// Fire all client disconnect callbacks
pub fn fire_client_disconnect(slot: i32) {
    tracing::debug!("Firing OnClientDisconnect: slot={}", slot);
    let registry = CLIENT_DISCONNECT_REGISTRY.read();
    for (_, callback) in registry.iter() {
        callback(slot);
    }
}
