//! Host lifecycle
//!
//! `start` loads the offset table, registers hooks and subscribes to client
//! events so every hook flagged [`HookFlags::AUTO_ATTACH`] follows clients as
//! they join and leave. `stop` undoes all of it.
//!
//! Failures degrade rather than abort: a missing or broken gamedata file
//! disables the feature, an unknown symbol disables one hook, and a failed
//! install leaves one client unhooked.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use parking_lot::Mutex;
use thiserror::Error;

use crate::gamedata::{GamedataError, OffsetTable, Platform};
use crate::hooks::{self, registry, HookDescriptor, HookError, HookHandle, InstanceId};
use crate::listeners::{self, ListenerKey};

/// Errors that stop the feature from starting
#[derive(Debug, Error)]
pub enum StartError {
    #[error("Gamedata file {} is missing; hooks disabled", .0.display())]
    ConfigMissing(PathBuf),

    #[error("Failed to load gamedata: {0}")]
    Gamedata(GamedataError),

    #[error("No gamedata platform key for this host")]
    UnsupportedPlatform,

    #[error("Already running")]
    AlreadyRunning,
}

impl From<GamedataError> for StartError {
    fn from(e: GamedataError) -> Self {
        match e {
            GamedataError::Missing(path) => StartError::ConfigMissing(path),
            other => StartError::Gamedata(other),
        }
    }
}

/// Where to find offsets and which section of them applies
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub gamedata_path: PathBuf,
    pub game: String,
    /// `None` selects the platform this crate was built for
    pub platform: Option<Platform>,
}

impl StartOptions {
    pub fn new(gamedata_path: impl Into<PathBuf>, game: &str) -> Self {
        Self {
            gamedata_path: gamedata_path.into(),
            game: game.to_string(),
            platform: None,
        }
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }
}

/// Outcome of a successful start
#[derive(Debug, Default)]
pub struct StartReport {
    /// Symbols that were registered
    pub registered: Vec<String>,
    /// Symbols that were not registered, with the reason
    pub skipped: Vec<(String, String)>,
}

struct Running {
    listeners: Vec<ListenerKey>,
    hooks: Vec<HookHandle>,
}

static RUNNING: LazyLock<Mutex<Option<Running>>> = LazyLock::new(|| Mutex::new(None));

/// Player slot -> game object, for detaching on disconnect
static CLIENTS: LazyLock<Mutex<HashMap<i32, InstanceId>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Load gamedata and register `descriptors`
///
/// Each descriptor's offset is resolved for `options.game`; hooks whose
/// symbol has no offset are skipped and reported. Registration happens even
/// if no client is connected yet: attaching is driven by client events.
pub fn start(
    options: &StartOptions,
    descriptors: Vec<HookDescriptor>,
) -> Result<StartReport, StartError> {
    if RUNNING.lock().is_some() {
        return Err(StartError::AlreadyRunning);
    }

    let platform = options
        .platform
        .or_else(Platform::current)
        .ok_or(StartError::UnsupportedPlatform)?;

    let table = OffsetTable::load(&options.gamedata_path).inspect_err(|e| {
        tracing::error!("{}", e);
    })?;

    hooks::init();

    let mut report = StartReport::default();
    let mut handles = Vec::new();

    for descriptor in descriptors {
        let symbol = descriptor.symbol().to_string();

        let descriptor = match descriptor.resolve(&table, &options.game, platform) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::error!("Hook '{}' disabled: {}", symbol, e);
                report.skipped.push((symbol, e.to_string()));
                continue;
            }
        };

        match hooks::register(descriptor) {
            Ok(handle) => {
                handles.push(handle);
                report.registered.push(symbol);
            }
            Err(e @ HookError::DuplicateHook { .. }) => {
                tracing::warn!("{}", e);
                report.skipped.push((symbol, e.to_string()));
            }
            Err(e) => {
                tracing::error!("Failed to register '{}': {}", symbol, e);
                report.skipped.push((symbol, e.to_string()));
            }
        }
    }

    let listeners = vec![
        listeners::on_client_put_in_server(client_put_in_server),
        listeners::on_client_disconnect(client_disconnect),
    ];

    *RUNNING.lock() = Some(Running {
        listeners,
        hooks: handles,
    });

    tracing::info!(
        "Started for game '{}' on {}: {} hooks registered, {} skipped",
        options.game,
        platform,
        report.registered.len(),
        report.skipped.len()
    );
    Ok(report)
}

/// Unsubscribe, detach every hook and restore every patched slot
///
/// Safe to call when `start` failed, was never called, or already stopped.
pub fn stop() {
    let running = RUNNING.lock().take();

    if let Some(running) = &running {
        for key in &running.listeners {
            listeners::remove_listener(*key);
        }
        tracing::info!("Stopping: removing {} hooks", running.hooks.len());
    }

    hooks::teardown();
    CLIENTS.lock().clear();
}

/// Replay put-in-server for clients that joined before `start`
///
/// On a late load the host has no pending join events for players already in
/// game. The bridge hands the current `(slot, object)` pairs here so they get
/// the same treatment as a fresh join. Returns how many were replayed; zero
/// when not running.
pub fn replay_clients<I>(clients: I) -> usize
where
    I: IntoIterator<Item = (i32, InstanceId)>,
{
    if !is_running() {
        tracing::debug!("Client replay ignored: not running");
        return 0;
    }

    let mut replayed = 0;
    for (slot, instance) in clients {
        listeners::fire_client_put_in_server(slot, instance);
        replayed += 1;
    }

    tracing::info!("Replayed {} clients already in game", replayed);
    replayed
}

pub fn is_running() -> bool {
    RUNNING.lock().is_some()
}

/// Number of clients currently tracked
pub fn client_count() -> usize {
    CLIENTS.lock().len()
}

fn client_put_in_server(slot: i32, instance: InstanceId) {
    if instance.addr() == 0 {
        tracing::warn!("Client {} put in server without a game object", slot);
        return;
    }

    let previous = CLIENTS.lock().insert(slot, instance);
    if let Some(previous) = previous.filter(|p| *p != instance) {
        // Slot reused before we saw the disconnect
        let removed = hooks::detach_instance(previous.as_ptr());
        tracing::debug!(
            "Client slot {} changed object; detached {} hooks from {}",
            slot,
            removed,
            previous
        );
    }

    for handle in registry::auto_attach_hooks() {
        // SAFETY: the host hands us the live player object for this slot
        if let Err(e) = unsafe { hooks::attach(handle, instance.as_ptr()) } {
            tracing::warn!("Client {} runs unhooked: {}", slot, e);
        }
    }
}

fn client_disconnect(slot: i32) {
    let Some(instance) = CLIENTS.lock().remove(&slot) else {
        return;
    };

    let removed = hooks::detach_instance(instance.as_ptr());
    tracing::debug!("Client {} disconnected; detached {} hooks", slot, removed);
}
