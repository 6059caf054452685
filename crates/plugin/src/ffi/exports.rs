//! C-compatible exports called by the host bridge

use std::ffi::{c_char, c_int, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::instrument;
use tracing_subscriber::EnvFilter;

use quietblast_core::config::{gamedata_path, set_base_dir};
use quietblast_core::{lifecycle, listeners, CoreConfig, InstanceId, PluginConfig, StartOptions};

use crate::tinnitus::{self, NoTinnitusConfig};

// Plugin metadata - static strings with null terminators for C compatibility
static AUTHOR: &[u8] = b"dollan\0";
static NAME: &[u8] = b"No Tinnitus\0";
static DESCRIPTION: &[u8] = b"Removes the ear ringing after nearby explosions\0";
static LICENSE: &[u8] = b"MIT\0";
static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
static LOG_TAG: &[u8] = b"QUIETBLAST\0";

/// Install the tracing subscriber
///
/// `RUST_LOG` wins over `core.toml`. Safe to call more than once.
fn init_logging() {
    let core = CoreConfig::load().unwrap_or_else(|e| {
        eprintln!("quietblast: using default core config: {}", e);
        CoreConfig::default()
    });

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(core.effective_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(core.debug)
        .try_init();
}

/// Load config and start hooking; `Err` carries the message for the host
fn load(game: Option<String>, late: bool) -> Result<(), String> {
    let config = NoTinnitusConfig::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load plugin config, using defaults: {}", e);
        NoTinnitusConfig::default()
    });

    if !config.enabled {
        tracing::info!("Disabled in config; no hooks installed");
        return Ok(());
    }

    let game = game.filter(|g| !g.is_empty()).unwrap_or(config.game);
    let path = gamedata_path(&config.gamedata).map_err(|e| e.to_string())?;

    let report = lifecycle::start(&StartOptions::new(path, &game), vec![tinnitus::descriptor()])
        .map_err(|e| e.to_string())?;

    if report.registered.is_empty() {
        lifecycle::stop();
        return Err(format!("No offset for '{}' in game '{}'", tinnitus::SYMBOL, game));
    }

    if late {
        tracing::info!("Late load: waiting for the host to replay clients already in game");
    }
    Ok(())
}

/// Copy a nullable C string
///
/// # Safety
/// `s` must be null or a valid null-terminated C string
unsafe fn opt_string(s: *const c_char) -> Option<String> {
    if s.is_null() {
        None
    } else {
        Some(CStr::from_ptr(s).to_string_lossy().into_owned())
    }
}

/// Called when the plugin is loaded
///
/// `game` is the game directory name used to pick the gamedata section, or
/// null to use the configured one. `base_dir` is the `addons/quietblast`
/// directory the bridge loaded us from; configs and gamedata are read from
/// under it unless `QUIETBLAST_HOME` is set. On failure the message is written
/// to `error` and the host keeps running without the hook.
///
/// When `late` is true the bridge must follow a successful load with
/// [`rust_replay_clients`] for every client already in game, or those clients
/// stay unhooked until they reconnect.
///
/// # Safety
/// - `game` and `base_dir` must be null or valid null-terminated C strings
/// - `error` must be a valid pointer to a buffer of at least `maxlen` bytes, or null
#[no_mangle]
#[instrument(skip_all)]
pub unsafe extern "C" fn rust_plugin_load(
    game: *const c_char,
    base_dir: *const c_char,
    error: *mut c_char,
    maxlen: usize,
    late: bool,
) -> bool {
    if let Some(dir) = opt_string(base_dir) {
        set_base_dir(dir);
    }
    init_logging();

    let game = opt_string(game);

    tracing::info!("quietblast loading (game: {:?}, late: {})", game, late);

    match catch_unwind(|| load(game, late)) {
        Ok(Ok(())) => {
            tracing::info!("quietblast loaded");
            tracing::debug!("Main thread ID: {:?}", std::thread::current().id());
            true
        }
        Ok(Err(msg)) => {
            tracing::error!("Load failed: {}", msg);
            write_error(error, maxlen, &msg);
            false
        }
        Err(_) => {
            lifecycle::stop();
            write_error(error, maxlen, "Panic during load");
            false
        }
    }
}

/// Called when the plugin is unloaded
///
/// # Safety
/// - `error` must be a valid pointer to a buffer of at least `maxlen` bytes, or null
#[no_mangle]
#[instrument(skip_all)]
pub unsafe extern "C" fn rust_plugin_unload(error: *mut c_char, maxlen: usize) -> bool {
    tracing::info!("quietblast unloading...");

    match catch_unwind(lifecycle::stop) {
        Ok(()) => true,
        Err(_) => {
            write_error(error, maxlen, "Panic during shutdown");
            false
        }
    }
}

// Metadata exports - these return static strings for the host to display

#[no_mangle]
pub extern "C" fn rust_get_author() -> *const c_char {
    AUTHOR.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn rust_get_name() -> *const c_char {
    NAME.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn rust_get_description() -> *const c_char {
    DESCRIPTION.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn rust_get_license() -> *const c_char {
    LICENSE.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn rust_get_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn rust_get_log_tag() -> *const c_char {
    LOG_TAG.as_ptr() as *const c_char
}

// === Listener FFI exports ===

/// Called from the bridge when a client is put in server
///
/// `instance` is the client's player object.
#[no_mangle]
#[instrument(skip(instance))]
pub extern "C" fn rust_on_client_put_in_server(slot: c_int, instance: *mut c_void) {
    listeners::fire_client_put_in_server(slot, InstanceId::from_ptr(instance));
}

/// Called from the bridge when a client disconnects
#[no_mangle]
#[instrument]
pub extern "C" fn rust_on_client_disconnect(slot: c_int) {
    listeners::fire_client_disconnect(slot);
}

/// Called from the bridge after a late load with the clients already in game
///
/// `slots` and `instances` are parallel arrays of `count` entries. Returns
/// how many clients were replayed.
///
/// # Safety
/// - `slots` and `instances` must each be null or point to `count` readable elements
#[no_mangle]
#[instrument(skip(slots, instances))]
pub unsafe extern "C" fn rust_replay_clients(
    slots: *const c_int,
    instances: *const *mut c_void,
    count: usize,
) -> usize {
    if slots.is_null() || instances.is_null() || count == 0 {
        return 0;
    }

    let slots = std::slice::from_raw_parts(slots, count);
    let instances = std::slice::from_raw_parts(instances, count);
    let clients = slots
        .iter()
        .zip(instances)
        .map(|(&slot, &instance)| (slot, InstanceId::from_ptr(instance)));

    catch_unwind(AssertUnwindSafe(|| lifecycle::replay_clients(clients))).unwrap_or_else(|_| {
        tracing::error!("Panic while replaying clients");
        0
    })
}

/// Helper to write an error message to a C buffer
///
/// Truncates on a character boundary so the host never sees half a UTF-8
/// sequence.
///
/// # Safety
/// - `error` must be a valid pointer or null
/// - `maxlen` must accurately reflect the buffer size
unsafe fn write_error(error: *mut c_char, maxlen: usize, msg: &str) {
    if !error.is_null() && maxlen > 0 {
        let mut len = msg.len().min(maxlen - 1);
        while !msg.is_char_boundary(len) {
            len -= 1;
        }
        std::ptr::copy_nonoverlapping(msg.as_ptr(), error as *mut u8, len);
        *error.add(len) = 0;
    }
}
