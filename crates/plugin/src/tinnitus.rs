//! Explosion tinnitus suppression
//!
//! Grenade blasts call `CCSPlayer::OnDamagedByExplosion`, which starts the
//! ear-ringing sound and muffles game audio. Replacing the call with a no-op
//! that returns 0 keeps the damage but drops the effect.

use std::ffi::c_void;

use serde::{Deserialize, Serialize};

use quietblast_core::{Decision, HookCall, HookDescriptor, HookFlags, Param, PluginConfig};

/// Gamedata key of the hooked function
pub const SYMBOL: &str = "OnDamagedByExplosion";

quietblast_core::vtable_thunk! {
    /// `int CCSPlayer::OnDamagedByExplosion(const CTakeDamageInfo &info)`
    pub fn on_damaged_by_explosion("OnDamagedByExplosion")(info: *const c_void) -> i32;
}

/// Plugin settings, `configs/plugins/no_tinnitus/no_tinnitus.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoTinnitusConfig {
    /// Install the hook at all
    pub enabled: bool,

    /// Gamedata game section, used when the host doesn't report one
    pub game: String,

    /// Gamedata file, relative to the `gamedata/` directory
    pub gamedata: String,
}

impl Default for NoTinnitusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            game: "csgo".to_string(),
            gamedata: "no_tinnitus.games.txt".to_string(),
        }
    }
}

impl PluginConfig for NoTinnitusConfig {
    const PLUGIN_NAME: &'static str = "no_tinnitus";
}

/// Hook attached to every client as it joins
pub fn descriptor() -> HookDescriptor {
    on_damaged_by_explosion_descriptor()
        .flags(HookFlags::AUTO_ATTACH)
        .callback(suppress)
}

fn suppress(_call: &HookCall) -> Decision {
    Decision::Handled(Param::Int(0))
}
