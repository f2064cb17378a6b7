use std::path::PathBuf;

use shared::{DEFAULT_PORT, TICK_HZ};

pub const NPC_SPAWN_INTERVAL_TICKS: u32 = 120;
pub const MAX_NPCS: usize = 5;

/// Runtime settings for one server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:21001`.
    pub addr: String,
    pub tick_hz: u32,
    /// Pattern file written by the admin tool.
    pub pattern_path: PathBuf,
    pub npc_spawn_interval: u32,
    pub max_npcs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            tick_hz: TICK_HZ,
            pattern_path: PathBuf::from("pattern.json"),
            npc_spawn_interval: NPC_SPAWN_INTERVAL_TICKS,
            max_npcs: MAX_NPCS,
        }
    }
}

impl ServerConfig {
    /// Defaults, then command-line flags, then `DOGFIGHT_*` environment variables.
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_args(std::env::args().skip(1));
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    pub fn apply_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            let arg = arg.as_ref();
            if let Some(v) = arg.strip_prefix("--addr=") {
                self.addr = v.to_string();
            } else if let Some(v) = arg.strip_prefix("--port=") {
                match v.parse::<u16>() {
                    Ok(port) => self.addr = format!("0.0.0.0:{port}"),
                    Err(err) => tracing::warn!(value = v, %err, "invalid --port, using default"),
                }
            } else if let Some(v) = arg.strip_prefix("--tick-hz=") {
                self.set_tick_hz(v);
            } else if let Some(v) = arg.strip_prefix("--pattern=") {
                self.pattern_path = PathBuf::from(v);
            } else {
                tracing::warn!(arg, "ignoring unknown argument");
            }
        }
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("DOGFIGHT_ADDR") {
            self.addr = addr;
        }
        if let Some(hz) = lookup("DOGFIGHT_TICK_HZ") {
            self.set_tick_hz(&hz);
        }
        if let Some(path) = lookup("DOGFIGHT_PATTERN_FILE") {
            self.pattern_path = PathBuf::from(path);
        }
    }

    fn set_tick_hz(&mut self, raw: &str) {
        match raw.parse::<u32>() {
            Ok(hz) if (1..=1000).contains(&hz) => self.tick_hz = hz,
            _ => tracing::warn!(
                value = raw,
                tick_hz = self.tick_hz,
                "tick rate must be 1-1000, keeping current"
            ),
        }
    }
}
