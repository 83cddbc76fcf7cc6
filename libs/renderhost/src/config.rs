// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Host configuration via `renderhost.toml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RenderHostError, Result};
use crate::kinds::BackendKind;

/// Environment variable overriding [`LaunchConfig::program`].
pub const HELPER_PATH_ENV: &str = "RENDERHOST_HELPER_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub launch: LaunchConfig,
    pub crash_policy: CrashPolicyConfig,
    pub shader_cache: ShaderCacheConfig,
}

/// How helper processes are started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Helper executable.
    pub program: PathBuf,
    /// Extra arguments appended after the protocol switches.
    pub args: Vec<String>,
    /// Environment variables set on the helper.
    pub env: HashMap<String, String>,
    /// Optional wrapper prepended to the command line (debugger, valgrind, ...).
    pub wrapper: Option<PathBuf>,
    /// Grace period between `Shutdown` and a forced kill.
    pub shutdown_timeout_ms: u64,
    /// How long to watch a fresh child for an immediate exit.
    pub early_exit_check_ms: u64,
}

impl LaunchConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn early_exit_check(&self) -> Duration {
        Duration::from_millis(self.early_exit_check_ms)
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("renderhost-helper"),
            args: Vec::new(),
            env: HashMap::new(),
            wrapper: None,
            shutdown_timeout_ms: 2_000,
            early_exit_check_ms: 20,
        }
    }
}

/// Crash limits for one backend. `None` disables that limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendCrashLimits {
    /// Crashes over the whole session; never decays.
    pub lifetime_threshold: Option<u32>,
    /// Crashes net of decay; one is forgiven per elapsed decay period.
    pub recent_threshold: Option<u32>,
}

impl Default for BackendCrashLimits {
    fn default() -> Self {
        Self {
            lifetime_threshold: Some(3),
            recent_threshold: Some(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashPolicyConfig {
    pub hardware: BackendCrashLimits,
    pub software: BackendCrashLimits,
    /// Length of the period after which one recent crash is forgiven.
    pub recent_decay_secs: u64,
    /// Ignore the thresholds entirely. Handshake failures still disable
    /// the hardware backend.
    pub disable_crash_limit: bool,
}

impl CrashPolicyConfig {
    pub fn limits(&self, backend: BackendKind) -> BackendCrashLimits {
        match backend {
            BackendKind::Hardware => self.hardware,
            BackendKind::Software => self.software,
        }
    }

    pub fn recent_decay(&self) -> Duration {
        Duration::from_secs(self.recent_decay_secs.max(1))
    }
}

impl Default for CrashPolicyConfig {
    fn default() -> Self {
        Self {
            hardware: BackendCrashLimits::default(),
            software: BackendCrashLimits::default(),
            recent_decay_secs: 60 * 60,
            disable_crash_limit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderCacheConfig {
    pub enabled: bool,
    /// Product string mixed into the cache prefix key.
    pub product: String,
}

impl Default for ShaderCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            product: format!("renderhost/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HostConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "renderhost.toml";

    /// Load configuration from a TOML file. Errors if the file is missing or
    /// cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RenderHostError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            RenderHostError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        tracing::info!("[RenderHost] Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing or
    /// unparseable.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!("[RenderHost] No {} found, using defaults", path.display());
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("[RenderHost] {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Apply `RENDERHOST_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(program) = lookup(HELPER_PATH_ENV) {
            if !program.is_empty() {
                tracing::info!("[RenderHost] Using helper from {}: {}", HELPER_PATH_ENV, program);
                self.launch.program = PathBuf::from(program);
            }
        }
        self
    }

    pub fn with_helper_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.launch.program = program.into();
        self
    }

    pub fn with_helper_arg(mut self, arg: impl Into<String>) -> Self {
        self.launch.args.push(arg.into());
        self
    }

    pub fn with_crash_policy(mut self, crash_policy: CrashPolicyConfig) -> Self {
        self.crash_policy = crash_policy;
        self
    }

    pub fn with_shader_cache_enabled(mut self, enabled: bool) -> Self {
        self.shader_cache.enabled = enabled;
        self
    }
}
