// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-backend crash accounting.
//!
//! Each backend keeps a lifetime count that never decays and a recent count
//! that forgives one crash per elapsed decay period. Crossing either limit
//! disables the backend for the rest of the session; nothing re-enables it.

use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::config::CrashPolicyConfig;
use crate::kinds::BackendKind;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrashCounters {
    pub lifetime_count: u32,
    pub recent_count: u32,
    pub last_crash_time: Option<SystemTime>,
    /// Point from which the next decay period is measured.
    #[serde(skip)]
    decay_anchor: Option<SystemTime>,
}

impl CrashCounters {
    /// Forgive one recent crash per whole `period` elapsed since the anchor.
    fn decay(&mut self, now: SystemTime, period: Duration) {
        let Some(anchor) = self.decay_anchor else {
            return;
        };
        let Ok(elapsed) = now.duration_since(anchor) else {
            return;
        };

        let periods = elapsed.as_millis() / period.as_millis().max(1);
        if periods == 0 {
            return;
        }
        let periods = u32::try_from(periods).unwrap_or(u32::MAX);

        self.recent_count = self.recent_count.saturating_sub(periods);
        self.decay_anchor = Some(
            anchor
                .checked_add(period.saturating_mul(periods))
                .unwrap_or(now),
        );
    }
}

#[derive(Debug, Default)]
struct BackendState {
    counters: CrashCounters,
    disabled: bool,
}

/// Gatekeeper consulted before every launch and updated on every crash.
#[derive(Debug)]
pub struct CrashPolicyTracker {
    config: CrashPolicyConfig,
    hardware: BackendState,
    software: BackendState,
}

impl CrashPolicyTracker {
    pub fn new(config: CrashPolicyConfig) -> Self {
        Self {
            config,
            hardware: BackendState::default(),
            software: BackendState::default(),
        }
    }

    fn state(&self, backend: BackendKind) -> &BackendState {
        match backend {
            BackendKind::Hardware => &self.hardware,
            BackendKind::Software => &self.software,
        }
    }

    fn state_mut(&mut self, backend: BackendKind) -> &mut BackendState {
        match backend {
            BackendKind::Hardware => &mut self.hardware,
            BackendKind::Software => &mut self.software,
        }
    }

    /// Get the crash counters of `backend`.
    pub fn counters(&self, backend: BackendKind) -> &CrashCounters {
        &self.state(backend).counters
    }

    /// Record a crash of `backend`. Returns true if this crash disabled it.
    pub fn record_crash(&mut self, backend: BackendKind) -> bool {
        self.record_crash_at(backend, SystemTime::now())
    }

    pub fn record_crash_at(&mut self, backend: BackendKind, now: SystemTime) -> bool {
        let period = self.config.recent_decay();
        let limits = self.config.limits(backend);
        let ignore_limits = self.config.disable_crash_limit;

        let state = self.state_mut(backend);
        state.counters.decay(now, period);
        state.counters.lifetime_count += 1;
        state.counters.recent_count += 1;
        state.counters.last_crash_time = Some(now);
        state.counters.decay_anchor = Some(now);

        tracing::warn!(
            "[RenderHost] {} backend crash recorded (lifetime {}, recent {})",
            backend,
            state.counters.lifetime_count,
            state.counters.recent_count
        );

        if state.disabled || ignore_limits {
            return false;
        }

        let lifetime_exceeded = limits
            .lifetime_threshold
            .is_some_and(|t| state.counters.lifetime_count >= t);
        let recent_exceeded = limits
            .recent_threshold
            .is_some_and(|t| state.counters.recent_count >= t);

        if lifetime_exceeded || recent_exceeded {
            state.disabled = true;
            tracing::warn!(
                "[RenderHost] {} backend is too unstable to use, disabled for this session",
                backend
            );
            return true;
        }
        false
    }

    /// Record a helper that launched but never acknowledged initialization.
    ///
    /// Counts as a crash. A hardware helper that cannot initialize disables
    /// hardware immediately, whatever the counters say.
    pub fn record_handshake_failure(&mut self, backend: BackendKind) -> bool {
        self.record_handshake_failure_at(backend, SystemTime::now())
    }

    pub fn record_handshake_failure_at(&mut self, backend: BackendKind, now: SystemTime) -> bool {
        let disabled_by_counts = self.record_crash_at(backend, now);
        if backend == BackendKind::Hardware && !self.hardware.disabled {
            self.hardware.disabled = true;
            tracing::warn!("[RenderHost] Hardware helper failed to initialize, disabling hardware");
            return true;
        }
        disabled_by_counts
    }

    /// Apply pending decay to every backend.
    pub fn record_recovery_tick(&mut self) {
        self.record_recovery_tick_at(SystemTime::now());
    }

    pub fn record_recovery_tick_at(&mut self, now: SystemTime) {
        let period = self.config.recent_decay();
        self.hardware.counters.decay(now, period);
        self.software.counters.decay(now, period);
    }

    /// Check if `backend` may still be launched.
    pub fn is_allowed(&mut self, backend: BackendKind) -> bool {
        self.is_allowed_at(backend, SystemTime::now())
    }

    /// Decay is applied on every check, but a disabled backend stays disabled.
    pub fn is_allowed_at(&mut self, backend: BackendKind, now: SystemTime) -> bool {
        self.record_recovery_tick_at(now);
        !self.state(backend).disabled
    }

    /// Backend a new launch should use: hardware while allowed, then software.
    pub fn preferred_backend(&mut self) -> Option<BackendKind> {
        self.preferred_backend_at(SystemTime::now())
    }

    pub fn preferred_backend_at(&mut self, now: SystemTime) -> Option<BackendKind> {
        if self.is_allowed_at(BackendKind::Hardware, now) {
            Some(BackendKind::Hardware)
        } else if self.is_allowed_at(BackendKind::Software, now) {
            Some(BackendKind::Software)
        } else {
            None
        }
    }

    /// False once every backend is disabled; no helper will launch again.
    pub fn access_allowed(&self) -> bool {
        !self.hardware.disabled || !self.software.disabled
    }
}
