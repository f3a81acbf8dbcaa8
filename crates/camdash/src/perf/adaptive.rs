//! Closed-loop frame rate controller.
//!
//! Evaluated once per telemetry sample. Probing climbs towards the ceiling
//! while the host stays calm, Stable holds, Recovering steps down under
//! stress and Emergency pins the floor until the stress clears.

use super::monitor::StressThresholds;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Lowest rate the controller will ever choose
pub const MIN_FPS: u32 = 10;
/// Highest rate the controller will ever choose
pub const MAX_FPS: u32 = 30;

/// Controller tuning
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveConfig {
    /// Adjust the rate at all; fixed at `capture_fps` otherwise
    pub dynamic: bool,
    pub capture_fps: u32,
    pub min_dynamic_fps: u32,
    pub thresholds: StressThresholds,
    /// FPS change per adjustment
    pub probe_step: u32,
    /// Calm samples needed before raising the rate or leaving Recovering
    pub recover_hold_count: u32,
    /// Consecutive stressed samples tolerated in Recovering
    pub stress_hold_count: u32,
    /// Calm samples in Stable before probing again
    pub reprobe_interval: u32,
    pub sample_interval: Duration,
    /// Share of stale cameras that also counts as stress
    pub stale_ratio_threshold: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            dynamic: true,
            capture_fps: 25,
            min_dynamic_fps: MIN_FPS,
            thresholds: StressThresholds::default(),
            probe_step: 2,
            recover_hold_count: 3,
            stress_hold_count: 5,
            reprobe_interval: 30,
            sample_interval: Duration::from_secs(2),
            stale_ratio_threshold: 0.5,
        }
    }
}

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Probing,
    Stable,
    Recovering,
    Emergency,
}

impl std::fmt::Display for ControlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControlState::Probing => "Probing",
            ControlState::Stable => "Stable",
            ControlState::Recovering => "Recovering",
            ControlState::Emergency => "Emergency",
        };
        f.write_str(name)
    }
}

struct Inner {
    state: ControlState,
    current_fps: u32,
    sweet_spot_fps: u32,
    last_good_fps: u32,
    adjust_count: u64,
    calm_samples: u32,
    stressed_samples: u32,
}

/// Adaptive FPS controller. Accessors are safe from any thread.
pub struct AdaptiveController {
    config: AdaptiveConfig,
    min_fps: u32,
    max_fps: u32,
    inner: Mutex<Inner>,
}

impl AdaptiveController {
    pub fn new(config: AdaptiveConfig) -> Self {
        let capture_fps = config.capture_fps.max(1);
        let (min_fps, max_fps) = if config.dynamic {
            let max_fps = capture_fps.min(MAX_FPS);
            let min_fps = config.min_dynamic_fps.max(MIN_FPS).min(max_fps);
            (min_fps, max_fps)
        } else {
            (capture_fps, capture_fps)
        };

        Self {
            config,
            min_fps,
            max_fps,
            inner: Mutex::new(Inner {
                state: ControlState::Probing,
                current_fps: max_fps,
                sweet_spot_fps: max_fps,
                last_good_fps: max_fps,
                adjust_count: 0,
                calm_samples: 0,
                stressed_samples: 0,
            }),
        }
    }

    /// Fixed-rate controller
    pub fn fixed(capture_fps: u32) -> Self {
        Self::new(AdaptiveConfig {
            dynamic: false,
            capture_fps,
            ..AdaptiveConfig::default()
        })
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn is_dynamic(&self) -> bool {
        self.config.dynamic
    }

    pub fn min_fps(&self) -> u32 {
        self.min_fps
    }

    pub fn max_fps(&self) -> u32 {
        self.max_fps
    }

    pub fn current_fps(&self) -> u32 {
        self.inner().current_fps
    }

    pub fn state(&self) -> ControlState {
        self.inner().state
    }

    pub fn sweet_spot_fps(&self) -> u32 {
        self.inner().sweet_spot_fps
    }

    pub fn adjust_count(&self) -> u64 {
        self.inner().adjust_count
    }

    /// Clamp and apply a new rate. Returns true if the rate changed.
    pub fn change_fps(&self, target: u32) -> bool {
        self.apply(&mut self.inner(), target)
    }

    fn apply(&self, inner: &mut Inner, target: u32) -> bool {
        let target = target.clamp(self.min_fps, self.max_fps);
        if target == inner.current_fps {
            return false;
        }
        log::info!(
            "[Adaptive] FPS {} -> {} ({})",
            inner.current_fps,
            target,
            inner.state
        );
        inner.current_fps = target;
        inner.adjust_count += 1;
        true
    }

    fn transition(inner: &mut Inner, next: ControlState) {
        if inner.state != next {
            log::info!(
                "[Adaptive] {} -> {} at {} fps",
                inner.state,
                next,
                inner.current_fps
            );
            inner.state = next;
            inner.calm_samples = 0;
        }
    }

    /// Feed one telemetry verdict. Returns the new rate when it changed.
    pub fn evaluate(&self, stressed: bool) -> Option<u32> {
        if !self.config.dynamic {
            return None;
        }

        let mut inner = self.inner();
        let before = inner.current_fps;
        let step = self.config.probe_step.max(1);

        if stressed {
            inner.calm_samples = 0;
            inner.stressed_samples += 1;
        } else {
            inner.calm_samples += 1;
            inner.stressed_samples = 0;
        }

        match (inner.state, stressed) {
            (ControlState::Probing, true) => {
                inner.sweet_spot_fps = inner.last_good_fps;
                let down = inner.current_fps.saturating_sub(step);
                self.apply(&mut inner, down);
                Self::transition(&mut inner, ControlState::Recovering);
            }
            (ControlState::Probing, false) => {
                inner.last_good_fps = inner.current_fps;
                if inner.current_fps < self.max_fps
                    && inner.calm_samples >= self.config.recover_hold_count
                {
                    let up = inner.current_fps + step;
                    self.apply(&mut inner, up);
                    inner.calm_samples = 0;
                }
                if inner.current_fps >= self.max_fps {
                    inner.sweet_spot_fps = self.max_fps;
                    Self::transition(&mut inner, ControlState::Stable);
                }
            }
            (ControlState::Stable, true) => {
                let down = inner.current_fps.saturating_sub(step);
                self.apply(&mut inner, down);
                Self::transition(&mut inner, ControlState::Recovering);
            }
            (ControlState::Stable, false) => {
                inner.last_good_fps = inner.current_fps;
                if inner.calm_samples >= self.config.reprobe_interval {
                    if inner.current_fps < self.max_fps {
                        Self::transition(&mut inner, ControlState::Probing);
                    } else {
                        inner.calm_samples = 0;
                    }
                }
            }
            (ControlState::Recovering, true) => {
                if inner.current_fps <= self.min_fps
                    || inner.stressed_samples > self.config.stress_hold_count
                {
                    let floor = self.min_fps;
                    self.apply(&mut inner, floor);
                    Self::transition(&mut inner, ControlState::Emergency);
                } else {
                    let down = inner.current_fps.saturating_sub(step);
                    self.apply(&mut inner, down);
                }
            }
            (ControlState::Recovering, false) => {
                if inner.calm_samples >= self.config.recover_hold_count {
                    Self::transition(&mut inner, ControlState::Stable);
                }
            }
            (ControlState::Emergency, true) => {
                let floor = self.min_fps;
                self.apply(&mut inner, floor);
            }
            (ControlState::Emergency, false) => {
                Self::transition(&mut inner, ControlState::Recovering);
            }
        }

        (inner.current_fps != before).then_some(inner.current_fps)
    }
}
