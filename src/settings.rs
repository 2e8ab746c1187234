//! Tunable simulation settings
//!
//! One [`Settings`] value lives in every simulation state. It can be replaced
//! or merged with a [`SettingsPatch`] at any time; neither resets node
//! positions or velocities.

use std::time::Duration;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// Default Constants
// =============================================================================

/// Default inverse-square repulsion strength
pub const DEFAULT_REPULSION: f64 = 1000.0;

/// Default pull toward the gravity center
pub const DEFAULT_CENTER_STRENGTH: f64 = 0.0001;

/// Default velocity multiplier applied each step
pub const DEFAULT_DAMPING: f64 = 0.9;

/// Default z-axis force scale (flattens layouts toward the screen plane)
pub const DEFAULT_Z_SPREAD_FACTOR: f64 = 0.5;

/// Default multiplier on combined radii before overlap correction kicks in
pub const DEFAULT_NODE_PADDING: f64 = 1.5;

/// Default speed clamp
pub const DEFAULT_MAX_SPEED: f64 = 50.0;

/// Default total kinetic energy below which the layout may stop
pub const DEFAULT_MIN_ENERGY_THRESHOLD: f64 = 0.001;

/// Default grace period after the last energizing event, in milliseconds
pub const DEFAULT_QUIESCENCE_DELAY_MS: u64 = 1000;

/// Default elastic edge stiffness
pub const DEFAULT_ELASTIC_STIFFNESS: f64 = 0.01;

/// Default elastic edge rest length
pub const DEFAULT_ELASTIC_LENGTH: f64 = 100.0;

/// Default rigid edge stiffness
pub const DEFAULT_RIGID_STIFFNESS: f64 = 0.1;

/// Default rigid edge target distance
pub const DEFAULT_RIGID_DISTANCE: f64 = 100.0;

/// Default weld edge stiffness
pub const DEFAULT_WELD_STIFFNESS: f64 = 0.5;

/// Default cluster centroid pull
pub const DEFAULT_CLUSTER_STRENGTH: f64 = 0.001;

/// Default EMA weight given to the newest energy sample
pub const DEFAULT_ENERGY_SMOOTHING: f64 = 0.1;

/// Default offloaded worker pacing (~60 Hz)
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 16;

/// Default parameters for a spring-like constraint kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpringDefaults {
    /// Spring constant
    pub stiffness: f64,
    /// Rest length or target distance
    pub length: f64,
}

/// Default parameters for weld constraints
///
/// Weld length always defaults to the sum of the endpoint radii.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeldDefaults {
    pub stiffness: f64,
}

/// Simulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Inverse-square repulsion strength between every node pair
    pub repulsion: f64,
    /// Pull toward `center`; zero disables gravity
    pub center_strength: f64,
    /// Gravity center
    pub center: DVec3,
    /// Velocity multiplier per step, in (0, 1)
    pub damping: f64,
    /// Scale applied to the z component of every force
    pub z_spread_factor: f64,
    /// Multiplier on combined radii for overlap detection
    pub node_padding: f64,
    /// Maximum node speed per step
    pub max_speed: f64,
    /// Auto-stop energy threshold
    pub min_energy_threshold: f64,
    /// Auto-stop grace period after the last energizing event
    pub quiescence_delay_ms: u64,
    pub elastic: SpringDefaults,
    pub rigid: SpringDefaults,
    pub weld: WeldDefaults,
    /// Enables the pull toward each cluster's centroid
    pub clustering_enabled: bool,
    pub cluster_strength: f64,
    /// Weight of the newest sample in the smoothed energy
    pub energy_smoothing: f64,
    /// Pacing of the offloaded worker
    pub tick_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repulsion: DEFAULT_REPULSION,
            center_strength: DEFAULT_CENTER_STRENGTH,
            center: DVec3::ZERO,
            damping: DEFAULT_DAMPING,
            z_spread_factor: DEFAULT_Z_SPREAD_FACTOR,
            node_padding: DEFAULT_NODE_PADDING,
            max_speed: DEFAULT_MAX_SPEED,
            min_energy_threshold: DEFAULT_MIN_ENERGY_THRESHOLD,
            quiescence_delay_ms: DEFAULT_QUIESCENCE_DELAY_MS,
            elastic: SpringDefaults {
                stiffness: DEFAULT_ELASTIC_STIFFNESS,
                length: DEFAULT_ELASTIC_LENGTH,
            },
            rigid: SpringDefaults {
                stiffness: DEFAULT_RIGID_STIFFNESS,
                length: DEFAULT_RIGID_DISTANCE,
            },
            weld: WeldDefaults {
                stiffness: DEFAULT_WELD_STIFFNESS,
            },
            clustering_enabled: false,
            cluster_strength: DEFAULT_CLUSTER_STRENGTH,
            energy_smoothing: DEFAULT_ENERGY_SMOOTHING,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl Settings {
    /// Auto-stop grace period as a duration
    pub fn quiescence_delay(&self) -> Duration {
        Duration::from_millis(self.quiescence_delay_ms)
    }

    /// Worker pacing as a duration (never zero)
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Merge a partial update into these settings
    pub fn apply(&mut self, patch: &SettingsPatch) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = patch.$field {
                    self.$field = value;
                })*
            };
        }
        merge!(
            repulsion,
            center_strength,
            center,
            damping,
            z_spread_factor,
            node_padding,
            max_speed,
            min_energy_threshold,
            quiescence_delay_ms,
            elastic,
            rigid,
            weld,
            clustering_enabled,
            cluster_strength,
            energy_smoothing,
            tick_interval_ms,
        );
        self.validate();
    }

    /// Clamp values that would make the integrator diverge
    pub fn validate(&mut self) {
        if !(self.damping > 0.0 && self.damping < 1.0) {
            let clamped = if self.damping.is_finite() {
                self.damping.clamp(0.01, 0.99)
            } else {
                DEFAULT_DAMPING
            };
            warn!(damping = self.damping, clamped, "damping outside (0, 1)");
            self.damping = clamped;
        }
        if !(self.max_speed.is_finite() && self.max_speed > 0.0) {
            warn!(max_speed = self.max_speed, "max speed must be positive");
            self.max_speed = DEFAULT_MAX_SPEED;
        }
        if !(self.node_padding.is_finite() && self.node_padding >= 0.0) {
            warn!(node_padding = self.node_padding, "node padding must be non-negative");
            self.node_padding = DEFAULT_NODE_PADDING;
        }
        if !(self.z_spread_factor.is_finite() && self.z_spread_factor >= 0.0) {
            warn!(z_spread_factor = self.z_spread_factor, "z spread must be non-negative");
            self.z_spread_factor = DEFAULT_Z_SPREAD_FACTOR;
        }
        if !(self.energy_smoothing > 0.0 && self.energy_smoothing <= 1.0) {
            warn!(
                energy_smoothing = self.energy_smoothing,
                "energy smoothing outside (0, 1]"
            );
            self.energy_smoothing = DEFAULT_ENERGY_SMOOTHING;
        }
        if self.tick_interval_ms == 0 {
            warn!("tick interval must be at least 1 ms");
            self.tick_interval_ms = DEFAULT_TICK_INTERVAL_MS;
        }
    }
}

/// Partial settings update; absent fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repulsion: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_strength: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<DVec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damping: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_spread_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_padding: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_energy_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiescence_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elastic: Option<SpringDefaults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rigid: Option<SpringDefaults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weld: Option<WeldDefaults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustering_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_strength: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_smoothing: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_interval_ms: Option<u64>,
}

impl SettingsPatch {
    /// True when the patch changes nothing
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable() {
        let settings = Settings::default();
        assert_eq!(settings.repulsion, DEFAULT_REPULSION);
        assert_eq!(settings.damping, 0.9);
        assert_eq!(settings.quiescence_delay(), Duration::from_millis(1000));
        assert_eq!(settings.elastic.length, 100.0);
        assert!(!settings.clustering_enabled);
    }

    #[test]
    fn patch_merges_only_present_fields() {
        let mut settings = Settings::default();
        let patch = SettingsPatch {
            repulsion: Some(0.0),
            center: Some(DVec3::new(10.0, 0.0, 0.0)),
            ..Default::default()
        };
        settings.apply(&patch);

        assert_eq!(settings.repulsion, 0.0);
        assert_eq!(settings.center, DVec3::new(10.0, 0.0, 0.0));
        assert_eq!(settings.damping, DEFAULT_DAMPING);
        assert_eq!(settings.max_speed, DEFAULT_MAX_SPEED);
    }

    #[test]
    fn validate_clamps_damping_into_open_interval() {
        let mut settings = Settings {
            damping: 1.5,
            ..Default::default()
        };
        settings.validate();
        assert!(settings.damping < 1.0);

        settings.damping = f64::NAN;
        settings.validate();
        assert_eq!(settings.damping, DEFAULT_DAMPING);
    }

    #[test]
    fn zero_tick_interval_falls_back_to_default() {
        let mut settings = Settings {
            tick_interval_ms: 0,
            ..Default::default()
        };
        settings.validate();
        assert_eq!(settings.tick_interval(), Duration::from_millis(DEFAULT_TICK_INTERVAL_MS));
    }

    #[test]
    fn deserializes_partial_camel_case_settings() {
        let settings: Settings =
            serde_json::from_str(r#"{"repulsion": 0, "zSpreadFactor": 0.25, "center": [1, 2, 3]}"#)
                .unwrap();
        assert_eq!(settings.repulsion, 0.0);
        assert_eq!(settings.z_spread_factor, 0.25);
        assert_eq!(settings.center, DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(settings.node_padding, DEFAULT_NODE_PADDING);
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(SettingsPatch::default().is_empty());
        let patch: SettingsPatch = serde_json::from_str(r#"{"damping": 0.5}"#).unwrap();
        assert!(!patch.is_empty());
    }
}
