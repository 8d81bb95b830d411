use serde::{Deserialize, Serialize};

use crate::types::TimeOfDay;

pub const DEFAULT_CCT_LIMIT_BOTTOM: u16 = 2700;
pub const DEFAULT_CCT_LIMIT_TOP: u16 = 6500;

/// The user-configured anchors and limits. This is the only state that
/// survives a restart.
/// Fields missing from an older document fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSettings {
    #[serde(rename = "sunUp")]
    pub sun_up: TimeOfDay,
    #[serde(rename = "solarNoon")]
    pub solar_noon: TimeOfDay,
    #[serde(rename = "sunDown")]
    pub sun_down: TimeOfDay,
    #[serde(rename = "sunUpDim")]
    pub sun_up_dim: u8,
    #[serde(rename = "solarNoonDim")]
    pub solar_noon_dim: u8,
    #[serde(rename = "sunDownDim")]
    pub sun_down_dim: u8,
    #[serde(rename = "cctLimitBottom")]
    pub cct_limit_bottom: u16,
    #[serde(rename = "cctLimitTop")]
    pub cct_limit_top: u16,
    #[serde(rename = "nightCct")]
    pub night_cct: u8,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            sun_up: TimeOfDay::at(6, 0),
            solar_noon: TimeOfDay::at(12, 0),
            sun_down: TimeOfDay::at(18, 0),
            sun_up_dim: 255,
            solar_noon_dim: 255,
            sun_down_dim: 255,
            cct_limit_bottom: DEFAULT_CCT_LIMIT_BOTTOM,
            cct_limit_top: DEFAULT_CCT_LIMIT_TOP,
            night_cct: 0,
        }
    }
}

impl PersistedSettings {
    /// Restores a usable Kelvin range. Anchor ordering is left alone; the
    /// schedule handles degenerate and inverted anchors on its own.
    pub fn sanitize(&mut self) {
        if self.cct_limit_bottom == 0 || self.cct_limit_bottom >= self.cct_limit_top {
            self.cct_limit_bottom = DEFAULT_CCT_LIMIT_BOTTOM;
            self.cct_limit_top = DEFAULT_CCT_LIMIT_TOP;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub api_key: String,
    pub group: String,
    pub request_timeout_ms: u64,
    pub flash_on_boot: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 80,
            api_key: String::new(),
            group: "0".to_string(),
            request_timeout_ms: 3_000,
            flash_on_boot: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub listen: String,
    pub inactivity_timeout_secs: u64,
    pub max_frame_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7070".to_string(),
            inactivity_timeout_secs: 45,
            max_frame_bytes: 128,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub pairing_window_secs: u16,
    pub slow_blink_period_ms: u32,
    pub fast_blink_period_ms: u32,
    pub review_step_interval_ms: u64,
    pub review_step_minutes: u16,
    pub review_margin_minutes: u16,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            pairing_window_secs: 60,
            slow_blink_period_ms: 1_000,
            fast_blink_period_ms: 250,
            review_step_interval_ms: 250,
            review_step_minutes: 5,
            review_margin_minutes: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// When false, time-sync commands are logged but the host clock is left alone.
    pub apply: bool,
    pub readback_timeout_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            apply: true,
            readback_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_perfekt_light")]
    pub perfekt_light: bool,
}

fn default_http_port() -> u16 {
    8080
}

fn default_perfekt_light() -> bool {
    true
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            gateway: GatewayConfig::default(),
            transport: TransportConfig::default(),
            indicator: IndicatorConfig::default(),
            clock: ClockConfig::default(),
            mqtt: MqttConfig::default(),
            http_port: default_http_port(),
            perfekt_light: default_perfekt_light(),
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.scheduler.tick_interval_ms = self.scheduler.tick_interval_ms.clamp(250, 60_000);
        self.gateway.request_timeout_ms = self.gateway.request_timeout_ms.clamp(100, 30_000);
        self.transport.max_frame_bytes = self.transport.max_frame_bytes.clamp(16, 1_024);
        self.indicator.review_step_minutes = self.indicator.review_step_minutes.clamp(1, 120);
        self.indicator.review_step_interval_ms =
            self.indicator.review_step_interval_ms.clamp(20, 10_000);
        self.indicator.slow_blink_period_ms = self.indicator.slow_blink_period_ms.max(2);
        self.indicator.fast_blink_period_ms = self.indicator.fast_blink_period_ms.max(2);
        self.clock.readback_timeout_ms = self.clock.readback_timeout_ms.clamp(100, 30_000);
    }
}
