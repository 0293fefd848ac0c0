use crate::error::ConfigError;
use k8s_openapi::api::core::v1::Taint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value carried by every taint this controller applies
pub const HIGH_LOAD_TAINT_VALUE: &str = "high-load";

/// Default taint key when none is configured
pub const DEFAULT_TAINT_KEY: &str = "dethrottler/high-load";

/// One of the three kernel load-average windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoadPeriod {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
}

impl LoadPeriod {
    pub const ALL: [LoadPeriod; 3] = [
        LoadPeriod::OneMinute,
        LoadPeriod::FiveMinutes,
        LoadPeriod::FifteenMinutes,
    ];

    /// Short label used in logs and metric labels
    pub fn label(&self) -> &'static str {
        match self {
            LoadPeriod::OneMinute => "1m",
            LoadPeriod::FiveMinutes => "5m",
            LoadPeriod::FifteenMinutes => "15m",
        }
    }
}

impl fmt::Display for LoadPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Load{}", self.label())
    }
}

/// 1/5/15-minute load averages, either raw or normalized per core
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoadAverages {
    pub load1m: f64,
    pub load5m: f64,
    pub load15m: f64,
}

impl LoadAverages {
    pub fn new(load1m: f64, load5m: f64, load15m: f64) -> Self {
        Self {
            load1m,
            load5m,
            load15m,
        }
    }

    pub fn get(&self, period: LoadPeriod) -> f64 {
        match period {
            LoadPeriod::OneMinute => self.load1m,
            LoadPeriod::FiveMinutes => self.load5m,
            LoadPeriod::FifteenMinutes => self.load15m,
        }
    }
}

impl fmt::Display for LoadAverages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "1m={:.2}, 5m={:.2}, 15m={:.2}",
            self.load1m, self.load5m, self.load15m
        )
    }
}

/// Per-core load limits. A value of exactly 0 disables that period's check.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub load1m: f64,
    pub load5m: f64,
    pub load15m: f64,
}

impl Thresholds {
    pub fn get(&self, period: LoadPeriod) -> f64 {
        match period {
            LoadPeriod::OneMinute => self.load1m,
            LoadPeriod::FiveMinutes => self.load5m,
            LoadPeriod::FifteenMinutes => self.load15m,
        }
    }

    pub fn is_enabled(&self, period: LoadPeriod) -> bool {
        self.get(period) != 0.0
    }

    /// At least one period has a nonzero threshold
    pub fn any_enabled(&self) -> bool {
        LoadPeriod::ALL.iter().any(|p| self.is_enabled(*p))
    }
}

impl fmt::Display for Thresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Load1m: {:.2}, Load5m: {:.2}, Load15m: {:.2} (0 means disabled)",
            self.load1m, self.load5m, self.load15m
        )
    }
}

/// Kubernetes taint effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum TaintEffect {
    #[default]
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

impl TaintEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaintEffect::NoSchedule => "NoSchedule",
            TaintEffect::PreferNoSchedule => "PreferNoSchedule",
            TaintEffect::NoExecute => "NoExecute",
        }
    }
}

impl fmt::Display for TaintEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaintEffect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NoSchedule" => Ok(TaintEffect::NoSchedule),
            "PreferNoSchedule" => Ok(TaintEffect::PreferNoSchedule),
            "NoExecute" => Ok(TaintEffect::NoExecute),
            other => Err(ConfigError::invalid_taint_effect(other)),
        }
    }
}

impl TryFrom<String> for TaintEffect {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The single taint identity a controller manages for its whole lifetime.
///
/// Identity is `(key, effect)`; the value is always [`HIGH_LOAD_TAINT_VALUE`]
/// and is not considered when matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaintDescriptor {
    pub key: String,
    pub effect: TaintEffect,
}

impl TaintDescriptor {
    pub fn new(key: impl Into<String>, effect: TaintEffect) -> Self {
        Self {
            key: key.into(),
            effect,
        }
    }

    pub fn value(&self) -> &'static str {
        HIGH_LOAD_TAINT_VALUE
    }

    /// Whether a node taint has this descriptor's `(key, effect)` identity
    pub fn matches(&self, taint: &Taint) -> bool {
        taint_matches(taint, &self.key, self.effect)
    }

    /// Build the k8s-openapi taint this descriptor applies
    pub fn to_taint(&self) -> Taint {
        Taint {
            key: self.key.clone(),
            value: Some(self.value().to_string()),
            effect: self.effect.as_str().to_string(),
            time_added: None,
        }
    }
}

impl fmt::Display for TaintDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.key, self.value(), self.effect)
    }
}

/// Match a node taint on `(key, effect)`, ignoring its value
pub fn taint_matches(taint: &Taint, key: &str, effect: TaintEffect) -> bool {
    taint.key == key && taint.effect == effect.as_str()
}
