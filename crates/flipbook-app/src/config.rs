// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::Path;

use clap::ValueEnum;
use flipbook_render::{EngineConfig, PresentPreference, RecordPolicy};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Mailbox,
    Fifo,
    Immediate,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordCfg {
    #[default]
    Cached,
    PerFrame,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    #[serde(default)]
    pub present_mode: PresentModeCfg,
    #[serde(default)]
    pub record: RecordCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            frames_in_flight: default_frames_in_flight(),
            present_mode: PresentModeCfg::Mailbox,
            record: RecordCfg::Cached,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub render: RenderCfg,
}

fn default_clear() -> [f32; 4] {
    EngineConfig::default().clear_color
}

fn default_frames_in_flight() -> usize {
    EngineConfig::default().frames_in_flight
}

/// Missing file means defaults; a malformed one is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(_) => AppCfg::default(),
    }
}

pub fn parse_cfg(s: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(s)
}

impl From<PresentModeCfg> for PresentPreference {
    fn from(m: PresentModeCfg) -> Self {
        match m {
            PresentModeCfg::Mailbox => PresentPreference::Mailbox,
            PresentModeCfg::Fifo => PresentPreference::Fifo,
            PresentModeCfg::Immediate => PresentPreference::Immediate,
        }
    }
}

impl From<RecordCfg> for RecordPolicy {
    fn from(r: RecordCfg) -> Self {
        match r {
            RecordCfg::Cached => RecordPolicy::Cached,
            RecordCfg::PerFrame => RecordPolicy::PerFrame,
        }
    }
}

impl RenderCfg {
    /// CLI values, when given, override the file.
    pub fn resolve(
        &self,
        frames_in_flight: Option<usize>,
        present_mode: Option<PresentModeCfg>,
    ) -> EngineConfig {
        EngineConfig {
            frames_in_flight: frames_in_flight.unwrap_or(self.frames_in_flight),
            present: present_mode.unwrap_or(self.present_mode).into(),
            record: self.record.into(),
            clear_color: self.clear_color,
        }
    }
}
