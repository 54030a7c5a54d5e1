// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};

use prism_render_vk::{QueueSearch, VkOptions};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "prism".into(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueSearchCfg {
    #[default]
    Independent,
    GraphicsExclusive,
}

impl From<QueueSearchCfg> for QueueSearch {
    fn from(cfg: QueueSearchCfg) -> Self {
        match cfg {
            QueueSearchCfg::Independent => QueueSearch::Independent,
            QueueSearchCfg::GraphicsExclusive => QueueSearch::GraphicsExclusive,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_validation")]
    pub validation: bool,
    #[serde(default)]
    pub allow_integrated_gpu: bool,
    #[serde(default)]
    pub queue_search: QueueSearchCfg,
    /// Directory of `<name>.spv` files; embedded bytecode when unset.
    #[serde(default)]
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            validation: default_validation(),
            allow_integrated_gpu: false,
            queue_search: QueueSearchCfg::Independent,
            shader_dir: None,
        }
    }
}

impl RenderCfg {
    pub fn vk_options(&self) -> VkOptions {
        VkOptions {
            allow_integrated_gpu: self.allow_integrated_gpu,
            queue_search: self.queue_search.into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
}

fn default_clear() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}
fn default_validation() -> bool {
    cfg!(debug_assertions)
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(text)
}

/// Missing file gives defaults; a file that does not parse gives defaults and a warning.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("ignoring {}: {e}", path.display());
            AppCfg::default()
        }),
        Err(e) => {
            debug!("no config at {} ({e}); using defaults", path.display());
            AppCfg::default()
        }
    }
}
