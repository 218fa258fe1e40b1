// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Bootstrap".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub surface_format: String,
    pub depth_format: String,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            surface_format: "b8g8r8a8_unorm".to_string(),
            depth_format: "d16_unorm".to_string(),
            clear_color: [0.2, 0.2, 0.2, 1.0],
            clear_depth: 1.0,
            max_frames_in_flight: 2,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "vkboot.log".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Get preferred surface format as Vulkan enum
    pub fn get_surface_format(&self) -> ash::vk::Format {
        match self.graphics.surface_format.to_lowercase().as_str() {
            "b8g8r8a8_unorm" => ash::vk::Format::B8G8R8A8_UNORM,
            "b8g8r8a8_srgb" => ash::vk::Format::B8G8R8A8_SRGB,
            "r8g8b8a8_unorm" => ash::vk::Format::R8G8B8A8_UNORM,
            "r8g8b8a8_srgb" => ash::vk::Format::R8G8B8A8_SRGB,
            _ => {
                log::warn!(
                    "Unknown surface format '{}', defaulting to B8G8R8A8_UNORM",
                    self.graphics.surface_format
                );
                ash::vk::Format::B8G8R8A8_UNORM
            }
        }
    }

    /// Get preferred depth format as Vulkan enum
    pub fn get_depth_format(&self) -> ash::vk::Format {
        match self.graphics.depth_format.to_lowercase().as_str() {
            "d16_unorm" => ash::vk::Format::D16_UNORM,
            "d32_sfloat" => ash::vk::Format::D32_SFLOAT,
            "d32_sfloat_s8_uint" => ash::vk::Format::D32_SFLOAT_S8_UINT,
            "d24_unorm_s8_uint" => ash::vk::Format::D24_UNORM_S8_UINT,
            _ => {
                log::warn!(
                    "Unknown depth format '{}', defaulting to D16_UNORM",
                    self.graphics.depth_format
                );
                ash::vk::Format::D16_UNORM
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn defaults_when_tables_missing() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert!(!config.window.fullscreen);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [window]
            width = 800
            height = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.window.title, "Vulkan Bootstrap");
        assert_eq!(config.graphics.present_mode, "mailbox");
    }

    #[test]
    fn present_mode_parsing() {
        let mut config = Config::default();
        config.graphics.present_mode = "fifo".to_string();
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::FIFO);
        config.graphics.present_mode = "IMMEDIATE".to_string();
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::IMMEDIATE);
        config.graphics.present_mode = "bogus".to_string();
        assert_eq!(config.get_present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn format_parsing() {
        let mut config = Config::default();
        assert_eq!(config.get_surface_format(), vk::Format::B8G8R8A8_UNORM);
        assert_eq!(config.get_depth_format(), vk::Format::D16_UNORM);
        config.graphics.surface_format = "r8g8b8a8_srgb".to_string();
        assert_eq!(config.get_surface_format(), vk::Format::R8G8B8A8_SRGB);
        config.graphics.depth_format = "d24_unorm_s8_uint".to_string();
        assert_eq!(config.get_depth_format(), vk::Format::D24_UNORM_S8_UINT);
        config.graphics.depth_format = "nonsense".to_string();
        assert_eq!(config.get_depth_format(), vk::Format::D16_UNORM);
    }
}
