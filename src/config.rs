/// Grid configuration
///
/// Defaults can be overridden from the environment (`LIVEGRID_PAGE_SIZE`,
/// `LIVEGRID_COLUMN_WIDTH`, `LIVEGRID_PK_DISPLAY`) or from a JSON document.

use crate::error::{GridError, Result};
use crate::processed_column::PrimaryKeyDisplay;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const DEFAULT_COLUMN_WIDTH: u32 = 160;
pub const MIN_COLUMN_WIDTH: u32 = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub page_size: usize,
    pub default_column_width: u32,
    pub min_column_width: u32,
    pub primary_key_display: PrimaryKeyDisplay,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            page_size: DEFAULT_PAGE_SIZE,
            default_column_width: DEFAULT_COLUMN_WIDTH,
            min_column_width: MIN_COLUMN_WIDTH,
            primary_key_display: PrimaryKeyDisplay::Enhanced,
        }
    }
}

impl GridConfig {
    /// Read overrides from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = GridConfig::default();

        if let Some(raw) = lookup("LIVEGRID_PAGE_SIZE") {
            config.page_size = raw
                .trim()
                .parse()
                .map_err(|_| GridError::InvalidConfig(format!("LIVEGRID_PAGE_SIZE must be a number, got '{}'", raw)))?;
        }
        if let Some(raw) = lookup("LIVEGRID_COLUMN_WIDTH") {
            config.default_column_width = raw.trim().parse().map_err(|_| {
                GridError::InvalidConfig(format!("LIVEGRID_COLUMN_WIDTH must be a number, got '{}'", raw))
            })?;
        }
        if let Some(raw) = lookup("LIVEGRID_PK_DISPLAY") {
            config.primary_key_display = PrimaryKeyDisplay::parse(&raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: GridConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(GridError::InvalidConfig("page_size must be positive".to_string()));
        }
        if self.default_column_width < self.min_column_width {
            return Err(GridError::InvalidConfig(format!(
                "default_column_width {} is below min_column_width {}",
                self.default_column_width, self.min_column_width
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = GridConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, GridConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = GridConfig::from_lookup(lookup_from(&[
            ("LIVEGRID_PAGE_SIZE", "100"),
            ("LIVEGRID_PK_DISPLAY", "plain"),
        ]))
        .unwrap();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.primary_key_display, PrimaryKeyDisplay::Plain);
    }

    #[test]
    fn test_bad_values_are_errors() {
        assert!(GridConfig::from_lookup(lookup_from(&[("LIVEGRID_PAGE_SIZE", "lots")])).is_err());
        assert!(GridConfig::from_lookup(lookup_from(&[("LIVEGRID_PAGE_SIZE", "0")])).is_err());
        assert!(GridConfig::from_lookup(lookup_from(&[("LIVEGRID_COLUMN_WIDTH", "10")])).is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = GridConfig::from_json(r#"{"page_size": 20}"#).unwrap();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.default_column_width, DEFAULT_COLUMN_WIDTH);
    }
}
