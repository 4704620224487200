use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;

/// Detector channel positions along each axis, in the build-file coordinate
/// system. These are the exact values the mask grid is keyed on, so they must
/// match the hit coordinates written by the event builder bit for bit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridAxes {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl Default for GridAxes {
    /// The SiW-ECAL cosmics stack: 32 pad rows/columns at a 5.5 mm pitch,
    /// mirrored around the beam axis, and 14 sampling layers.
    fn default() -> Self {
        let mut half: Vec<f64> = Vec::new();
        let mut pos = 3.8;
        while pos < 87.0 {
            half.push(pos);
            pos += 5.5;
        }
        let mut xy: Vec<f64> = half.iter().rev().map(|v| -v).collect();
        xy.extend_from_slice(&half);
        Self {
            x: xy.clone(),
            y: xy,
            z: (0..14).map(f64::from).collect(),
        }
    }
}

/// Structure representing the application configuration. Contains pathing,
/// source table and scan information.
/// Configs are serializable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub build_file: PathBuf,
    pub build_tree: String,
    pub triggered_path: PathBuf,
    pub mask_path: PathBuf,
    pub step_size: String,
    pub trigger: String,
    pub entry_stop: Option<u64>,
    pub axes: GridAxes,
}

impl Default for Config {
    /// Generate a new Config object. Path fields will be empty/invalid
    fn default() -> Self {
        Self {
            build_file: PathBuf::from("None"),
            build_tree: String::from("ecal"),
            triggered_path: PathBuf::from("None"),
            mask_path: PathBuf::from("None"),
            step_size: String::from("100 MB"),
            trigger: String::from("nhit_slab > 7"),
            entry_stop: None,
            axes: GridAxes::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Check that the build file referenced by the config exists
    pub fn does_build_file_exist(&self) -> bool {
        self.build_file.exists()
    }

    pub fn mask_file(&self) -> PathBuf {
        self.mask_path.join("mask.txt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_axes() {
        let axes = GridAxes::default();
        assert_eq!(axes.x.len(), 32);
        assert_eq!(axes.y.len(), 32);
        assert_eq!(axes.z.len(), 14);
        // Mirrored pitch positions around zero
        assert_eq!(axes.x[0], -axes.x[31]);
        assert!((axes.x[16] - 3.8).abs() < 1e-12);
        assert!((axes.x[17] - 9.3).abs() < 1e-12);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml_str = serde_yaml::to_string(&config).unwrap();
        let back = serde_yaml::from_str::<Config>(&yaml_str).unwrap();
        assert_eq!(back.build_tree, config.build_tree);
        assert_eq!(back.step_size, config.step_size);
        assert_eq!(back.axes.x, config.axes.x);
        assert_eq!(back.entry_stop, None);
    }
}
