use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::detect::Domain;
use crate::error::Result;

const DEFAULT_CONFIG_FILE: &str = "radmine";

/// Runtime settings, layered: defaults, then `radmine.toml`, then `RADMINE_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub ocr_language: String,
    pub render_dpi: u32,
    pub tessdata_dir: Option<PathBuf>,
    pub document_timeout_secs: u64,
    pub max_concurrency: usize,
    pub renal_threshold_mm: f64,
    pub pulmonary_threshold_mm: f64,
    pub match_threshold: f64,
    pub roster_name_column: String,
    pub roster_attribute_column: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            ocr_language: "por".to_string(),
            render_dpi: 200,
            tessdata_dir: None,
            document_timeout_secs: 120,
            max_concurrency: default_concurrency(),
            renal_threshold_mm: Domain::RenalCalculus.rules().significance_threshold_mm,
            pulmonary_threshold_mm: Domain::PulmonaryNodule.rules().significance_threshold_mm,
            match_threshold: 70.0,
            roster_name_column: "Nome".to_string(),
            roster_attribute_column: "Convenio".to_string(),
        }
    }
}

impl Settings {
    /// Load settings. An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Settings::default();
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Config::builder()
            .set_default("ocr_language", defaults.ocr_language)?
            .set_default("render_dpi", defaults.render_dpi)?
            .set_default("document_timeout_secs", defaults.document_timeout_secs)?
            .set_default("max_concurrency", defaults.max_concurrency as u64)?
            .set_default("renal_threshold_mm", defaults.renal_threshold_mm)?
            .set_default("pulmonary_threshold_mm", defaults.pulmonary_threshold_mm)?
            .set_default("match_threshold", defaults.match_threshold)?
            .set_default("roster_name_column", defaults.roster_name_column)?
            .set_default("roster_attribute_column", defaults.roster_attribute_column)?
            .add_source(file)
            .add_source(Environment::with_prefix("RADMINE"))
            .build()?
            .try_deserialize::<Settings>()?;

        Ok(settings)
    }

    pub fn threshold_for(&self, domain: Domain) -> f64 {
        match domain {
            Domain::RenalCalculus => self.renal_threshold_mm,
            Domain::PulmonaryNodule => self.pulmonary_threshold_mm,
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let s = Settings::load(None).unwrap();
        assert_eq!(s.ocr_language, "por");
        assert_eq!(s.match_threshold, 70.0);
        assert_eq!(s.threshold_for(Domain::RenalCalculus), 6.0);
        assert!(s.max_concurrency >= 1);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "pulmonary_threshold_mm = 8.0\nroster_attribute_column = \"Plano\"").unwrap();
        let s = Settings::load(Some(file.path())).unwrap();
        assert_eq!(s.threshold_for(Domain::PulmonaryNodule), 8.0);
        assert_eq!(s.roster_attribute_column, "Plano");
        assert_eq!(s.render_dpi, 200);
    }

    #[test]
    fn env_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "document_timeout_secs = 30").unwrap();
        // process-wide; no other test asserts on this key
        std::env::set_var("RADMINE_DOCUMENT_TIMEOUT_SECS", "45");
        let loaded = Settings::load(Some(file.path()));
        std::env::remove_var("RADMINE_DOCUMENT_TIMEOUT_SECS");
        let s = loaded.unwrap();
        assert_eq!(s.document_timeout_secs, 45);
        assert_eq!(s.ocr_language, "por");
    }

    #[test]
    fn explicit_missing_file_is_error() {
        assert!(Settings::load(Some(Path::new("/nonexistent/radmine.toml"))).is_err());
    }
}
