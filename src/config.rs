//! Layered configuration: defaults, then an optional YAML file, then `CKKS_EVAL_*`
//! environment variables (`__` separates nested keys).

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::audit::DEFAULT_AUDIT_CAPACITY;
use crate::error::Result;
use crate::noise::NoiseParams;
use crate::params::SchemeParameters;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "CKKS_EVAL_";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub context: ContextConfig,
    pub preview: PreviewConfig,
    pub audit: AuditConfig,
    pub log_level: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    pub poly_modulus_degree: usize,
    pub coeff_mod_bit_sizes: Vec<u32>,
    pub global_scale: f64,
    /// Rotation steps to generate Galois keys for at start-up.
    pub galois_steps: Vec<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreviewConfig {
    pub enabled: bool,
    pub sensitivity: f64,
    pub epsilon: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    pub capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let params = SchemeParameters::default();
        Self {
            context: ContextConfig {
                poly_modulus_degree: params.poly_modulus_degree,
                coeff_mod_bit_sizes: params.coeff_mod_bit_sizes,
                global_scale: params.global_scale,
                galois_steps: Vec::new(),
            },
            preview: PreviewConfig {
                enabled: true,
                sensitivity: 1.0,
                epsilon: 1.0,
            },
            audit: AuditConfig {
                capacity: DEFAULT_AUDIT_CAPACITY,
            },
            log_level: "info".into(),
        }
    }
}

impl ContextConfig {
    pub fn scheme_parameters(&self) -> SchemeParameters {
        SchemeParameters::new(
            self.poly_modulus_degree,
            self.coeff_mod_bit_sizes.clone(),
            self.global_scale,
        )
    }
}

impl PreviewConfig {
    /// Noise parameters for previews, or `None` when previews are disabled.
    pub fn noise_params(&self) -> Result<Option<NoiseParams>> {
        if !self.enabled {
            return Ok(None);
        }
        NoiseParams::new(self.sensitivity, self.epsilon).map(Some)
    }
}

/// Build the layered figment.
pub fn figment(config_file: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
    if let Some(path) = config_file {
        figment = figment.merge(Yaml::file(path));
    }
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the configuration, optionally reading `config_file`.
pub fn load_config(config_file: Option<&Path>) -> std::result::Result<AppConfig, figment::Error> {
    figment(config_file).extract()
}
