//! Cycle parameters, loadable from a toml file.

use std::fs;
use std::path::Path;

use thiserror::Error;

/// Which relaxation sweep the smoother runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SmootherKind {
    /// Weighted Jacobi (w = 2/3), reads a snapshot of φ.
    Jacobi,
    /// Gauss-Seidel in lexicographic order.
    GaussSeidel,
    /// Gauss-Seidel with red-black coloring, two half sweeps per cycle.
    RedBlack,
}

/// Multigrid cycle parameters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CycleConfig {
    pub smoother: SmootherKind,
    /// Smoother cycles per level on the way down.
    pub n_cycle_down: usize,
    /// Smoother cycles per level on the way up.
    pub n_cycle_up: usize,
    /// Cap on guarded smoother iterations at the coarsest level.
    pub max_coarse_cycles: usize,
    /// Coarse solve stops once `max|res|` falls below
    /// `max(coarse_rel_tol · initial, coarse_abs_tol)`.
    pub coarse_rel_tol: f64,
    pub coarse_abs_tol: f64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            smoother: SmootherKind::RedBlack,
            n_cycle_down: 2,
            n_cycle_up: 2,
            max_coarse_cycles: 1000,
            coarse_rel_tol: 1e-8,
            coarse_abs_tol: 1e-8,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl CycleConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(toml::from_str(&fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let config: CycleConfig = toml::from_str("smoother = \"jacobi\"").unwrap();

        assert_eq!(config.smoother, SmootherKind::Jacobi);
        assert_eq!(config.n_cycle_down, 2);
        assert_eq!(config.max_coarse_cycles, 1000);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<CycleConfig>("cycles = 3").is_err());
    }
}
