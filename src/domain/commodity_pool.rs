//! Named commodity pools (§6) — a loadable shorthand for a symbol selector.
//!
//! The exact list is partially data-driven in the source system; this crate
//! treats the baseline below as the *default* and allows it to be overridden
//! from a TOML file via [`CommodityPools::load`].

use crate::domain::errors::ConfigError;
use crate::domain::types::CommodityCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Baseline pools from `spec.md` §6, used both as the default registry and to
/// validate a `SymbolSelector::Pool` name before it ever reaches an agent.
pub const BASELINE_POOLS: &[(&str, &[&str])] = &[
    ("black", &["rb", "hc", "i", "j", "jm"]),
    ("metal", &["cu", "al", "zn", "pb", "ni", "sn"]),
    ("precious_metal", &["au", "ag"]),
    ("agriculture", &["a", "m", "y", "c", "cs", "cf"]),
    ("chemical", &["ta", "ma", "pp", "l", "v", "eg"]),
    ("financial", &["if", "ic", "ih", "t", "tf"]),
    (
        "all",
        &[
            "rb", "hc", "i", "j", "jm", "cu", "al", "zn", "pb", "ni", "sn", "au", "ag", "a", "m",
            "y", "c", "cs", "cf", "ta", "ma", "pp", "l", "v", "eg", "if", "ic", "ih", "t", "tf",
        ],
    ),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommodityPools {
    pools: HashMap<String, Vec<CommodityCode>>,
}

impl Default for CommodityPools {
    fn default() -> Self {
        let pools = BASELINE_POOLS
            .iter()
            .map(|(name, members)| {
                (
                    name.to_string(),
                    members.iter().map(|m| m.to_string()).collect(),
                )
            })
            .collect();
        Self { pools }
    }
}

impl CommodityPools {
    /// Load pools from a TOML file, falling back to the baseline when the
    /// path does not exist. A malformed file is a configuration error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
            field: "commodity_pools_path",
            reason: e.to_string(),
        })?;
        let pools: HashMap<String, Vec<CommodityCode>> =
            toml::from_str(&contents).map_err(|e| ConfigError::Invalid {
                field: "commodity_pools_path",
                reason: e.to_string(),
            })?;
        Ok(Self { pools })
    }

    /// Unknown pool names are a validation error (§6), never reaching an
    /// agent.
    pub fn expand(&self, name: &str) -> Result<Vec<CommodityCode>, ConfigError> {
        self.pools
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownPool(name.to_string()))
    }

    /// The named sector a commodity belongs to, used by
    /// `SectorConcentrationValidator` to bucket exposure. The catch-all `all`
    /// pool is never returned since every commodity lives in it.
    pub fn sector_of(&self, commodity: &str) -> Option<String> {
        self.pools
            .iter()
            .filter(|(name, _)| name.as_str() != "all")
            .find(|(_, members)| members.iter().any(|m| m == commodity))
            .map(|(name, _)| name.clone())
    }
}

/// Recovers the commodity code a dominant-contract symbol was resolved from
/// (e.g. `"rb2501"` -> `"rb"`), by stripping the trailing contract-month
/// digits. Used to map an `OrderIntent::symbol` back to a sector.
pub fn commodity_of_symbol(symbol: &str) -> CommodityCode {
    symbol
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_black_pool_matches_spec() {
        let pools = CommodityPools::default();
        let black = pools.expand("black").unwrap();
        assert_eq!(black, vec!["rb", "hc", "i", "j", "jm"]);
    }

    #[test]
    fn unknown_pool_is_an_error() {
        let pools = CommodityPools::default();
        assert!(matches!(
            pools.expand("nonexistent"),
            Err(ConfigError::UnknownPool(_))
        ));
    }

    #[test]
    fn missing_file_falls_back_to_baseline() {
        let pools = CommodityPools::load(Path::new("/nonexistent/pools.toml")).unwrap();
        assert!(pools.expand("metal").is_ok());
    }

    #[test]
    fn sector_of_finds_named_pool_not_all() {
        let pools = CommodityPools::default();
        assert_eq!(pools.sector_of("rb"), Some("black".to_string()));
        assert_eq!(pools.sector_of("au"), Some("precious_metal".to_string()));
        assert_eq!(pools.sector_of("nonexistent"), None);
    }

    #[test]
    fn commodity_of_symbol_strips_contract_month() {
        assert_eq!(commodity_of_symbol("rb2501"), "rb");
        assert_eq!(commodity_of_symbol("au"), "au");
    }
}
