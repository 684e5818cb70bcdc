//! Static package catalog.

use super::errors::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Purchasable package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub code: String,
    pub gold_amount: i64,
    #[serde(default)]
    pub sweeps_amount: i64,
}

impl Package {
    pub fn new(code: &str, gold_amount: i64, sweeps_amount: i64) -> Self {
        Self {
            code: code.to_string(),
            gold_amount,
            sweeps_amount,
        }
    }
}

/// Read-only lookup of packages by code, built once at startup
#[derive(Debug, Clone)]
pub struct PackageCatalog {
    packages: BTreeMap<String, Package>,
}

impl PackageCatalog {
    /// Build a catalog, rejecting duplicate codes and non-positive gold grants
    pub fn new(packages: impl IntoIterator<Item = Package>) -> LedgerResult<Self> {
        let mut map = BTreeMap::new();
        for package in packages {
            if package.code.trim().is_empty() {
                return Err(LedgerError::Configuration(
                    "package code cannot be empty".to_string(),
                ));
            }
            if package.gold_amount <= 0 {
                return Err(LedgerError::Configuration(format!(
                    "package {} must grant a positive gold amount",
                    package.code
                )));
            }
            if package.sweeps_amount < 0 {
                return Err(LedgerError::Configuration(format!(
                    "package {} has a negative sweeps amount",
                    package.code
                )));
            }
            if map.contains_key(&package.code) {
                return Err(LedgerError::Configuration(format!(
                    "duplicate package code {}",
                    package.code
                )));
            }
            map.insert(package.code.clone(), package);
        }

        if map.is_empty() {
            return Err(LedgerError::Configuration(
                "package catalog is empty".to_string(),
            ));
        }

        Ok(Self { packages: map })
    }

    /// The built-in packages
    pub fn standard() -> Self {
        let packages = [
            Package::new("starter_10k", 10_000, 10),
            Package::new("grinder_50k", 50_000, 50),
            Package::new("highroller_250k", 250_000, 250),
        ];
        Self {
            packages: packages
                .into_iter()
                .map(|p| (p.code.clone(), p))
                .collect(),
        }
    }

    /// Load a catalog from a JSON array of packages
    pub fn from_json(json: &str) -> LedgerResult<Self> {
        let packages: Vec<Package> = serde_json::from_str(json)
            .map_err(|e| LedgerError::Configuration(format!("invalid package catalog: {e}")))?;
        Self::new(packages)
    }

    pub fn get(&self, code: &str) -> Option<&Package> {
        self.packages.get(code)
    }

    /// Look up a package or fail with [`LedgerError::InvalidPackage`]
    pub fn resolve(&self, code: &str) -> LedgerResult<&Package> {
        self.get(code)
            .ok_or_else(|| LedgerError::InvalidPackage(code.to_string()))
    }

    /// Packages ordered by code
    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl Default for PackageCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
