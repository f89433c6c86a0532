//! Indicator catalog: names, descriptions, and parameter schemas.
//!
//! The full catalog ships as an external JSON file mapping indicator name to
//! a description and parameter schema. When the file is absent or
//! unreadable, a minimal built-in catalog takes its place so the indicator
//! stage remains usable.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSchema>,
}

#[derive(Debug, Clone)]
pub struct IndicatorCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl IndicatorCatalog {
    /// Load the catalog JSON, falling back to the built-in catalog when the
    /// file is missing or malformed.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, CatalogEntry>>(&raw) {
                Ok(entries) => {
                    info!(count = entries.len(), "indicator catalog loaded");
                    Self { entries }
                }
                Err(e) => {
                    warn!(error = %e, "malformed indicator catalog, using built-in fallback");
                    Self::fallback()
                }
            },
            Err(_) => {
                warn!(path = %path.display(), "indicator catalog not found, using built-in fallback");
                Self::fallback()
            }
        }
    }

    /// The built-in two-indicator catalog.
    pub fn fallback() -> Self {
        fn param(required: bool, default: serde_json::Value, kind: &str) -> ParamSchema {
            ParamSchema {
                required,
                default: Some(default),
                kind: Some(kind.to_string()),
            }
        }

        let mut entries = BTreeMap::new();
        entries.insert(
            "RSI".to_string(),
            CatalogEntry {
                description: "Relative Strength Index".to_string(),
                params: BTreeMap::from([(
                    "window".to_string(),
                    param(false, json!(14), "int"),
                )]),
            },
        );
        entries.insert(
            "MACD".to_string(),
            CatalogEntry {
                description: "Moving Average Convergence Divergence".to_string(),
                params: BTreeMap::from([
                    ("fast_window".to_string(), param(false, json!(12), "int")),
                    ("slow_window".to_string(), param(false, json!(26), "int")),
                    ("signal_window".to_string(), param(false, json!(9), "int")),
                ]),
            },
        );
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Case-insensitive substring search over names and descriptions.
    pub fn search(&self, query: &str) -> Vec<&str> {
        let query = query.to_lowercase();
        self.entries
            .iter()
            .filter(|(name, entry)| {
                name.to_lowercase().contains(&query)
                    || entry.description.to_lowercase().contains(&query)
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
