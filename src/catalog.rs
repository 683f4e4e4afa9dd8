//! Merch catalog
//!
//! Fixed item → price table. Built once at startup and shared read-only,
//! so lookups never touch the store and need no synchronization.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core_types::Coins;

/// Items every deployment sells unless the config overrides the table.
const DEFAULT_PRICES: [(&str, Coins); 10] = [
    ("t-shirt", 80),
    ("cup", 20),
    ("book", 50),
    ("pen", 10),
    ("powerbank", 200),
    ("hoody", 300),
    ("umbrella", 200),
    ("socks", 10),
    ("wallet", 50),
    ("pink-hoody", 500),
];

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("Catalog item identifier must not be empty")]
    EmptyItem,

    #[error("Price of '{item}' must be positive, got {price}")]
    NonPositivePrice { item: String, price: Coins },
}

/// Immutable item catalog
#[derive(Debug, Clone)]
pub struct Catalog {
    prices: FxHashMap<String, Coins>,
}

impl Catalog {
    /// Build a catalog from a custom price table
    ///
    /// # Errors
    /// Rejects empty identifiers and prices `<= 0`.
    pub fn from_prices<I, S>(prices: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (S, Coins)>,
        S: Into<String>,
    {
        let mut table = FxHashMap::default();
        for (item, price) in prices {
            let item = item.into();
            if item.trim().is_empty() {
                return Err(CatalogError::EmptyItem);
            }
            if price <= 0 {
                return Err(CatalogError::NonPositivePrice { item, price });
            }
            table.insert(item, price);
        }
        Ok(Self { prices: table })
    }

    /// Default table, or the configured override when present.
    pub fn from_config(prices: Option<&BTreeMap<String, Coins>>) -> Result<Self, CatalogError> {
        match prices {
            Some(p) => Self::from_prices(p.iter().map(|(k, v)| (k.clone(), *v))),
            None => Ok(Self::default()),
        }
    }

    /// Price of an item, `None` if the catalog does not sell it
    pub fn price(&self, item: &str) -> Option<Coins> {
        self.prices.get(item).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Item identifiers in lexical order
    pub fn items(&self) -> Vec<&str> {
        let mut items: Vec<&str> = self.prices.keys().map(String::as_str).collect();
        items.sort_unstable();
        items
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            prices: DEFAULT_PRICES
                .iter()
                .map(|(item, price)| (item.to_string(), *price))
                .collect(),
        }
    }
}
