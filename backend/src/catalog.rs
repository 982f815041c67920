//! Purchasable rank catalog.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// How long a purchased rank lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Duration {
    SevenDay,
    Seasonal,
}

/// A purchasable access tier. `color` is carried for the storefront only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rank {
    pub name: String,
    pub color: String,
    pub tier: u32,
    pub seven_day_price: u64,
    pub seasonal_price: u64,
}

impl Rank {
    pub fn price(&self, duration: Duration) -> u64 {
        match duration {
            Duration::SevenDay => self.seven_day_price,
            Duration::Seasonal => self.seasonal_price,
        }
    }
}

/// Read-only rank list, sorted by ascending tier.
#[derive(Debug, Clone)]
pub struct Catalog {
    ranks: Vec<Rank>,
}

impl Catalog {
    pub fn new(mut ranks: Vec<Rank>) -> Result<Self> {
        let mut seen = HashSet::new();
        for rank in &ranks {
            anyhow::ensure!(
                seen.insert(rank.name.as_str()),
                "duplicate rank name {:?} in catalog",
                rank.name
            );
        }
        ranks.sort_by_key(|r| r.tier);
        Ok(Self { ranks })
    }

    /// Load a catalog from a JSON array of ranks.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog from {}", path.display()))?;
        let ranks: Vec<Rank> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid catalog JSON in {}", path.display()))?;
        Self::new(ranks)
    }

    pub fn ranks(&self) -> &[Rank] {
        &self.ranks
    }

    pub fn get(&self, name: &str) -> Option<&Rank> {
        self.ranks.iter().find(|r| r.name == name)
    }

    pub fn price_for(&self, name: &str, duration: Duration) -> Option<u64> {
        self.get(name).map(|r| r.price(duration))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        let rank = |name: &str, color: &str, tier, seven_day_price, seasonal_price| Rank {
            name: name.into(),
            color: color.into(),
            tier,
            seven_day_price,
            seasonal_price,
        };
        Self {
            ranks: vec![
                rank("SEAMON", "#f97316", 1, 15, 70),
                rank("SEAMON+", "#22c55e", 2, 35, 100),
                rank("MONARCH", "#a855f7", 3, 90, 200),
                rank("CAPTAIN", "#3b82f6", 4, 150, 300),
                rank("CAPTAIN+", "#ef4444", 5, 200, 450),
                rank("CUSTOM RANK", "#eab308", 6, 250, 600),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_prices() {
        let catalog = Catalog::default();
        assert_eq!(catalog.price_for("SEAMON", Duration::SevenDay), Some(15));
        assert_eq!(catalog.price_for("CAPTAIN+", Duration::Seasonal), Some(450));
        assert_eq!(catalog.price_for("seamon", Duration::SevenDay), None);
    }

    #[test]
    fn sorted_by_tier() {
        let catalog = Catalog::new(vec![
            Rank {
                name: "B".into(),
                color: String::new(),
                tier: 2,
                seven_day_price: 2,
                seasonal_price: 20,
            },
            Rank {
                name: "A".into(),
                color: String::new(),
                tier: 1,
                seven_day_price: 1,
                seasonal_price: 10,
            },
        ])
        .unwrap();
        let names: Vec<_> = catalog.ranks().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["A", "B"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut ranks = Catalog::default().ranks().to_vec();
        ranks.push(ranks[0].clone());
        assert!(Catalog::new(ranks).is_err());
    }

    #[test]
    fn loads_camel_case_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranks.json");
        std::fs::write(
            &path,
            r##"[{"name":"VIP","color":"#fff","tier":1,"sevenDayPrice":5,"seasonalPrice":25}]"##,
        )
        .unwrap();
        let catalog = Catalog::from_file(&path).unwrap();
        assert_eq!(catalog.price_for("VIP", Duration::Seasonal), Some(25));
    }
}
