//! Weighted traffic mixes
//!
//! Tables are validated once when the plan is built; drawing never fails.

use std::collections::BTreeMap;

use qa_core::{OperationCategory, QaError, QaResult};
use rand::Rng;

use crate::catalog::OperationCatalog;

/// Statically validated weighted-choice table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedTable {
    // (operation, cumulative upper bound)
    entries: Vec<(String, u32)>,
    total: u32,
}

impl WeightedTable {
    /// Build a table whose weights must sum to `expected_total`.
    /// Zero-weight entries are dropped.
    pub fn new(weights: &BTreeMap<String, u32>, expected_total: u32) -> QaResult<Self> {
        let total: u64 = weights.values().map(|w| u64::from(*w)).sum();
        if total != u64::from(expected_total) {
            return Err(QaError::validation(format!(
                "weights sum to {total}, expected {expected_total}"
            )));
        }
        let total = expected_total;
        if total == 0 {
            return Err(QaError::validation("weight table is empty"));
        }

        let mut cumulative = 0;
        let entries = weights
            .iter()
            .filter(|(_, weight)| **weight > 0)
            .map(|(name, weight)| {
                cumulative += weight;
                (name.clone(), cumulative)
            })
            .collect();

        Ok(Self { entries, total })
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Operation for a roll in `0..total`.
    pub fn pick(&self, roll: u32) -> &str {
        let index = self.entries.partition_point(|(_, bound)| *bound <= roll);
        let index = index.min(self.entries.len() - 1);
        &self.entries[index].0
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        self.pick(rng.gen_range(0..self.total))
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

/// Two-level mix: category by read percentage, then operation by weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficMix {
    read_pct: u32,
    reads: WeightedTable,
    writes: WeightedTable,
}

impl TrafficMix {
    /// Build and validate against the catalog: every operation must exist
    /// and belong to the category it is listed under.
    pub fn new(
        read_pct: u32,
        read_weights: &BTreeMap<String, u32>,
        write_weights: &BTreeMap<String, u32>,
        catalog: &OperationCatalog,
    ) -> QaResult<Self> {
        if read_pct > 100 {
            return Err(QaError::validation(format!("read percentage {read_pct} exceeds 100")));
        }

        let reads = WeightedTable::new(read_weights, 100)
            .map_err(|e| QaError::validation(format!("read weights: {e}")))?;
        let writes = WeightedTable::new(write_weights, 100)
            .map_err(|e| QaError::validation(format!("write weights: {e}")))?;

        for (table, category) in [(&reads, OperationCategory::Read), (&writes, OperationCategory::Write)] {
            for name in table.operations() {
                let op = catalog.require(name)?;
                if op.category != category {
                    return Err(QaError::validation(format!(
                        "operation `{name}` is a {} operation listed under {category} weights",
                        op.category
                    )));
                }
            }
        }

        Ok(Self { read_pct, reads, writes })
    }

    pub fn read_pct(&self) -> u32 {
        self.read_pct
    }

    /// Draw the category, then the operation within it.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> (OperationCategory, &str) {
        let roll: u32 = rng.gen_range(0..100);
        if roll < self.read_pct {
            (OperationCategory::Read, self.reads.choose(rng))
        } else {
            (OperationCategory::Write, self.writes.choose(rng))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn weights(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn standard_mix(read_pct: u32) -> TrafficMix {
        let catalog = OperationCatalog::standard().unwrap();
        TrafficMix::new(
            read_pct,
            &weights(&[("list_pois", 35), ("list_assets", 25), ("list_scripts", 15), ("list_renders", 10), ("health", 15)]),
            &weights(&[("create_poi", 60), ("create_asset", 25), ("update_poi", 15)]),
            &catalog,
        )
        .unwrap()
    }

    #[test]
    fn test_pick_boundaries() {
        let table = WeightedTable::new(&weights(&[("a", 10), ("b", 0), ("c", 90)]), 100).unwrap();
        assert_eq!(table.pick(0), "a");
        assert_eq!(table.pick(9), "a");
        assert_eq!(table.pick(10), "c");
        assert_eq!(table.pick(99), "c");
        assert_eq!(table.operations().count(), 2);
    }

    #[test]
    fn test_rejects_bad_sum() {
        assert!(WeightedTable::new(&weights(&[("a", 10), ("b", 80)]), 100).is_err());
        assert!(WeightedTable::new(&weights(&[]), 0).is_err());
    }

    #[test]
    fn test_rejects_weights_that_wrap() {
        let err = WeightedTable::new(&weights(&[("a", u32::MAX), ("b", 101)]), 100).unwrap_err();
        assert!(err.to_string().contains("4294967396"), "{err}");
    }

    #[test]
    fn test_rejects_wrong_category() {
        let catalog = OperationCatalog::standard().unwrap();
        let result = TrafficMix::new(
            80,
            &weights(&[("create_poi", 100)]),
            &weights(&[("create_poi", 100)]),
            &catalog,
        );
        assert!(result.is_err());

        let unknown = TrafficMix::new(80, &weights(&[("nope", 100)]), &weights(&[("create_poi", 100)]), &catalog);
        assert!(unknown.is_err());
    }

    #[test]
    fn test_read_ratio_converges_with_fixed_seed() {
        for read_pct in [80, 90] {
            let mix = standard_mix(read_pct);
            let mut rng = StdRng::seed_from_u64(42);
            let draws = 200_000;
            let reads = (0..draws)
                .filter(|_| mix.choose(&mut rng).0 == OperationCategory::Read)
                .count();
            let ratio = reads as f64 / draws as f64;
            assert!((ratio - read_pct as f64 / 100.0).abs() < 0.01, "ratio {ratio} for {read_pct}%");
        }
    }

    #[test]
    fn test_operation_weights_converge() {
        let mix = standard_mix(80);
        let mut rng = StdRng::seed_from_u64(7);
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let draws = 200_000;
        for _ in 0..draws {
            let (_, op) = mix.choose(&mut rng);
            *counts.entry(op.to_string()).or_default() += 1;
        }
        // list_pois: 0.8 * 0.35 = 28%
        let list_pois = counts["list_pois"] as f64 / draws as f64;
        assert!((list_pois - 0.28).abs() < 0.01);
        // create_poi: 0.2 * 0.60 = 12%
        let create = counts["create_poi"] as f64 / draws as f64;
        assert!((create - 0.12).abs() < 0.01);
    }
}
