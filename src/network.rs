//! Correlation network
//!
//! Pairwise Pearson correlation between columns over pairwise-complete rows,
//! corrected as its own false-discovery family, with the strongest positive
//! and negative neighbors retained per column.

use crate::config::{InsightConfig, NetworkScope};
use crate::correction::benjamini_hochberg;
use crate::error::InsightError;
use crate::stats;
use crate::types::DerivedFeatureTable;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// One retained column pair (`a` < `b`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEdge {
    pub a: String,
    pub b: String,
    pub r: f64,
    pub p_value: f64,
    pub q_value: f64,
    /// Pairwise-complete observations
    pub n: usize,
}

/// A pair left out of the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedPair {
    pub a: String,
    pub b: String,
    pub overlap: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub column: String,
    pub r: f64,
    pub q_value: f64,
}

/// Top neighbors of one column, strongest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Neighbors {
    pub positive: Vec<Neighbor>,
    pub negative: Vec<Neighbor>,
}

/// Pairwise correlation network for one batch run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "NetworkParts")]
pub struct CorrelationNetwork {
    pub edges: Vec<CorrelationEdge>,
    pub neighbors: BTreeMap<String, Neighbors>,
    pub excluded: Vec<ExcludedPair>,
    #[serde(skip)]
    index: HashMap<(String, String), usize>,
}

/// Serialized form of [`CorrelationNetwork`]; the pair index is rebuilt on load
#[derive(Deserialize)]
struct NetworkParts {
    edges: Vec<CorrelationEdge>,
    #[serde(default)]
    neighbors: BTreeMap<String, Neighbors>,
    #[serde(default)]
    excluded: Vec<ExcludedPair>,
}

impl From<NetworkParts> for CorrelationNetwork {
    fn from(parts: NetworkParts) -> Self {
        Self {
            index: edge_index(&parts.edges),
            edges: parts.edges,
            neighbors: parts.neighbors,
            excluded: parts.excluded,
        }
    }
}

enum PairOutcome {
    Edge { r: f64, p: f64, n: usize },
    Excluded { overlap: usize, reason: String },
}

impl CorrelationNetwork {
    /// Build the network over the columns selected by the configured scope
    pub fn build(
        table: &DerivedFeatureTable,
        config: &InsightConfig,
    ) -> Result<Self, InsightError> {
        let columns: Vec<String> = match config.network_scope {
            NetworkScope::Base => table
                .base_columns()
                .filter(|s| s.usable)
                .map(|s| s.name.clone())
                .collect(),
            NetworkScope::All => table.usable_columns().map(|s| s.name.clone()).collect(),
        };
        Self::correlate(table, &columns, config)
    }

    /// Correlate every pair of `columns`.
    ///
    /// Pairs with fewer than `min_pair_overlap` paired observations, or with a
    /// constant side, are excluded rather than reported with an unstable r.
    pub fn correlate(
        table: &DerivedFeatureTable,
        columns: &[String],
        config: &InsightConfig,
    ) -> Result<Self, InsightError> {
        let mut names: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
        names.sort_unstable();
        names.dedup();

        let data = names
            .iter()
            .map(|n| table.column(n))
            .collect::<Result<Vec<_>, _>>()?;

        let pairs: Vec<(usize, usize)> = (0..names.len())
            .flat_map(|i| ((i + 1)..names.len()).map(move |j| (i, j)))
            .collect();

        let required = config.min_pair_overlap;
        let evaluate = |&(i, j): &(usize, usize)| -> PairOutcome {
            let (x, y) = stats::paired(data[i], data[j]);
            let overlap = x.len();
            if overlap < required {
                let reason = InsightError::DegenerateCorrelation {
                    a: names[i].to_string(),
                    b: names[j].to_string(),
                    overlap,
                    required,
                };
                return PairOutcome::Excluded {
                    overlap,
                    reason: reason.to_string(),
                };
            }
            match stats::pearson(&x, &y) {
                Some(r) => PairOutcome::Edge {
                    r,
                    p: stats::correlation_p_value(r, overlap),
                    n: overlap,
                },
                None => PairOutcome::Excluded {
                    overlap,
                    reason: InsightError::UndefinedStatistic(format!(
                        "correlation of '{}' and '{}' with a constant column",
                        names[i], names[j]
                    ))
                    .to_string(),
                },
            }
        };

        #[cfg(feature = "parallel")]
        let outcomes: Vec<PairOutcome> = pairs.par_iter().map(evaluate).collect();
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<PairOutcome> = pairs.iter().map(evaluate).collect();

        let mut edges = Vec::new();
        let mut excluded = Vec::new();
        for (&(i, j), outcome) in pairs.iter().zip(outcomes) {
            match outcome {
                PairOutcome::Edge { r, p, n } => edges.push(CorrelationEdge {
                    a: names[i].to_string(),
                    b: names[j].to_string(),
                    r,
                    p_value: p,
                    q_value: 1.0,
                    n,
                }),
                PairOutcome::Excluded { overlap, reason } => excluded.push(ExcludedPair {
                    a: names[i].to_string(),
                    b: names[j].to_string(),
                    overlap,
                    reason,
                }),
            }
        }

        // Separate family from the regression hypotheses
        let p: Vec<f64> = edges.iter().map(|e| e.p_value).collect();
        for (edge, q) in edges.iter_mut().zip(benjamini_hochberg(&p)) {
            edge.q_value = q;
        }

        let index = edge_index(&edges);
        let neighbors = top_neighbors(&edges, config.fdr_threshold, config.network_top_n);

        Ok(Self {
            edges,
            neighbors,
            excluded,
            index,
        })
    }

    /// Edge between two columns, in either order
    pub fn get(&self, a: &str, b: &str) -> Option<&CorrelationEdge> {
        let key = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        self.index.get(&key).map(|&i| &self.edges[i])
    }

    pub fn neighbors(&self, column: &str) -> Option<&Neighbors> {
        self.neighbors.get(column)
    }

    /// Whether a column took part in at least one retained pair
    pub fn contains_column(&self, column: &str) -> bool {
        self.edges.iter().any(|e| e.a == column || e.b == column)
    }
}

fn edge_index(edges: &[CorrelationEdge]) -> HashMap<(String, String), usize> {
    edges
        .iter()
        .enumerate()
        .map(|(i, e)| ((e.a.clone(), e.b.clone()), i))
        .collect()
}

fn top_neighbors(
    edges: &[CorrelationEdge],
    threshold: f64,
    top_n: usize,
) -> BTreeMap<String, Neighbors> {
    let mut map: BTreeMap<String, Neighbors> = BTreeMap::new();

    for edge in edges {
        map.entry(edge.a.clone()).or_default();
        map.entry(edge.b.clone()).or_default();
        if edge.q_value >= threshold || edge.r == 0.0 {
            continue;
        }
        for (from, to) in [(&edge.a, &edge.b), (&edge.b, &edge.a)] {
            let neighbor = Neighbor {
                column: to.clone(),
                r: edge.r,
                q_value: edge.q_value,
            };
            let entry = map.entry(from.clone()).or_default();
            if edge.r > 0.0 {
                entry.positive.push(neighbor);
            } else {
                entry.negative.push(neighbor);
            }
        }
    }

    for entry in map.values_mut() {
        for list in [&mut entry.positive, &mut entry.negative] {
            list.sort_by(|x, y| {
                y.r.abs()
                    .total_cmp(&x.r.abs())
                    .then_with(|| x.column.cmp(&y.column))
            });
            list.truncate(top_n);
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureDeriver;
    use crate::types::{DailyMetricsRow, MetricsTable};
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn table() -> DerivedFeatureTable {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let rows: Vec<DailyMetricsRow> = (0..20)
            .map(|i| {
                let x = ((i * 7) % 11) as f64;
                DailyMetricsRow::new(start + chrono::Duration::days(i))
                    .with_metric("steps_sum", Some(1000.0 * x))
                    .with_metric("hrv_mean", Some(30.0 + 2.0 * x + (i % 2) as f64))
                    .with_metric("resting_hr_mean", Some(70.0 - x + 0.5 * (i % 3) as f64))
                    // Only 6 observations: never reaches the overlap threshold
                    .with_metric("glucose_mean", if i < 6 { Some(90.0 + x) } else { None })
            })
            .collect();
        FeatureDeriver::derive(&MetricsTable::from_rows(&rows), &BTreeSet::new(), &BTreeSet::new())
            .unwrap()
    }

    #[test]
    fn test_symmetric_lookup() {
        let network = CorrelationNetwork::build(&table(), &InsightConfig::default()).unwrap();
        let ab = network.get("steps_sum", "hrv_mean").unwrap();
        let ba = network.get("hrv_mean", "steps_sum").unwrap();
        assert_eq!(ab, ba);
        assert!(ab.r > 0.9);
        assert_eq!(ab.n, 20);

        let x = table();
        let (s, h) = stats::paired(x.column("steps_sum").unwrap(), x.column("hrv_mean").unwrap());
        assert_eq!(stats::pearson(&s, &h), stats::pearson(&h, &s));
    }

    #[test]
    fn test_sparse_column_is_excluded_entirely() {
        let network = CorrelationNetwork::build(&table(), &InsightConfig::default()).unwrap();

        assert!(!network.contains_column("glucose_mean"));
        assert!(network.neighbors("glucose_mean").is_none());
        assert!(network
            .neighbors
            .values()
            .flat_map(|n| n.positive.iter().chain(&n.negative))
            .all(|n| n.column != "glucose_mean"));
        assert_eq!(
            network
                .excluded
                .iter()
                .filter(|p| p.a == "glucose_mean" || p.b == "glucose_mean")
                .count(),
            3
        );
    }

    #[test]
    fn test_neighbors_split_by_sign() {
        let network = CorrelationNetwork::build(&table(), &InsightConfig::default()).unwrap();
        let steps = network.neighbors("steps_sum").unwrap();

        assert_eq!(steps.positive[0].column, "hrv_mean");
        assert_eq!(steps.negative[0].column, "resting_hr_mean");
        assert!(steps.negative[0].r < 0.0);
        assert!(steps.positive.iter().all(|n| n.q_value < 0.05));
    }

    #[test]
    fn test_top_n_limits_neighbors() {
        let config = InsightConfig {
            network_top_n: 1,
            ..Default::default()
        };
        let network = CorrelationNetwork::build(&table(), &config).unwrap();
        for entry in network.neighbors.values() {
            assert!(entry.positive.len() <= 1);
            assert!(entry.negative.len() <= 1);
        }
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let columns = vec!["steps_sum".to_string(), "sleep_score".to_string()];
        let result = CorrelationNetwork::correlate(&table(), &columns, &InsightConfig::default());
        assert!(matches!(result, Err(InsightError::UnknownColumn(_))));
    }

    #[test]
    fn test_lookup_survives_json_round_trip() {
        let network = CorrelationNetwork::build(&table(), &InsightConfig::default()).unwrap();
        let json = serde_json::to_string(&network).unwrap();
        let restored: CorrelationNetwork = serde_json::from_str(&json).unwrap();

        let edge = restored.get("hrv_mean", "steps_sum").unwrap();
        let original = network.get("steps_sum", "hrv_mean").unwrap();
        assert_eq!((&edge.a, &edge.b, edge.n), (&original.a, &original.b, original.n));
        assert!((edge.r - original.r).abs() < 1e-12);
        assert_eq!(restored.edges.len(), network.edges.len());
        assert_eq!(
            restored.neighbors.keys().collect::<Vec<_>>(),
            network.neighbors.keys().collect::<Vec<_>>()
        );
        assert!(restored.get("glucose_mean", "steps_sum").is_none());
    }
}
