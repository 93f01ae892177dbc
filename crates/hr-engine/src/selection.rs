//! Picking a representative tuning subset out of a larger instance pool.
//!
//! Every instance is described by a vector of numeric features. Features are
//! standardized, clustered with seeded k-means, and the member closest to each
//! centroid represents its cluster.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use hr_types::{config_error, validation_error, HrResult, Problem};
use tracing::{debug, info};

use crate::instances::InstanceStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Share of the pool to keep, in `(0, 1]`.
    pub fraction: f64,
    /// Lower bound on the subset size, capped at the pool size.
    pub min_instances: usize,
    pub seed: u64,
    /// Lloyd iterations before clustering stops without converging.
    pub max_iterations: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            fraction: 0.25,
            min_instances: 1,
            seed: 0,
            max_iterations: 100,
        }
    }
}

impl SelectionConfig {
    pub fn with_fraction(mut self, fraction: f64) -> Self {
        self.fraction = fraction;
        self
    }

    pub fn with_min_instances(mut self, min_instances: usize) -> Self {
        self.min_instances = min_instances;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> HrResult<()> {
        if !(self.fraction > 0.0 && self.fraction <= 1.0) {
            return Err(config_error!("fraction must be in (0, 1], got {}", self.fraction));
        }
        if self.max_iterations == 0 {
            return Err(config_error!("max_iterations must be positive"));
        }
        Ok(())
    }

    /// Subset size for a pool of `pool` instances.
    pub fn target_size(&self, pool: usize) -> usize {
        let wanted = (self.fraction * pool as f64).ceil() as usize;
        wanted.max(self.min_instances).min(pool)
    }
}

/// Chosen representatives and the cluster each one stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Representatives in pool order.
    pub selected: Vec<String>,
    /// Members of every cluster, representative first.
    pub clusters: Vec<Vec<String>>,
    pub iterations: usize,
}

pub struct InstanceSelector {
    config: SelectionConfig,
}

impl InstanceSelector {
    pub fn new(config: SelectionConfig) -> HrResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// Describe every stored instance in `ids` with `features` and select
    /// from them.
    pub fn select_from_store<P, F>(
        &self,
        store: &InstanceStore<P>,
        ids: &[String],
        features: F,
    ) -> HrResult<Selection>
    where
        P: Problem,
        F: Fn(&P::Instance) -> Vec<f64>,
    {
        let rows = ids
            .iter()
            .map(|id| Ok((id.clone(), features(&*store.get(id)?))))
            .collect::<HrResult<Vec<_>>>()?;
        self.select(&rows)
    }

    pub fn select(&self, rows: &[(String, Vec<f64>)]) -> HrResult<Selection> {
        let points = standardize(rows)?;
        let k = self.config.target_size(rows.len());
        if k == rows.len() {
            debug!("Selection keeps the whole pool of {} instances", k);
            return Ok(Selection {
                selected: rows.iter().map(|(id, _)| id.clone()).collect(),
                clusters: rows.iter().map(|(id, _)| vec![id.clone()]).collect(),
                iterations: 0,
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut centroids = seed_centroids(&points, k, &mut rng);
        let mut labels = assign(&points, &centroids);
        let mut iterations = 1;
        while iterations < self.config.max_iterations {
            centroids = update(&points, &labels, &centroids);
            let next = assign(&points, &centroids);
            iterations += 1;
            if next == labels {
                break;
            }
            labels = next;
        }

        let mut representatives = Vec::with_capacity(k);
        let mut clusters = Vec::with_capacity(k);
        for (cluster, centroid) in centroids.iter().enumerate() {
            let members: Vec<usize> = (0..points.len()).filter(|&i| labels[i] == cluster).collect();
            let Some(&closest) = members.iter().min_by(|&&a, &&b| {
                distance(&points[a], centroid).total_cmp(&distance(&points[b], centroid))
            }) else {
                continue;
            };
            representatives.push(closest);
            let mut ids = vec![rows[closest].0.clone()];
            ids.extend(members.iter().filter(|&&i| i != closest).map(|&i| rows[i].0.clone()));
            clusters.push(ids);
        }
        representatives.sort_unstable();

        info!(
            "Selected {} of {} instances after {} iterations",
            representatives.len(),
            rows.len(),
            iterations
        );
        Ok(Selection {
            selected: representatives.iter().map(|&i| rows[i].0.clone()).collect(),
            clusters,
            iterations,
        })
    }
}

/// Z-scores per feature; constant features become zero.
fn standardize(rows: &[(String, Vec<f64>)]) -> HrResult<Vec<Vec<f64>>> {
    let Some((_, first)) = rows.first() else {
        return Err(validation_error!("cannot select from an empty instance pool"));
    };
    let width = first.len();
    for (id, features) in rows {
        if features.len() != width {
            return Err(validation_error!(
                "instance {id} has {} features, expected {width}",
                features.len()
            ));
        }
        if features.iter().any(|f| !f.is_finite()) {
            return Err(validation_error!("instance {id} has a non-finite feature"));
        }
    }

    let n = rows.len() as f64;
    let mut points: Vec<Vec<f64>> = rows.iter().map(|(_, f)| f.clone()).collect();
    for j in 0..width {
        let mean = rows.iter().map(|(_, f)| f[j]).sum::<f64>() / n;
        let variance = rows.iter().map(|(_, f)| (f[j] - mean).powi(2)).sum::<f64>() / n;
        let sd = variance.sqrt();
        for point in &mut points {
            point[j] = if sd > 0.0 { (point[j] - mean) / sd } else { 0.0 };
        }
    }
    Ok(points)
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// k-means++: the first centroid uniformly, the rest proportional to the
/// squared distance to the nearest chosen one.
fn seed_centroids(points: &[Vec<f64>], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let mut centroids = vec![points[rng.gen_range(0..points.len())].clone()];
    while centroids.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| distance(p, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.gen_range(0.0..total);
            weights
                .iter()
                .position(|&w| {
                    target -= w;
                    target < 0.0
                })
                .unwrap_or(points.len() - 1)
        } else {
            // Every point already coincides with a centroid.
            rng.gen_range(0..points.len())
        };
        centroids.push(points[next].clone());
    }
    centroids
}

fn assign(points: &[Vec<f64>], centroids: &[Vec<f64>]) -> Vec<usize> {
    points
        .iter()
        .map(|p| {
            (0..centroids.len())
                .min_by(|&a, &b| distance(p, &centroids[a]).total_cmp(&distance(p, &centroids[b])))
                .unwrap_or(0)
        })
        .collect()
}

/// Cluster means; an empty cluster keeps its previous centroid.
fn update(points: &[Vec<f64>], labels: &[usize], previous: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let width = previous.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0; width]; previous.len()];
    let mut counts = vec![0usize; previous.len()];
    for (point, &label) in points.iter().zip(labels) {
        counts[label] += 1;
        for (sum, x) in sums[label].iter_mut().zip(point) {
            *sum += x;
        }
    }
    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), old)| {
            if count == 0 {
                old.clone()
            } else {
                sum.into_iter().map(|s| s / count as f64).collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use hr_types::HrError;

    /// Three tight groups of four instances each along one feature.
    fn pool() -> Vec<(String, Vec<f64>)> {
        let mut rows = Vec::new();
        for (group, centre) in [(0, 0.0), (1, 100.0), (2, 1000.0)] {
            for i in 0..4 {
                rows.push((format!("g{group}-{i}"), vec![centre + i as f64, 1.0]));
            }
        }
        rows
    }

    fn group(id: &str) -> &str {
        &id[..2]
    }

    #[test]
    fn one_representative_per_group() {
        let config = SelectionConfig::default().with_fraction(0.25).with_seed(3);
        let selector = InstanceSelector::new(config).unwrap();
        let selection = selector.select(&pool()).unwrap();
        assert_eq!(selection.selected.len(), 3);
        let groups: std::collections::BTreeSet<&str> =
            selection.selected.iter().map(|id| group(id)).collect();
        assert_eq!(groups.len(), 3);
        for cluster in &selection.clusters {
            assert_eq!(cluster.len(), 4);
            assert!(cluster.iter().all(|id| group(id) == group(&cluster[0])));
        }
    }

    #[test]
    fn same_seed_same_subset() {
        let rows: Vec<(String, Vec<f64>)> = (0..40)
            .map(|i| (format!("r{i}"), vec![(i * 37 % 11) as f64, (i * 13 % 7) as f64]))
            .collect();
        let config = SelectionConfig::default().with_fraction(0.2).with_seed(8);
        let a = InstanceSelector::new(config.clone()).unwrap().select(&rows).unwrap();
        let b = InstanceSelector::new(config).unwrap().select(&rows).unwrap();
        assert_eq!(a, b);
        assert!(a.selected.len() <= 8);
        assert!(!a.selected.is_empty());
    }

    #[test]
    fn size_follows_fraction_and_minimum() {
        let config = SelectionConfig::default().with_fraction(0.1);
        assert_eq!(config.target_size(25), 3);
        assert_eq!(config.clone().with_min_instances(5).target_size(25), 5);
        assert_eq!(config.with_min_instances(50).target_size(25), 25);

        let whole = InstanceSelector::new(SelectionConfig::default().with_fraction(1.0))
            .unwrap()
            .select(&pool())
            .unwrap();
        assert_eq!(whole.selected.len(), 12);
        assert_eq!(whole.selected[0], "g0-0");
    }

    #[test]
    fn bad_pools_and_configs_are_rejected() {
        let selector = InstanceSelector::new(SelectionConfig::default()).unwrap();
        assert!(matches!(selector.select(&[]), Err(HrError::Validation(_))));
        let ragged = vec![("a".to_string(), vec![1.0]), ("b".to_string(), vec![1.0, 2.0])];
        assert!(matches!(selector.select(&ragged), Err(HrError::Validation(_))));
        let nan = vec![("a".to_string(), vec![f64::NAN])];
        assert!(matches!(selector.select(&nan), Err(HrError::Validation(_))));

        assert!(matches!(
            InstanceSelector::new(SelectionConfig::default().with_fraction(0.0)),
            Err(HrError::Config(_))
        ));
    }

    #[test]
    fn selects_from_the_instance_store() {
        let selector = InstanceSelector::new(SelectionConfig::default().with_fraction(0.5)).unwrap();
        let store = fixtures::store();
        let selection = selector
            .select_from_store(&*store, &fixtures::instance_ids(), |instance: &Vec<i64>| {
                vec![instance.iter().sum::<i64>() as f64]
            })
            .unwrap();
        assert_eq!(selection.selected.len(), 2);
        // i2 sits far from the other two and always represents itself.
        assert!(selection.selected.contains(&"i2".to_string()));

        let missing = selector.select_from_store(&*store, &["nope".to_string()], |_: &Vec<i64>| vec![0.0]);
        assert!(missing.is_err());
    }
}
