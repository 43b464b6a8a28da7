use std::cmp;

#[cfg(feature = "serde_support")]
use serde::{Deserialize, Serialize};

/// A cluster of observations merged at a single point.
///
/// A centroid carries the weighted mean of everything it has absorbed and
/// the total weight absorbed. When the owning digest records all data, the
/// raw observations ride along in `samples`; they are diagnostic freight and
/// never feed back into the algorithm.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct Centroid {
    mean: f64,
    count: u64,
    id: u64,
    samples: Option<Vec<f64>>,
}

impl Centroid {
    /// The weighted mean of the observations this centroid has absorbed.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Total weight absorbed.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Tiebreaker for centroids with equal means.
    ///
    /// Ids are unique within a digest and stable for the centroid's
    /// lifetime. Zero is reserved for transient search probes, which
    /// therefore sort before any real centroid with the same mean.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The raw observations recorded into this centroid, present only when
    /// the owning digest records all data.
    pub fn samples(&self) -> Option<&[f64]> {
        self.samples.as_deref()
    }

    pub(crate) fn new(mean: f64, count: u64, id: u64, samples: Option<Vec<f64>>) -> Centroid {
        Centroid {
            mean,
            count,
            id,
            samples,
        }
    }

    /// A transient search key that sorts just before any real centroid with
    /// the same mean.
    pub(crate) fn probe(mean: f64) -> Centroid {
        Centroid {
            mean,
            count: 0,
            id: 0,
            samples: None,
        }
    }

    /// A lookup key for a live centroid. Only `mean` and `id` participate in
    /// ordering, so the key compares equal to the centroid it names.
    pub(crate) fn key(mean: f64, id: u64) -> Centroid {
        Centroid {
            mean,
            count: 0,
            id,
            samples: None,
        }
    }

    /// Fold an observation of weight `w` into this centroid, shifting the
    /// mean toward `x`. `data` is appended to the sample list when both
    /// sides are recording.
    pub(crate) fn add(&mut self, x: f64, w: u64, data: Option<Vec<f64>>) {
        let merged = self.count + w;
        self.mean = (self.mean * self.count as f64 + x * w as f64) / merged as f64;
        self.count = merged;
        if let (Some(samples), Some(mut more)) = (self.samples.as_mut(), data) {
            samples.append(&mut more);
        }
    }

    pub(crate) fn into_parts(self) -> (f64, u64, Option<Vec<f64>>) {
        (self.mean, self.count, self.samples)
    }
}

// The derived equality would be wrong here: weight and samples never
// participate in ordering. Means inside a digest are finite, so total_cmp
// agrees with the numeric order.
impl PartialEq for Centroid {
    fn eq(&self, other: &Centroid) -> bool {
        self.cmp(other) == cmp::Ordering::Equal
    }
}

impl Eq for Centroid {}

impl PartialOrd for Centroid {
    fn partial_cmp(&self, other: &Centroid) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Centroid {
    fn cmp(&self, other: &Centroid) -> cmp::Ordering {
        self.mean
            .total_cmp(&other.mean)
            .then_with(|| self.id.cmp(&other.id))
    }
}
