//! An adaptive t-digest over a stream of real-valued observations.
//!
//! The digest summarizes a distribution with a bounded collection of
//! weighted centroids and answers two queries at any point in the stream:
//! the approximate CDF `Pr[X <= x]` and its inverse `quantile(q)`. The
//! algorithm is from Dunning and Ertl, "Computing Extremely Accurate
//! Quantiles Using t-Digests": each centroid's weight is capped by
//! `4 * n * q * (1 - q) / compression`, where q is its rank fraction, so
//! centroids near the tails stay tiny while the middle of the distribution
//! merges aggressively. That is what buys part-per-million accuracy at
//! extreme quantiles for O(compression) space.
//!
//! Centroids live in an order-statistics tree so that each insertion pays
//! O(log n) to find its nearest neighbors and their rank fractions. The
//! update rule is sensitive to insertion order: sorted input keeps splitting
//! where it should merge. When the summary grows past `100 * compression`
//! centroids the digest replays them in random order, which restores
//! near-optimal packing.

mod centroid;
mod codec;
mod tree;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::Error;

pub use self::centroid::Centroid;
pub use self::codec::{SMALL_ENCODING, VERBOSE_ENCODING};
pub use self::tree::Centroids;

use self::tree::CentroidTree;

/// An adaptive quantile sketch with strong accuracy at the tails.
///
/// A digest is a single-writer object: neither mutation nor queries may run
/// concurrently with a mutation. Every randomized decision draws from the
/// RNG owned by the digest, so a digest built with
/// [`with_seed`](TreeDigest::with_seed) behaves reproducibly.
///
/// # Examples
/// ```
/// use treedigest::TreeDigest;
///
/// let mut digest = TreeDigest::with_seed(100.0, 42).unwrap();
/// for i in 0..1_000 {
///     digest.add(f64::from(i) / 1_000.0, 1).unwrap();
/// }
/// let p99 = digest.quantile(0.99).unwrap();
/// assert!((p99 - 0.99).abs() < 0.01);
/// ```
#[derive(Clone, Debug)]
pub struct TreeDigest {
    compression: f64,
    summary: CentroidTree,
    total: u64,
    next_id: u64,
    record_all: bool,
    rng: SmallRng,
}

impl TreeDigest {
    /// Create an empty digest.
    ///
    /// `compression` trades accuracy for size: a value of N gives quantile
    /// errors almost always below 3/N, with considerably smaller errors at
    /// the extremes, and tracks about 5N centroids to do it. Fails with
    /// [`Error::InvalidInput`] unless `compression` is positive.
    pub fn new(compression: f64) -> Result<TreeDigest, Error> {
        TreeDigest::with_rng(compression, SmallRng::from_entropy())
    }

    /// Create an empty digest whose randomized decisions are reproducible
    /// from `seed`.
    pub fn with_seed(compression: f64, seed: u64) -> Result<TreeDigest, Error> {
        TreeDigest::with_rng(compression, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(compression: f64, rng: SmallRng) -> Result<TreeDigest, Error> {
        if !(compression > 0.0) {
            return Err(Error::InvalidInput("compression must be positive"));
        }
        Ok(TreeDigest {
            compression,
            summary: CentroidTree::new(),
            total: 0,
            next_id: 1,
            record_all: false,
            rng,
        })
    }

    /// Keep the raw observations contributing to each centroid.
    ///
    /// Purely diagnostic: the recorded samples never feed back into the
    /// algorithm. Only observations added after this call are kept.
    ///
    /// # Examples
    /// ```
    /// use treedigest::TreeDigest;
    ///
    /// let mut digest = TreeDigest::with_seed(100.0, 1).unwrap().record_all_data();
    /// digest.add(3.0, 1).unwrap();
    /// let recorded: usize = digest
    ///     .centroids()
    ///     .map(|c| c.samples().map_or(0, <[f64]>::len))
    ///     .sum();
    /// assert_eq!(recorded, 1);
    /// ```
    pub fn record_all_data(mut self) -> TreeDigest {
        self.record_all = true;
        self
    }

    /// Whether this digest keeps raw samples on its centroids.
    pub fn is_recording(&self) -> bool {
        self.record_all
    }

    /// Incorporate an observation of weight `w`.
    ///
    /// Any finite `x` is accepted; NaN and the infinities fail with
    /// [`Error::InvalidInput`], as does a zero weight.
    ///
    /// # Examples
    /// ```
    /// use treedigest::TreeDigest;
    ///
    /// let mut digest = TreeDigest::with_seed(100.0, 7).unwrap();
    /// digest.add(5.0, 1).unwrap();
    /// digest.add(5.0, 3).unwrap();
    /// assert_eq!(digest.size(), 4);
    /// assert!(digest.add(f64::NAN, 1).is_err());
    /// ```
    pub fn add(&mut self, x: f64, w: u64) -> Result<(), Error> {
        if !x.is_finite() {
            return Err(Error::InvalidInput("observation must be finite"));
        }
        if w == 0 {
            return Err(Error::InvalidInput("weight must be positive"));
        }
        let data = if self.record_all { Some(vec![x]) } else { None };
        self.insert_weighted(x, w, data);
        Ok(())
    }

    /// The update rule. `data` is the raw-sample freight travelling with the
    /// observation: the observation itself for a fresh add, the accumulated
    /// samples of a replayed centroid during compression and merge.
    fn insert_weighted(&mut self, x: f64, w: u64, data: Option<Vec<f64>>) {
        let probe = Centroid::probe(x);
        let start = match self
            .summary
            .floor(&probe)
            .or_else(|| self.summary.ceiling(&probe))
        {
            Some(near) => Centroid::key(near.mean(), near.id()),
            None => {
                let centroid = self.new_centroid(x, w, data);
                self.summary.insert(centroid);
                self.total = w;
                return;
            }
        };

        // Distance to x is V-shaped along the sorted means, so scan forward
        // until it strictly increases. Ties at the minimum widen the
        // candidate pool; `last_neighbor` marks the final tied position. A
        // floor sitting exactly at x still lets the scan reach the next
        // centroids at the same distance.
        let start_position = self.summary.head_count(&start);
        let mut min_distance = f64::MAX;
        let mut last_neighbor = start_position;
        for (offset, neighbor) in self.summary.iter_from(&start).enumerate() {
            let distance = (neighbor.mean() - x).abs();
            if distance <= min_distance {
                min_distance = distance;
                last_neighbor = start_position + offset;
            } else {
                break;
            }
        }

        // Among the tied nearest neighbors, the ones still under their size
        // bound are candidates; keep one uniformly at random. The selection
        // matters with lots of repeated points, where always picking the
        // first copy would skew the packing.
        let total = self.total as f64;
        let mut sum = self.summary.head_sum(&start) as f64;
        let mut chosen: Option<Centroid> = None;
        let mut candidates = 1.0;
        for (offset, neighbor) in self.summary.iter_from(&start).enumerate() {
            if start_position + offset > last_neighbor {
                break;
            }
            let distance = (neighbor.mean() - x).abs();
            let q = (sum + neighbor.count() as f64 / 2.0) / total;
            let bound = 4.0 * total * q * (1.0 - q) / self.compression;
            if distance == min_distance && (neighbor.count() + w) as f64 <= bound {
                if self.rng.gen::<f64>() < 1.0 / candidates {
                    chosen = Some(Centroid::key(neighbor.mean(), neighbor.id()));
                }
                candidates += 1.0;
            }
            sum += neighbor.count() as f64;
        }

        match chosen {
            None => {
                let centroid = self.new_centroid(x, w, data);
                self.summary.insert(centroid);
            }
            Some(key) => {
                // the updated mean can change the sort position, so the
                // winner comes out of the tree before it absorbs the point
                let mut winner = match self.summary.remove(&key) {
                    Some(centroid) => centroid,
                    None => unreachable!("chosen centroid vanished from the index"),
                };
                winner.add(x, w, data);
                self.summary.insert(winner);
            }
        }
        self.total += w;

        if self.summary.len() as f64 > 100.0 * self.compression {
            self.compress();
        }
    }

    fn new_centroid(&mut self, x: f64, w: u64, data: Option<Vec<f64>>) -> Centroid {
        let id = self.next_id;
        self.next_id += 1;
        let samples = if self.record_all {
            Some(data.unwrap_or_default())
        } else {
            None
        };
        Centroid::new(x, w, id, samples)
    }

    /// Rebuild the summary by re-inserting every centroid in random order.
    ///
    /// Replaying in random order re-packs a summary inflated by sequential
    /// input; queries before and after agree to within the digest's
    /// accuracy. Replayed centroids receive fresh ids.
    pub fn compress(&mut self) {
        let mut snapshot: Vec<Centroid> = self.summary.iter().cloned().collect();
        snapshot.shuffle(&mut self.rng);
        self.summary = CentroidTree::new();
        self.total = 0;
        for centroid in snapshot {
            let (mean, count, samples) = centroid.into_parts();
            self.insert_weighted(mean, count, samples);
        }
    }

    /// Combine several digests into a new one at the given compression.
    ///
    /// Centroids from every input are shuffled with the supplied RNG and
    /// replayed through the update rule, so the result is a statistically
    /// equivalent summary of the union stream rather than a bitwise
    /// combination. The output records raw samples if any input did, and
    /// replayed sample lists travel wholesale with their centroid.
    ///
    /// # Examples
    /// ```
    /// use rand::rngs::SmallRng;
    /// use rand::SeedableRng;
    /// use treedigest::TreeDigest;
    ///
    /// let mut left = TreeDigest::with_seed(100.0, 1).unwrap();
    /// let mut right = TreeDigest::with_seed(100.0, 2).unwrap();
    /// for i in 0..500 {
    ///     left.add(f64::from(i), 1).unwrap();
    ///     right.add(f64::from(i + 500), 1).unwrap();
    /// }
    ///
    /// let mut rng = SmallRng::seed_from_u64(3);
    /// let merged = TreeDigest::merge(100.0, &[left, right], &mut rng).unwrap();
    /// assert_eq!(merged.size(), 1_000);
    /// ```
    pub fn merge<R: Rng>(
        compression: f64,
        digests: &[TreeDigest],
        rng: &mut R,
    ) -> Result<TreeDigest, Error> {
        let mut centroids: Vec<Centroid> = digests
            .iter()
            .flat_map(|digest| digest.summary.iter().cloned())
            .collect();
        centroids.shuffle(rng);

        let mut merged = TreeDigest::with_seed(compression, rng.gen())?;
        if digests.iter().any(TreeDigest::is_recording) {
            merged = merged.record_all_data();
        }
        for centroid in centroids {
            let (mean, count, samples) = centroid.into_parts();
            merged.insert_weighted(mean, count, samples);
        }
        Ok(merged)
    }

    /// Number of samples represented, i.e. the sum of centroid counts.
    pub fn size(&self) -> u64 {
        self.total
    }

    /// Number of centroids currently in the summary.
    pub fn centroid_count(&self) -> usize {
        self.summary.len()
    }

    /// The centroids in `(mean, id)` order.
    pub fn centroids(&self) -> Centroids<'_> {
        self.summary.iter()
    }

    /// The compression parameter this digest was built with.
    pub fn compression(&self) -> f64 {
        self.compression
    }

    /// Approximate fraction of all samples at or below `x`.
    ///
    /// Returns NaN for an empty digest and a step function for a single
    /// centroid. Otherwise the estimate interpolates linearly across
    /// centroid intervals whose half-widths are half the gaps between
    /// neighboring means, with the last interval mirrored symmetrically.
    ///
    /// # Examples
    /// ```
    /// use treedigest::TreeDigest;
    ///
    /// let mut digest = TreeDigest::with_seed(100.0, 11).unwrap();
    /// digest.add(5.0, 1).unwrap();
    /// assert_eq!(digest.cdf(4.9), 0.0);
    /// assert_eq!(digest.cdf(5.0), 1.0);
    /// ```
    pub fn cdf(&self, x: f64) -> f64 {
        if self.summary.is_empty() {
            return f64::NAN;
        }
        if self.summary.len() == 1 {
            return match self.summary.first() {
                Some(only) if x < only.mean() => 0.0,
                _ => 1.0,
            };
        }

        let total = self.total as f64;
        let mut it = self.summary.iter();
        let (mut a, mut b) = match (it.next(), it.next()) {
            (Some(a), Some(b)) => (a, b),
            _ => unreachable!("summary reported at least two centroids"),
        };

        let mut preceding = 0.0;
        let mut left = (b.mean() - a.mean()) / 2.0;
        let mut right = left;
        loop {
            if x < a.mean() + right {
                return (preceding + a.count() as f64 * interpolate(x, a.mean() - left, a.mean() + right))
                    / total;
            }
            preceding += a.count() as f64;
            a = b;
            match it.next() {
                Some(next) => {
                    b = next;
                    left = right;
                    right = (b.mean() - a.mean()) / 2.0;
                }
                None => {
                    // last interval: mirror the left width to the right
                    left = right;
                    break;
                }
            }
        }
        if x < a.mean() + right {
            (preceding + a.count() as f64 * interpolate(x, a.mean() - left, a.mean() + right)) / total
        } else {
            1.0
        }
    }

    /// Approximate quantile: the value below which roughly a fraction `q`
    /// of the samples fall.
    ///
    /// Fails with [`Error::InvalidInput`] when `q` lies outside [0, 1] or
    /// the digest holds fewer than two centroids.
    ///
    /// # Examples
    /// ```
    /// use treedigest::TreeDigest;
    ///
    /// let mut digest = TreeDigest::with_seed(100.0, 13).unwrap();
    /// digest.add(0.0, 1).unwrap();
    /// digest.add(10.0, 1).unwrap();
    /// assert_eq!(digest.quantile(0.25).unwrap(), 0.0);
    /// assert_eq!(digest.quantile(0.75).unwrap(), 10.0);
    /// ```
    pub fn quantile(&self, q: f64) -> Result<f64, Error> {
        if !(0.0..=1.0).contains(&q) {
            return Err(Error::InvalidInput("quantile must lie in [0, 1]"));
        }
        if self.summary.len() < 2 {
            return Err(Error::InvalidInput("quantile needs at least two centroids"));
        }

        let mut it = self.summary.iter();
        let (mut a, mut b) = match (it.next(), it.next()) {
            (Some(a), Some(b)) => (a, b),
            _ => unreachable!("summary reported at least two centroids"),
        };

        if self.summary.len() == 2 {
            // both centroids are lone clusters; closed form
            let diff = (b.mean() - a.mean()) / 2.0;
            return Ok(if q > 0.75 {
                b.mean() + diff * (4.0 * q - 3.0)
            } else {
                a.mean() + diff * (4.0 * q - 1.0)
            });
        }

        let target = q * self.total as f64;
        let mut right = (b.mean() - a.mean()) / 2.0;
        // nothing to the left of the first centroid, so hang the same width
        // on both of its sides
        let mut left = right;

        let head = a.count() as f64;
        if target <= head {
            return Ok(a.mean() + left * (2.0 * target - head) / head);
        }
        let mut below = head;
        loop {
            let mass = b.count() as f64;
            if below + mass / 2.0 >= target {
                // left of b's center
                return Ok(b.mean() - left * 2.0 * (target - below) / mass);
            }
            if below + mass >= target {
                // right of b's center, left of whatever comes next
                return Ok(b.mean() + right * 2.0 * (target - below - mass / 2.0) / mass);
            }
            below += mass;
            a = b;
            b = match it.next() {
                Some(next) => next,
                // target <= total weight puts it inside some centroid above;
                // reachable only through float slop
                None => return Ok(b.mean() + right),
            };
            left = right;
            right = (b.mean() - a.mean()) / 2.0;
        }
    }
}

impl Default for TreeDigest {
    /// A digest at the conventional compression of 100.
    fn default() -> TreeDigest {
        match TreeDigest::new(100.0) {
            Ok(digest) => digest,
            Err(_) => unreachable!(),
        }
    }
}

/// Position of `x` inside [x0, x1] as a fraction, pinned into [0, 1] so a
/// query below the lowest interval reports exactly zero mass.
fn interpolate(x: f64, x0: f64, x1: f64) -> f64 {
    ((x - x0) / (x1 - x0)).clamp(0.0, 1.0)
}
