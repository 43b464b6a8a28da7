//! The ordered centroid index.
//!
//! `CentroidTree` is an AVL tree over centroids ordered by `(mean, id)`,
//! with every node carrying the size and weight sum of its subtree. The
//! augmentation is what keeps the digest's update rule sub-linear: the rank
//! fraction of a neighbor needs the weight of everything before it, and
//! `head_count`/`head_sum` answer that by descending root-to-key and folding
//! in the left subtrees passed on the way, O(log n) like everything else
//! here.
//!
//! Nodes live in an arena and reference each other by index, so the whole
//! structure stays free of `unsafe`; removed slots go on a free list for
//! reuse.

use std::cmp::Ordering;

use super::centroid::Centroid;

const NIL: u32 = u32::MAX;

#[derive(Clone, Debug)]
struct Node {
    centroid: Centroid,
    left: u32,
    right: u32,
    height: u32,
    size: usize,
    weight: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct CentroidTree {
    nodes: Vec<Node>,
    free: Vec<u32>,
    root: u32,
}

impl CentroidTree {
    pub(crate) fn new() -> CentroidTree {
        CentroidTree {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NIL,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.size_of(self.root)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.root == NIL
    }

    pub(crate) fn first(&self) -> Option<&Centroid> {
        if self.root == NIL {
            return None;
        }
        let mut i = self.root;
        while self.node(i).left != NIL {
            i = self.node(i).left;
        }
        Some(&self.node(i).centroid)
    }

    pub(crate) fn insert(&mut self, centroid: Centroid) {
        let fresh = self.alloc(centroid);
        self.root = self.insert_at(self.root, fresh);
    }

    pub(crate) fn remove(&mut self, key: &Centroid) -> Option<Centroid> {
        let (root, removed) = self.remove_at(self.root, key);
        self.root = root;
        removed
    }

    /// Greatest centroid ordered at or before `key`.
    pub(crate) fn floor(&self, key: &Centroid) -> Option<&Centroid> {
        let mut i = self.root;
        let mut best = NIL;
        while i != NIL {
            let node = self.node(i);
            if node.centroid <= *key {
                best = i;
                i = node.right;
            } else {
                i = node.left;
            }
        }
        if best == NIL {
            None
        } else {
            Some(&self.node(best).centroid)
        }
    }

    /// Least centroid ordered at or after `key`.
    pub(crate) fn ceiling(&self, key: &Centroid) -> Option<&Centroid> {
        let mut i = self.root;
        let mut best = NIL;
        while i != NIL {
            let node = self.node(i);
            if node.centroid >= *key {
                best = i;
                i = node.left;
            } else {
                i = node.right;
            }
        }
        if best == NIL {
            None
        } else {
            Some(&self.node(best).centroid)
        }
    }

    /// Number of centroids strictly preceding `key`.
    pub(crate) fn head_count(&self, key: &Centroid) -> usize {
        let mut i = self.root;
        let mut preceding = 0;
        while i != NIL {
            let node = self.node(i);
            match node.centroid.cmp(key) {
                Ordering::Less => {
                    preceding += self.size_of(node.left) + 1;
                    i = node.right;
                }
                Ordering::Equal => {
                    preceding += self.size_of(node.left);
                    break;
                }
                Ordering::Greater => i = node.left,
            }
        }
        preceding
    }

    /// Sum of counts over centroids strictly preceding `key`.
    pub(crate) fn head_sum(&self, key: &Centroid) -> u64 {
        let mut i = self.root;
        let mut preceding = 0;
        while i != NIL {
            let node = self.node(i);
            match node.centroid.cmp(key) {
                Ordering::Less => {
                    preceding += self.weight_of(node.left) + node.centroid.count();
                    i = node.right;
                }
                Ordering::Equal => {
                    preceding += self.weight_of(node.left);
                    break;
                }
                Ordering::Greater => i = node.left,
            }
        }
        preceding
    }

    pub(crate) fn iter(&self) -> Centroids<'_> {
        let mut iter = Centroids {
            tree: self,
            stack: Vec::new(),
        };
        iter.push_left_spine(self.root);
        iter
    }

    /// Forward iterator over centroids ordered at or after `key`.
    pub(crate) fn iter_from(&self, key: &Centroid) -> Centroids<'_> {
        let mut stack = Vec::new();
        let mut i = self.root;
        while i != NIL {
            let node = self.node(i);
            if node.centroid >= *key {
                stack.push(i);
                i = node.left;
            } else {
                i = node.right;
            }
        }
        Centroids { tree: self, stack }
    }

    fn node(&self, i: u32) -> &Node {
        &self.nodes[i as usize]
    }

    fn node_mut(&mut self, i: u32) -> &mut Node {
        &mut self.nodes[i as usize]
    }

    fn alloc(&mut self, centroid: Centroid) -> u32 {
        let weight = centroid.count();
        let node = Node {
            centroid,
            left: NIL,
            right: NIL,
            height: 1,
            size: 1,
            weight,
        };
        match self.free.pop() {
            Some(i) => {
                self.nodes[i as usize] = node;
                i
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    /// Take the centroid out of slot `i` and put the slot up for reuse.
    fn release(&mut self, i: u32) -> Centroid {
        let centroid = std::mem::replace(&mut self.node_mut(i).centroid, Centroid::probe(0.0));
        self.free.push(i);
        centroid
    }

    fn height_of(&self, i: u32) -> u32 {
        if i == NIL {
            0
        } else {
            self.node(i).height
        }
    }

    fn size_of(&self, i: u32) -> usize {
        if i == NIL {
            0
        } else {
            self.node(i).size
        }
    }

    fn weight_of(&self, i: u32) -> u64 {
        if i == NIL {
            0
        } else {
            self.node(i).weight
        }
    }

    /// Refresh the aggregates on `i` from its children. Every structural
    /// change funnels through here, which is what keeps `head_count` and
    /// `head_sum` honest.
    fn update(&mut self, i: u32) {
        let (left, right) = {
            let node = self.node(i);
            (node.left, node.right)
        };
        let height = 1 + self.height_of(left).max(self.height_of(right));
        let size = 1 + self.size_of(left) + self.size_of(right);
        let weight = self.node(i).centroid.count() + self.weight_of(left) + self.weight_of(right);
        let node = self.node_mut(i);
        node.height = height;
        node.size = size;
        node.weight = weight;
    }

    fn balance_factor(&self, i: u32) -> i32 {
        self.height_of(self.node(i).left) as i32 - self.height_of(self.node(i).right) as i32
    }

    fn rotate_left(&mut self, i: u32) -> u32 {
        let pivot = self.node(i).right;
        let orphan = self.node(pivot).left;
        self.node_mut(i).right = orphan;
        self.node_mut(pivot).left = i;
        self.update(i);
        self.update(pivot);
        pivot
    }

    fn rotate_right(&mut self, i: u32) -> u32 {
        let pivot = self.node(i).left;
        let orphan = self.node(pivot).right;
        self.node_mut(i).left = orphan;
        self.node_mut(pivot).right = i;
        self.update(i);
        self.update(pivot);
        pivot
    }

    /// Restore the AVL balance of `i` after a child changed; returns the
    /// index now rooting the subtree.
    fn rebalance(&mut self, i: u32) -> u32 {
        self.update(i);
        let balance = self.balance_factor(i);
        if balance > 1 {
            let left = self.node(i).left;
            if self.balance_factor(left) < 0 {
                let rotated = self.rotate_left(left);
                self.node_mut(i).left = rotated;
            }
            self.rotate_right(i)
        } else if balance < -1 {
            let right = self.node(i).right;
            if self.balance_factor(right) > 0 {
                let rotated = self.rotate_right(right);
                self.node_mut(i).right = rotated;
            }
            self.rotate_left(i)
        } else {
            i
        }
    }

    fn insert_at(&mut self, i: u32, fresh: u32) -> u32 {
        if i == NIL {
            return fresh;
        }
        if self.node(fresh).centroid < self.node(i).centroid {
            let left = self.insert_at(self.node(i).left, fresh);
            self.node_mut(i).left = left;
        } else {
            let right = self.insert_at(self.node(i).right, fresh);
            self.node_mut(i).right = right;
        }
        self.rebalance(i)
    }

    fn remove_at(&mut self, i: u32, key: &Centroid) -> (u32, Option<Centroid>) {
        if i == NIL {
            return (NIL, None);
        }
        match key.cmp(&self.node(i).centroid) {
            Ordering::Less => {
                let (left, removed) = self.remove_at(self.node(i).left, key);
                if removed.is_none() {
                    return (i, None);
                }
                self.node_mut(i).left = left;
                (self.rebalance(i), removed)
            }
            Ordering::Greater => {
                let (right, removed) = self.remove_at(self.node(i).right, key);
                if removed.is_none() {
                    return (i, None);
                }
                self.node_mut(i).right = right;
                (self.rebalance(i), removed)
            }
            Ordering::Equal => {
                let (left, right) = {
                    let node = self.node(i);
                    (node.left, node.right)
                };
                if left == NIL || right == NIL {
                    let child = if left == NIL { right } else { left };
                    (child, Some(self.release(i)))
                } else {
                    // interior node: pull up the in-order successor
                    let (new_right, successor) = self.take_min(right);
                    self.node_mut(i).right = new_right;
                    let removed =
                        std::mem::replace(&mut self.node_mut(i).centroid, successor);
                    (self.rebalance(i), Some(removed))
                }
            }
        }
    }

    /// Detach the smallest centroid of the subtree at `i`; returns the new
    /// subtree root alongside it.
    fn take_min(&mut self, i: u32) -> (u32, Centroid) {
        let left = self.node(i).left;
        if left == NIL {
            let right = self.node(i).right;
            let centroid = self.release(i);
            return (right, centroid);
        }
        let (new_left, centroid) = self.take_min(left);
        self.node_mut(i).left = new_left;
        (self.rebalance(i), centroid)
    }
}

/// In-order iterator over a digest's centroids.
///
/// Yields centroids in `(mean, id)` order. The iterator borrows the digest;
/// it must be dropped before the next mutating call.
#[derive(Clone, Debug)]
pub struct Centroids<'a> {
    tree: &'a CentroidTree,
    stack: Vec<u32>,
}

impl<'a> Centroids<'a> {
    fn push_left_spine(&mut self, mut i: u32) {
        while i != NIL {
            self.stack.push(i);
            i = self.tree.node(i).left;
        }
    }
}

impl<'a> Iterator for Centroids<'a> {
    type Item = &'a Centroid;

    fn next(&mut self) -> Option<&'a Centroid> {
        let i = self.stack.pop()?;
        let tree = self.tree;
        let mut j = tree.node(i).right;
        while j != NIL {
            self.stack.push(j);
            j = tree.node(j).left;
        }
        Some(&tree.node(i).centroid)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck::{QuickCheck, TestResult};

    impl CentroidTree {
        fn check_invariants(&self) {
            self.check_at(self.root);
        }

        // (height, size, weight) of the subtree, verified bottom-up
        fn check_at(&self, i: u32) -> (u32, usize, u64) {
            if i == NIL {
                return (0, 0, 0);
            }
            let node = self.node(i);
            let (lh, ls, lw) = self.check_at(node.left);
            let (rh, rs, rw) = self.check_at(node.right);
            assert!((lh as i32 - rh as i32).abs() <= 1, "subtree out of balance");
            assert_eq!(node.height, 1 + lh.max(rh));
            assert_eq!(node.size, 1 + ls + rs);
            assert_eq!(node.weight, node.centroid.count() + lw + rw);
            if node.left != NIL {
                assert!(self.node(node.left).centroid < node.centroid);
            }
            if node.right != NIL {
                assert!(node.centroid < self.node(node.right).centroid);
            }
            (node.height, node.size, node.weight)
        }
    }

    // A sorted-Vec oracle the tree must agree with. Entries are
    // (mean, id, count) with ids assigned in insertion order.
    fn build(entries: &[(i16, u8)]) -> (CentroidTree, Vec<(f64, u64, u64)>) {
        let mut tree = CentroidTree::new();
        let mut model = Vec::new();
        for (position, &(mean, weight)) in entries.iter().enumerate() {
            let mean = f64::from(mean);
            let count = u64::from(weight % 16) + 1;
            let id = position as u64 + 1;
            tree.insert(Centroid::new(mean, count, id, None));
            model.push((mean, id, count));
        }
        model.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        (tree, model)
    }

    #[test]
    fn iteration_is_sorted_and_aggregates_hold() {
        fn inner(entries: Vec<(i16, u8)>) -> TestResult {
            let (tree, model) = build(&entries);
            tree.check_invariants();
            assert_eq!(tree.len(), model.len());

            let seen: Vec<(f64, u64, u64)> = tree
                .iter()
                .map(|c| (c.mean(), c.id(), c.count()))
                .collect();
            assert_eq!(seen, model);
            TestResult::passed()
        }
        QuickCheck::new().quickcheck(inner as fn(Vec<(i16, u8)>) -> TestResult);
    }

    #[test]
    fn head_queries_match_the_oracle() {
        fn inner(entries: Vec<(i16, u8)>) -> TestResult {
            let (tree, model) = build(&entries);
            for (rank, &(mean, id, _)) in model.iter().enumerate() {
                let key = Centroid::key(mean, id);
                assert_eq!(tree.head_count(&key), rank);
                let prefix: u64 = model[..rank].iter().map(|e| e.2).sum();
                assert_eq!(tree.head_sum(&key), prefix);
            }
            TestResult::passed()
        }
        QuickCheck::new().quickcheck(inner as fn(Vec<(i16, u8)>) -> TestResult);
    }

    #[test]
    fn probes_match_the_oracle() {
        fn inner(entries: Vec<(i16, u8)>, at: i16) -> TestResult {
            let (tree, model) = build(&entries);
            let probe = Centroid::probe(f64::from(at));

            let floor = model
                .iter()
                .filter(|&&(mean, _, _)| mean < f64::from(at))
                .last()
                .copied();
            assert_eq!(
                tree.floor(&probe).map(|c| (c.mean(), c.id(), c.count())),
                floor
            );

            let ceiling = model
                .iter()
                .find(|&&(mean, _, _)| mean >= f64::from(at))
                .copied();
            assert_eq!(
                tree.ceiling(&probe).map(|c| (c.mean(), c.id(), c.count())),
                ceiling
            );

            let preceding = model
                .iter()
                .filter(|&&(mean, _, _)| mean < f64::from(at))
                .count();
            assert_eq!(tree.head_count(&probe), preceding);
            TestResult::passed()
        }
        QuickCheck::new().quickcheck(inner as fn(Vec<(i16, u8)>, i16) -> TestResult);
    }

    #[test]
    fn tail_iteration_starts_at_the_key() {
        fn inner(entries: Vec<(i16, u8)>, at: i16) -> TestResult {
            let (tree, model) = build(&entries);
            let probe = Centroid::probe(f64::from(at));
            let tail: Vec<(f64, u64, u64)> = tree
                .iter_from(&probe)
                .map(|c| (c.mean(), c.id(), c.count()))
                .collect();
            let expected: Vec<(f64, u64, u64)> = model
                .iter()
                .filter(|&&(mean, _, _)| mean >= f64::from(at))
                .copied()
                .collect();
            assert_eq!(tail, expected);
            TestResult::passed()
        }
        QuickCheck::new().quickcheck(inner as fn(Vec<(i16, u8)>, i16) -> TestResult);
    }

    #[test]
    fn removal_keeps_the_tree_consistent() {
        fn inner(entries: Vec<(i16, u8)>, victims: Vec<u8>) -> TestResult {
            if entries.is_empty() {
                return TestResult::discard();
            }
            let (mut tree, mut model) = build(&entries);
            for victim in victims {
                if model.is_empty() {
                    break;
                }
                let (mean, id, count) = model.remove(victim as usize % model.len());
                let removed = tree.remove(&Centroid::key(mean, id));
                assert_eq!(
                    removed.map(|c| (c.mean(), c.id(), c.count())),
                    Some((mean, id, count))
                );
                tree.check_invariants();
            }
            let seen: Vec<(f64, u64, u64)> = tree
                .iter()
                .map(|c| (c.mean(), c.id(), c.count()))
                .collect();
            assert_eq!(seen, model);
            TestResult::passed()
        }
        QuickCheck::new().quickcheck(inner as fn(Vec<(i16, u8)>, Vec<u8>) -> TestResult);
    }

    #[test]
    fn removing_a_missing_key_is_a_no_op() {
        let (mut tree, model) = build(&[(1, 1), (2, 2), (3, 3)]);
        assert!(tree.remove(&Centroid::key(2.0, 99)).is_none());
        assert_eq!(tree.len(), model.len());
        tree.check_invariants();
    }

    #[test]
    fn first_is_the_smallest() {
        let (tree, model) = build(&[(5, 1), (-3, 1), (9, 1), (-3, 2)]);
        let first = tree.first().map(|c| (c.mean(), c.id()));
        assert_eq!(first, Some((model[0].0, model[0].1)));
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut tree = CentroidTree::new();
        for id in 1..=8u64 {
            tree.insert(Centroid::new(id as f64, 1, id, None));
        }
        for id in 1..=8u64 {
            assert!(tree.remove(&Centroid::key(id as f64, id)).is_some());
        }
        assert!(tree.is_empty());
        for id in 9..=16u64 {
            tree.insert(Centroid::new(id as f64, 1, id, None));
        }
        assert_eq!(tree.len(), 8);
        assert_eq!(tree.nodes.len(), 8);
        tree.check_invariants();
    }
}
