// src/core/interval_tree.rs

//! An interval tree supporting stabbing queries over possibly-overlapping
//! closed ranges.
//!
//! Implemented as a treap ordered by `(lo, hi)` and augmented with the
//! maximum `hi` of each subtree, giving expected `O(log n)` insert/remove
//! and `O(log n + k)` stab.  Duplicate intervals are permitted; removal
//! requires value equality so callers can disambiguate them.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;

struct Node<K, V> {
    lo: K,
    hi: K,
    max_hi: K,
    heap: u64,
    value: V,
    left: Option<Box<Node<K, V>>>,
    right: Option<Box<Node<K, V>>>,
}

pub struct IntervalTree<K, V> {
    root: Option<Box<Node<K, V>>>,
    len: usize,
    rng: SmallRng,
}

impl<K: Ord + Clone, V: PartialEq> Default for IntervalTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V: PartialEq> IntervalTree<K, V> {
    pub fn new() -> Self {
        Self {
            root: None,
            len: 0,
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.len = 0;
    }

    /// Inserts a closed interval `[lo, hi]`.  The caller guarantees
    /// `lo <= hi`.
    pub fn insert(&mut self, lo: K, hi: K, value: V) {
        debug_assert!(lo <= hi);
        let node = Box::new(Node {
            max_hi: hi.clone(),
            lo,
            hi,
            heap: self.rng.r#gen(),
            value,
            left: None,
            right: None,
        });
        self.root = Some(insert_node(self.root.take(), node));
        self.len += 1;
    }

    /// Removes one entry matching the interval and value exactly.
    /// Returns true if an entry was removed.
    pub fn remove(&mut self, lo: &K, hi: &K, value: &V) -> bool {
        let mut removed = false;
        self.root = remove_node(self.root.take(), lo, hi, value, &mut removed);
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Returns every value whose interval contains `point`, in key order.
    pub fn stab(&self, point: &K) -> Vec<&V> {
        let mut out = Vec::new();
        stab_node(&self.root, point, &mut out);
        out
    }

    /// All entries in `(lo, hi)` key order.
    pub fn entries(&self) -> Vec<(&K, &K, &V)> {
        let mut out = Vec::with_capacity(self.len);
        collect(&self.root, &mut out);
        out
    }
}

fn update<K: Ord + Clone, V>(node: &mut Box<Node<K, V>>) {
    let mut max_hi = node.hi.clone();
    if let Some(l) = &node.left
        && l.max_hi > max_hi
    {
        max_hi = l.max_hi.clone();
    }
    if let Some(r) = &node.right
        && r.max_hi > max_hi
    {
        max_hi = r.max_hi.clone();
    }
    node.max_hi = max_hi;
}

fn rotate_right<K: Ord + Clone, V>(mut node: Box<Node<K, V>>) -> Box<Node<K, V>> {
    let mut l = node.left.take().expect("rotate_right without left child");
    node.left = l.right.take();
    update(&mut node);
    l.right = Some(node);
    update(&mut l);
    l
}

fn rotate_left<K: Ord + Clone, V>(mut node: Box<Node<K, V>>) -> Box<Node<K, V>> {
    let mut r = node.right.take().expect("rotate_left without right child");
    node.right = r.left.take();
    update(&mut node);
    r.left = Some(node);
    update(&mut r);
    r
}

fn interval_cmp<K: Ord>(a_lo: &K, a_hi: &K, b_lo: &K, b_hi: &K) -> Ordering {
    a_lo.cmp(b_lo).then_with(|| a_hi.cmp(b_hi))
}

fn insert_node<K: Ord + Clone, V>(
    node: Option<Box<Node<K, V>>>,
    new: Box<Node<K, V>>,
) -> Box<Node<K, V>> {
    let Some(mut n) = node else {
        return new;
    };
    if interval_cmp(&new.lo, &new.hi, &n.lo, &n.hi) == Ordering::Less {
        n.left = Some(insert_node(n.left.take(), new));
        update(&mut n);
        if n.left.as_ref().is_some_and(|l| l.heap > n.heap) {
            n = rotate_right(n);
        }
    } else {
        n.right = Some(insert_node(n.right.take(), new));
        update(&mut n);
        if n.right.as_ref().is_some_and(|r| r.heap > n.heap) {
            n = rotate_left(n);
        }
    }
    n
}

/// Detaches the root of a subtree, merging its children by heap priority.
fn delete_root<K: Ord + Clone, V>(mut n: Box<Node<K, V>>) -> Option<Box<Node<K, V>>> {
    match (n.left.take(), n.right.take()) {
        (None, right) => right,
        (left, None) => left,
        (Some(l), Some(r)) => {
            let left_up = l.heap > r.heap;
            n.left = Some(l);
            n.right = Some(r);
            if left_up {
                let mut top = rotate_right(n);
                top.right = delete_root(top.right.take().expect("rotated node"));
                update(&mut top);
                Some(top)
            } else {
                let mut top = rotate_left(n);
                top.left = delete_root(top.left.take().expect("rotated node"));
                update(&mut top);
                Some(top)
            }
        }
    }
}

fn remove_node<K: Ord + Clone, V: PartialEq>(
    node: Option<Box<Node<K, V>>>,
    lo: &K,
    hi: &K,
    value: &V,
    removed: &mut bool,
) -> Option<Box<Node<K, V>>> {
    let mut n = node?;
    match interval_cmp(lo, hi, &n.lo, &n.hi) {
        Ordering::Less => {
            n.left = remove_node(n.left.take(), lo, hi, value, removed);
        }
        Ordering::Greater => {
            n.right = remove_node(n.right.take(), lo, hi, value, removed);
        }
        Ordering::Equal => {
            if n.value == *value {
                *removed = true;
                return delete_root(n);
            }
            // Duplicate intervals with different values live to the right.
            n.right = remove_node(n.right.take(), lo, hi, value, removed);
        }
    }
    update(&mut n);
    Some(n)
}

fn stab_node<'a, K: Ord, V>(node: &'a Option<Box<Node<K, V>>>, point: &K, out: &mut Vec<&'a V>) {
    let Some(n) = node else {
        return;
    };
    if n.left.as_ref().is_some_and(|l| l.max_hi >= *point) {
        stab_node(&n.left, point, out);
    }
    if n.lo <= *point && *point <= n.hi {
        out.push(&n.value);
    }
    if n.lo <= *point {
        stab_node(&n.right, point, out);
    }
}

fn collect<'a, K, V>(node: &'a Option<Box<Node<K, V>>>, out: &mut Vec<(&'a K, &'a K, &'a V)>) {
    if let Some(n) = node {
        collect(&n.left, out);
        out.push((&n.lo, &n.hi, &n.value));
        collect(&n.right, out);
    }
}
