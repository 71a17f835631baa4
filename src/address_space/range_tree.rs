//! An ordered index of disjoint address ranges.
//!
//! A height balanced (AVL) tree keyed on range start. Every node also
//! carries the maximum end address found in its subtree so that point and
//! overlap queries can prune whole subtrees.

use super::memory_range::MemoryRange;
use std::cmp::{max, Ordering};
use std::mem;

type Link<V> = Option<Box<Node<V>>>;

struct Node<V> {
    range: MemoryRange,
    value: V,
    /// Largest `range.end()` in this subtree.
    max_end: u64,
    height: i32,
    left: Link<V>,
    right: Link<V>,
}

impl<V> Node<V> {
    fn new(range: MemoryRange, value: V) -> Node<V> {
        Node {
            range,
            value,
            max_end: range.end(),
            height: 1,
            left: None,
            right: None,
        }
    }
}

pub struct RangeTree<V> {
    root: Link<V>,
    len: usize,
}

impl<V> Default for RangeTree<V> {
    fn default() -> Self {
        RangeTree::new()
    }
}

impl<V> RangeTree<V> {
    pub fn new() -> RangeTree<V> {
        RangeTree { root: None, len: 0 }
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

    /// Insert `value` at `range`. An entry starting at the same address is
    /// replaced and returned. Callers must not insert a range that overlaps
    /// some other entry.
    pub fn insert(&mut self, range: MemoryRange, value: V) -> Option<(MemoryRange, V)> {
        let mut replaced = None;
        self.root = Some(insert_node(self.root.take(), range, value, &mut replaced));
        if replaced.is_none() {
            self.len += 1;
        }
        replaced
    }

    /// Remove the entry starting exactly at `start`.
    pub fn remove(&mut self, start: u64) -> Option<(MemoryRange, V)> {
        let mut removed = None;
        self.root = remove_node(self.root.take(), start, &mut removed);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    pub fn get(&self, start: u64) -> Option<&V> {
        let mut cur = self.root.as_ref();
        while let Some(n) = cur {
            cur = match start.cmp(&n.range.start()) {
                Ordering::Less => n.left.as_ref(),
                Ordering::Greater => n.right.as_ref(),
                Ordering::Equal => return Some(&n.value),
            };
        }
        None
    }

    /// The entry whose range contains `addr`, if any.
    pub fn find_containing(&self, addr: u64) -> Option<(MemoryRange, &V)> {
        let mut cur = self.root.as_ref();
        while let Some(n) = cur {
            if n.range.contains_addr(addr) {
                return Some((n.range, &n.value));
            }
            cur = match &n.left {
                Some(l) if l.max_end > addr => Some(l),
                _ if addr < n.range.start() => None,
                _ => n.right.as_ref(),
            };
        }
        None
    }

    pub fn find_containing_mut(&mut self, addr: u64) -> Option<(MemoryRange, &mut V)> {
        let mut cur = self.root.as_mut();
        while let Some(n) = cur {
            if n.range.contains_addr(addr) {
                return Some((n.range, &mut n.value));
            }
            let go_left = matches!(&n.left, Some(l) if l.max_end > addr);
            cur = if go_left {
                n.left.as_mut()
            } else if addr < n.range.start() {
                None
            } else {
                n.right.as_mut()
            };
        }
        None
    }

    /// Ranges of all entries intersecting `range`, in address order.
    pub fn overlapping(&self, range: &MemoryRange) -> Vec<MemoryRange> {
        let mut out = Vec::new();
        collect_overlapping(&self.root, range, &mut out);
        out
    }

    pub fn iter(&self) -> Iter<'_, V> {
        let mut it = Iter { stack: Vec::new() };
        it.push_left(self.root.as_deref());
        it
    }

    #[cfg(test)]
    pub fn for_each_mut<F: FnMut(MemoryRange, &mut V)>(&mut self, mut f: F) {
        fn walk<V, F: FnMut(MemoryRange, &mut V)>(link: &mut Link<V>, f: &mut F) {
            if let Some(n) = link {
                walk(&mut n.left, f);
                f(n.range, &mut n.value);
                walk(&mut n.right, f);
            }
        }
        walk(&mut self.root, &mut f);
    }

    #[cfg(test)]
    fn height(&self) -> i32 {
        height(&self.root)
    }
}

pub struct Iter<'a, V> {
    stack: Vec<&'a Node<V>>,
}

impl<'a, V> Iter<'a, V> {
    fn push_left(&mut self, mut node: Option<&'a Node<V>>) {
        while let Some(n) = node {
            self.stack.push(n);
            node = n.left.as_deref();
        }
    }
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (MemoryRange, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.stack.pop()?;
        self.push_left(n.right.as_deref());
        Some((n.range, &n.value))
    }
}

fn height<V>(link: &Link<V>) -> i32 {
    link.as_ref().map_or(0, |n| n.height)
}

fn max_end<V>(link: &Link<V>) -> u64 {
    link.as_ref().map_or(0, |n| n.max_end)
}

fn update<V>(node: &mut Node<V>) {
    node.height = 1 + max(height(&node.left), height(&node.right));
    node.max_end = max(node.range.end(), max(max_end(&node.left), max_end(&node.right)));
}

fn balance_factor<V>(node: &Node<V>) -> i32 {
    height(&node.left) - height(&node.right)
}

fn rotate_right<V>(mut node: Box<Node<V>>) -> Box<Node<V>> {
    let mut pivot = match node.left.take() {
        Some(p) => p,
        None => return node,
    };
    node.left = pivot.right.take();
    update(&mut node);
    pivot.right = Some(node);
    update(&mut pivot);
    pivot
}

fn rotate_left<V>(mut node: Box<Node<V>>) -> Box<Node<V>> {
    let mut pivot = match node.right.take() {
        Some(p) => p,
        None => return node,
    };
    node.right = pivot.left.take();
    update(&mut node);
    pivot.left = Some(node);
    update(&mut pivot);
    pivot
}

fn rebalance<V>(mut node: Box<Node<V>>) -> Box<Node<V>> {
    update(&mut node);
    let bf = balance_factor(&node);
    if bf > 1 {
        if let Some(left) = node.left.take() {
            node.left = Some(if balance_factor(&left) < 0 {
                rotate_left(left)
            } else {
                left
            });
        }
        return rotate_right(node);
    }
    if bf < -1 {
        if let Some(right) = node.right.take() {
            node.right = Some(if balance_factor(&right) > 0 {
                rotate_right(right)
            } else {
                right
            });
        }
        return rotate_left(node);
    }
    node
}

fn insert_node<V>(
    link: Link<V>,
    range: MemoryRange,
    value: V,
    replaced: &mut Option<(MemoryRange, V)>,
) -> Box<Node<V>> {
    match link {
        None => Box::new(Node::new(range, value)),
        Some(mut node) => {
            match range.start().cmp(&node.range.start()) {
                Ordering::Less => {
                    node.left = Some(insert_node(node.left.take(), range, value, replaced))
                }
                Ordering::Greater => {
                    node.right = Some(insert_node(node.right.take(), range, value, replaced))
                }
                Ordering::Equal => {
                    let old_range = mem::replace(&mut node.range, range);
                    let old_value = mem::replace(&mut node.value, value);
                    *replaced = Some((old_range, old_value));
                }
            }
            rebalance(node)
        }
    }
}

/// Detach the leftmost node of the subtree. Returns the remaining subtree
/// and the detached node.
fn remove_min<V>(mut node: Box<Node<V>>) -> (Link<V>, Box<Node<V>>) {
    match node.left.take() {
        None => {
            let right = node.right.take();
            (right, node)
        }
        Some(left) => {
            let (new_left, min) = remove_min(left);
            node.left = new_left;
            (Some(rebalance(node)), min)
        }
    }
}

fn remove_node<V>(link: Link<V>, start: u64, removed: &mut Option<(MemoryRange, V)>) -> Link<V> {
    let mut node = link?;
    match start.cmp(&node.range.start()) {
        Ordering::Less => node.left = remove_node(node.left.take(), start, removed),
        Ordering::Greater => node.right = remove_node(node.right.take(), start, removed),
        Ordering::Equal => {
            let Node {
                range,
                value,
                left,
                right,
                ..
            } = *node;
            *removed = Some((range, value));
            return match (left, right) {
                (None, None) => None,
                (Some(l), None) => Some(l),
                (None, Some(r)) => Some(r),
                (Some(l), Some(r)) => {
                    let (new_right, mut min) = remove_min(r);
                    min.left = Some(l);
                    min.right = new_right;
                    Some(rebalance(min))
                }
            };
        }
    }
    Some(rebalance(node))
}

fn collect_overlapping<V>(link: &Link<V>, range: &MemoryRange, out: &mut Vec<MemoryRange>) {
    let n = match link {
        Some(n) if n.max_end > range.start() => n,
        _ => return,
    };
    collect_overlapping(&n.left, range, out);
    if n.range.intersects(range) {
        out.push(n.range);
    }
    if n.range.start() < range.end() {
        collect_overlapping(&n.right, range, out);
    }
}
