//! Top-down red-black tree over caller-ordered records.
//!
//! The tree never looks inside its records: every search, insertion and
//! removal takes a three-way comparison closure. Insertion and removal both
//! rebalance on the way down from a synthetic "false head" that stands in for
//! the parent of the root, so neither needs parent links nor a second,
//! bottom-up fix-up walk.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Not;

use crate::error::{AllocError, Result};

// =============================================================================
// Links, directions and colors
// =============================================================================

/// Index of a node slot in a [`NodeArena`].
///
/// Two values are reserved:
/// - `NULL`: the empty child link (always black)
/// - `HEAD`: the false head whose right child is the root
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Ptr(usize);

impl Ptr {
    const NULL: Ptr = Ptr(usize::MAX);
    const HEAD: Ptr = Ptr(usize::MAX - 1);

    #[inline]
    fn slot(idx: usize) -> Self {
        debug_assert!(idx < Self::HEAD.0);
        Self(idx)
    }

    #[inline]
    fn is_null(self) -> bool {
        self == Self::NULL
    }

    #[inline]
    fn idx(self) -> usize {
        debug_assert!(self != Self::NULL && self != Self::HEAD);
        self.0
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Dir {
    Left = 0,
    Right = 1,
}

impl Dir {
    #[inline]
    fn right_if(cond: bool) -> Self {
        if cond {
            Dir::Right
        } else {
            Dir::Left
        }
    }

    /// Direction to follow from a node whose record compared `ord` against
    /// the probe. Ties go right, toward the in-order successor.
    #[inline]
    fn descend(ord: Ordering) -> Self {
        Self::right_if(ord != Ordering::Greater)
    }
}

impl Not for Dir {
    type Output = Dir;

    #[inline]
    fn not(self) -> Dir {
        match self {
            Dir::Left => Dir::Right,
            Dir::Right => Dir::Left,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Color {
    Black,
    Red,
}

// =============================================================================
// Node arena
// =============================================================================

struct Node<T> {
    /// `None` only while the slot sits on the free list.
    record: Option<T>,
    color: Color,
    /// For a vacant slot, `children[Left]` links to the next vacant slot.
    children: [Ptr; 2],
}

/// Slot storage for tree nodes with an intrusive free list.
///
/// Growth goes through [`NodeArena::reserve`] so that running out of memory
/// is reported before an algorithm starts rewriting links. `alloc` itself
/// never grows the backing vector past its reserved capacity.
struct NodeArena<T> {
    slots: Vec<Node<T>>,
    free_head: Ptr,
    vacant: usize,
    /// Child links of the false head. `head[Right]` is the root.
    head: [Ptr; 2],
}

impl<T> NodeArena<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: Ptr::NULL,
            vacant: 0,
            head: [Ptr::NULL; 2],
        }
    }

    /// Number of slots holding a record.
    #[inline]
    fn live(&self) -> usize {
        self.slots.len() - self.vacant
    }

    /// Makes room for `additional` more nodes without reallocating later.
    fn reserve(&mut self, additional: usize) -> Result<()> {
        let missing = additional.saturating_sub(self.vacant);
        if missing == 0 {
            return Ok(());
        }
        self.slots
            .try_reserve(missing)
            .map_err(|err| AllocError::new(additional, err))
    }

    /// Links a fresh red node holding `record`. Capacity must be reserved.
    fn alloc(&mut self, record: T) -> Ptr {
        let node = Node {
            record: Some(record),
            color: Color::Red,
            children: [Ptr::NULL; 2],
        };

        if !self.free_head.is_null() {
            let ptr = self.free_head;
            self.free_head = self.slots[ptr.idx()].children[Dir::Left as usize];
            self.slots[ptr.idx()] = node;
            self.vacant -= 1;
            return ptr;
        }

        debug_assert!(self.slots.len() < self.slots.capacity());
        self.slots.push(node);
        Ptr::slot(self.slots.len() - 1)
    }

    /// Returns the slot to the free list and hands back its record.
    fn release(&mut self, ptr: Ptr) -> T {
        let next_free = self.free_head;
        let node = &mut self.slots[ptr.idx()];
        let record = node
            .record
            .take()
            .expect("linked node must hold a record");
        node.color = Color::Black;
        node.children = [next_free, Ptr::NULL];
        self.free_head = ptr;
        self.vacant += 1;
        record
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.free_head = Ptr::NULL;
        self.vacant = 0;
        self.head = [Ptr::NULL; 2];
    }

    #[inline]
    fn child(&self, ptr: Ptr, dir: Dir) -> Ptr {
        if ptr == Ptr::HEAD {
            self.head[dir as usize]
        } else {
            self.slots[ptr.idx()].children[dir as usize]
        }
    }

    #[inline]
    fn set_child(&mut self, ptr: Ptr, dir: Dir, child: Ptr) {
        if ptr == Ptr::HEAD {
            self.head[dir as usize] = child;
        } else {
            self.slots[ptr.idx()].children[dir as usize] = child;
        }
    }

    /// Color of a link; the empty link and the false head are black.
    #[inline]
    fn is_red(&self, ptr: Ptr) -> bool {
        !ptr.is_null() && ptr != Ptr::HEAD && self.slots[ptr.idx()].color == Color::Red
    }

    #[inline]
    fn color(&self, ptr: Ptr) -> Color {
        if self.is_red(ptr) {
            Color::Red
        } else {
            Color::Black
        }
    }

    #[inline]
    fn set_color(&mut self, ptr: Ptr, color: Color) {
        self.slots[ptr.idx()].color = color;
    }

    #[inline]
    fn record(&self, ptr: Ptr) -> &T {
        self.slots[ptr.idx()]
            .record
            .as_ref()
            .expect("linked node must hold a record")
    }

    #[inline]
    fn record_mut(&mut self, ptr: Ptr) -> &mut T {
        self.slots[ptr.idx()]
            .record
            .as_mut()
            .expect("linked node must hold a record")
    }

    fn replace_record(&mut self, ptr: Ptr, record: T) -> T {
        std::mem::replace(self.record_mut(ptr), record)
    }
}

// =============================================================================
// Tree
// =============================================================================

/// Result of [`RbTree::insert_by`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Insertion<T> {
    /// The record was linked into the tree.
    Inserted,
    /// An equal record was already stored. It was left in place and the
    /// rejected record is handed back.
    Duplicate(T),
}

impl<T> Insertion<T> {
    #[inline]
    pub fn is_inserted(&self) -> bool {
        matches!(self, Insertion::Inserted)
    }

    /// The record that was turned away, if any.
    pub fn into_rejected(self) -> Option<T> {
        match self {
            Insertion::Inserted => None,
            Insertion::Duplicate(record) => Some(record),
        }
    }
}

/// A red-black tree of records ordered by caller-supplied comparisons.
///
/// The comparison closures handed to one tree must agree on a single total
/// order for as long as the tree lives. The tree does not count its records;
/// [`RbTree::size`] walks the tree, and wrappers such as
/// [`RbMap`](crate::RbMap) keep their own count.
pub struct RbTree<T> {
    arena: NodeArena<T>,
}

impl<T> RbTree<T> {
    pub fn new() -> Self {
        Self {
            arena: NodeArena::new(),
        }
    }

    #[inline]
    fn root(&self) -> Ptr {
        self.arena.child(Ptr::HEAD, Dir::Right)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root().is_null()
    }

    fn blacken_root(&mut self) {
        let root = self.root();
        if !root.is_null() {
            self.arena.set_color(root, Color::Black);
        }
    }

    /// Rotates `node` toward `dir`, returning the subtree's new top.
    ///
    /// The demoted node turns red and the promoted one black.
    fn rotate_single(&mut self, node: Ptr, dir: Dir) -> Ptr {
        let save = self.arena.child(node, !dir);
        let inner = self.arena.child(save, dir);
        self.arena.set_child(node, !dir, inner);
        self.arena.set_child(save, dir, node);
        self.arena.set_color(node, Color::Red);
        self.arena.set_color(save, Color::Black);
        save
    }

    fn rotate_double(&mut self, node: Ptr, dir: Dir) -> Ptr {
        let child = self.arena.child(node, !dir);
        let top = self.rotate_single(child, !dir);
        self.arena.set_child(node, !dir, top);
        self.rotate_single(node, dir)
    }

    /// Inserts `record` unless an equal one is already present.
    ///
    /// `cmp(stored, record)` orders a stored record against the new one.
    /// Color flips and rotations happen on the way down, so the walk ends as
    /// soon as the new leaf is linked.
    pub fn insert_by<F>(&mut self, record: T, mut cmp: F) -> Result<Insertion<T>>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        self.arena.reserve(1)?;

        let mut pending = Some(record);

        // t: great-grandparent, g: grandparent, p: parent, q: current.
        let mut t = Ptr::HEAD;
        let mut g = Ptr::NULL;
        let mut p = Ptr::HEAD;
        let mut q = self.root();
        let mut dir = Dir::Right;
        let mut last = Dir::Right;

        loop {
            if q.is_null() {
                if let Some(record) = pending.take() {
                    q = self.arena.alloc(record);
                    self.arena.set_child(p, dir, q);
                }
            } else {
                let left = self.arena.child(q, Dir::Left);
                let right = self.arena.child(q, Dir::Right);
                if self.arena.is_red(left) && self.arena.is_red(right) {
                    self.arena.set_color(q, Color::Red);
                    self.arena.set_color(left, Color::Black);
                    self.arena.set_color(right, Color::Black);
                }
            }

            if self.arena.is_red(q) && self.arena.is_red(p) {
                // A red parent is never the root, so g is a real node below t.
                let dir2 = Dir::right_if(self.arena.child(t, Dir::Right) == g);
                let top = if q == self.arena.child(p, last) {
                    self.rotate_single(g, !last)
                } else {
                    self.rotate_double(g, !last)
                };
                self.arena.set_child(t, dir2, top);
            }

            let Some(record) = pending.as_ref() else {
                break;
            };
            let ord = cmp(self.arena.record(q), record);
            if ord == Ordering::Equal {
                break;
            }

            last = dir;
            dir = Dir::descend(ord);

            if !g.is_null() {
                t = g;
            }
            g = p;
            p = q;
            q = self.arena.child(q, dir);
        }

        self.blacken_root();

        Ok(match pending {
            None => Insertion::Inserted,
            Some(record) => Insertion::Duplicate(record),
        })
    }

    /// Removes the record comparing equal to `probe` and returns it.
    ///
    /// `cmp(stored, probe)` orders a stored record against the probe. The
    /// walk keeps a red node at the current position so that the node it
    /// finally unlinks can be spliced out directly. Once the match is found
    /// the walk carries on to its in-order successor, whose record takes the
    /// matched record's place before the successor's node is unlinked.
    pub fn remove_by<Q, F>(&mut self, probe: &Q, mut cmp: F) -> Option<T>
    where
        Q: ?Sized,
        F: FnMut(&T, &Q) -> Ordering,
    {
        if self.is_empty() {
            return None;
        }

        // g: grandparent, p: parent, q: current, found: the matching node.
        let mut q = Ptr::HEAD;
        let mut p = Ptr::NULL;
        let mut g: Ptr;
        let mut found = Ptr::NULL;
        let mut dir = Dir::Right;

        while !self.arena.child(q, dir).is_null() {
            let last = dir;

            g = p;
            p = q;
            q = self.arena.child(q, dir);

            let ord = cmp(self.arena.record(q), probe);
            dir = Dir::descend(ord);
            if ord == Ordering::Equal {
                found = q;
            }

            if self.arena.is_red(q) || self.arena.is_red(self.arena.child(q, dir)) {
                continue;
            }

            if self.arena.is_red(self.arena.child(q, !dir)) {
                let top = self.rotate_single(q, dir);
                self.arena.set_child(p, last, top);
                p = top;
                continue;
            }

            let s = self.arena.child(p, !last);
            if s.is_null() {
                continue;
            }

            if !self.arena.is_red(self.arena.child(s, Dir::Left))
                && !self.arena.is_red(self.arena.child(s, Dir::Right))
            {
                self.arena.set_color(p, Color::Black);
                self.arena.set_color(s, Color::Red);
                self.arena.set_color(q, Color::Red);
            } else {
                let dir2 = Dir::right_if(self.arena.child(g, Dir::Right) == p);

                if self.arena.is_red(self.arena.child(s, last)) {
                    let top = self.rotate_double(p, last);
                    self.arena.set_child(g, dir2, top);
                } else if self.arena.is_red(self.arena.child(s, !last)) {
                    let top = self.rotate_single(p, last);
                    self.arena.set_child(g, dir2, top);
                }

                let top = self.arena.child(g, dir2);
                self.arena.set_color(q, Color::Red);
                self.arena.set_color(top, Color::Red);
                self.arena.set_color(self.arena.child(top, Dir::Left), Color::Black);
                self.arena.set_color(self.arena.child(top, Dir::Right), Color::Black);
            }
        }

        let removed = if found.is_null() {
            None
        } else {
            let side = Dir::right_if(self.arena.child(p, Dir::Right) == q);
            let heir = self
                .arena
                .child(q, Dir::right_if(self.arena.child(q, Dir::Left).is_null()));
            self.arena.set_child(p, side, heir);

            let record = self.arena.release(q);
            Some(if found == q {
                record
            } else {
                self.arena.replace_record(found, record)
            })
        };

        self.blacken_root();
        removed
    }

    fn find<Q, F>(&self, probe: &Q, mut cmp: F) -> Ptr
    where
        Q: ?Sized,
        F: FnMut(&T, &Q) -> Ordering,
    {
        let mut cur = self.root();
        while !cur.is_null() {
            match cmp(self.arena.record(cur), probe) {
                Ordering::Equal => break,
                ord => cur = self.arena.child(cur, Dir::descend(ord)),
            }
        }
        cur
    }

    /// Looks up the record comparing equal to `probe`.
    pub fn get_by<Q, F>(&self, probe: &Q, cmp: F) -> Option<&T>
    where
        Q: ?Sized,
        F: FnMut(&T, &Q) -> Ordering,
    {
        let ptr = self.find(probe, cmp);
        (!ptr.is_null()).then(|| self.arena.record(ptr))
    }

    /// Like [`get_by`](Self::get_by), with mutable access to the record.
    ///
    /// The caller must not change how the record orders against the others.
    pub fn get_mut_by<Q, F>(&mut self, probe: &Q, cmp: F) -> Option<&mut T>
    where
        Q: ?Sized,
        F: FnMut(&T, &Q) -> Ordering,
    {
        let ptr = self.find(probe, cmp);
        if ptr.is_null() {
            None
        } else {
            Some(self.arena.record_mut(ptr))
        }
    }

    /// Visits every record in order without recursion or an auxiliary stack.
    ///
    /// Before descending into a left subtree, the walk points the empty right
    /// link of that subtree's rightmost node back at the current node, and
    /// removes the thread again on its second arrival there. `visit` returns
    /// `true` to stop; from then on no new thread is planted and unvisited
    /// left subtrees are skipped, so the walk only follows right links until
    /// the threads already planted are gone. The tree leaves this call in its
    /// original shape either way. Returns whether `visit` stopped the walk.
    pub fn traverse<F>(&mut self, visit: F) -> bool
    where
        F: FnMut(&T) -> bool,
    {
        self.threaded_walk(visit).0
    }

    /// The walk behind [`traverse`](Self::traverse). Also returns how many
    /// times the cursor moved onto a node.
    fn threaded_walk<F>(&mut self, mut visit: F) -> (bool, usize)
    where
        F: FnMut(&T) -> bool,
    {
        let mut stopped = false;
        let mut threads = 0usize;
        let mut steps = 0usize;
        let mut cur = self.root();

        while !cur.is_null() {
            if stopped && threads == 0 {
                break;
            }
            steps += 1;

            let left = self.arena.child(cur, Dir::Left);
            if left.is_null() {
                stopped = stopped || visit(self.arena.record(cur));
                cur = self.arena.child(cur, Dir::Right);
                continue;
            }

            let mut pred = left;
            loop {
                let next = self.arena.child(pred, Dir::Right);
                if next.is_null() || next == cur {
                    break;
                }
                pred = next;
            }

            if self.arena.child(pred, Dir::Right).is_null() {
                if stopped {
                    // Nothing below `left` is threaded yet.
                    cur = self.arena.child(cur, Dir::Right);
                } else {
                    self.arena.set_child(pred, Dir::Right, cur);
                    threads += 1;
                    cur = left;
                }
            } else {
                self.arena.set_child(pred, Dir::Right, Ptr::NULL);
                threads -= 1;
                stopped = stopped || visit(self.arena.record(cur));
                cur = self.arena.child(cur, Dir::Right);
            }
        }

        (stopped, steps)
    }

    /// Number of records, counted by walking the tree.
    pub fn size(&mut self) -> usize {
        let mut n = 0usize;
        self.traverse(|_| {
            n += 1;
            false
        });
        n
    }

    /// Number of nodes on the longest root-to-leaf path; 0 when empty.
    pub fn depth(&self) -> usize {
        self.depth_of(self.root())
    }

    fn depth_of(&self, node: Ptr) -> usize {
        if node.is_null() {
            return 0;
        }
        let left = self.depth_of(self.arena.child(node, Dir::Left));
        let right = self.depth_of(self.arena.child(node, Dir::Right));
        left.max(right) + 1
    }

    pub fn first(&self) -> Option<&T> {
        self.extreme(Dir::Left)
    }

    pub fn last(&self) -> Option<&T> {
        self.extreme(Dir::Right)
    }

    fn extreme(&self, dir: Dir) -> Option<&T> {
        let mut cur = self.root();
        if cur.is_null() {
            return None;
        }
        loop {
            let next = self.arena.child(cur, dir);
            if next.is_null() {
                return Some(self.arena.record(cur));
            }
            cur = next;
        }
    }

    /// Builds a structurally identical tree, colors included, whose records
    /// are produced by `copy_record`.
    ///
    /// All node storage is reserved up front, so either a complete copy is
    /// returned or nothing was built.
    pub fn copy_with<F>(&self, mut copy_record: F) -> Result<Self>
    where
        F: FnMut(&T) -> T,
    {
        let mut copy = Self::new();
        copy.arena.reserve(self.arena.live())?;
        let root = copy.copy_subtree(self, self.root(), &mut copy_record);
        copy.arena.set_child(Ptr::HEAD, Dir::Right, root);
        Ok(copy)
    }

    fn copy_subtree<F>(&mut self, src: &Self, node: Ptr, copy_record: &mut F) -> Ptr
    where
        F: FnMut(&T) -> T,
    {
        if node.is_null() {
            return Ptr::NULL;
        }

        let fresh = self.arena.alloc(copy_record(src.arena.record(node)));
        self.arena.set_color(fresh, src.arena.color(node));

        let left = self.copy_subtree(src, src.arena.child(node, Dir::Left), copy_record);
        let right = self.copy_subtree(src, src.arena.child(node, Dir::Right), copy_record);
        self.arena.set_child(fresh, Dir::Left, left);
        self.arena.set_child(fresh, Dir::Right, right);
        fresh
    }

    /// Copies the tree, cloning each record.
    pub fn try_clone(&self) -> Result<Self>
    where
        T: Clone,
    {
        self.copy_with(T::clone)
    }

    /// Empties the tree, handing each record to `release` in ascending order.
    ///
    /// Left children are rotated up until the current node has none; that
    /// node is then the smallest remaining record and is detached. This runs
    /// in constant stack space whatever the shape of the tree.
    pub fn free_with<F>(&mut self, mut release: F)
    where
        F: FnMut(T),
    {
        let mut cur = self.root();
        self.arena.set_child(Ptr::HEAD, Dir::Right, Ptr::NULL);

        while !cur.is_null() {
            let left = self.arena.child(cur, Dir::Left);
            if !left.is_null() {
                let inner = self.arena.child(left, Dir::Right);
                self.arena.set_child(cur, Dir::Left, inner);
                self.arena.set_child(left, Dir::Right, cur);
                cur = left;
            } else {
                let next = self.arena.child(cur, Dir::Right);
                release(self.arena.release(cur));
                cur = next;
            }
        }

        self.arena.clear();
    }

    /// In-order iterator borrowing the tree.
    pub fn iter(&self) -> Iter<'_, T> {
        let mut iter = Iter {
            arena: &self.arena,
            stack: Vec::new(),
            remaining: self.arena.live(),
        };
        iter.push_left_spine(self.root());
        iter
    }
}

impl<T> Default for RbTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for RbTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a, T> IntoIterator for &'a RbTree<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

/// Borrowing in-order iterator over an [`RbTree`].
pub struct Iter<'a, T> {
    arena: &'a NodeArena<T>,
    stack: Vec<Ptr>,
    remaining: usize,
}

impl<'a, T> Iter<'a, T> {
    fn push_left_spine(&mut self, mut node: Ptr) {
        while !node.is_null() {
            self.stack.push(node);
            node = self.arena.child(node, Dir::Left);
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let node = self.stack.pop()?;
        self.push_left_spine(self.arena.child(node, Dir::Right));
        self.remaining -= 1;
        Some(self.arena.record(node))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

// =============================================================================
// Invariant checks (tests only)
// =============================================================================

#[cfg(test)]
impl<T> RbTree<T> {
    /// Asserts the red-black invariants and strict in-order ordering, and
    /// returns the number of reachable records.
    pub(crate) fn validate(&self, mut cmp: impl FnMut(&T, &T) -> Ordering) -> usize {
        assert!(self.arena.head[Dir::Left as usize].is_null(), "false head must have no left child");

        let root = self.root();
        assert!(!self.arena.is_red(root), "root must be black");

        let mut reachable = 0usize;
        self.black_height(root, &mut reachable);
        assert_eq!(
            reachable,
            self.arena.live(),
            "every live slot must be reachable from the root"
        );

        let mut prev: Option<&T> = None;
        for record in self.iter() {
            if let Some(prev) = prev {
                assert_eq!(
                    cmp(prev, record),
                    Ordering::Less,
                    "in-order records must be strictly increasing"
                );
            }
            prev = Some(record);
        }

        reachable
    }

    fn black_height(&self, node: Ptr, reachable: &mut usize) -> usize {
        if node.is_null() {
            return 0;
        }
        *reachable += 1;

        let left = self.arena.child(node, Dir::Left);
        let right = self.arena.child(node, Dir::Right);
        if self.arena.is_red(node) {
            assert!(
                !self.arena.is_red(left) && !self.arena.is_red(right),
                "red node must not have a red child"
            );
        }

        let lh = self.black_height(left, reachable);
        let rh = self.black_height(right, reachable);
        assert_eq!(lh, rh, "black height must match on both sides");
        lh + usize::from(!self.arena.is_red(node))
    }

    /// Snapshot of every live node's (record, color, left, right) shape.
    pub(crate) fn shape(&self) -> Vec<(usize, bool, usize, usize)> {
        self.arena
            .slots
            .iter()
            .enumerate()
            .filter(|(_, node)| node.record.is_some())
            .map(|(idx, node)| {
                (
                    idx,
                    node.color == Color::Red,
                    node.children[0].0,
                    node.children[1].0,
                )
            })
            .collect()
    }
}
