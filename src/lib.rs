//! # rbtree-map
//!
//! An ordered in-memory map built on a top-down red-black tree.
//!
//! The crate has two layers:
//!
//! - [`RbTree`], the balancing engine. It stores records it never inspects;
//!   every operation takes the comparison to use. Insertion and removal
//!   rebalance in a single pass down the tree, and [`RbTree::traverse`]
//!   walks it in order with constant extra space by threading the tree
//!   through its own empty child links.
//! - [`RbMap`], a key/value map over the engine. It keeps the element count
//!   and an ownership policy chosen once at construction from optional
//!   copy-key, copy-value, free-key and free-value callbacks.
//!
//! ## Example
//!
//! ```rust
//! use rbtree_map::RbMap;
//!
//! let mut map = RbMap::new();
//! for k in [5, 3, 8, 1, 4, 7, 9] {
//!     map.insert(k, k * 10)?;
//! }
//! assert_eq!(map.remove(&5), Some(50));
//! assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![1, 3, 4, 7, 8, 9]);
//! assert_eq!(map.get(&8), Some(&80));
//! # Ok::<(), rbtree_map::AllocError>(())
//! ```
//!
//! Running out of memory while growing node storage is reported as
//! [`AllocError`] before the tree is touched. A duplicate key or a missing
//! key is an ordinary outcome, reported through `bool` / `Option`.

#![forbid(unsafe_code)]

mod error;
mod map;
mod tree;

pub use error::{AllocError, Result};
pub use map::{CopyFn, FreeFn, Iter, MapBuilder, RbMap};
pub use tree::{Insertion, Iter as TreeIter, RbTree};

#[cfg(test)]
mod proptests;
