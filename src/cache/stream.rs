//! Lazy record streams over a cache tree.

use super::tree::{NodeId, Tree};
use crate::error::CacheError;
use crate::filter::Filter;
use crate::merge::KMerge;
use crate::record::Record;
use std::cell::RefCell;
use std::rc::Rc;

/// Path-ordered records; pulled on demand, safe to drop at any point.
///
/// A leaf that cannot be read yields one `Err` and contributes nothing more
/// to this stream. Selecting again resumes that leaf where it stopped.
pub type RecordStream = Box<dyn Iterator<Item = Result<Record, CacheError>>>;

/// Cursor over one leaf. Holds its own position so several streams can read
/// the same leaf; the tree buffers what has been parsed.
struct LeafStream {
    tree: Rc<RefCell<Tree>>,
    id: NodeId,
    filter: Option<Filter>,
    include_deleted: bool,
    pos: usize,
    failed: bool,
}

impl Iterator for LeafStream {
    type Item = Result<Record, CacheError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.tree.borrow_mut().leaf_next(
            self.id,
            &mut self.pos,
            self.filter.as_ref(),
            self.include_deleted,
        );
        self.failed = next.is_err();
        next.transpose()
    }
}

/// Stream of node `id`: its leaf cursor, or the merge of every admitted
/// child's stream. Directory listings are read up front; record files only
/// as the stream is pulled.
pub(crate) fn select(
    tree: &Rc<RefCell<Tree>>,
    id: NodeId,
    filter: Option<Filter>,
    include_deleted: bool,
) -> RecordStream {
    if filter.as_ref().map_or(false, Filter::is_unsatisfiable) {
        return Box::new(std::iter::empty());
    }
    if tree.borrow().is_leaf(id) {
        tree.borrow_mut().ensure_leaf_deltas(id);
        return Box::new(LeafStream {
            tree: Rc::clone(tree),
            id,
            filter,
            include_deleted,
            pos: 0,
            failed: false,
        });
    }
    let children = tree.borrow_mut().filtered(id, filter.as_ref());
    let streams: Vec<RecordStream> = children
        .into_iter()
        .map(|(child, residual)| select(tree, child, residual, include_deleted))
        .collect();
    Box::new(KMerge::new(streams))
}
