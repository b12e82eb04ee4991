use std::collections::HashMap;

use crate::zip::{NodeId, ZipEntryIndex};

/// Inode of the root directory.
pub const ROOT_INODE: u64 = 1;

/// Inode numbers for every node of an index.
///
/// Inodes are the arena id plus one, so the root is inode 1 and numbers are
/// never reused while the table lives.
#[derive(Debug)]
pub struct InodeTable {
    by_name: HashMap<u64, HashMap<String, u64>>,
    len: usize,
}

impl InodeTable {
    pub fn new(index: &ZipEntryIndex) -> Self {
        let mut by_name: HashMap<u64, HashMap<String, u64>> = HashMap::new();
        for id in 0..index.nodes().len() {
            if let Some(children) = index.children(id) {
                let names = by_name.entry(Self::inode_of(id)).or_default();
                for &child in children {
                    names.insert(index.nodes()[child].name.clone(), Self::inode_of(child));
                }
            }
        }
        Self {
            by_name,
            len: index.nodes().len(),
        }
    }

    pub fn inode_of(id: NodeId) -> u64 {
        id as u64 + 1
    }

    /// Arena id behind `ino`, if the inode belongs to this table.
    pub fn node_of(&self, ino: u64) -> Option<NodeId> {
        let id = ino.checked_sub(1)? as usize;
        (id < self.len).then_some(id)
    }

    /// Child inode named `name` inside directory `parent`.
    pub fn lookup(&self, parent: u64, name: &str) -> Option<u64> {
        self.by_name.get(&parent)?.get(name).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
