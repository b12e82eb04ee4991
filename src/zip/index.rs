//! Immutable view of an archive: its entries plus the directory tree they imply.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`], so the tree
//! is acyclic by construction. Children keep archive encounter order, which
//! is what directory listings return.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::parser::ZipParser;
use super::structures::ZipEntry;
use crate::error::{Error, Result};
use crate::io::ReadAt;

/// Arena index of a tree node.
pub type NodeId = usize;

/// The root directory is always the first node.
pub const ROOT: NodeId = 0;

/// How to resolve several archive entries that share one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// The entry appearing last in the central directory is exposed.
    #[default]
    LastWins,
    /// The first entry is exposed; later ones are ignored.
    FirstWins,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Directory { children: Vec<NodeId> },
    File,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// The root is its own parent.
    pub parent: NodeId,
    /// Index into [`ZipEntryIndex::entries`]; `None` for synthesized directories.
    pub entry: Option<usize>,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }
}

#[derive(Debug)]
pub struct ZipEntryIndex {
    entries: Vec<ZipEntry>,
    nodes: Vec<Node>,
}

/// Split an archive path into its components.
///
/// Leading, doubled and trailing separators are dropped along with `.`;
/// `..` is rejected so no entry can resolve outside the root.
fn components(path: &str) -> Result<Vec<&str>> {
    let mut out = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                return Err(Error::corrupt(format!(
                    "entry '{}' escapes the archive root",
                    path
                )));
            }
            name => out.push(name),
        }
    }
    Ok(out)
}

struct Builder {
    nodes: Vec<Node>,
    by_name: HashMap<(NodeId, String), NodeId>,
    policy: DuplicatePolicy,
}

impl Builder {
    fn new(policy: DuplicatePolicy) -> Self {
        Self {
            nodes: vec![Node {
                name: String::new(),
                parent: ROOT,
                entry: None,
                kind: NodeKind::Directory {
                    children: Vec::new(),
                },
            }],
            by_name: HashMap::new(),
            policy,
        }
    }

    fn push(&mut self, parent: NodeId, name: &str, entry: Option<usize>, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            parent,
            entry,
            kind,
        });
        if let NodeKind::Directory { children } = &mut self.nodes[parent].kind {
            children.push(id);
        }
        self.by_name.insert((parent, name.to_string()), id);
        id
    }

    /// Existing directory `name` under `parent`, or a freshly synthesized one.
    fn dir(&mut self, parent: NodeId, name: &str, path: &str) -> Result<NodeId> {
        let existing = self.by_name.get(&(parent, name.to_string())).copied();
        match existing {
            Some(id) if self.nodes[id].is_dir() => Ok(id),
            Some(_) => Err(Error::corrupt(format!(
                "'{}' uses '{}' both as a file and as a directory",
                path, name
            ))),
            None => Ok(self.push(
                parent,
                name,
                None,
                NodeKind::Directory {
                    children: Vec::new(),
                },
            )),
        }
    }

    /// Attach entry `index` to an existing node according to the duplicate policy.
    fn attach(&mut self, id: NodeId, index: usize) {
        let node = &mut self.nodes[id];
        match (node.entry, self.policy) {
            (None, _) | (Some(_), DuplicatePolicy::LastWins) => node.entry = Some(index),
            (Some(_), DuplicatePolicy::FirstWins) => {}
        }
    }

    fn add(&mut self, index: usize, entry: &ZipEntry) -> Result<()> {
        let parts = components(&entry.path)?;
        let Some((last, dirs)) = parts.split_last() else {
            // "/" or "./": nothing to expose beyond the root itself
            return Ok(());
        };

        let mut parent = ROOT;
        for dir in dirs {
            parent = self.dir(parent, dir, &entry.path)?;
        }

        if entry.is_directory {
            let id = self.dir(parent, last, &entry.path)?;
            self.attach(id, index);
            return Ok(());
        }

        let existing = self.by_name.get(&(parent, last.to_string())).copied();
        match existing {
            None => {
                self.push(parent, last, Some(index), NodeKind::File);
            }
            Some(id) => {
                if self.nodes[id].is_dir() {
                    return Err(Error::corrupt(format!(
                        "'{}' is both a file and a directory",
                        entry.path
                    )));
                }
                debug!(path = %entry.path, policy = ?self.policy, "duplicate archive entry");
                self.attach(id, index);
            }
        }
        Ok(())
    }
}

impl ZipEntryIndex {
    /// Derive the tree from `entries`, taken in central directory order.
    pub fn build(entries: Vec<ZipEntry>, policy: DuplicatePolicy) -> Result<Self> {
        let mut builder = Builder::new(policy);
        for (index, entry) in entries.iter().enumerate() {
            builder.add(index, entry)?;
        }
        Ok(Self {
            entries,
            nodes: builder.nodes,
        })
    }

    /// Read the central directory through `reader` and build the index.
    pub async fn load<R: ReadAt>(reader: Arc<R>, policy: DuplicatePolicy) -> Result<Self> {
        let entries = ZipParser::new(reader).list_entries().await?;
        let index = Self::build(entries, policy)?;
        debug!(
            entries = index.entries.len(),
            nodes = index.nodes.len(),
            "indexed archive"
        );
        Ok(index)
    }

    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// The archive entry a node exposes, if it has one.
    pub fn entry_of(&self, id: NodeId) -> Option<&ZipEntry> {
        self.node(id)?.entry.map(|i| &self.entries[i])
    }

    pub fn children(&self, id: NodeId) -> Option<&[NodeId]> {
        match &self.node(id)?.kind {
            NodeKind::Directory { children } => Some(children),
            NodeKind::File => None,
        }
    }

    /// Slash-separated path of a node, rebuilt from parent links.
    pub fn path_of(&self, mut id: NodeId) -> String {
        let mut parts = Vec::new();
        while id != ROOT {
            let node = &self.nodes[id];
            parts.push(node.name.as_str());
            id = node.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Resolve a slash-separated path from the root.
    #[cfg(test)]
    pub(crate) fn resolve(&self, path: &str) -> Option<NodeId> {
        let mut id = ROOT;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            id = *self
                .children(id)?
                .iter()
                .find(|&&child| self.nodes[child].name == part)?;
        }
        Some(id)
    }
}
