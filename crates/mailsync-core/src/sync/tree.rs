//! Folder tree reconstruction from paths.

use std::collections::HashMap;

use crate::store::{Folder, sort_folders};

/// A folder with its sub-folders, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderNode {
    /// The folder.
    pub folder: Folder,
    /// Direct children.
    pub children: Vec<FolderNode>,
}

impl FolderNode {
    /// Finds a folder by id in this subtree.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Self> {
        if self.folder.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Folders of the subtree in depth-first display order, with their depth.
    #[must_use]
    pub fn flatten(&self) -> Vec<(usize, &Folder)> {
        let mut out = Vec::new();
        self.flatten_into(0, &mut out);
        out
    }

    fn flatten_into<'a>(&'a self, depth: usize, out: &mut Vec<(usize, &'a Folder)>) {
        out.push((depth, &self.folder));
        for child in &self.children {
            child.flatten_into(depth + 1, out);
        }
    }
}

/// Builds the folder forest from path and separator data alone.
///
/// A folder whose parent path matches no other folder is a root.
#[must_use]
pub fn build_folder_tree(mut folders: Vec<Folder>) -> Vec<FolderNode> {
    sort_folders(&mut folders);

    let by_path: HashMap<&str, usize> = folders
        .iter()
        .enumerate()
        .map(|(index, folder)| (folder.path.as_str(), index))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); folders.len()];
    let mut roots = Vec::new();
    for (index, folder) in folders.iter().enumerate() {
        match folder.parent_path().and_then(|path| by_path.get(path)) {
            Some(&parent) if parent != index => children[parent].push(index),
            _ => roots.push(index),
        }
    }

    let mut slots: Vec<Option<Folder>> = folders.into_iter().map(Some).collect();
    roots
        .into_iter()
        .filter_map(|index| take_node(index, &children, &mut slots))
        .collect()
}

fn take_node(
    index: usize,
    children: &[Vec<usize>],
    slots: &mut [Option<Folder>],
) -> Option<FolderNode> {
    let folder = slots.get_mut(index)?.take()?;
    let nodes = children
        .get(index)
        .map(|list| {
            list.iter()
                .filter_map(|&child| take_node(child, children, slots))
                .collect()
        })
        .unwrap_or_default();
    Some(FolderNode {
        folder,
        children: nodes,
    })
}
