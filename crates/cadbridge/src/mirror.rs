//! Identifier maps between server ids and host handles

use crate::host::{ContainerTag, HostScene};
use cadbridge_network::ObjectType;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{trace, warn};

/// Namespace a server id lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdScope {
    /// Solids, sheets, wires and empties
    Item,
    /// Hierarchical containers
    Group,
}

impl IdScope {
    pub fn of(object_type: ObjectType) -> Self {
        if object_type.is_group() {
            Self::Group
        } else {
            Self::Item
        }
    }
}

/// Item and group maps of one remote file
#[derive(Debug, Clone)]
pub struct FileMirror<O, C> {
    filename: String,
    items: HashMap<u32, O>,
    groups: HashMap<u32, C>,
}

impl<O, C> FileMirror<O, C>
where
    O: Copy + Eq + std::hash::Hash + std::fmt::Debug,
    C: Copy + Eq + std::hash::Hash + std::fmt::Debug,
{
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            items: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    /// Rebuild the maps from the tags found below `inbox`
    ///
    /// Tags with id 0 or another filename are ignored. When two live objects claim the same id
    /// the one visited last wins.
    pub fn rebuild<H>(scene: &H, inbox: C, filename: &str) -> Self
    where
        H: HostScene<Object = O, Container = C>,
    {
        let mut mirror = Self::new(filename);
        let mut visited = HashSet::new();
        let mut pending = vec![inbox];

        while let Some(container) = pending.pop() {
            if !visited.insert(container) {
                continue;
            }

            for object in scene.container_objects(container) {
                let Some(tag) = scene.object_tag(object) else {
                    continue;
                };
                if tag.remote_id == 0 || tag.filename != filename {
                    continue;
                }
                if let Some(previous) = mirror.items.insert(tag.remote_id, object) {
                    if previous != object {
                        warn!(
                            "Item {} of {} is carried by more than one object",
                            tag.remote_id, filename
                        );
                    }
                }
            }

            for child in scene.child_containers(container) {
                if let Some(ContainerTag::Remote(tag)) = scene.container_tag(child) {
                    if tag.remote_id != 0 && tag.filename == filename {
                        if let Some(previous) = mirror.groups.insert(tag.remote_id, child) {
                            if previous != child {
                                warn!(
                                    "Group {} of {} is carried by more than one container",
                                    tag.remote_id, filename
                                );
                            }
                        }
                    }
                }
                pending.push(child);
            }
        }

        trace!(
            "Rebuilt {}: {} items, {} groups",
            filename,
            mirror.items.len(),
            mirror.groups.len()
        );
        mirror
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn item(&self, id: u32) -> Option<O> {
        self.items.get(&id).copied()
    }

    pub fn group(&self, id: u32) -> Option<C> {
        self.groups.get(&id).copied()
    }

    pub fn insert_item(&mut self, id: u32, object: O) {
        self.items.insert(id, object);
    }

    pub fn insert_group(&mut self, id: u32, container: C) {
        self.groups.insert(id, container);
    }

    pub fn remove_item(&mut self, id: u32) -> Option<O> {
        self.items.remove(&id)
    }

    pub fn remove_group(&mut self, id: u32) -> Option<C> {
        self.groups.remove(&id)
    }

    /// Known ids of a scope, sorted
    pub fn ids(&self, scope: IdScope) -> BTreeSet<u32> {
        match scope {
            IdScope::Item => self.items.keys().copied().collect(),
            IdScope::Group => self.groups.keys().copied().collect(),
        }
    }

    pub fn contains(&self, scope: IdScope, id: u32) -> bool {
        match scope {
            IdScope::Item => self.items.contains_key(&id),
            IdScope::Group => self.groups.contains_key(&id),
        }
    }

    pub fn len(&self, scope: IdScope) -> usize {
        match scope {
            IdScope::Item => self.items.len(),
            IdScope::Group => self.groups.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.groups.is_empty()
    }
}

/// Mirrors of every file touched since the last connect
#[derive(Debug, Clone)]
pub struct SceneMirror<O, C> {
    files: HashMap<String, FileMirror<O, C>>,
}

impl<O, C> Default for SceneMirror<O, C> {
    fn default() -> Self {
        Self {
            files: HashMap::new(),
        }
    }
}

impl<O, C> SceneMirror<O, C> {
    pub fn get(&self, filename: &str) -> Option<&FileMirror<O, C>> {
        self.files.get(filename)
    }

    pub fn insert(&mut self, mirror: FileMirror<O, C>) {
        self.files.insert(mirror.filename.clone(), mirror);
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RemoteTag;
    use crate::memory_scene::MemoryScene;
    use crate::mesh::MeshData;

    #[test]
    fn test_scope_of_type() {
        assert_eq!(IdScope::of(ObjectType::Solid), IdScope::Item);
        assert_eq!(IdScope::of(ObjectType::Wire), IdScope::Item);
        assert_eq!(IdScope::of(ObjectType::Group), IdScope::Group);
    }

    #[test]
    fn test_rebuild_from_tags() {
        let mut scene = MemoryScene::new();
        let inbox = scene.create_container("Inbox");
        let group = scene.create_container("Body");
        scene.set_container_tag(group, ContainerTag::Remote(RemoteTag::new(7, "a")));
        scene.link_container(group, inbox);

        let nested = scene.create_object("Plate", MeshData::default());
        scene.set_object_tag(nested, RemoteTag::new(7, "a"));
        scene.link_object(nested, group);

        let foreign = scene.create_object("Other", MeshData::default());
        scene.set_object_tag(foreign, RemoteTag::new(8, "b"));
        scene.link_object(foreign, inbox);

        let root = scene.create_object("Root", MeshData::default());
        scene.set_object_tag(root, RemoteTag::new(0, "a"));
        scene.link_object(root, inbox);

        let untagged = scene.create_object("Loose", MeshData::default());
        scene.link_object(untagged, inbox);

        let mirror = FileMirror::rebuild(&scene, inbox, "a");
        // Same numeric id in both scopes without collision
        assert_eq!(mirror.item(7), Some(nested));
        assert_eq!(mirror.group(7), Some(group));
        assert_eq!(mirror.len(IdScope::Item), 1);
        assert!(!mirror.contains(IdScope::Item, 8));
        assert!(!mirror.contains(IdScope::Item, 0));
    }

    #[test]
    fn test_rebuild_survives_shared_links() {
        let mut scene = MemoryScene::new();
        let inbox = scene.create_container("Inbox");
        let left = scene.create_container("Left");
        let right = scene.create_container("Right");
        let shared = scene.create_container("Shared");
        scene.link_container(left, inbox);
        scene.link_container(right, inbox);
        scene.link_container(shared, left);
        scene.link_container(shared, right);
        scene.set_container_tag(shared, ContainerTag::Remote(RemoteTag::new(3, "a")));

        let mirror = FileMirror::rebuild(&scene, inbox, "a");
        assert_eq!(mirror.ids(IdScope::Group).into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_scene_mirror_clear() {
        let mut mirrors: SceneMirror<u32, u32> = SceneMirror::default();
        let mut file = FileMirror::new("a");
        file.insert_item(1, 10);
        mirrors.insert(file);
        assert_eq!(mirrors.get("a").and_then(|m| m.item(1)), Some(10));

        mirrors.clear();
        assert!(mirrors.is_empty());
    }
}
