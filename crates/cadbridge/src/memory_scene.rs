//! In-memory host scene
//!
//! A complete [`HostScene`] used by the headless binary and by tests. Undo restores the state
//! captured when the outermost undo step opened, and renumbers every handle on the way, the
//! way a real host invalidates object identities on undo.

use crate::host::{ContainerTag, HostScene, InteractionMode, RemoteTag, Selection};
use crate::mesh::MeshData;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectData {
    pub name: String,
    pub mesh: MeshData,
    pub scale: f32,
    pub hidden: bool,
    pub selectable: bool,
    pub tag: Option<RemoteTag>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerData {
    pub name: String,
    pub objects: Vec<ObjectId>,
    pub children: Vec<ContainerId>,
    pub hidden: bool,
    pub selectable: bool,
    pub tag: Option<ContainerTag>,
}

impl ContainerData {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            objects: Vec::new(),
            children: Vec::new(),
            hidden: false,
            selectable: true,
            tag: None,
        }
    }
}

#[derive(Debug, Clone)]
struct State {
    objects: BTreeMap<ObjectId, ObjectData>,
    containers: BTreeMap<ContainerId, ContainerData>,
    root: ContainerId,
    selection: Selection<ObjectId>,
}

/// Counts describing the scene contents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneSummary {
    pub containers: usize,
    pub objects: usize,
    /// Objects linked into at least one container
    pub linked_objects: usize,
    pub polygons: usize,
}

pub struct MemoryScene {
    state: State,
    next_handle: u64,
    undo_stack: Vec<State>,
    open_steps: usize,
}

impl Default for MemoryScene {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryScene {
    pub fn new() -> Self {
        let root = ContainerId(1);
        let mut containers = BTreeMap::new();
        containers.insert(root, ContainerData::new("Scene Collection"));
        Self {
            state: State {
                objects: BTreeMap::new(),
                containers,
                root,
                selection: Selection::default(),
            },
            next_handle: 2,
            undo_stack: Vec::new(),
            open_steps: 0,
        }
    }

    fn allocate(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    pub fn object(&self, object: ObjectId) -> Option<&ObjectData> {
        self.state.objects.get(&object)
    }

    pub fn container(&self, container: ContainerId) -> Option<&ContainerData> {
        self.state.containers.get(&container)
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &ObjectData)> {
        self.state.objects.iter().map(|(id, data)| (*id, data))
    }

    pub fn containers(&self) -> impl Iterator<Item = (ContainerId, &ContainerData)> {
        self.state.containers.iter().map(|(id, data)| (*id, data))
    }

    /// Containers an object is linked into
    pub fn object_parents(&self, object: ObjectId) -> Vec<ContainerId> {
        self.containers()
            .filter(|(_, data)| data.objects.contains(&object))
            .map(|(id, _)| id)
            .collect()
    }

    /// Containers a container is linked under
    pub fn container_parents(&self, container: ContainerId) -> Vec<ContainerId> {
        self.containers()
            .filter(|(_, data)| data.children.contains(&container))
            .map(|(id, _)| id)
            .collect()
    }

    /// Object carrying the given remote tag
    pub fn find_object(&self, remote_id: u32, filename: &str) -> Option<ObjectId> {
        self.objects()
            .find(|(_, data)| {
                data.tag
                    .as_ref()
                    .is_some_and(|tag| tag.remote_id == remote_id && tag.filename == filename)
            })
            .map(|(id, _)| id)
    }

    /// Container carrying the given remote tag
    pub fn find_group(&self, remote_id: u32, filename: &str) -> Option<ContainerId> {
        let wanted = ContainerTag::Remote(RemoteTag::new(remote_id, filename));
        self.containers()
            .find(|(_, data)| data.tag.as_ref() == Some(&wanted))
            .map(|(id, _)| id)
    }

    /// Select objects, making the first one active
    pub fn select(&mut self, objects: &[ObjectId]) {
        self.state.selection.selected = objects.to_vec();
        self.state.selection.active = objects.first().copied();
    }

    pub fn set_mode(&mut self, mode: InteractionMode) {
        self.state.selection.mode = mode;
    }

    /// Number of completed undo steps that can be undone
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Revert the last completed undo step; every handle is renumbered
    pub fn undo(&mut self) -> bool {
        if self.open_steps > 0 {
            warn!("Cannot undo while an undo step is open");
            return false;
        }
        let Some(previous) = self.undo_stack.pop() else {
            return false;
        };
        self.state = self.renumber(previous);
        debug!("Undo restored {} objects", self.state.objects.len());
        true
    }

    fn renumber(&mut self, state: State) -> State {
        let object_map: HashMap<ObjectId, ObjectId> = state
            .objects
            .keys()
            .map(|old| (*old, ObjectId(self.allocate())))
            .collect();
        let container_map: HashMap<ContainerId, ContainerId> = state
            .containers
            .keys()
            .map(|old| (*old, ContainerId(self.allocate())))
            .collect();

        let objects = state
            .objects
            .into_iter()
            .filter_map(|(id, data)| object_map.get(&id).map(|new| (*new, data)))
            .collect();

        let containers = state
            .containers
            .into_iter()
            .filter_map(|(id, mut data)| {
                data.objects = data
                    .objects
                    .iter()
                    .filter_map(|o| object_map.get(o).copied())
                    .collect();
                data.children = data
                    .children
                    .iter()
                    .filter_map(|c| container_map.get(c).copied())
                    .collect();
                container_map.get(&id).map(|new| (*new, data))
            })
            .collect();

        let selection = Selection {
            active: state
                .selection
                .active
                .and_then(|o| object_map.get(&o).copied()),
            selected: state
                .selection
                .selected
                .iter()
                .filter_map(|o| object_map.get(o).copied())
                .collect(),
            mode: state.selection.mode,
        };

        State {
            objects,
            containers,
            root: container_map
                .get(&state.root)
                .copied()
                .unwrap_or(state.root),
            selection,
        }
    }

    fn is_descendant(&self, candidate: ContainerId, ancestor: ContainerId) -> bool {
        let mut stack = vec![ancestor];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == candidate {
                return true;
            }
            if visited.insert(current) {
                if let Some(data) = self.container(current) {
                    stack.extend(data.children.iter().copied());
                }
            }
        }
        false
    }

    pub fn summary(&self) -> SceneSummary {
        let linked: HashSet<ObjectId> = self
            .state
            .containers
            .values()
            .flat_map(|data| data.objects.iter().copied())
            .collect();
        SceneSummary {
            containers: self.state.containers.len(),
            objects: self.state.objects.len(),
            linked_objects: linked.len(),
            polygons: self
                .state
                .objects
                .values()
                .map(|data| data.mesh.polygon_count())
                .sum(),
        }
    }

    /// Indented outline of the container tree below the root
    pub fn outline(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.outline_into(self.state.root, 0, &mut lines);
        lines
    }

    fn outline_into(&self, container: ContainerId, depth: usize, lines: &mut Vec<String>) {
        let Some(data) = self.container(container) else {
            return;
        };
        let indent = "  ".repeat(depth);
        let hidden = if data.hidden { " (hidden)" } else { "" };
        lines.push(format!("{indent}[{}]{hidden}", data.name));
        for object in &data.objects {
            if let Some(object_data) = self.object(*object) {
                lines.push(format!(
                    "{indent}  {} ({} polygons){}",
                    object_data.name,
                    object_data.mesh.polygon_count(),
                    if object_data.hidden { " (hidden)" } else { "" }
                ));
            }
        }
        for child in &data.children {
            // Guard against a container linked under itself
            if *child != container {
                self.outline_into(*child, depth + 1, lines);
            }
        }
    }
}

impl HostScene for MemoryScene {
    type Object = ObjectId;
    type Container = ContainerId;

    fn root_container(&self) -> ContainerId {
        self.state.root
    }

    fn create_container(&mut self, name: &str) -> ContainerId {
        let id = ContainerId(self.allocate());
        self.state.containers.insert(id, ContainerData::new(name));
        id
    }

    fn remove_container(&mut self, container: ContainerId) {
        if container == self.state.root {
            warn!("Refusing to remove the root container");
            return;
        }
        if self.state.containers.remove(&container).is_some() {
            self.unlink_container_from_all(container);
        }
    }

    fn container_name(&self, container: ContainerId) -> Option<String> {
        self.container(container).map(|data| data.name.clone())
    }

    fn rename_container(&mut self, container: ContainerId, name: &str) {
        if let Some(data) = self.state.containers.get_mut(&container) {
            data.name = name.to_owned();
        }
    }

    fn child_containers(&self, container: ContainerId) -> Vec<ContainerId> {
        self.container(container)
            .map(|data| data.children.clone())
            .unwrap_or_default()
    }

    fn container_objects(&self, container: ContainerId) -> Vec<ObjectId> {
        self.container(container)
            .map(|data| data.objects.clone())
            .unwrap_or_default()
    }

    fn link_container(&mut self, child: ContainerId, parent: ContainerId) {
        if !self.state.containers.contains_key(&child) {
            return;
        }
        if self.is_descendant(parent, child) {
            warn!("Linking {} under {} would create a cycle", child, parent);
            return;
        }
        if let Some(data) = self.state.containers.get_mut(&parent) {
            if !data.children.contains(&child) {
                data.children.push(child);
            }
        }
    }

    fn unlink_container_from_all(&mut self, container: ContainerId) {
        for data in self.state.containers.values_mut() {
            data.children.retain(|child| *child != container);
        }
    }

    fn set_container_hidden(&mut self, container: ContainerId, hidden: bool) {
        if let Some(data) = self.state.containers.get_mut(&container) {
            data.hidden = hidden;
        }
    }

    fn set_container_selectable(&mut self, container: ContainerId, selectable: bool) {
        if let Some(data) = self.state.containers.get_mut(&container) {
            data.selectable = selectable;
        }
    }

    fn container_tag(&self, container: ContainerId) -> Option<ContainerTag> {
        self.container(container).and_then(|data| data.tag.clone())
    }

    fn set_container_tag(&mut self, container: ContainerId, tag: ContainerTag) {
        if let Some(data) = self.state.containers.get_mut(&container) {
            data.tag = Some(tag);
        }
    }

    fn create_object(&mut self, name: &str, mesh: MeshData) -> ObjectId {
        let id = ObjectId(self.allocate());
        self.state.objects.insert(
            id,
            ObjectData {
                name: name.to_owned(),
                mesh,
                scale: 1.0,
                hidden: false,
                selectable: true,
                tag: None,
            },
        );
        id
    }

    fn remove_object(&mut self, object: ObjectId) {
        if self.state.objects.remove(&object).is_some() {
            self.unlink_object_from_all(object);
            let selection = &mut self.state.selection;
            selection.selected.retain(|selected| *selected != object);
            if selection.active == Some(object) {
                selection.active = None;
            }
        }
    }

    fn replace_mesh(&mut self, object: ObjectId, mesh: MeshData) {
        // Leaving edit mode is required before the host accepts new geometry
        let selection = &mut self.state.selection;
        if selection.active == Some(object) && selection.mode == InteractionMode::Edit {
            selection.mode = InteractionMode::Object;
        }
        if let Some(data) = self.state.objects.get_mut(&object) {
            data.mesh = mesh;
        }
    }

    fn rename_object(&mut self, object: ObjectId, name: &str) {
        if let Some(data) = self.state.objects.get_mut(&object) {
            data.name = name.to_owned();
        }
    }

    fn set_object_scale(&mut self, object: ObjectId, scale: f32) {
        if let Some(data) = self.state.objects.get_mut(&object) {
            data.scale = scale;
        }
    }

    fn link_object(&mut self, object: ObjectId, container: ContainerId) {
        if !self.state.objects.contains_key(&object) {
            return;
        }
        if let Some(data) = self.state.containers.get_mut(&container) {
            if !data.objects.contains(&object) {
                data.objects.push(object);
            }
        }
    }

    fn unlink_object_from_all(&mut self, object: ObjectId) {
        for data in self.state.containers.values_mut() {
            data.objects.retain(|linked| *linked != object);
        }
    }

    fn set_object_hidden(&mut self, object: ObjectId, hidden: bool) {
        if let Some(data) = self.state.objects.get_mut(&object) {
            data.hidden = hidden;
        }
    }

    fn set_object_selectable(&mut self, object: ObjectId, selectable: bool) {
        if let Some(data) = self.state.objects.get_mut(&object) {
            data.selectable = selectable;
        }
    }

    fn object_tag(&self, object: ObjectId) -> Option<RemoteTag> {
        self.object(object).and_then(|data| data.tag.clone())
    }

    fn set_object_tag(&mut self, object: ObjectId, tag: RemoteTag) {
        if let Some(data) = self.state.objects.get_mut(&object) {
            data.tag = Some(tag);
        }
    }

    fn begin_undo_step(&mut self, label: &str) {
        if self.open_steps == 0 {
            debug!("Undo step '{}' opened", label);
            self.undo_stack.push(self.state.clone());
        }
        self.open_steps += 1;
    }

    fn end_undo_step(&mut self, label: &str) {
        if self.open_steps == 0 {
            warn!("Undo step '{}' closed without being opened", label);
            return;
        }
        self.open_steps -= 1;
        if self.open_steps == 0 {
            debug!("Undo step '{}' closed", label);
        }
    }

    fn selection(&self) -> Selection<ObjectId> {
        self.state.selection.clone()
    }

    fn restore_selection(&mut self, selection: &Selection<ObjectId>) {
        let objects = &self.state.objects;
        self.state.selection = Selection {
            active: selection.active.filter(|o| objects.contains_key(o)),
            selected: selection
                .selected
                .iter()
                .copied()
                .filter(|o| objects.contains_key(o))
                .collect(),
            mode: selection.mode,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_and_unlink() {
        let mut scene = MemoryScene::new();
        let root = scene.root_container();
        let a = scene.create_container("A");
        let b = scene.create_container("B");
        scene.link_container(a, root);
        scene.link_container(b, root);

        let object = scene.create_object("Cube", MeshData::default());
        scene.link_object(object, a);
        scene.link_object(object, b);
        scene.link_object(object, b);
        assert_eq!(scene.object_parents(object), vec![a, b]);

        scene.unlink_object_from_all(object);
        assert!(scene.object_parents(object).is_empty());
        assert_eq!(scene.summary().linked_objects, 0);
    }

    #[test]
    fn test_cycles_refused() {
        let mut scene = MemoryScene::new();
        let a = scene.create_container("A");
        let b = scene.create_container("B");
        scene.link_container(b, a);
        scene.link_container(a, b);
        assert!(scene.container_parents(a).is_empty());
        scene.link_container(a, a);
        assert!(scene.child_containers(a) == vec![b]);
    }

    #[test]
    fn test_undo_renumbers_handles() {
        let mut scene = MemoryScene::new();
        let root = scene.root_container();
        let before = scene.create_object("Keep", MeshData::default());
        scene.link_object(before, root);
        scene.set_object_tag(before, RemoteTag::new(3, "f"));

        scene.begin_undo_step("sync");
        scene.begin_undo_step("nested");
        let added = scene.create_object("Added", MeshData::default());
        scene.link_object(added, root);
        scene.end_undo_step("nested");
        scene.end_undo_step("sync");
        assert_eq!(scene.undo_depth(), 1);

        assert!(scene.undo());
        assert_eq!(scene.summary().objects, 1);
        assert!(scene.object(before).is_none());
        assert!(scene.object(added).is_none());

        let renumbered = scene.find_object(3, "f").unwrap();
        assert_ne!(renumbered, before);
        assert_eq!(scene.object_parents(renumbered), vec![scene.root_container()]);
        assert_ne!(scene.root_container(), root);
        assert!(!scene.undo());
    }

    #[test]
    fn test_replace_mesh_leaves_edit_mode() {
        let mut scene = MemoryScene::new();
        let object = scene.create_object("Part", MeshData::default());
        scene.select(&[object]);
        scene.set_mode(InteractionMode::Edit);

        let saved = scene.selection();
        scene.replace_mesh(object, MeshData::default());
        assert_eq!(scene.selection().mode, InteractionMode::Object);

        scene.restore_selection(&saved);
        assert_eq!(scene.selection(), saved);
    }

    #[test]
    fn test_remove_clears_selection_and_links() {
        let mut scene = MemoryScene::new();
        let root = scene.root_container();
        let group = scene.create_container("G");
        scene.link_container(group, root);
        let object = scene.create_object("Part", MeshData::default());
        scene.link_object(object, group);
        scene.select(&[object]);

        scene.remove_object(object);
        assert!(scene.selection().selected.is_empty());
        assert!(scene.container_objects(group).is_empty());

        scene.remove_container(group);
        assert!(scene.child_containers(root).is_empty());
        scene.remove_container(root);
        assert!(scene.container(root).is_some());
    }
}
