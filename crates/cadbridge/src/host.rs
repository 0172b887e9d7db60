//! The host scene capability
//!
//! The reconciliation engine only ever talks to the host through [`HostScene`]. Handles are
//! plain copyable ids; whether they survive an undo is up to the host, which is why the engine
//! re-derives its id maps from tags before every apply.

use crate::mesh::MeshData;
use std::fmt::Debug;
use std::hash::Hash;

/// Tag identifying a mirrored object or container
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteTag {
    pub remote_id: u32,
    pub filename: String,
}

impl RemoteTag {
    pub fn new(remote_id: u32, filename: impl Into<String>) -> Self {
        Self {
            remote_id,
            filename: filename.into(),
        }
    }
}

/// Tag stored on a container
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContainerTag {
    /// Marks the per-file inbox under which the mirror is rebuilt
    Inbox,
    /// A mirrored group
    Remote(RemoteTag),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InteractionMode {
    #[default]
    Object,
    Edit,
}

/// Selection state saved around geometry-only updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<O> {
    pub active: Option<O>,
    pub selected: Vec<O>,
    pub mode: InteractionMode,
}

impl<O> Default for Selection<O> {
    fn default() -> Self {
        Self {
            active: None,
            selected: Vec::new(),
            mode: InteractionMode::Object,
        }
    }
}

/// Scene operations the bridge needs from its host
///
/// All methods are called from the host's main thread only. Operations on a handle that no
/// longer exists are ignored by the host.
pub trait HostScene {
    type Object: Copy + Eq + Hash + Debug;
    type Container: Copy + Eq + Hash + Debug;

    /// The scene's top-level container
    fn root_container(&self) -> Self::Container;

    fn create_container(&mut self, name: &str) -> Self::Container;

    fn remove_container(&mut self, container: Self::Container);

    fn container_name(&self, container: Self::Container) -> Option<String>;

    fn rename_container(&mut self, container: Self::Container, name: &str);

    fn child_containers(&self, container: Self::Container) -> Vec<Self::Container>;

    fn container_objects(&self, container: Self::Container) -> Vec<Self::Object>;

    fn link_container(&mut self, child: Self::Container, parent: Self::Container);

    /// Detach a container from every parent it is linked under
    fn unlink_container_from_all(&mut self, container: Self::Container);

    fn set_container_hidden(&mut self, container: Self::Container, hidden: bool);

    fn set_container_selectable(&mut self, container: Self::Container, selectable: bool);

    fn container_tag(&self, container: Self::Container) -> Option<ContainerTag>;

    fn set_container_tag(&mut self, container: Self::Container, tag: ContainerTag);

    fn create_object(&mut self, name: &str, mesh: MeshData) -> Self::Object;

    fn remove_object(&mut self, object: Self::Object);

    /// Replace the mesh contents while keeping the object's identity
    fn replace_mesh(&mut self, object: Self::Object, mesh: MeshData);

    fn rename_object(&mut self, object: Self::Object, name: &str);

    fn set_object_scale(&mut self, object: Self::Object, scale: f32);

    fn link_object(&mut self, object: Self::Object, container: Self::Container);

    /// Detach an object from every container it is linked into
    fn unlink_object_from_all(&mut self, object: Self::Object);

    fn set_object_hidden(&mut self, object: Self::Object, hidden: bool);

    fn set_object_selectable(&mut self, object: Self::Object, selectable: bool);

    fn object_tag(&self, object: Self::Object) -> Option<RemoteTag>;

    fn set_object_tag(&mut self, object: Self::Object, tag: RemoteTag);

    /// Open an undo step; nested steps fold into the outermost one
    fn begin_undo_step(&mut self, label: &str);

    fn end_undo_step(&mut self, label: &str);

    fn selection(&self) -> Selection<Self::Object>;

    fn restore_selection(&mut self, selection: &Selection<Self::Object>);

    /// First child of `parent` with the given name
    fn find_child_container(
        &self,
        parent: Self::Container,
        name: &str,
    ) -> Option<Self::Container> {
        self.child_containers(parent)
            .into_iter()
            .find(|child| self.container_name(*child).as_deref() == Some(name))
    }
}
