//! Shared types for mirrored objects and the batches that carry them

use serde::{Deserialize, Serialize};

/// Kind of object in the server's object graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ObjectType {
    /// Closed solid body, carries geometry
    Solid = 0,
    /// Open sheet body, carries geometry
    Sheet = 1,
    /// Curve/wire body, no tessellated geometry
    Wire = 2,
    /// Hierarchical container of other objects
    Group = 5,
    /// Placeholder without geometry
    Empty = 6,
}

impl ObjectType {
    /// Convert from the u32 wire representation
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Solid),
            1 => Some(Self::Sheet),
            2 => Some(Self::Wire),
            5 => Some(Self::Group),
            6 => Some(Self::Empty),
            _ => None,
        }
    }

    /// Whether objects of this type carry mesh buffers on the wire
    pub fn has_geometry(self) -> bool {
        matches!(self, Self::Solid | Self::Sheet)
    }

    /// Whether objects of this type live in the group id scope
    pub fn is_group(self) -> bool {
        self == Self::Group
    }
}

/// Visibility and selection flags of a remote object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectFlags(pub u32);

impl ObjectFlags {
    pub const HIDDEN: u32 = 1 << 0;
    pub const VISIBLE: u32 = 1 << 1;
    pub const SELECTABLE: u32 = 1 << 2;

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_hidden(self) -> bool {
        self.0 & Self::HIDDEN != 0
    }

    pub fn is_visible(self) -> bool {
        self.0 & Self::VISIBLE != 0
    }

    pub fn is_selectable(self) -> bool {
        self.0 & Self::SELECTABLE != 0
    }

    /// Hidden in the host when explicitly hidden or not marked visible
    pub fn should_hide(self) -> bool {
        self.is_hidden() || !self.is_visible()
    }
}

/// Tessellated geometry of a solid or sheet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshBuffers {
    /// Flattened vertex positions (x,y,z triplets)
    pub vertices: Vec<f32>,
    /// Triangle vertex indices (one triplet per triangle)
    pub indices: Vec<u32>,
    /// Flattened normals (x,y,z triplets), looked up through `indices`
    pub normals: Vec<f32>,
    /// `(start_loop, loop_count)` pairs demarcating sub-surfaces
    pub groups: Vec<u32>,
    /// One server face id per group pair
    pub face_ids: Vec<u32>,
}

impl MeshBuffers {
    /// Get the number of vertices in the mesh
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    /// Get the number of triangles in the mesh
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Get the number of `(start, count)` face groups
    pub fn group_count(&self) -> usize {
        self.groups.len() / 2
    }

    /// Validate the buffer consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.vertices.len() % 3 != 0 {
            return Err(format!(
                "Vertex component count {} is not divisible by 3",
                self.vertices.len()
            ));
        }

        if self.indices.len() % 3 != 0 {
            return Err(format!(
                "Index count {} is not divisible by 3",
                self.indices.len()
            ));
        }

        if self.normals.len() % 3 != 0 {
            return Err(format!(
                "Normal component count {} is not divisible by 3",
                self.normals.len()
            ));
        }

        if let Some(&max_index) = self.indices.iter().max() {
            if max_index as usize >= self.vertex_count() {
                return Err(format!(
                    "Index {} exceeds vertex count {}",
                    max_index,
                    self.vertex_count()
                ));
            }
        }

        if self.groups.len() % 2 != 0 {
            return Err(format!(
                "Group array length {} is not a sequence of pairs",
                self.groups.len()
            ));
        }

        Ok(())
    }
}

/// One object of the server's graph as carried by add/update/list batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub object_type: ObjectType,
    /// Server id, unique within the item or group scope; 0 is the implicit root group
    pub id: u32,
    pub version: u32,
    /// Id of the containing group, 0 for the root
    pub parent_id: i32,
    pub material_id: i32,
    pub flags: ObjectFlags,
    pub name: String,
    /// Present only for solids and sheets
    pub geometry: Option<MeshBuffers>,
}

impl RemoteObject {
    /// Create a group object without geometry
    pub fn group(id: u32, parent_id: i32, name: impl Into<String>) -> Self {
        Self {
            object_type: ObjectType::Group,
            id,
            version: 0,
            parent_id,
            material_id: -1,
            flags: ObjectFlags(ObjectFlags::VISIBLE | ObjectFlags::SELECTABLE),
            name: name.into(),
            geometry: None,
        }
    }

    /// Create a solid object carrying the given geometry
    pub fn solid(id: u32, parent_id: i32, name: impl Into<String>, geometry: MeshBuffers) -> Self {
        Self {
            object_type: ObjectType::Solid,
            id,
            version: 0,
            parent_id,
            material_id: -1,
            flags: ObjectFlags(ObjectFlags::VISIBLE | ObjectFlags::SELECTABLE),
            name: name.into(),
            geometry: Some(geometry),
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = ObjectFlags(flags);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Whether this is the implicit root group
    pub fn is_root(&self) -> bool {
        self.id == 0
    }
}

/// Incremental batch of mutations tied to a file version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub filename: String,
    pub version: u32,
    pub delete: Vec<u32>,
    pub add: Vec<RemoteObject>,
    pub update: Vec<RemoteObject>,
}

impl Transaction {
    pub fn new(filename: impl Into<String>, version: u32) -> Self {
        Self {
            filename: filename.into(),
            version,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.add.is_empty() && self.update.is_empty()
    }
}

/// Which list request produced a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListKind {
    All,
    Some,
    Visible,
}

impl ListKind {
    /// Message type of the request and its response
    pub fn message_type(self) -> crate::protocol::MessageType {
        use crate::protocol::MessageType;
        match self {
            Self::All => MessageType::ListAll,
            Self::Some => MessageType::ListSome,
            Self::Visible => MessageType::ListVisible,
        }
    }
}

/// Complete enumeration of the live objects of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSnapshot {
    pub kind: ListKind,
    pub filename: String,
    pub version: u32,
    pub add: Vec<RemoteObject>,
}

/// Re-tessellated geometry of one already-mirrored object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefacetItem {
    pub id: u32,
    pub version: u32,
    /// Polygon id per loop; runs of equal values form one polygon. Empty for triangles.
    pub faces: Vec<u32>,
    pub positions: Vec<f32>,
    pub indices: Vec<u32>,
    pub normals: Vec<f32>,
    pub groups: Vec<u32>,
    pub face_ids: Vec<u32>,
}

/// Body of a successful refacet response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefacetResult {
    pub filename: String,
    pub version: u32,
    pub items: Vec<RefacetItem>,
}

/// A response envelope that carried a non-200 status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFailure {
    pub message_type: crate::protocol::MessageType,
    pub request_id: u32,
    pub code: u32,
}
