//! Cadbridge scene mirroring library
//!
//! This library mirrors a CAD server's object graph into a host scene: the reconciliation
//! engine, mesh building, refacet requests and settings, on top of the `cadbridge-network`
//! wire protocol and connection.

pub mod handler;
pub mod host;
pub mod memory_scene;
pub mod mesh;
pub mod mirror;
pub mod refacet;
pub mod settings;

pub mod app {
    pub mod bridge;
    pub mod cli;
}

// Re-export commonly used types
pub use app::bridge::Bridge;
pub use cadbridge_network::{self as network, ConnectionState};
pub use handler::{ReconciliationError, SceneConfig, SceneHandler, SyncReport};
pub use host::{ContainerTag, HostScene, InteractionMode, RemoteTag, Selection};
pub use memory_scene::{ContainerId, MemoryScene, ObjectId, SceneSummary};
pub use mesh::{MeshData, MeshError};
pub use mirror::{FileMirror, IdScope, SceneMirror};
pub use refacet::{FacetSettings, PolygonKind};
pub use settings::{Settings, SettingsError};
