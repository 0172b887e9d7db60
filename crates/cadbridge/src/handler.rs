//! Scene reconciliation
//!
//! [`SceneHandler`] applies transactions, list snapshots and refacet results to a
//! [`HostScene`]. Before every apply the id maps of the file are rebuilt from the tags found
//! under its inbox container, since a host undo may have replaced every handle since the last
//! apply. Each apply is wrapped in exactly one undo step.

use crate::host::{ContainerTag, HostScene, RemoteTag};
use crate::mesh::{MeshData, MeshError};
use crate::mirror::{FileMirror, IdScope, SceneMirror};
use cadbridge_network::{
    BridgeHandler, ListSnapshot, ObjectType, RefacetResult, RemoteObject, RequestFailure,
    Transaction,
};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_BRIDGE_CONTAINER: &str = "Cadbridge";
pub const INBOX_NAME: &str = "Inbox";

const UPDATE_STEP: &str = "Cadbridge update";
const REFACET_STEP: &str = "Cadbridge refacet";

/// Per-object failure; the object is skipped and the rest of the batch applies
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconciliationError {
    #[error("{object_type:?} {id} references missing parent {parent_id}")]
    MissingParent {
        object_type: ObjectType,
        id: u32,
        parent_id: i32,
    },

    #[error("{object_type:?} {id} carries no geometry")]
    MissingGeometry { object_type: ObjectType, id: u32 },

    #[error("Object {id} has invalid geometry: {source}")]
    InvalidGeometry {
        id: u32,
        #[source]
        source: MeshError,
    },
}

/// Outcome of one apply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub filename: String,
    pub version: u32,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub linked: usize,
    pub errors: Vec<ReconciliationError>,
}

impl SyncReport {
    fn new(filename: &str, version: u32) -> Self {
        Self {
            filename: filename.to_owned(),
            version,
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn push_error(&mut self, err: ReconciliationError) {
        warn!("{}: {}", self.filename, err);
        self.errors.push(err);
    }
}

/// Placement of the mirror inside the host scene
#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    /// Top-level container holding one container per file
    pub bridge_container: String,
    /// Uniform scale given to newly created objects
    pub unit_scale: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            bridge_container: DEFAULT_BRIDGE_CONTAINER.to_owned(),
            unit_scale: 1.0,
        }
    }
}

pub struct SceneHandler<H: HostScene> {
    scene: H,
    config: SceneConfig,
    mirror: SceneMirror<H::Object, H::Container>,
    versions: HashMap<String, u32>,
    connected: bool,
    busy: bool,
    last_report: Option<SyncReport>,
    last_failure: Option<RequestFailure>,
}

impl<H: HostScene> SceneHandler<H> {
    pub fn new(scene: H, config: SceneConfig) -> Self {
        Self {
            scene,
            config,
            mirror: SceneMirror::default(),
            versions: HashMap::new(),
            connected: false,
            busy: false,
            last_report: None,
            last_failure: None,
        }
    }

    pub fn scene(&self) -> &H {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut H {
        &mut self.scene
    }

    pub fn into_scene(self) -> H {
        self.scene
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Maps left behind by the most recent apply of each file
    pub fn mirror(&self) -> &SceneMirror<H::Object, H::Container> {
        &self.mirror
    }

    /// Latest version seen for a file
    pub fn version(&self, filename: &str) -> Option<u32> {
        self.versions.get(filename).copied()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether a request is awaiting its response
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn mark_busy(&mut self) {
        self.busy = true;
    }

    pub fn last_report(&self) -> Option<&SyncReport> {
        self.last_report.as_ref()
    }

    pub fn last_failure(&self) -> Option<RequestFailure> {
        self.last_failure
    }

    fn record_version(&mut self, filename: &str, version: u32) {
        self.versions.insert(filename.to_owned(), version);
    }

    fn reset(&mut self) {
        self.mirror.clear();
        self.versions.clear();
        self.busy = false;
        self.last_failure = None;
    }

    /// Inbox container of a file, if it exists
    pub fn find_inbox(&self, filename: &str) -> Option<H::Container> {
        let scene = &self.scene;
        let bridge =
            scene.find_child_container(scene.root_container(), &self.config.bridge_container)?;
        let file = scene.find_child_container(bridge, filename)?;
        scene
            .child_containers(file)
            .into_iter()
            .find(|child| scene.container_tag(*child) == Some(ContainerTag::Inbox))
    }

    fn ensure_inbox(&mut self, filename: &str) -> H::Container {
        if let Some(inbox) = self.find_inbox(filename) {
            return inbox;
        }

        let root = self.scene.root_container();
        let bridge = match self
            .scene
            .find_child_container(root, &self.config.bridge_container)
        {
            Some(bridge) => bridge,
            None => {
                let bridge = self.scene.create_container(&self.config.bridge_container);
                self.scene.link_container(bridge, root);
                bridge
            }
        };

        let file = match self.scene.find_child_container(bridge, filename) {
            Some(file) => file,
            None => {
                let file = self.scene.create_container(filename);
                self.scene.link_container(file, bridge);
                file
            }
        };

        debug!("Creating inbox for {}", filename);
        let inbox = self.scene.create_container(INBOX_NAME);
        self.scene.link_container(inbox, file);
        self.scene.set_container_tag(inbox, ContainerTag::Inbox);
        inbox
    }

    /// Locate or create the inbox and rebuild the file's maps from it
    fn prepare(&mut self, filename: &str) -> (H::Container, FileMirror<H::Object, H::Container>) {
        let inbox = self.ensure_inbox(filename);
        let mirror = FileMirror::rebuild(&self.scene, inbox, filename);
        (inbox, mirror)
    }

    fn finish(
        &mut self,
        mirror: FileMirror<H::Object, H::Container>,
        report: SyncReport,
    ) -> SyncReport {
        self.mirror.insert(mirror);
        info!(
            "{} v{}: {} created, {} updated, {} deleted, {} linked, {} errors",
            report.filename,
            report.version,
            report.created,
            report.updated,
            report.deleted,
            report.linked,
            report.errors.len()
        );
        self.last_report = Some(report.clone());
        report
    }

    /// Apply an incremental transaction: deletes, then adds, then updates
    pub fn apply_transaction(&mut self, transaction: &Transaction) -> SyncReport {
        let filename = transaction.filename.as_str();
        info!("Updating {} to version {}", filename, transaction.version);
        self.record_version(filename, transaction.version);

        self.scene.begin_undo_step(UPDATE_STEP);
        let mut report = SyncReport::new(filename, transaction.version);
        let (inbox, mut mirror) = self.prepare(filename);

        for id in &transaction.delete {
            match mirror.remove_item(*id) {
                Some(object) => {
                    self.scene.remove_object(object);
                    report.deleted += 1;
                }
                None => trace!("Delete of unknown item {} ignored", id),
            }
        }

        self.replace_objects(inbox, &mut mirror, &transaction.add, &mut report);
        self.replace_objects(inbox, &mut mirror, &transaction.update, &mut report);
        self.scene.end_undo_step(UPDATE_STEP);

        self.finish(mirror, report)
    }

    /// Apply a complete snapshot, deleting every mapped id it does not mention
    pub fn apply_list_snapshot(&mut self, snapshot: &ListSnapshot) -> SyncReport {
        let filename = snapshot.filename.as_str();
        info!("Updating {} to version {}", filename, snapshot.version);
        self.record_version(filename, snapshot.version);

        self.scene.begin_undo_step(UPDATE_STEP);
        let mut report = SyncReport::new(filename, snapshot.version);
        let (inbox, mut mirror) = self.prepare(filename);

        let mut live_items = HashSet::new();
        let mut live_groups = HashSet::new();
        for object in &snapshot.add {
            match IdScope::of(object.object_type) {
                IdScope::Item => live_items.insert(object.id),
                IdScope::Group => live_groups.insert(object.id),
            };
        }

        self.replace_objects(inbox, &mut mirror, &snapshot.add, &mut report);

        for id in mirror.ids(IdScope::Item) {
            if !live_items.contains(&id) {
                if let Some(object) = mirror.remove_item(id) {
                    self.scene.remove_object(object);
                    report.deleted += 1;
                }
            }
        }
        for id in mirror.ids(IdScope::Group) {
            if !live_groups.contains(&id) {
                if let Some(container) = mirror.remove_group(id) {
                    self.scene.remove_container(container);
                    report.deleted += 1;
                }
            }
        }
        self.scene.end_undo_step(UPDATE_STEP);

        self.finish(mirror, report)
    }

    /// Replace the meshes of known items, leaving structure and selection untouched
    pub fn apply_refacet(&mut self, result: &RefacetResult) -> SyncReport {
        let filename = result.filename.as_str();
        info!("Refaceting {} to version {}", filename, result.version);
        self.record_version(filename, result.version);

        self.scene.begin_undo_step(REFACET_STEP);
        let mut report = SyncReport::new(filename, result.version);
        // Refacets never create containers
        let Some(inbox) = self.find_inbox(filename) else {
            warn!("No inbox for {}, refacet ignored", filename);
            self.scene.end_undo_step(REFACET_STEP);
            self.last_report = Some(report.clone());
            return report;
        };
        let mirror = FileMirror::rebuild(&self.scene, inbox, filename);

        let selection = self.scene.selection();
        for item in &result.items {
            let Some(object) = mirror.item(item.id) else {
                trace!("Refacet of unknown item {} skipped", item.id);
                continue;
            };
            match MeshData::from_facets(item) {
                Ok(mesh) => {
                    self.scene.replace_mesh(object, mesh);
                    report.updated += 1;
                }
                Err(source) => report.push_error(ReconciliationError::InvalidGeometry {
                    id: item.id,
                    source,
                }),
            }
        }
        self.scene.restore_selection(&selection);
        self.scene.end_undo_step(REFACET_STEP);

        self.finish(mirror, report)
    }

    /// Upsert every object, then link each one under its parent
    fn replace_objects(
        &mut self,
        inbox: H::Container,
        mirror: &mut FileMirror<H::Object, H::Container>,
        objects: &[RemoteObject],
        report: &mut SyncReport,
    ) {
        let filename = mirror.filename().to_owned();
        let mut moved_groups = Vec::new();
        let mut failed_items = HashSet::new();

        for object in objects {
            if object.is_root() {
                continue;
            }
            match object.object_type {
                ObjectType::Solid | ObjectType::Sheet => {
                    let Some(geometry) = &object.geometry else {
                        report.push_error(ReconciliationError::MissingGeometry {
                            object_type: object.object_type,
                            id: object.id,
                        });
                        failed_items.insert(object.id);
                        continue;
                    };
                    let mesh = match MeshData::from_buffers(geometry) {
                        Ok(mesh) => mesh,
                        Err(source) => {
                            report.push_error(ReconciliationError::InvalidGeometry {
                                id: object.id,
                                source,
                            });
                            failed_items.insert(object.id);
                            continue;
                        }
                    };

                    match mirror.item(object.id) {
                        None => {
                            let handle = self.scene.create_object(&object.name, mesh);
                            self.scene
                                .set_object_tag(handle, RemoteTag::new(object.id, filename.as_str()));
                            self.scene.set_object_scale(handle, self.config.unit_scale);
                            mirror.insert_item(object.id, handle);
                            report.created += 1;
                        }
                        Some(handle) => {
                            self.scene.replace_mesh(handle, mesh);
                            self.scene.rename_object(handle, &object.name);
                            self.scene.unlink_object_from_all(handle);
                            report.updated += 1;
                        }
                    }
                }
                ObjectType::Group => match mirror.group(object.id) {
                    None => {
                        let handle = self.scene.create_container(&object.name);
                        self.scene.set_container_tag(
                            handle,
                            ContainerTag::Remote(RemoteTag::new(object.id, filename.as_str())),
                        );
                        mirror.insert_group(object.id, handle);
                        report.created += 1;
                    }
                    Some(handle) => {
                        self.scene.rename_container(handle, &object.name);
                        moved_groups.push(handle);
                        report.updated += 1;
                    }
                },
                ObjectType::Wire | ObjectType::Empty => {
                    trace!("Skipping {:?} {}", object.object_type, object.id);
                }
            }
        }

        // Groups may have moved
        for group in moved_groups {
            self.scene.unlink_container_from_all(group);
        }

        for object in objects {
            if object.is_root() {
                continue;
            }
            let scope = match object.object_type {
                ObjectType::Solid | ObjectType::Sheet => IdScope::Item,
                ObjectType::Group => IdScope::Group,
                ObjectType::Wire | ObjectType::Empty => continue,
            };
            // Failed objects keep their previous links and flags
            if !mirror.contains(scope, object.id)
                || (scope == IdScope::Item && failed_items.contains(&object.id))
            {
                continue;
            }

            let parent = match object.parent_id {
                0 => Some(inbox),
                parent_id if parent_id > 0 => mirror.group(parent_id as u32),
                _ => None,
            };
            let Some(parent) = parent else {
                report.push_error(ReconciliationError::MissingParent {
                    object_type: object.object_type,
                    id: object.id,
                    parent_id: object.parent_id,
                });
                continue;
            };

            let hidden = object.flags.should_hide();
            let selectable = object.flags.is_selectable();
            match scope {
                IdScope::Item => {
                    if let Some(handle) = mirror.item(object.id) {
                        self.scene.link_object(handle, parent);
                        self.scene.set_object_hidden(handle, hidden);
                        self.scene.set_object_selectable(handle, selectable);
                    }
                }
                IdScope::Group => {
                    if let Some(handle) = mirror.group(object.id) {
                        self.scene.link_container(handle, parent);
                        self.scene.set_container_hidden(handle, hidden);
                        self.scene.set_container_selectable(handle, selectable);
                    }
                }
            }
            report.linked += 1;
        }
    }
}

impl<H: HostScene> BridgeHandler for SceneHandler<H> {
    fn on_connect(&mut self) {
        info!("Connected, clearing mirror");
        self.reset();
        self.connected = true;
    }

    fn on_disconnect(&mut self) {
        info!("Disconnected");
        self.reset();
        self.connected = false;
    }

    fn on_transaction(&mut self, transaction: Transaction) {
        self.busy = false;
        self.apply_transaction(&transaction);
    }

    fn on_list(&mut self, snapshot: ListSnapshot) {
        self.busy = false;
        self.apply_list_snapshot(&snapshot);
    }

    fn on_refacet(&mut self, result: RefacetResult) {
        self.busy = false;
        self.apply_refacet(&result);
    }

    fn on_new_version(&mut self, filename: &str, version: u32) {
        info!("New version of {}: {}", filename, version);
        self.record_version(filename, version);
    }

    fn on_request_failed(&mut self, failure: RequestFailure) {
        self.busy = false;
        error!(
            "{:?} request {} failed with code: {}",
            failure.message_type, failure.request_id, failure.code
        );
        self.last_failure = Some(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InteractionMode, Selection};
    use crate::memory_scene::MemoryScene;
    use cadbridge_network::{ListKind, MeshBuffers, MessageType, ObjectFlags, RefacetItem};

    const FILE: &str = "bracket.plasticity";

    fn triangle() -> MeshBuffers {
        MeshBuffers {
            vertices: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            indices: vec![0, 1, 2],
            normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            groups: vec![0, 3],
            face_ids: vec![11],
        }
    }

    fn quad_facets(id: u32) -> RefacetItem {
        RefacetItem {
            id,
            version: 2,
            faces: vec![4, 4, 4, 4],
            positions: vec![
                0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0,
            ],
            indices: vec![0, 1, 2, 3],
            normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            groups: vec![0, 4],
            face_ids: vec![21],
        }
    }

    fn handler() -> SceneHandler<MemoryScene> {
        SceneHandler::new(MemoryScene::new(), SceneConfig::default())
    }

    fn snapshot(add: Vec<RemoteObject>) -> ListSnapshot {
        ListSnapshot {
            kind: ListKind::All,
            filename: FILE.into(),
            version: 1,
            add,
        }
    }

    fn item_ids(handler: &SceneHandler<MemoryScene>) -> Vec<u32> {
        handler
            .mirror()
            .get(FILE)
            .map(|m| m.ids(IdScope::Item).into_iter().collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_snapshot_creates_then_deletes() {
        let mut handler = handler();
        let report =
            handler.apply_list_snapshot(&snapshot(vec![RemoteObject::solid(5, 0, "Plate", triangle())]));
        assert_eq!(report.created, 1);
        assert_eq!(report.linked, 1);
        assert!(report.is_clean());

        let inbox = handler.find_inbox(FILE).unwrap();
        let scene = handler.scene();
        let object = scene.find_object(5, FILE).unwrap();
        assert_eq!(scene.object_parents(object), vec![inbox]);
        assert_eq!(scene.container_name(inbox).as_deref(), Some(INBOX_NAME));

        let report = handler.apply_list_snapshot(&snapshot(vec![]));
        assert_eq!(report.deleted, 1);
        assert!(handler.scene().find_object(5, FILE).is_none());
        assert!(item_ids(&handler).is_empty());
    }

    #[test]
    fn test_delete_of_unknown_id_is_noop() {
        let mut handler = handler();
        handler.apply_list_snapshot(&snapshot(vec![RemoteObject::solid(4, 0, "A", triangle())]));

        let mut transaction = Transaction::new(FILE, 2);
        transaction.delete = vec![5];
        let report = handler.apply_transaction(&transaction);
        assert!(report.is_clean());
        assert_eq!(report.deleted, 0);
        assert_eq!(item_ids(&handler), vec![4]);
        assert_eq!(handler.version(FILE), Some(2));
    }

    #[test]
    fn test_moved_group_has_one_parent() {
        let mut handler = handler();
        let mut first = Transaction::new(FILE, 1);
        first.add = vec![
            RemoteObject::group(1, 0, "A"),
            RemoteObject::group(2, 0, "B"),
            RemoteObject::group(3, 1, "Moving"),
        ];
        handler.apply_transaction(&first);

        let mut second = Transaction::new(FILE, 2);
        second.update = vec![RemoteObject::group(3, 2, "Moved")];
        let report = handler.apply_transaction(&second);
        assert_eq!(report.updated, 1);

        let scene = handler.scene();
        let moving = scene.find_group(3, FILE).unwrap();
        let b = scene.find_group(2, FILE).unwrap();
        assert_eq!(scene.container_parents(moving), vec![b]);
        assert_eq!(scene.container_name(moving).as_deref(), Some("Moved"));
    }

    #[test]
    fn test_updated_object_keeps_identity() {
        let mut handler = handler();
        let mut first = Transaction::new(FILE, 1);
        first.add = vec![
            RemoteObject::group(9, 0, "G"),
            RemoteObject::solid(5, 0, "Plate", triangle()),
        ];
        handler.apply_transaction(&first);
        let before = handler.scene().find_object(5, FILE).unwrap();

        let mut second = Transaction::new(FILE, 2);
        second.update = vec![RemoteObject::solid(5, 9, "Plate.1", triangle())];
        handler.apply_transaction(&second);

        let scene = handler.scene();
        assert_eq!(scene.find_object(5, FILE), Some(before));
        assert_eq!(scene.object(before).unwrap().name, "Plate.1");
        let group = scene.find_group(9, FILE).unwrap();
        assert_eq!(scene.object_parents(before), vec![group]);
    }

    #[test]
    fn test_transaction_then_snapshot_converges() {
        let objects = vec![
            RemoteObject::group(1, 0, "G"),
            RemoteObject::solid(2, 1, "A", triangle()),
            RemoteObject::solid(1, 0, "B", triangle()),
        ];

        let mut incremental = handler();
        let mut transaction = Transaction::new(FILE, 1);
        transaction.add = objects.clone();
        transaction.add.push(RemoteObject::solid(3, 0, "Gone", triangle()));
        incremental.apply_transaction(&transaction);
        incremental.apply_list_snapshot(&snapshot(objects.clone()));

        let mut fresh = handler();
        fresh.apply_list_snapshot(&snapshot(objects));

        for scope in [IdScope::Item, IdScope::Group] {
            assert_eq!(
                incremental.mirror().get(FILE).unwrap().ids(scope),
                fresh.mirror().get(FILE).unwrap().ids(scope)
            );
        }
        assert_eq!(incremental.scene().summary(), fresh.scene().summary());
    }

    #[test]
    fn test_missing_parent_skips_only_that_object() {
        let mut handler = handler();
        let mut transaction = Transaction::new(FILE, 1);
        transaction.add = vec![
            RemoteObject::solid(1, 99, "Orphan", triangle()),
            RemoteObject::solid(2, -3, "Negative", triangle()),
            RemoteObject::solid(3, 0, "Fine", triangle()),
        ];
        let report = handler.apply_transaction(&transaction);

        assert_eq!(report.linked, 1);
        assert_eq!(report.errors.len(), 2);
        assert!(matches!(
            report.errors[0],
            ReconciliationError::MissingParent { id: 1, parent_id: 99, .. }
        ));
        let scene = handler.scene();
        let fine = scene.find_object(3, FILE).unwrap();
        assert_eq!(scene.object_parents(fine).len(), 1);
        let orphan = scene.find_object(1, FILE).unwrap();
        assert!(scene.object_parents(orphan).is_empty());
    }

    #[test]
    fn test_invalid_geometry_reported() {
        let mut handler = handler();
        let mut broken = triangle();
        broken.indices = vec![0, 1, 7];
        let mut transaction = Transaction::new(FILE, 1);
        transaction.add = vec![
            RemoteObject::solid(1, 0, "Broken", broken),
            RemoteObject::solid(2, 0, "Fine", triangle()),
        ];
        let report = handler.apply_transaction(&transaction);

        assert_eq!(report.created, 1);
        assert!(matches!(
            report.errors.as_slice(),
            [ReconciliationError::InvalidGeometry {
                id: 1,
                source: MeshError::IndexOutOfRange { index: 7, .. }
            }]
        ));
    }

    #[test]
    fn test_invalid_update_keeps_previous_parent() {
        let mut handler = handler();
        let mut transaction = Transaction::new(FILE, 1);
        transaction.add = vec![
            RemoteObject::group(9, 0, "Body"),
            RemoteObject::solid(5, 0, "Plate", triangle()),
        ];
        handler.apply_transaction(&transaction);
        let inbox = handler.find_inbox(FILE).unwrap();

        let mut broken = triangle();
        broken.indices = vec![0, 1, 7];
        let mut transaction = Transaction::new(FILE, 2);
        transaction.update =
            vec![RemoteObject::solid(5, 9, "Plate", broken).with_flags(ObjectFlags::HIDDEN)];
        let report = handler.apply_transaction(&transaction);

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.updated, 0);
        assert_eq!(report.linked, 0);

        let scene = handler.scene();
        let plate = scene.find_object(5, FILE).unwrap();
        assert_eq!(scene.object_parents(plate), vec![inbox]);
        assert!(!scene.object(plate).unwrap().hidden);
        assert_eq!(scene.object(plate).unwrap().mesh.polygon_count(), 1);
    }

    #[test]
    fn test_flags_and_scale() {
        let mut handler = SceneHandler::new(
            MemoryScene::new(),
            SceneConfig {
                unit_scale: 0.001,
                ..Default::default()
            },
        );
        let mut transaction = Transaction::new(FILE, 1);
        transaction.add = vec![
            RemoteObject::group(1, 0, "Hidden").with_flags(ObjectFlags::HIDDEN),
            RemoteObject::solid(2, 1, "Locked", triangle()).with_flags(ObjectFlags::VISIBLE),
            RemoteObject::solid(3, 1, "Normal", triangle()),
        ];
        handler.apply_transaction(&transaction);

        let scene = handler.scene();
        let group = scene.container(scene.find_group(1, FILE).unwrap()).unwrap();
        assert!(group.hidden);
        assert!(!group.selectable);

        let locked = scene.object(scene.find_object(2, FILE).unwrap()).unwrap();
        assert!(!locked.hidden);
        assert!(!locked.selectable);
        assert_eq!(locked.scale, 0.001);

        let normal = scene.object(scene.find_object(3, FILE).unwrap()).unwrap();
        assert!(!normal.hidden);
        assert!(normal.selectable);
    }

    #[test]
    fn test_wires_and_root_are_skipped() {
        let mut handler = handler();
        let mut wire = RemoteObject::group(4, 0, "Curve");
        wire.object_type = ObjectType::Wire;
        let mut transaction = Transaction::new(FILE, 1);
        transaction.add = vec![RemoteObject::group(0, 0, "Root"), wire];
        let report = handler.apply_transaction(&transaction);

        assert!(report.is_clean());
        assert_eq!(report.created + report.linked, 0);
        assert_eq!(handler.scene().summary().objects, 0);
    }

    #[test]
    fn test_rebuild_after_undo() {
        let mut handler = handler();
        handler.apply_list_snapshot(&snapshot(vec![RemoteObject::solid(5, 0, "Plate", triangle())]));

        let mut transaction = Transaction::new(FILE, 2);
        transaction.add = vec![RemoteObject::solid(6, 0, "Extra", triangle())];
        handler.apply_transaction(&transaction);
        let cached = handler.mirror().get(FILE).unwrap().item(5).unwrap();

        assert!(handler.scene_mut().undo());
        assert!(handler.scene().object(cached).is_none());

        let mut update = Transaction::new(FILE, 3);
        update.update = vec![RemoteObject::solid(5, 0, "Plate", triangle())];
        let report = handler.apply_transaction(&update);
        assert_eq!(report.created, 0);
        assert_eq!(report.updated, 1);
        assert_eq!(handler.scene().summary().objects, 1);
        assert_eq!(item_ids(&handler), vec![5]);
    }

    #[test]
    fn test_refacet_replaces_geometry_only() {
        let mut handler = handler();
        handler.apply_list_snapshot(&snapshot(vec![
            RemoteObject::group(1, 0, "G"),
            RemoteObject::solid(5, 1, "Plate", triangle()),
        ]));
        let object = handler.scene().find_object(5, FILE).unwrap();
        let parents = handler.scene().object_parents(object);
        let summary = handler.scene().summary();

        handler.scene_mut().select(&[object]);
        handler.scene_mut().set_mode(InteractionMode::Edit);
        let selection = handler.scene().selection();

        let report = handler.apply_refacet(&RefacetResult {
            filename: FILE.into(),
            version: 2,
            items: vec![quad_facets(5), quad_facets(77)],
        });
        assert_eq!(report.updated, 1);
        assert_eq!(report.created + report.deleted + report.linked, 0);

        let scene = handler.scene();
        let mesh = &scene.object(object).unwrap().mesh;
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.polygon_loops(0), Some(&[0, 1, 2, 3][..]));
        assert_eq!(mesh.face_id_of_polygon(0), Some(21));
        assert_eq!(scene.object_parents(object), parents);
        assert_eq!(scene.summary().containers, summary.containers);
        assert_eq!(scene.selection(), selection);
    }

    #[test]
    fn test_refacet_without_inbox_creates_nothing() {
        let mut handler = handler();
        let containers = handler.scene().summary().containers;
        let report = handler.apply_refacet(&RefacetResult {
            filename: "other.plasticity".into(),
            version: 1,
            items: vec![quad_facets(1)],
        });
        assert_eq!(report.updated, 0);
        assert_eq!(handler.scene().summary().containers, containers);
        assert_eq!(handler.scene().selection(), Selection::default());
    }

    #[test]
    fn test_files_are_isolated() {
        let mut handler = handler();
        handler.apply_list_snapshot(&snapshot(vec![RemoteObject::solid(1, 0, "A", triangle())]));
        handler.apply_list_snapshot(&ListSnapshot {
            kind: ListKind::All,
            filename: "other.plasticity".into(),
            version: 1,
            add: vec![],
        });

        assert!(handler.scene().find_object(1, FILE).is_some());
        assert_ne!(handler.find_inbox(FILE), handler.find_inbox("other.plasticity"));
    }

    #[test]
    fn test_callbacks_clear_state() {
        let mut handler = handler();
        handler.on_connect();
        assert!(handler.is_connected());

        handler.mark_busy();
        handler.on_list(snapshot(vec![RemoteObject::solid(1, 0, "A", triangle())]));
        assert!(!handler.is_busy());
        handler.on_new_version(FILE, 4);
        assert_eq!(handler.version(FILE), Some(4));

        handler.mark_busy();
        handler.on_request_failed(RequestFailure {
            message_type: MessageType::RefacetSome,
            request_id: 2,
            code: 404,
        });
        assert!(!handler.is_busy());
        assert_eq!(handler.last_failure().map(|f| f.code), Some(404));
        assert_eq!(handler.last_report().map(|r| r.created), Some(1));

        handler.on_disconnect();
        assert!(!handler.is_connected());
        assert!(handler.mirror().is_empty());
        assert_eq!(handler.version(FILE), None);
        // Scene contents survive a disconnect
        assert!(handler.scene().find_object(1, FILE).is_some());
    }
}
