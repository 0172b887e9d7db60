//! Message encoding and decoding
//!
//! Pure functions between typed values and frame payloads. Client side: [`encode_request`] and
//! [`decode_message`]. Server side, used by [`crate::peer`] and tests: [`decode_request`] and
//! the `encode_*` response builders.

use crate::protocol::{MessageType, ProtocolError, STATUS_OK};
use crate::request::{FacetShape, RefacetParams, Request};
use crate::types::{
    ListKind, ListSnapshot, MeshBuffers, ObjectFlags, ObjectType, RefacetItem, RefacetResult,
    RemoteObject, RequestFailure, Transaction,
};
use crate::wire::{WireReader, WireWriter};
use tracing::{debug, trace, warn};

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Pushed change set of a subscribed file
    Transaction(Transaction),
    /// Response to one of the list requests
    List {
        request_id: u32,
        snapshot: ListSnapshot,
    },
    /// Response to a refacet request
    Refacet {
        request_id: u32,
        result: RefacetResult,
    },
    NewVersion {
        filename: String,
        version: u32,
    },
    NewFile {
        filename: String,
    },
    /// A response envelope with a non-200 status; the body was not parsed
    Failure(RequestFailure),
    /// A known message type the client has nothing to do with
    Ignored(MessageType),
}

impl Message {
    /// Filename the message refers to, if any
    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::Transaction(transaction) => Some(&transaction.filename),
            Self::List { snapshot, .. } => Some(&snapshot.filename),
            Self::Refacet { result, .. } => Some(&result.filename),
            Self::NewVersion { filename, .. } | Self::NewFile { filename } => Some(filename),
            Self::Failure(_) | Self::Ignored(_) => None,
        }
    }
}

fn read_message_type(reader: &mut WireReader<'_>) -> Result<MessageType, ProtocolError> {
    let raw = reader.u32()?;
    MessageType::from_u32(raw).ok_or(ProtocolError::InvalidMessageType(raw))
}

/// Decode one inbound frame payload
pub fn decode_message(payload: &[u8]) -> Result<Message, ProtocolError> {
    let mut reader = WireReader::new(payload);
    let message_type = read_message_type(&mut reader)?;

    trace!(
        "Decoding {:?} message ({} bytes)",
        message_type,
        payload.len()
    );

    match message_type {
        MessageType::Transaction => {
            let transaction = decode_batch(&mut reader, false)?;
            Ok(Message::Transaction(transaction))
        }
        MessageType::ListAll | MessageType::ListSome | MessageType::ListVisible => {
            let request_id = reader.u32()?;
            let code = reader.u32()?;
            if code != STATUS_OK {
                return Ok(Message::Failure(RequestFailure {
                    message_type,
                    request_id,
                    code,
                }));
            }

            let batch = decode_batch(&mut reader, true)?;
            let kind = match message_type {
                MessageType::ListSome => ListKind::Some,
                MessageType::ListVisible => ListKind::Visible,
                _ => ListKind::All,
            };

            Ok(Message::List {
                request_id,
                snapshot: ListSnapshot {
                    kind,
                    filename: batch.filename,
                    version: batch.version,
                    add: batch.add,
                },
            })
        }
        MessageType::RefacetSome => {
            let request_id = reader.u32()?;
            let code = reader.u32()?;
            if code != STATUS_OK {
                return Ok(Message::Failure(RequestFailure {
                    message_type,
                    request_id,
                    code,
                }));
            }

            let result = decode_refacet_body(&mut reader)?;
            Ok(Message::Refacet { request_id, result })
        }
        MessageType::NewVersion => {
            let filename = reader.string()?;
            let version = reader.u32()?;
            Ok(Message::NewVersion { filename, version })
        }
        MessageType::NewFile => {
            let filename = reader.string()?;
            Ok(Message::NewFile { filename })
        }
        other => Ok(Message::Ignored(other)),
    }
}

/// `filename | version | itemCount | items`, shared by transactions and list responses
///
/// A list response is a snapshot: its updates fold into the add batch and deletes are dropped.
fn decode_batch(reader: &mut WireReader<'_>, as_snapshot: bool) -> Result<Transaction, ProtocolError> {
    let filename = reader.string()?;
    let version = reader.u32()?;
    let item_count = reader.u32()?;

    debug!(
        "Batch for {} version {} with {} items",
        filename, version, item_count
    );

    let mut transaction = Transaction::new(filename, version);

    for _ in 0..item_count {
        let item_length = reader.u32()? as usize;
        let mut item = reader.sub_reader(item_length)?;
        let item_type = read_message_type(&mut item)?;

        match item_type {
            MessageType::Delete => {
                let count = item.u32()? as usize;
                let ids = item.u32_values(count)?;
                if as_snapshot {
                    warn!("Ignoring {} deletes inside a list response", ids.len());
                } else {
                    transaction.delete.extend(ids);
                }
            }
            MessageType::Add => {
                let objects = decode_objects(&mut item)?;
                transaction.add.extend(objects);
            }
            MessageType::Update => {
                let objects = decode_objects(&mut item)?;
                if as_snapshot {
                    transaction.add.extend(objects);
                } else {
                    transaction.update.extend(objects);
                }
            }
            MessageType::Move | MessageType::Attribute => {
                trace!("Skipping {:?} item ({} bytes)", item_type, item_length);
            }
            other => {
                warn!("Skipping unexpected {:?} item inside a batch", other);
            }
        }
    }

    Ok(transaction)
}

fn decode_objects(reader: &mut WireReader<'_>) -> Result<Vec<RemoteObject>, ProtocolError> {
    let count = reader.u32()? as usize;
    // Every object header is at least 28 bytes
    let mut objects = Vec::with_capacity(count.min(reader.remaining() / 28));
    for _ in 0..count {
        objects.push(decode_object(reader)?);
    }
    Ok(objects)
}

fn decode_object(reader: &mut WireReader<'_>) -> Result<RemoteObject, ProtocolError> {
    let raw_type = reader.u32()?;
    let object_type =
        ObjectType::from_u32(raw_type).ok_or(ProtocolError::InvalidObjectType(raw_type))?;
    let id = reader.u32()?;
    let version = reader.u32()?;
    let parent_id = reader.i32()?;
    let material_id = reader.i32()?;
    let flags = ObjectFlags(reader.u32()?);
    let name = reader.string()?;

    let geometry = if object_type.has_geometry() {
        Some(MeshBuffers {
            vertices: reader.f32_array(3)?,
            indices: reader.u32_array(3)?,
            normals: reader.f32_array(3)?,
            groups: reader.u32_array(1)?,
            face_ids: reader.u32_array(1)?,
        })
    } else {
        None
    };

    Ok(RemoteObject {
        object_type,
        id,
        version,
        parent_id,
        material_id,
        flags,
        name,
        geometry,
    })
}

fn decode_refacet_body(reader: &mut WireReader<'_>) -> Result<RefacetResult, ProtocolError> {
    let filename = reader.string()?;
    let version = reader.u32()?;
    let item_count = reader.u32()? as usize;

    debug!("Refacet of {} version {} with {} items", filename, version, item_count);

    let mut items = Vec::with_capacity(item_count.min(reader.remaining() / 32));
    for _ in 0..item_count {
        items.push(RefacetItem {
            id: reader.u32()?,
            version: reader.u32()?,
            faces: reader.u32_array(1)?,
            positions: reader.f32_array(1)?,
            indices: reader.u32_array(1)?,
            normals: reader.f32_array(1)?,
            groups: reader.u32_array(1)?,
            face_ids: reader.u32_array(1)?,
        });
    }

    Ok(RefacetResult {
        filename,
        version,
        items,
    })
}

/// Encode a request as `type | requestId | fields`
pub fn encode_request(request_id: u32, request: &Request) -> Vec<u8> {
    let mut writer = WireWriter::new();
    writer.u32(request.message_type() as u32);
    writer.u32(request_id);

    match request {
        Request::ListAll | Request::ListVisible | Request::SubscribeAll | Request::UnsubscribeAll => {}
        Request::ListSome { filename, ids } | Request::SubscribeSome { filename, ids } => {
            writer.string(filename);
            writer.u32_array(ids, 1);
        }
        Request::RefacetSome {
            filename,
            ids,
            params,
        } => {
            writer.string(filename);
            writer.u32_array(ids, 1);
            encode_refacet_params(&mut writer, params);
        }
    }

    writer.into_bytes()
}

fn encode_refacet_params(writer: &mut WireWriter, params: &RefacetParams) {
    writer.bool(params.relative_to_bbox);
    writer.f32(params.curve_chord_tolerance);
    writer.f32(params.curve_chord_angle);
    writer.f32(params.surface_plane_tolerance);
    writer.f32(params.surface_plane_angle);
    writer.bool(params.match_topology);
    writer.u32(params.max_sides);
    writer.f32(params.plane_angle);
    writer.f32(params.min_width);
    writer.f32(params.max_width);
    writer.f32(params.curve_chord_max);
    writer.u32(params.shape as u32);
}

/// Decode a request payload into its id and typed form
pub fn decode_request(payload: &[u8]) -> Result<(u32, Request), ProtocolError> {
    let mut reader = WireReader::new(payload);
    let message_type = read_message_type(&mut reader)?;
    let request_id = reader.u32()?;

    let request = match message_type {
        MessageType::ListAll => Request::ListAll,
        MessageType::ListVisible => Request::ListVisible,
        MessageType::SubscribeAll => Request::SubscribeAll,
        MessageType::UnsubscribeAll => Request::UnsubscribeAll,
        MessageType::ListSome => Request::ListSome {
            filename: reader.string()?,
            ids: reader.u32_array(1)?,
        },
        MessageType::SubscribeSome => Request::SubscribeSome {
            filename: reader.string()?,
            ids: reader.u32_array(1)?,
        },
        MessageType::RefacetSome => {
            let filename = reader.string()?;
            let ids = reader.u32_array(1)?;
            let params = RefacetParams {
                relative_to_bbox: reader.bool()?,
                curve_chord_tolerance: reader.f32()?,
                curve_chord_angle: reader.f32()?,
                surface_plane_tolerance: reader.f32()?,
                surface_plane_angle: reader.f32()?,
                match_topology: reader.bool()?,
                max_sides: reader.u32()?,
                plane_angle: reader.f32()?,
                min_width: reader.f32()?,
                max_width: reader.f32()?,
                curve_chord_max: reader.f32()?,
                shape: FacetShape::from_u32(reader.u32()?)?,
            };
            Request::RefacetSome {
                filename,
                ids,
                params,
            }
        }
        other => return Err(ProtocolError::UnexpectedMessageType(other)),
    };

    Ok((request_id, request))
}

fn encode_object(writer: &mut WireWriter, object: &RemoteObject) {
    writer.u32(object.object_type as u32);
    writer.u32(object.id);
    writer.u32(object.version);
    writer.i32(object.parent_id);
    writer.i32(object.material_id);
    writer.u32(object.flags.bits());
    writer.string(&object.name);

    if object.object_type.has_geometry() {
        let empty = MeshBuffers::default();
        let geometry = object.geometry.as_ref().unwrap_or(&empty);
        writer.f32_array(&geometry.vertices, 3);
        writer.u32_array(&geometry.indices, 3);
        writer.f32_array(&geometry.normals, 3);
        writer.u32_array(&geometry.groups, 1);
        writer.u32_array(&geometry.face_ids, 1);
    }
}

fn encode_object_item(writer: &mut WireWriter, item_type: MessageType, objects: &[RemoteObject]) {
    writer.length_prefixed(|item| {
        item.u32(item_type as u32);
        item.u32(objects.len() as u32);
        for object in objects {
            encode_object(item, object);
        }
    });
}

fn encode_batch_header(writer: &mut WireWriter, filename: &str, version: u32, item_count: u32) {
    writer.string(filename);
    writer.u32(version);
    writer.u32(item_count);
}

/// Encode a pushed transaction; empty sub-lists produce no item
pub fn encode_transaction(transaction: &Transaction) -> Vec<u8> {
    let item_count = [
        !transaction.delete.is_empty(),
        !transaction.add.is_empty(),
        !transaction.update.is_empty(),
    ]
    .iter()
    .filter(|present| **present)
    .count() as u32;

    let mut writer = WireWriter::new();
    writer.u32(MessageType::Transaction as u32);
    encode_batch_header(
        &mut writer,
        &transaction.filename,
        transaction.version,
        item_count,
    );

    if !transaction.delete.is_empty() {
        writer.length_prefixed(|item| {
            item.u32(MessageType::Delete as u32);
            item.u32_array(&transaction.delete, 1);
        });
    }
    if !transaction.add.is_empty() {
        encode_object_item(&mut writer, MessageType::Add, &transaction.add);
    }
    if !transaction.update.is_empty() {
        encode_object_item(&mut writer, MessageType::Update, &transaction.update);
    }

    writer.into_bytes()
}

/// Encode a successful list response carrying one add item
pub fn encode_list_response(request_id: u32, snapshot: &ListSnapshot) -> Vec<u8> {
    let mut writer = WireWriter::new();
    writer.u32(snapshot.kind.message_type() as u32);
    writer.u32(request_id);
    writer.u32(STATUS_OK);
    encode_batch_header(&mut writer, &snapshot.filename, snapshot.version, 1);
    encode_object_item(&mut writer, MessageType::Add, &snapshot.add);
    writer.into_bytes()
}

/// Encode a successful refacet response
pub fn encode_refacet_response(request_id: u32, result: &RefacetResult) -> Vec<u8> {
    let mut writer = WireWriter::new();
    writer.u32(MessageType::RefacetSome as u32);
    writer.u32(request_id);
    writer.u32(STATUS_OK);
    encode_batch_header(
        &mut writer,
        &result.filename,
        result.version,
        result.items.len() as u32,
    );

    for item in &result.items {
        writer.u32(item.id);
        writer.u32(item.version);
        writer.u32_array(&item.faces, 1);
        writer.f32_array(&item.positions, 1);
        writer.u32_array(&item.indices, 1);
        writer.f32_array(&item.normals, 1);
        writer.u32_array(&item.groups, 1);
        writer.u32_array(&item.face_ids, 1);
    }

    writer.into_bytes()
}

/// Encode a response envelope with a non-200 status and no body
pub fn encode_failure(message_type: MessageType, request_id: u32, code: u32) -> Vec<u8> {
    let mut writer = WireWriter::new();
    writer.u32(message_type as u32);
    writer.u32(request_id);
    writer.u32(code);
    writer.into_bytes()
}

pub fn encode_new_version(filename: &str, version: u32) -> Vec<u8> {
    let mut writer = WireWriter::new();
    writer.u32(MessageType::NewVersion as u32);
    writer.string(filename);
    writer.u32(version);
    writer.into_bytes()
}

pub fn encode_new_file(filename: &str) -> Vec<u8> {
    let mut writer = WireWriter::new();
    writer.u32(MessageType::NewFile as u32);
    writer.string(filename);
    writer.into_bytes()
}
