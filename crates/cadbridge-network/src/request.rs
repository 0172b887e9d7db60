//! Outbound requests and refacet parameters

use crate::protocol::{MessageType, ProtocolError};
use serde::{Deserialize, Serialize};

/// Polygon shape constraint of a refacet request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum FacetShape {
    Any = 20500,
    #[default]
    Cut = 20501,
    Convex = 20502,
}

impl FacetShape {
    pub fn from_u32(value: u32) -> Result<Self, ProtocolError> {
        match value {
            20500 => Ok(Self::Any),
            20501 => Ok(Self::Cut),
            20502 => Ok(Self::Convex),
            other => Err(ProtocolError::InvalidFacetShape(other)),
        }
    }
}

/// Tessellation parameters sent with a refacet request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefacetParams {
    /// Interpret tolerances relative to each body's bounding box
    pub relative_to_bbox: bool,
    pub curve_chord_tolerance: f32,
    /// Radians
    pub curve_chord_angle: f32,
    pub surface_plane_tolerance: f32,
    /// Radians
    pub surface_plane_angle: f32,
    pub match_topology: bool,
    pub max_sides: u32,
    /// Radians, 0 disables planar merging
    pub plane_angle: f32,
    pub min_width: f32,
    /// 0 means unbounded
    pub max_width: f32,
    pub curve_chord_max: f32,
    pub shape: FacetShape,
}

impl Default for RefacetParams {
    fn default() -> Self {
        Self {
            relative_to_bbox: true,
            curve_chord_tolerance: 0.01,
            curve_chord_angle: 0.35,
            surface_plane_tolerance: 0.01,
            surface_plane_angle: 0.35,
            match_topology: true,
            max_sides: 3,
            plane_angle: 0.0,
            min_width: 0.0,
            max_width: 0.0,
            curve_chord_max: 0.0,
            shape: FacetShape::Cut,
        }
    }
}

/// A request the client can send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    ListAll,
    ListVisible,
    ListSome {
        filename: String,
        ids: Vec<u32>,
    },
    SubscribeAll,
    UnsubscribeAll,
    SubscribeSome {
        filename: String,
        ids: Vec<u32>,
    },
    RefacetSome {
        filename: String,
        ids: Vec<u32>,
        params: RefacetParams,
    },
}

impl Request {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ListAll => MessageType::ListAll,
            Self::ListVisible => MessageType::ListVisible,
            Self::ListSome { .. } => MessageType::ListSome,
            Self::SubscribeAll => MessageType::SubscribeAll,
            Self::UnsubscribeAll => MessageType::UnsubscribeAll,
            Self::SubscribeSome { .. } => MessageType::SubscribeSome,
            Self::RefacetSome { .. } => MessageType::RefacetSome,
        }
    }

    /// Ids targeted by the request, empty for the whole-file requests
    pub fn ids(&self) -> &[u32] {
        match self {
            Self::ListSome { ids, .. }
            | Self::SubscribeSome { ids, .. }
            | Self::RefacetSome { ids, .. } => ids,
            _ => &[],
        }
    }

    /// Id-targeted requests with no ids are never sent
    pub fn is_empty_selection(&self) -> bool {
        matches!(
            self,
            Self::ListSome { .. } | Self::SubscribeSome { .. } | Self::RefacetSome { .. }
        ) && self.ids().is_empty()
    }
}
