//! Refacet request building
//!
//! Turns the user's facet settings into [`RefacetParams`] and the selected mirrored objects into
//! one `RefacetSome` request per file.

use crate::host::RemoteTag;
use cadbridge_network::{FacetShape, RefacetParams, Request};
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_4;

/// Polygon limit of refaceted meshes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolygonKind {
    #[default]
    Tri,
    Ngon,
}

impl PolygonKind {
    pub fn max_sides(self) -> u32 {
        match self {
            Self::Tri => 3,
            Self::Ngon => 128,
        }
    }
}

/// Facet settings as stored in the `[facet]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacetSettings {
    /// Use the separate curve/surface values and the width limits below
    pub advanced: bool,
    pub polygons: PolygonKind,
    pub tolerance: f32,
    pub angle: f32,
    pub curve_chord_tolerance: f32,
    pub curve_angle: f32,
    pub surface_plane_tolerance: f32,
    pub surface_angle: f32,
    pub min_width: f32,
    /// 0 means unbounded
    pub max_width: f32,
}

impl Default for FacetSettings {
    fn default() -> Self {
        Self {
            advanced: false,
            polygons: PolygonKind::Tri,
            tolerance: 0.01,
            angle: 0.45,
            curve_chord_tolerance: 0.01,
            curve_angle: 0.45,
            surface_plane_tolerance: 0.01,
            surface_angle: 0.45,
            min_width: 0.0,
            max_width: 0.0,
        }
    }
}

impl FacetSettings {
    pub fn to_params(&self) -> RefacetParams {
        let max_sides = self.polygons.max_sides();
        let mut params = RefacetParams {
            relative_to_bbox: true,
            curve_chord_tolerance: self.tolerance,
            curve_chord_angle: self.angle,
            surface_plane_tolerance: self.tolerance,
            surface_plane_angle: self.angle,
            match_topology: true,
            max_sides,
            plane_angle: if max_sides > 4 { FRAC_PI_4 } else { 0.0 },
            min_width: 0.0,
            max_width: 0.0,
            curve_chord_max: 0.0,
            shape: FacetShape::Cut,
        };

        if self.advanced {
            params.curve_chord_tolerance = self.curve_chord_tolerance;
            params.curve_chord_angle = self.curve_angle;
            params.surface_plane_tolerance = self.surface_plane_tolerance;
            params.surface_plane_angle = self.surface_angle;
            params.min_width = self.min_width;
            params.max_width = self.max_width;
        }

        normalize(params)
    }

    pub fn validate(&self) -> Result<(), String> {
        let values = [
            ("tolerance", self.tolerance),
            ("angle", self.angle),
            ("curve_chord_tolerance", self.curve_chord_tolerance),
            ("curve_angle", self.curve_angle),
            ("surface_plane_tolerance", self.surface_plane_tolerance),
            ("surface_angle", self.surface_angle),
            ("min_width", self.min_width),
            ("max_width", self.max_width),
        ];
        for (name, value) in values {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("facet.{name} must be a non-negative number, got {value}"));
            }
        }
        Ok(())
    }
}

/// Clamp `max_width` up to `min_width` and derive `curve_chord_max` when unset
pub fn normalize(mut params: RefacetParams) -> RefacetParams {
    if params.max_width > 0.0 && params.max_width < params.min_width {
        params.max_width = params.min_width;
    }
    if params.curve_chord_max == 0.0 {
        params.curve_chord_max = params.max_width * 0.5f32.sqrt();
    }
    params
}

/// Ids of one file to refacet together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefacetBatch {
    pub filename: String,
    pub ids: Vec<u32>,
}

/// Group tags by filename, keeping first-seen order of files and ids
pub fn group_by_filename<'a>(tags: impl IntoIterator<Item = &'a RemoteTag>) -> Vec<RefacetBatch> {
    let mut batches: Vec<RefacetBatch> = Vec::new();
    for tag in tags {
        match batches.iter_mut().find(|b| b.filename == tag.filename) {
            Some(batch) => {
                if !batch.ids.contains(&tag.remote_id) {
                    batch.ids.push(tag.remote_id);
                }
            }
            None => batches.push(RefacetBatch {
                filename: tag.filename.clone(),
                ids: vec![tag.remote_id],
            }),
        }
    }
    batches
}

/// One `RefacetSome` request per file
pub fn build_requests<'a>(
    tags: impl IntoIterator<Item = &'a RemoteTag>,
    params: RefacetParams,
) -> Vec<Request> {
    let params = normalize(params);
    group_by_filename(tags)
        .into_iter()
        .map(|batch| Request::RefacetSome {
            filename: batch.filename,
            ids: batch.ids,
            params,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadbridge_network::{decode_request, encode_request};

    #[test]
    fn test_basic_settings() {
        let params = FacetSettings::default().to_params();
        assert_eq!(params.max_sides, 3);
        assert_eq!(params.plane_angle, 0.0);
        assert_eq!(params.curve_chord_tolerance, 0.01);
        assert_eq!(params.surface_plane_angle, 0.45);
        assert_eq!(params.max_width, 0.0);
        assert_eq!(params.curve_chord_max, 0.0);
        assert_eq!(params.shape, FacetShape::Cut);

        let ngon = FacetSettings {
            polygons: PolygonKind::Ngon,
            ..Default::default()
        }
        .to_params();
        assert_eq!(ngon.max_sides, 128);
        assert_eq!(ngon.plane_angle, FRAC_PI_4);
    }

    #[test]
    fn test_advanced_settings_ignore_basic_values() {
        let settings = FacetSettings {
            advanced: true,
            tolerance: 9.0,
            curve_chord_tolerance: 0.02,
            surface_plane_tolerance: 0.03,
            curve_angle: 0.1,
            surface_angle: 0.2,
            max_width: 2.0,
            ..Default::default()
        };
        let params = settings.to_params();
        assert_eq!(params.curve_chord_tolerance, 0.02);
        assert_eq!(params.surface_plane_tolerance, 0.03);
        assert_eq!(params.curve_chord_angle, 0.1);
        assert_eq!(params.surface_plane_angle, 0.2);
        assert!((params.curve_chord_max - 2.0 * 0.5f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_max_width_clamped_to_min_width() {
        let settings = FacetSettings {
            advanced: true,
            min_width: 0.05,
            max_width: 0.01,
            ..Default::default()
        };
        let requests = build_requests(
            &[RemoteTag::new(5, "a.plasticity")],
            settings.to_params(),
        );
        let encoded = encode_request(1, &requests[0]);
        let (_, decoded) = decode_request(&encoded).unwrap();
        let Request::RefacetSome { params, .. } = decoded else {
            panic!("Expected a refacet request");
        };
        assert_eq!(params.max_width, 0.05);
        assert!((params.curve_chord_max - 0.05 * 0.5f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_zero_max_width_is_unbounded() {
        let params = normalize(RefacetParams {
            min_width: 0.5,
            max_width: 0.0,
            ..Default::default()
        });
        assert_eq!(params.max_width, 0.0);
        assert_eq!(params.curve_chord_max, 0.0);

        let explicit = normalize(RefacetParams {
            max_width: 1.0,
            curve_chord_max: 0.25,
            ..Default::default()
        });
        assert_eq!(explicit.curve_chord_max, 0.25);
    }

    #[test]
    fn test_grouping_by_filename() {
        let tags = [
            RemoteTag::new(1, "b"),
            RemoteTag::new(2, "a"),
            RemoteTag::new(3, "b"),
            RemoteTag::new(1, "b"),
        ];
        let requests = build_requests(&tags, RefacetParams::default());
        assert_eq!(requests.len(), 2);
        assert!(matches!(
            &requests[0],
            Request::RefacetSome { filename, ids, .. } if filename == "b" && ids == &[1, 3]
        ));
        assert!(matches!(
            &requests[1],
            Request::RefacetSome { filename, ids, .. } if filename == "a" && ids == &[2]
        ));
        assert!(build_requests(std::iter::empty(), RefacetParams::default()).is_empty());
    }

    #[test]
    fn test_validation() {
        assert!(FacetSettings::default().validate().is_ok());
        let negative = FacetSettings {
            min_width: -1.0,
            ..Default::default()
        };
        assert!(negative.validate().is_err());
    }
}
