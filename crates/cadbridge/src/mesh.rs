//! Host mesh construction from wire geometry
//!
//! Two paths build a [`MeshData`]:
//! - [`MeshData::from_buffers`] for add/update objects: every index triple is a triangle and
//!   vertices are used as sent.
//! - [`MeshData::from_facets`] for refacet items: coincident vertices are merged and polygons
//!   are runs of equal values in the per-loop face array (n-gons), falling back to triangles
//!   when that array is empty.
//!
//! In both cases loop normals are looked up as `normals[vertex_index]` and the face groups and
//! face ids travel with the mesh for later lookup.

use cadbridge_network::{MeshBuffers, RefacetItem};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while building a mesh
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    #[error("{what} length {len} is not a multiple of {arity}")]
    ComponentCount {
        what: &'static str,
        len: usize,
        arity: usize,
    },

    #[error("Vertex index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    #[error("Normal index {index} out of range for {normal_count} normals")]
    NormalOutOfRange { index: u32, normal_count: usize },

    #[error("Face array has {faces} entries for {loops} loops")]
    FaceLoopMismatch { faces: usize, loops: usize },
}

/// One polygon as a contiguous run of loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Polygon {
    pub loop_start: u32,
    pub loop_total: u32,
}

/// A contiguous range of loops belonging to one server face
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceGroup {
    pub start_loop: u32,
    pub loop_count: u32,
}

impl FaceGroup {
    pub fn contains(&self, loop_index: u32) -> bool {
        loop_index >= self.start_loop && loop_index - self.start_loop < self.loop_count
    }
}

/// Mesh contents as handed to the host
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    /// Vertex index of every loop (face corner)
    pub loops: Vec<u32>,
    pub polygons: Vec<Polygon>,
    /// Custom normal per loop, empty when the server sent none
    pub loop_normals: Vec<[f32; 3]>,
    pub groups: Vec<FaceGroup>,
    /// Server face id per group
    pub face_ids: Vec<u32>,
}

fn triples(what: &'static str, values: &[f32]) -> Result<Vec<[f32; 3]>, MeshError> {
    if values.len() % 3 != 0 {
        return Err(MeshError::ComponentCount {
            what,
            len: values.len(),
            arity: 3,
        });
    }
    Ok(values
        .chunks_exact(3)
        .map(|chunk| [chunk[0], chunk[1], chunk[2]])
        .collect())
}

fn face_groups(groups: &[u32]) -> Result<Vec<FaceGroup>, MeshError> {
    if groups.len() % 2 != 0 {
        return Err(MeshError::ComponentCount {
            what: "groups",
            len: groups.len(),
            arity: 2,
        });
    }
    Ok(groups
        .chunks_exact(2)
        .map(|pair| FaceGroup {
            start_loop: pair[0],
            loop_count: pair[1],
        })
        .collect())
}

fn check_indices(indices: &[u32], vertex_count: usize) -> Result<(), MeshError> {
    match indices.iter().find(|&&index| index as usize >= vertex_count) {
        Some(&index) => Err(MeshError::IndexOutOfRange {
            index,
            vertex_count,
        }),
        None => Ok(()),
    }
}

fn loop_normals(indices: &[u32], normals: &[[f32; 3]]) -> Result<Vec<[f32; 3]>, MeshError> {
    if normals.is_empty() {
        return Ok(Vec::new());
    }
    indices
        .iter()
        .map(|&index| {
            normals
                .get(index as usize)
                .copied()
                .ok_or(MeshError::NormalOutOfRange {
                    index,
                    normal_count: normals.len(),
                })
        })
        .collect()
}

fn triangle_polygons(loop_count: usize) -> Vec<Polygon> {
    (0..loop_count / 3)
        .map(|i| Polygon {
            loop_start: (i * 3) as u32,
            loop_total: 3,
        })
        .collect()
}

/// Polygons from runs of equal values in the per-loop face array
fn run_polygons(faces: &[u32]) -> Vec<Polygon> {
    let mut polygons: Vec<Polygon> = Vec::new();
    for (loop_index, face) in faces.iter().enumerate() {
        let continues = loop_index > 0 && faces[loop_index - 1] == *face;
        match polygons.last_mut() {
            Some(polygon) if continues => polygon.loop_total += 1,
            _ => polygons.push(Polygon {
                loop_start: loop_index as u32,
                loop_total: 1,
            }),
        }
    }
    polygons
}

/// Exact positional key; -0.0 and 0.0 are the same point
fn position_key(position: &[f32; 3]) -> [u32; 3] {
    position.map(|c| if c == 0.0 { 0.0f32.to_bits() } else { c.to_bits() })
}

impl MeshData {
    /// Triangle mesh from the geometry of an added or updated object
    pub fn from_buffers(buffers: &MeshBuffers) -> Result<Self, MeshError> {
        let positions = triples("vertices", &buffers.vertices)?;
        if buffers.indices.len() % 3 != 0 {
            return Err(MeshError::ComponentCount {
                what: "indices",
                len: buffers.indices.len(),
                arity: 3,
            });
        }
        check_indices(&buffers.indices, positions.len())?;
        let normals = triples("normals", &buffers.normals)?;

        Ok(Self {
            loop_normals: loop_normals(&buffers.indices, &normals)?,
            polygons: triangle_polygons(buffers.indices.len()),
            loops: buffers.indices.clone(),
            positions,
            groups: face_groups(&buffers.groups)?,
            face_ids: buffers.face_ids.clone(),
        })
    }

    /// Polygon mesh from a refacet item, merging coincident vertices
    pub fn from_facets(item: &RefacetItem) -> Result<Self, MeshError> {
        let raw_positions = triples("positions", &item.positions)?;
        check_indices(&item.indices, raw_positions.len())?;
        let normals = triples("normals", &item.normals)?;

        let polygons = if item.faces.is_empty() {
            if item.indices.len() % 3 != 0 {
                return Err(MeshError::ComponentCount {
                    what: "indices",
                    len: item.indices.len(),
                    arity: 3,
                });
            }
            triangle_polygons(item.indices.len())
        } else {
            if item.faces.len() != item.indices.len() {
                return Err(MeshError::FaceLoopMismatch {
                    faces: item.faces.len(),
                    loops: item.indices.len(),
                });
            }
            run_polygons(&item.faces)
        };

        let mut positions = Vec::new();
        let mut seen: HashMap<[u32; 3], u32> = HashMap::new();
        let remap: Vec<u32> = raw_positions
            .iter()
            .map(|position| {
                *seen.entry(position_key(position)).or_insert_with(|| {
                    positions.push(*position);
                    (positions.len() - 1) as u32
                })
            })
            .collect();

        Ok(Self {
            positions,
            loops: item.indices.iter().map(|&i| remap[i as usize]).collect(),
            polygons,
            // Normals follow the original indices, not the merged ones
            loop_normals: loop_normals(&item.indices, &normals)?,
            groups: face_groups(&item.groups)?,
            face_ids: item.face_ids.clone(),
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    /// Vertex indices of one polygon
    pub fn polygon_loops(&self, polygon: usize) -> Option<&[u32]> {
        let polygon = self.polygons.get(polygon)?;
        let start = polygon.loop_start as usize;
        self.loops.get(start..start + polygon.loop_total as usize)
    }

    /// Index of the face group containing a loop
    pub fn group_of_loop(&self, loop_index: u32) -> Option<usize> {
        self.groups.iter().position(|group| group.contains(loop_index))
    }

    /// Server face id of the group containing a loop
    pub fn face_id_of_loop(&self, loop_index: u32) -> Option<u32> {
        self.group_of_loop(loop_index)
            .and_then(|group| self.face_ids.get(group).copied())
    }

    /// Server face id of a polygon, taken from its first loop
    pub fn face_id_of_polygon(&self, polygon: usize) -> Option<u32> {
        let polygon = self.polygons.get(polygon)?;
        self.face_id_of_loop(polygon.loop_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_as_triangles() -> MeshBuffers {
        MeshBuffers {
            vertices: vec![
                0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0,
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
            normals: vec![
                0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, -1.0,
            ],
            groups: vec![0, 3, 3, 3],
            face_ids: vec![40, 41],
        }
    }

    #[test]
    fn test_triangle_path() {
        let mesh = MeshData::from_buffers(&quad_as_triangles()).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.loop_count(), 6);
        assert_eq!(mesh.polygon_count(), 2);
        assert_eq!(mesh.polygon_loops(1), Some(&[0, 2, 3][..]));

        // Normals are indexed through the vertex index of each loop
        assert_eq!(mesh.loop_normals[5], [0.0, 0.0, -1.0]);
        assert_eq!(mesh.loop_normals[3], [0.0, 0.0, 1.0]);

        assert_eq!(mesh.face_id_of_polygon(0), Some(40));
        assert_eq!(mesh.face_id_of_polygon(1), Some(41));
        assert_eq!(mesh.group_of_loop(4), Some(1));
        assert_eq!(mesh.face_id_of_loop(9), None);
    }

    #[test]
    fn test_triangle_path_rejects_bad_indices() {
        let mut buffers = quad_as_triangles();
        buffers.indices[5] = 4;
        assert_eq!(
            MeshData::from_buffers(&buffers),
            Err(MeshError::IndexOutOfRange {
                index: 4,
                vertex_count: 4
            })
        );

        let mut buffers = quad_as_triangles();
        buffers.groups.pop();
        assert!(matches!(
            MeshData::from_buffers(&buffers),
            Err(MeshError::ComponentCount { what: "groups", .. })
        ));
    }

    #[test]
    fn test_missing_normals_allowed() {
        let mut buffers = quad_as_triangles();
        buffers.normals.clear();
        let mesh = MeshData::from_buffers(&buffers).unwrap();
        assert!(mesh.loop_normals.is_empty());
    }

    #[test]
    fn test_ngon_path_merges_vertices_and_builds_runs() {
        // A quad and a triangle sharing an edge, sent with duplicated corners
        let item = RefacetItem {
            id: 1,
            version: 1,
            faces: vec![0, 0, 0, 0, 1, 1, 1],
            positions: vec![
                0.0, 0.0, 0.0, // 0
                1.0, 0.0, 0.0, // 1
                1.0, 1.0, 0.0, // 2
                0.0, 1.0, 0.0, // 3
                1.0, 0.0, 0.0, // 4 == 1
                2.0, 0.0, 0.0, // 5
                1.0, 1.0, -0.0, // 6 == 2
            ],
            indices: vec![0, 1, 2, 3, 4, 5, 6],
            normals: vec![0.0, 0.0, 1.0].repeat(7),
            groups: vec![0, 4, 4, 3],
            face_ids: vec![7, 8],
        };

        let mesh = MeshData::from_facets(&item).unwrap();
        assert_eq!(mesh.vertex_count(), 5);
        assert_eq!(mesh.loops, vec![0, 1, 2, 3, 1, 4, 2]);
        assert_eq!(
            mesh.polygons,
            vec![
                Polygon {
                    loop_start: 0,
                    loop_total: 4
                },
                Polygon {
                    loop_start: 4,
                    loop_total: 3
                },
            ]
        );
        assert_eq!(mesh.loop_normals.len(), 7);
        assert_eq!(mesh.face_id_of_polygon(1), Some(8));
    }

    #[test]
    fn test_ngon_path_without_faces_is_triangles() {
        let buffers = quad_as_triangles();
        let item = RefacetItem {
            id: 1,
            version: 1,
            faces: vec![],
            positions: buffers.vertices,
            indices: buffers.indices,
            normals: buffers.normals,
            groups: buffers.groups,
            face_ids: buffers.face_ids,
        };
        let mesh = MeshData::from_facets(&item).unwrap();
        assert_eq!(mesh.polygon_count(), 2);
        assert!(mesh.polygons.iter().all(|p| p.loop_total == 3));
    }

    #[test]
    fn test_ngon_face_loop_mismatch() {
        let item = RefacetItem {
            faces: vec![0, 0],
            positions: vec![0.0; 9],
            indices: vec![0, 1, 2],
            ..Default::default()
        };
        assert_eq!(
            MeshData::from_facets(&item),
            Err(MeshError::FaceLoopMismatch { faces: 2, loops: 3 })
        );
    }
}
