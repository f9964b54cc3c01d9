//! Isosurface extraction from scalar volumes, and the resulting triangle meshes.
//!
//! A [`BrainMesh`] stores its vertices as consecutive x,y,z coordinates and its faces as consecutive
//! triples of 0-based vertex indices, like FreeSurfer surfaces. Vertex coordinates are voxel indices
//! unless the mesh has been transformed with [`BrainMesh::transform`].

use byteordered::ByteOrdered;
use ndarray::ArrayView3;

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as FmtWrite;
use std::io::Write;

use crate::color::Rgb;
use crate::error::{LightMindedError, Result};
use crate::volume::Affine;


/// A triangle mesh with per-vertex normals.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct BrainMesh {
    pub vertices: Vec<f32>,
    pub faces: Vec<i32>,
    pub normals: Vec<f32>,
}

impl BrainMesh {

    pub fn num_vertices(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn vertex(&self, idx: usize) -> [f32; 3] {
        [self.vertices[idx * 3], self.vertices[idx * 3 + 1], self.vertices[idx * 3 + 2]]
    }

    pub fn normal(&self, idx: usize) -> [f32; 3] {
        [self.normals[idx * 3], self.normals[idx * 3 + 1], self.normals[idx * 3 + 2]]
    }

    pub fn face(&self, idx: usize) -> [i32; 3] {
        [self.faces[idx * 3], self.faces[idx * 3 + 1], self.faces[idx * 3 + 2]]
    }

    /// Vertices as `[x, y, z]` triples.
    pub fn vertex_triples(&self) -> Vec<[f32; 3]> {
        self.vertices.chunks_exact(3).map(|v| [v[0], v[1], v[2]]).collect()
    }

    pub fn normal_triples(&self) -> Vec<[f32; 3]> {
        self.normals.chunks_exact(3).map(|n| [n[0], n[1], n[2]]).collect()
    }

    pub fn face_triples(&self) -> Vec<[i32; 3]> {
        self.faces.chunks_exact(3).map(|f| [f[0], f[1], f[2]]).collect()
    }

    /// Move all vertices by the given offset.
    pub fn translate(&mut self, offset: [f32; 3]) {
        for v in self.vertices.chunks_exact_mut(3) {
            v[0] += offset[0];
            v[1] += offset[1];
            v[2] += offset[2];
        }
    }

    /// Map vertex coordinates through an affine, e.g., from voxel indices to world coordinates.
    /// Normals are recomputed from the transformed faces. An affine that mirrors space reverses the
    /// winding of all faces, so that normals keep pointing outwards.
    pub fn transform(&mut self, affine: &Affine) {
        for v in self.vertices.chunks_exact_mut(3) {
            let p = affine.apply([v[0] as f64, v[1] as f64, v[2] as f64]);
            v[0] = p[0] as f32;
            v[1] = p[1] as f32;
            v[2] = p[2] as f32;
        }
        if affine.determinant() < 0.0 {
            for f in self.faces.chunks_exact_mut(3) {
                f.swap(1, 2);
            }
        }
        self.normals = vertex_normals(&self.vertices, &self.faces);
    }

    /// The axis-aligned bounding box as `(min, max)` corners, or `None` for a mesh without vertices.
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        if self.vertices.is_empty() {
            return None;
        }
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        for v in self.vertices.chunks_exact(3) {
            for axis in 0..3 {
                min[axis] = min[axis].min(v[axis]);
                max[axis] = max[axis].max(v[axis]);
            }
        }
        Some((min, max))
    }

    /// Export the mesh in ASCII PLY format, optionally with one color for all vertices.
    ///
    /// # Examples
    ///
    /// ```
    /// use light_minded::{BrainMesh, Rgb};
    /// let mesh = BrainMesh { vertices: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], faces: vec![0, 1, 2], normals: vec![0.0; 9] };
    /// let ply = mesh.to_ply(Some(Rgb::new(255, 0, 0)));
    /// assert!(ply.starts_with("ply\n"));
    /// assert!(ply.contains("element face 1"));
    /// ```
    pub fn to_ply(&self, color: Option<Rgb>) -> String {
        let mut ply = String::with_capacity(64 + self.vertices.len() * 12 + self.faces.len() * 8);
        ply.push_str("ply\nformat ascii 1.0\n");
        let _ = writeln!(ply, "element vertex {}", self.num_vertices());
        ply.push_str("property float x\nproperty float y\nproperty float z\n");
        ply.push_str("property float nx\nproperty float ny\nproperty float nz\n");
        if color.is_some() {
            ply.push_str("property uchar red\nproperty uchar green\nproperty uchar blue\n");
        }
        let _ = writeln!(ply, "element face {}", self.num_faces());
        ply.push_str("property list uchar int vertex_indices\nend_header\n");

        for idx in 0..self.num_vertices() {
            let v = self.vertex(idx);
            let n = self.normal(idx);
            let _ = write!(ply, "{} {} {} {} {} {}", v[0], v[1], v[2], n[0], n[1], n[2]);
            if let Some(c) = color {
                let _ = write!(ply, " {} {} {}", c.r, c.g, c.b);
            }
            ply.push('\n');
        }
        for f in self.faces.chunks_exact(3) {
            let _ = writeln!(ply, "3 {} {} {}", f[0], f[1], f[2]);
        }
        ply
    }

    /// Write the mesh in binary STL format, with one facet normal per triangle.
    pub fn write_stl<W: Write>(&self, output: W) -> Result<()> {
        let mut output = ByteOrdered::le(output);
        let mut header = [0u8; 80];
        let title = b"light-minded binary STL";
        header[..title.len()].copy_from_slice(title);
        output.write_all(&header)?;
        output.write_u32(self.num_faces() as u32)?;

        for f in self.faces.chunks_exact(3) {
            let a = self.vertex(f[0] as usize);
            let b = self.vertex(f[1] as usize);
            let c = self.vertex(f[2] as usize);
            let n = normalize(cross(sub(b, a), sub(c, a)));
            for value in n.iter().chain(a.iter()).chain(b.iter()).chain(c.iter()) {
                output.write_f32(*value)?;
            }
            output.write_u16(0)?;
        }
        Ok(())
    }

    /// The mesh in binary STL format.
    pub fn to_stl(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(84 + self.num_faces() * 50);
        self.write_stl(&mut buffer)?;
        Ok(buffer)
    }
}

impl fmt::Display for BrainMesh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Brain mesh with {} vertices and {} faces.", self.num_vertices(), self.num_faces())
    }
}


/// Extracts a triangulated surface that separates the voxels above `level` from those below it.
pub trait IsosurfaceExtractor {
    fn extract(&self, field: ArrayView3<f32>, level: f32) -> Result<BrainMesh>;
}


/// Marching tetrahedra over the voxel grid.
///
/// Every cube of 8 neighboring voxels is split into 6 tetrahedra around its main diagonal, which keeps
/// the surface free of the ambiguous cases of marching cubes. Vertices on shared grid edges are
/// shared between triangles, and triangles are oriented so that their normals point from the region
/// above `level` to the region below it.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarchingTetrahedra;

/// Cube corner offsets, indexed by `dx + 2 * dy + 4 * dz`.
const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0], [1, 0, 0], [0, 1, 0], [1, 1, 0],
    [0, 0, 1], [1, 0, 1], [0, 1, 1], [1, 1, 1],
];

/// The 6 tetrahedra of a cube, all sharing the diagonal from corner 0 to corner 7.
const TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 1, 3, 7], [0, 1, 5, 7],
    [0, 2, 3, 7], [0, 2, 6, 7],
    [0, 4, 5, 7], [0, 4, 6, 7],
];

struct SurfaceBuilder<'a> {
    field: ArrayView3<'a, f32>,
    level: f32,
    edge_vertices: HashMap<([usize; 3], [usize; 3]), i32>,
    vertices: Vec<f32>,
    faces: Vec<i32>,
}

impl<'a> SurfaceBuilder<'a> {

    fn edge_vertex(&mut self, a: [usize; 3], b: [usize; 3]) -> i32 {
        let key = if a < b { (a, b) } else { (b, a) };
        if let Some(idx) = self.edge_vertices.get(&key) {
            return *idx;
        }
        let (va, vb) = (self.field[a], self.field[b]);
        let t = if (vb - va).abs() > f32::EPSILON { (self.level - va) / (vb - va) } else { 0.5 };
        let t = t.clamp(0.0, 1.0);
        let idx = (self.vertices.len() / 3) as i32;
        for axis in 0..3 {
            self.vertices.push(a[axis] as f32 + t * (b[axis] as f32 - a[axis] as f32));
        }
        self.edge_vertices.insert(key, idx);
        idx
    }

    fn position(&self, idx: i32) -> [f32; 3] {
        let i = idx as usize * 3;
        [self.vertices[i], self.vertices[i + 1], self.vertices[i + 2]]
    }

    /// Add a triangle, flipped if needed so that its normal points along `outward`.
    fn triangle(&mut self, tri: [i32; 3], outward: [f32; 3]) {
        if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
            return;
        }
        let (a, b, c) = (self.position(tri[0]), self.position(tri[1]), self.position(tri[2]));
        let n = cross(sub(b, a), sub(c, a));
        if dot(n, outward) < 0.0 {
            self.faces.extend_from_slice(&[tri[0], tri[2], tri[1]]);
        } else {
            self.faces.extend_from_slice(&tri);
        }
    }

    fn march_tetrahedron(&mut self, tet: [[usize; 3]; 4]) {
        let mut inside: Vec<[usize; 3]> = Vec::with_capacity(4);
        let mut outside: Vec<[usize; 3]> = Vec::with_capacity(4);
        for corner in tet.iter() {
            if self.field[*corner] > self.level {
                inside.push(*corner);
            } else {
                outside.push(*corner);
            }
        }
        if inside.is_empty() || outside.is_empty() {
            return;
        }
        let outward = sub(centroid(&outside), centroid(&inside));

        match inside.len() {
            1 | 3 => {
                let (lone, others) = if inside.len() == 1 { (inside[0], &outside) } else { (outside[0], &inside) };
                let tri = [
                    self.edge_vertex(lone, others[0]),
                    self.edge_vertex(lone, others[1]),
                    self.edge_vertex(lone, others[2]),
                ];
                self.triangle(tri, outward);
            }
            _ => {
                let (a, b, c, d) = (inside[0], inside[1], outside[0], outside[1]);
                let ac = self.edge_vertex(a, c);
                let ad = self.edge_vertex(a, d);
                let bd = self.edge_vertex(b, d);
                let bc = self.edge_vertex(b, c);
                self.triangle([ac, ad, bd], outward);
                self.triangle([ac, bd, bc], outward);
            }
        }
    }
}

impl IsosurfaceExtractor for MarchingTetrahedra {
    fn extract(&self, field: ArrayView3<f32>, level: f32) -> Result<BrainMesh> {
        let shape = field.shape();
        if shape.iter().any(|len| *len < 2) {
            return Err(LightMindedError::InvalidVolume(format!(
                "isosurface extraction needs at least 2 voxels per axis, got shape {:?}", shape)));
        }
        let (nx, ny, nz) = (shape[0], shape[1], shape[2]);

        let mut builder = SurfaceBuilder {
            field: field.view(),
            level,
            edge_vertices: HashMap::new(),
            vertices: Vec::new(),
            faces: Vec::new(),
        };

        for i in 0..nx - 1 {
            for j in 0..ny - 1 {
                for k in 0..nz - 1 {
                    let corner = |c: usize| [i + CORNERS[c][0], j + CORNERS[c][1], k + CORNERS[c][2]];
                    let values: Vec<bool> = (0..8).map(|c| field[corner(c)] > level).collect();
                    if values.iter().all(|v| *v) || values.iter().all(|v| !*v) {
                        continue;
                    }
                    for tet in TETRAHEDRA.iter() {
                        builder.march_tetrahedron([corner(tet[0]), corner(tet[1]), corner(tet[2]), corner(tet[3])]);
                    }
                }
            }
        }

        let normals = vertex_normals(&builder.vertices, &builder.faces);
        Ok(BrainMesh {
            vertices: builder.vertices,
            faces: builder.faces,
            normals,
        })
    }
}


fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = dot(v, v).sqrt();
    if len > 0.0 { [v[0] / len, v[1] / len, v[2] / len] } else { v }
}

fn centroid(points: &[[usize; 3]]) -> [f32; 3] {
    let n = points.len() as f32;
    let mut c = [0.0; 3];
    for p in points {
        for axis in 0..3 {
            c[axis] += p[axis] as f32 / n;
        }
    }
    c
}

/// Area weighted vertex normals.
fn vertex_normals(vertices: &[f32], faces: &[i32]) -> Vec<f32> {
    let mut normals = vec![0.0f32; vertices.len()];
    let pos = |idx: i32| {
        let i = idx as usize * 3;
        [vertices[i], vertices[i + 1], vertices[i + 2]]
    };
    for f in faces.chunks_exact(3) {
        let n = cross(sub(pos(f[1]), pos(f[0])), sub(pos(f[2]), pos(f[0])));
        for idx in f {
            let i = *idx as usize * 3;
            normals[i] += n[0];
            normals[i + 1] += n[1];
            normals[i + 2] += n[2];
        }
    }
    for n in normals.chunks_exact_mut(3) {
        let unit = normalize([n[0], n[1], n[2]]);
        n.copy_from_slice(&unit);
    }
    normals
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn cube_mask() -> Array3<f32> {
        let mut mask = Array3::<f32>::zeros((5, 5, 5));
        for i in 1..4 {
            for j in 1..4 {
                for k in 1..4 {
                    mask[[i, j, k]] = 1.0;
                }
            }
        }
        mask
    }

    #[test]
    fn an_empty_field_has_no_surface() {
        let field = Array3::<f32>::zeros((4, 4, 4));
        let mesh = MarchingTetrahedra.extract(field.view(), 0.5).unwrap();
        assert!(mesh.is_empty());
        assert_eq!(0, mesh.num_vertices());
    }

    #[test]
    fn a_too_small_field_is_rejected() {
        let field = Array3::<f32>::ones((1, 4, 4));
        assert!(MarchingTetrahedra.extract(field.view(), 0.5).is_err());
    }

    #[test]
    fn a_solid_block_gives_a_closed_surface_around_it() {
        let mesh = MarchingTetrahedra.extract(cube_mask().view(), 0.5).unwrap();
        assert!(mesh.num_faces() > 0);
        assert_eq!(mesh.vertices.len(), mesh.normals.len());

        // The surface passes half way between the block and the background.
        let (min, max) = mesh.bounds().unwrap();
        for axis in 0..3 {
            assert_eq!(0.5, min[axis]);
            assert_eq!(3.5, max[axis]);
        }

        // Closed: every edge is shared by exactly two faces.
        let mut edges: HashMap<(i32, i32), usize> = HashMap::new();
        for f in mesh.face_triples() {
            for (a, b) in [(f[0], f[1]), (f[1], f[2]), (f[2], f[0])].iter() {
                let key = if a < b { (*a, *b) } else { (*b, *a) };
                *edges.entry(key).or_insert(0) += 1;
            }
        }
        assert!(edges.values().all(|count| *count == 2));
    }

    #[test]
    fn normals_point_away_from_the_block() {
        let mesh = MarchingTetrahedra.extract(cube_mask().view(), 0.5).unwrap();
        let mut checked = 0;
        for idx in 0..mesh.num_vertices() {
            let v = mesh.vertex(idx);
            for axis in 0..3 {
                let others_central = (0..3)
                    .filter(|a| *a != axis)
                    .all(|a| v[a] >= 1.5 && v[a] <= 2.5);
                if !others_central {
                    continue;
                }
                let mut expected = [0.0f32; 3];
                if v[axis] == 0.5 {
                    expected[axis] = -1.0;
                } else if v[axis] == 3.5 {
                    expected[axis] = 1.0;
                } else {
                    continue;
                }
                assert!(dot(expected, mesh.normal(idx)) > 0.99);
                checked += 1;
            }
        }
        // Every one of the 6 block faces has central vertices.
        assert!(checked >= 6);
    }

    #[test]
    fn the_stl_export_has_one_record_per_face() {
        let mesh = MarchingTetrahedra.extract(cube_mask().view(), 0.5).unwrap();
        let stl = mesh.to_stl().unwrap();
        assert_eq!(84 + 50 * mesh.num_faces(), stl.len());
        let count = u32::from_le_bytes([stl[80], stl[81], stl[82], stl[83]]);
        assert_eq!(mesh.num_faces() as u32, count);
    }

    #[test]
    fn mirroring_affines_keep_normals_outwards() {
        let original = MarchingTetrahedra.extract(cube_mask().view(), 0.5).unwrap();

        // A radiological (LAS) affine flips x. Outward normals must flip with it.
        let mut mirrored = original.clone();
        mirrored.transform(&Affine::scaling([-2.0, 2.0, 2.0]).with_translation([90.0, -126.0, -72.0]));
        assert_eq!(original.face(0)[1], mirrored.face(0)[2]);
        for idx in 0..original.num_vertices() {
            let n = original.normal(idx);
            let m = mirrored.normal(idx);
            assert_abs_diff_eq!(-n[0], m[0], epsilon = 1e-5);
            assert_abs_diff_eq!(n[1], m[1], epsilon = 1e-5);
            assert_abs_diff_eq!(n[2], m[2], epsilon = 1e-5);
        }

        let mut scaled = original.clone();
        scaled.transform(&Affine::scaling([2.0, 2.0, 2.0]));
        assert_eq!(original.faces, scaled.faces);
        for (a, b) in original.normals.iter().zip(scaled.normals.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn meshes_can_be_moved_to_world_coordinates() {
        let mut mesh = MarchingTetrahedra.extract(cube_mask().view(), 0.5).unwrap();
        mesh.transform(&Affine::scaling([2.0, 2.0, 2.0]).with_translation([-10.0, 0.0, 0.0]));
        let (min, max) = mesh.bounds().unwrap();
        assert_eq!(-9.0, min[0]);
        assert_eq!(-3.0, max[0]);
        assert_eq!(7.0, max[1]);
    }
}
