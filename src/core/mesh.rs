// Copyright @yucwang 2026

use crate::math::aabb::AABB;
use crate::math::constants::{ Float, Vector2f, Vector3f };
use crate::math::distribution::Distribution1D;

// Triangle mesh stored as parallel arrays; faces index positions, normals
// and texcoords uniformly.
#[derive(Clone)]
pub struct Mesh {
    pub positions: Vec<Float>,
    pub normals: Vec<Float>,
    pub texcoords: Vec<Float>,
    pub faces: Vec<u32>,
}

impl Mesh {
    pub fn new() -> Self {
        Self {
            positions: Vec::new(),
            normals: Vec::new(),
            texcoords: Vec::new(),
            faces: Vec::new(),
        }
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len() / 3
    }

    pub fn num_vertices(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn has_texcoords(&self) -> bool {
        !self.texcoords.is_empty()
    }

    pub fn position(&self, vertex: usize) -> Vector3f {
        Vector3f::new(self.positions[3 * vertex],
                      self.positions[3 * vertex + 1],
                      self.positions[3 * vertex + 2])
    }

    pub fn normal(&self, vertex: usize) -> Vector3f {
        Vector3f::new(self.normals[3 * vertex],
                      self.normals[3 * vertex + 1],
                      self.normals[3 * vertex + 2])
    }

    pub fn texcoord(&self, vertex: usize) -> Vector2f {
        Vector2f::new(self.texcoords[2 * vertex],
                      self.texcoords[2 * vertex + 1])
    }

    pub fn face(&self, face: usize) -> (usize, usize, usize) {
        (self.faces[3 * face] as usize,
         self.faces[3 * face + 1] as usize,
         self.faces[3 * face + 2] as usize)
    }

    pub fn triangle(&self, face: usize) -> (Vector3f, Vector3f, Vector3f) {
        let (i1, i2, i3) = self.face(face);
        (self.position(i1), self.position(i2), self.position(i3))
    }

    pub fn face_area(&self, face: usize) -> Float {
        let (p1, p2, p3) = self.triangle(face);
        (p2 - p1).cross(&(p3 - p1)).norm() * 0.5
    }

    pub fn bounding_box(&self) -> AABB {
        let mut bounds = AABB::default();
        for i in 0..self.num_vertices() {
            bounds.expand_by_point(&self.position(i));
        }
        bounds
    }

    // Per-triangle area distribution used for uniform-by-area position
    // sampling on area emitters and sensors. Returns (cdf, 1 / total area).
    pub fn triangle_area_distribution(&self) -> (Distribution1D, Float) {
        let mut dist = Distribution1D::new();
        let mut sum_area = 0.0;
        for face in 0..self.num_faces() {
            let area = self.face_area(face);
            dist.add(area);
            sum_area += area;
        }
        dist.normalize();
        (dist, 1.0 / sum_area)
    }

    // Replaces the normals with face normals, splitting shared vertices so
    // each face is flat-shaded.
    pub fn generate_flat_normals(&mut self) {
        let mut positions = Vec::with_capacity(self.faces.len() * 3);
        let mut normals = Vec::with_capacity(self.faces.len() * 3);
        let mut texcoords = Vec::new();
        let mut faces = Vec::with_capacity(self.faces.len());

        for face in 0..self.num_faces() {
            let (i1, i2, i3) = self.face(face);
            let (p1, p2, p3) = self.triangle(face);
            let n = face_normal(&p1, &p2, &p3);
            for (vi, p) in [(i1, p1), (i2, p2), (i3, p3)] {
                faces.push((positions.len() / 3) as u32);
                positions.extend_from_slice(&[p.x, p.y, p.z]);
                normals.extend_from_slice(&[n.x, n.y, n.z]);
                if self.has_texcoords() {
                    let uv = self.texcoord(vi);
                    texcoords.extend_from_slice(&[uv.x, uv.y]);
                }
            }
        }

        self.positions = positions;
        self.normals = normals;
        self.texcoords = texcoords;
        self.faces = faces;
    }

    // Area-weighted vertex normals averaged over incident faces.
    pub fn generate_smooth_normals(&mut self) {
        let mut normals = vec![0.0; self.positions.len()];
        for face in 0..self.num_faces() {
            let (i1, i2, i3) = self.face(face);
            let (p1, p2, p3) = self.triangle(face);
            // Cross product length carries the area weight.
            let n = (p2 - p1).cross(&(p3 - p1));
            for vi in [i1, i2, i3] {
                normals[3 * vi] += n.x;
                normals[3 * vi + 1] += n.y;
                normals[3 * vi + 2] += n.z;
            }
        }
        for vi in 0..(normals.len() / 3) {
            let n = Vector3f::new(normals[3 * vi], normals[3 * vi + 1], normals[3 * vi + 2]);
            let len = n.norm();
            if len > 0.0 {
                normals[3 * vi] = n.x / len;
                normals[3 * vi + 1] = n.y / len;
                normals[3 * vi + 2] = n.z / len;
            }
        }
        self.normals = normals;
    }
}

pub fn face_normal(p1: &Vector3f, p2: &Vector3f, p3: &Vector3f) -> Vector3f {
    (p2 - p1).cross(&(p3 - p1)).normalize()
}

/* Tests for Mesh */

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_quad() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.positions = vec![
            0.0, 0.0, 0.0,
            1.0, 0.0, 0.0,
            1.0, 1.0, 0.0,
            0.0, 1.0, 0.0,
        ];
        mesh.normals = vec![
            0.0, 0.0, 1.0,
            0.0, 0.0, 1.0,
            0.0, 0.0, 1.0,
            0.0, 0.0, 1.0,
        ];
        mesh.faces = vec![0, 1, 2, 0, 2, 3];
        mesh
    }

    #[test]
    fn test_mesh_accessors() {
        let mesh = unit_quad();
        assert_eq!(mesh.num_faces(), 2);
        assert_eq!(mesh.num_vertices(), 4);
        assert!((mesh.face_area(0) - 0.5).abs() < 1e-12);

        let bounds = mesh.bounding_box();
        assert!((bounds.p_max - Vector3f::new(1.0, 1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_area_distribution() {
        let mesh = unit_quad();
        let (dist, inv_area) = mesh.triangle_area_distribution();
        assert_eq!(dist.len(), 2);
        assert!((inv_area - 1.0).abs() < 1e-12);
        assert!((dist.pdf(0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_flat_normals_split_vertices() {
        let mut mesh = unit_quad();
        mesh.normals.clear();
        mesh.generate_flat_normals();
        assert_eq!(mesh.num_vertices(), 6);
        assert!((mesh.normal(0) - Vector3f::new(0.0, 0.0, 1.0)).norm() < 1e-12);
    }

    #[test]
    fn test_smooth_normals() {
        let mut mesh = unit_quad();
        mesh.normals.clear();
        mesh.generate_smooth_normals();
        assert_eq!(mesh.normals.len(), mesh.positions.len());
        assert!((mesh.normal(2) - Vector3f::new(0.0, 0.0, 1.0)).norm() < 1e-12);
    }
}
