// Copyright @yucwang 2026

use crate::core::bvh::{ intersect_triangle, BVH };
use crate::core::geometry::SurfaceGeometry;
use crate::core::mesh::Mesh;
use crate::core::primitive::{ Primitive, PrimitiveType };
use crate::core::texture::Texture;
use crate::math::aabb::AABB;
use crate::math::constants::{ EPSILON, Float, Vector3f };
use crate::math::ray::Ray3f;

use std::sync::Arc;

#[derive(Clone, Copy)]
struct TriangleRef {
    prim: usize,
    face: usize,
}

pub struct Intersection {
    pub geom: SurfaceGeometry,
    pub prim: usize,
}

// Immutable after load; concurrently readable by all workers.
pub struct Scene {
    primitives: Vec<Primitive>,
    light_indices: Vec<usize>,
    sensor_index: usize,
    meshes: Vec<Arc<Mesh>>,
    textures: Vec<Arc<Texture>>,
    bounds: AABB,
    triangles: Vec<TriangleRef>,
    accel: BVH,
}

impl Scene {
    pub fn new(primitives: Vec<Primitive>,
               light_indices: Vec<usize>,
               sensor_index: usize,
               meshes: Vec<Arc<Mesh>>,
               textures: Vec<Arc<Texture>>) -> Self {
        let mut bounds = AABB::default();
        let mut triangles = Vec::new();
        let mut tri_bounds = Vec::new();
        let mut tri_centroids = Vec::new();

        for (prim_idx, prim) in primitives.iter().enumerate() {
            let Some(mesh) = prim.mesh.as_ref() else {
                continue;
            };
            bounds.expand_by_aabb(&mesh.bounding_box());
            for face in 0..mesh.num_faces() {
                let (p1, p2, p3) = mesh.triangle(face);
                let mut b = AABB::default();
                b.expand_by_point(&p1);
                b.expand_by_point(&p2);
                b.expand_by_point(&p3);
                triangles.push(TriangleRef { prim: prim_idx, face });
                tri_centroids.push(b.center());
                tri_bounds.push(b);
            }
        }

        let accel = BVH::new(tri_bounds, tri_centroids);
        Self {
            primitives,
            light_indices,
            sensor_index,
            meshes,
            textures,
            bounds,
            triangles,
            accel,
        }
    }

    pub fn primitive(&self, index: usize) -> &Primitive {
        &self.primitives[index]
    }

    pub fn num_primitives(&self) -> usize {
        self.primitives.len()
    }

    pub fn sensor_index(&self) -> usize {
        self.sensor_index
    }

    pub fn num_lights(&self) -> usize {
        self.light_indices.len()
    }

    pub fn meshes(&self) -> &[Arc<Mesh>] {
        &self.meshes
    }

    pub fn textures(&self) -> &[Arc<Texture>] {
        &self.textures
    }

    pub fn bounds(&self) -> &AABB {
        &self.bounds
    }

    // Uniform selection over the light table; the sensor is unique.
    pub fn sample_emitter(&self, ty: PrimitiveType, u: Float) -> Option<usize> {
        if ty.contains(PrimitiveType::L) {
            let n = self.light_indices.len();
            if n == 0 {
                return None;
            }
            let i = ((u * n as Float) as i64).clamp(0, n as i64 - 1) as usize;
            return Some(self.light_indices[i]);
        }

        if ty.contains(PrimitiveType::E) {
            return Some(self.sensor_index);
        }

        None
    }

    pub fn evaluate_emitter_pdf(&self, prim_index: usize) -> Float {
        let prim = &self.primitives[prim_index];
        if prim.ty.contains(PrimitiveType::L) {
            return 1.0 / self.light_indices.len() as Float;
        }
        if prim.ty.contains(PrimitiveType::E) {
            return 1.0;
        }
        0.0
    }

    pub fn intersect(&self, ray: &Ray3f) -> Option<Intersection> {
        let hit = self.accel.ray_intersection(ray, |tri_idx, ray, _closest| {
            let tri = self.triangles[tri_idx];
            let mesh = self.primitives[tri.prim].mesh.as_ref()?;
            let (p1, p2, p3) = mesh.triangle(tri.face);
            intersect_triangle(ray, &p1, &p2, &p3).map(|(t, u, v)| ((t, u, v), t))
        })?;

        let (tri_idx, (t, u, v)) = hit;
        let tri = self.triangles[tri_idx];
        Some(Intersection {
            geom: self.reconstruct_geometry(ray, tri, t, u, v),
            prim: tri.prim,
        })
    }

    // Occlusion between two surface points with epsilon offsets at both ends.
    pub fn visible(&self, p1: &Vector3f, p2: &Vector3f) -> bool {
        let p1p2 = p2 - p1;
        let p1p2_l = p1p2.norm();
        if p1p2_l <= 0.0 {
            return false;
        }
        let d = p1p2 / p1p2_l;
        let shadow_ray = Ray3f::new(*p1, d, Some(EPSILON), Some(p1p2_l * (1.0 - EPSILON)));

        !self.accel.ray_intersection_t(&shadow_ray, |tri_idx, ray| {
            let tri = self.triangles[tri_idx];
            let mesh = match self.primitives[tri.prim].mesh.as_ref() {
                Some(mesh) => mesh,
                None => return false,
            };
            let (p1, p2, p3) = mesh.triangle(tri.face);
            intersect_triangle(ray, &p1, &p2, &p3).is_some()
        })
    }

    fn reconstruct_geometry(&self, ray: &Ray3f, tri: TriangleRef,
                            t: Float, u: Float, v: Float) -> SurfaceGeometry {
        let mesh = self.primitives[tri.prim].mesh.as_ref()
            .expect("triangle refs only exist for mesh primitives");
        let (i1, i2, i3) = mesh.face(tri.face);
        let (p1, p2, p3) = mesh.triangle(tri.face);

        let mut geom = SurfaceGeometry::default();
        geom.p = ray.at(t);
        geom.gn = (p2 - p1).cross(&(p3 - p1)).normalize();

        // Shading normal from interpolated vertex normals; a NaN result
        // falls back to the face normal.
        let n1 = mesh.normal(i1);
        let n2 = mesh.normal(i2);
        let n3 = mesh.normal(i3);
        let n = n1 * (1.0 - u - v) + n2 * u + n3 * v;
        geom.sn = n.normalize();
        if geom.sn.x.is_nan() || geom.sn.y.is_nan() || geom.sn.z.is_nan() {
            geom.sn = geom.gn;
        }

        if mesh.has_texcoords() {
            let uv1 = mesh.texcoord(i1);
            let uv2 = mesh.texcoord(i2);
            let uv3 = mesh.texcoord(i3);
            geom.uv = uv1 * (1.0 - u - v) + uv2 * u + uv3 * v;
        }

        geom.degenerated = false;
        geom.compute_tangent_space();

        // Normal derivatives from the raw vertex normals, projected
        // perpendicular to the shading normal.
        let n_len = n.norm();
        if n_len > 0.0 {
            let dndu = (n2 - n1) / n_len;
            let dndv = (n3 - n2) / n_len;
            geom.dndu = dndu - geom.sn * dndu.dot(&geom.sn);
            geom.dndv = dndv - geom.sn * dndv.dot(&geom.sn);
        }

        geom
    }
}

// Test-only scene assembly helpers shared by the integrator tests.
#[cfg(test)]
pub mod testutil {
    use super::*;
    use crate::core::primitive::{ Bsdf, Light, Reflectance, Sensor };
    use crate::math::spectrum::RGBSpectrum;

    pub fn quad_mesh(p1: Vector3f, p2: Vector3f, p3: Vector3f, p4: Vector3f) -> Mesh {
        let mut mesh = Mesh::new();
        for p in [p1, p2, p3, p4] {
            mesh.positions.extend_from_slice(&[p.x, p.y, p.z]);
        }
        mesh.faces = vec![0, 1, 2, 0, 2, 3];
        mesh.texcoords = vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        mesh.generate_smooth_normals();
        mesh
    }

    pub struct SceneBuilder {
        primitives: Vec<Primitive>,
        light_indices: Vec<usize>,
        sensor_index: Option<usize>,
        meshes: Vec<Arc<Mesh>>,
    }

    impl SceneBuilder {
        pub fn new() -> Self {
            Self {
                primitives: Vec::new(),
                light_indices: Vec::new(),
                sensor_index: None,
                meshes: Vec::new(),
            }
        }

        pub fn pinhole(mut self, eye: Vector3f, center: Vector3f, up: Vector3f,
                       fov_deg: Float, aspect: Float) -> Self {
            let vz = (eye - center).normalize();
            let vx = up.cross(&vz).normalize();
            let vy = vz.cross(&vx);
            let mut prim = Primitive::new(PrimitiveType::E);
            prim.sensor = Some(Sensor::Pinhole {
                we: RGBSpectrum::splat(1.0),
                position: eye,
                vx, vy, vz,
                fov: fov_deg.to_radians(),
                aspect,
            });
            self.sensor_index = Some(self.primitives.len());
            self.primitives.push(prim);
            self
        }

        pub fn area_light(mut self, mesh: Mesh, le: RGBSpectrum) -> Self {
            let (dist, inv_area) = mesh.triangle_area_distribution();
            let mesh = Arc::new(mesh);
            let mut prim = Primitive::new(PrimitiveType::L | PrimitiveType::D);
            prim.light = Some(Light::Area { le, dist, inv_area });
            prim.bsdf = Some(Bsdf::Diffuse {
                reflectance: Reflectance::Constant(RGBSpectrum::default()),
            });
            prim.mesh = Some(mesh.clone());
            self.light_indices.push(self.primitives.len());
            self.primitives.push(prim);
            self.meshes.push(mesh);
            self
        }

        pub fn point_light(mut self, position: Vector3f, le: RGBSpectrum) -> Self {
            let mut prim = Primitive::new(PrimitiveType::L);
            prim.light = Some(Light::Point { le, position });
            self.light_indices.push(self.primitives.len());
            self.primitives.push(prim);
            self
        }

        pub fn directional_light(mut self, direction: Vector3f, le: RGBSpectrum) -> Self {
            // Bound parameters are patched in build().
            let mut prim = Primitive::new(PrimitiveType::L);
            prim.light = Some(Light::Directional {
                le,
                direction: direction.normalize(),
                center: Vector3f::zeros(),
                radius: 0.0,
                inv_area: 0.0,
            });
            self.light_indices.push(self.primitives.len());
            self.primitives.push(prim);
            self
        }

        pub fn diffuse_mesh(mut self, mesh: Mesh, r: RGBSpectrum) -> Self {
            let mesh = Arc::new(mesh);
            let mut prim = Primitive::new(PrimitiveType::D);
            prim.bsdf = Some(Bsdf::Diffuse { reflectance: Reflectance::Constant(r) });
            prim.mesh = Some(mesh.clone());
            self.primitives.push(prim);
            self.meshes.push(mesh);
            self
        }

        pub fn specular_mesh(mut self, mesh: Mesh, bsdf: Bsdf) -> Self {
            let mesh = Arc::new(mesh);
            let mut prim = Primitive::new(PrimitiveType::S);
            prim.bsdf = Some(bsdf);
            prim.mesh = Some(mesh.clone());
            self.primitives.push(prim);
            self.meshes.push(mesh);
            self
        }

        pub fn build(mut self) -> Scene {
            let mut bounds = AABB::default();
            for prim in &self.primitives {
                if let Some(mesh) = prim.mesh.as_ref() {
                    bounds.expand_by_aabb(&mesh.bounding_box());
                }
            }
            for prim in self.primitives.iter_mut() {
                if let Some(Light::Directional { center, radius, inv_area, .. }) = prim.light.as_mut() {
                    *center = bounds.center();
                    *radius = bounds.bounding_radius() * 1.01;
                    *inv_area = 1.0 / (crate::math::constants::PI * *radius * *radius);
                }
            }
            Scene::new(self.primitives,
                       self.light_indices,
                       self.sensor_index.expect("test scene needs a sensor"),
                       self.meshes,
                       Vec::new())
        }
    }
}

/* Tests for the scene */
