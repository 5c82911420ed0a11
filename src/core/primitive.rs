// Copyright @yucwang 2026

use crate::core::geometry::SurfaceGeometry;
use crate::core::mesh::{ face_normal, Mesh };
use crate::core::texture::Texture;
use crate::math::constants::{ Float, Matrix3f, PI, Vector2f, Vector3f };
use crate::math::distribution::Distribution1D;
use crate::math::spectrum::RGBSpectrum;
use crate::math::warp::{
    sample_cosine_hemisphere,
    sample_cosine_hemisphere_pdf_proj,
    sample_uniform_disk_concentric,
    sample_uniform_sphere,
    sample_uniform_sphere_pdf,
    sample_uniform_triangle,
};

use std::sync::Arc;

// Bitmask over the functional groups a primitive participates in. A vertex
// type is the subset of bits the current query interprets the primitive as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveType(u8);

impl PrimitiveType {
    pub const NONE: Self = Self(0);
    pub const D: Self = Self(1 << 0);
    pub const G: Self = Self(1 << 1);
    pub const S: Self = Self(1 << 2);
    pub const L: Self = Self(1 << 3);
    pub const E: Self = Self(1 << 4);
    pub const BSDF: Self = Self(1 << 0 | 1 << 1 | 1 << 2);
    pub const EMITTER: Self = Self(1 << 3 | 1 << 4);

    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for PrimitiveType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for PrimitiveType {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDirection {
    LE,
    EL,
}

pub enum Reflectance {
    Constant(RGBSpectrum),
    Textured(Arc<Texture>),
}

impl Reflectance {
    pub fn evaluate(&self, uv: &Vector2f) -> RGBSpectrum {
        match self {
            Reflectance::Constant(r) => *r,
            Reflectance::Textured(tex) => tex.evaluate(uv),
        }
    }
}

pub enum Light {
    Area {
        le: RGBSpectrum,
        dist: Distribution1D,
        inv_area: Float,
    },
    Point {
        le: RGBSpectrum,
        position: Vector3f,
    },
    Directional {
        le: RGBSpectrum,
        direction: Vector3f,
        center: Vector3f,
        radius: Float,
        inv_area: Float,
    },
}

pub enum Sensor {
    Pinhole {
        we: RGBSpectrum,
        position: Vector3f,
        vx: Vector3f,
        vy: Vector3f,
        vz: Vector3f,
        fov: Float,
        aspect: Float,
    },
    Area {
        we: RGBSpectrum,
        dist: Distribution1D,
        inv_area: Float,
    },
}

pub enum Bsdf {
    Diffuse {
        reflectance: Reflectance,
    },
    Glossy {
        reflectance: Reflectance,
        eta: RGBSpectrum,
        k: RGBSpectrum,
        roughness: Float,
    },
    SpecularReflection {
        tint: RGBSpectrum,
    },
    SpecularRefraction {
        tint: RGBSpectrum,
        eta1: Float,
        eta2: Float,
    },
    SpecularFresnel {
        tint: RGBSpectrum,
        eta1: Float,
        eta2: Float,
    },
}

// A scene primitive: any combination of at most one BSDF group {D, G, S}
// with at most one emitter group {L, E}. All sampling and evaluation goes
// through the bitmask query interface below so integrators can treat every
// path vertex uniformly.
pub struct Primitive {
    pub ty: PrimitiveType,
    pub mesh: Option<Arc<Mesh>>,
    pub light: Option<Light>,
    pub sensor: Option<Sensor>,
    pub bsdf: Option<Bsdf>,
}

impl Primitive {
    pub fn new(ty: PrimitiveType) -> Self {
        Self { ty, mesh: None, light: None, sensor: None, bsdf: None }
    }

    // Samples a position on the emitter. Position PDFs are with respect to
    // the area measure; degenerate positions flag the geometry instead.
    pub fn sample_position(&self, u: &Vector2f) -> Option<SurfaceGeometry> {
        if self.ty.contains(PrimitiveType::L) {
            match self.light.as_ref()? {
                Light::Area { dist, .. } => {
                    let mesh = self.mesh.as_ref()?;
                    return Some(sample_triangle_mesh(u, mesh, dist));
                }
                Light::Point { position, .. } => {
                    let mut geom = SurfaceGeometry::default();
                    geom.degenerated = true;
                    geom.p = *position;
                    return Some(geom);
                }
                Light::Directional { direction, center, radius, .. } => {
                    // A point on the virtual disk facing the scene.
                    let disk = sample_uniform_disk_concentric(u) * *radius;
                    let mut geom = SurfaceGeometry::default();
                    geom.degenerated = false;
                    geom.gn = *direction;
                    geom.sn = geom.gn;
                    geom.compute_tangent_space();
                    geom.p = center - direction * *radius
                        + geom.dpdu * disk.x + geom.dpdv * disk.y;
                    return Some(geom);
                }
            }
        }

        if self.ty.contains(PrimitiveType::E) {
            match self.sensor.as_ref()? {
                Sensor::Area { dist, .. } => {
                    let mesh = self.mesh.as_ref()?;
                    return Some(sample_triangle_mesh(u, mesh, dist));
                }
                Sensor::Pinhole { position, .. } => {
                    let mut geom = SurfaceGeometry::default();
                    geom.degenerated = true;
                    geom.p = *position;
                    return Some(geom);
                }
            }
        }

        None
    }

    // Position response. Delta positions contribute only when the caller
    // carries the delta inside the sampling step (`force_degenerated`).
    pub fn evaluate_position(&self, _geom: &SurfaceGeometry, force_degenerated: bool) -> RGBSpectrum {
        if self.ty.contains(PrimitiveType::L) {
            return match self.light.as_ref() {
                Some(Light::Area { .. }) | Some(Light::Directional { .. }) => RGBSpectrum::splat(1.0),
                Some(Light::Point { .. }) => {
                    if force_degenerated { RGBSpectrum::splat(1.0) } else { RGBSpectrum::default() }
                }
                None => RGBSpectrum::default(),
            };
        }

        if self.ty.contains(PrimitiveType::E) {
            return match self.sensor.as_ref() {
                Some(Sensor::Area { .. }) => RGBSpectrum::splat(1.0),
                Some(Sensor::Pinhole { .. }) => {
                    if force_degenerated { RGBSpectrum::splat(1.0) } else { RGBSpectrum::default() }
                }
                None => RGBSpectrum::default(),
            };
        }

        RGBSpectrum::default()
    }

    pub fn evaluate_position_pdf(&self, _geom: &SurfaceGeometry, force_degenerated: bool) -> Float {
        if self.ty.contains(PrimitiveType::L) {
            return match self.light.as_ref() {
                Some(Light::Area { inv_area, .. }) => *inv_area,
                Some(Light::Point { .. }) => if force_degenerated { 1.0 } else { 0.0 },
                Some(Light::Directional { inv_area, .. }) => *inv_area,
                None => 0.0,
            };
        }

        if self.ty.contains(PrimitiveType::E) {
            return match self.sensor.as_ref() {
                Some(Sensor::Area { inv_area, .. }) => *inv_area,
                Some(Sensor::Pinhole { .. }) => if force_degenerated { 1.0 } else { 0.0 },
                None => 0.0,
            };
        }

        0.0
    }

    // Samples an outgoing world-space direction for the interpretation named
    // by `query_type`. Returns None on dead-end samples.
    pub fn sample_direction(&self, u: &Vector2f, u_comp: Float, query_type: PrimitiveType,
                            geom: &SurfaceGeometry, wi: &Vector3f) -> Option<Vector3f> {
        if query_type.contains(PrimitiveType::L) {
            match self.light.as_ref()? {
                Light::Area { .. } => {
                    let local_wo = sample_cosine_hemisphere(u);
                    return Some(geom.to_world(&local_wo));
                }
                Light::Point { .. } => {
                    return Some(sample_uniform_sphere(u));
                }
                Light::Directional { direction, .. } => {
                    return Some(*direction);
                }
            }
        }

        if query_type.contains(PrimitiveType::E) {
            match self.sensor.as_ref()? {
                Sensor::Area { .. } => {
                    let local_wo = sample_cosine_hemisphere(u);
                    return Some(geom.to_world(&local_wo));
                }
                Sensor::Pinhole { vx, vy, vz, fov, aspect, .. } => {
                    let raster = 2.0 * u - Vector2f::new(1.0, 1.0);
                    let tan_fov = (fov * 0.5).tan();
                    let wo_eye = Vector3f::new(aspect * tan_fov * raster.x,
                                               tan_fov * raster.y,
                                               -1.0).normalize();
                    return Some(vx * wo_eye.x + vy * wo_eye.y + vz * wo_eye.z);
                }
            }
        }

        if query_type.contains(PrimitiveType::D) {
            let local_wi = geom.to_local(wi);
            if local_cos(&local_wi) <= 0.0 {
                return None;
            }
            let local_wo = sample_cosine_hemisphere(u);
            return Some(geom.to_world(&local_wo));
        }

        if query_type.contains(PrimitiveType::G) {
            let local_wi = geom.to_local(wi);
            if local_cos(&local_wi) <= 0.0 {
                return None;
            }
            let roughness = match self.bsdf.as_ref()? {
                Bsdf::Glossy { roughness, .. } => *roughness,
                _ => return None,
            };

            let h = sample_beckmann_dist(u, roughness);
            let local_wo = -local_wi - 2.0 * (-local_wi).dot(&h) * h;
            if local_cos(&local_wo) <= 0.0 {
                return None;
            }
            return Some(geom.to_world(&local_wo));
        }

        if query_type.contains(PrimitiveType::S) {
            match self.bsdf.as_ref()? {
                Bsdf::SpecularReflection { .. } => {
                    let local_wi = geom.to_local(wi);
                    if local_cos(&local_wi) <= 0.0 {
                        return None;
                    }
                    return Some(geom.to_world(&local_reflect(&local_wi)));
                }
                Bsdf::SpecularRefraction { eta1, eta2, .. } => {
                    let local_wi = geom.to_local(wi);
                    let (eta_i, eta_t) = oriented_iors(&local_wi, *eta1, *eta2);

                    let wi_dot_n = local_cos(&local_wi);
                    let eta = eta_i / eta_t;
                    let cos_theta_t_sq = 1.0 - eta * eta * (1.0 - wi_dot_n * wi_dot_n);
                    if cos_theta_t_sq <= 0.0 {
                        // Total internal reflection
                        return Some(geom.to_world(&local_reflect(&local_wi)));
                    }
                    let cos_theta_t = cos_theta_t_sq.sqrt() * if wi_dot_n > 0.0 { -1.0 } else { 1.0 };
                    return Some(geom.to_world(&local_refract(&local_wi, eta, cos_theta_t)));
                }
                Bsdf::SpecularFresnel { eta1, eta2, .. } => {
                    let local_wi = geom.to_local(wi);
                    let (eta_i, eta_t) = oriented_iors(&local_wi, *eta1, *eta2);

                    let fr = fresnel_dielectric(&local_wi, eta_i, eta_t);
                    if u_comp <= fr {
                        return Some(geom.to_world(&local_reflect(&local_wi)));
                    }
                    let wi_dot_n = local_cos(&local_wi);
                    let eta = eta_i / eta_t;
                    let cos_theta_t_sq = 1.0 - eta * eta * (1.0 - wi_dot_n * wi_dot_n);
                    let cos_theta_t = cos_theta_t_sq.max(0.0).sqrt() * if wi_dot_n > 0.0 { -1.0 } else { 1.0 };
                    return Some(geom.to_world(&local_refract(&local_wi, eta, cos_theta_t)));
                }
                _ => return None,
            }
        }

        None
    }

    // Emission, importance or BSDF value for the queried interpretation.
    // BSDF values carry the adjoint shading-normal correction for the given
    // transport direction.
    pub fn evaluate_direction(&self, geom: &SurfaceGeometry, query_type: PrimitiveType,
                              wi: &Vector3f, wo: &Vector3f, trans_dir: TransportDirection,
                              force_degenerated: bool) -> RGBSpectrum {
        if query_type.contains(PrimitiveType::EMITTER) {
            if query_type.contains(PrimitiveType::L) {
                if let Some(light) = self.light.as_ref() {
                    match light {
                        Light::Area { le, .. } => {
                            let local_wo = geom.to_local(wo);
                            if local_cos(&local_wo) <= 0.0 {
                                return RGBSpectrum::default();
                            }
                            return *le;
                        }
                        Light::Point { le, .. } => {
                            return *le;
                        }
                        Light::Directional { le, .. } => {
                            return if force_degenerated { *le } else { RGBSpectrum::default() };
                        }
                    }
                }
            }

            if query_type.contains(PrimitiveType::E) {
                if let Some(sensor) = self.sensor.as_ref() {
                    match sensor {
                        Sensor::Area { we, .. } => {
                            let local_wo = geom.to_local(wo);
                            if local_cos(&local_wo) <= 0.0 {
                                return RGBSpectrum::default();
                            }
                            return *we;
                        }
                        Sensor::Pinhole { vx, vy, vz, fov, aspect, .. } => {
                            if self.raster_position(wo, geom).is_none() {
                                return RGBSpectrum::default();
                            }
                            let v = Matrix3f::from_columns(&[*vx, *vy, *vz]).transpose();
                            let wo_eye = v * wo;
                            let tan_fov = (fov * 0.5).tan();
                            let cos_theta = -local_cos(&wo_eye);
                            let inv_cos_theta = 1.0 / cos_theta;
                            let a = tan_fov * tan_fov * aspect * 4.0;
                            return RGBSpectrum::splat(inv_cos_theta * inv_cos_theta * inv_cos_theta / a);
                        }
                    }
                }
            }

            return RGBSpectrum::default();
        }

        if query_type.contains(PrimitiveType::BSDF) {
            // Correction factor restoring the adjoint relation when shading
            // and geometric normals differ.
            let shading_normal_correction = {
                let local_wi = geom.to_local(wi);
                let local_wo = geom.to_local(wo);
                let wi_dot_ng = wi.dot(&geom.gn);
                let wo_dot_ng = wo.dot(&geom.gn);
                let wi_dot_ns = local_cos(&local_wi);
                let wo_dot_ns = local_cos(&local_wo);
                if wi_dot_ng * wi_dot_ns <= 0.0 || wo_dot_ng * wo_dot_ns <= 0.0 {
                    return RGBSpectrum::default();
                }
                if trans_dir == TransportDirection::LE {
                    wi_dot_ns * wo_dot_ng / (wo_dot_ns * wi_dot_ng)
                } else {
                    1.0
                }
            };

            if query_type.contains(PrimitiveType::D) {
                if let Some(Bsdf::Diffuse { reflectance }) = self.bsdf.as_ref() {
                    let local_wi = geom.to_local(wi);
                    let local_wo = geom.to_local(wo);
                    if local_cos(&local_wi) <= 0.0 || local_cos(&local_wo) <= 0.0 {
                        return RGBSpectrum::default();
                    }
                    return reflectance.evaluate(&geom.uv) * (1.0 / PI) * shading_normal_correction;
                }
                return RGBSpectrum::default();
            }

            if query_type.contains(PrimitiveType::G) {
                if let Some(Bsdf::Glossy { reflectance, eta, k, roughness }) = self.bsdf.as_ref() {
                    let local_wi = geom.to_local(wi);
                    let local_wo = geom.to_local(wo);
                    if local_cos(&local_wi) <= 0.0 || local_cos(&local_wo) <= 0.0 {
                        return RGBSpectrum::default();
                    }

                    let h = (local_wi + local_wo).normalize();
                    let d = evaluate_beckmann_dist(&h, *roughness);
                    let g = evaluate_shadow_masking(&local_wi, &local_wo, &h);
                    let f = fresnel_conductor(local_wi.dot(&h), eta, k);
                    let r = reflectance.evaluate(&geom.uv);
                    return r * f
                        * (d * g / (4.0 * local_cos(&local_wi)) / local_cos(&local_wo)
                           * shading_normal_correction);
                }
                return RGBSpectrum::default();
            }

            if query_type.contains(PrimitiveType::S) {
                if !force_degenerated {
                    return RGBSpectrum::default();
                }

                match self.bsdf.as_ref() {
                    Some(Bsdf::SpecularReflection { tint }) => {
                        let local_wi = geom.to_local(wi);
                        let local_wo = geom.to_local(wo);
                        if local_cos(&local_wi) <= 0.0 || local_cos(&local_wo) <= 0.0 {
                            return RGBSpectrum::default();
                        }
                        return *tint * shading_normal_correction;
                    }
                    Some(Bsdf::SpecularRefraction { tint, eta1, eta2 }) => {
                        let local_wi = geom.to_local(wi);
                        let (eta_i, eta_t) = oriented_iors(&local_wi, *eta1, *eta2);
                        let eta = eta_i / eta_t;
                        // Radiance compression under the adjoint transport.
                        let refr_correction = if trans_dir == TransportDirection::EL { eta } else { 1.0 };
                        return *tint * (shading_normal_correction * refr_correction * refr_correction);
                    }
                    Some(Bsdf::SpecularFresnel { tint, eta1, eta2 }) => {
                        let local_wi = geom.to_local(wi);
                        let local_wo = geom.to_local(wo);
                        let (eta_i, eta_t) = oriented_iors(&local_wi, *eta1, *eta2);
                        let fr = fresnel_dielectric(&local_wi, eta_i, eta_t);
                        if local_cos(&local_wi) * local_cos(&local_wo) >= 0.0 {
                            return *tint * (fr * shading_normal_correction);
                        }
                        let eta = eta_i / eta_t;
                        let refr_correction = if trans_dir == TransportDirection::EL { eta } else { 1.0 };
                        return *tint
                            * ((1.0 - fr) * shading_normal_correction * refr_correction * refr_correction);
                    }
                    _ => return RGBSpectrum::default(),
                }
            }
        }

        RGBSpectrum::default()
    }

    // PDF with respect to projected solid angle, consistent with
    // `sample_direction`.
    pub fn evaluate_direction_pdf(&self, geom: &SurfaceGeometry, query_type: PrimitiveType,
                                  wi: &Vector3f, wo: &Vector3f, force_degenerated: bool) -> Float {
        if query_type.contains(PrimitiveType::L) {
            if let Some(light) = self.light.as_ref() {
                match light {
                    Light::Area { .. } => {
                        let local_wo = geom.to_local(wo);
                        if local_cos(&local_wo) <= 0.0 {
                            return 0.0;
                        }
                        return sample_cosine_hemisphere_pdf_proj();
                    }
                    Light::Point { .. } => {
                        return sample_uniform_sphere_pdf();
                    }
                    Light::Directional { .. } => {
                        return if force_degenerated { 1.0 } else { 0.0 };
                    }
                }
            }
            return 0.0;
        }

        if query_type.contains(PrimitiveType::E) {
            if let Some(sensor) = self.sensor.as_ref() {
                match sensor {
                    Sensor::Area { .. } => {
                        let local_wo = geom.to_local(wo);
                        if local_cos(&local_wo) <= 0.0 {
                            return 0.0;
                        }
                        return sample_cosine_hemisphere_pdf_proj();
                    }
                    Sensor::Pinhole { vx, vy, vz, fov, aspect, .. } => {
                        if self.raster_position(wo, geom).is_none() {
                            return 0.0;
                        }
                        let v = Matrix3f::from_columns(&[*vx, *vy, *vz]).transpose();
                        let wo_eye = v * wo;
                        let tan_fov = (fov * 0.5).tan();
                        let cos_theta = -local_cos(&wo_eye);
                        let inv_cos_theta = 1.0 / cos_theta;
                        let a = tan_fov * tan_fov * aspect * 4.0;
                        return inv_cos_theta * inv_cos_theta * inv_cos_theta / a;
                    }
                }
            }
            return 0.0;
        }

        if query_type.contains(PrimitiveType::D) {
            let local_wi = geom.to_local(wi);
            let local_wo = geom.to_local(wo);
            if local_cos(&local_wi) <= 0.0 || local_cos(&local_wo) <= 0.0 {
                return 0.0;
            }
            return sample_cosine_hemisphere_pdf_proj();
        }

        if query_type.contains(PrimitiveType::G) {
            let roughness = match self.bsdf.as_ref() {
                Some(Bsdf::Glossy { roughness, .. }) => *roughness,
                _ => return 0.0,
            };
            let local_wi = geom.to_local(wi);
            let local_wo = geom.to_local(wo);
            if local_cos(&local_wi) <= 0.0 || local_cos(&local_wo) <= 0.0 {
                return 0.0;
            }

            let h = (local_wi + local_wo).normalize();
            let d = evaluate_beckmann_dist(&h, roughness);
            return d * local_cos(&h) / (4.0 * local_wo.dot(&h)) / local_cos(&local_wo);
        }

        if query_type.contains(PrimitiveType::S) {
            if !force_degenerated {
                return 0.0;
            }

            match self.bsdf.as_ref() {
                Some(Bsdf::SpecularReflection { .. }) => {
                    let local_wi = geom.to_local(wi);
                    let local_wo = geom.to_local(wo);
                    if local_cos(&local_wi) <= 0.0 || local_cos(&local_wo) <= 0.0 {
                        return 0.0;
                    }
                    return 1.0;
                }
                Some(Bsdf::SpecularRefraction { .. }) => {
                    return 1.0;
                }
                Some(Bsdf::SpecularFresnel { eta1, eta2, .. }) => {
                    let local_wi = geom.to_local(wi);
                    let local_wo = geom.to_local(wo);
                    let (eta_i, eta_t) = oriented_iors(&local_wi, *eta1, *eta2);
                    let fr = fresnel_dielectric(&local_wi, eta_i, eta_t);
                    return if local_cos(&local_wi) * local_cos(&local_wo) >= 0.0 {
                        fr
                    } else {
                        1.0 - fr
                    };
                }
                _ => return 0.0,
            }
        }

        0.0
    }

    // Projects the incident direction onto the raster plane of the sensor.
    pub fn raster_position(&self, wo: &Vector3f, geom: &SurfaceGeometry) -> Option<Vector2f> {
        match self.sensor.as_ref()? {
            Sensor::Pinhole { vx, vy, vz, fov, aspect, .. } => {
                let v = Matrix3f::from_columns(&[*vx, *vy, *vz]).transpose();
                let wo_eye = v * wo;
                // Behind the camera
                if local_cos(&wo_eye) >= 0.0 {
                    return None;
                }

                let tan_fov = (fov * 0.5).tan();
                let raster = (Vector2f::new(-wo_eye.x / wo_eye.z / tan_fov / aspect,
                                            -wo_eye.y / wo_eye.z / tan_fov)
                              + Vector2f::new(1.0, 1.0)) * 0.5;
                if raster.x < 0.0 || raster.x > 1.0 || raster.y < 0.0 || raster.y > 1.0 {
                    return None;
                }

                Some(raster)
            }
            Sensor::Area { .. } => Some(geom.uv),
        }
    }
}

fn local_cos(v: &Vector3f) -> Float {
    v.z
}

fn local_tan(v: &Vector3f) -> Float {
    let t = 1.0 - v.z * v.z;
    if t <= 0.0 { 0.0 } else { t.sqrt() / v.z }
}

fn local_reflect(wi: &Vector3f) -> Vector3f {
    Vector3f::new(-wi.x, -wi.y, wi.z)
}

fn local_refract(wi: &Vector3f, eta: Float, cos_theta_t: Float) -> Vector3f {
    Vector3f::new(-eta * wi.x, -eta * wi.y, cos_theta_t)
}

fn oriented_iors(local_wi: &Vector3f, eta1: Float, eta2: Float) -> (Float, Float) {
    if local_cos(local_wi) < 0.0 { (eta2, eta1) } else { (eta1, eta2) }
}

fn sample_beckmann_dist(u: &Vector2f, roughness: Float) -> Vector3f {
    let tan_theta_h_sqr = -roughness * roughness * (1.0 - u.x).ln();
    let cos_theta_h = 1.0 / (1.0 + tan_theta_h_sqr).sqrt();
    let sin_theta_h = (1.0 - cos_theta_h * cos_theta_h).max(0.0).sqrt();
    let phi_h = 2.0 * PI * u.y;
    Vector3f::new(sin_theta_h * phi_h.cos(), sin_theta_h * phi_h.sin(), cos_theta_h)
}

fn evaluate_beckmann_dist(h: &Vector3f, roughness: Float) -> Float {
    if local_cos(h) <= 0.0 {
        return 0.0;
    }
    let ex = local_tan(h) / roughness;
    let t1 = (-(ex * ex)).exp();
    let t2 = PI * roughness * roughness * local_cos(h).powi(4);
    t1 / t2
}

// V-cavity shadowing-masking.
fn evaluate_shadow_masking(wi: &Vector3f, wo: &Vector3f, h: &Vector3f) -> Float {
    let n_dot_h = local_cos(h);
    let n_dot_wo = local_cos(wo);
    let n_dot_wi = local_cos(wi);
    let wo_dot_h = wo.dot(h).abs();
    let wi_dot_h = wi.dot(h).abs();
    (2.0 * n_dot_h * n_dot_wo / wo_dot_h)
        .min(2.0 * n_dot_h * n_dot_wi / wi_dot_h)
        .min(1.0)
}

fn fresnel_conductor(cos_theta_i: Float, eta: &RGBSpectrum, k: &RGBSpectrum) -> RGBSpectrum {
    let mut out = RGBSpectrum::default();
    for c in 0..3 {
        let eta_c = eta[c];
        let k_c = k[c];
        let tmp = (eta_c * eta_c + k_c * k_c) * (cos_theta_i * cos_theta_i);
        let r_parl2 = (tmp - eta_c * (2.0 * cos_theta_i) + 1.0)
                    / (tmp + eta_c * (2.0 * cos_theta_i) + 1.0);
        let tmp_f = eta_c * eta_c + k_c * k_c;
        let r_perp2 = (tmp_f - eta_c * (2.0 * cos_theta_i) + cos_theta_i * cos_theta_i)
                    / (tmp_f + eta_c * (2.0 * cos_theta_i) + cos_theta_i * cos_theta_i);
        out[c] = (r_parl2 + r_perp2) * 0.5;
    }
    out
}

fn fresnel_dielectric(local_wi: &Vector3f, eta_i: Float, eta_t: Float) -> Float {
    let wi_dot_n = local_cos(local_wi);
    let eta = eta_i / eta_t;
    let cos_theta_t_sq = 1.0 - eta * eta * (1.0 - wi_dot_n * wi_dot_n);
    if cos_theta_t_sq <= 0.0 {
        // Total internal reflection
        return 1.0;
    }

    let abs_cos_theta_i = wi_dot_n.abs();
    let abs_cos_theta_t = cos_theta_t_sq.sqrt();
    let rho_s = (eta_i * abs_cos_theta_i - eta_t * abs_cos_theta_t)
              / (eta_i * abs_cos_theta_i + eta_t * abs_cos_theta_t);
    let rho_t = (eta_i * abs_cos_theta_t - eta_t * abs_cos_theta_i)
              / (eta_i * abs_cos_theta_t + eta_t * abs_cos_theta_i);

    (rho_s * rho_s + rho_t * rho_t) * 0.5
}

fn sample_triangle_mesh(u: &Vector2f, mesh: &Mesh, dist: &Distribution1D) -> SurfaceGeometry {
    let (face, u2x) = dist.sample_reuse(u.x);
    let b = sample_uniform_triangle(&Vector2f::new(u2x, u.y));

    let (i1, i2, i3) = mesh.face(face);
    let (p1, p2, p3) = mesh.triangle(face);

    let mut geom = SurfaceGeometry::default();
    geom.p = p1 * (1.0 - b.x - b.y) + p2 * b.x + p3 * b.y;

    if mesh.has_texcoords() {
        let uv1 = mesh.texcoord(i1);
        let uv2 = mesh.texcoord(i2);
        let uv3 = mesh.texcoord(i3);
        geom.uv = uv1 * (1.0 - b.x - b.y) + uv2 * b.x + uv3 * b.y;
    }

    geom.degenerated = false;
    geom.gn = face_normal(&p1, &p2, &p3);
    geom.sn = geom.gn;
    geom.compute_tangent_space();
    geom
}

/* Tests for the primitive model */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::LcgRng;

    fn flat_geom() -> SurfaceGeometry {
        let mut geom = SurfaceGeometry::default();
        geom.sn = Vector3f::new(0.0, 0.0, 1.0);
        geom.gn = geom.sn;
        geom.compute_tangent_space();
        geom
    }

    // Shading normal tilted away from the geometric normal.
    fn tilted_geom() -> SurfaceGeometry {
        let mut geom = SurfaceGeometry::default();
        geom.gn = Vector3f::new(0.0, 0.0, 1.0);
        geom.sn = Vector3f::new(0.15, -0.1, 1.0).normalize();
        geom.compute_tangent_space();
        geom
    }

    fn diffuse(r: Float) -> Primitive {
        let mut prim = Primitive::new(PrimitiveType::D);
        prim.bsdf = Some(Bsdf::Diffuse {
            reflectance: Reflectance::Constant(RGBSpectrum::splat(r)),
        });
        prim
    }

    fn glossy(roughness: Float) -> Primitive {
        let mut prim = Primitive::new(PrimitiveType::G);
        prim.bsdf = Some(Bsdf::Glossy {
            reflectance: Reflectance::Constant(RGBSpectrum::splat(1.0)),
            eta: RGBSpectrum::new(0.14, 0.37, 1.44),
            k: RGBSpectrum::new(3.98, 2.39, 1.60),
            roughness,
        });
        prim
    }

    fn fresnel_sphere() -> Primitive {
        let mut prim = Primitive::new(PrimitiveType::S);
        prim.bsdf = Some(Bsdf::SpecularFresnel {
            tint: RGBSpectrum::splat(1.0),
            eta1: 1.0,
            eta2: 1.5,
        });
        prim
    }

    fn pinhole(fov_deg: Float, aspect: Float) -> Primitive {
        let mut prim = Primitive::new(PrimitiveType::E);
        prim.sensor = Some(Sensor::Pinhole {
            we: RGBSpectrum::splat(1.0),
            position: Vector3f::zeros(),
            vx: Vector3f::new(1.0, 0.0, 0.0),
            vy: Vector3f::new(0.0, 1.0, 0.0),
            vz: Vector3f::new(0.0, 0.0, 1.0),
            fov: fov_deg.to_radians(),
            aspect,
        });
        prim
    }

    #[test]
    fn test_diffuse_energy_and_pdf_agreement() {
        let prim = diffuse(0.8);
        let geom = flat_geom();
        let wi = Vector3f::new(0.3, -0.2, 0.8).normalize();

        let mut rng = LcgRng::new(101);
        let n = 20000;
        let mut albedo = RGBSpectrum::default();
        let mut inv_pdf_mean = 0.0;
        for _ in 0..n {
            let wo = prim.sample_direction(&rng.next_2d(), rng.next_f64(),
                                           PrimitiveType::D, &geom, &wi).unwrap();
            let pdf = prim.evaluate_direction_pdf(&geom, PrimitiveType::D, &wi, &wo, true);
            assert!(pdf > 0.0);
            let fs = prim.evaluate_direction(&geom, PrimitiveType::D, &wi, &wo,
                                             TransportDirection::EL, true);
            albedo += fs / pdf;
            inv_pdf_mean += 1.0 / pdf;
        }
        albedo /= n as Float;
        inv_pdf_mean /= n as Float;

        // Directional-hemispherical reflectance is the constant reflectance.
        assert!((albedo[0] - 0.8).abs() < 0.02);
        assert!(albedo.max_component() <= 1.0);
        // Projected solid angle of the hemisphere is pi.
        assert!((inv_pdf_mean - PI).abs() < 0.05);
    }

    #[test]
    fn test_beckmann_energy_and_pdf_consistency() {
        let prim = glossy(0.2);
        let geom = flat_geom();
        let wi = Vector3f::new(0.4, 0.1, 0.9).normalize();

        let mut rng = LcgRng::new(103);
        let n = 20000;
        let mut albedo = RGBSpectrum::default();
        let mut accepted = 0;
        for _ in 0..n {
            let Some(wo) = prim.sample_direction(&rng.next_2d(), rng.next_f64(),
                                                 PrimitiveType::G, &geom, &wi) else {
                continue;
            };
            accepted += 1;
            let pdf = prim.evaluate_direction_pdf(&geom, PrimitiveType::G, &wi, &wo, true);
            assert!(pdf > 0.0);

            // The solid-angle PDF converts from the half-vector PDF.
            let local_wi = geom.to_local(&wi);
            let local_wo = geom.to_local(&wo);
            let h = (local_wi + local_wo).normalize();
            let d = super::evaluate_beckmann_dist(&h, 0.2);
            let expected = d * h.z / (4.0 * local_wo.dot(&h)) / local_wo.z;
            assert!((pdf - expected).abs() <= 1e-9 * expected.abs().max(1.0));

            let fs = prim.evaluate_direction(&geom, PrimitiveType::G, &wi, &wo,
                                             TransportDirection::EL, true);
            albedo += fs / pdf;
        }
        assert!(accepted > n / 2);
        albedo /= n as Float;
        assert!(albedo.max_component() <= 1.05);
        assert!(albedo.max_component() > 0.1);
    }

    #[test]
    fn test_adjoint_consistency() {
        let geom = tilted_geom();
        let prims = [diffuse(0.7), glossy(0.3)];
        let queries = [PrimitiveType::D, PrimitiveType::G];

        let mut rng = LcgRng::new(107);
        for (prim, query) in prims.iter().zip(queries) {
            let mut checked = 0;
            while checked < 50 {
                let wi = sample_cosine_hemisphere(&rng.next_2d());
                let wo = sample_cosine_hemisphere(&rng.next_2d());
                let wi = geom.to_world(&wi);
                let wo = geom.to_world(&wo);
                if wi.dot(&geom.gn) <= 0.0 || wo.dot(&geom.gn) <= 0.0 {
                    continue;
                }

                let fs_el = prim.evaluate_direction(&geom, query, &wi, &wo,
                                                    TransportDirection::EL, true);
                let fs_le = prim.evaluate_direction(&geom, query, &wo, &wi,
                                                    TransportDirection::LE, true);
                if fs_el.is_black() {
                    assert!(fs_le.is_black());
                    continue;
                }

                let lhs = fs_el[1] * wo.dot(&geom.sn).abs() / wo.dot(&geom.gn).abs();
                let rhs = fs_le[1] * wi.dot(&geom.sn).abs() / wi.dot(&geom.gn).abs();
                assert!((lhs - rhs).abs() <= 1e-9 * lhs.abs().max(1.0));
                checked += 1;
            }
        }
    }

    #[test]
    fn test_fresnel_mixture_snell_and_pdf() {
        let prim = fresnel_sphere();
        let geom = flat_geom();
        let wi = Vector3f::new(0.5, 0.0, 0.7).normalize();

        let mut rng = LcgRng::new(109);
        let mut pdf_sum_checked = false;
        for _ in 0..200 {
            let wo = prim.sample_direction(&rng.next_2d(), rng.next_f64(),
                                           PrimitiveType::S, &geom, &wi).unwrap();
            let pdf = prim.evaluate_direction_pdf(&geom, PrimitiveType::S, &wi, &wo, true);
            assert!(pdf > 0.0 && pdf <= 1.0);

            if wo.z < 0.0 {
                // Refracted: Snell's law with eta = 1 / 1.5.
                let sin_i = (1.0 - wi.z * wi.z).sqrt();
                let sin_t = (1.0 - wo.z * wo.z).sqrt();
                assert!((sin_t - sin_i / 1.5).abs() < 1e-9);

                // Reflection + refraction discrete probabilities sum to one.
                let reflected = Vector3f::new(-wi.x, -wi.y, wi.z);
                let pdf_refl = prim.evaluate_direction_pdf(&geom, PrimitiveType::S,
                                                           &wi, &reflected, true);
                assert!((pdf + pdf_refl - 1.0).abs() < 1e-9);
                pdf_sum_checked = true;
            }
        }
        assert!(pdf_sum_checked);
    }

    #[test]
    fn test_refraction_tir_falls_back_to_mirror() {
        let mut prim = Primitive::new(PrimitiveType::S);
        prim.bsdf = Some(Bsdf::SpecularRefraction {
            tint: RGBSpectrum::splat(1.0),
            eta1: 1.0,
            eta2: 1.5,
        });
        let geom = flat_geom();

        // Shallow direction from the dense side triggers TIR.
        let wi = Vector3f::new(0.95, 0.0, -(1.0f64 - 0.95 * 0.95).sqrt());
        let wo = prim.sample_direction(&Vector2f::zeros(), 0.0,
                                       PrimitiveType::S, &geom, &wi).unwrap();
        assert!((wo - Vector3f::new(-wi.x, -wi.y, wi.z)).norm() < 1e-12);
    }

    #[test]
    fn test_pinhole_sample_raster_roundtrip() {
        let prim = pinhole(60.0, 16.0 / 9.0);
        let geom = {
            let mut geom = SurfaceGeometry::default();
            geom.degenerated = true;
            geom
        };

        let mut rng = LcgRng::new(113);
        for _ in 0..100 {
            let u = rng.next_2d();
            let wo = prim.sample_direction(&u, 0.0, PrimitiveType::E, &geom, &Vector3f::zeros())
                .unwrap();
            let raster = prim.raster_position(&wo, &geom).unwrap();
            assert!((raster.x - u.x).abs() < 1e-9);
            assert!((raster.y - u.y).abs() < 1e-9);
        }

        // Directions behind the camera project nowhere.
        assert!(prim.raster_position(&Vector3f::new(0.0, 0.0, 1.0), &geom).is_none());
    }

    #[test]
    fn test_pinhole_importance_matches_pdf() {
        let prim = pinhole(45.0, 1.0);
        let geom = {
            let mut geom = SurfaceGeometry::default();
            geom.degenerated = true;
            geom
        };

        let wo = prim.sample_direction(&Vector2f::new(0.3, 0.7), 0.0, PrimitiveType::E,
                                       &geom, &Vector3f::zeros()).unwrap();
        let we = prim.evaluate_direction(&geom, PrimitiveType::E, &Vector3f::zeros(), &wo,
                                         TransportDirection::LE, false);
        let pdf = prim.evaluate_direction_pdf(&geom, PrimitiveType::E,
                                              &Vector3f::zeros(), &wo, true);
        assert!(pdf > 0.0);
        assert!((we[0] - pdf).abs() < 1e-9);
    }

    #[test]
    fn test_area_light_sampling() {
        use crate::core::mesh::Mesh;

        let mut mesh = Mesh::new();
        mesh.positions = vec![
            0.0, 0.0, 0.0,
            1.0, 0.0, 0.0,
            1.0, 1.0, 0.0,
            0.0, 1.0, 0.0,
        ];
        mesh.normals = vec![0.0; 12];
        mesh.faces = vec![0, 1, 2, 0, 2, 3];
        let (dist, inv_area) = mesh.triangle_area_distribution();

        let mut prim = Primitive::new(PrimitiveType::L);
        prim.light = Some(Light::Area { le: RGBSpectrum::splat(5.0), dist, inv_area });
        prim.mesh = Some(Arc::new(mesh));

        let mut rng = LcgRng::new(127);
        for _ in 0..200 {
            let geom = prim.sample_position(&rng.next_2d()).unwrap();
            assert!(!geom.degenerated);
            assert!(geom.p.x >= 0.0 && geom.p.x <= 1.0);
            assert!(geom.p.y >= 0.0 && geom.p.y <= 1.0);
            assert!(geom.p.z.abs() < 1e-12);
        }
        assert!((prim.evaluate_position_pdf(&SurfaceGeometry::default(), true) - 1.0).abs() < 1e-12);

        // Emission masked on the back side.
        let geom = prim.sample_position(&Vector2f::new(0.5, 0.5)).unwrap();
        let le = prim.evaluate_direction(&geom, PrimitiveType::L, &Vector3f::zeros(),
                                         &geom.sn, TransportDirection::LE, false);
        assert!((le[0] - 5.0).abs() < 1e-12);
        let back = prim.evaluate_direction(&geom, PrimitiveType::L, &Vector3f::zeros(),
                                           &(-geom.sn), TransportDirection::LE, false);
        assert!(back.is_black());
    }
}
