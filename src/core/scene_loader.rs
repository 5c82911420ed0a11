// Copyright @yucwang 2026

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use quick_xml::events::{ BytesStart, Event };
use quick_xml::Reader;

use crate::core::mesh::Mesh;
use crate::core::primitive::{ Bsdf, Light, Primitive, PrimitiveType, Reflectance, Sensor };
use crate::core::scene::Scene;
use crate::core::texture::Texture;
use crate::io::obj_utils::{ mesh_from_obj, ObjLoadError };
use crate::math::aabb::AABB;
use crate::math::constants::{ Float, PI, Vector3f };
use crate::math::spectrum::RGBSpectrum;

const CONFIG_VERSION_MIN: i32 = 3;
const CONFIG_VERSION_MAX: i32 = 5;

#[derive(Debug)]
pub enum SceneLoadError {
    Io(std::io::Error),
    Parse(String),
    Version(i32),
    MissingField(&'static str),
    Incompatible(&'static str),
    Mesh(ObjLoadError),
    Texture(String),
}

impl From<std::io::Error> for SceneLoadError {
    fn from(err: std::io::Error) -> Self {
        SceneLoadError::Io(err)
    }
}

impl From<ObjLoadError> for SceneLoadError {
    fn from(err: ObjLoadError) -> Self {
        SceneLoadError::Mesh(err)
    }
}

impl fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneLoadError::Io(err) => write!(f, "io error: {}", err),
            SceneLoadError::Parse(msg) => write!(f, "parse error: {}", msg),
            SceneLoadError::Version(v) => write!(
                f, "invalid config version [min {}, max {}, actual {}]",
                CONFIG_VERSION_MIN, CONFIG_VERSION_MAX, v),
            SceneLoadError::MissingField(field) => write!(f, "missing field: {}", field),
            SceneLoadError::Incompatible(msg) => write!(f, "incompatible primitive: {}", msg),
            SceneLoadError::Mesh(err) => write!(f, "mesh load error: {}", err),
            SceneLoadError::Texture(msg) => write!(f, "texture load error: {}", msg),
        }
    }
}

impl std::error::Error for SceneLoadError {}

pub fn load_scene<P: AsRef<Path>>(path: P, aspect: Float) -> Result<Scene, SceneLoadError> {
    let path = path.as_ref();
    let xml = fs::read_to_string(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_scene(&xml, base_dir, aspect)
}

// Per-primitive builder state collected while walking the XML events.
struct PrimitiveState {
    ty: PrimitiveType,
    mesh: Option<Arc<Mesh>>,
    l_type: Option<String>,
    le: Option<RGBSpectrum>,
    position: Option<Vector3f>,
    direction: Option<Vector3f>,
    e_type: Option<String>,
    we: Option<RGBSpectrum>,
    eye: Option<Vector3f>,
    center: Option<Vector3f>,
    up: Option<Vector3f>,
    fov: Option<Float>,
    d_reflectance: Option<Reflectance>,
    g_reflectance: Option<Reflectance>,
    g_eta: Option<RGBSpectrum>,
    g_k: Option<RGBSpectrum>,
    g_roughness: Option<Float>,
    s_type: Option<String>,
    s_tint: Option<RGBSpectrum>,
    s_eta1: Float,
    s_eta2: Float,
}

impl PrimitiveState {
    fn new(ty: PrimitiveType) -> Self {
        Self {
            ty,
            mesh: None,
            l_type: None,
            le: None,
            position: None,
            direction: None,
            e_type: None,
            we: None,
            eye: None,
            center: None,
            up: None,
            fov: None,
            d_reflectance: None,
            g_reflectance: None,
            g_eta: None,
            g_k: None,
            g_roughness: None,
            s_type: None,
            s_tint: None,
            s_eta1: 1.0,
            s_eta2: 1.5,
        }
    }
}

fn attr(e: &BytesStart, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

fn parse_vec3(value: &str) -> Result<Vector3f, SceneLoadError> {
    let parts: Vec<Float> = value
        .split_whitespace()
        .filter_map(|v| v.parse().ok())
        .collect();
    if parts.len() != 3 {
        return Err(SceneLoadError::Parse(format!("expected 3 components: {}", value)));
    }
    Ok(Vector3f::new(parts[0], parts[1], parts[2]))
}

fn parse_spectrum(value: &str) -> Result<RGBSpectrum, SceneLoadError> {
    let v = parse_vec3(value)?;
    Ok(RGBSpectrum::new(v.x, v.y, v.z))
}

fn parse_type_list(value: &str) -> Result<PrimitiveType, SceneLoadError> {
    let mut ty = PrimitiveType::NONE;
    for part in value.split_whitespace() {
        ty |= match part {
            "D" => PrimitiveType::D,
            "G" => PrimitiveType::G,
            "S" => PrimitiveType::S,
            "L" => PrimitiveType::L,
            "E" => PrimitiveType::E,
            _ => return Err(SceneLoadError::Parse(format!("unknown primitive type: {}", part))),
        };
    }
    if ty.is_none()
        || (ty.contains(PrimitiveType::L) && ty.contains(PrimitiveType::E)) {
        return Err(SceneLoadError::Incompatible("invalid primitive type combination"));
    }
    Ok(ty)
}

fn parse_bool(value: Option<String>) -> bool {
    matches!(value.as_deref(), Some("true") | Some("1"))
}

fn parse_scene(xml: &str, base_dir: &Path, aspect: Float) -> Result<Scene, SceneLoadError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut version_seen = false;
    let mut primitives: Vec<Primitive> = Vec::new();
    let mut light_indices: Vec<usize> = Vec::new();
    let mut sensor_index: Option<usize> = None;
    let mut meshes: Vec<Arc<Mesh>> = Vec::new();
    let mut textures: Vec<Arc<Texture>> = Vec::new();
    let mut texture_cache: HashMap<String, Arc<Texture>> = HashMap::new();

    let mut state: Option<PrimitiveState> = None;
    let mut group: Option<char> = None;

    let mut load_texture = |path: String, textures: &mut Vec<Arc<Texture>>|
        -> Result<Arc<Texture>, SceneLoadError> {
        if let Some(tex) = texture_cache.get(&path) {
            return Ok(tex.clone());
        }
        log::info!("Loading texture: {}", path);
        let tex = Arc::new(Texture::from_file(&path)
            .map_err(|e| SceneLoadError::Texture(e.to_string()))?);
        texture_cache.insert(path, tex.clone());
        textures.push(tex.clone());
        Ok(tex)
    };

    loop {
        let event = reader.read_event()
            .map_err(|e| SceneLoadError::Parse(e.to_string()))?;
        let self_closing = matches!(event, Event::Empty(_));
        match event {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "scene" => {
                        let version: i32 = attr(e, "version")
                            .ok_or(SceneLoadError::MissingField("scene.version"))?
                            .parse()
                            .map_err(|_| SceneLoadError::Parse(String::from("bad version")))?;
                        if !(CONFIG_VERSION_MIN..=CONFIG_VERSION_MAX).contains(&version) {
                            return Err(SceneLoadError::Version(version));
                        }
                        version_seen = true;
                    }
                    "primitive" => {
                        let ty = parse_type_list(
                            &attr(e, "type").ok_or(SceneLoadError::MissingField("primitive.type"))?)?;
                        state = Some(PrimitiveState::new(ty));
                    }
                    "mesh" => {
                        if let Some(state) = state.as_mut() {
                            let path = attr(e, "path")
                                .ok_or(SceneLoadError::MissingField("mesh.path"))?;
                            let generate_normals = parse_bool(attr(e, "generate_normals"));
                            let generate_smooth = parse_bool(attr(e, "generate_smooth_normals"));
                            log::info!("Loading mesh: {}", path);
                            let mesh = mesh_from_obj(base_dir.join(&path),
                                                     generate_normals, generate_smooth)?;
                            state.mesh = Some(Arc::new(mesh));
                        }
                    }
                    "L" => {
                        if let Some(state) = state.as_mut() {
                            state.l_type = attr(e, "type");
                        }
                        group = Some('L');
                    }
                    "E" => {
                        if let Some(state) = state.as_mut() {
                            state.e_type = attr(e, "type");
                        }
                        group = Some('E');
                    }
                    "D" => {
                        group = Some('D');
                    }
                    "G" => {
                        group = Some('G');
                    }
                    "S" => {
                        if let Some(state) = state.as_mut() {
                            state.s_type = attr(e, "type");
                            if let Some(v) = attr(e, "eta1") {
                                state.s_eta1 = v.parse()
                                    .map_err(|_| SceneLoadError::Parse(String::from("bad eta1")))?;
                            }
                            if let Some(v) = attr(e, "eta2") {
                                state.s_eta2 = v.parse()
                                    .map_err(|_| SceneLoadError::Parse(String::from("bad eta2")))?;
                            }
                        }
                        group = Some('S');
                    }
                    "Le" => {
                        if let Some(state) = state.as_mut() {
                            state.le = Some(parse_spectrum(
                                &attr(e, "value").ok_or(SceneLoadError::MissingField("Le.value"))?)?);
                        }
                    }
                    "We" => {
                        if let Some(state) = state.as_mut() {
                            state.we = Some(parse_spectrum(
                                &attr(e, "value").ok_or(SceneLoadError::MissingField("We.value"))?)?);
                        }
                    }
                    "position" => {
                        if let Some(state) = state.as_mut() {
                            state.position = Some(parse_vec3(
                                &attr(e, "value").ok_or(SceneLoadError::MissingField("position.value"))?)?);
                        }
                    }
                    "direction" => {
                        if let Some(state) = state.as_mut() {
                            state.direction = Some(parse_vec3(
                                &attr(e, "value").ok_or(SceneLoadError::MissingField("direction.value"))?)?);
                        }
                    }
                    "view" => {
                        if let Some(state) = state.as_mut() {
                            state.eye = Some(parse_vec3(
                                &attr(e, "eye").ok_or(SceneLoadError::MissingField("view.eye"))?)?);
                            state.center = Some(parse_vec3(
                                &attr(e, "center").ok_or(SceneLoadError::MissingField("view.center"))?)?);
                            state.up = Some(parse_vec3(
                                &attr(e, "up").ok_or(SceneLoadError::MissingField("view.up"))?)?);
                        }
                    }
                    "perspective" => {
                        if let Some(state) = state.as_mut() {
                            let fov: Float = attr(e, "fov")
                                .ok_or(SceneLoadError::MissingField("perspective.fov"))?
                                .parse()
                                .map_err(|_| SceneLoadError::Parse(String::from("bad fov")))?;
                            state.fov = Some(fov.to_radians());
                        }
                    }
                    "R" => {
                        if let Some(state) = state.as_mut() {
                            let value = parse_spectrum(
                                &attr(e, "value").ok_or(SceneLoadError::MissingField("R.value"))?)?;
                            match group {
                                Some('D') => state.d_reflectance = Some(Reflectance::Constant(value)),
                                Some('G') => state.g_reflectance = Some(Reflectance::Constant(value)),
                                Some('S') => state.s_tint = Some(value),
                                _ => {}
                            }
                        }
                    }
                    "TexR" => {
                        if let Some(state) = state.as_mut() {
                            let path = attr(e, "path")
                                .ok_or(SceneLoadError::MissingField("TexR.path"))?;
                            let full_path = base_dir.join(&path).to_string_lossy().into_owned();
                            let tex = load_texture(full_path, &mut textures)?;
                            match group {
                                Some('D') => state.d_reflectance = Some(Reflectance::Textured(tex)),
                                Some('G') => state.g_reflectance = Some(Reflectance::Textured(tex)),
                                _ => {}
                            }
                        }
                    }
                    "Eta" => {
                        if let Some(state) = state.as_mut() {
                            state.g_eta = Some(parse_spectrum(
                                &attr(e, "value").ok_or(SceneLoadError::MissingField("G.Eta"))?)?);
                        }
                    }
                    "K" => {
                        if let Some(state) = state.as_mut() {
                            state.g_k = Some(parse_spectrum(
                                &attr(e, "value").ok_or(SceneLoadError::MissingField("G.K"))?)?);
                        }
                    }
                    "Roughness" => {
                        if let Some(state) = state.as_mut() {
                            state.g_roughness = Some(attr(e, "value")
                                .ok_or(SceneLoadError::MissingField("G.Roughness"))?
                                .parse()
                                .map_err(|_| SceneLoadError::Parse(String::from("bad roughness")))?);
                        }
                    }
                    _ => {}
                }

                // Self-closing group tags leave no End event behind.
                if self_closing && matches!(name.as_str(), "L" | "E" | "D" | "G" | "S") {
                    group = None;
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "primitive" => {
                        let Some(current) = state.take() else {
                            continue;
                        };
                        let index = primitives.len();
                        let prim = build_primitive(current, aspect, &mut meshes)?;
                        if prim.ty.contains(PrimitiveType::E) {
                            sensor_index = Some(index);
                        }
                        if prim.ty.contains(PrimitiveType::L) {
                            light_indices.push(index);
                        }
                        primitives.push(prim);
                    }
                    "L" | "E" | "D" | "G" | "S" => {
                        group = None;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    if !version_seen {
        return Err(SceneLoadError::MissingField("scene.version"));
    }
    let sensor_index = sensor_index.ok_or(SceneLoadError::MissingField("sensor primitive"))?;

    post_configure_primitives(&mut primitives);

    Ok(Scene::new(primitives, light_indices, sensor_index, meshes, textures))
}

fn build_primitive(state: PrimitiveState, aspect: Float,
                   meshes: &mut Vec<Arc<Mesh>>) -> Result<Primitive, SceneLoadError> {
    let mut prim = Primitive::new(state.ty);
    if let Some(mesh) = state.mesh.clone() {
        meshes.push(mesh.clone());
        prim.mesh = Some(mesh);
    }

    if state.ty.contains(PrimitiveType::L) {
        let l_type = state.l_type.as_deref().ok_or(SceneLoadError::MissingField("L.type"))?;
        let le = state.le.ok_or(SceneLoadError::MissingField("L.Le"))?;
        prim.light = Some(match l_type {
            "area" => {
                let mesh = prim.mesh.as_ref()
                    .ok_or(SceneLoadError::Incompatible("area light must be associated with mesh"))?;
                let (dist, inv_area) = mesh.triangle_area_distribution();
                Light::Area { le, dist, inv_area }
            }
            "point" => Light::Point {
                le,
                position: state.position.ok_or(SceneLoadError::MissingField("L.position"))?,
            },
            "directional" => Light::Directional {
                le,
                direction: state.direction
                    .ok_or(SceneLoadError::MissingField("L.direction"))?
                    .normalize(),
                center: Vector3f::zeros(),
                radius: 0.0,
                inv_area: 0.0,
            },
            _ => return Err(SceneLoadError::Parse(format!("unknown light type: {}", l_type))),
        });
    }

    if state.ty.contains(PrimitiveType::E) {
        let e_type = state.e_type.as_deref().ok_or(SceneLoadError::MissingField("E.type"))?;
        let we = state.we.ok_or(SceneLoadError::MissingField("E.We"))?;
        prim.sensor = Some(match e_type {
            "pinhole" => {
                let eye = state.eye.ok_or(SceneLoadError::MissingField("E.view.eye"))?;
                let center = state.center.ok_or(SceneLoadError::MissingField("E.view.center"))?;
                let up = state.up.ok_or(SceneLoadError::MissingField("E.view.up"))?;
                let fov = state.fov.ok_or(SceneLoadError::MissingField("E.perspective.fov"))?;
                let vz = (eye - center).normalize();
                let vx = up.cross(&vz).normalize();
                let vy = vz.cross(&vx);
                Sensor::Pinhole { we, position: eye, vx, vy, vz, fov, aspect }
            }
            "area" => {
                let mesh = prim.mesh.as_ref()
                    .ok_or(SceneLoadError::Incompatible("area sensor must be associated with mesh"))?;
                if !mesh.has_texcoords() {
                    return Err(SceneLoadError::Incompatible(
                        "area sensor mesh must carry UV coordinates"));
                }
                let (dist, inv_area) = mesh.triangle_area_distribution();
                Sensor::Area { we, dist, inv_area }
            }
            _ => return Err(SceneLoadError::Parse(format!("unknown sensor type: {}", e_type))),
        });
    }

    if state.ty.contains(PrimitiveType::D) {
        prim.bsdf = Some(Bsdf::Diffuse {
            reflectance: state.d_reflectance.ok_or(SceneLoadError::MissingField("D.R"))?,
        });
    }

    if state.ty.contains(PrimitiveType::G) {
        prim.bsdf = Some(Bsdf::Glossy {
            reflectance: state.g_reflectance.ok_or(SceneLoadError::MissingField("G.R"))?,
            eta: state.g_eta.ok_or(SceneLoadError::MissingField("G.Eta"))?,
            k: state.g_k.ok_or(SceneLoadError::MissingField("G.K"))?,
            roughness: state.g_roughness.ok_or(SceneLoadError::MissingField("G.Roughness"))?,
        });
    }

    if state.ty.contains(PrimitiveType::S) {
        let s_type = state.s_type.as_deref().ok_or(SceneLoadError::MissingField("S.type"))?;
        let tint = state.s_tint.ok_or(SceneLoadError::MissingField("S.R"))?;
        prim.bsdf = Some(match s_type {
            "reflection" => Bsdf::SpecularReflection { tint },
            "refraction" => Bsdf::SpecularRefraction {
                tint,
                eta1: state.s_eta1,
                eta2: state.s_eta2,
            },
            "fresnel" => Bsdf::SpecularFresnel {
                tint,
                eta1: state.s_eta1,
                eta2: state.s_eta2,
            },
            _ => return Err(SceneLoadError::Parse(format!("unknown specular type: {}", s_type))),
        });
    }

    Ok(prim)
}

// Directional lights receive the scene bounding sphere once all meshes are
// known.
fn post_configure_primitives(primitives: &mut [Primitive]) {
    let mut bounds = AABB::default();
    for prim in primitives.iter() {
        if let Some(mesh) = prim.mesh.as_ref() {
            bounds.expand_by_aabb(&mesh.bounding_box());
        }
    }

    for prim in primitives.iter_mut() {
        if let Some(Light::Directional { center, radius, inv_area, .. }) = prim.light.as_mut() {
            *center = bounds.center();
            *radius = bounds.bounding_radius() * 1.01;
            *inv_area = 1.0 / (PI * *radius * *radius);
        }
    }
}

/* Tests for the scene loader */
