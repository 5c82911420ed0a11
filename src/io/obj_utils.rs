// Copyright @yucwang 2026

use crate::core::mesh::Mesh;

use wavefront_obj::{ obj, ParseError };
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug)]
pub enum ObjLoadError {
    Io(std::io::Error),
    Parse(ParseError),
}

impl From<std::io::Error> for ObjLoadError {
    fn from(err: std::io::Error) -> Self {
        ObjLoadError::Io(err)
    }
}

impl From<ParseError> for ObjLoadError {
    fn from(err: ParseError) -> Self {
        ObjLoadError::Parse(err)
    }
}

impl fmt::Display for ObjLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjLoadError::Io(err) => write!(f, "io error: {}", err),
            ObjLoadError::Parse(err) => write!(f, "parse error: {}", err),
        }
    }
}

impl std::error::Error for ObjLoadError {}

pub fn load_obj_from_str<S: AsRef<str>>(input: S) -> Result<obj::ObjSet, ParseError> {
    let triangulated = triangulate_faces(input.as_ref());
    obj::parse(triangulated)
}

pub fn load_obj_from_file<P: AsRef<Path>>(path: P) -> Result<obj::ObjSet, ObjLoadError> {
    let data = fs::read_to_string(path)?;
    let obj_set = load_obj_from_str(data)?;
    Ok(obj_set)
}

// Loads an OBJ file into a renderer mesh. Vertices are deduplicated per
// (position, texcoord, normal) index triple; texcoords survive only when
// every face vertex carries one. Missing normals are generated according to
// the postprocess toggles (smooth wins when both are set).
pub fn mesh_from_obj<P: AsRef<Path>>(path: P,
                                     generate_normals: bool,
                                     generate_smooth_normals: bool) -> Result<Mesh, ObjLoadError> {
    let obj_set = load_obj_from_file(path)?;
    let mut mesh = Mesh::new();

    let has_uvs = obj_set.objects.iter().all(|object| {
        object.geometry.iter().all(|geometry| {
            geometry.shapes.iter().all(|shape| match &shape.primitive {
                obj::Primitive::Triangle(a, b, c) => {
                    a.1.is_some() && b.1.is_some() && c.1.is_some()
                }
                _ => true,
            })
        })
    });
    let has_normals = obj_set.objects.iter().all(|object| {
        object.geometry.iter().all(|geometry| {
            geometry.shapes.iter().all(|shape| match &shape.primitive {
                obj::Primitive::Triangle(a, b, c) => {
                    a.2.is_some() && b.2.is_some() && c.2.is_some()
                }
                _ => true,
            })
        })
    });

    for object in &obj_set.objects {
        let mut remap: HashMap<(usize, Option<usize>, Option<usize>), u32> = HashMap::new();
        for geometry in &object.geometry {
            for shape in &geometry.shapes {
                let obj::Primitive::Triangle(a, b, c) = &shape.primitive else {
                    continue;
                };
                for vtn in [*a, *b, *c] {
                    let index = *remap.entry(vtn).or_insert_with(|| {
                        let index = (mesh.positions.len() / 3) as u32;
                        let p = &object.vertices[vtn.0];
                        mesh.positions.extend_from_slice(&[p.x, p.y, p.z]);
                        if has_uvs {
                            if let Some(t) = vtn.1 {
                                let uv = &object.tex_vertices[t];
                                mesh.texcoords.extend_from_slice(&[uv.u, uv.v]);
                            }
                        }
                        if has_normals {
                            if let Some(n) = vtn.2 {
                                let n = &object.normals[n];
                                mesh.normals.extend_from_slice(&[n.x, n.y, n.z]);
                            }
                        }
                        index
                    });
                    mesh.faces.push(index);
                }
            }
        }
    }

    if !has_normals {
        mesh.normals.clear();
        if generate_smooth_normals {
            mesh.generate_smooth_normals();
        } else if generate_normals {
            mesh.generate_flat_normals();
        } else {
            mesh.generate_smooth_normals();
        }
    }

    Ok(mesh)
}

fn triangulate_faces(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 4);
    for line in input.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("f ") || trimmed.starts_with("f\t") {
            let parts: Vec<&str> = trimmed.split_whitespace().collect();
            if parts.len() > 4 {
                let base = parts[1];
                for i in 2..(parts.len() - 1) {
                    out.push_str("f ");
                    out.push_str(base);
                    out.push(' ');
                    out.push_str(parts[i]);
                    out.push(' ');
                    out.push_str(parts[i + 1]);
                    out.push('\n');
                }
                continue;
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/* Tests for OBJ loading */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_obj_from_str_basic() {
        let input = "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
f 1 2 3
";
        let obj_set = load_obj_from_str(input).expect("failed to parse obj");
        assert_eq!(obj_set.objects.len(), 1);
        let object = &obj_set.objects[0];
        assert_eq!(object.vertices.len(), 3);
        assert_eq!(object.geometry.len(), 1);
    }

    #[test]
    fn test_quad_triangulated() {
        let input = "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 1.0 1.0 0.0
v 0.0 1.0 0.0
f 1 2 3 4
";
        let obj_set = load_obj_from_str(input).expect("failed to parse obj");
        let object = &obj_set.objects[0];
        let shapes: usize = object.geometry.iter().map(|g| g.shapes.len()).sum();
        assert_eq!(shapes, 2);
    }

    #[test]
    fn test_mesh_from_obj_generates_normals() {
        let dir = std::env::temp_dir();
        let path = dir.join("genoise_obj_utils_quad.obj");
        std::fs::write(&path, "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 1.0 1.0 0.0
v 0.0 1.0 0.0
f 1 2 3 4
").expect("write obj");

        let mesh = mesh_from_obj(&path, false, true).expect("load mesh");
        assert_eq!(mesh.num_faces(), 2);
        assert_eq!(mesh.normals.len(), mesh.positions.len());
        let n = mesh.normal(0);
        assert!((n.z.abs() - 1.0).abs() < 1e-9);
        assert!(!mesh.has_texcoords());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_mesh_from_obj_keeps_uvs() {
        let dir = std::env::temp_dir();
        let path = dir.join("genoise_obj_utils_uv.obj");
        std::fs::write(&path, "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 0.0 1.0
f 1/1 2/2 3/3
").expect("write obj");

        let mesh = mesh_from_obj(&path, false, false).expect("load mesh");
        assert_eq!(mesh.num_faces(), 1);
        assert!(mesh.has_texcoords());
        assert!((mesh.texcoord(1).x - 1.0).abs() < 1e-12);

        std::fs::remove_file(&path).ok();
    }
}
