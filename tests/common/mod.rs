#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Little-endian writer producing the same layout the loaders read.
#[derive(Default)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn floats(&mut self, v: &[f32]) -> &mut Self {
        v.iter().for_each(|f| {
            self.f32(*f);
        });
        self
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.i32(s.len() as i32);
        self.0.extend_from_slice(s.as_bytes());
        self
    }
}

/// One blend shape record. Deltas must match the owning mesh's counts.
#[derive(Clone, Default)]
pub struct BlendShapeFile {
    pub name: String,
    pub frames: i32,
    /// Stored weight, before the loader divides it by 100.
    pub weight: f32,
    pub vertices: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tangents: Vec<[f32; 3]>,
}

/// A mesh file. Attributes left empty are written with a zero count.
#[derive(Clone)]
pub struct MeshFile {
    pub name: String,
    pub vertices: Vec<[f32; 3]>,
    pub colors: Vec<[u8; 4]>,
    pub uv: Vec<[f32; 2]>,
    pub uv2: Vec<[f32; 2]>,
    pub normals: Vec<[f32; 3]>,
    pub tangents: Vec<[f32; 4]>,
    /// Weights with their four bone indices.
    pub bones: Vec<([f32; 4], [u8; 4])>,
    pub indices: Vec<u16>,
    /// `(index_first, index_count)`
    pub submeshes: Vec<(i32, i32)>,
    pub bindposes: Vec<[[f32; 4]; 4]>,
    pub blend_shapes: Vec<BlendShapeFile>,
    /// Center then size.
    pub bounds: [f32; 6],
}

impl MeshFile {
    pub fn new(name: &str, vertices: Vec<[f32; 3]>, indices: Vec<u16>) -> Self {
        Self {
            name: name.to_string(),
            vertices,
            colors: Vec::new(),
            uv: Vec::new(),
            uv2: Vec::new(),
            normals: Vec::new(),
            tangents: Vec::new(),
            bones: Vec::new(),
            indices,
            submeshes: Vec::new(),
            bindposes: Vec::new(),
            blend_shapes: Vec::new(),
            bounds: [0.0, 0.0, 0.0, 1.0, 1.0, 0.0],
        }
    }

    /// Unit quad in the XY plane facing +Z, two triangles.
    pub fn quad(name: &str) -> Self {
        Self::new(
            name,
            vec![
                [-0.5, -0.5, 0.0],
                [0.5, -0.5, 0.0],
                [0.5, 0.5, 0.0],
                [-0.5, 0.5, 0.0],
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    pub fn triangle(name: &str) -> Self {
        Self::new(
            name,
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![0, 1, 2],
        )
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut b = Bytes::default();
        b.string(&self.name);
        b.i32(self.vertices.len() as i32);
        self.vertices.iter().for_each(|v| {
            b.floats(v);
        });
        b.i32(self.colors.len() as i32);
        self.colors.iter().for_each(|c| {
            c.iter().for_each(|v| {
                b.u8(*v);
            })
        });
        b.i32(self.uv.len() as i32);
        self.uv.iter().for_each(|v| {
            b.floats(v);
        });
        b.i32(self.uv2.len() as i32);
        self.uv2.iter().for_each(|v| {
            b.floats(v);
        });
        b.i32(self.normals.len() as i32);
        self.normals.iter().for_each(|v| {
            b.floats(v);
        });
        b.i32(self.tangents.len() as i32);
        self.tangents.iter().for_each(|v| {
            b.floats(v);
        });
        b.i32(self.bones.len() as i32);
        for (weights, bones) in &self.bones {
            b.floats(weights);
            bones.iter().for_each(|i| {
                b.u8(*i);
            });
        }
        b.i32(self.indices.len() as i32);
        self.indices.iter().for_each(|i| {
            b.u16(*i);
        });
        b.i32(self.submeshes.len() as i32);
        for (first, count) in &self.submeshes {
            b.i32(*first).i32(*count);
        }
        b.i32(self.bindposes.len() as i32);
        self.bindposes.iter().flatten().for_each(|row| {
            b.floats(row);
        });
        b.i32(self.blend_shapes.len() as i32);
        for shape in &self.blend_shapes {
            b.string(&shape.name).i32(shape.frames).f32(shape.weight);
            shape
                .vertices
                .iter()
                .chain(&shape.normals)
                .chain(&shape.tangents)
                .for_each(|v| {
                    b.floats(v);
                });
        }
        b.floats(&self.bounds);
        b.0
    }
}

/// One object record of a scene container.
#[derive(Clone)]
pub struct Node {
    pub name: String,
    pub layer: i32,
    pub active: bool,
    pub position: [f32; 3],
    /// x, y, z, w
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
    pub components: Vec<Component>,
    pub children: Vec<Node>,
}

#[derive(Clone)]
pub enum Component {
    MeshRenderer { mesh: String },
    Other(String),
}

impl Node {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            layer: 0,
            active: true,
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
            components: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn at(mut self, position: [f32; 3]) -> Self {
        self.position = position;
        self
    }

    pub fn rotated(mut self, rotation: [f32; 4]) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scaled(mut self, scale: [f32; 3]) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_mesh(mut self, mesh: &str) -> Self {
        self.components.push(Component::MeshRenderer {
            mesh: mesh.to_string(),
        });
        self
    }

    pub fn with_component(mut self, name: &str) -> Self {
        self.components.push(Component::Other(name.to_string()));
        self
    }

    pub fn child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    fn write(&self, b: &mut Bytes) {
        b.string(&self.name)
            .i32(self.layer)
            .u8(self.active as u8)
            .floats(&self.position)
            .floats(&self.rotation)
            .floats(&self.scale)
            .i32(self.components.len() as i32);
        for component in &self.components {
            match component {
                Component::MeshRenderer { mesh } => {
                    b.string("MeshRenderer")
                        .i32(-1)
                        .floats(&[1.0, 1.0, 0.0, 0.0])
                        .u8(1)
                        .u8(1)
                        .i32(1)
                        .string("_EMISSION")
                        .i32(1)
                        .string("Default-Material")
                        .string(mesh);
                }
                Component::Other(name) => {
                    b.string(name);
                }
            }
        }
        b.i32(self.children.len() as i32);
        self.children.iter().for_each(|child| child.write(b));
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut b = Bytes::default();
        self.write(&mut b);
        b.0
    }
}

/// A data directory holding scene and mesh files.
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, local_path: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(local_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, bytes).unwrap();
        path
    }

    pub fn mesh(&self, local_path: &str, mesh: &MeshFile) -> &Self {
        self.write(local_path, &mesh.bytes());
        self
    }

    pub fn scene(&self, local_path: &str, root: &Node) -> &Self {
        self.write(local_path, &root.bytes());
        self
    }
}

pub fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-4,
        "expected {expected}, got {actual}"
    );
}
