/**
 * This module contains all logic for loading scene containers and mesh files.
 */
pub mod error;
pub mod mesh;
pub mod reader;
pub mod scene;

use std::path::Path;

use crate::{
    config::Validation,
    resources::{
        error::{Result, SceneError},
        mesh::MeshStore,
        reader::BinaryReader,
        scene::{SceneGraph, SceneGraphLoader},
    },
};

/// Loads `data_dir/local_path` and every mesh it references.
///
/// Mesh paths inside the container are resolved against `data_dir`.
pub fn load_scene_graph(
    data_dir: &Path,
    local_path: &Path,
    validation: Validation,
) -> Result<(SceneGraph, MeshStore)> {
    let path = data_dir.join(local_path);
    let mut reader = match BinaryReader::open(&path, validation) {
        Ok(reader) => reader,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SceneError::SceneNotFound(path));
        }
        Err(e) => return Err(e.into()),
    };
    log::info!("loading scene {}", path.display());

    let mut meshes = MeshStore::new(validation);
    let graph = SceneGraphLoader::new(data_dir, &mut meshes).load(&mut reader)?;
    if reader.remaining() > 0 {
        log::warn!(
            "{} trailing bytes after the scene graph in {}",
            reader.remaining(),
            path.display()
        );
    }
    Ok((graph, meshes))
}
