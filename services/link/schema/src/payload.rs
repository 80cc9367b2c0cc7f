//! Nested payload tables: file arguments and meshes.

use crate::enums::{read_enum, FileType, WireEnum};
use link_wire::{Builder, Offset, Pack, Result, Table, TableView, Vector, WireTable};
use serde::{Deserialize, Serialize};

/// Name/type pair describing a file argument
#[derive(Debug, Clone, Copy)]
pub struct FileArg<'a> {
    table: Table<'a>,
}

impl<'a> TableView<'a> for FileArg<'a> {
    fn from_table(table: Table<'a>) -> Self {
        Self { table }
    }
}

impl<'a> FileArg<'a> {
    /// Field id of `name`
    pub const VT_NAME: u16 = 0;
    /// Field id of `file_type`
    pub const VT_FILE_TYPE: u16 = 1;

    /// Argument name (usually the file name)
    pub fn name(&self) -> Result<Option<&'a str>> {
        self.table.get_str(Self::VT_NAME)
    }

    /// File format, `Ifc` when absent
    pub fn file_type(&self) -> Result<FileType> {
        read_enum(&self.table, Self::VT_FILE_TYPE)
    }

    /// Resolve every field into an owned value
    pub fn unpack(&self) -> Result<FileArgT> {
        Ok(FileArgT {
            name: self.name()?.map(str::to_string),
            file_type: self.file_type()?,
        })
    }
}

/// Owned form of [`FileArg`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileArgT {
    /// Argument name
    pub name: Option<String>,
    /// File format
    pub file_type: FileType,
}

impl FileArgT {
    /// A named argument of the given type
    pub fn new(name: impl Into<String>, file_type: FileType) -> Self {
        Self {
            name: Some(name.into()),
            file_type,
        }
    }
}

impl Pack for FileArgT {
    fn pack(&self, builder: &mut Builder) -> Offset<WireTable> {
        let name = self.name.as_deref().map(|n| builder.create_string(n));

        builder.start_table();
        if let Some(name) = name {
            builder.push_offset(FileArg::VT_NAME, name);
        }
        builder.push_slot(
            FileArg::VT_FILE_TYPE,
            self.file_type.to_wire(),
            FileType::DEFAULT.to_wire(),
        );
        builder.end_table()
    }
}

/// Triangle mesh geometry
#[derive(Debug, Clone, Copy)]
pub struct Mesh<'a> {
    table: Table<'a>,
}

impl<'a> TableView<'a> for Mesh<'a> {
    fn from_table(table: Table<'a>) -> Self {
        Self { table }
    }
}

impl<'a> Mesh<'a> {
    /// Field id of `vertices`
    pub const VT_VERTICES: u16 = 0;
    /// Field id of `normals`
    pub const VT_NORMALS: u16 = 1;
    /// Field id of `indices`
    pub const VT_INDICES: u16 = 2;

    /// Flat xyz vertex positions
    pub fn vertices(&self) -> Result<Option<Vector<'a, f32>>> {
        self.table.get_vector(Self::VT_VERTICES)
    }

    /// Flat xyz vertex normals
    pub fn normals(&self) -> Result<Option<Vector<'a, f32>>> {
        self.table.get_vector(Self::VT_NORMALS)
    }

    /// Triangle vertex indices
    pub fn indices(&self) -> Result<Option<Vector<'a, u32>>> {
        self.table.get_vector(Self::VT_INDICES)
    }

    /// Resolve every field into an owned value
    pub fn unpack(&self) -> Result<MeshT> {
        Ok(MeshT {
            vertices: self.vertices()?.map(|v| v.to_vec()),
            normals: self.normals()?.map(|v| v.to_vec()),
            indices: self.indices()?.map(|v| v.to_vec()),
        })
    }
}

/// Owned form of [`Mesh`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshT {
    /// Flat xyz vertex positions
    pub vertices: Option<Vec<f32>>,
    /// Flat xyz vertex normals
    pub normals: Option<Vec<f32>>,
    /// Triangle vertex indices
    pub indices: Option<Vec<u32>>,
}

impl MeshT {
    /// Number of complete triangles described by the index list
    pub fn triangle_count(&self) -> usize {
        self.indices.as_ref().map(|i| i.len() / 3).unwrap_or(0)
    }
}

impl Pack for MeshT {
    fn pack(&self, builder: &mut Builder) -> Offset<WireTable> {
        let vertices = self.vertices.as_deref().map(|v| builder.create_vector(v));
        let normals = self.normals.as_deref().map(|v| builder.create_vector(v));
        let indices = self.indices.as_deref().map(|v| builder.create_vector(v));

        builder.start_table();
        if let Some(vertices) = vertices {
            builder.push_offset(Mesh::VT_VERTICES, vertices);
        }
        if let Some(normals) = normals {
            builder.push_offset(Mesh::VT_NORMALS, normals);
        }
        if let Some(indices) = indices {
            builder.push_offset(Mesh::VT_INDICES, indices);
        }
        builder.end_table()
    }
}

/// Mesh-append payload: a named mesh to add to the scene
#[derive(Debug, Clone, Copy)]
pub struct AppendMesh<'a> {
    table: Table<'a>,
}

impl<'a> TableView<'a> for AppendMesh<'a> {
    fn from_table(table: Table<'a>) -> Self {
        Self { table }
    }
}

impl<'a> AppendMesh<'a> {
    /// Field id of `name`
    pub const VT_NAME: u16 = 0;
    /// Field id of `mesh`
    pub const VT_MESH: u16 = 1;
    /// Field id of `replace`
    pub const VT_REPLACE: u16 = 2;

    /// Scene node name
    pub fn name(&self) -> Result<Option<&'a str>> {
        self.table.get_str(Self::VT_NAME)
    }

    /// Geometry, decoded on demand
    pub fn mesh(&self) -> Result<Option<Mesh<'a>>> {
        Ok(self.table.get_table(Self::VT_MESH)?.map(Mesh::from_table))
    }

    /// Replace an existing node of the same name instead of adding
    pub fn replace(&self) -> Result<bool> {
        self.table.get(Self::VT_REPLACE, false)
    }

    /// Resolve every field into an owned value
    pub fn unpack(&self) -> Result<AppendMeshT> {
        Ok(AppendMeshT {
            name: self.name()?.map(str::to_string),
            mesh: self.mesh()?.map(|m| m.unpack()).transpose()?,
            replace: self.replace()?,
        })
    }
}

/// Owned form of [`AppendMesh`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppendMeshT {
    /// Scene node name
    pub name: Option<String>,
    /// Geometry
    pub mesh: Option<MeshT>,
    /// Replace an existing node of the same name
    pub replace: bool,
}

impl Pack for AppendMeshT {
    fn pack(&self, builder: &mut Builder) -> Offset<WireTable> {
        let name = self.name.as_deref().map(|n| builder.create_string(n));
        let mesh = self.mesh.as_ref().map(|m| m.pack(builder));

        builder.start_table();
        if let Some(name) = name {
            builder.push_offset(AppendMesh::VT_NAME, name);
        }
        if let Some(mesh) = mesh {
            builder.push_offset(AppendMesh::VT_MESH, mesh);
        }
        builder.push_slot(AppendMesh::VT_REPLACE, self.replace, false);
        builder.end_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_wire::{encode, root};

    #[test]
    fn test_file_arg_default_type() {
        let arg = FileArgT {
            name: Some("house.ifc".into()),
            file_type: FileType::Ifc,
        };
        let bytes = encode(&arg);
        let view = root::<FileArg>(&bytes, 0).unwrap();

        // the default is not written, yet reads back as IFC
        assert!(!view.table.has_field(FileArg::VT_FILE_TYPE));
        assert_eq!(view.file_type().unwrap(), FileType::Ifc);
        assert_eq!(view.unpack().unwrap(), arg);
    }

    #[test]
    fn test_file_arg_without_name() {
        let arg = FileArgT {
            name: None,
            file_type: FileType::Gltf,
        };
        let bytes = encode(&arg);
        let view = root::<FileArg>(&bytes, 0).unwrap();
        assert_eq!(view.name().unwrap(), None);
        assert_eq!(view.file_type().unwrap(), FileType::Gltf);
    }

    #[test]
    fn test_append_mesh_lazy_geometry() {
        let payload = AppendMeshT {
            name: Some("triangle".into()),
            mesh: Some(MeshT {
                vertices: Some(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
                normals: None,
                indices: Some(vec![0, 1, 2]),
            }),
            replace: true,
        };
        let bytes = encode(&payload);
        let view = root::<AppendMesh>(&bytes, 0).unwrap();

        let mesh = view.mesh().unwrap().unwrap();
        let vertices = mesh.vertices().unwrap().unwrap();
        assert_eq!(vertices.len(), 9);
        assert_eq!(vertices.get(3), Some(1.0));
        assert!(mesh.normals().unwrap().is_none());
        assert!(view.replace().unwrap());

        let unpacked = view.unpack().unwrap();
        assert_eq!(unpacked, payload);
        assert_eq!(unpacked.mesh.unwrap().triangle_count(), 1);
    }

    #[test]
    fn test_empty_mesh_vectors_survive() {
        let mesh = MeshT {
            vertices: Some(Vec::new()),
            normals: None,
            indices: Some(Vec::new()),
        };
        let bytes = encode(&mesh);
        let view = root::<Mesh>(&bytes, 0).unwrap();
        assert_eq!(view.unpack().unwrap(), mesh);
    }
}
