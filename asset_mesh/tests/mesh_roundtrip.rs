//! End-to-end mesh compilation against the container loader.

use std::mem::offset_of;
use std::path::PathBuf;

use asset_format::loader::open_asset;
use asset_format::mesh::{IndexType, MeshBlob, Meshlet, MeshletMesh, Submesh};
use asset_format::writer::WriteStatus;
use asset_format::AssetType;
use asset_mesh::write_mesh;

fn write_obj(dir: &std::path::Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn half_to_f32(bits: u16) -> f32 {
    half::f16::from_bits(bits).to_f32()
}

#[test]
fn single_triangle() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_obj(
        dir.path(),
        "triangle.obj",
        "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n",
    );
    let dst = dir.path().join("triangle.pkmesh");

    assert_eq!(write_mesh(&src, &dst).unwrap(), WriteStatus::Written);

    let asset = open_asset(&dst).unwrap();
    asset.expect_type(AssetType::Mesh).unwrap();

    let root = asset.root_offset();
    let mesh: MeshBlob = asset.read_at(root).unwrap();

    assert_eq!(mesh.vertex_count, 3);
    assert_eq!(mesh.index_count, 3);
    assert_eq!(IndexType::from_raw(mesh.index_type), IndexType::Uint16);
    assert_eq!(mesh.submesh_count, 1);

    let (_, submesh): (usize, Submesh) = asset
        .follow(mesh.submeshes, root + offset_of!(MeshBlob, submeshes))
        .unwrap();
    assert_eq!(submesh.bbmin, [0.0, 0.0, 0.0]);
    assert_eq!(submesh.bbmax, [1.0, 1.0, 0.0]);

    let (meshlet_offset, meshlet_mesh): (usize, MeshletMesh) = asset
        .follow(mesh.meshlet_mesh, root + offset_of!(MeshBlob, meshlet_mesh))
        .unwrap();

    assert_eq!(meshlet_mesh.meshlet_count, 1);
    assert_eq!(meshlet_mesh.vertex_count, 3);

    let (_, meshlet): (usize, Meshlet) = asset
        .follow(
            meshlet_mesh.meshlets,
            meshlet_offset + offset_of!(MeshletMesh, meshlets),
        )
        .unwrap();

    assert_eq!(meshlet.triangle_count, 1);
    assert_eq!(meshlet.vertex_count, 3);
    assert_eq!(half_to_f32(meshlet.lod_error_current), -1.0);
    // No coarser level claimed this meshlet, the parent stays a sentinel.
    assert!(half_to_f32(meshlet.lod_error_parent) > 1e4);
}

#[test]
fn up_to_date_destination_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_obj(
        dir.path(),
        "triangle.obj",
        "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n",
    );
    let dst = dir.path().join("triangle.pkmesh");

    assert_eq!(write_mesh(&src, &dst).unwrap(), WriteStatus::Written);

    // Push the destination into the future so mtime comparison is stable
    // regardless of filesystem timestamp granularity.
    let future = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
    std::fs::File::open(&dst).unwrap().set_modified(future).unwrap();

    assert_eq!(write_mesh(&src, &dst).unwrap(), WriteStatus::UpToDate);
}

#[test]
fn empty_obj_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_obj(dir.path(), "empty.obj", "# nothing here\n");
    let dst = dir.path().join("empty.pkmesh");

    assert!(write_mesh(&src, &dst).is_err());
}

#[test]
fn grid_mesh_builds_a_multi_level_dag() {
    const N: usize = 64;

    let mut obj = String::new();
    for y in 0..=N {
        for x in 0..=N {
            obj.push_str(&format!("v {} {} 0\n", x as f32 / N as f32, y as f32 / N as f32));
        }
    }
    for y in 0..N {
        for x in 0..N {
            let a = y * (N + 1) + x + 1;
            let b = a + 1;
            let c = a + N + 1;
            let d = c + 1;
            obj.push_str(&format!("f {} {} {}\n", a, b, c));
            obj.push_str(&format!("f {} {} {}\n", b, d, c));
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let src = write_obj(dir.path(), "grid.obj", &obj);
    let dst = dir.path().join("grid.pkmesh");

    write_mesh(&src, &dst).unwrap();

    let asset = open_asset(&dst).unwrap();
    let root = asset.root_offset();
    let mesh: MeshBlob = asset.read_at(root).unwrap();
    assert_eq!(mesh.index_count, (N * N * 2 * 3) as u32);

    let (meshlet_offset, meshlet_mesh): (usize, MeshletMesh) = asset
        .follow(mesh.meshlet_mesh, root + offset_of!(MeshBlob, meshlet_mesh))
        .unwrap();

    let meshlets_offset = meshlet_mesh
        .meshlets
        .target(meshlet_offset + offset_of!(MeshletMesh, meshlets))
        .unwrap();
    let meshlets: Vec<Meshlet> = asset
        .read_slice_at(meshlets_offset, meshlet_mesh.meshlet_count as usize)
        .unwrap();

    // Meshlet caps hold for every cluster.
    for meshlet in &meshlets {
        assert!(meshlet.vertex_count <= 64);
        assert!(meshlet.triangle_count <= 124);
    }

    // At least one coarser LOD level was built on top of the leaves.
    let leaves = meshlets
        .iter()
        .filter(|m| half_to_f32(m.lod_error_current) < 0.0)
        .count();
    let coarse = meshlets.len() - leaves;
    assert!(leaves > 0);
    assert!(coarse > 0);
    assert!(coarse < leaves);

    // Parent error never undercuts the meshlet's own error.
    for meshlet in &meshlets {
        let current = half_to_f32(meshlet.lod_error_current);
        let parent = half_to_f32(meshlet.lod_error_parent);
        assert!(parent >= current);
    }
}
