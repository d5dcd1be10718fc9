//! Cluster-level simplification: spatial vertex remap, border locking and the
//! quadric simplify driver used by the meshlet DAG.

use std::cmp::Ordering;

use hashbrown::HashMap;
use meshopt::{SimplifyOptions, VertexDataAdapter};

use crate::pack::unique_vertex_count;
use crate::Error;

/// Canonical key for a directed edge: sorted remapped endpoints.
pub(crate) fn edge_key(a: u32, b: u32) -> u64 {
    let (min, max) = if a < b { (a, b) } else { (b, a) };
    u64::from(min) | (u64::from(max) << 32)
}

/// Maps every vertex to the lowest-indexed vertex with a bit-identical
/// position, and computes the L2 attribute distance from each vertex to its
/// representative as a merge weight.
pub fn vertex_remap_and_weights(
    vertices: &[f32],
    stride_f32: usize,
    vertex_count: usize,
) -> (Vec<u32>, Vec<f32>) {
    let mut remap = vec![0u32; vertex_count];
    let mut weights = vec![0f32; vertex_count];
    let mut first_seen: HashMap<[u32; 3], u32> = HashMap::with_capacity(vertex_count);

    for i in 0..vertex_count {
        let base = i * stride_f32;
        let key = [
            vertices[base].to_bits(),
            vertices[base + 1].to_bits(),
            vertices[base + 2].to_bits(),
        ];

        let representative = *first_seen.entry(key).or_insert(i as u32);
        remap[i] = representative;

        if representative != i as u32 {
            let rep_base = representative as usize * stride_f32;
            let mut weight = 0f32;

            for c in 0..stride_f32 {
                let delta = vertices[base + c] - vertices[rep_base + c];
                weight += delta * delta;
            }

            weights[i] = weight.sqrt();
        }
    }

    (remap, weights)
}

/// Marks both endpoints of every boundary edge of the cluster as locked.
///
/// An edge is a boundary edge when its canonical (remapped) form appears in
/// exactly one triangle. Returns the boundary edge count.
pub fn lock_border_vertices(
    indices: &[u32],
    remap: Option<&[u32]>,
    vertex_lock: &mut [bool],
) -> usize {
    let resolve = |index: u32| remap.map_or(index, |r| r[index as usize]);
    let mut edges: HashMap<u64, u32> = HashMap::with_capacity(indices.len());

    for i in 0..indices.len() {
        let i0 = indices[i];
        let i1 = indices[(i / 3) * 3 + (i + 1) % 3];
        *edges.entry(edge_key(resolve(i0), resolve(i1))).or_insert(0) += 1;
    }

    let mut edge_count = 0;

    for i in 0..indices.len() {
        let i0 = indices[i];
        let i1 = indices[(i / 3) * 3 + (i + 1) % 3];

        if edges[&edge_key(resolve(i0), resolve(i1))] <= 1 {
            vertex_lock[i0 as usize] = true;
            vertex_lock[i1 as usize] = true;
            edge_count += 1;
        }
    }

    edge_count
}

#[derive(Copy, Clone, Debug)]
struct IndexMerge {
    from: u32,
    to: u32,
    error: f32,
}

/// Upper bound on simplify attempts. The merge-forcing retry is disabled;
/// the driver exits after the first attempt that misses its target.
const MAX_SIMPLIFY_ATTEMPTS: u32 = 1;

/// Simplifies one cluster towards `target_index_count` indices and
/// `target_vertex_count` unique vertices.
///
/// `indices` is rewritten with the simplified list. Returns the simplifier's
/// relative error for the accepted result.
#[allow(clippy::too_many_arguments)]
pub fn simplify_cluster(
    indices: &mut Vec<u32>,
    vertices: &[f32],
    stride_f32: usize,
    vertex_count: usize,
    remap: &[u32],
    weights: &[f32],
    vertex_lock: &mut [bool],
    target_index_count: usize,
    target_vertex_count: usize,
) -> Result<f32, Error> {
    if target_index_count >= indices.len() || indices.len() <= 3 {
        return Ok(0.0);
    }

    for &index in indices.iter() {
        vertex_lock[index as usize] = false;
    }

    lock_border_vertices(indices, Some(remap), vertex_lock);

    // Vertices whose remap target differs from themselves are merge
    // candidates, worst attribute deviation first.
    let mut merges: Vec<IndexMerge> = indices
        .iter()
        .enumerate()
        .filter(|(_, &index)| remap[index as usize] != index)
        .map(|(slot, &index)| IndexMerge {
            from: slot as u32,
            to: remap[index as usize],
            error: weights[index as usize],
        })
        .collect();

    merges.sort_by(|a, b| b.error.partial_cmp(&a.error).unwrap_or(Ordering::Equal));

    let adapter = VertexDataAdapter::new(
        bytemuck::cast_slice(vertices),
        stride_f32 * std::mem::size_of::<f32>(),
        0,
    )?;

    let mut remaining = merges.len();
    let mut attempt = 0;

    loop {
        let mut error = 0.0f32;
        let simplified = meshopt::simplify_with_locks(
            indices,
            &adapter,
            vertex_lock,
            target_index_count,
            1.0,
            SimplifyOptions::Sparse,
            Some(&mut error),
        );

        let unique = unique_vertex_count(&simplified, vertex_count);
        let reached_target =
            simplified.len() <= target_index_count && unique <= target_vertex_count;

        attempt += 1;

        if reached_target || attempt >= MAX_SIMPLIFY_ATTEMPTS || remaining == 0 {
            *indices = simplified;
            return Ok(error);
        }

        // Force the worst half of the queued merges into the index list and
        // try again with the remainder.
        for merge in &merges[remaining / 2..remaining] {
            indices[merge.from as usize] = merge.to;
        }

        remaining /= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::{lock_border_vertices, simplify_cluster, vertex_remap_and_weights};

    // Two triangles sharing the edge (1, 2): a quad strip with an open rim.
    const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 1, 3];

    #[test]
    fn remap_points_to_lowest_index() {
        // Vertices 0 and 2 share a position; 2 maps down to 0.
        let vertices = [
            0.0, 0.0, 0.0, 9.0, //
            1.0, 0.0, 0.0, 1.0, //
            0.0, 0.0, 0.0, 5.0,
        ];
        let (remap, weights) = vertex_remap_and_weights(&vertices, 4, 3);
        assert_eq!(remap, vec![0, 1, 0]);
        assert_eq!(weights[0], 0.0);
        assert_eq!(weights[2], 4.0);
    }

    #[test]
    fn border_edges_of_a_quad() {
        let mut locks = vec![false; 4];
        let edge_count = lock_border_vertices(&QUAD_INDICES, None, &mut locks);

        // Every edge except the shared diagonal is a boundary edge; the
        // boundary loop is walked once per triangle that owns it.
        assert_eq!(edge_count, 4);
        assert!(locks.iter().all(|locked| *locked));
    }

    #[test]
    fn interior_vertices_stay_unlocked() {
        // A fan around vertex 0 closing on itself: every edge is shared.
        let indices = [0, 1, 2, 0, 2, 3, 0, 3, 1];
        let mut locks = vec![false; 4];
        lock_border_vertices(&indices, None, &mut locks);
        assert!(!locks[0]);
    }

    #[test]
    fn trivial_target_returns_input_unchanged() {
        let mut indices = QUAD_INDICES.to_vec();
        let vertices = vec![0.0f32; 4 * 3];
        let remap = vec![0, 1, 2, 3];
        let weights = vec![0.0; 4];
        let mut locks = vec![false; 4];

        let error = simplify_cluster(
            &mut indices,
            &vertices,
            3,
            4,
            &remap,
            &weights,
            &mut locks,
            12,
            64,
        )
        .unwrap();

        assert_eq!(error, 0.0);
        assert_eq!(indices, QUAD_INDICES.to_vec());
    }
}
