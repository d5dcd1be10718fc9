//! Huffman compression envelope for asset payloads.
//!
//! The encoded form is self-describing: an uncompressed size, the code tree
//! as a pre-order node stream with self-relative child offsets, then the
//! bitstream with bits packed LSB-first into each byte.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("encoded stream is truncated")]
    Truncated,
    #[error("node offset {0} is out of bounds")]
    BadNodeOffset(i64),
    #[error("encoded stream ended inside a symbol")]
    BadBitstream,
}

/// Serialised tree node. Child offsets are byte offsets relative to the
/// node's own position in the node stream; zero marks a missing child.
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[repr(C)]
struct Node {
    left: i32,
    right: i32,
    value: u8,
    is_leaf: u8,
    _reserved: [u8; 2],
}

const NODE_SIZE: usize = std::mem::size_of::<Node>();

/// Header of the encoded stream: payload size, then node count.
const STREAM_HEADER_SIZE: usize = 8 + 4;

#[derive(Copy, Clone, Debug)]
enum Tree {
    Leaf { value: u8 },
    Branch { left: usize, right: usize },
}

/// Builds the code tree over the byte frequencies of `payload`.
///
/// Smaller frequencies merge first; ties break by insertion order, leaves in
/// byte order before any merged node.
fn build_tree(payload: &[u8]) -> (Vec<Tree>, usize) {
    let mut frequencies = [0u64; 256];
    for byte in payload {
        frequencies[usize::from(*byte)] += 1;
    }

    let mut nodes = Vec::new();
    let mut heap = BinaryHeap::new();
    let mut sequence = 0u32;

    for (value, frequency) in frequencies.iter().enumerate() {
        if *frequency == 0 {
            continue;
        }

        nodes.push(Tree::Leaf { value: value as u8 });
        heap.push(Reverse((*frequency, sequence, nodes.len() - 1)));
        sequence += 1;
    }

    while heap.len() > 1 {
        let Reverse((freq_a, _, a)) = heap.pop().unwrap();
        let Reverse((freq_b, _, b)) = heap.pop().unwrap();

        nodes.push(Tree::Branch { left: a, right: b });
        heap.push(Reverse((freq_a + freq_b, sequence, nodes.len() - 1)));
        sequence += 1;
    }

    let root = heap.pop().map(|Reverse((_, _, idx))| idx).unwrap_or(0);
    (nodes, root)
}

/// Per-symbol codeword, path bits from the root, LSB = first branch taken.
#[derive(Copy, Clone, Default)]
struct Code {
    bits: u64,
    len: u8,
}

fn assign_codes(nodes: &[Tree], root: usize, codes: &mut [Code; 256]) {
    // A one-leaf tree still produces a valid one-bit code.
    if let Tree::Leaf { value } = nodes[root] {
        codes[usize::from(value)] = Code { bits: 0, len: 1 };
        return;
    }

    let mut stack = vec![(root, 0u64, 0u8)];

    while let Some((index, bits, len)) = stack.pop() {
        match nodes[index] {
            Tree::Leaf { value } => {
                codes[usize::from(value)] = Code { bits, len };
            }
            Tree::Branch { left, right } => {
                stack.push((left, bits, len + 1));
                stack.push((right, bits | (1 << len), len + 1));
            }
        }
    }
}

/// Flattens the tree into the pre-order node stream, returning the stream and
/// the byte offset of the root node (always zero).
fn serialize_tree(nodes: &[Tree], root: usize) -> Vec<Node> {
    // Pre-order placement: a node's left subtree follows it immediately.
    fn place(nodes: &[Tree], index: usize, out: &mut Vec<Node>) -> usize {
        let slot = out.len();
        out.push(Node::zeroed());

        match nodes[index] {
            Tree::Leaf { value } => {
                out[slot].value = value;
                out[slot].is_leaf = 1;
            }
            Tree::Branch { left, right } => {
                let left_slot = place(nodes, left, out);
                let right_slot = place(nodes, right, out);
                out[slot].left = ((left_slot - slot) * NODE_SIZE) as i32;
                out[slot].right = ((right_slot - slot) * NODE_SIZE) as i32;
            }
        }

        slot
    }

    let mut out = Vec::new();
    place(nodes, root, &mut out);
    out
}

/// Encodes `payload` and returns the full encoded stream.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let (nodes, root) = build_tree(payload);

    let mut codes = [Code::default(); 256];
    if !nodes.is_empty() {
        assign_codes(&nodes, root, &mut codes);
    }

    let stream_nodes = if nodes.is_empty() {
        Vec::new()
    } else {
        serialize_tree(&nodes, root)
    };

    let mut out = Vec::with_capacity(STREAM_HEADER_SIZE + stream_nodes.len() * NODE_SIZE);
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&(stream_nodes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytemuck::cast_slice(&stream_nodes));

    let mut accumulator = 0u8;
    let mut filled = 0u8;

    for byte in payload {
        let code = codes[usize::from(*byte)];

        for bit in 0..code.len {
            if (code.bits >> bit) & 1 != 0 {
                accumulator |= 1 << filled;
            }

            filled += 1;

            if filled == 8 {
                out.push(accumulator);
                accumulator = 0;
                filled = 0;
            }
        }
    }

    if filled > 0 {
        out.push(accumulator);
    }

    out
}

/// Decodes a stream produced by [`encode`].
pub fn decode(stream: &[u8]) -> Result<Vec<u8>, Error> {
    if stream.len() < STREAM_HEADER_SIZE {
        return Err(Error::Truncated);
    }

    let size = u64::from_le_bytes(stream[0..8].try_into().unwrap()) as usize;
    let node_count = u32::from_le_bytes(stream[8..12].try_into().unwrap()) as usize;

    let nodes_end = STREAM_HEADER_SIZE + node_count * NODE_SIZE;
    if stream.len() < nodes_end {
        return Err(Error::Truncated);
    }

    if size == 0 {
        return Ok(Vec::new());
    }

    if node_count == 0 {
        return Err(Error::Truncated);
    }

    let node_bytes = &stream[STREAM_HEADER_SIZE..nodes_end];
    let read_node = |offset: i64| -> Result<Node, Error> {
        if offset < 0 || offset as usize + NODE_SIZE > node_bytes.len() {
            return Err(Error::BadNodeOffset(offset));
        }

        let start = offset as usize;
        Ok(bytemuck::pod_read_unaligned(
            &node_bytes[start..start + NODE_SIZE],
        ))
    };

    let bits = &stream[nodes_end..];
    let mut bit_cursor = 0usize;
    let next_bit = |cursor: &mut usize| -> Result<bool, Error> {
        let byte = *cursor / 8;
        if byte >= bits.len() {
            return Err(Error::BadBitstream);
        }

        let bit = (bits[byte] >> (*cursor % 8)) & 1 != 0;
        *cursor += 1;
        Ok(bit)
    };

    let root = read_node(0)?;
    let mut out = Vec::with_capacity(size);

    for _ in 0..size {
        // Degenerate single-leaf tree: one bit per symbol.
        if root.is_leaf != 0 {
            next_bit(&mut bit_cursor)?;
            out.push(root.value);
            continue;
        }

        let mut offset = 0i64;
        let mut node = root;

        while node.is_leaf == 0 {
            let child = if next_bit(&mut bit_cursor)? {
                node.right
            } else {
                node.left
            };

            offset += i64::from(child);
            node = read_node(offset)?;
        }

        out.push(node.value);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{decode, encode};

    #[test]
    fn roundtrip_text() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(16);
        let encoded = encode(&payload);
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn roundtrip_every_byte_value() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let encoded = encode(&payload);
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn single_symbol_payload_emits_degenerate_tree() {
        let payload = vec![b'A'; 10_000];
        let encoded = encode(&payload);

        // One node, one bit per symbol.
        assert!(encoded.len() < 12 + 12 + payload.len() / 8 + 2);
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn empty_payload() {
        let encoded = encode(&[]);
        assert_eq!(decode(&encoded).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn skewed_frequencies_beat_raw_size() {
        let mut payload = vec![0u8; 8192];
        payload.extend_from_slice(&[1, 2, 3, 4]);
        let encoded = encode(&payload);
        assert!(encoded.len() < payload.len() / 4);
        assert_eq!(decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let payload = b"hello world".to_vec();
        let encoded = encode(&payload);
        assert!(decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(decode(&encoded[..4]).is_err());
    }
}
