//! Entropy coder — adaptive byte-level Huffman with a self-describing frame.
//!
//! # On-disk frame (plaintext side, before encryption)
//!
//! ```text
//! ┌──────────────┬────────────────────────┬───────────────┬──────────────┐
//! │ origLen (4B) │ freq-table (JSON text) │ sentinel 0xFF │ encoded bits │
//! │   big-endian │ [[byte, count], …]     │        0xFF   │              │
//! └──────────────┴────────────────────────┴───────────────┴──────────────┘
//! ```
//!
//! The frequency table is UTF-8 JSON of `[[byte, count], …]` pairs — frozen
//! for interop with frames already on disk.  JSON is pure ASCII here, so the
//! first 0xFF byte after the length prefix is unambiguously the sentinel.
//! Internally the coder works on a dense 256-slot count array.
//!
//! # Shapes a decoder MUST tolerate
//! - **Compressed frame**: table with ≥ 2 entries, bit stream right-padded
//!   with zeros to a byte boundary; the decoder stops after `origLen`
//!   symbols, so the pad is never misread.
//! - **Single-byte frame**: exactly one table pair, empty bit section; the
//!   decoder allocates `origLen` copies of the single value.
//! - **Pass-through**: the original buffer verbatim, no prefix at all.
//!   Anything that does not parse as a valid frame decodes to itself.
//!
//! A verbatim pass-through that would itself parse as a valid frame is never
//! emitted: the encoder falls back to a real frame even when it is larger,
//! so decoding stays unambiguous.

use byteorder::{BigEndian, ByteOrder};

use super::CodecError;

/// Sentinel pair terminating the JSON frequency table.
const SENTINEL: [u8; 2] = [0xff, 0xff];

/// High-entropy guard: skip compression when
/// `#distinct bytes > RATIO × input length`.
const DISTINCT_RATIO: f64 = 0.8;

// ── Frequency table ──────────────────────────────────────────────────────────

fn count_frequencies(input: &[u8]) -> [u64; 256] {
    let mut freqs = [0u64; 256];
    for &b in input {
        freqs[b as usize] += 1;
    }
    freqs
}

/// Serialize the non-zero counts as the frozen `[[byte, count], …]` JSON,
/// ascending by byte value.
fn freq_table_json(freqs: &[u64; 256]) -> Vec<u8> {
    let pairs: Vec<(u16, u64)> = freqs
        .iter()
        .enumerate()
        .filter(|(_, &c)| c > 0)
        .map(|(b, &c)| (b as u16, c))
        .collect();
    serde_json::to_vec(&pairs).expect("frequency pairs always serialize")
}

// ── Tree construction ────────────────────────────────────────────────────────
//
// Ties are resolved by stable order: lower byte value first, earlier
// insertion first.  Leaves enter the queue in ascending byte order, merged
// nodes in creation order, and the (freq, seq) ordering makes the build
// deterministic — encoder and decoder derive identical trees from the table.

#[derive(Clone, Copy)]
enum NodeKind {
    Leaf(u8),
    Internal { left: usize, right: usize },
}

struct Tree {
    nodes: Vec<NodeKind>,
    root: usize,
}

fn build_tree(freqs: &[u64; 256]) -> Tree {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    let mut nodes = Vec::new();
    let mut heap: BinaryHeap<Reverse<(u64, u32, usize)>> = BinaryHeap::new();
    let mut seq = 0u32;

    for (byte, &freq) in freqs.iter().enumerate() {
        if freq > 0 {
            let idx = nodes.len();
            nodes.push(NodeKind::Leaf(byte as u8));
            heap.push(Reverse((freq, seq, idx)));
            seq += 1;
        }
    }
    debug_assert!(heap.len() >= 2, "tree build requires at least two symbols");

    while heap.len() > 1 {
        let Reverse((f1, _, left)) = heap.pop().expect("len > 1");
        let Reverse((f2, _, right)) = heap.pop().expect("len > 1");
        let idx = nodes.len();
        nodes.push(NodeKind::Internal { left, right });
        heap.push(Reverse((f1 + f2, seq, idx)));
        seq += 1;
    }

    let root = heap.pop().expect("one node remains").0 .2;
    Tree { nodes, root }
}

/// Depth-first code derivation: '0' on left descent, '1' on right descent.
/// Codes can reach 255 bits for pathological distributions, so they are
/// kept as bit vectors rather than packed integers.
fn derive_codes(tree: &Tree) -> Vec<Option<Vec<bool>>> {
    let mut codes: Vec<Option<Vec<bool>>> = vec![None; 256];
    let mut stack: Vec<(usize, Vec<bool>)> = vec![(tree.root, Vec::new())];
    while let Some((idx, prefix)) = stack.pop() {
        match tree.nodes[idx] {
            NodeKind::Leaf(byte) => codes[byte as usize] = Some(prefix),
            NodeKind::Internal { left, right } => {
                let mut l = prefix.clone();
                l.push(false);
                let mut r = prefix;
                r.push(true);
                stack.push((left, l));
                stack.push((right, r));
            }
        }
    }
    codes
}

// ── Bit stream ───────────────────────────────────────────────────────────────

struct BitWriter {
    buf: Vec<u8>,
    used: u8, // bits used in the last byte, 0 when aligned
}

impl BitWriter {
    fn new() -> Self {
        Self { buf: Vec::new(), used: 0 }
    }

    fn push(&mut self, bit: bool) {
        if self.used == 0 {
            self.buf.push(0);
        }
        if bit {
            let last = self.buf.len() - 1;
            self.buf[last] |= 0x80 >> self.used;
        }
        self.used = (self.used + 1) % 8;
    }

    /// Zero-padded to the byte boundary by construction.
    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize, // absolute bit position
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn next(&mut self) -> Option<bool> {
        let byte = self.bytes.get(self.pos / 8)?;
        let bit = byte & (0x80 >> (self.pos % 8)) != 0;
        self.pos += 1;
        Some(bit)
    }
}

// ── Frame header parsing ─────────────────────────────────────────────────────

struct FrameHeader {
    orig_len: usize,
    freqs: [u64; 256],
    distinct: usize,
    /// Byte offset of the encoded bit section.
    bits_at: usize,
}

/// Parse the frame header, or `None` when the buffer is not a valid frame
/// (the pass-through shape).  Validity is strict: the JSON must parse, the
/// table must be non-empty with positive counts and no duplicate bytes, and
/// the counts must sum to `origLen` exactly — every frame the encoder emits
/// satisfies this, and the strictness keeps pass-through detection sharp.
fn parse_header(buf: &[u8]) -> Option<FrameHeader> {
    if buf.len() < 4 + 2 {
        return None;
    }
    let orig_len = BigEndian::read_u32(&buf[..4]) as usize;

    // JSON is ASCII; the first 0xff after the prefix must start the sentinel.
    let rel = buf[4..].iter().position(|&b| b == 0xff)?;
    let sentinel_at = 4 + rel;
    if buf.get(sentinel_at + 1) != Some(&0xff) {
        return None;
    }

    let pairs: Vec<(u16, u64)> = serde_json::from_slice(&buf[4..sentinel_at]).ok()?;
    if pairs.is_empty() {
        return None;
    }

    let mut freqs = [0u64; 256];
    let mut total: u64 = 0;
    for &(byte, count) in &pairs {
        if byte > 0xff || count == 0 {
            return None;
        }
        if freqs[byte as usize] != 0 {
            return None; // duplicate table entry
        }
        freqs[byte as usize] = count;
        total = total.checked_add(count)?;
    }
    if total != orig_len as u64 {
        return None;
    }

    Some(FrameHeader { orig_len, freqs, distinct: pairs.len(), bits_at: sentinel_at + 2 })
}

// ── Encoder ──────────────────────────────────────────────────────────────────

/// Build the full frame for `input` regardless of whether it shrinks.
fn encode_frame(input: &[u8], freqs: &[u64; 256], distinct: usize) -> Vec<u8> {
    let mut frame = Vec::with_capacity(input.len() / 2 + 64);
    let mut len_prefix = [0u8; 4];
    BigEndian::write_u32(&mut len_prefix, input.len() as u32);
    frame.extend_from_slice(&len_prefix);
    frame.extend_from_slice(&freq_table_json(freqs));
    frame.extend_from_slice(&SENTINEL);

    if distinct == 1 {
        // Single-byte short frame: the table says it all, no bit section.
        return frame;
    }

    let tree = build_tree(freqs);
    let codes = derive_codes(&tree);
    let mut bits = BitWriter::new();
    for &b in input {
        for &bit in codes[b as usize].as_ref().expect("every input byte has a code") {
            bits.push(bit);
        }
    }
    frame.extend_from_slice(&bits.into_bytes());
    frame
}

/// Compress `input` into a self-describing frame, or return it verbatim when
/// compression would not help.  Callers cannot tell the two apart without
/// parsing; [`decompress`] handles both.
pub fn compress(input: &[u8]) -> Vec<u8> {
    if input.is_empty() {
        return Vec::new();
    }

    let freqs = count_frequencies(input);
    let distinct = freqs.iter().filter(|&&c| c > 0).count();

    if distinct == 1 {
        // Always the short frame, even for tiny inputs where it is larger:
        // a decoder must be able to rely on this shape for uniform runs.
        return encode_frame(input, &freqs, 1);
    }

    // Verbatim output is only safe when it cannot be mistaken for a frame.
    let passthrough_ok = || parse_header(input).is_none();

    if (distinct as f64) > DISTINCT_RATIO * input.len() as f64 {
        // High-entropy guard: a table of near-unique bytes cannot win.
        if passthrough_ok() {
            return input.to_vec();
        }
    }

    let frame = encode_frame(input, &freqs, distinct);
    if frame.len() >= input.len() && passthrough_ok() {
        return input.to_vec();
    }
    frame
}

// ── Decoder ──────────────────────────────────────────────────────────────────

/// Decode a buffer produced by [`compress`].
///
/// Buffers that do not parse as a frame are returned unchanged (the
/// pass-through shape).  Fails with [`CodecError::TruncatedFrame`] when the
/// bit stream is exhausted before `origLen` symbols have been produced.
pub fn decompress(buf: &[u8]) -> Result<Vec<u8>, CodecError> {
    let header = match parse_header(buf) {
        Some(h) => h,
        None => return Ok(buf.to_vec()),
    };

    if header.distinct == 1 {
        let byte = header
            .freqs
            .iter()
            .position(|&c| c > 0)
            .expect("distinct == 1") as u8;
        return Ok(vec![byte; header.orig_len]);
    }

    let tree = build_tree(&header.freqs);
    let mut reader = BitReader::new(&buf[header.bits_at..]);
    let mut out = Vec::with_capacity(header.orig_len);

    while out.len() < header.orig_len {
        let mut node = tree.root;
        loop {
            match tree.nodes[node] {
                NodeKind::Leaf(byte) => {
                    out.push(byte);
                    break;
                }
                NodeKind::Internal { left, right } => {
                    node = match reader.next() {
                        Some(false) => left,
                        Some(true) => right,
                        None => return Err(CodecError::TruncatedFrame),
                    };
                }
            }
        }
    }
    Ok(out)
}
