//! MOBI 6 NCX index records (INDX master + data, TAGX, CNCX).
//!
//! Kindle's "Go To" menu requires the index entries in breadth-first
//! order with parent links pointing backwards, so the builder reorders
//! the document-order input and rewrites every cross-reference through
//! the old→new index map.

/// Raw table-of-contents input, in document order.
#[derive(Debug, Clone)]
pub struct NcxInput {
    pub title: String,
    pub offset: u32,
    pub depth: u32,
}

/// A fully resolved NCX entry after length, hierarchy and reorder passes.
#[derive(Debug, Clone)]
pub struct NcxEntry {
    pub index: usize,
    pub title: String,
    pub offset: u32,
    pub length: u32,
    pub depth: u32,
    pub parent: Option<usize>,
    pub first_child: Option<usize>,
    pub last_child: Option<usize>,
}

/// Encode a non-negative integer as a variable-width integer:
/// base-128, big-endian, high bit set on the last byte only.
/// Zero encodes as a single 0x80.
pub fn encode_vwi(mut n: u32) -> Vec<u8> {
    let mut bytes = vec![(n & 0x7F) as u8 | 0x80];
    n >>= 7;
    while n > 0 {
        bytes.push((n & 0x7F) as u8);
        n >>= 7;
    }
    bytes.reverse();
    bytes
}

/// Decode a VWI from the front of `data`, returning (value, consumed).
pub fn decode_vwi(data: &[u8]) -> (u32, usize) {
    let mut val: u32 = 0;
    let mut consumed = 0;
    for &byte in data {
        consumed += 1;
        val = (val << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 != 0 {
            break;
        }
    }
    (val, consumed)
}

/// Resolve lengths and hierarchy, then reorder breadth-first.
pub fn build_entries(inputs: &[NcxInput], text_length: u32) -> Vec<NcxEntry> {
    let n = inputs.len();

    // CalculateLengths: span runs to the next entry at the same or a
    // shallower depth, defaulting to end-of-text.
    let mut lengths = vec![0u32; n];
    for i in 0..n {
        let next_offset = inputs[i + 1..]
            .iter()
            .find(|e| e.depth <= inputs[i].depth)
            .map(|e| e.offset)
            .unwrap_or(text_length);
        lengths[i] = next_offset.saturating_sub(inputs[i].offset).max(1);
    }

    // CalculateHierarchy: parent is the last prior entry with strictly
    // smaller depth; children scan forward until depth drops back.
    let mut parents: Vec<Option<usize>> = vec![None; n];
    let mut first_children: Vec<Option<usize>> = vec![None; n];
    let mut last_children: Vec<Option<usize>> = vec![None; n];
    for i in 0..n {
        parents[i] = (0..i).rev().find(|&j| inputs[j].depth < inputs[i].depth);
        for j in i + 1..n {
            if inputs[j].depth <= inputs[i].depth {
                break;
            }
            if inputs[j].depth == inputs[i].depth + 1 {
                if first_children[i].is_none() {
                    first_children[i] = Some(j);
                }
                last_children[i] = Some(j);
            }
        }
    }

    // ReorderBreadthFirst: stable sort by (depth, original index), then
    // remap every index through old→new.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| (inputs[i].depth, i));
    let mut remap = vec![0usize; n];
    for (new, &old) in order.iter().enumerate() {
        remap[old] = new;
    }

    order
        .iter()
        .enumerate()
        .map(|(new, &old)| NcxEntry {
            index: new,
            title: inputs[old].title.clone(),
            offset: inputs[old].offset,
            length: lengths[old],
            depth: inputs[old].depth,
            parent: parents[old].map(|p| remap[p]),
            first_child: first_children[old].map(|c| remap[c]),
            last_child: last_children[old].map(|c| remap[c]),
        })
        .collect()
}

/// Build the three NCX records: INDX master, INDX data, CNCX.
pub fn build_records(entries: &[NcxEntry]) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let (cncx, cncx_offsets) = build_cncx(entries);
    let data = build_indx_data(entries, &cncx_offsets);
    let master = build_indx_master(entries.len() as u32);
    (master, data, cncx)
}

/// CNCX label blob: `[vwi length][utf8 title]` per entry, 4-byte padded.
fn build_cncx(entries: &[NcxEntry]) -> (Vec<u8>, Vec<u32>) {
    let mut blob = Vec::new();
    let mut offsets = Vec::with_capacity(entries.len());
    for entry in entries {
        offsets.push(blob.len() as u32);
        let label = entry.title.as_bytes();
        blob.extend_from_slice(&encode_vwi(label.len() as u32));
        blob.extend_from_slice(label);
    }
    while blob.len() % 4 != 0 {
        blob.push(0);
    }
    (blob, offsets)
}

const INDX_HEADER_LEN: usize = 192;

/// TAGX block: seven tags plus the end sentinel, control-byte-count 1.
fn tagx_block() -> Vec<u8> {
    let mut tagx = Vec::with_capacity(44);
    tagx.extend_from_slice(b"TAGX");
    tagx.extend_from_slice(&44u32.to_be_bytes()); // block length
    tagx.extend_from_slice(&1u32.to_be_bytes()); // control byte count
    for (tag, values, bitmask, eof) in [
        (1u8, 1u8, 0x01u8, 0u8), // offset
        (2, 1, 0x02, 0),         // length
        (3, 1, 0x04, 0),         // label (CNCX offset)
        (4, 1, 0x08, 0),         // depth
        (21, 1, 0x10, 0),        // parent
        (22, 1, 0x20, 0),        // first child
        (23, 1, 0x40, 0),        // last child
        (0, 0, 0, 1),            // end of TAGX
    ] {
        tagx.extend_from_slice(&[tag, values, bitmask, eof]);
    }
    tagx
}

fn indx_header(
    idxt_start: u32,
    record_entry_count: u32,
    total_entries: u32,
    cncx_count: u32,
    with_tagx: bool,
) -> [u8; INDX_HEADER_LEN] {
    let mut h = [0u8; INDX_HEADER_LEN];
    h[0..4].copy_from_slice(b"INDX");
    h[4..8].copy_from_slice(&(INDX_HEADER_LEN as u32).to_be_bytes());
    // 8..12 index type 0, 12..20 unused
    h[20..24].copy_from_slice(&idxt_start.to_be_bytes());
    h[24..28].copy_from_slice(&record_entry_count.to_be_bytes());
    h[28..32].copy_from_slice(&65001u32.to_be_bytes());
    h[32..36].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes()); // language
    h[36..40].copy_from_slice(&total_entries.to_be_bytes());
    h[52..56].copy_from_slice(&cncx_count.to_be_bytes());
    if with_tagx {
        h[180..184].copy_from_slice(&(INDX_HEADER_LEN as u32).to_be_bytes());
    }
    h
}

/// INDX master: header + TAGX + one geometry entry + IDXT.
fn build_indx_master(total_entries: u32) -> Vec<u8> {
    let tagx = tagx_block();

    // Geometry entry: length-prefixed ordinal of the last entry plus the
    // entry count of the single data record.
    let last_label = format!("{:03}", total_entries.saturating_sub(1));
    let mut geometry = Vec::new();
    geometry.push(last_label.len() as u8);
    geometry.extend_from_slice(last_label.as_bytes());
    geometry.extend_from_slice(&(total_entries as u16).to_be_bytes());

    let geometry_pos = (INDX_HEADER_LEN + tagx.len()) as u32;
    let idxt_start = geometry_pos + geometry.len() as u32;

    let mut record = Vec::new();
    record.extend_from_slice(&indx_header(idxt_start, 1, total_entries, 1, true));
    record.extend_from_slice(&tagx);
    record.extend_from_slice(&geometry);
    record.extend_from_slice(b"IDXT");
    record.extend_from_slice(&(geometry_pos as u16).to_be_bytes());
    while record.len() % 4 != 0 {
        record.push(0);
    }
    record
}

/// INDX data record: header, one entry per NCX entry, IDXT offsets.
fn build_indx_data(entries: &[NcxEntry], cncx_offsets: &[u32]) -> Vec<u8> {
    let mut body = Vec::new();
    let mut entry_offsets: Vec<u16> = Vec::with_capacity(entries.len());

    for entry in entries {
        entry_offsets.push((INDX_HEADER_LEN + body.len()) as u16);

        let label = format!("{:03}", entry.index);
        body.push(label.len() as u8);
        body.extend_from_slice(label.as_bytes());

        // Control byte: offset+length+label+depth always present.
        let mut control: u8 = 0x0F;
        if entry.parent.is_some() {
            control |= 0x10;
        }
        if entry.first_child.is_some() {
            control |= 0x20;
        }
        if entry.last_child.is_some() {
            control |= 0x40;
        }
        body.push(control);

        body.extend_from_slice(&encode_vwi(entry.offset));
        body.extend_from_slice(&encode_vwi(entry.length));
        body.extend_from_slice(&encode_vwi(cncx_offsets[entry.index]));
        body.extend_from_slice(&encode_vwi(entry.depth));
        if let Some(parent) = entry.parent {
            body.extend_from_slice(&encode_vwi(parent as u32));
        }
        if let Some(first) = entry.first_child {
            body.extend_from_slice(&encode_vwi(first as u32));
        }
        if let Some(last) = entry.last_child {
            body.extend_from_slice(&encode_vwi(last as u32));
        }
    }

    let idxt_start = (INDX_HEADER_LEN + body.len()) as u32;

    let mut record = Vec::new();
    record.extend_from_slice(&indx_header(
        idxt_start,
        entries.len() as u32,
        entries.len() as u32,
        0,
        false,
    ));
    record.extend_from_slice(&body);
    record.extend_from_slice(b"IDXT");
    for off in entry_offsets {
        record.extend_from_slice(&off.to_be_bytes());
    }
    while record.len() % 4 != 0 {
        record.push(0);
    }
    record
}
