//! FB2 → MOBI 6 conversion.
//!
//! A MOBI file is a PalmDB: a 78-byte database header, a record-info
//! table, then records. Record 0 carries the PalmDOC, MOBI and EXTH
//! headers; the rest are 4096-byte text slices, images, the NCX index
//! and the FLIS/FCIS/EOF trailers. The MOBI header is the extended
//! 264-byte form with EXTH flags 0x40 — older Kindles need exactly
//! these values for "Go To" navigation and popup footnotes.

pub mod html;
pub mod ncx;

use std::collections::HashMap;

use crate::fb2::Fb2Document;

const TEXT_RECORD_SIZE: usize = 4096;
const MOBI_HEADER_LEN: u32 = 264;
const NULL_INDEX: u32 = 0xFFFF_FFFF;

/// Build a complete MOBI 6 file in memory.
pub fn build(doc: &Fb2Document) -> Vec<u8> {
    // Image record order: cover first, then remaining binaries in
    // document order. Ordinals are 1-based for recindex references.
    let mut image_ids: Vec<&str> = Vec::new();
    if let Some(cover) = doc.cover() {
        image_ids.push(&cover.id);
    }
    for bin in &doc.binaries {
        if Some(bin.id.as_str()) != doc.cover_id.as_deref() {
            image_ids.push(&bin.id);
        }
    }
    let image_order: HashMap<String, u32> = image_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.to_string(), (i + 1) as u32))
        .collect();

    let document = html::build_document(doc, &image_order);
    let text_length = document.html.len() as u32;

    // Text records.
    let mut records: Vec<Vec<u8>> = vec![Vec::new()]; // record 0 placeholder
    for chunk in document.html.chunks(TEXT_RECORD_SIZE) {
        records.push(chunk.to_vec());
    }
    let text_count = (records.len() - 1) as u16;

    // Image records.
    let first_image_record = if image_ids.is_empty() {
        NULL_INDEX
    } else {
        records.len() as u32
    };
    for id in &image_ids {
        if let Some(bin) = doc.binary(id) {
            records.push(bin.data.clone());
        }
    }

    // NCX index records.
    let ncx_record = if document.toc.is_empty() {
        NULL_INDEX
    } else {
        let entries = ncx::build_entries(&document.toc, text_length);
        let (master, data, cncx) = ncx::build_records(&entries);
        let index = records.len() as u32;
        records.push(master);
        records.push(data);
        records.push(cncx);
        index
    };

    let flis_record = records.len() as u32;
    records.push(flis());
    let fcis_record = records.len() as u32;
    records.push(fcis(text_length));
    records.push(vec![0xE9, 0x8E, 0x0D, 0x0A]);

    records[0] = record0(
        doc,
        text_length,
        text_count,
        first_image_record,
        ncx_record,
        flis_record,
        fcis_record,
        doc.cover().is_some(),
    );

    write_palmdb(&doc.title, &records)
}

/// Record 0: PalmDOC header, MOBI header (264 bytes declared), EXTH,
/// full name.
#[allow(clippy::too_many_arguments)]
fn record0(
    doc: &Fb2Document,
    text_length: u32,
    text_count: u16,
    first_image_record: u32,
    ncx_record: u32,
    flis_record: u32,
    fcis_record: u32,
    has_cover: bool,
) -> Vec<u8> {
    let title = if doc.title.is_empty() {
        "Untitled"
    } else {
        doc.title.as_str()
    };
    let title_bytes = title.as_bytes();
    let exth = build_exth(doc, title, has_cover);

    let mut r = Vec::with_capacity(264 + exth.len() + title_bytes.len() + 8);

    // PalmDOC header (offsets 0-15).
    r.extend_from_slice(&1u16.to_be_bytes()); // compression: none
    r.extend_from_slice(&0u16.to_be_bytes());
    r.extend_from_slice(&text_length.to_be_bytes());
    r.extend_from_slice(&text_count.to_be_bytes());
    r.extend_from_slice(&(TEXT_RECORD_SIZE as u16).to_be_bytes());
    r.extend_from_slice(&0u32.to_be_bytes()); // current position

    // MOBI header (offset 16).
    r.extend_from_slice(b"MOBI");
    r.extend_from_slice(&MOBI_HEADER_LEN.to_be_bytes());
    r.extend_from_slice(&2u32.to_be_bytes()); // type: book
    r.extend_from_slice(&65001u32.to_be_bytes()); // UTF-8
    r.extend_from_slice(&rand::random::<u32>().to_be_bytes()); // unique id
    r.extend_from_slice(&6u32.to_be_bytes()); // file version

    // Ten null index fields (offsets 40-79).
    for _ in 0..10 {
        r.extend_from_slice(&NULL_INDEX.to_be_bytes());
    }

    let first_non_book = 1 + u32::from(text_count);
    r.extend_from_slice(&first_non_book.to_be_bytes()); // 80

    // Full-name offset is resolved after EXTH is measured.
    let full_name_offset = 16 + MOBI_HEADER_LEN + exth.len() as u32;
    r.extend_from_slice(&full_name_offset.to_be_bytes()); // 84
    r.extend_from_slice(&(title_bytes.len() as u32).to_be_bytes()); // 88

    r.extend_from_slice(&9u32.to_be_bytes()); // 92 locale
    r.extend_from_slice(&0u32.to_be_bytes()); // 96 input lang
    r.extend_from_slice(&0u32.to_be_bytes()); // 100 output lang
    r.extend_from_slice(&6u32.to_be_bytes()); // 104 min version
    r.extend_from_slice(&first_image_record.to_be_bytes()); // 108

    // Huffman/HUFF/CDIC fields (112-127).
    for _ in 0..4 {
        r.extend_from_slice(&0u32.to_be_bytes());
    }

    // EXTH flags: 0x40, not 0x50 — 0x50 breaks popup footnotes on older
    // Kindles.
    r.extend_from_slice(&0x40u32.to_be_bytes()); // 128

    r.extend_from_slice(&[0u8; 32]); // 132-163

    // DRM fields (164-179).
    r.extend_from_slice(&NULL_INDEX.to_be_bytes()); // offset
    r.extend_from_slice(&NULL_INDEX.to_be_bytes()); // count
    r.extend_from_slice(&0u32.to_be_bytes()); // size
    r.extend_from_slice(&0u32.to_be_bytes()); // flags

    r.extend_from_slice(&[0u8; 12]); // 180-191

    r.extend_from_slice(&1u16.to_be_bytes()); // 192 FDST flow count
    r.extend_from_slice(&text_count.to_be_bytes()); // 194
    r.extend_from_slice(&0u32.to_be_bytes()); // 196
    r.extend_from_slice(&fcis_record.to_be_bytes()); // 200
    r.extend_from_slice(&1u32.to_be_bytes()); // 204
    r.extend_from_slice(&flis_record.to_be_bytes()); // 208
    r.extend_from_slice(&1u32.to_be_bytes()); // 212
    r.extend_from_slice(&[0u8; 8]); // 216-223
    r.extend_from_slice(&NULL_INDEX.to_be_bytes()); // 224
    r.extend_from_slice(&[0u8; 8]); // 228-235
    r.extend_from_slice(&NULL_INDEX.to_be_bytes()); // 236
    r.extend_from_slice(&0u32.to_be_bytes()); // 240 extra record data flags
    r.extend_from_slice(&ncx_record.to_be_bytes()); // 244

    // Fragment, skeleton, DATP, guide (248-263).
    for _ in 0..4 {
        r.extend_from_slice(&NULL_INDEX.to_be_bytes());
    }
    debug_assert_eq!(r.len(), 264);

    r.extend_from_slice(&exth);

    r.extend_from_slice(title_bytes);
    while r.len() % 4 != 0 {
        r.push(0);
    }
    r.extend_from_slice(&[0u8; 4]);

    r
}

/// EXTH block: author, updated title, doctype, creator software quartet,
/// cover offsets when present. 4-byte aligned.
fn build_exth(doc: &Fb2Document, title: &str, has_cover: bool) -> Vec<u8> {
    let mut records: Vec<(u32, Vec<u8>)> = Vec::new();
    if let Some(author) = doc.authors.first() {
        records.push((100, author.as_bytes().to_vec()));
    }
    records.push((503, title.as_bytes().to_vec()));
    records.push((501, b"EBOK".to_vec()));
    records.push((204, 201u32.to_be_bytes().to_vec()));
    records.push((205, 2u32.to_be_bytes().to_vec()));
    records.push((206, 9u32.to_be_bytes().to_vec()));
    records.push((207, 0u32.to_be_bytes().to_vec()));
    if has_cover {
        // Cover is always the first image record.
        records.push((201, 0u32.to_be_bytes().to_vec()));
        records.push((203, 0u32.to_be_bytes().to_vec()));
    }

    let mut content = Vec::new();
    for (rec_type, data) in &records {
        content.extend_from_slice(&rec_type.to_be_bytes());
        content.extend_from_slice(&((8 + data.len()) as u32).to_be_bytes());
        content.extend_from_slice(data);
    }
    let mut padding = 0;
    while (12 + content.len() + padding) % 4 != 0 {
        padding += 1;
    }

    let mut exth = Vec::with_capacity(12 + content.len() + padding);
    exth.extend_from_slice(b"EXTH");
    exth.extend_from_slice(&((12 + content.len() + padding) as u32).to_be_bytes());
    exth.extend_from_slice(&(records.len() as u32).to_be_bytes());
    exth.extend_from_slice(&content);
    exth.resize(exth.len() + padding, 0);
    exth
}

/// FLIS record, 36 fixed bytes.
fn flis() -> Vec<u8> {
    let mut r = Vec::with_capacity(36);
    r.extend_from_slice(b"FLIS");
    r.extend_from_slice(&8u32.to_be_bytes());
    r.extend_from_slice(&0x41u16.to_be_bytes());
    r.extend_from_slice(&0u16.to_be_bytes());
    r.extend_from_slice(&0u32.to_be_bytes());
    r.extend_from_slice(&NULL_INDEX.to_be_bytes());
    r.extend_from_slice(&1u16.to_be_bytes());
    r.extend_from_slice(&3u16.to_be_bytes());
    r.extend_from_slice(&3u32.to_be_bytes());
    r.extend_from_slice(&1u32.to_be_bytes());
    r.extend_from_slice(&NULL_INDEX.to_be_bytes());
    r
}

/// FCIS record, 44 bytes carrying the text length.
fn fcis(text_length: u32) -> Vec<u8> {
    let mut r = Vec::with_capacity(44);
    r.extend_from_slice(b"FCIS");
    r.extend_from_slice(&0x14u32.to_be_bytes());
    r.extend_from_slice(&0x10u32.to_be_bytes());
    r.extend_from_slice(&1u32.to_be_bytes());
    r.extend_from_slice(&0u32.to_be_bytes());
    r.extend_from_slice(&text_length.to_be_bytes());
    r.extend_from_slice(&0u32.to_be_bytes());
    r.extend_from_slice(&0x20u32.to_be_bytes());
    r.extend_from_slice(&8u32.to_be_bytes());
    r.extend_from_slice(&1u16.to_be_bytes());
    r.extend_from_slice(&1u16.to_be_bytes());
    r.extend_from_slice(&0u32.to_be_bytes());
    r
}

/// PalmDB container: header, record-info table, 2 gap bytes, records.
fn write_palmdb(title: &str, records: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();

    let mut name = [0u8; 32];
    let db_title: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == '_' || *c == '-')
        .collect::<String>()
        .replace(' ', "_");
    let name_bytes = db_title.as_bytes();
    let copy_len = name_bytes.len().min(31);
    name[..copy_len].copy_from_slice(&name_bytes[..copy_len]);
    out.extend_from_slice(&name);

    let now = chrono::Utc::now().timestamp() as u32;
    out.extend_from_slice(&0u16.to_be_bytes()); // attributes
    out.extend_from_slice(&0u16.to_be_bytes()); // version
    out.extend_from_slice(&now.to_be_bytes()); // created
    out.extend_from_slice(&now.to_be_bytes()); // modified
    out.extend_from_slice(&0u32.to_be_bytes()); // last backup
    out.extend_from_slice(&0u32.to_be_bytes()); // modification number
    out.extend_from_slice(&0u32.to_be_bytes()); // app info
    out.extend_from_slice(&0u32.to_be_bytes()); // sort info
    out.extend_from_slice(b"BOOKMOBI");
    out.extend_from_slice(&((2 * records.len() - 1) as u32).to_be_bytes()); // uid seed
    out.extend_from_slice(&0u32.to_be_bytes()); // next record list
    out.extend_from_slice(&(records.len() as u16).to_be_bytes());

    // Record info entries: offset + 3-byte unique id each.
    let mut offset = 78 + 8 * records.len() + 2;
    for (i, record) in records.iter().enumerate() {
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        let uid = (2 * i) as u32;
        let uid_bytes = uid.to_be_bytes();
        out.extend_from_slice(&[0, uid_bytes[1], uid_bytes[2], uid_bytes[3]]);
        offset += record.len();
    }
    out.extend_from_slice(&[0, 0]); // gap

    for record in records {
        out.extend_from_slice(record);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fb2;

    const SAMPLE: &str = r##"<FictionBook xmlns:l="http://www.w3.org/1999/xlink">
  <description><title-info>
    <author><first-name>Isaac</first-name><last-name>Asimov</last-name></author>
    <book-title>Foundation</book-title>
    <coverpage><image l:href="#cover.jpg"/></coverpage>
  </title-info></description>
  <body>
    <section><title><p>One</p></title><p>First.</p></section>
    <section><title><p>Two</p></title><p>Second.</p></section>
  </body>
  <binary id="cover.jpg" content-type="image/jpeg">/9j/4AAQSkZJRg==</binary>
</FictionBook>"##;

    struct Palm {
        offsets: Vec<usize>,
        data: Vec<u8>,
    }

    impl Palm {
        fn parse(data: Vec<u8>) -> Self {
            let count = u16::from_be_bytes([data[76], data[77]]) as usize;
            let mut offsets = Vec::with_capacity(count);
            for i in 0..count {
                let at = 78 + i * 8;
                offsets.push(u32::from_be_bytes([
                    data[at],
                    data[at + 1],
                    data[at + 2],
                    data[at + 3],
                ]) as usize);
            }
            Self { offsets, data }
        }

        fn record(&self, i: usize) -> &[u8] {
            let start = self.offsets[i];
            let end = self
                .offsets
                .get(i + 1)
                .copied()
                .unwrap_or(self.data.len());
            &self.data[start..end]
        }

        fn count(&self) -> usize {
            self.offsets.len()
        }
    }

    fn build_sample() -> Palm {
        let doc = fb2::parse(SAMPLE.as_bytes());
        Palm::parse(build(&doc))
    }

    #[test]
    fn test_palmdb_envelope() {
        let palm = build_sample();
        assert_eq!(&palm.data[60..68], b"BOOKMOBI");
        // 1 header + text + 1 image + 3 ncx + FLIS + FCIS + EOF
        let r0 = palm.record(0);
        let text_count =
            u16::from_be_bytes([r0[8], r0[9]]) as usize;
        assert_eq!(palm.count(), 1 + text_count + 1 + 3 + 3);
        // EOF marker is the last record.
        assert_eq!(palm.record(palm.count() - 1), &[0xE9, 0x8E, 0x0D, 0x0A]);
    }

    #[test]
    fn test_record0_header_layout() {
        let palm = build_sample();
        let r0 = palm.record(0);

        // PalmDOC: no compression, record size 4096.
        assert_eq!(u16::from_be_bytes([r0[0], r0[1]]), 1);
        assert_eq!(u16::from_be_bytes([r0[12], r0[13]]), 4096);

        // MOBI magic + header length 264.
        assert_eq!(&r0[16..20], b"MOBI");
        assert_eq!(u32::from_be_bytes([r0[20], r0[21], r0[22], r0[23]]), 264);
        // Type book, UTF-8, version 6.
        assert_eq!(u32::from_be_bytes([r0[24], r0[25], r0[26], r0[27]]), 2);
        assert_eq!(u32::from_be_bytes([r0[28], r0[29], r0[30], r0[31]]), 65001);
        assert_eq!(u32::from_be_bytes([r0[36], r0[37], r0[38], r0[39]]), 6);

        // EXTH flags: 0x40 set, 0x10 clear.
        let flags = u32::from_be_bytes([r0[128], r0[129], r0[130], r0[131]]);
        assert_eq!(flags & 0x40, 0x40);
        assert_eq!(flags & 0x10, 0);

        // EXTH block begins right after the declared header.
        assert_eq!(&r0[264..268], b"EXTH");
        let exth_len =
            u32::from_be_bytes([r0[268], r0[269], r0[270], r0[271]]) as usize;
        assert_eq!(exth_len % 4, 0);

        // Full name offset points at the title.
        let name_off =
            u32::from_be_bytes([r0[84], r0[85], r0[86], r0[87]]) as usize;
        let name_len =
            u32::from_be_bytes([r0[88], r0[89], r0[90], r0[91]]) as usize;
        assert_eq!(&r0[name_off..name_off + name_len], b"Foundation");
    }

    #[test]
    fn test_record_indices_cross_reference() {
        let palm = build_sample();
        let r0 = palm.record(0);
        let text_count = u16::from_be_bytes([r0[8], r0[9]]) as u32;

        let first_non_book =
            u32::from_be_bytes([r0[80], r0[81], r0[82], r0[83]]);
        assert_eq!(first_non_book, 1 + text_count);

        let first_image =
            u32::from_be_bytes([r0[108], r0[109], r0[110], r0[111]]);
        assert_eq!(first_image, 1 + text_count);

        let ncx_index =
            u32::from_be_bytes([r0[244], r0[245], r0[246], r0[247]]);
        assert_eq!(ncx_index, 1 + text_count + 1);
        assert_eq!(&palm.record(ncx_index as usize)[0..4], b"INDX");

        let flis_index =
            u32::from_be_bytes([r0[208], r0[209], r0[210], r0[211]]);
        let fcis_index =
            u32::from_be_bytes([r0[200], r0[201], r0[202], r0[203]]);
        assert_eq!(&palm.record(flis_index as usize)[0..4], b"FLIS");
        assert_eq!(palm.record(flis_index as usize).len(), 36);
        assert_eq!(&palm.record(fcis_index as usize)[0..4], b"FCIS");
        assert_eq!(palm.record(fcis_index as usize).len(), 44);

        // FCIS carries the text length.
        let text_length = u32::from_be_bytes([r0[4], r0[5], r0[6], r0[7]]);
        let fcis = palm.record(fcis_index as usize);
        assert_eq!(
            u32::from_be_bytes([fcis[20], fcis[21], fcis[22], fcis[23]]),
            text_length
        );
    }

    #[test]
    fn test_exth_records() {
        let palm = build_sample();
        let r0 = palm.record(0);
        let count = u32::from_be_bytes([r0[272], r0[273], r0[274], r0[275]]);
        assert!(count >= 7);

        // Walk EXTH records and collect types.
        let mut pos = 276;
        let mut types = Vec::new();
        for _ in 0..count {
            let rec_type =
                u32::from_be_bytes([r0[pos], r0[pos + 1], r0[pos + 2], r0[pos + 3]]);
            let rec_len =
                u32::from_be_bytes([r0[pos + 4], r0[pos + 5], r0[pos + 6], r0[pos + 7]])
                    as usize;
            types.push(rec_type);
            pos += rec_len;
        }
        for expected in [100, 503, 501, 204, 205, 206, 207, 201, 203] {
            assert!(types.contains(&expected), "missing EXTH {expected}");
        }
    }

    #[test]
    fn test_no_cover_no_image_records() {
        let doc = fb2::parse(
            b"<FictionBook><description><title-info><book-title>X</book-title>\
              </title-info></description><body><section><p>t</p></section></body></FictionBook>",
        );
        let palm = Palm::parse(build(&doc));
        let r0 = palm.record(0);
        let first_image =
            u32::from_be_bytes([r0[108], r0[109], r0[110], r0[111]]);
        assert_eq!(first_image, NULL_INDEX);
    }

    #[test]
    fn test_text_reassembles() {
        let palm = build_sample();
        let r0 = palm.record(0);
        let text_length = u32::from_be_bytes([r0[4], r0[5], r0[6], r0[7]]) as usize;
        let text_count = u16::from_be_bytes([r0[8], r0[9]]) as usize;

        let mut text = Vec::new();
        for i in 1..=text_count {
            text.extend_from_slice(palm.record(i));
        }
        assert_eq!(text.len(), text_length);
        let html = String::from_utf8(text).unwrap();
        assert!(html.contains("<h2>One</h2>"));
        assert!(html.contains("<mbp:pagebreak/>"));
    }
}
