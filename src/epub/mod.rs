//! FB2 → EPUB 3.0 conversion.
//!
//! The output is a ZIP whose first entry is a STORED `mimetype` followed
//! by DEFLATED package documents, chapters and images. Package metadata
//! carries both EPUB-3 (`properties="cover-image"`, `dcterms:modified`)
//! and EPUB-2 (`meta name="cover"`, `toc.ncx`, `guide`) vocabulary so
//! older readers stay happy.

pub mod xhtml;

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};

use chrono::Utc;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::fb2::Fb2Document;
use xhtml::{ImageRef, RenderCtx, escape_xml};

const MIMETYPE: &str = "application/epub+zip";
const RECOGNIZED_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "svg", "webp"];

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="EPUB/package.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

const CHAPTER_CSS: &str = "body { font-family: serif; line-height: 1.4; margin: 1em; }\n\
p { margin: 0.3em 0; text-indent: 1.2em; }\n\
h2, h3 { text-indent: 0; margin: 1em 0 0.5em; }\n\
img { max-width: 100%; }\n\
.poem { margin: 1em 2em; }\n\
.verse { margin: 0; text-indent: 0; }\n\
.epigraph { margin: 1em 2em; font-style: italic; }\n\
cite { display: block; text-align: right; font-style: italic; }\n";

/// A chapter ready for packaging.
#[derive(Debug)]
pub struct Chapter {
    pub title: String,
    pub file_name: String,
    pub body_html: String,
}

/// An image part extracted from FB2 binaries.
#[derive(Debug)]
pub struct ImageResource {
    pub id: String,
    pub file_name: String,
    pub mime: String,
    pub data: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum EpubError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// Build an EPUB from a parsed FB2 document.
///
/// `book_id` seeds `dc:identifier` as `urn:uuid:{id}`; without it a
/// fresh UUID is minted, which is the one intentionally non-reproducible
/// part of the output besides `dcterms:modified`.
pub fn build(doc: &Fb2Document, book_id: Option<&str>) -> Result<Vec<u8>, EpubError> {
    let images = collect_images(doc);
    let cover = doc
        .cover_id
        .as_deref()
        .and_then(|id| images.iter().find(|img| img.id == id));
    let chapters = collect_chapters(doc, &images);

    let identifier = match book_id {
        Some(id) if !id.is_empty() => format!("urn:uuid:{id}"),
        _ => format!("urn:uuid:{}", uuid::Uuid::new_v4()),
    };
    let lang = doc.lang.as_deref().unwrap_or("en");
    let title = if doc.title.is_empty() {
        "Untitled"
    } else {
        doc.title.as_str()
    };

    let opf = build_opf(doc, &identifier, title, lang, &chapters, &images, cover)?;
    let nav = build_nav(title, &chapters, cover.is_some());
    let ncx = build_ncx(&identifier, title, &chapters, cover.is_some());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    // Fixed entry timestamp keeps repeated conversions byte-comparable.
    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(zip::DateTime::default());
    let deflated = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    // The mimetype entry must come first and uncompressed.
    zip.start_file("mimetype", stored)?;
    zip.write_all(MIMETYPE.as_bytes())?;

    zip.start_file("META-INF/container.xml", deflated)?;
    zip.write_all(CONTAINER_XML.as_bytes())?;

    zip.start_file("EPUB/package.opf", deflated)?;
    zip.write_all(&opf)?;

    zip.start_file("EPUB/nav.xhtml", deflated)?;
    zip.write_all(nav.as_bytes())?;

    zip.start_file("EPUB/toc.ncx", deflated)?;
    zip.write_all(ncx.as_bytes())?;

    if let Some(cover) = cover {
        zip.start_file("EPUB/cover.xhtml", deflated)?;
        zip.write_all(build_cover_page(&cover.file_name).as_bytes())?;
    }

    for chapter in &chapters {
        zip.start_file(format!("EPUB/{}", chapter.file_name), deflated)?;
        zip.write_all(chapter_document(chapter).as_bytes())?;
    }

    // Cover binary first, then the rest in document order.
    if let Some(cover) = cover {
        zip.start_file(format!("EPUB/{}", cover.file_name), deflated)?;
        zip.write_all(&cover.data)?;
    }
    for img in &images {
        if Some(img.id.as_str()) == doc.cover_id.as_deref() {
            continue;
        }
        zip.start_file(format!("EPUB/{}", img.file_name), deflated)?;
        zip.write_all(&img.data)?;
    }

    Ok(zip.finish()?.into_inner())
}

/// File extension for an FB2 binary: keep a recognized extension on the
/// id, otherwise derive one from the content type.
pub fn extension_for(id: &str, content_type: &str) -> String {
    if let Some(ext) = id.rsplit('.').next()
        && id.contains('.')
        && RECOGNIZED_EXTENSIONS.contains(&ext.to_lowercase().as_str())
    {
        return ext.to_lowercase();
    }
    if content_type.contains("png") {
        "png".to_string()
    } else if content_type.contains("gif") {
        "gif".to_string()
    } else {
        "jpg".to_string()
    }
}

/// Normalised image MIME type, same grouping as [`extension_for`].
pub fn image_mime(content_type: &str) -> String {
    if content_type.contains("png") {
        "image/png".to_string()
    } else if content_type.contains("gif") {
        "image/gif".to_string()
    } else {
        "image/jpeg".to_string()
    }
}

fn collect_images(doc: &Fb2Document) -> Vec<ImageResource> {
    doc.binaries
        .iter()
        .map(|bin| {
            let ext = extension_for(&bin.id, &bin.content_type);
            let file_name = if bin.id.to_lowercase().ends_with(&format!(".{ext}")) {
                bin.id.replace('/', "_")
            } else {
                format!("{}.{ext}", bin.id.replace('/', "_"))
            };
            ImageResource {
                id: bin.id.clone(),
                file_name,
                mime: image_mime(&bin.content_type),
                data: bin.data.clone(),
            }
        })
        .collect()
}

/// Flatten the section tree into chapters: leaves become chapters,
/// parents are discarded and their children promoted.
fn collect_chapters(doc: &Fb2Document, images: &[ImageResource]) -> Vec<Chapter> {
    fn flatten<'a>(sections: &'a [crate::fb2::Fb2Section], out: &mut Vec<&'a crate::fb2::Fb2Section>) {
        for section in sections {
            if section.is_leaf() {
                out.push(section);
            } else {
                flatten(&section.children, out);
            }
        }
    }

    let mut leaves = Vec::new();
    if let Some(main) = doc.main_body() {
        flatten(&main.sections, &mut leaves);
    }
    if let Some(notes) = doc.notes_body() {
        flatten(&notes.sections, &mut leaves);
    }

    // Link rewriting: section id → chapter file + anchor.
    let mut link_targets: HashMap<String, String> = HashMap::new();
    for (i, section) in leaves.iter().enumerate() {
        if let Some(id) = &section.id {
            link_targets.insert(id.clone(), format!("chapter{}.xhtml#{}", i + 1, id));
        }
    }

    let mut ctx = RenderCtx {
        link_targets,
        footnote_ids: HashSet::new(),
        image_files: images
            .iter()
            .map(|img| (img.id.clone(), ImageRef::Src(img.file_name.clone())))
            .collect(),
    };
    // The cover binary renders through its own page, not inline.
    if let Some(cover_id) = &doc.cover_id {
        ctx.image_files.remove(cover_id);
    }

    let mut chapters = Vec::new();
    for (i, section) in leaves.iter().enumerate() {
        let number = i + 1;
        let title = section
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("Chapter {number}"));

        let mut body = String::new();
        match &section.id {
            Some(id) => body.push_str(&format!(
                "<h2 id=\"{}\">{}</h2>\n",
                escape_xml(id),
                escape_xml(&title)
            )),
            None => body.push_str(&format!("<h2>{}</h2>\n", escape_xml(&title))),
        }
        xhtml::render_blocks(&section.blocks, &ctx, &mut body);

        chapters.push(Chapter {
            title,
            file_name: format!("chapter{number}.xhtml"),
            body_html: body,
        });
    }

    if chapters.is_empty() {
        chapters.push(Chapter {
            title: "Chapter 1".to_string(),
            file_name: "chapter1.xhtml".to_string(),
            body_html: "<h2>Chapter 1</h2>\n".to_string(),
        });
    }

    chapters
}

fn chapter_document(chapter: &Chapter) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\">\n\
         <head>\n<title>{}</title>\n<style>\n{}</style>\n</head>\n\
         <body>\n{}</body>\n</html>\n",
        escape_xml(&chapter.title),
        CHAPTER_CSS,
        chapter.body_html
    )
}

fn build_cover_page(cover_file: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\">\n\
         <head><title>Cover</title></head>\n\
         <body>\n<div id=\"cover-image\"><img src=\"{}\" alt=\"Cover\"/></div>\n</body>\n</html>\n",
        escape_xml(cover_file)
    )
}

fn build_opf(
    doc: &Fb2Document,
    identifier: &str,
    title: &str,
    lang: &str,
    chapters: &[Chapter],
    images: &[ImageResource],
    cover: Option<&ImageResource>,
) -> Result<Vec<u8>, EpubError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut package = BytesStart::new("package");
    package.push_attribute(("xmlns", "http://www.idpf.org/2007/opf"));
    package.push_attribute(("version", "3.0"));
    package.push_attribute(("unique-identifier", "book-id"));
    package.push_attribute(("xml:lang", lang));
    writer.write_event(Event::Start(package))?;

    // metadata
    let mut metadata = BytesStart::new("metadata");
    metadata.push_attribute(("xmlns:dc", "http://purl.org/dc/elements/1.1/"));
    writer.write_event(Event::Start(metadata))?;

    let mut id_el = BytesStart::new("dc:identifier");
    id_el.push_attribute(("id", "book-id"));
    writer.write_event(Event::Start(id_el))?;
    writer.write_event(Event::Text(BytesText::new(identifier)))?;
    writer.write_event(Event::End(BytesEnd::new("dc:identifier")))?;

    text_element(&mut writer, "dc:title", title)?;
    text_element(&mut writer, "dc:language", lang)?;

    let modified = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let mut meta = BytesStart::new("meta");
    meta.push_attribute(("property", "dcterms:modified"));
    writer.write_event(Event::Start(meta))?;
    writer.write_event(Event::Text(BytesText::new(&modified)))?;
    writer.write_event(Event::End(BytesEnd::new("meta")))?;

    for author in &doc.authors {
        text_element(&mut writer, "dc:creator", author)?;
    }
    if let Some(year) = doc.year {
        text_element(&mut writer, "dc:date", &year.to_string())?;
    }
    if cover.is_some() {
        // EPUB-2 readers find the cover through this meta.
        let mut cover_meta = BytesStart::new("meta");
        cover_meta.push_attribute(("name", "cover"));
        cover_meta.push_attribute(("content", "cover-image"));
        writer.write_event(Event::Empty(cover_meta))?;
    }
    writer.write_event(Event::End(BytesEnd::new("metadata")))?;

    // manifest
    writer.write_event(Event::Start(BytesStart::new("manifest")))?;
    manifest_item(&mut writer, "ncx", "toc.ncx", "application/x-dtbncx+xml", None)?;
    manifest_item(&mut writer, "nav", "nav.xhtml", "application/xhtml+xml", Some("nav"))?;
    if let Some(cover) = cover {
        manifest_item(&mut writer, "cover", "cover.xhtml", "application/xhtml+xml", None)?;
        manifest_item(
            &mut writer,
            "cover-image",
            &cover.file_name,
            &cover.mime,
            Some("cover-image"),
        )?;
    }
    for (i, chapter) in chapters.iter().enumerate() {
        manifest_item(
            &mut writer,
            &format!("chapter{}", i + 1),
            &chapter.file_name,
            "application/xhtml+xml",
            None,
        )?;
    }
    for img in images {
        if Some(img.id.as_str()) == cover.map(|c| c.id.as_str()) {
            continue;
        }
        manifest_item(
            &mut writer,
            &format!("img-{}", sanitize_id(&img.id)),
            &img.file_name,
            &img.mime,
            None,
        )?;
    }
    writer.write_event(Event::End(BytesEnd::new("manifest")))?;

    // spine
    let mut spine = BytesStart::new("spine");
    spine.push_attribute(("toc", "ncx"));
    writer.write_event(Event::Start(spine))?;
    if cover.is_some() {
        let mut itemref = BytesStart::new("itemref");
        itemref.push_attribute(("idref", "cover"));
        itemref.push_attribute(("linear", "no"));
        writer.write_event(Event::Empty(itemref))?;
    }
    for i in 0..chapters.len() {
        let mut itemref = BytesStart::new("itemref");
        let idref = format!("chapter{}", i + 1);
        itemref.push_attribute(("idref", idref.as_str()));
        writer.write_event(Event::Empty(itemref))?;
    }
    writer.write_event(Event::End(BytesEnd::new("spine")))?;

    // guide (EPUB-2 compatibility)
    writer.write_event(Event::Start(BytesStart::new("guide")))?;
    if cover.is_some() {
        guide_reference(&mut writer, "cover", "Cover", "cover.xhtml")?;
    }
    if let Some(first) = chapters.first() {
        guide_reference(&mut writer, "text", "Text", &first.file_name)?;
    }
    writer.write_event(Event::End(BytesEnd::new("guide")))?;

    writer.write_event(Event::End(BytesEnd::new("package")))?;
    Ok(writer.into_inner().into_inner())
}

fn text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    tag: &str,
    text: &str,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn manifest_item(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    id: &str,
    href: &str,
    media_type: &str,
    properties: Option<&str>,
) -> Result<(), quick_xml::Error> {
    let mut item = BytesStart::new("item");
    item.push_attribute(("id", id));
    item.push_attribute(("href", href));
    item.push_attribute(("media-type", media_type));
    if let Some(props) = properties {
        item.push_attribute(("properties", props));
    }
    writer.write_event(Event::Empty(item))?;
    Ok(())
}

fn guide_reference(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    ref_type: &str,
    title: &str,
    href: &str,
) -> Result<(), quick_xml::Error> {
    let mut reference = BytesStart::new("reference");
    reference.push_attribute(("type", ref_type));
    reference.push_attribute(("title", title));
    reference.push_attribute(("href", href));
    writer.write_event(Event::Empty(reference))?;
    Ok(())
}

fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

fn build_nav(title: &str, chapters: &[Chapter], has_cover: bool) -> String {
    let mut items = String::new();
    if has_cover {
        items.push_str("      <li><a href=\"cover.xhtml\">Cover</a></li>\n");
    }
    for chapter in chapters {
        items.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            escape_xml(&chapter.file_name),
            escape_xml(&chapter.title)
        ));
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
         <head><title>{}</title></head>\n\
         <body>\n  <nav epub:type=\"toc\" id=\"toc\">\n    <h1>Table of Contents</h1>\n    <ol>\n{}    </ol>\n  </nav>\n</body>\n</html>\n",
        escape_xml(title),
        items
    )
}

fn build_ncx(identifier: &str, title: &str, chapters: &[Chapter], has_cover: bool) -> String {
    let mut nav_points = String::new();
    let mut play_order = 1;
    if has_cover {
        nav_points.push_str(&format!(
            "    <navPoint id=\"cover\" playOrder=\"{play_order}\">\n      <navLabel><text>Cover</text></navLabel>\n      <content src=\"cover.xhtml\"/>\n    </navPoint>\n"
        ));
        play_order += 1;
    }
    for (i, chapter) in chapters.iter().enumerate() {
        nav_points.push_str(&format!(
            "    <navPoint id=\"chapter{}\" playOrder=\"{}\">\n      <navLabel><text>{}</text></navLabel>\n      <content src=\"{}\"/>\n    </navPoint>\n",
            i + 1,
            play_order,
            escape_xml(&chapter.title),
            escape_xml(&chapter.file_name)
        ));
        play_order += 1;
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n\
         \u{20} <head>\n    <meta name=\"dtb:uid\" content=\"{}\"/>\n    <meta name=\"dtb:depth\" content=\"1\"/>\n  </head>\n\
         \u{20} <docTitle><text>{}</text></docTitle>\n\
         \u{20} <navMap>\n{}  </navMap>\n</ncx>\n",
        escape_xml(identifier),
        escape_xml(title),
        nav_points
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fb2;
    use std::io::Read;

    const SAMPLE: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<FictionBook xmlns="http://www.gribuser.ru/xml/fictionbook/2.0" xmlns:l="http://www.w3.org/1999/xlink">
  <description>
    <title-info>
      <author><first-name>Leo</first-name><last-name>Tolstoy</last-name></author>
      <book-title>War &amp; Peace</book-title>
      <lang>en</lang>
      <date>1869</date>
      <coverpage><image l:href="#cover.jpg"/></coverpage>
    </title-info>
  </description>
  <body>
    <section><title><p>One</p></title><p>First chapter text.</p></section>
    <section><title><p>Two</p></title><p>Second chapter text.</p></section>
  </body>
  <binary id="cover.jpg" content-type="image/jpeg">/9j/4AAQSkZJRg==</binary>
</FictionBook>"##;

    fn build_sample() -> Vec<u8> {
        let doc = fb2::parse(SAMPLE.as_bytes());
        build(&doc, Some("test-book-id")).unwrap()
    }

    #[test]
    fn test_first_entry_is_stored_mimetype() {
        let bytes = build_sample();
        // Local file header at offset 0: signature, then compression
        // method (offset 8, little-endian) must be 0 = stored.
        assert_eq!(&bytes[0..4], b"PK\x03\x04");
        assert_eq!(u16::from_le_bytes([bytes[8], bytes[9]]), 0);
        let name_len = u16::from_le_bytes([bytes[26], bytes[27]]) as usize;
        assert_eq!(&bytes[30..30 + name_len], b"mimetype");
        let extra_len = u16::from_le_bytes([bytes[28], bytes[29]]) as usize;
        let data_start = 30 + name_len + extra_len;
        assert_eq!(
            &bytes[data_start..data_start + MIMETYPE.len()],
            MIMETYPE.as_bytes()
        );
    }

    #[test]
    fn test_archive_structure() {
        let bytes = build_sample();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names[0], "mimetype");
        assert!(names.contains(&"META-INF/container.xml".to_string()));
        assert!(names.contains(&"EPUB/package.opf".to_string()));
        assert!(names.contains(&"EPUB/nav.xhtml".to_string()));
        assert!(names.contains(&"EPUB/toc.ncx".to_string()));
        assert!(names.contains(&"EPUB/cover.xhtml".to_string()));
        assert!(names.contains(&"EPUB/chapter1.xhtml".to_string()));
        assert!(names.contains(&"EPUB/chapter2.xhtml".to_string()));
        assert!(names.contains(&"EPUB/cover.jpg".to_string()));

        let mut mimetype = String::new();
        archive
            .by_name("mimetype")
            .unwrap()
            .read_to_string(&mut mimetype)
            .unwrap();
        assert_eq!(mimetype, MIMETYPE);
    }

    #[test]
    fn test_opf_metadata_and_cover() {
        let bytes = build_sample();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut opf = String::new();
        archive
            .by_name("EPUB/package.opf")
            .unwrap()
            .read_to_string(&mut opf)
            .unwrap();

        assert!(opf.contains("unique-identifier=\"book-id\""));
        assert!(opf.contains("urn:uuid:test-book-id"));
        assert!(opf.contains("War &amp; Peace"));
        assert!(opf.contains("Leo Tolstoy"));
        assert!(opf.contains("<dc:date>1869</dc:date>"));
        assert!(opf.contains("dcterms:modified"));
        assert!(opf.contains("properties=\"cover-image\""));
        assert!(opf.contains("<meta name=\"cover\" content=\"cover-image\"/>"));
        assert!(opf.contains("linear=\"no\""));
        assert!(opf.contains("<reference type=\"cover\""));
        assert!(opf.contains("<reference type=\"text\""));
    }

    #[test]
    fn test_nav_has_exactly_one_toc_nav() {
        let bytes = build_sample();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut nav = String::new();
        archive
            .by_name("EPUB/nav.xhtml")
            .unwrap()
            .read_to_string(&mut nav)
            .unwrap();
        assert_eq!(nav.matches("<nav epub:type=\"toc\"").count(), 1);
        assert!(nav.contains("cover.xhtml"));
        assert!(nav.contains("chapter1.xhtml"));
        assert!(nav.contains("chapter2.xhtml"));
    }

    #[test]
    fn test_no_cover_book_omits_cover_artifacts() {
        let fb2 = r#"<FictionBook><description><title-info>
            <book-title>Plain</book-title><lang>en</lang>
            </title-info></description>
            <body><section><p>Text.</p></section></body></FictionBook>"#;
        let doc = fb2::parse(fb2.as_bytes());
        let bytes = build(&doc, None).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(!names.contains(&"EPUB/cover.xhtml".to_string()));

        let mut opf = String::new();
        archive
            .by_name("EPUB/package.opf")
            .unwrap()
            .read_to_string(&mut opf)
            .unwrap();
        assert!(!opf.contains("name=\"cover\""));
        assert!(opf.contains("urn:uuid:"));
    }

    #[test]
    fn test_empty_body_yields_single_chapter() {
        let doc = fb2::parse(b"<FictionBook><body></body></FictionBook>");
        let bytes = build(&doc, None).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut chapter = String::new();
        archive
            .by_name("EPUB/chapter1.xhtml")
            .unwrap()
            .read_to_string(&mut chapter)
            .unwrap();
        assert!(chapter.contains("Chapter 1"));
    }

    #[test]
    fn test_untitled_sections_get_numbered_titles() {
        let fb2 = r#"<FictionBook><body>
            <section><p>No title here.</p></section>
            <section><p>Nor here.</p></section>
            </body></FictionBook>"#;
        let doc = fb2::parse(fb2.as_bytes());
        let bytes = build(&doc, None).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut nav = String::new();
        archive
            .by_name("EPUB/nav.xhtml")
            .unwrap()
            .read_to_string(&mut nav)
            .unwrap();
        assert!(nav.contains("Chapter 1"));
        assert!(nav.contains("Chapter 2"));
    }

    #[test]
    fn test_extension_rules() {
        assert_eq!(extension_for("pic.png", "image/png"), "png");
        assert_eq!(extension_for("pic", "image/png"), "png");
        assert_eq!(extension_for("pic", "image/gif"), "gif");
        assert_eq!(extension_for("pic", "image/jpeg"), "jpg");
        assert_eq!(extension_for("pic.webp", "application/octet-stream"), "webp");
        assert_eq!(image_mime("image/png"), "image/png");
        assert_eq!(image_mime("whatever"), "image/jpeg");
    }

    #[test]
    fn test_parent_sections_are_flattened() {
        let fb2 = r#"<FictionBook><body>
            <section><title><p>Part</p></title>
              <section><title><p>A</p></title><p>a</p></section>
              <section><title><p>B</p></title><p>b</p></section>
            </section>
            </body></FictionBook>"#;
        let doc = fb2::parse(fb2.as_bytes());
        let images = collect_images(&doc);
        let chapters = collect_chapters(&doc, &images);
        let titles: Vec<&str> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
    }
}
