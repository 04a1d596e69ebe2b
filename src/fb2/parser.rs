use std::io::Cursor;

use base64::Engine;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::{Block, Fb2Binary, Fb2Body, Fb2Document, Fb2Section, Inline, Poem};

type Fb2Reader<'a> = Reader<Cursor<&'a [u8]>>;

/// Parse an FB2 document from raw bytes.
///
/// Tolerant of malformed XML: a parse error stops reading and the
/// document collected so far is returned, matching how library files in
/// the wild behave (truncated downloads, stray entities).
pub fn parse(data: &[u8]) -> Fb2Document {
    let mut xml = Reader::from_reader(Cursor::new(data));
    xml.config_mut().trim_text(false);
    xml.config_mut().check_end_names = false;
    xml.config_mut().check_comments = false;

    let mut doc = Fb2Document::default();
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(ref e)) => match local_name(e.name().as_ref()).as_str() {
                "description" => parse_description(&mut xml, &mut doc),
                "body" => {
                    let name = attr_value(e, "name");
                    let body = parse_body(&mut xml, name);
                    doc.bodies.push(body);
                }
                "binary" => {
                    let id = attr_value(e, "id").unwrap_or_default();
                    let content_type =
                        attr_value(e, "content-type").unwrap_or_else(|| "image/jpeg".to_string());
                    if let Some(payload) = read_binary_payload(&mut xml)
                        && !id.is_empty()
                    {
                        doc.binaries.push(Fb2Binary {
                            id,
                            content_type,
                            data: payload,
                        });
                    }
                }
                _ => {}
            },
            _ => {}
        }
        buf.clear();
    }

    doc
}

/// Read `<description>`: title, authors, lang, date, coverpage reference.
fn parse_description(xml: &mut Fb2Reader, doc: &mut Fb2Document) {
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut author_parts: Vec<String> = Vec::new();
    let mut text = String::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(ref e)) => {
                path.push(local_name(e.name().as_ref()));
                text.clear();
            }
            Ok(Event::Empty(ref e)) => {
                // <image l:href="#cover.jpg"/> inside <coverpage>
                if local_name(e.name().as_ref()) == "image"
                    && path.iter().any(|p| p == "coverpage")
                    && let Some(href) = href_value(e)
                {
                    let id = href.trim_start_matches('#').to_string();
                    if !id.is_empty() {
                        doc.cover_id = Some(id);
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(t) = unescape_text(e) {
                    text.push_str(&t);
                }
            }
            Ok(Event::End(ref e)) => {
                let local = local_name(e.name().as_ref());
                let in_title_info = path.iter().any(|p| p == "title-info");
                match local.as_str() {
                    "description" => return,
                    "book-title" if in_title_info => {
                        doc.title = text.trim().to_string();
                    }
                    "lang" if in_title_info => {
                        let lang = text.trim().to_string();
                        if !lang.is_empty() {
                            doc.lang = Some(lang);
                        }
                    }
                    "date" if in_title_info => {
                        // Year is the leading digits of either the element
                        // text ("1951") or the value attribute form.
                        let year: String =
                            text.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
                        if let Ok(y) = year.parse::<i32>()
                            && y > 1
                        {
                            doc.year = Some(y);
                        }
                    }
                    "first-name" | "middle-name" | "last-name" | "nickname"
                        if in_title_info && path.iter().any(|p| p == "author") =>
                    {
                        let part = text.trim().to_string();
                        if !part.is_empty() {
                            author_parts.push(part);
                        }
                    }
                    "author" if in_title_info => {
                        if !author_parts.is_empty() {
                            doc.authors.push(author_parts.join(" "));
                            author_parts.clear();
                        }
                    }
                    _ => {}
                }
                path.pop();
                text.clear();
            }
            _ => {}
        }
        buf.clear();
    }
}

/// Read `<body>` content: a sequence of sections (body-level titles and
/// epigraphs are skipped; they carry no chapter content).
fn parse_body(xml: &mut Fb2Reader, name: Option<String>) -> Fb2Body {
    let mut body = Fb2Body {
        name,
        sections: Vec::new(),
    };
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(ref e)) => match local_name(e.name().as_ref()).as_str() {
                "section" => {
                    let id = attr_value(e, "id");
                    body.sections.push(parse_section(xml, id));
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => {
                if local_name(e.name().as_ref()) == "body" {
                    break;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    body
}

/// Read one `<section>` recursively.
fn parse_section(xml: &mut Fb2Reader, id: Option<String>) -> Fb2Section {
    let mut section = Fb2Section {
        id,
        ..Fb2Section::default()
    };
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "section" => {
                        let child_id = attr_value(e, "id");
                        section.children.push(parse_section(xml, child_id));
                    }
                    "title" => {
                        let title = read_title_text(xml);
                        if !title.is_empty() {
                            section.title = Some(title);
                        }
                    }
                    "epigraph" => {
                        let blocks = parse_blocks(xml, "epigraph");
                        section.blocks.push(Block::Epigraph(blocks));
                    }
                    _ => {
                        if let Some(block) = parse_block_start(xml, &local, e) {
                            section.blocks.push(block);
                        }
                    }
                }
            }
            Ok(Event::Empty(ref e)) => {
                if let Some(block) = parse_block_empty(e) {
                    section.blocks.push(block);
                }
            }
            Ok(Event::End(ref e)) => {
                if local_name(e.name().as_ref()) == "section" {
                    break;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    section
}

/// Block elements that arrive as self-closing tags.
fn parse_block_empty(e: &BytesStart<'_>) -> Option<Block> {
    match local_name(e.name().as_ref()).as_str() {
        "empty-line" => Some(Block::EmptyLine),
        "image" => href_value(e).map(|href| Block::Image {
            href: href.trim_start_matches('#').to_string(),
        }),
        _ => None,
    }
}

/// Block elements that open with content.
fn parse_block_start(xml: &mut Fb2Reader, local: &str, e: &BytesStart<'_>) -> Option<Block> {
    match local {
        "p" => Some(Block::Paragraph(parse_inlines(xml, "p"))),
        "subtitle" => Some(Block::Subtitle(parse_inlines(xml, "subtitle"))),
        "empty-line" => {
            skip_to_end(xml, "empty-line");
            Some(Block::EmptyLine)
        }
        "poem" => Some(Block::Poem(parse_poem(xml))),
        "cite" => Some(Block::Cite(parse_blocks(xml, "cite"))),
        "text-author" => Some(Block::TextAuthor(parse_inlines(xml, "text-author"))),
        "image" => {
            let href = href_value(e);
            skip_to_end(xml, "image");
            href.map(|h| Block::Image {
                href: h.trim_start_matches('#').to_string(),
            })
        }
        _ => {
            skip_to_end(xml, local);
            None
        }
    }
}

/// Read a run of block elements until `end_tag` closes. Used for cite
/// and epigraph bodies, which hold paragraphs, poems and attributions.
fn parse_blocks(xml: &mut Fb2Reader, end_tag: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                if let Some(block) = parse_block_start(xml, &local, e) {
                    blocks.push(block);
                }
            }
            Ok(Event::Empty(ref e)) => {
                if let Some(block) = parse_block_empty(e) {
                    blocks.push(block);
                }
            }
            Ok(Event::End(ref e)) => {
                if local_name(e.name().as_ref()) == end_tag {
                    break;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    blocks
}

/// Read `<poem>`: stanzas of verse lines. Poem titles and epigraphs are
/// folded into the first stanza position they occupy in source order.
fn parse_poem(xml: &mut Fb2Reader) -> Poem {
    let mut poem = Poem::default();
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(ref e)) => match local_name(e.name().as_ref()).as_str() {
                "stanza" => poem.stanzas.push(parse_stanza(xml)),
                other => skip_to_end(xml, other),
            },
            Ok(Event::End(ref e)) => {
                if local_name(e.name().as_ref()) == "poem" {
                    break;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    poem
}

fn parse_stanza(xml: &mut Fb2Reader) -> Vec<Vec<Inline>> {
    let mut lines = Vec::new();
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(ref e)) => match local_name(e.name().as_ref()).as_str() {
                "v" => lines.push(parse_inlines(xml, "v")),
                other => skip_to_end(xml, other),
            },
            Ok(Event::End(ref e)) => {
                if local_name(e.name().as_ref()) == "stanza" {
                    break;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    lines
}

/// Read inline content until `end_tag` closes.
fn parse_inlines(xml: &mut Fb2Reader, end_tag: &str) -> Vec<Inline> {
    let mut inlines = Vec::new();
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Text(ref e)) => {
                if let Some(t) = unescape_text(e)
                    && !t.is_empty()
                {
                    inlines.push(Inline::Text(t.into_owned()));
                }
            }
            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                let inline = match local.as_str() {
                    "strong" => Inline::Strong(parse_inlines(xml, "strong")),
                    "emphasis" => Inline::Emphasis(parse_inlines(xml, "emphasis")),
                    "style" => Inline::Style(parse_inlines(xml, "style")),
                    "strikethrough" => Inline::Strikethrough(parse_inlines(xml, "strikethrough")),
                    "sub" => Inline::Sub(parse_inlines(xml, "sub")),
                    "sup" => Inline::Sup(parse_inlines(xml, "sup")),
                    "code" => Inline::Code(parse_inlines(xml, "code")),
                    "a" => {
                        let href = href_value(e).unwrap_or_default();
                        Inline::Link {
                            href,
                            content: parse_inlines(xml, "a"),
                        }
                    }
                    other => {
                        skip_to_end(xml, other);
                        continue;
                    }
                };
                inlines.push(inline);
            }
            Ok(Event::Empty(ref e)) => {
                if local_name(e.name().as_ref()) == "image"
                    && let Some(href) = href_value(e)
                {
                    inlines.push(Inline::Image {
                        href: href.trim_start_matches('#').to_string(),
                    });
                }
            }
            Ok(Event::End(ref e)) => {
                if local_name(e.name().as_ref()) == end_tag {
                    break;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    inlines
}

/// Concatenate the text descendants of `<title>`, space-joined per
/// paragraph.
fn read_title_text(xml: &mut Fb2Reader) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Text(ref e)) => {
                if let Some(t) = unescape_text(e) {
                    let t = t.trim().to_string();
                    if !t.is_empty() {
                        parts.push(t);
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                if local_name(e.name().as_ref()) == "title" {
                    break;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    parts.join(" ")
}

/// Base64 payload of a `<binary>` element, whitespace stripped.
fn read_binary_payload(xml: &mut Fb2Reader) -> Option<Vec<u8>> {
    let mut b64 = String::new();
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Text(ref e)) => {
                if let Some(t) = unescape_text(e) {
                    b64.extend(t.chars().filter(|c| !c.is_whitespace()));
                }
            }
            Ok(Event::End(ref e)) => {
                if local_name(e.name().as_ref()) == "binary" {
                    break;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    base64::engine::general_purpose::STANDARD.decode(&b64).ok()
}

/// Skip everything until the matching end tag.
fn skip_to_end(xml: &mut Fb2Reader, end_tag: &str) {
    let mut buf = Vec::new();
    let mut depth = 0usize;
    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(Event::Start(ref e)) => {
                if local_name(e.name().as_ref()) == end_tag {
                    depth += 1;
                }
            }
            Ok(Event::End(ref e)) => {
                if local_name(e.name().as_ref()) == end_tag {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
            }
            _ => {}
        }
        buf.clear();
    }
}

/// Local name of a tag, namespace prefix stripped, lowercased.
fn unescape_text<'a>(e: &quick_xml::events::BytesText<'a>) -> Option<std::borrow::Cow<'a, str>> {
    let decoded = e.decode().ok()?;
    let unescaped = quick_xml::escape::unescape(&decoded).ok()?;
    Some(std::borrow::Cow::Owned(unescaped.into_owned()))
}

fn local_name(raw: &[u8]) -> String {
    let s = std::str::from_utf8(raw).unwrap_or("");
    match s.rfind(':') {
        Some(i) => s[i + 1..].to_lowercase(),
        None => s.to_lowercase(),
    }
}

fn attr_value(e: &BytesStart<'_>, name: &str) -> Option<String> {
    for attr in e.attributes().flatten() {
        let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
        if key == name {
            return attr.unescape_value().ok().map(|v| v.into_owned());
        }
    }
    None
}

/// Any `*href` attribute: xlink:href, l:href, xml-namespaced or plain.
fn href_value(e: &BytesStart<'_>) -> Option<String> {
    for attr in e.attributes().flatten() {
        let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
        if key == "href" || key.ends_with(":href") {
            return attr.unescape_value().ok().map(|v| v.into_owned());
        }
    }
    None
}
