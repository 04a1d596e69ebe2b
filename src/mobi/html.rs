//! MOBI-flavoured HTML generation.
//!
//! Same inline mapping as the EPUB chapters, with two Kindle quirks:
//! every section ends with `<mbp:pagebreak/>`, and footnote links jump
//! to a footnotes div at the end of the document.

use std::collections::{HashMap, HashSet};

use crate::epub::xhtml::{self, ImageRef, RenderCtx, escape_xml};
use crate::fb2::{Fb2Document, Fb2Section};

use super::ncx::NcxInput;

/// An assembled MOBI text stream plus its table-of-contents inputs.
pub struct MobiDocument {
    pub html: Vec<u8>,
    pub toc: Vec<NcxInput>,
}

/// Build the full HTML document and record section byte offsets.
///
/// `image_order` maps FB2 binary ids to 1-based image record ordinals
/// (cover first), matching the record layout the writer emits.
pub fn build_document(doc: &Fb2Document, image_order: &HashMap<String, u32>) -> MobiDocument {
    let mut footnote_ids: HashSet<String> = HashSet::new();
    let mut link_targets: HashMap<String, String> = HashMap::new();
    if let Some(notes) = doc.notes_body() {
        for section in &notes.sections {
            if let Some(id) = &section.id {
                footnote_ids.insert(id.clone());
                link_targets.insert(id.clone(), format!("#{id}"));
            }
        }
    }

    let ctx = RenderCtx {
        image_files: image_order
            .iter()
            .map(|(id, n)| (id.clone(), ImageRef::RecIndex(*n)))
            .collect(),
        link_targets,
        footnote_ids,
    };

    let title = if doc.title.is_empty() {
        "Untitled"
    } else {
        doc.title.as_str()
    };
    let mut html = String::new();
    html.push_str(&format!(
        "<html><head><title>{}</title></head><body>\n",
        escape_xml(title)
    ));

    let mut toc = Vec::new();
    let mut counter = 0usize;
    if let Some(main) = doc.main_body() {
        for section in &main.sections {
            render_section(section, 0, &ctx, &mut html, &mut toc, &mut counter);
        }
    }
    if toc.is_empty() {
        toc.push(NcxInput {
            title: "Content".to_string(),
            offset: html.len() as u32,
            depth: 0,
        });
        html.push_str("<mbp:pagebreak/>\n");
    }

    render_footnotes(doc, &ctx, &mut html);
    html.push_str("</body></html>\n");

    MobiDocument {
        html: html.into_bytes(),
        toc,
    }
}

fn render_section(
    section: &Fb2Section,
    depth: u32,
    ctx: &RenderCtx,
    html: &mut String,
    toc: &mut Vec<NcxInput>,
    counter: &mut usize,
) {
    *counter += 1;
    let title = section
        .title
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("Chapter {counter}"));

    toc.push(NcxInput {
        title: title.clone(),
        offset: html.len() as u32,
        depth,
    });

    html.push_str(&format!("<h2>{}</h2>\n", escape_xml(&title)));
    xhtml::render_blocks(&section.blocks, ctx, html);
    for child in &section.children {
        render_section(child, depth + 1, ctx, html, toc, counter);
    }
    html.push_str("<mbp:pagebreak/>\n");
}

/// Footnotes div at document end, entries in id order.
fn render_footnotes(doc: &Fb2Document, ctx: &RenderCtx, html: &mut String) {
    let Some(notes) = doc.notes_body() else {
        return;
    };
    let mut sections: Vec<&Fb2Section> = notes
        .sections
        .iter()
        .filter(|s| s.id.is_some())
        .collect();
    if sections.is_empty() {
        return;
    }
    sections.sort_by_key(|s| s.id.clone());

    html.push_str("<div class=\"footnotes\">\n");
    for section in sections {
        let id = section.id.as_deref().unwrap_or_default();
        html.push_str(&format!("<div id=\"{}\">\n", escape_xml(id)));
        if let Some(title) = &section.title {
            html.push_str(&format!("<h3>{}</h3>\n", escape_xml(title)));
        }
        xhtml::render_blocks(&section.blocks, ctx, html);
        html.push_str("</div>\n");
    }
    html.push_str("</div>\n");
}
