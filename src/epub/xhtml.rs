//! FB2 block/inline tree → XHTML rendering.
//!
//! One mapping serves both container formats; the MOBI writer layers its
//! own page breaks and footnote classes on top via [`RenderCtx`].

use std::collections::{HashMap, HashSet};

use crate::fb2::{Block, Inline};

/// Escape a string for insertion as XML text or attribute value.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// How an `<img>` points at its bytes: EPUB uses file names, MOBI 6
/// uses 1-based image record ordinals.
#[derive(Debug, Clone)]
pub enum ImageRef {
    Src(String),
    RecIndex(u32),
}

impl ImageRef {
    fn render(&self) -> String {
        match self {
            ImageRef::Src(name) => format!("<img src=\"{}\" alt=\"\"/>", escape_xml(name)),
            ImageRef::RecIndex(n) => format!("<img recindex=\"{n:05}\"/>"),
        }
    }
}

/// Rendering context shared by the EPUB and MOBI emitters.
#[derive(Default)]
pub struct RenderCtx {
    /// FB2 binary id → image reference.
    pub image_files: HashMap<String, ImageRef>,
    /// Link target id → rewritten href.
    pub link_targets: HashMap<String, String>,
    /// Ids whose links are footnote references (`class="footnote-ref"`).
    pub footnote_ids: HashSet<String>,
}

impl RenderCtx {
    fn image_ref(&self, href: &str) -> Option<&ImageRef> {
        self.image_files.get(href)
    }

    fn link_href(&self, href: &str) -> String {
        let id = href.trim_start_matches('#');
        match self.link_targets.get(id) {
            Some(target) => target.clone(),
            None => href.to_string(),
        }
    }
}

/// Render a run of blocks to XHTML.
pub fn render_blocks(blocks: &[Block], ctx: &RenderCtx, out: &mut String) {
    for block in blocks {
        render_block(block, ctx, out);
    }
}

fn render_block(block: &Block, ctx: &RenderCtx, out: &mut String) {
    match block {
        Block::Paragraph(inlines) => {
            out.push_str("<p>");
            render_inlines(inlines, ctx, out);
            out.push_str("</p>\n");
        }
        Block::Subtitle(inlines) => {
            out.push_str("<h3>");
            render_inlines(inlines, ctx, out);
            out.push_str("</h3>\n");
        }
        Block::EmptyLine => out.push_str("<br/>\n"),
        Block::Poem(poem) => {
            out.push_str("<div class=\"poem\">\n");
            for stanza in &poem.stanzas {
                out.push_str("<div class=\"stanza\">\n");
                for line in stanza {
                    out.push_str("<p class=\"verse\">");
                    render_inlines(line, ctx, out);
                    out.push_str("</p>\n");
                }
                out.push_str("</div>\n");
            }
            out.push_str("</div>\n");
        }
        Block::Cite(blocks) => {
            out.push_str("<blockquote>\n");
            render_blocks(blocks, ctx, out);
            out.push_str("</blockquote>\n");
        }
        Block::Epigraph(blocks) => {
            out.push_str("<div class=\"epigraph\">\n");
            render_blocks(blocks, ctx, out);
            out.push_str("</div>\n");
        }
        Block::Image { href } => {
            if let Some(img) = ctx.image_ref(href) {
                out.push_str(&img.render());
                out.push('\n');
            }
        }
        Block::TextAuthor(inlines) => {
            out.push_str("<cite>");
            render_inlines(inlines, ctx, out);
            out.push_str("</cite>\n");
        }
    }
}

fn render_inlines(inlines: &[Inline], ctx: &RenderCtx, out: &mut String) {
    for inline in inlines {
        render_inline(inline, ctx, out);
    }
}

fn render_inline(inline: &Inline, ctx: &RenderCtx, out: &mut String) {
    match inline {
        Inline::Text(t) => out.push_str(&escape_xml(t)),
        Inline::Strong(c) => wrap("strong", c, ctx, out),
        Inline::Emphasis(c) => wrap("em", c, ctx, out),
        Inline::Style(c) => wrap("span", c, ctx, out),
        Inline::Strikethrough(c) => wrap("s", c, ctx, out),
        Inline::Sub(c) => wrap("sub", c, ctx, out),
        Inline::Sup(c) => wrap("sup", c, ctx, out),
        Inline::Code(c) => wrap("code", c, ctx, out),
        Inline::Link { href, content } => {
            let id = href.trim_start_matches('#');
            let target = ctx.link_href(href);
            if ctx.footnote_ids.contains(id) {
                out.push_str(&format!(
                    "<a class=\"footnote-ref\" href=\"{}\">",
                    escape_xml(&target)
                ));
            } else {
                out.push_str(&format!("<a href=\"{}\">", escape_xml(&target)));
            }
            render_inlines(content, ctx, out);
            out.push_str("</a>");
        }
        Inline::Image { href } => {
            if let Some(img) = ctx.image_ref(href) {
                out.push_str(&img.render());
            }
        }
    }
}

fn wrap(tag: &str, content: &[Inline], ctx: &RenderCtx, out: &mut String) {
    out.push_str(&format!("<{tag}>"));
    render_inlines(content, ctx, out);
    out.push_str(&format!("</{tag}>"));
}
