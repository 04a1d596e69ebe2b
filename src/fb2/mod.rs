//! FB2 (FictionBook) document model.
//!
//! The parser produces a typed tree; the EPUB and MOBI builders pattern
//! match on it instead of re-querying raw XML.

pub mod parser;

pub use parser::parse;

/// A parsed FictionBook document.
#[derive(Debug, Default)]
pub struct Fb2Document {
    pub title: String,
    pub authors: Vec<String>,
    /// IETF language tag from title-info; consumers fall back to "en".
    pub lang: Option<String>,
    /// Publication year from title-info/date.
    pub year: Option<i32>,
    /// `binary/@id` referenced by the coverpage image, without the `#`.
    pub cover_id: Option<String>,
    pub bodies: Vec<Fb2Body>,
    pub binaries: Vec<Fb2Binary>,
}

impl Fb2Document {
    /// The main body: one without a name, or named "main", else the first.
    pub fn main_body(&self) -> Option<&Fb2Body> {
        self.bodies
            .iter()
            .find(|b| b.name.is_none())
            .or_else(|| {
                self.bodies
                    .iter()
                    .find(|b| b.name.as_deref() == Some("main"))
            })
            .or_else(|| self.bodies.first())
    }

    /// The footnotes body, conventionally named "notes".
    pub fn notes_body(&self) -> Option<&Fb2Body> {
        self.bodies
            .iter()
            .find(|b| b.name.as_deref() == Some("notes"))
    }

    pub fn binary(&self, id: &str) -> Option<&Fb2Binary> {
        self.binaries.iter().find(|b| b.id == id)
    }

    /// Cover binary, present iff the coverpage reference resolves.
    pub fn cover(&self) -> Option<&Fb2Binary> {
        self.cover_id.as_deref().and_then(|id| self.binary(id))
    }
}

/// An embedded binary: decoded base64 payload plus its content type.
#[derive(Debug)]
pub struct Fb2Binary {
    pub id: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct Fb2Body {
    pub name: Option<String>,
    pub sections: Vec<Fb2Section>,
}

#[derive(Debug, Default)]
pub struct Fb2Section {
    pub id: Option<String>,
    /// Text descendants of the section `<title>`, space-joined.
    pub title: Option<String>,
    pub blocks: Vec<Block>,
    pub children: Vec<Fb2Section>,
}

impl Fb2Section {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Block-level FB2 content.
#[derive(Debug)]
pub enum Block {
    Paragraph(Vec<Inline>),
    Subtitle(Vec<Inline>),
    EmptyLine,
    Poem(Poem),
    Cite(Vec<Block>),
    Epigraph(Vec<Block>),
    Image { href: String },
    TextAuthor(Vec<Inline>),
}

/// A poem: stanzas of verse lines.
#[derive(Debug, Default)]
pub struct Poem {
    pub stanzas: Vec<Vec<Vec<Inline>>>,
}

/// Inline FB2 content.
#[derive(Debug)]
pub enum Inline {
    Text(String),
    Strong(Vec<Inline>),
    Emphasis(Vec<Inline>),
    Style(Vec<Inline>),
    Strikethrough(Vec<Inline>),
    Sub(Vec<Inline>),
    Sup(Vec<Inline>),
    Code(Vec<Inline>),
    Link { href: String, content: Vec<Inline> },
    Image { href: String },
}

impl Inline {
    /// Plain-text rendering, used for titles and labels.
    pub fn plain_text(inlines: &[Inline]) -> String {
        let mut out = String::new();
        collect_text(inlines, &mut out);
        out
    }
}

fn collect_text(inlines: &[Inline], out: &mut String) {
    for inline in inlines {
        match inline {
            Inline::Text(t) => out.push_str(t),
            Inline::Strong(c)
            | Inline::Emphasis(c)
            | Inline::Style(c)
            | Inline::Strikethrough(c)
            | Inline::Sub(c)
            | Inline::Sup(c)
            | Inline::Code(c)
            | Inline::Link { content: c, .. } => collect_text(c, out),
            Inline::Image { .. } => {}
        }
    }
}
