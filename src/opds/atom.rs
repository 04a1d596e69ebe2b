//! Atom rendering of the typed feed model, plus the OpenSearch
//! descriptor. Hrefs are rewritten at render time: the configured
//! prefix is prepended to every rooted href, and `use_absolute_uri`
//! additionally prepends `http://{host}`.

use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;

use super::feed::{Entry, Feed, FeedLink};

/// How hrefs are rewritten when the feed is serialized.
#[derive(Debug, Clone, Default)]
pub struct UriRewrite {
    /// Path prefix without slashes, e.g. `opds`.
    pub prefix: String,
    /// `Host` header value when absolute URIs are requested.
    pub absolute_host: Option<String>,
}

impl UriRewrite {
    pub fn apply(&self, href: &str) -> String {
        // The OpenSearch descriptor lives at the server root.
        let prefixed = if href == "/opds-opensearch.xml" || !href.starts_with('/') {
            href.to_string()
        } else if self.prefix.is_empty() {
            href.to_string()
        } else {
            format!("/{}{}", self.prefix, href)
        };
        match &self.absolute_host {
            Some(host) => format!("http://{host}{prefixed}"),
            None => prefixed,
        }
    }
}

/// Serialize a feed as Atom XML.
pub fn render(feed: &Feed, rewrite: &UriRewrite) -> Result<Vec<u8>, quick_xml::Error> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut feed_el = BytesStart::new("feed");
    feed_el.push_attribute(("xmlns", "http://www.w3.org/2005/Atom"));
    feed_el.push_attribute(("xmlns:dcterms", "http://purl.org/dc/terms"));
    feed_el.push_attribute(("xmlns:opds", "http://opds-spec.org/2010/catalog"));
    writer.write_event(Event::Start(feed_el))?;

    text_element(&mut writer, "id", &feed.id)?;
    text_element(&mut writer, "title", &feed.title)?;
    if !feed.subtitle.is_empty() {
        text_element(&mut writer, "subtitle", &feed.subtitle)?;
    }
    text_element(&mut writer, "updated", &feed.updated)?;

    write_link(
        &mut writer,
        &FeedLink::new(feed.self_href.clone(), "self", super::feed::NAV_TYPE),
        rewrite,
    )?;
    write_link(
        &mut writer,
        &FeedLink::new("/", "start", super::feed::NAV_TYPE),
        rewrite,
    )?;
    write_link(
        &mut writer,
        &FeedLink::new(
            "/opds-opensearch.xml",
            "search",
            super::feed::OPENSEARCH_TYPE,
        ),
        rewrite,
    )?;
    for link in &feed.links {
        write_link(&mut writer, link, rewrite)?;
    }

    for entry in &feed.entries {
        write_entry(&mut writer, entry, rewrite)?;
    }

    writer.write_event(Event::End(BytesEnd::new("feed")))?;
    Ok(writer.into_inner().into_inner())
}

fn write_entry(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    entry: &Entry,
    rewrite: &UriRewrite,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new("entry")))?;
    text_element(writer, "id", &entry.id)?;
    text_element(writer, "title", &entry.title)?;
    text_element(writer, "updated", &entry.updated)?;

    for author in &entry.authors {
        writer.write_event(Event::Start(BytesStart::new("author")))?;
        text_element(writer, "name", author)?;
        writer.write_event(Event::End(BytesEnd::new("author")))?;
    }

    for (term, label) in &entry.categories {
        let mut el = BytesStart::new("category");
        el.push_attribute(("term", term.as_str()));
        el.push_attribute(("label", label.as_str()));
        writer.write_event(Event::Empty(el))?;
    }

    for link in &entry.links {
        write_link(writer, link, rewrite)?;
    }

    if !entry.content.is_empty() {
        let mut el = BytesStart::new("content");
        el.push_attribute(("type", "text"));
        writer.write_event(Event::Start(el))?;
        writer.write_event(Event::Text(BytesText::new(&entry.content)))?;
        writer.write_event(Event::End(BytesEnd::new("content")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("entry")))?;
    Ok(())
}

fn write_link(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    link: &FeedLink,
    rewrite: &UriRewrite,
) -> Result<(), quick_xml::Error> {
    let mut el = BytesStart::new("link");
    el.push_attribute(("href", rewrite.apply(&link.href).as_str()));
    el.push_attribute(("rel", link.rel.as_str()));
    el.push_attribute(("type", link.link_type.as_str()));
    if let Some(title) = &link.title {
        el.push_attribute(("title", title.as_str()));
    }
    writer.write_event(Event::Empty(el))?;
    Ok(())
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

/// The static OpenSearch descriptor with both query templates.
pub fn opensearch_descriptor(server_name: &str, rewrite: &UriRewrite) -> Vec<u8> {
    let plain = rewrite.apply("/search?searchTerm={searchTerms}");
    let typed = rewrite.apply("/search?searchType=book&searchTerm={searchTerms}");
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <OpenSearchDescription xmlns=\"http://a9.com/-/spec/opensearch/1.1/\">\n\
         \u{20} <ShortName>{server_name}</ShortName>\n\
         \u{20} <Description>Search the {server_name} catalog</Description>\n\
         \u{20} <InputEncoding>UTF-8</InputEncoding>\n\
         \u{20} <OutputEncoding>UTF-8</OutputEncoding>\n\
         \u{20} <Url type=\"application/atom+xml\" template=\"{plain}\"/>\n\
         \u{20} <Url type=\"application/atom+xml\" template=\"{typed}\"/>\n\
         </OpenSearchDescription>\n"
    )
    .into_bytes()
}
