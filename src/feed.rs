//! Feed document parsing.
//!
//! A document is sniffed by its root element and then read as one of the supported
//! dialects. Every dialect is normalised into the same [`Entry`] record.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::date::{parse_date, DateError};
use crate::xml::{decode_text, Element, Mode, XmlError};

/// A normalised feed entry. `link` identifies the entry across feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub title: String,
    pub link: String,
    pub description: String,
    pub time: DateTime<Utc>,
}

/// Feed family, derived from the local name of the root element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Atom,
    Rss,
    Rdf,
    Unknown,
}

impl Dialect {
    pub fn from_root(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "feed" => Dialect::Atom,
            "rss" => Dialect::Rss,
            "rdf" => Dialect::Rdf,
            _ => Dialect::Unknown,
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error("unknown feed type <{0}>")]
    UnknownDialect(String),
    #[error("parse {field} node for {dialect} entry: {source}")]
    Date {
        dialect: &'static str,
        field: &'static str,
        #[source]
        source: DateError,
    },
}

/// A feed document that has been read and sniffed but not yet interpreted.
#[derive(Debug)]
pub struct FeedDocument {
    pub dialect: Dialect,
    root: Element,
}

impl FeedDocument {
    pub fn read(bytes: &[u8]) -> Result<Self, FeedError> {
        let text = decode_text(bytes);
        let root = Element::parse(&text, Mode::Lenient)?;
        Ok(Self {
            dialect: Dialect::from_root(&root.name),
            root,
        })
    }

    pub fn entries(&self) -> Result<Vec<Entry>, FeedError> {
        match self.dialect {
            Dialect::Atom => atom_entries(&self.root),
            Dialect::Rss | Dialect::Rdf => rss_entries(&self.root),
            Dialect::Unknown => Err(FeedError::UnknownDialect(self.root.name.clone())),
        }
    }
}

/// Parses a raw feed into entries.
///
/// One unparsable date rejects the whole feed. A missing or blank date is replaced
/// with the current time.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<Entry>, FeedError> {
    FeedDocument::read(bytes)?.entries()
}

fn atom_entries(feed: &Element) -> Result<Vec<Entry>, FeedError> {
    feed.children_named("entry")
        .map(|entry| -> Result<Entry, FeedError> {
            let time = entry_time(entry.child_text("updated"), "atom", "updated")?;
            let description = match entry.child("summary") {
                Some(summary) => summary.text.clone(),
                None => entry.child_text("content").to_string(),
            };
            Ok(Entry {
                title: entry.child_text("title").to_string(),
                link: atom_link(entry).to_string(),
                description,
                time,
            })
        })
        .collect()
}

/// Prefers the alternate link; falls back to the first link carrying an `href`.
fn atom_link(entry: &Element) -> &str {
    let mut links = entry.children_named("link").filter_map(|link| {
        link.attr("href")
            .map(|href| (link.attr("rel").unwrap_or("alternate"), href))
    });
    let first = links.next();
    first
        .into_iter()
        .chain(links)
        .find(|(rel, _)| *rel == "alternate")
        .or(first)
        .map_or("", |(_, href)| href)
}

fn rss_entries(root: &Element) -> Result<Vec<Entry>, FeedError> {
    // RSS nests items in the channel; RDF 1.0 puts them beside it.
    let items = root
        .children_named("channel")
        .flat_map(|channel| channel.children_named("item"))
        .chain(root.children_named("item"));

    items
        .map(|item| -> Result<Entry, FeedError> {
            let (field, raw) = match item.child("pubDate") {
                Some(pub_date) => ("pubDate", pub_date.text.as_str()),
                None => ("date", item.child_text("date")),
            };
            Ok(Entry {
                title: item.child_text("title").to_string(),
                link: item.child_text("link").to_string(),
                description: item.child_text("description").to_string(),
                time: entry_time(raw, "rss", field)?,
            })
        })
        .collect()
}

fn entry_time(
    raw: &str,
    dialect: &'static str,
    field: &'static str,
) -> Result<DateTime<Utc>, FeedError> {
    match parse_date(raw) {
        Ok(time) => Ok(time),
        Err(DateError::NoDate) => Ok(Utc::now()),
        Err(source) => Err(FeedError::Date {
            dialect,
            field,
            source,
        }),
    }
}
