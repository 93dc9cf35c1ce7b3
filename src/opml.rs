//! Feed list extraction from OPML subscription files.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::xml::{decode_text, Element, Mode, XmlError};

#[derive(Debug, Error)]
pub enum OpmlError {
    #[error("could not read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse OPML: {0}")]
    Xml(#[from] XmlError),
    #[error("expected an <opml> document, found <{0}>")]
    NotOpml(String),
}

/// Reads an OPML file and returns its feed URLs.
pub async fn load(path: impl AsRef<Path>) -> Result<Vec<String>, OpmlError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|source| OpmlError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    feed_urls(&decode_text(&bytes))
}

/// Collects the `xmlUrl` of every `type="rss"` outline under `<body>`, at any depth,
/// in document order. A matching outline's own children are searched too.
pub fn feed_urls(text: &str) -> Result<Vec<String>, OpmlError> {
    let root = Element::parse(text, Mode::Strict)?;
    if root.name != "opml" {
        return Err(OpmlError::NotOpml(root.name));
    }

    let mut urls = Vec::new();
    for body in root.children_named("body") {
        collect(body, &mut urls);
    }
    Ok(urls)
}

fn collect(parent: &Element, urls: &mut Vec<String>) {
    for outline in parent.children_named("outline") {
        if outline.attr("type") == Some("rss") {
            match outline.attr("xmlUrl") {
                Some(url) if !url.trim().is_empty() => urls.push(url.trim().to_string()),
                _ => debug!(
                    text = outline.attr("text").unwrap_or(""),
                    "Skipping rss outline without xmlUrl"
                ),
            }
        }
        collect(outline, urls);
    }
}
