use askama::Template;

use crate::feed::Entry;

/// URL schemes allowed through to an `href`.
const SAFE_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

#[derive(Template)]
#[template(path = "feeds.html")]
pub struct FeedsTemplate<'a> {
    pub entries: &'a [Entry],
}

/// Renders the final page, one link per entry in the given order.
pub fn render(entries: &[Entry]) -> askama::Result<String> {
    FeedsTemplate { entries }.render()
}

impl Entry {
    /// The link if it is safe to put in an `href`, otherwise `#`.
    ///
    /// Relative links pass through; absolute links must use one of [`SAFE_SCHEMES`].
    pub fn href(&self) -> &str {
        let link = self.link.trim();
        let scheme_end = link.find(|c: char| matches!(c, ':' | '/' | '?' | '#'));
        match scheme_end {
            Some(end) if link[end..].starts_with(':') => {
                let scheme = &link[..end];
                if SAFE_SCHEMES
                    .iter()
                    .any(|safe| safe.eq_ignore_ascii_case(scheme))
                {
                    link
                } else {
                    "#"
                }
            }
            _ => link,
        }
    }
}
