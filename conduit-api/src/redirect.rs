//! Post-link Redirect Allow-List
//!
//! The OAuth2 callback sends the browser on to `after_redirect_url` only
//! when its origin (scheme, host and port) is on this list.

use reqwest::Url;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectAllowList {
    /// ASCII-serialized origins, e.g. `https://app.example.com`.
    origins: Vec<String>,
}

impl RedirectAllowList {
    /// Entries that are not absolute http(s) URLs are skipped.
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for origin in origins.into_iter().filter_map(|o| origin_of(o.as_ref())) {
            if !list.origins.contains(&origin) {
                list.origins.push(origin);
            }
        }
        list
    }

    pub fn allows(&self, url: &str) -> bool {
        origin_of(url).is_some_and(|origin| self.origins.contains(&origin))
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }
}

/// Origin of an absolute http(s) URL.
pub(crate) fn origin_of(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}
