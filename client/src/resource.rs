use core::fmt;

use url::Url;

const SEP: char = '/';

/// Server address plus API path, built segment by segment.
#[derive(Clone, Debug)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    #[must_use]
    pub fn new(uri: &str) -> Option<Endpoint> {
        let url = Url::parse(uri).ok()?;
        if url.cannot_be_a_base() {
            return None;
        }
        Some(Endpoint { url })
    }

    /// Appends `path` to the current path. Empty segments are dropped, a
    /// trailing separator of `path` is kept.
    pub fn join(&mut self, path: &str) -> &mut Self {
        let segments: Vec<&str> = self
            .url
            .path_segments()
            .into_iter()
            .flatten()
            .chain(path.split(SEP))
            .filter(|s| !s.is_empty())
            .collect();
        let mut joined = segments.join("/");
        if path.ends_with(SEP) {
            joined.push(SEP);
        }
        self.url.set_path(&joined);
        self
    }

    pub fn query(&mut self, key: &str, value: &str) -> &mut Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
