//! Out-of-band id exchange
//!
//! The viewer shares a link to the streamer page carrying its id in the
//! `id` query parameter; the streamer reads the id back from that link.

use url::Url;

use crate::config::RendezvousConfig;
use crate::errors::{PeerCamError, Result};

/// Builds viewer links from a base URL and the streamer page name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendezvous {
    base: Url,
    streamer_page: String,
}

impl Rendezvous {
    /// A base without a trailing slash is treated as a page URL; its last
    /// segment is replaced by the streamer page.
    pub fn new(base_url: &str, streamer_page: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| PeerCamError::Rendezvous(format!("invalid base url '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(PeerCamError::Rendezvous(format!(
                "'{}' cannot be used as a base url",
                base_url
            )));
        }
        if streamer_page.is_empty() {
            return Err(PeerCamError::Rendezvous("streamer page is empty".to_string()));
        }

        Ok(Self {
            base,
            streamer_page: streamer_page.to_string(),
        })
    }

    pub fn from_config(config: &RendezvousConfig) -> Result<Self> {
        Self::new(&config.base_url, &config.streamer_page)
    }

    /// `<base>/<streamer page>?id=<id>`
    pub fn viewer_link(&self, id: &str) -> Result<Url> {
        if id.is_empty() {
            return Err(PeerCamError::Rendezvous("cannot link an empty id".to_string()));
        }

        let mut link = self.base.join(&self.streamer_page).map_err(|e| {
            PeerCamError::Rendezvous(format!("invalid streamer page '{}': {}", self.streamer_page, e))
        })?;
        link.set_fragment(None);
        link.query_pairs_mut().clear().append_pair("id", id);
        Ok(link)
    }
}

/// Read the remote id from a streamer page URL
pub fn remote_id_from_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|e| PeerCamError::Rendezvous(format!("invalid url '{}': {}", url, e)))?;

    parsed
        .query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| PeerCamError::Rendezvous(format!("no id parameter in '{}'", url)))
}
