//! Share links: `https://host/<send|receive>/<token>#key=<b64>&nonce=<b64>`.
//!
//! Key and nonce live only in the fragment, which HTTP clients never put on
//! the wire. Everything built from a link uses the fragment-free URL.

use crate::common::TransferError;
use crate::crypto::{EncryptionKey, Nonce};
use reqwest::Url;
use std::fmt;

/// Which side of the relay the link points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Relay serves files, the link holder downloads
    Send,
    /// Relay accepts files, the link holder uploads
    Receive,
}

impl LinkMode {
    pub fn as_path(&self) -> &'static str {
        match self {
            LinkMode::Send => "send",
            LinkMode::Receive => "receive",
        }
    }
}

/// `<origin>/<mode>/<token>/<extra...>`. `origin` may carry a path prefix for
/// relays mounted below the root.
pub fn relay_url(origin: &Url, mode: LinkMode, token: &str, extra: &[&str]) -> Url {
    let mut url = origin.clone();
    url.set_fragment(None);
    url.set_query(None);
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .push(mode.as_path())
            .push(token)
            .extend(extra);
    }
    url
}

#[derive(Clone)]
pub struct TransferCredentials {
    pub origin: Url,
    pub mode: LinkMode,
    pub token: String,
    pub key: EncryptionKey,
    /// Base nonce for framed-stream mode
    pub nonce: Option<Nonce>,
}

impl fmt::Debug for TransferCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferCredentials")
            .field("origin", &self.origin.as_str())
            .field("mode", &self.mode)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl TransferCredentials {
    pub fn generate(origin: Url, mode: LinkMode, token: impl Into<String>) -> Self {
        Self {
            origin,
            mode,
            token: token.into(),
            key: EncryptionKey::new(),
            nonce: Some(Nonce::new()),
        }
    }

    pub fn parse(link: &str) -> Result<Self, TransferError> {
        let url = Url::parse(link)
            .map_err(|e| TransferError::protocol(format!("invalid transfer link: {e}")))?;

        let fragment = url
            .fragment()
            .ok_or_else(|| TransferError::protocol("transfer link has no #key fragment"))?;

        let mut key = None;
        let mut nonce = None;
        for pair in fragment.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            match name {
                "key" => key = Some(EncryptionKey::from_base64(value)?),
                "nonce" => nonce = Some(Nonce::from_base64(value)?),
                _ => {}
            }
        }
        let key = key.ok_or_else(|| TransferError::protocol("transfer link is missing key"))?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let (prefix, mode, token) = match segments.as_slice() {
            [prefix @ .., "send", token] => (prefix, LinkMode::Send, *token),
            [prefix @ .., "receive", token] => (prefix, LinkMode::Receive, *token),
            _ => {
                return Err(TransferError::protocol(
                    "transfer link path must be /send/<token> or /receive/<token>",
                ))
            }
        };

        let mut origin = url.clone();
        origin.set_fragment(None);
        origin.set_query(None);
        if prefix.is_empty() {
            origin.set_path("/");
        } else {
            origin.set_path(&format!("/{}/", prefix.join("/")));
        }

        Ok(Self {
            origin,
            mode,
            token: token.to_string(),
            key,
            nonce,
        })
    }

    /// Link to hand to the peer, fragment included
    pub fn share_link(&self) -> String {
        let mut fragment = format!("key={}", self.key.to_base64());
        if let Some(nonce) = &self.nonce {
            fragment.push_str("&nonce=");
            fragment.push_str(&nonce.to_base64());
        }
        format!("{}#{}", self.endpoint(&[]), fragment)
    }

    /// Relay endpoint for this link, never carrying the fragment
    pub fn endpoint(&self, extra: &[&str]) -> Url {
        relay_url(&self.origin, self.mode, &self.token, extra)
    }

    pub fn require_nonce(&self) -> Result<Nonce, TransferError> {
        self.nonce
            .ok_or_else(|| TransferError::protocol("transfer link is missing nonce"))
    }
}
