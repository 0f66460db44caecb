//! Socket endpoint derivation.
//!
//! The server is configured by its HTTP base URL; the socket lives on the
//! same host under a fixed path. `http` maps to `ws`, `https` to `wss`, and a
//! URL that is already `ws`/`wss` keeps its scheme, so the mapping can be
//! applied twice without changing the result.

use anyhow::{Context, bail};
use url::Url;

/// Returns the WebSocket URL for `base_url` with its path replaced by `socket_path`.
pub fn socket_endpoint(base_url: &str, socket_path: &str) -> anyhow::Result<String> {
    let mut url = Url::parse(base_url).with_context(|| format!("invalid base URL {base_url:?}"))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => bail!("unsupported scheme {other:?} in {base_url:?}"),
    };
    if url.set_scheme(scheme).is_err() {
        bail!("cannot switch {base_url:?} to {scheme}");
    }
    if url.host().is_none() {
        bail!("base URL {base_url:?} has no host");
    }

    url.set_path(socket_path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.into())
}
