//! Builds the `rtc` endpoint URL the signal socket connects to.
//!
//! The access token is not part of the URL; it travels as a bearer header.

use url::Url;

use crate::error::{SignalError, SignalResult};

const SDK: &str = "rust";
const PROTOCOL: &str = "1";

/// Check that `server_url` is a `ws://` or `wss://` URL.
pub fn validate_server_url(server_url: &str) -> SignalResult<Url> {
    let url = Url::parse(server_url).map_err(|e| SignalError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(SignalError::InvalidUrl(format!("unsupported scheme `{other}`"))),
    }
}

/// `wss://host/prefix` becomes
/// `wss://host/prefix/rtc?sdk=rust&version=..&auto_subscribe=false&protocol=1`.
pub fn build_rtc_url(server_url: &str) -> SignalResult<Url> {
    let mut url = validate_server_url(server_url)?;

    let path = url.path().to_owned();
    let separator = if path.ends_with('/') { "" } else { "/" };
    url.set_path(&format!("{path}{separator}rtc"));

    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("sdk", SDK)
        .append_pair("version", env!("CARGO_PKG_VERSION"))
        .append_pair("os", std::env::consts::OS)
        .append_pair("device_model", std::env::consts::ARCH)
        .append_pair("auto_subscribe", "false")
        .append_pair("protocol", PROTOCOL);
    Ok(url)
}
