//! Destination URL decoration.
//!
//! Two transformations applied to every outgoing redirect: the language
//! path prefix and the campaign tracking parameters. Both operate through
//! the `url` crate so encoding follows standard URL rules.
//!
//! Language rules. Publisher domains default to Portuguese; the inverted
//! set defaults to English. `pt` on a normal domain and `pt` on an
//! inverted domain both mean "native" and leave the path alone. A missing
//! parameter means native for normal domains and `/en` for inverted ones.

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

/// Tracking parameters accepted on the dispatch query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackingParams {
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
    pub fbclid: Option<String>,
    pub gclid: Option<String>,
}

pub const DEFAULT_UTM_SOURCE: &str = "redron";
pub const DEFAULT_UTM_MEDIUM: &str = "broadcast";
pub const DEFAULT_UTM_CAMPAIGN: &str = "direct";

/// Prefix the URL path with the effective language, when one applies.
pub fn apply_language_prefix(url: &mut Url, language: Option<&str>, inverted: bool) {
    let language = language.map(str::trim).filter(|l| !l.is_empty());

    let prefix = if inverted {
        match language {
            None | Some("en") => Some("en"),
            Some("pt") => None,
            Some(other) => Some(other),
        }
    } else {
        match language {
            None | Some("pt") => None,
            Some(other) => Some(other),
        }
    };

    if let Some(lang) = prefix {
        let path = url.path().to_string();
        url.set_path(&format!("/{}{}", lang, path));
    }
}

/// Append the UTM bag to the URL query.
///
/// `utm_source` and `utm_medium` fall back to the broadcast defaults,
/// `utm_campaign` falls back to the link id; the passthrough set is only
/// added when present and non-empty in the request.
pub fn append_tracking_params(url: &mut Url, params: &TrackingParams, link_id: &str) {
    let source = non_empty(&params.utm_source).unwrap_or(DEFAULT_UTM_SOURCE);
    let medium = non_empty(&params.utm_medium).unwrap_or(DEFAULT_UTM_MEDIUM);
    let campaign = non_empty(&params.utm_campaign)
        .or(if link_id.is_empty() { None } else { Some(link_id) })
        .unwrap_or(DEFAULT_UTM_CAMPAIGN);

    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("utm_source", source);
        pairs.append_pair("utm_medium", medium);
        pairs.append_pair("utm_campaign", campaign);

        for (name, value) in [
            ("utm_term", &params.utm_term),
            ("utm_content", &params.utm_content),
            ("fbclid", &params.fbclid),
            ("gclid", &params.gclid),
        ] {
            if let Some(value) = non_empty(value) {
                pairs.append_pair(name, value);
            }
        }
    }
}

/// Full decoration pass: parse, prefix, decorate, serialize.
pub fn decorate_url(
    raw_url: &str,
    language: Option<&str>,
    inverted: bool,
    params: &TrackingParams,
    link_id: &str,
) -> Result<String> {
    let mut url = Url::parse(raw_url).with_context(|| format!("Invalid target URL {}", raw_url))?;
    apply_language_prefix(&mut url, language, inverted);
    append_tracking_params(&mut url, params, link_id);
    Ok(url.to_string())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
