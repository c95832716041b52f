//! Parsing of URL-shaped network service descriptors.
//!
//! The accepted grammar is
//!
//! ```text
//! [mechanism://]serviceName[@domain][/pathSegment]*[?key1=val1&key2=val2...]
//! ```
//!
//! When the scheme is absent, the host is empty too, and the first path segment is taken as the service name. This
//! gives the `service/interface` shorthand.

use super::error::ParseError;
use super::ServiceDescriptor;
use crate::mechanism::MechanismType;
use std::collections::BTreeMap;
use url::Url;

/// Scheme-less descriptors are resolved against this base, so that the whole text lands in the URL path.
const SCHEMELESS_BASE: &str = "nsc:///";

pub fn parse(text: &str) -> Result<ServiceDescriptor, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::malformed(text, "descriptor is empty"));
    }
    let (mechanism, url) = match scheme_prefix(text) {
        Some(scheme) => {
            let mechanism =
                MechanismType::from_tag(scheme).ok_or_else(|| ParseError::UnknownMechanism(scheme.to_string()))?;
            let url = Url::parse(text).map_err(|e| ParseError::malformed(text, e))?;
            (Some(mechanism), url)
        }
        None => {
            let url = Url::parse(&format!("{SCHEMELESS_BASE}{text}")).map_err(|e| ParseError::malformed(text, e))?;
            (None, url)
        }
    };

    let host = url.host_str().unwrap_or_default();
    let mut network_service = match url.username() {
        "" => host.to_string(),
        user if host.is_empty() => user.to_string(),
        user => format!("{user}@{host}"),
    };
    let mut path_segments: Vec<String> =
        url.path().split('/').filter(|segment| !segment.is_empty()).map(String::from).collect();
    if network_service.is_empty() && !path_segments.is_empty() {
        network_service = path_segments.remove(0);
    }

    let mut labels = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        labels.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }

    Ok(ServiceDescriptor { network_service, mechanism, path_segments, labels })
}

/// The scheme of `text`, if it starts with one. A `://` that only appears after the service name, for example inside
/// a label value, is not a scheme.
fn scheme_prefix(text: &str) -> Option<&str> {
    let (scheme, _) = text.split_once("://")?;
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}
