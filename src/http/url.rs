//! The subset of URLs this client understands: `http://host[:port][/path]`

use anyhow::{anyhow, bail};
use hyper::Uri;

pub const DEFAULT_PORT: u16 = 80;

pub fn parse_url(s: &str) -> anyhow::Result<Uri> {
    let uri: Uri = s.parse()?;
    if uri.scheme_str() != Some("http") {
        bail!("unsupported URL {:?}: only http:// is supported", s);
    }

    let authority = uri.authority()
        .ok_or_else(|| anyhow!("URL {:?} has no host", s))?;
    if authority.host().is_empty() {
        bail!("URL {:?} has no host", s);
    }
    // anything after the host must be a valid port
    if authority.as_str() != authority.host() && authority.port_u16().is_none() {
        bail!("invalid port in URL {:?}", s);
    }

    Ok(uri)
}

pub fn host_port(uri: &Uri) -> anyhow::Result<(&str, u16)> {
    let host = uri.host()
        .ok_or_else(|| anyhow!("URL {} has no host", uri))?;
    Ok((host, uri.port_u16().unwrap_or(DEFAULT_PORT)))
}

/// value for the `Host` header
pub fn authority(uri: &Uri) -> anyhow::Result<String> {
    let (host, port) = host_port(uri)?;
    Ok(format!("{}:{}", host, port))
}

/// path and query as they go into the request line
pub fn request_target(uri: &Uri) -> &str {
    uri.path_and_query()
        .map_or("/", |p| p.as_str())
}

/// Resolves a redirect target: either an absolute URL, or a path on the same host.
pub fn join(base: &Uri, location: &str) -> anyhow::Result<Uri> {
    if location.starts_with('/') {
        let mut parts = base.clone().into_parts();
        parts.path_and_query = Some(location.parse()?);
        Ok(Uri::from_parts(parts)?)
    }
    else {
        parse_url(location)
    }
}
