//! Response compression.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, ETAG};

use crate::error::{Error, Result};
use crate::http::Response;
use crate::request::Request;
use crate::view::{Next, ViewArgs, ViewDecorator, ViewOutcome};

use super::vary::patch_vary_headers;

/// Bodies shorter than this are sent as is.
pub const MIN_GZIP_LENGTH: usize = 200;

fn compress(body: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).map_err(Error::other)?;
    encoder.finish().map_err(Error::other)
}

fn accepts_gzip(request: &Request) -> bool {
    request
        .header(ACCEPT_ENCODING.as_str())
        .map(|value| {
            value
                .split(',')
                .filter_map(|coding| coding.split(';').next())
                .any(|coding| coding.trim().eq_ignore_ascii_case("gzip"))
        })
        .unwrap_or(false)
}

/// Compresses a rendered response in place when the client accepts gzip
/// and the compressed body is smaller.
///
/// # Errors
///
/// Returns an error if the encoder fails.
pub fn gzip_response(request: &Request, response: &mut Response) -> Result<()> {
    if !response.is_rendered()
        || response.body().len() < MIN_GZIP_LENGTH
        || response.has_header(CONTENT_ENCODING.as_str())
    {
        return Ok(());
    }
    patch_vary_headers(response, &["Accept-Encoding"]);
    if !accepts_gzip(request) {
        return Ok(());
    }

    let compressed = compress(response.body())?;
    if compressed.len() >= response.body().len() {
        return Ok(());
    }
    request.log().debug(format_args!(
        "gzip {} -> {} bytes",
        response.body().len(),
        compressed.len()
    ));
    let length = compressed.len();
    response.set_body(compressed);
    if let Some(etag) = response.header(ETAG.as_str()) {
        let etag = match etag.strip_suffix('"') {
            Some(open) => format!("{};gzip\"", open),
            None => etag.to_string(),
        };
        response.set_header(ETAG, etag);
    }
    response.set_header(CONTENT_ENCODING, "gzip");
    response.set_header(CONTENT_LENGTH, length.to_string());
    Ok(())
}

/// Gzips the view's responses.
#[derive(Debug, Clone)]
pub struct GZipPage {
    enabled: bool,
}

impl GZipPage {
    /// The enabled decorator.
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// Turns compression on or off.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for GZipPage {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewDecorator for GZipPage {
    fn call(&self, request: &mut Request, args: &ViewArgs, next: Next<'_>) -> ViewOutcome {
        let mut response = next(request, args)?;
        if self.enabled {
            if let Some(response) = response.as_mut() {
                gzip_response(request, response)?;
            }
        }
        Ok(response)
    }
}
