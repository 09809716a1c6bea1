//! Static file-extension to media type lookup.

use std::collections::HashMap;

use mime::Mime;
use tracing::warn;

const KNOWN_TYPES: &[(&str, &str)] = &[
    ("html", "text/html; charset=utf-8"),
    ("htm", "text/html; charset=utf-8"),
    ("css", "text/css; charset=utf-8"),
    ("js", "text/javascript; charset=utf-8"),
    ("mjs", "text/javascript; charset=utf-8"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("txt", "text/plain; charset=utf-8"),
    ("csv", "text/csv; charset=utf-8"),
    ("md", "text/markdown; charset=utf-8"),
    ("xml", "text/xml; charset=utf-8"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("ico", "image/x-icon"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg"),
    ("wav", "audio/wav"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
    ("wasm", "application/wasm"),
    ("bin", "application/octet-stream"),
];

/// Read-only media type table, built once per process by the bootstrap.
#[derive(Debug)]
pub struct MimeTypes {
    by_extension: HashMap<&'static str, Mime>,
}

impl MimeTypes {
    pub(crate) fn new() -> Self {
        let by_extension = KNOWN_TYPES
            .iter()
            .filter_map(|(extension, media_type)| match media_type.parse::<Mime>() {
                Ok(mime) => Some((*extension, mime)),
                Err(e) => {
                    warn!(cause = %e, extension, "skipping unparsable media type");
                    None
                }
            })
            .collect();
        Self { by_extension }
    }

    /// Looks up a media type by extension, case-insensitively and without the leading dot.
    pub fn lookup(&self, extension: &str) -> Option<&Mime> {
        let extension = extension.strip_prefix('.').unwrap_or(extension);
        self.by_extension.get(extension).or_else(|| self.by_extension.get(extension.to_ascii_lowercase().as_str()))
    }

    /// Looks up the media type for the extension of the last segment of `path`.
    pub fn for_path(&self, path: &str) -> Option<&Mime> {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let (_, extension) = file_name.rsplit_once('.')?;
        self.lookup(extension)
    }

    pub fn len(&self) -> usize {
        self.by_extension.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }
}
