//! User-data content types
//!
//! Maps MIME media types of multipart sections onto the handling they get.

use std::fmt;

/// How a MIME part is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// `text/cloud-config`
    CloudConfig,
    /// `text/x-shellscript`
    Script,
    /// `text/plain`: sniffed again like top-level user-data
    Plain,
    /// `text/x-include-url` and `text/x-include-once-url`
    IncludeUrl,
    /// Nested `multipart/*`
    Multipart,
    /// Anything else
    Unknown,
}

impl ContentType {
    /// Parse content type from MIME type string
    pub fn from_mime(mime: &str) -> Self {
        match media_type(mime).as_str() {
            "text/cloud-config" => Self::CloudConfig,
            "text/x-shellscript" => Self::Script,
            "text/plain" => Self::Plain,
            "text/x-include-url" | "text/x-include-once-url" => Self::IncludeUrl,
            s if s.starts_with("multipart/") => Self::Multipart,
            _ => Self::Unknown,
        }
    }
}

/// Lower-cased media type without parameters
pub fn media_type(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_lowercase()
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CloudConfig => "cloud-config",
            Self::Script => "script",
            Self::Plain => "plain",
            Self::IncludeUrl => "include-url",
            Self::Multipart => "multipart",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}
