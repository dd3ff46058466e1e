//! Output collector
//!
//! Bounded text buffer plus the image artifacts produced during one
//! execution, in call order.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const TRUNCATION_MARKER: &str = "\n...output truncated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    Png,
}

impl ImageEncoding {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageEncoding::Png => "image/png",
        }
    }
}

/// A rendered figure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub encoding: ImageEncoding,
    pub payload: Vec<u8>,
}

impl ImageArtifact {
    pub fn png(payload: Vec<u8>) -> Self {
        Self {
            encoding: ImageEncoding::Png,
            payload,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        self.encoding.mime_type()
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.payload)
    }
}

#[derive(Debug, Clone)]
pub struct OutputCollector {
    text: String,
    chars: usize,
    limit: usize,
    truncated: bool,
    images: Vec<ImageArtifact>,
}

impl OutputCollector {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            limit,
            truncated: false,
            images: Vec::new(),
        }
    }

    /// Append text. Once the limit is hit the buffer is cut, the marker is
    /// appended and everything after is discarded.
    pub fn write(&mut self, s: &str) {
        if self.truncated || s.is_empty() {
            return;
        }
        let incoming = s.chars().count();
        if self.chars + incoming <= self.limit {
            self.text.push_str(s);
            self.chars += incoming;
            return;
        }
        let room = self.limit - self.chars;
        self.text.extend(s.chars().take(room));
        self.chars = self.limit;
        self.text.push_str(TRUNCATION_MARKER);
        self.truncated = true;
    }

    pub fn push_image(&mut self, image: ImageArtifact) {
        self.images.push(image);
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn images(&self) -> &[ImageArtifact] {
        &self.images
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn into_parts(self) -> (String, Vec<ImageArtifact>, bool) {
        (self.text, self.images, self.truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_below_limit_are_kept() {
        let mut out = OutputCollector::new(10);
        out.write("abc");
        out.write("def\n");
        assert_eq!(out.text(), "abcdef\n");
        assert!(!out.is_truncated());
    }

    #[test]
    fn test_truncation_marker_appended_once() {
        let mut out = OutputCollector::new(5);
        out.write("abcdefgh");
        out.write("more");
        assert_eq!(out.text(), format!("abcde{}", TRUNCATION_MARKER));
        assert!(out.is_truncated());
    }

    #[test]
    fn test_limit_counts_characters_not_bytes() {
        let mut out = OutputCollector::new(3);
        out.write("äöü");
        assert!(!out.is_truncated());
        out.write("x");
        assert_eq!(out.text(), format!("äöü{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_exact_fill_is_not_truncation() {
        let mut out = OutputCollector::new(4);
        out.write("abcd");
        assert!(!out.is_truncated());
    }

    #[test]
    fn test_image_base64() {
        let image = ImageArtifact::png(vec![0x89, b'P', b'N', b'G']);
        assert_eq!(image.to_base64(), "iVBORw==");
        assert_eq!(image.mime_type(), "image/png");
    }
}
