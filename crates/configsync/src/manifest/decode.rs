use std::path::Path;

use serde_json::Value;

use super::ManifestDocument;
use crate::error::DecodeError;

/// Returns true for a document separator line: `---`, optionally followed by
/// whitespace and a `#` comment.
pub fn is_separator(line: &str) -> bool {
    let line = line.trim_end();
    match line.strip_prefix("---") {
        Some("") => true,
        Some(rest) => rest.starts_with([' ', '\t']) && rest.trim_start().starts_with('#'),
        None => false,
    }
}

/// Raw text between separator lines, in order. Segments may be blank.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    rest: Option<&'a str>,
}

impl<'a> Segments<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { rest: Some(text) }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let text = self.rest?;
        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            if is_separator(line) {
                self.rest = Some(&text[offset + line.len()..]);
                return Some(&text[..offset]);
            }
            offset += line.len();
        }
        self.rest = None;
        Some(text)
    }
}

/// Lazily decoded documents of one file. Yields at most one error, after
/// which the iterator is exhausted.
pub struct Documents<'a> {
    path: &'a Path,
    segments: Segments<'a>,
    pending: Option<DecodeError>,
    index: usize,
    done: bool,
}

/// Decodes `bytes` read from `path` into manifest documents.
///
/// Blank and comment-only segments are skipped, as are documents that are
/// an explicit YAML null.
pub fn decode<'a>(path: &'a Path, bytes: &'a [u8]) -> Documents<'a> {
    let (text, pending) = match std::str::from_utf8(bytes) {
        Ok(text) => (text.strip_prefix('\u{feff}').unwrap_or(text), None),
        Err(_) => (
            "",
            Some(DecodeError::NotUtf8 {
                path: path.to_path_buf(),
            }),
        ),
    };

    Documents {
        path,
        segments: Segments::new(text),
        pending,
        index: 0,
        done: false,
    }
}

impl Documents<'_> {
    fn decode_segment(&self, segment: &str) -> Result<Option<ManifestDocument>, DecodeError> {
        let value: Value = serde_yaml::from_str(segment).map_err(|e| DecodeError::Yaml {
            path: self.path.to_path_buf(),
            index: self.index,
            message: e.to_string(),
        })?;

        let object = match value {
            Value::Null => return Ok(None),
            Value::Object(object) => object,
            _ => {
                return Err(DecodeError::NotAMapping {
                    path: self.path.to_path_buf(),
                    index: self.index,
                })
            }
        };

        let required = |field: &'static str| {
            object
                .get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| DecodeError::MissingField {
                    path: self.path.to_path_buf(),
                    index: self.index,
                    field,
                })
        };
        let api_version = required("apiVersion")?;
        let kind = required("kind")?;

        Ok(Some(ManifestDocument {
            api_version,
            kind,
            file: self.path.to_path_buf(),
            index: self.index,
            object,
        }))
    }
}

impl Iterator for Documents<'_> {
    type Item = Result<ManifestDocument, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(err) = self.pending.take() {
            self.done = true;
            return Some(Err(err));
        }

        while let Some(segment) = self.segments.next() {
            if is_blank(segment) {
                continue;
            }
            self.index += 1;

            match self.decode_segment(segment) {
                Ok(Some(document)) => return Some(Ok(document)),
                Ok(None) => continue,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }

        self.done = true;
        None
    }
}

fn is_blank(segment: &str) -> bool {
    segment.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#')
    })
}
