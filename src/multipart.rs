//! `multipart/form-data` encoding and decoding.
//!
//! `ureq` 2.x has no form-data builder, so outgoing `/predict` and `/explain`
//! bodies are assembled here. The web workspace uses the decoder for the
//! intake form upload it receives from the browser.

use std::borrow::Cow;
use std::sync::{Arc, LazyLock};

use rand::Rng;
use regex::Regex;
use thiserror::Error;

use crate::model::ImageFile;

/// Matches `key="value"` parameters inside a `Content-Disposition` header.
static DISPOSITION_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(name|filename)="([^"]*)""#).expect("disposition regex must compile")
});

const CRLF: &[u8] = b"\r\n";

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum PartBody {
    Text(String),
    File {
        file_name: String,
        content_type: String,
        bytes: Arc<[u8]>,
    },
}

#[derive(Debug, Clone)]
struct Part {
    name: String,
    body: PartBody,
}

/// An outgoing form-data body.
#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    /// Start an empty form with a random boundary.
    pub fn new() -> Self {
        let token: u64 = rand::rng().random();
        Self::with_boundary(format!("----pneumoFormBoundary{token:016x}"))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.to_string(),
            body: PartBody::Text(value.into()),
        });
        self
    }

    pub fn file(mut self, name: &str, file: &ImageFile) -> Self {
        self.parts.push(Part {
            name: name.to_string(),
            body: PartBody::File {
                file_name: file.file_name.clone(),
                content_type: file.content_type.clone(),
                bytes: Arc::clone(&file.bytes),
            },
        });
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for part in &self.parts {
            out.extend_from_slice(b"--");
            out.extend_from_slice(self.boundary.as_bytes());
            out.extend_from_slice(CRLF);
            match &part.body {
                PartBody::Text(value) => {
                    out.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            escape_quoted(&part.name)
                        )
                        .as_bytes(),
                    );
                    out.extend_from_slice(value.as_bytes());
                }
                PartBody::File {
                    file_name,
                    content_type,
                    bytes,
                } => {
                    out.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                            escape_quoted(&part.name),
                            escape_quoted(file_name),
                            content_type
                        )
                        .as_bytes(),
                    );
                    out.extend_from_slice(bytes);
                }
            }
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(b"--");
        out.extend_from_slice(self.boundary.as_bytes());
        out.extend_from_slice(b"--\r\n");
        out
    }
}

fn escape_quoted(value: &str) -> Cow<'_, str> {
    if value.contains(['"', '\r', '\n']) {
        Cow::Owned(
            value
                .replace('"', "%22")
                .replace('\r', "%0D")
                .replace('\n', "%0A"),
        )
    } else {
        Cow::Borrowed(value)
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("content type is not multipart/form-data with a boundary")]
    MissingBoundary,

    #[error("malformed multipart body: {0}")]
    Malformed(&'static str),
}

/// One decoded form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Field {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Convert a file field into an [`ImageFile`]. Returns `None` for text
    /// fields and for file inputs the browser submitted without a selection.
    pub fn into_image(self) -> Option<ImageFile> {
        let file_name = self.file_name.filter(|name| !name.is_empty())?;
        let content_type = self
            .content_type
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Some(ImageFile::new(file_name, content_type, self.data))
    }
}

/// Extract the boundary parameter from a `Content-Type` header value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let essence = params.next()?.trim();
    if !essence.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params.find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

/// Decode a form-data body.
pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<Field>, MultipartError> {
    let delimiter = [b"--".as_slice(), boundary.as_bytes()].concat();
    let next_delimiter = [b"\r\n--".as_slice(), boundary.as_bytes()].concat();

    let mut pos = find(body, &delimiter, 0).ok_or(MultipartError::Malformed("no opening boundary"))?;
    let mut fields = Vec::new();

    loop {
        pos += delimiter.len();
        if body[pos..].starts_with(b"--") {
            return Ok(fields);
        }
        if !body[pos..].starts_with(CRLF) {
            return Err(MultipartError::Malformed("boundary not followed by CRLF"));
        }
        pos += CRLF.len();

        let header_end =
            find(body, b"\r\n\r\n", pos).ok_or(MultipartError::Malformed("unterminated part headers"))?;
        let headers = String::from_utf8_lossy(&body[pos..header_end]);
        let data_start = header_end + 4;
        let data_end = find(body, &next_delimiter, data_start)
            .ok_or(MultipartError::Malformed("missing closing boundary"))?;

        fields.push(parse_part(&headers, &body[data_start..data_end])?);
        pos = data_end + CRLF.len();
    }
}

fn parse_part(headers: &str, data: &[u8]) -> Result<Field, MultipartError> {
    let mut name = None;
    let mut file_name = None;
    let mut content_type = None;

    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            for caps in DISPOSITION_PARAM_RE.captures_iter(value) {
                let param = caps[1].to_ascii_lowercase();
                let val = caps[2].to_string();
                if param == "name" {
                    name = Some(val);
                } else {
                    file_name = Some(val);
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }

    Ok(Field {
        name: name.ok_or(MultipartError::Malformed("part without a name"))?,
        file_name,
        content_type,
        data: data.to_vec(),
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|idx| idx + from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_writes_text_and_file_parts() {
        let file = ImageFile::new("xray.png", "image/png", vec![0x89, b'P', b'N', b'G']);
        let form = MultipartForm::with_boundary("XYZ")
            .text("patientId", "PID-111")
            .file("file", &file);
        let body = form.encode();
        let text = String::from_utf8_lossy(&body);

        assert_eq!(form.content_type(), "multipart/form-data; boundary=XYZ");
        assert!(text.starts_with("--XYZ\r\nContent-Disposition: form-data; name=\"patientId\"\r\n\r\nPID-111\r\n"));
        assert!(text.contains("name=\"file\"; filename=\"xray.png\"\r\nContent-Type: image/png\r\n\r\n"));
        assert!(text.ends_with("\r\n--XYZ--\r\n"));
    }

    #[test]
    fn parse_reads_back_encoded_form() {
        let file = ImageFile::new("scan.jpg", "image/jpeg", b"\r\n--not-a-boundary\r\n".to_vec());
        let form = MultipartForm::with_boundary("b0undary")
            .text("patientName", "za")
            .file("file", &file);
        let fields = parse(&form.encode(), "b0undary").unwrap();

        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "patientName");
        assert_eq!(fields[0].text(), "za");
        assert_eq!(fields[1].file_name.as_deref(), Some("scan.jpg"));
        assert_eq!(fields[1].content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(fields[1].data, b"\r\n--not-a-boundary\r\n");
    }

    #[test]
    fn empty_file_input_yields_no_image() {
        let field = Field {
            name: "file".to_string(),
            file_name: Some(String::new()),
            content_type: Some("application/octet-stream".to_string()),
            data: Vec::new(),
        };
        assert!(field.into_image().is_none());
    }

    #[test]
    fn boundary_from_content_type_variants() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=abc"),
            Some("abc".to_string())
        );
        assert_eq!(
            boundary_from_content_type("Multipart/Form-Data; charset=utf-8; boundary=\"q\""),
            Some("q".to_string())
        );
        assert_eq!(boundary_from_content_type("application/json"), None);
        assert_eq!(boundary_from_content_type("multipart/form-data"), None);
    }

    #[test]
    fn parse_rejects_truncated_body() {
        let body = b"--abc\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nvalue";
        assert_eq!(
            parse(body, "abc"),
            Err(MultipartError::Malformed("missing closing boundary"))
        );
        assert_eq!(
            parse(b"garbage", "abc"),
            Err(MultipartError::Malformed("no opening boundary"))
        );
    }
}
