//! Encoding detection and transcoding.
//!
//! Everything downstream of this module works on UTF-8 text. Raw input is
//! decoded here, bridging to `encoding_rs`.
//!
//! # Detection order
//!
//! 1. A caller-forced label, when given, wins outright.
//! 2. A Byte Order Mark at the start of the input.
//! 3. For XML, the `encoding=` pseudo-attribute of the XML declaration; for
//!    HTML, a `<meta charset>` (or `http-equiv` content type) in the first
//!    kilobyte.
//! 4. UTF-8.
//!
//! XML decoding is strict: malformed byte sequences are an error. HTML
//! decoding substitutes U+FFFD and falls back to windows-1252 when input
//! without any declaration is not valid UTF-8.

use encoding_rs::Encoding;

/// How far into an HTML document to look for a `<meta>` charset.
const META_SNIFF_LIMIT: usize = 1024;

/// An error that occurs during encoding detection or transcoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("encoding error: {message}")]
pub struct EncodingError {
    /// A human-readable description of the encoding error.
    pub message: String,
}

impl EncodingError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Decoded text together with the canonical name of the encoding used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// The input as UTF-8, BOM removed.
    pub text: String,
    /// The WHATWG name of the source encoding (e.g., `"UTF-8"`).
    pub encoding: String,
}

/// Detects the encoding of a byte stream by inspecting the Byte Order Mark.
///
/// Returns the encoding and the number of BOM bytes to skip. Input without
/// a BOM yields UTF-8 and 0.
///
/// # Examples
///
/// ```
/// use xmlquill::encoding::detect_encoding;
///
/// let (enc, skip) = detect_encoding(b"\xEF\xBB\xBFhello");
/// assert_eq!(enc.name(), "UTF-8");
/// assert_eq!(skip, 3);
/// ```
#[must_use]
pub fn detect_encoding(bytes: &[u8]) -> (&'static Encoding, usize) {
    Encoding::for_bom(bytes).unwrap_or((encoding_rs::UTF_8, 0))
}

/// Looks up an encoding by label (case-insensitive, WHATWG label set).
///
/// # Errors
///
/// Returns `EncodingError` if the label is not recognized.
pub fn lookup(label: &str) -> Result<&'static Encoding, EncodingError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| EncodingError::new(format!("unsupported encoding: {label}")))
}

/// Transcodes a byte slice from the named encoding into a UTF-8 `String`.
///
/// # Errors
///
/// Returns `EncodingError` if the label is not recognized or if the input
/// contains malformed byte sequences.
///
/// # Examples
///
/// ```
/// use xmlquill::encoding::transcode;
///
/// assert_eq!(transcode(b"caf\xE9", "ISO-8859-1").unwrap(), "caf\u{e9}");
/// ```
pub fn transcode(bytes: &[u8], label: &str) -> Result<String, EncodingError> {
    decode_strict(lookup(label)?, bytes)
}

fn decode_strict(encoding: &'static Encoding, bytes: &[u8]) -> Result<String, EncodingError> {
    let (text, had_errors) = encoding.decode_with_bom_removal(bytes);
    if had_errors {
        return Err(EncodingError::new(format!(
            "malformed byte sequence for encoding {}",
            encoding.name()
        )));
    }
    Ok(text.into_owned())
}

fn decode_lossy(encoding: &'static Encoding, bytes: &[u8]) -> String {
    encoding.decode_with_bom_removal(bytes).0.into_owned()
}

/// Decodes raw XML bytes into UTF-8.
///
/// `forced` overrides detection with an explicit label.
///
/// # Errors
///
/// Returns `EncodingError` if the forced or declared label is unknown, or if
/// the bytes are malformed for the chosen encoding.
///
/// # Examples
///
/// ```
/// use xmlquill::encoding::decode_to_utf8;
///
/// let decoded = decode_to_utf8(b"<?xml version=\"1.0\"?><root/>", None).unwrap();
/// assert_eq!(decoded.encoding, "UTF-8");
/// assert!(decoded.text.ends_with("<root/>"));
/// ```
pub fn decode_to_utf8(bytes: &[u8], forced: Option<&str>) -> Result<Decoded, EncodingError> {
    let encoding = match forced {
        Some(label) => lookup(label)?,
        None => sniff_xml(bytes)?,
    };
    Ok(Decoded {
        text: decode_strict(encoding, bytes)?,
        encoding: encoding.name().to_string(),
    })
}

/// Decodes raw HTML bytes into UTF-8. Never fails on malformed sequences.
///
/// # Errors
///
/// Returns `EncodingError` only if `forced` is not a recognized label.
pub fn decode_html(bytes: &[u8], forced: Option<&str>) -> Result<Decoded, EncodingError> {
    let encoding = match forced {
        Some(label) => lookup(label)?,
        None => sniff_html(bytes),
    };
    Ok(Decoded {
        text: decode_lossy(encoding, bytes),
        encoding: encoding.name().to_string(),
    })
}

fn sniff_xml(bytes: &[u8]) -> Result<&'static Encoding, EncodingError> {
    let (bom, skip) = detect_encoding(bytes);
    if skip > 0 {
        return Ok(bom);
    }
    match declared_xml_encoding(bytes) {
        // A declaration read as ASCII cannot be believed to name UTF-16.
        Some(label) => {
            let enc = lookup(&label)?;
            Ok(if enc == encoding_rs::UTF_16LE || enc == encoding_rs::UTF_16BE {
                encoding_rs::UTF_8
            } else {
                enc
            })
        }
        None => Ok(encoding_rs::UTF_8),
    }
}

fn sniff_html(bytes: &[u8]) -> &'static Encoding {
    let (bom, skip) = detect_encoding(bytes);
    if skip > 0 {
        return bom;
    }
    if let Some(enc) = meta_charset(bytes).and_then(|label| Encoding::for_label(label.as_bytes())) {
        // A meta tag can only be read if the document is ASCII-compatible.
        return enc.output_encoding();
    }
    if std::str::from_utf8(bytes).is_ok() {
        encoding_rs::UTF_8
    } else {
        encoding_rs::WINDOWS_1252
    }
}

/// Extracts the `encoding` pseudo-attribute from an XML declaration,
/// scanning the raw bytes as ASCII.
fn declared_xml_encoding(bytes: &[u8]) -> Option<String> {
    let scan = &bytes[..bytes.len().min(200)];
    if !scan.starts_with(b"<?xml") {
        return None;
    }
    let end = find(scan, b"?>")?;
    let decl = &scan[..end];
    let at = find(decl, b"encoding")?;
    let rest = skip_ascii_whitespace(&decl[at + b"encoding".len()..]);
    let rest = skip_ascii_whitespace(rest.strip_prefix(b"=")?);
    quoted(rest)
}

/// Finds a charset in `<meta charset=...>` or
/// `<meta http-equiv=... content="text/html; charset=...">`.
fn meta_charset(bytes: &[u8]) -> Option<String> {
    let head = bytes[..bytes.len().min(META_SNIFF_LIMIT)].to_ascii_lowercase();
    let mut from = 0;
    while let Some(rel) = find(&head[from..], b"<meta") {
        let start = from + rel;
        let end = head[start..].iter().position(|&b| b == b'>').map_or(head.len(), |p| start + p);
        let tag = &head[start..end];
        if let Some(at) = find(tag, b"charset") {
            let rest = skip_ascii_whitespace(&tag[at + b"charset".len()..]);
            if let Some(rest) = rest.strip_prefix(b"=") {
                let rest = skip_ascii_whitespace(rest);
                let value = quoted(rest).unwrap_or_else(|| {
                    let n = rest
                        .iter()
                        .position(|&b| b.is_ascii_whitespace() || matches!(b, b'"' | b'\'' | b';' | b'/'))
                        .unwrap_or(rest.len());
                    String::from_utf8_lossy(&rest[..n]).into_owned()
                });
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        from = end;
    }
    None
}

fn quoted(bytes: &[u8]) -> Option<String> {
    let quote = *bytes.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let body = &bytes[1..];
    let end = body.iter().position(|&b| b == quote)?;
    let value = &body[..end];
    value
        .is_ascii()
        .then(|| String::from_utf8_lossy(value).trim().to_string())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn skip_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let skip = bytes.iter().take_while(|b| b.is_ascii_whitespace()).count();
    &bytes[skip..]
}
