//! Transport decompression and text-encoding resolution

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use regex::bytes::Regex as BytesRegex;
use regex::Regex;
use std::io::Read;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Bytes of the document scanned for a `charset=` hint
const META_SCAN_BYTES: usize = 4096;

/// Encodings tried in order when nothing better is known
const TRIAL_ENCODINGS: &[&str] = &["utf-8", "gbk", "gb18030", "big5", "shift_jis", "euc-kr"];

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([A-Za-z0-9_\-:.]+)"#)
        .expect("charset regex is valid")
});

static CONTENT_TYPE_CHARSET: LazyLock<BytesRegex> = LazyLock::new(|| {
    BytesRegex::new(r#"(?i)charset\s*=\s*["']?([A-Za-z0-9_\-:.]+)"#).expect("charset regex is valid")
});

/// Which step of the resolution order produced the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    ByteOrderMark,
    Declared,
    Detected,
    MetaHint,
    Trial,
    LossyFallback,
}

/// Text decoded from raw response bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static str,
    pub source: EncodingSource,
}

/// Undo a declared `Content-Encoding`.
///
/// Servers mislabel bodies often enough that a failed decompression keeps the
/// original bytes rather than failing the fetch.
pub fn decompress(bytes: Vec<u8>, content_encoding: Option<&str>) -> Vec<u8> {
    let Some(encoding) = content_encoding.map(|e| e.trim().to_ascii_lowercase()) else {
        return bytes;
    };

    let decoded = match encoding.as_str() {
        "" | "identity" => return bytes,
        "gzip" | "x-gzip" => read_all(GzDecoder::new(bytes.as_slice())),
        "deflate" => read_all(ZlibDecoder::new(bytes.as_slice()))
            .or_else(|| read_all(DeflateDecoder::new(bytes.as_slice()))),
        other => {
            debug!("Unsupported content-encoding {}, keeping raw bytes", other);
            return bytes;
        }
    };

    match decoded {
        Some(out) => out,
        None => {
            warn!(
                "Body labelled {} did not decompress, keeping raw bytes",
                encoding
            );
            bytes
        }
    }
}

fn read_all<R: Read>(mut reader: R) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).ok().map(|_| out)
}

/// Pull the charset parameter out of a Content-Type header value
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    CONTENT_TYPE_CHARSET
        .captures(content_type.as_bytes())
        .and_then(|caps| caps.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).to_ascii_lowercase())
}

/// Decode bytes to text.
///
/// Order: BOM, declared charset (unless unreliable), statistical detector,
/// `charset=` hint in the document head, trial decodes, lossy UTF-8.
pub fn decode_text(bytes: &[u8], declared: Option<&str>, unreliable: &[String]) -> DecodedText {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        let (text, _, _) = encoding.decode(bytes);
        return DecodedText {
            text: text.into_owned(),
            encoding: encoding.name(),
            source: EncodingSource::ByteOrderMark,
        };
    }

    if let Some(label) = declared {
        let reliable = !unreliable.iter().any(|u| u.eq_ignore_ascii_case(label));
        if reliable {
            if let Some(text) = strict_decode(bytes, label) {
                return text.with_source(EncodingSource::Declared);
            }
            debug!("Declared charset {} did not decode cleanly", label);
        }
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let (guess, confident) = detector.guess_assess(None, true);
    if confident {
        if let Some(text) = strict_decode(bytes, guess.name()) {
            return text.with_source(EncodingSource::Detected);
        }
    }

    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(META_SCAN_BYTES)]);
    if let Some(label) = META_CHARSET
        .captures(&head)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
    {
        if let Some(text) = strict_decode(bytes, &label) {
            return text.with_source(EncodingSource::MetaHint);
        }
    }

    for label in TRIAL_ENCODINGS {
        if let Some(text) = strict_decode(bytes, label) {
            return text.with_source(EncodingSource::Trial);
        }
    }

    DecodedText {
        text: String::from_utf8_lossy(bytes).into_owned(),
        encoding: UTF_8.name(),
        source: EncodingSource::LossyFallback,
    }
}

fn strict_decode(bytes: &[u8], label: &str) -> Option<DecodedText> {
    let encoding = Encoding::for_label(label.trim().as_bytes())?;
    let text = encoding.decode_without_bom_handling_and_without_replacement(bytes)?;
    Some(DecodedText {
        text: text.into_owned(),
        encoding: encoding.name(),
        source: EncodingSource::Trial,
    })
}

impl DecodedText {
    fn with_source(mut self, source: EncodingSource) -> Self {
        self.source = source;
        self
    }
}
