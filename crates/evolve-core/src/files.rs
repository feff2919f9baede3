//! Wire-safe representation of a small set of files uploaded to, or
//! downloaded from, a sandbox.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single file's content, tagged so binary payloads survive JSON transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "encoding", rename_all = "lowercase")]
pub enum FileContent {
    /// UTF-8 text, stored verbatim.
    Text {
        /// The file's contents.
        content: String,
    },
    /// Arbitrary bytes, base64-encoded for wire transport.
    Base64 {
        /// Base64-encoded file contents.
        content: String,
    },
}

impl FileContent {
    /// Wrap a UTF-8 string as a text file.
    pub fn text(content: impl Into<String>) -> Self {
        FileContent::Text { content: content.into() }
    }

    /// Return the content as text, regardless of tag, lossily decoding a
    /// base64 payload if needed.
    pub fn as_text_lossy(&self) -> String {
        match self {
            FileContent::Text { content } => content.clone(),
            FileContent::Base64 { content } => {
                use base64_lite::decode;
                decode(content)
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_default()
            }
        }
    }
}

/// A map of sandbox-relative path to file content.
///
/// Paths are unique; insertion order is not meaningful.
pub type FileMap = BTreeMap<String, FileContent>;

/// Minimal base64 codec so `evolve-core` stays dependency-light; every other
/// crate that needs a fuller codec depends on it directly.
mod base64_lite {
    const TABLE: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    /// Encode bytes as standard base64 with `=` padding.
    pub fn encode(input: &[u8]) -> String {
        let mut out = String::with_capacity((input.len() + 2) / 3 * 4);
        for chunk in input.chunks(3) {
            let b = [
                chunk[0],
                *chunk.get(1).unwrap_or(&0),
                *chunk.get(2).unwrap_or(&0),
            ];
            let n = (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
            out.push(TABLE[(n >> 18 & 0x3f) as usize] as char);
            out.push(TABLE[(n >> 12 & 0x3f) as usize] as char);
            out.push(if chunk.len() > 1 { TABLE[(n >> 6 & 0x3f) as usize] as char } else { '=' });
            out.push(if chunk.len() > 2 { TABLE[(n & 0x3f) as usize] as char } else { '=' });
        }
        out
    }

    /// Decode standard base64, returning `None` on malformed input.
    pub fn decode(input: &str) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len() / 4 * 3);
        let clean: Vec<u8> = input.bytes().filter(|b| *b != b'=' && !b.is_ascii_whitespace()).collect();
        for chunk in clean.chunks(4) {
            let mut vals = [0u32; 4];
            for (i, &c) in chunk.iter().enumerate() {
                vals[i] = TABLE.iter().position(|t| *t == c)? as u32;
            }
            let n = vals[0] << 18 | vals[1] << 12 | vals[2] << 6 | vals[3];
            out.push((n >> 16 & 0xff) as u8);
            if chunk.len() > 2 {
                out.push((n >> 8 & 0xff) as u8);
            }
            if chunk.len() > 3 {
                out.push((n & 0xff) as u8);
            }
        }
        Some(out)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn round_trips_arbitrary_bytes() {
            let input = b"the quick brown fox jumps over the lazy dog";
            assert_eq!(decode(&encode(input)).unwrap(), input);
        }
    }
}

pub use base64_lite::{decode as decode_base64, encode as encode_base64};
