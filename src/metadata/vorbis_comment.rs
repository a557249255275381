// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `vorbis_comment` module reads and writes VORBIS_COMMENT metadata
//! blocks, FLAC's tagging format borrowed from Vorbis. Unlike the rest of
//! FLAC, its 32-bit length fields are little-endian.

use std::collections::HashMap;
use std::io;

use crate::error::Result;
use crate::input::ReadBytes;
use crate::output::BitWriter;

use super::read_string;

/// A single `KEY=value` entry. The key is matched case-insensitively per the
/// Vorbis comment spec; `key()` exposes the uppercased form for lookups,
/// `raw()` the entry exactly as stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Comment {
    entry: String,
    eq_offset: Option<usize>,
}

impl Comment {
    pub fn new(entry: String) -> Comment {
        let eq_offset = entry.find('=');
        Comment { entry, eq_offset }
    }

    pub fn key(&self) -> &str {
        match self.eq_offset {
            Some(offset) => &self.entry[..offset],
            None => &self.entry,
        }
    }

    pub fn value(&self) -> &str {
        match self.eq_offset {
            Some(offset) => &self.entry[offset + 1..],
            None => "",
        }
    }

    pub fn raw(&self) -> &str {
        &self.entry
    }
}

/// A parsed VORBIS_COMMENT block.
#[derive(Clone, Debug, Default)]
pub struct VorbisComment {
    pub vendor: String,
    pub comments: Vec<Comment>,
}

impl VorbisComment {
    /// Builds a lookup of the last non-empty value seen for each
    /// case-folded key, mirroring the "don't override with an empty value"
    /// rule real-world taggers rely on.
    pub fn to_map(&self) -> HashMap<String, &str> {
        let mut map = HashMap::new();
        for comment in self.comments.iter() {
            let key = comment.key().to_ascii_uppercase();
            if map.contains_key(&key) && comment.value().is_empty() {
                continue;
            }
            map.insert(key, comment.value());
        }
        map
    }
}

/// Reads a VORBIS_COMMENT block body.
///
/// There is no trailing framing bit here, unlike a standalone Vorbis comment
/// header packet: a FLAC metadata block's length is already explicit.
pub fn read_vorbis_comment_block<R: io::Read>(input: &mut R) -> Result<VorbisComment> {
    let vendor_len = input.read_le_u32()?;
    let vendor = read_string(input, vendor_len as usize)?;

    let n_comments = input.read_le_u32()?;
    let mut comments = Vec::with_capacity(n_comments as usize);
    for _ in 0..n_comments {
        let len = input.read_le_u32()?;
        comments.push(Comment::new(read_string(input, len as usize)?));
    }

    Ok(VorbisComment { vendor, comments })
}

/// Writes a VORBIS_COMMENT block body.
pub fn write_vorbis_comment_block(writer: &mut BitWriter, comment: &VorbisComment) -> Result<()> {
    writer.write_raw_u32_le(comment.vendor.len() as u32)?;
    writer.write_byte_block(comment.vendor.as_bytes())?;

    writer.write_raw_u32_le(comment.comments.len() as u32)?;
    for c in comment.comments.iter() {
        writer.write_raw_u32_le(c.entry.len() as u32)?;
        writer.write_byte_block(c.entry.as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_writer_and_reader() {
        let comment = VorbisComment {
            vendor: "flacon 0.1.0".to_string(),
            comments: vec![
                Comment::new("TITLE=Long Hot Summer".to_string()),
                Comment::new("ARTIST=The Style Council".to_string()),
            ],
        };
        let mut writer = BitWriter::new();
        write_vorbis_comment_block(&mut writer, &comment).unwrap();
        let (bytes, len) = writer.get_buffer();
        let mut cursor = &bytes[..len];
        let parsed = read_vorbis_comment_block(&mut cursor).unwrap();
        assert_eq!(parsed.vendor, comment.vendor);
        assert_eq!(parsed.comments, comment.comments);
    }

    #[test]
    fn key_lookup_is_case_insensitive_and_prefers_non_empty() {
        let comment = VorbisComment {
            vendor: String::new(),
            comments: vec![
                Comment::new("Title=First".to_string()),
                Comment::new("TITLE=".to_string()),
            ],
        };
        let map = comment.to_map();
        assert_eq!(map.get("TITLE"), Some(&"First"));
    }

    #[test]
    fn comment_without_equals_has_empty_value() {
        let c = Comment::new("not-a-tag".to_string());
        assert_eq!(c.key(), "not-a-tag");
        assert_eq!(c.value(), "");
    }
}
