// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `iterator` module walks the chain of metadata blocks at the start of
//! a stream, stopping after the block marked `is_last`.

use std::io;

use crate::error::Result;

use super::{read_block_header, read_metadata_block, BlockHeader, MetadataBlock};

/// Iterates over the metadata blocks of a FLAC stream.
///
/// Assumes the `"fLaC"` stream marker has already been consumed; yields
/// `(BlockHeader, MetadataBlock)` pairs until the block with `is_last == true`
/// has been returned, after which iteration stops. A read error ends
/// iteration after yielding the error once.
pub struct MetadataIter<'r, R: 'r> {
    reader: &'r mut R,
    done: bool,
}

impl<'r, R: io::Read> MetadataIter<'r, R> {
    pub fn new(reader: &'r mut R) -> MetadataIter<'r, R> {
        MetadataIter { reader, done: false }
    }
}

impl<'r, R: io::Read> Iterator for MetadataIter<'r, R> {
    type Item = Result<(BlockHeader, MetadataBlock)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let header = match read_block_header(self.reader) {
            Ok(h) => h,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let block = match read_metadata_block(self.reader, &header) {
            Ok(b) => b,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        if header.is_last {
            self.done = true;
        }

        Some(Ok((header, block)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{write_block_header, write_streaminfo_block, BlockType, StreamInfo};
    use crate::output::BitWriter;

    #[test]
    fn stops_after_the_last_block() {
        let info = StreamInfo {
            min_block_size: 16,
            max_block_size: 16,
            min_frame_size: None,
            max_frame_size: None,
            sample_rate: 44100,
            channels: 1,
            bits_per_sample: 8,
            samples: None,
            md5sum: [0u8; 16],
        };

        let mut writer = BitWriter::new();
        write_block_header(
            &mut writer,
            &BlockHeader { is_last: true, block_type: BlockType::StreamInfo, length: 34 },
        )
        .unwrap();
        write_streaminfo_block(&mut writer, &info).unwrap();

        let (bytes, len) = writer.get_buffer();
        let mut cursor = &bytes[..len];
        let blocks: Vec<_> = MetadataIter::new(&mut cursor).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(matches!(blocks[0].1, MetadataBlock::StreamInfo(_)));
    }
}
