// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! The `picture` module reads and writes PICTURE metadata blocks: cover art
//! or other images embedded directly in the stream, framed the same way as
//! an ID3v2 APIC frame.

use std::io;

use crate::error::Result;
use crate::input::ReadBytes;
use crate::output::BitWriter;

use super::read_string;

/// The picture type, matching the ID3v2 APIC frame's type codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PictureType {
    Other,
    FileIcon,
    OtherFileIcon,
    CoverFront,
    CoverBack,
    LeafletPage,
    Media,
    LeadArtist,
    Artist,
    Conductor,
    Band,
    Composer,
    Lyricist,
    RecordingLocation,
    DuringRecording,
    DuringPerformance,
    MovieVideoScreenCapture,
    BrightColoredFish,
    Illustration,
    BandArtistLogotype,
    PublisherStudioLogotype,
    /// A type code outside 0..=20, kept verbatim rather than rejected.
    Other32(u32),
}

impl PictureType {
    fn from_code(code: u32) -> PictureType {
        match code {
            0 => PictureType::Other,
            1 => PictureType::FileIcon,
            2 => PictureType::OtherFileIcon,
            3 => PictureType::CoverFront,
            4 => PictureType::CoverBack,
            5 => PictureType::LeafletPage,
            6 => PictureType::Media,
            7 => PictureType::LeadArtist,
            8 => PictureType::Artist,
            9 => PictureType::Conductor,
            10 => PictureType::Band,
            11 => PictureType::Composer,
            12 => PictureType::Lyricist,
            13 => PictureType::RecordingLocation,
            14 => PictureType::DuringRecording,
            15 => PictureType::DuringPerformance,
            16 => PictureType::MovieVideoScreenCapture,
            17 => PictureType::BrightColoredFish,
            18 => PictureType::Illustration,
            19 => PictureType::BandArtistLogotype,
            20 => PictureType::PublisherStudioLogotype,
            other => PictureType::Other32(other),
        }
    }

    fn to_code(self) -> u32 {
        match self {
            PictureType::Other => 0,
            PictureType::FileIcon => 1,
            PictureType::OtherFileIcon => 2,
            PictureType::CoverFront => 3,
            PictureType::CoverBack => 4,
            PictureType::LeafletPage => 5,
            PictureType::Media => 6,
            PictureType::LeadArtist => 7,
            PictureType::Artist => 8,
            PictureType::Conductor => 9,
            PictureType::Band => 10,
            PictureType::Composer => 11,
            PictureType::Lyricist => 12,
            PictureType::RecordingLocation => 13,
            PictureType::DuringRecording => 14,
            PictureType::DuringPerformance => 15,
            PictureType::MovieVideoScreenCapture => 16,
            PictureType::BrightColoredFish => 17,
            PictureType::Illustration => 18,
            PictureType::BandArtistLogotype => 19,
            PictureType::PublisherStudioLogotype => 20,
            PictureType::Other32(code) => code,
        }
    }
}

/// A parsed PICTURE block.
#[derive(Clone, Debug)]
pub struct Picture {
    pub picture_type: PictureType,
    /// MIME type, or the literal `"-->"` to signal `data` is a URL instead.
    pub mime_type: String,
    pub description: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Number of colors used for indexed-color images, or 0 otherwise.
    pub colors: u32,
    pub data: Vec<u8>,
}

pub fn read_picture_block<R: io::Read>(input: &mut R) -> Result<Picture> {
    let picture_type = PictureType::from_code(input.read_be_u32()?);
    let mime_len = input.read_be_u32()?;
    let mime_type = read_string(input, mime_len as usize)?;
    let desc_len = input.read_be_u32()?;
    let description = read_string(input, desc_len as usize)?;
    let width = input.read_be_u32()?;
    let height = input.read_be_u32()?;
    let depth = input.read_be_u32()?;
    let colors = input.read_be_u32()?;
    let data_len = input.read_be_u32()?;
    let mut data = vec![0u8; data_len as usize];
    input.read_exact(&mut data)?;

    Ok(Picture { picture_type, mime_type, description, width, height, depth, colors, data })
}

pub fn write_picture_block(writer: &mut BitWriter, picture: &Picture) -> Result<()> {
    writer.write_raw_u32(picture.picture_type.to_code(), 32)?;
    writer.write_raw_u32(picture.mime_type.len() as u32, 32)?;
    writer.write_byte_block(picture.mime_type.as_bytes())?;
    writer.write_raw_u32(picture.description.len() as u32, 32)?;
    writer.write_byte_block(picture.description.as_bytes())?;
    writer.write_raw_u32(picture.width, 32)?;
    writer.write_raw_u32(picture.height, 32)?;
    writer.write_raw_u32(picture.depth, 32)?;
    writer.write_raw_u32(picture.colors, 32)?;
    writer.write_raw_u32(picture.data.len() as u32, 32)?;
    writer.write_byte_block(&picture.data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_writer_and_reader() {
        let picture = Picture {
            picture_type: PictureType::CoverFront,
            mime_type: "image/png".to_string(),
            description: "front cover".to_string(),
            width: 600,
            height: 600,
            depth: 24,
            colors: 0,
            data: vec![0x89, b'P', b'N', b'G', 1, 2, 3],
        };
        let mut writer = BitWriter::new();
        write_picture_block(&mut writer, &picture).unwrap();
        let (bytes, len) = writer.get_buffer();
        let mut cursor = &bytes[..len];
        let parsed = read_picture_block(&mut cursor).unwrap();
        assert_eq!(parsed.mime_type, picture.mime_type);
        assert_eq!(parsed.description, picture.description);
        assert_eq!(parsed.data, picture.data);
        assert!(matches!(parsed.picture_type, PictureType::CoverFront));
    }

    #[test]
    fn unknown_type_code_round_trips_verbatim() {
        assert_eq!(PictureType::from_code(99).to_code(), 99);
    }
}
