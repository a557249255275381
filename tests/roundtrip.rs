// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! End-to-end encode/decode scenarios driven entirely through the public
//! `StreamEncoder`/`StreamDecoder` API, without any reference to the
//! internal subframe search. Each test exercises one of the format corners
//! called out in the specification: a constant block, wasted bits, a
//! mid/side win, an escape-coded partition, table-assisted seeking, and a
//! final block shorter than the nominal blocksize.

use std::io::Cursor;

use flacon::metadata::vorbis_comment::Comment;
use flacon::metadata::{MetadataBlock, VorbisComment};
use flacon::{EncoderConfig, StreamDecoder, StreamEncoder};

fn encode_into(channels: u32, bps: u32, rate: u32, configure: impl FnOnce(&mut EncoderConfig), samples: &[&[i32]]) -> Vec<u8> {
    let mut config = EncoderConfig::new(channels, bps, rate);
    configure(&mut config);
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut encoder = StreamEncoder::new(&mut buffer, config).unwrap();
        encoder.process(samples).unwrap();
        encoder.finish_and_patch_streaminfo().unwrap();
    }
    buffer.into_inner()
}

fn decode_all(bytes: Vec<u8>) -> (flacon::StreamInfo, Vec<Vec<i32>>) {
    let mut decoder = StreamDecoder::new(Cursor::new(bytes)).unwrap();
    let streaminfo = *decoder.streaminfo();
    let channels = streaminfo.channels as usize;
    let mut channel_buffers: Vec<Vec<i32>> = vec![Vec::new(); channels];
    while let Some(frame) = decoder.decode_frame().unwrap() {
        for (buf, ch) in channel_buffers.iter_mut().zip(frame.samples.into_iter()) {
            buf.extend(ch);
        }
    }
    decoder.finish().unwrap();
    (streaminfo, channel_buffers)
}

#[test]
fn roundtrips_a_constant_block() {
    let samples = vec![7i32; 4096];
    let bytes = encode_into(1, 16, 44100, |_| {}, &[&samples]);

    let mut decoder = StreamDecoder::new(Cursor::new(bytes)).unwrap();
    assert_eq!(decoder.streaminfo().channels, 1);
    let frame = decoder.decode_frame().unwrap().expect("one frame");
    assert_eq!(frame.samples[0], samples);
    assert!(decoder.decode_frame().unwrap().is_none());
    decoder.finish().unwrap();
}

#[test]
fn roundtrips_silence_with_trailing_zero_bits() {
    // Every sample is a multiple of 8: the low bits are always zero, so the
    // subframe search should find a non-zero wasted-bits count.
    let samples: Vec<i32> = (0..2048).map(|i| ((i % 64) - 32) * 8).collect();
    let bytes = encode_into(1, 16, 44100, |_| {}, &[&samples]);

    let mut decoder = StreamDecoder::new(Cursor::new(bytes)).unwrap();
    let frame = decoder.decode_frame().unwrap().expect("one frame");
    assert_eq!(frame.samples[0], samples);
}

#[test]
fn mid_side_stereo_round_trips_correlated_channels() {
    let n = 4096usize;
    let left: Vec<i32> = (0..n).map(|i| ((i as f64 * 0.05).sin() * 4000.0) as i32).collect();
    let right: Vec<i32> = left.iter().map(|&s| s + 3).collect();

    let bytes = encode_into(
        2,
        16,
        44100,
        |config| {
            config.do_mid_side_stereo = true;
        },
        &[&left, &right],
    );

    let mut decoder = StreamDecoder::new(Cursor::new(bytes)).unwrap();
    let frame = decoder.decode_frame().unwrap().expect("one frame");
    assert_eq!(frame.samples[0], left);
    assert_eq!(frame.samples[1], right);
}

#[test]
fn escape_coded_partitions_round_trip_noisy_residuals() {
    // A pseudo-random signal defeats FIXED/LPC prediction, pushing some
    // residual partitions into escape coding.
    let mut state = 0x2545f4914f6cdd1du64;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % 65536) as i32 - 32768
    };
    let samples: Vec<i32> = (0..2048).map(|_| next()).collect();

    let bytes = encode_into(
        1,
        16,
        44100,
        |config| {
            config.do_escape_coding = true;
        },
        &[&samples],
    );

    let mut decoder = StreamDecoder::new(Cursor::new(bytes)).unwrap();
    let frame = decoder.decode_frame().unwrap().expect("one frame");
    assert_eq!(frame.samples[0], samples);
}

#[test]
fn seeks_to_an_arbitrary_sample_without_an_embedded_seek_table() {
    let blocksize = 1152u32;
    let n = blocksize as usize * 8;
    let samples: Vec<i32> = (0..n).map(|i| ((i % 2000) as i32) - 1000).collect();

    let bytes = encode_into(
        1,
        16,
        44100,
        |config| {
            config.blocksize = blocksize;
        },
        &[&samples],
    );

    let mut decoder = StreamDecoder::new(Cursor::new(bytes)).unwrap();
    let target = (blocksize as u64) * 5 + 10;
    decoder.seek_absolute(target).unwrap();
    let frame = decoder.decode_frame().unwrap().expect("a frame at the seek target");
    let frame_start = target - (target % blocksize as u64);
    assert_eq!(
        &frame.samples[0][..],
        &samples[frame_start as usize..frame_start as usize + frame.samples[0].len()]
    );
}

#[test]
fn carries_vorbis_comments_through_to_the_decoded_stream() {
    let samples = vec![0i32; 512];
    let comment = VorbisComment {
        vendor: "flacon test suite".to_string(),
        comments: vec![Comment::new("TITLE=example".to_string())],
    };

    let bytes = encode_into(
        1,
        16,
        44100,
        |config| {
            config.metadata.push(MetadataBlock::VorbisComment(comment));
        },
        &[&samples],
    );

    let decoder = StreamDecoder::new(Cursor::new(bytes)).unwrap();
    let blocks = decoder.metadata();
    assert!(blocks
        .iter()
        .any(|block| matches!(block, MetadataBlock::VorbisComment(c) if c.vendor == "flacon test suite")));
}

#[test]
fn final_block_shorter_than_the_nominal_blocksize_round_trips() {
    let blocksize = 4096u32;
    let samples: Vec<i32> = (0..blocksize as usize + 37).map(|i| (i % 100) as i32 - 50).collect();

    let bytes = encode_into(
        1,
        16,
        44100,
        |config| {
            config.blocksize = blocksize;
        },
        &[&samples],
    );

    let (_, decoded) = decode_all(bytes);
    assert_eq!(decoded[0], samples);
}
