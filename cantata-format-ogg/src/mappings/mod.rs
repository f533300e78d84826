// Cantata
// Copyright (c) 2022-2025 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::common::SideData;

use cantata_core::codecs::CodecParameters;
use cantata_core::errors::Result;

mod flac;
mod opus;
mod vorbis;

/// Detect a `Mapper` for a logical stream given the identification packet of the stream.
pub fn detect(buf: &[u8]) -> Result<Option<Box<dyn Mapper>>> {
    let mapper = vorbis::detect(buf)?.or(flac::detect(buf)?).or(opus::detect(buf)?);

    Ok(mapper)
}

/// Result of a packet map operation.
pub enum MapResult {
    /// The packet contained side data.
    SideData { data: SideData },
    /// The packet contained setup data.
    Setup,
    /// The packet contained stream data.
    StreamData { dur: u64 },
    /// The packet contained unknown data.
    Unknown,
}

/// A `PacketParser` implements a packet parser that decodes the duration of a packet without
/// decoding the packet itself.
pub trait PacketParser: Send + Sync {
    fn parse_next_packet_dur(&mut self, packet: &[u8]) -> u64;
}

/// A `Mapper` implements packet-handling for a specific `Codec`.
pub trait Mapper: Send + Sync {
    /// Gets the name of the mapper.
    fn name(&self) -> &'static str;

    /// Gets an immutable reference to the `CodecParameters` for the stream belonging to this
    /// `Mapper`. If the stream is not ready then the parameters may be incomplete.
    fn codec_params(&self) -> &CodecParameters;

    /// Gets a mutable reference to the `CodecParameters` for the stream belonging to this
    /// `Mapper`. If the stream is not ready then the parameters may be incomplete.
    fn codec_params_mut(&mut self) -> &mut CodecParameters;

    /// Soft-reset the mapper after a discontinuity in packets.
    fn reset(&mut self);

    /// Convert an absolute granular position to a timestamp.
    fn absgp_to_ts(&self, absgp: u64) -> u64 {
        absgp
    }

    /// Make a packet parser for parsing packet timing.
    fn make_parser(&self) -> Option<Box<dyn PacketParser>>;

    /// Map a packet.
    fn map_packet(&mut self, packet: &[u8]) -> Result<MapResult>;

    /// Returns `true` if the stream is ready for usage. If the stream is not ready then the
    /// mapper needs to consume more setup packets.
    fn is_ready(&self) -> bool {
        true
    }
}
