// Cantata
// Copyright (c) 2022-2025 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::Mapper;

use cantata_core::errors::Result;

use log::warn;

/// The expected size of the first FLAC header packet.
const OGG_FLAC_HEADER_PACKET_SIZE: usize = 51;

/// The signature for an OGG encapsulated FLAC stream.
const OGG_FLAC_HEADER_SIGNATURE: &[u8] = b"\x7fFLAC";

pub fn detect(buf: &[u8]) -> Result<Option<Box<dyn Mapper>>> {
    // The packet shall be the expected length and begin with the OGG FLAC signature.
    if buf.len() != OGG_FLAC_HEADER_PACKET_SIZE
        || !buf.starts_with(OGG_FLAC_HEADER_SIGNATURE)
    {
        return Ok(None);
    }

    // FLAC streams are detected, but mapping them is not supported.
    warn!("ogg (flac): stream detected but flac is not supported");

    Ok(None)
}
