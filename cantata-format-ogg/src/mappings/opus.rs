// Cantata
// Copyright (c) 2022-2025 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::Mapper;

use cantata_core::errors::Result;

use log::warn;

/// The signature for an OGG encapsulated Opus stream.
const OGG_OPUS_HEADER_SIGNATURE: &[u8] = b"OpusHead";

pub fn detect(buf: &[u8]) -> Result<Option<Box<dyn Mapper>>> {
    // The packet shall begin with the Opus identification header signature.
    if !buf.starts_with(OGG_OPUS_HEADER_SIGNATURE) {
        return Ok(None);
    }

    // Opus streams are detected, but mapping them is not supported.
    warn!("ogg (opus): stream detected but opus is not supported");

    Ok(None)
}
