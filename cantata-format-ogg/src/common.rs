// Cantata
// Copyright (c) 2022-2025 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use cantata_core::meta::MetadataRevision;

/// Side data produced by a logical stream while reading a page.
pub enum SideData {
    /// A new revision of metadata.
    Metadata(MetadataRevision),
}
