// Cantata
// Copyright (c) 2022-2025 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `meta` module defines basic metadata elements, and management structures.

use std::collections::VecDeque;
use std::fmt;

/// `StandardTagKey` is an enumeration providing standardized keys for common tag types.
///
/// A tag reader may assign a `StandardTagKey` to a `Tag` if the tag's key is generally
/// used to convey the information associated with the `StandardTagKey`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StandardTagKey {
    Album,
    AlbumArtist,
    Arranger,
    Artist,
    Bpm,
    Comment,
    Composer,
    Conductor,
    Date,
    Description,
    DiscNumber,
    DiscTotal,
    EncodedBy,
    Encoder,
    Genre,
    IdentIsrc,
    Label,
    Language,
    License,
    Lyricist,
    Lyrics,
    MusicBrainzAlbumId,
    MusicBrainzArtistId,
    MusicBrainzRecordingId,
    MusicBrainzTrackId,
    OriginalDate,
    Performer,
    Producer,
    ReplayGainAlbumGain,
    ReplayGainAlbumPeak,
    ReplayGainTrackGain,
    ReplayGainTrackPeak,
    SortAlbum,
    SortAlbumArtist,
    SortArtist,
    SortTrackTitle,
    TrackNumber,
    TrackTitle,
    TrackTotal,
    Version,
    Writer,
}

/// A `Value` is the value of a metadata tag.
#[derive(Clone, Debug)]
pub enum Value {
    /// A string value.
    String(String),
    /// A binary buffer value.
    Binary(Box<[u8]>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => s.fmt(f),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

/// A `Tag` encapsulates a key-value pair of metadata.
#[derive(Clone, Debug)]
pub struct Tag {
    /// If the `Tag`'s key string is commonly associated with a typical type, meaning, or purpose,
    /// then if recognized a `StandardTagKey` will be assigned to this `Tag`.
    ///
    /// This is a best effort guess since not all metadata formats have a well defined or
    /// specified tag mapping. However, it is recommended that consumers prefer `std_key` over
    /// `key`, if provided.
    pub std_key: Option<StandardTagKey>,
    /// A key string indicating the type, meaning, or purpose of the `Tag`s value.
    pub key: String,
    /// The value of the `Tag`.
    pub value: Value,
}

impl Tag {
    /// Create a new `Tag`.
    pub fn new(std_key: Option<StandardTagKey>, key: &str, value: Value) -> Tag {
        Tag { std_key, key: key.to_string(), value }
    }

    /// Returns true if the `Tag`'s key string was recognized and a `StandardTagKey` was assigned,
    /// otherwise false is returned.
    pub fn is_known(&self) -> bool {
        self.std_key.is_some()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.std_key {
            Some(std_key) => write!(f, "{{ std_key={:?}, key=\"{}\" }}", std_key, self.key),
            None => write!(f, "{{ key=\"{}\" }}", self.key),
        }
    }
}

/// `MetadataRevision` is a container for a single discrete revision of metadata information.
#[derive(Clone, Debug, Default)]
pub struct MetadataRevision {
    tags: Vec<Tag>,
}

impl MetadataRevision {
    /// Gets an immutable slice to the `Tag`s in this revision.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

/// `MetadataBuilder` is the builder for a `MetadataRevision`.
#[derive(Clone, Debug, Default)]
pub struct MetadataBuilder {
    metadata: MetadataRevision,
}

impl MetadataBuilder {
    /// Instantiate a new `MetadataBuilder`.
    pub fn new() -> Self {
        MetadataBuilder { metadata: Default::default() }
    }

    /// Add a `Tag` to the metadata.
    pub fn add_tag(&mut self, tag: Tag) -> &mut Self {
        self.metadata.tags.push(tag);
        self
    }

    /// Yield the constructed `MetadataRevision`.
    pub fn metadata(self) -> MetadataRevision {
        self.metadata
    }
}

/// `Metadata` is a reference to the metadata inside of a `MetadataLog`.
pub struct Metadata<'a> {
    revisions: &'a mut VecDeque<MetadataRevision>,
}

impl<'a> Metadata<'a> {
    /// Returns `true` if the current metadata revision is the newest, `false` otherwise.
    pub fn is_latest(&self) -> bool {
        self.revisions.len() <= 1
    }

    /// Gets an immutable reference to the current, and therefore oldest, revision of the
    /// metadata.
    pub fn current(&self) -> Option<&MetadataRevision> {
        self.revisions.front()
    }

    /// Skips to, and gets an immutable reference to the latest, and therefore newest, revision of
    /// the metadata.
    pub fn skip_to_latest(&mut self) -> Option<&MetadataRevision> {
        loop {
            if self.pop().is_none() {
                break;
            }
        }
        self.current()
    }

    /// If there are newer `Metadata` revisions, advances the current revision to the next
    /// revision and returns the old revision.
    pub fn pop(&mut self) -> Option<MetadataRevision> {
        if self.revisions.len() > 1 {
            self.revisions.pop_front()
        }
        else {
            None
        }
    }
}

/// `MetadataLog` is a container for time-ordered `Metadata` revisions.
#[derive(Clone, Debug, Default)]
pub struct MetadataLog {
    revisions: VecDeque<MetadataRevision>,
}

impl MetadataLog {
    /// Returns a reducable reference to the metadata inside the log.
    pub fn metadata(&mut self) -> Metadata<'_> {
        Metadata { revisions: &mut self.revisions }
    }

    /// Pushes a new `MetadataRevision` onto the log.
    pub fn push(&mut self, rev: MetadataRevision) {
        self.revisions.push_back(rev);
    }
}
