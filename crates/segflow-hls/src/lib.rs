#![forbid(unsafe_code)]

//! HTTP Live Streaming source.
//!
//! [`HlsSource`] walks a media playlist: it starts near the live edge (or at
//! the first segment of a finished playlist), reloads on the target duration
//! and hands encrypted segments to the engine together with their key.
//! Finished `VOD`/`EVENT` playlists get a [`SeekIndex`] built from parallel
//! `HEAD` requests, which makes them seekable.

mod error;
mod index;
mod parsing;
mod source;
mod stream;

pub use crate::{
    error::{HlsError, HlsResult},
    index::{IndexEntry, SeekIndex},
    parsing::{
        KeyInfo, MediaPlaylist, MediaSegment, NameKey, PlaylistType, VariantInfo,
        parse_media_playlist, parse_variant_playlist,
    },
    source::HlsSource,
    stream::{HlsStream, HlsVariant},
};
