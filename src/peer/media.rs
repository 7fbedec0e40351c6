//! Захват локального медиа.
//!
//! Доступ к устройствам вне этого крейта: оркестратору нужно только получить
//! поток на время звонка и вернуть его по окончании.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// Набор медиа-треков, локальный или удалённый
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn with_track(mut self, kind: TrackKind, id: impl Into<String>) -> Self {
        self.tracks.push(MediaTrack {
            id: id.into(),
            kind,
        });
        self
    }
}

/// Доступ к камере и микрофону
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// [`CallError::MediaUnavailable`](crate::CallError::MediaUnavailable), если
    /// доступ запрещён или устройств нет
    async fn acquire(&self) -> Result<MediaStream>;

    /// Останавливает все треки `stream` и освобождает устройства
    async fn release(&self, stream: &MediaStream) -> Result<()>;
}
