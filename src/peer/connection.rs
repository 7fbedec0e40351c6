//! Контракт слоя real-time соединения.
//!
//! Создание offer/answer, сбор ICE и передача медиа скрыты за
//! [`PeerConnection`]. Оркестратор управляет им командами, а колбэки
//! получает как [`ConnectionEvent`] из канала, выданного при создании.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::CallConfig;
use crate::error::Result;
use crate::peer::media::MediaStream;
use crate::peer::types::{IceCandidate, SessionDescription};

/// Колбэки соединения
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Собран локальный кандидат, его нужно отправить удалённой стороне
    LocalCandidate(IceCandidate),
    /// Пришло удалённое медиа
    RemoteStream(MediaStream),
}

/// Одно соединение, принадлежит только текущему звонку
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn attach_local_stream(&self, stream: &MediaStream) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    /// `Negotiation` при битом или несовместимом description
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// `Negotiation` при битом или несовместимом description
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Повторное закрытие не ошибка
    async fn close(&self) -> Result<()>;
}

/// Новое соединение и его поток событий
pub struct PeerHandle {
    pub connection: Arc<dyn PeerConnection>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// Фабрика соединений
#[async_trait]
pub trait ConnectionAdapter: Send + Sync {
    async fn create(&self, config: &CallConfig) -> Result<PeerHandle>;
}
