//! Сигнализация через общее хранилище документов.
//!
//! Знает форму дескриптора сессии и двух подколлекций кандидатов, но ничего
//! не знает о логике звонка:
//!
//! ```text
//! <collection>/<session_key>                          { offer?, answer? }
//! <collection>/<session_key>/caller-candidates/<id>   ICE candidate
//! <collection>/<session_key>/callee-candidates/<id>   ICE candidate
//! ```

use std::sync::Arc;

use serde_json::Map;
use tracing::{debug, info, warn};

use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::logger::dump_candidate;
use crate::peer::state::Role;
use crate::peer::types::{IceCandidate, SessionDescription, SessionRecord};
use crate::store::{join_path, CollectionChange, DocumentStore};
use crate::subscription::Subscription;

#[derive(Clone)]
pub struct SignalingChannel {
    store: Arc<dyn DocumentStore>,
    session_path: String,
}

impl SignalingChannel {
    pub fn new(store: Arc<dyn DocumentStore>, config: &CallConfig) -> Self {
        Self {
            store,
            session_path: join_path(&config.collection, &config.session_key),
        }
    }

    pub fn session_path(&self) -> &str {
        &self.session_path
    }

    fn candidates_path(&self, role: Role) -> String {
        join_path(&self.session_path, role.candidate_collection())
    }

    /// Текущий дескриптор; пустая запись, если его нет
    pub async fn read_session(&self) -> Result<SessionRecord> {
        match self.store.get(&self.session_path).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| CallError::Consistency(format!("malformed session descriptor: {e}"))),
            None => Ok(SessionRecord::default()),
        }
    }

    /// Создаёт дескриптор только с offer
    pub async fn publish_offer(&self, offer: &SessionDescription) -> Result<()> {
        let record = SessionRecord {
            offer: Some(offer.clone()),
            answer: None,
        };
        let value = serde_json::to_value(&record)
            .map_err(|e| CallError::SignalingIo(e.to_string()))?;
        self.store.set(&self.session_path, value).await?;
        info!("Published offer to {}", self.session_path);
        Ok(())
    }

    /// Добавляет answer в существующий дескриптор, offer не трогает
    pub async fn publish_answer(&self, answer: &SessionDescription) -> Result<()> {
        let mut fields = Map::new();
        fields.insert(
            "answer".into(),
            serde_json::to_value(answer).map_err(|e| CallError::SignalingIo(e.to_string()))?,
        );
        self.store.update(&self.session_path, fields).await?;
        info!("Published answer to {}", self.session_path);
        Ok(())
    }

    /// Полный дескриптор при каждом изменении. Удаление приходит как пустая
    /// запись, битый снимок как ошибка `Consistency`, потерянный слушатель
    /// как `SignalingIo`.
    pub fn watch_session(&self) -> Subscription<Result<SessionRecord>> {
        let path = self.session_path.clone();
        self.store
            .watch_document(&self.session_path)
            .map(move |snapshot| -> Result<SessionRecord> {
                match snapshot? {
                    None => Ok(SessionRecord::default()),
                    Some(value) => serde_json::from_value(value).map_err(|e| {
                        warn!("Malformed descriptor at {path}: {e}");
                        CallError::Consistency(format!("malformed session descriptor: {e}"))
                    }),
                }
            })
    }

    /// Добавляет локальный кандидат в подколлекцию своей роли
    pub async fn publish_local_candidate(
        &self,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<()> {
        dump_candidate("LOCAL", candidate);
        let value = serde_json::to_value(candidate)
            .map_err(|e| CallError::SignalingIo(e.to_string()))?;
        self.store.add(&self.candidates_path(role), value).await?;
        Ok(())
    }

    /// Каждый кандидат другой стороны, один раз, в порядке добавления.
    /// Битые документы кандидатов пропускаются.
    pub fn watch_remote_candidates(&self, role: Role) -> Subscription<Result<IceCandidate>> {
        self.store
            .watch_collection(&self.candidates_path(role.opposite()))
            .filter_map(|change| match change {
                Ok(CollectionChange::Added { value, .. }) => {
                    match serde_json::from_value::<IceCandidate>(value) {
                        Ok(candidate) => {
                            dump_candidate("REMOTE", &candidate);
                            Some(Ok(candidate))
                        }
                        Err(e) => {
                            warn!("Ignoring malformed remote candidate: {e}");
                            None
                        }
                    }
                }
                Ok(CollectionChange::Removed { .. }) => None,
                Err(e) => Some(Err(e.into())),
            })
    }

    /// Срабатывает, когда подколлекция кандидатов другой стороны удалена
    /// полностью
    pub fn watch_remote_teardown(&self, role: Role) -> Subscription<Result<()>> {
        let remote = role.opposite();
        self.store
            .watch_collection(&self.candidates_path(remote))
            .filter_map(move |change| match change {
                Ok(CollectionChange::Removed { remaining: 0, .. }) => {
                    debug!("{} sub-collection deleted", remote.candidate_collection());
                    Some(Ok(()))
                }
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            })
    }

    /// Удаляет все документы кандидатов обеих подколлекций, затем дескриптор.
    /// Каждое удаление пробуется, даже если предыдущее упало; возвращается
    /// первая ошибка.
    pub async fn destroy_session(&self) -> Result<()> {
        let mut first_error = None;

        for role in [Role::Callee, Role::Caller] {
            let collection = self.candidates_path(role);
            let docs = match self.store.list(&collection).await {
                Ok(docs) => docs,
                Err(e) => {
                    warn!("Failed to list {collection}: {e}");
                    first_error.get_or_insert(CallError::from(e));
                    continue;
                }
            };
            for (id, _) in docs {
                if let Err(e) = self.store.delete(&join_path(&collection, &id)).await {
                    warn!("Failed to delete candidate {collection}/{id}: {e}");
                    first_error.get_or_insert(CallError::from(e));
                }
            }
        }

        if let Err(e) = self.store.delete(&self.session_path).await {
            warn!("Failed to delete session descriptor {}: {e}", self.session_path);
            first_error.get_or_insert(CallError::from(e));
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                debug!("Session {} destroyed", self.session_path);
                Ok(())
            }
        }
    }
}
