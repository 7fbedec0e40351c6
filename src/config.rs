//! Конфигурация звонка.
//!
//! Одна статическая конфигурация передаётся оркестратору при создании:
//! ICE серверы для каждого соединения, расположение общего дескриптора
//! сессии и переключатель логирования.

use serde::{Deserialize, Serialize};

use crate::error::{CallError, Result};
use crate::peer::types::ServerConfig;

// В режиме отладки логирование включено, в продакшене выключено (если не включить явно)
#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

pub const DEFAULT_COLLECTION: &str = "meet";
pub const DEFAULT_SESSION_KEY: &str = "chatId";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CallConfig {
    pub ice_servers: Vec<ServerConfig>,
    /// Коллекция, в которой лежит дескриптор сессии
    pub collection: String,
    /// Фиксированный ключ дескриптора внутри `collection`
    pub session_key: String,
    /// `None` - ждём удалённую сторону бесконечно
    pub negotiation_timeout_secs: Option<u64>,
    /// Размер буфера рассылки событий для UI
    pub event_capacity: usize,
    pub logging: LoggingConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// Фильтр по умолчанию, `RUST_LOG` имеет приоритет
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            level: "info".into(),
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            collection: DEFAULT_COLLECTION.into(),
            session_key: DEFAULT_SESSION_KEY.into(),
            negotiation_timeout_secs: None,
            event_capacity: 64,
            logging: LoggingConfig::default(),
        }
    }
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

impl CallConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: CallConfig =
            serde_json::from_str(raw).map_err(|e| CallError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(CallError::Config(format!(
                    "ICE server {} has an empty url",
                    server.id
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(CallError::Config(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }

        for (name, segment) in [
            ("collection", &self.collection),
            ("session_key", &self.session_key),
        ] {
            if segment.is_empty() || segment.contains('/') {
                return Err(CallError::Config(format!(
                    "{name} must be a single non-empty path segment, got {segment:?}"
                )));
            }
        }

        if self.event_capacity == 0 {
            return Err(CallError::Config("event_capacity must be positive".into()));
        }
        Ok(())
    }
}
