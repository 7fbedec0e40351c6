use serde::{Deserialize, Serialize};

use crate::peer::media::MediaStream;

pub const CALLER_CANDIDATES: &str = "caller-candidates";
pub const CALLEE_CANDIDATES: &str = "callee-candidates";

/// За какую сторону сессии участник ведёт переговоры
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Callee,
}

impl Role {
    pub fn opposite(self) -> Role {
        match self {
            Role::Caller => Role::Callee,
            Role::Callee => Role::Caller,
        }
    }

    /// Подколлекция, куда роль пишет свои кандидаты
    pub fn candidate_collection(self) -> &'static str {
        match self {
            Role::Caller => CALLER_CANDIDATES,
            Role::Callee => CALLEE_CANDIDATES,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Calling,
    Receiving,
    Connected,
}

/// Состояние участника в памяти. Никуда не сохраняется.
#[derive(Debug, Clone)]
pub struct CallState {
    pub role: Option<Role>,
    pub phase: Phase,
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<MediaStream>,
    /// Выставлен, пока участник ведёт переговоры или соединён
    pub suppress_incoming: bool,
}

impl Default for CallState {
    fn default() -> Self {
        Self {
            role: None,
            phase: Phase::Idle,
            local_stream: None,
            remote_stream: None,
            suppress_incoming: false,
        }
    }
}

impl CallState {
    /// Может ли замеченный offer стать входящим звонком
    pub fn may_ring(&self) -> bool {
        self.phase == Phase::Idle && !self.suppress_incoming
    }

    /// Занимает роль для новых переговоров. `false`, если роль уже занята.
    pub fn claim(&mut self, role: Role) -> bool {
        if self.role.is_some() {
            return false;
        }
        self.role = Some(role);
        self.suppress_incoming = true;
        true
    }

    /// Назад в `Idle`: без роли, без потоков, входящие снова разрешены
    pub fn reset(&mut self) {
        *self = CallState::default();
    }
}
