use tracing::{debug, info, warn};

use crate::peer::connection::PeerConnection;
use crate::peer::types::IceCandidate;

/// Хранит удалённые кандидаты, пришедшие раньше remote description.
///
/// После установки remote description очередь применяется в порядке
/// поступления, а следующие кандидаты проходят сразу.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: Vec<IceCandidate>,
    remote_description_set: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Возвращает кандидат, если его можно применить сейчас, иначе откладывает
    pub fn admit(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_description_set {
            Some(candidate)
        } else {
            debug!("Remote description not set yet, queuing candidate");
            self.pending.push(candidate);
            None
        }
    }

    /// Отмечает, что remote description установлен, и отдаёт отложенные кандидаты
    pub fn mark_remote_description_set(&mut self) -> Vec<IceCandidate> {
        self.remote_description_set = true;
        std::mem::take(&mut self.pending)
    }
}

/// Применяет все отложенные кандидаты после установки remote description.
/// Ошибки логируются и пропускаются; возвращает число принятых.
pub async fn apply_pending_candidates(
    pc: &dyn PeerConnection,
    candidates: Vec<IceCandidate>,
) -> usize {
    let mut applied = 0;
    for candidate in candidates {
        debug!("Applying pending candidate: {:?}", candidate.candidate);
        match pc.add_ice_candidate(candidate).await {
            Ok(()) => applied += 1,
            Err(e) => warn!("Failed to apply pending candidate: {e}"),
        }
    }
    applied
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateStats {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateStats {
    let mut stats = CandidateStats::default();
    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            stats.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            stats.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            stats.relay += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        stats.host, stats.srflx, stats.relay
    );
    if stats.relay == 0 {
        debug!("No TURN relay candidates gathered, connection through symmetric NAT may fail");
    }
    stats
}
