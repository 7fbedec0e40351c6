use std::sync::Once;

use tracing::debug;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::peer::types::IceCandidate;

static INIT: Once = Once::new();

/// Устанавливает глобальный tracing subscriber с временными метками.
///
/// Срабатывает только первый вызов. Если логирование выключено, ничего не
/// устанавливается и макросы `tracing` ничего не делают. `RUST_LOG` имеет
/// приоритет над уровнем из конфигурации.
pub fn init(config: &LoggingConfig) {
    if !config.enabled {
        return;
    }
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
            .with_target(false)
            .try_init();
        if installed.is_err() {
            debug!("tracing subscriber already installed, keeping it");
        }
    });
}

/// Логирует ICE кандидат (trickle)
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index, cand.username_fragment
    );
}
