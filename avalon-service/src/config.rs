use std::{
    env,
    time::Duration,
};

use avalon_core::llm::LlmClientConfig;

/// Admission queue capacity, per `spec.md` §4.6.
pub const ADMISSION_QUEUE_CAPACITY: usize = 100;

/// Worker pool floor; the adaptive monitor never shrinks below this, per
/// `original_source/game/battle_manager.py`'s `AdaptiveThreadPool`.
pub const MIN_WORKER_THREADS: usize = 4;

/// Workers added or removed per adjustment.
pub const WORKER_THREAD_STEP: usize = 2;

/// How often the load monitor samples CPU and memory.
pub const LOAD_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub const HIGH_CPU_THRESHOLD: f32 = 0.75;
pub const HIGH_MEM_THRESHOLD: f32 = 0.80;
pub const LOW_CPU_THRESHOLD: f32 = 0.30;
pub const LOW_MEM_THRESHOLD: f32 = 0.60;

/// How long a graceful stop (battle manager workers, an automatch scheduler's produce loop)
/// waits for the task to exit before giving up and logging instead of blocking forever.
pub const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub const AUTOMATCH_INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const AUTOMATCH_MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
pub const AUTOMATCH_REFRESH_INTERVAL_BATTLES: u64 = 10;
pub const AUTOMATCH_BATCH_SIZE: usize = 5;
pub const AUTOMATCH_MAX_IN_FLIGHT: usize = 20;
pub const AUTOMATCH_QUEUE_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const AUTOMATCH_STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const AUTOMATCH_PARTICIPANTS: usize = 7;

fn calculate_default_max_workers() -> usize {
    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpu_count * 16).min(192)
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

/// Pool sizing, queue capacities, and timing constants, overridable via environment variables on
/// top of the `const` defaults above, per the Ambient Stack's Configuration section.
#[derive(Debug, Clone)]
pub struct Config {
    pub admission_queue_capacity: usize,
    pub min_worker_threads: usize,
    pub max_worker_threads: usize,
    pub automatch_max_in_flight: usize,
    pub automatch_batch_size: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            admission_queue_capacity: env_usize("AVALON_QUEUE_CAPACITY")
                .unwrap_or(ADMISSION_QUEUE_CAPACITY),
            min_worker_threads: env_usize("AVALON_MIN_WORKER_THREADS")
                .unwrap_or(MIN_WORKER_THREADS),
            max_worker_threads: env_usize("AVALON_MAX_WORKER_THREADS")
                .unwrap_or_else(calculate_default_max_workers),
            automatch_max_in_flight: env_usize("AVALON_AUTOMATCH_MAX_IN_FLIGHT")
                .unwrap_or(AUTOMATCH_MAX_IN_FLIGHT),
            automatch_batch_size: env_usize("AVALON_AUTOMATCH_BATCH_SIZE")
                .unwrap_or(AUTOMATCH_BATCH_SIZE),
        }
    }

    /// Loads every configured OpenAI-compatible account: the unsuffixed variant as the default
    /// (index 0), then `_1`, `_2`, ... until a suffix is missing, per `spec.md` §6 and
    /// `original_source/game/client_manager.py`'s `_init_clients`.
    pub fn llm_client_configs() -> Vec<LlmClientConfig> {
        let mut configs = Vec::new();
        if let Some(config) = llm_client_config_for_suffix("") {
            configs.push(config);
        }
        let mut suffix = 1u32;
        while let Some(config) = llm_client_config_for_suffix(&suffix.to_string()) {
            configs.push(config);
            suffix += 1;
        }
        configs
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admission_queue_capacity: ADMISSION_QUEUE_CAPACITY,
            min_worker_threads: MIN_WORKER_THREADS,
            max_worker_threads: calculate_default_max_workers(),
            automatch_max_in_flight: AUTOMATCH_MAX_IN_FLIGHT,
            automatch_batch_size: AUTOMATCH_BATCH_SIZE,
        }
    }
}

fn llm_client_config_for_suffix(suffix: &str) -> Option<LlmClientConfig> {
    let key_suffix = if suffix.is_empty() {
        String::new()
    } else {
        format!("_{suffix}")
    };
    let api_key = env::var(format!("OPENAI_API_KEY{key_suffix}")).ok()?;
    let base_url = env::var(format!("OPENAI_BASE_URL{key_suffix}")).ok()?;
    let model = env::var(format!("OPENAI_MODEL_NAME{key_suffix}")).ok()?;
    Some(LlmClientConfig {
        name: format!("client{key_suffix}"),
        api_key,
        base_url,
        model,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_config_uses_const_defaults() {
        let config = Config::default();
        assert_eq!(config.admission_queue_capacity, ADMISSION_QUEUE_CAPACITY);
        assert_eq!(config.min_worker_threads, MIN_WORKER_THREADS);
        assert_eq!(config.automatch_max_in_flight, AUTOMATCH_MAX_IN_FLIGHT);
        assert_eq!(config.automatch_batch_size, AUTOMATCH_BATCH_SIZE);
    }

    #[test]
    fn no_llm_client_configured_without_environment_variables() {
        // Sanity check only: we cannot safely clear process-wide environment variables in a
        // parallel test binary, so this just exercises the suffix-scanning shape.
        assert_eq!(llm_client_config_for_suffix("nonexistent-suffix-xyz"), None);
    }
}
