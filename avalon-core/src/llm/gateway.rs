use std::{
    cell::RefCell,
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

use serde_json::json;

use crate::{
    llm::{
        ChatCompletionParams,
        ChatMessage,
        LlmClient,
        LlmClientPool,
    },
    observer::Observer,
};
use avalon_data::EventType;

/// Per-round call ceiling, per `spec.md` §4.3. A bot that exceeds this while the round is still
/// open has committed a fatal error, attributed via [`CallContext`].
pub const MAX_CALL_COUNT_PER_ROUND: u64 = 888;

/// Wall-clock budget for one completion attempt.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(20);

/// Number of attempts made against the same backing account before giving up on a call.
pub const MAX_ATTEMPTS: u32 = 3;

/// How often the watchdog sweeps the pool for handles held past
/// [`LlmClientPool::STALE_SESSION_AGE`]. Shorter than the staleness threshold itself so an
/// abandoned handle is reclaimed promptly rather than sitting until the next long interval.
pub const STALE_SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Identifies whose bot call is currently executing, so that `ask_llm` can attribute usage and
/// persist chat history without the caller threading battle/player/round through every bot
/// method signature.
///
/// Grounded on `original_source/game/avalon_game_helper.py`, which stashes the active game and
/// player in module-level state before invoking bot code and clears it after. Bot methods run
/// synchronously inside a dedicated blocking thread (`sandbox::bot::AvalonBot`'s contract), so a
/// thread-local plays the same role a contextvar does in the original: the referee enters a
/// scope immediately before calling into a bot, and the guard restores the outer value on drop,
/// which also makes nested scopes (there are none today, but a future helper-calling-helper path
/// would be) safe.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub battle_id: String,
    pub player_position: u8,
    pub round: u8,
}

thread_local! {
    static CALL_CONTEXT: RefCell<Option<CallContext>> = const { RefCell::new(None) };
}

/// Restores the previous call context when dropped.
pub struct CallContextGuard {
    previous: Option<CallContext>,
}

impl CallContext {
    pub fn enter(context: CallContext) -> CallContextGuard {
        let previous = CALL_CONTEXT.with(|cell| cell.borrow_mut().replace(context));
        CallContextGuard { previous }
    }

    fn current() -> anyhow::Result<CallContext> {
        CALL_CONTEXT
            .with(|cell| cell.borrow().clone())
            .ok_or_else(|| anyhow::anyhow!("ask_llm called outside of a bot call context"))
    }
}

impl Drop for CallContextGuard {
    fn drop(&mut self) {
        CALL_CONTEXT.with(|cell| *cell.borrow_mut() = self.previous.take());
    }
}

#[derive(Default)]
struct RoundCallCount {
    round: u8,
    count: u64,
}

/// The LLM Gateway: client pool selection, retry/timeout, per-round quota, and chat-history
/// persistence, per `spec.md` §4.3.
pub struct LlmGateway {
    pool: LlmClientPool,
    client: Arc<dyn LlmClient>,
    call_counts: Mutex<HashMap<(String, u8), RoundCallCount>>,
    histories: Mutex<HashMap<(String, u8), Vec<ChatMessage>>>,
}

impl LlmGateway {
    pub fn new(pool: LlmClientPool, client: Arc<dyn LlmClient>) -> Self {
        Self {
            pool,
            client,
            call_counts: Mutex::new(HashMap::new()),
            histories: Mutex::new(HashMap::new()),
        }
    }

    /// Re-enters a round after a rejected team proposal, per `spec.md` §4.3: the per-round call
    /// ceiling resets so a re-proposal doesn't inherit the previous attempt's usage.
    pub fn reset_round(&self, battle_id: &str, player_position: u8, round: u8) {
        let mut counts = self.call_counts.lock().unwrap();
        counts.insert(
            (battle_id.to_owned(), player_position),
            RoundCallCount { round, count: 0 },
        );
    }

    /// Invokes the LLM on behalf of the bot identified by the current [`CallContext`].
    ///
    /// Never returns an `Err` for a downstream provider failure: after 3 timed-out or failed
    /// attempts against the least-loaded account, it returns a message describing the failure so
    /// the caller (bot code) can handle it however it likes, matching
    /// `avalon_game_helper.py`'s `askLLM`, which always returns a string. Exceeding the per-round
    /// call ceiling is the one condition that is fatal to the bot, since it indicates runaway
    /// behavior rather than a transient provider issue; it surfaces as `Err` so the referee can
    /// record a `critical_player_ERROR`.
    pub async fn ask_llm(&self, observer: &Observer, prompt: &str) -> anyhow::Result<String> {
        let context = CallContext::current()?;
        self.check_and_increment_quota(&context)?;

        let history_key = (context.battle_id.clone(), context.player_position);
        let mut messages = {
            let histories = self.histories.lock().unwrap();
            histories.get(&history_key).cloned().unwrap_or_default()
        };
        messages.push(ChatMessage::user(prompt));

        let reply = self.complete_with_retry(&messages).await;

        let reply_text = match reply {
            Ok(result) => result.content,
            Err(err) => format!("LLM call failed: {err}"),
        };

        // Token accounting is a character count, not a provider tokenizer count, per
        // `spec.md` §4.3 and `original_source/game/avalon_game_helper.py`'s `len(prompt)` /
        // `len(response_content)`.
        let prompt_tokens = prompt.chars().count() as u64;
        let completion_tokens = reply_text.chars().count() as u64;

        messages.push(ChatMessage::assistant(reply_text.clone()));
        self.histories.lock().unwrap().insert(history_key, messages);

        let _ = observer.record_private(
            context.player_position,
            json!({
                "round": context.round,
                "prompt": prompt,
                "reply": reply_text,
            }),
        );
        let _ = observer.record(
            EventType::Tokens,
            json!({
                "player": context.player_position,
                "round": context.round,
                "prompt_tokens": prompt_tokens,
                "completion_tokens": completion_tokens,
            }),
        );

        Ok(reply_text)
    }

    fn check_and_increment_quota(&self, context: &CallContext) -> anyhow::Result<()> {
        let mut counts = self.call_counts.lock().unwrap();
        let entry = counts
            .entry((context.battle_id.clone(), context.player_position))
            .or_insert_with(|| RoundCallCount {
                round: context.round,
                count: 0,
            });
        if entry.round != context.round {
            entry.round = context.round;
            entry.count = 0;
        }
        if entry.count >= MAX_CALL_COUNT_PER_ROUND {
            anyhow::bail!(
                "player {} exceeded the LLM call ceiling for round {}",
                context.player_position,
                context.round
            );
        }
        entry.count += 1;
        Ok(())
    }

    async fn complete_with_retry(
        &self,
        messages: &[ChatMessage],
    ) -> anyhow::Result<crate::llm::ChatCompletionResult> {
        let mut last_error = None;
        for _ in 0..MAX_ATTEMPTS {
            let (handle, config) = self.pool.acquire();
            let attempt = tokio::time::timeout(
                CALL_TIMEOUT,
                self.client.complete(&config, messages, ChatCompletionParams::default()),
            )
            .await;
            self.pool.release(handle);

            match attempt {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(err)) => last_error = Some(err),
                Err(_) => last_error = Some(anyhow::anyhow!("LLM call timed out after {CALL_TIMEOUT:?}")),
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("LLM call failed with no recorded error")))
    }

    /// Spawns the background sweep that reclaims LLM pool handles abandoned by a crashed or
    /// buggy bot call, per `spec.md` §4.3. Call once per process, after the gateway is wrapped in
    /// an `Arc`, alongside the battle manager's own dispatcher/load-monitor tasks.
    pub fn spawn_watchdog(self: &Arc<Self>) {
        let gateway = self.clone();
        tokio::spawn(async move { Self::watchdog_loop(gateway).await });
    }

    async fn watchdog_loop(gateway: Arc<Self>) {
        loop {
            tokio::time::sleep(STALE_SESSION_SWEEP_INTERVAL).await;
            let reclaimed = gateway.pool.force_release_stale();
            if reclaimed > 0 {
                log::warn!("llm gateway watchdog reclaimed {reclaimed} stale session handle(s)");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };

    use super::*;
    use crate::llm::{
        ChatCompletionResult,
        LlmClientConfig,
    };

    struct FlakyClient {
        failures_before_success: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn complete(
            &self,
            _config: &LlmClientConfig,
            _messages: &[ChatMessage],
            _params: ChatCompletionParams,
        ) -> anyhow::Result<ChatCompletionResult> {
            if self.failures_before_success.fetch_sub(1, Ordering::SeqCst) > 0 {
                anyhow::bail!("simulated transient failure");
            }
            Ok(ChatCompletionResult {
                content: "ok".to_owned(),
            })
        }
    }

    fn pool() -> LlmClientPool {
        LlmClientPool::new(vec![LlmClientConfig {
            name: "a".to_owned(),
            api_key: "key".to_owned(),
            base_url: "https://example.invalid".to_owned(),
            model: "m".to_owned(),
        }])
    }

    fn tmp_observer(tag: &str) -> Observer {
        let dir = std::env::temp_dir().join(format!("avalon-llm-gateway-test-{tag}"));
        std::fs::create_dir_all(&dir).unwrap();
        Observer::new(&dir, format!("battle-{tag}"))
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let gateway = LlmGateway::new(
            pool(),
            Arc::new(FlakyClient {
                failures_before_success: AtomicUsize::new(2),
            }),
        );
        let observer = tmp_observer("retry");
        let _guard = CallContext::enter(CallContext {
            battle_id: "battle-retry".to_owned(),
            player_position: 1,
            round: 1,
        });
        let reply = gateway.ask_llm(&observer, "hello").await.unwrap();
        assert_eq!(reply, "ok");
    }

    #[tokio::test]
    async fn exceeding_round_quota_is_fatal() {
        let gateway = LlmGateway::new(
            pool(),
            Arc::new(FlakyClient {
                failures_before_success: AtomicUsize::new(0),
            }),
        );
        let observer = tmp_observer("quota");
        let _guard = CallContext::enter(CallContext {
            battle_id: "battle-quota".to_owned(),
            player_position: 2,
            round: 1,
        });
        for _ in 0..MAX_CALL_COUNT_PER_ROUND {
            gateway.ask_llm(&observer, "hi").await.unwrap();
        }
        assert!(gateway.ask_llm(&observer, "one too many").await.is_err());
    }

    #[tokio::test]
    async fn rejecting_proposal_resets_quota_for_the_round() {
        let gateway = LlmGateway::new(
            pool(),
            Arc::new(FlakyClient {
                failures_before_success: AtomicUsize::new(0),
            }),
        );
        let observer = tmp_observer("reset");
        {
            let _guard = CallContext::enter(CallContext {
                battle_id: "battle-reset".to_owned(),
                player_position: 3,
                round: 1,
            });
            for _ in 0..MAX_CALL_COUNT_PER_ROUND {
                gateway.ask_llm(&observer, "hi").await.unwrap();
            }
        }
        gateway.reset_round("battle-reset", 3, 1);
        let _guard = CallContext::enter(CallContext {
            battle_id: "battle-reset".to_owned(),
            player_position: 3,
            round: 1,
        });
        assert!(gateway.ask_llm(&observer, "still allowed").await.is_ok());
    }

    #[test]
    fn ask_llm_outside_context_is_an_error() {
        assert!(CallContext::current().is_err());
    }

    #[tokio::test]
    async fn tokens_event_counts_characters_not_provider_usage() {
        let gateway = LlmGateway::new(
            pool(),
            Arc::new(FlakyClient {
                failures_before_success: AtomicUsize::new(0),
            }),
        );
        let observer = tmp_observer("char-count");
        let _guard = CallContext::enter(CallContext {
            battle_id: "battle-char-count".to_owned(),
            player_position: 4,
            round: 1,
        });
        gateway.ask_llm(&observer, "hello").await.unwrap();

        let tokens_event = observer
            .drain_snapshots()
            .into_iter()
            .find(|record| record.event_type == EventType::Tokens)
            .expect("a Tokens event was recorded");
        // FlakyClient always replies "ok": prompt="hello" (5 chars), reply="ok" (2 chars).
        assert_eq!(tokens_event.event_data["prompt_tokens"], 5);
        assert_eq!(tokens_event.event_data["completion_tokens"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_reclaims_a_handle_abandoned_past_the_stale_age() {
        let pool = pool();
        let (_handle, _config) = pool.acquire();
        // Never released: simulates a bot call that crashed mid-flight.

        let gateway = Arc::new(LlmGateway::new(
            pool,
            Arc::new(FlakyClient {
                failures_before_success: AtomicUsize::new(0),
            }),
        ));
        gateway.spawn_watchdog();

        tokio::time::advance(LlmClientPool::STALE_SESSION_AGE + STALE_SESSION_SWEEP_INTERVAL).await;
        // Let the watchdog task actually run at its now-elapsed sleep deadline.
        tokio::task::yield_now().await;

        // If the watchdog already reclaimed the abandoned handle, nothing is left to find.
        assert_eq!(gateway.pool.force_release_stale(), 0);
    }
}
