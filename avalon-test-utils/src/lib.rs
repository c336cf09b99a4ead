mod ai_code_resolver;
mod battle_store;
mod event_assertions;
mod fixtures;
mod scripted_bot;
mod status_checker;

pub use ai_code_resolver::FakeAiCodeResolver;
pub use battle_store::InMemoryBattleStore;
pub use event_assertions::{
    assert_event_emitted,
    assert_event_not_emitted,
    events_of_type,
    first_event_of_type,
};
pub use fixtures::{
    seeded_prng,
    seven_roles,
};
pub use scripted_bot::{
    FailingBot,
    ScriptedBot,
};
pub use status_checker::{
    FixedStatusChecker,
    FlipAfterNCallsStatusChecker,
};
