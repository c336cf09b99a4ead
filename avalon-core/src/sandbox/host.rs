use std::{
    collections::BTreeMap,
    fs,
    mem,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};

use anyhow::{
    anyhow,
    Result,
};
use avalon_data::{
    Grid,
    Position,
    Role,
};
use libloading::Library;

use crate::{
    error::WrapResultError,
    sandbox::bot::AvalonBot,
};

/// Stand-in installed in a bot's slot while its real instance is on loan to a blocking task, per
/// [`BotHost::call_blocking`]. Calling into it is a programming error: the referee drives one
/// bot call at a time per position, so a slot is never read while parked.
struct UnavailableBot;

impl AvalonBot for UnavailableBot {
    fn set_player_index(&mut self, _index: u8) {}

    fn set_role_type(&mut self, _role: Role) {}

    fn pass_role_sight(&mut self, _sight: BTreeMap<String, Vec<u8>>) {}

    fn pass_map(&mut self, _grid: &Grid) {}

    fn pass_position_data(&mut self, _positions: BTreeMap<u8, Position>) {}

    fn pass_message(&mut self, _message: (u8, String)) {}

    fn pass_mission_members(&mut self, _round: u8, _members: Vec<u8>) {}

    fn decide_mission_member(&mut self, _team_size: u8) -> Result<Vec<i64>> {
        Err(anyhow!("bot is temporarily unavailable"))
    }

    fn walk(&mut self) -> Result<Vec<String>> {
        Err(anyhow!("bot is temporarily unavailable"))
    }

    fn say(&mut self) -> Result<String> {
        Err(anyhow!("bot is temporarily unavailable"))
    }

    fn mission_vote1(&mut self) -> Result<bool> {
        Err(anyhow!("bot is temporarily unavailable"))
    }

    fn mission_vote2(&mut self) -> Result<bool> {
        Err(anyhow!("bot is temporarily unavailable"))
    }

    fn assass(&mut self) -> Result<i64> {
        Err(anyhow!("bot is temporarily unavailable"))
    }
}

/// The symbol every compiled bot plugin must export.
///
/// A bot is distributed as a dynamic library exporting `create_bot`, which constructs a fresh
/// [`AvalonBot`] instance. This is the statically-typed realization of "load a user's bot
/// source by path and call fixed entry points" (`spec.md` §9's Design Note): rather than an
/// embedded interpreter, bots are compiled ahead of time against the `avalon-core::sandbox`
/// plugin interface and loaded behind it.
type CreateBotFn = unsafe fn() -> Box<dyn AvalonBot>;

struct LoadedBot {
    // Kept alive for the lifetime of the instance; dropping the library while the trait object
    // is still in use would be undefined behavior. `None` for instances constructed directly via
    // `BotHost::from_instances`, which never loads a library in the first place.
    _library: Option<Library>,
    instance: Box<dyn AvalonBot>,
}

/// Loads and owns the 7 bot instances for one battle, each in its own battle-scoped directory.
///
/// Per-battle isolation (`spec.md` §4.2): each bot's compiled source is copied into
/// `<base_dir>/<battle_id>/player_<n>/` before loading, so that two battles using the same
/// underlying `AiCode` never alias the same loaded module. The directory is purged when the
/// host is dropped.
pub struct BotHost {
    battle_dir: PathBuf,
    bots: Vec<LoadedBot>,
}

impl BotHost {
    /// Copies each of the 7 resolved bot library paths into a battle-scoped directory and loads
    /// it, invoking `create_bot` to construct a fresh instance.
    ///
    /// A missing source, a copy failure, or a missing/malformed `create_bot` symbol is a setup
    /// error (`critical_setup_error`, `spec.md` §7), not attributable to any bot.
    pub fn prepare(base_dir: &Path, battle_id: &str, sources: &[PathBuf; 7]) -> Result<Self> {
        let battle_dir = base_dir.join(battle_id);
        fs::create_dir_all(&battle_dir)
            .wrap_error_with_message("creating battle sandbox directory")?;

        let mut bots = Vec::with_capacity(7);
        for (i, source) in sources.iter().enumerate() {
            let position = i as u8 + 1;
            let player_dir = battle_dir.join(format!("player_{position}"));
            fs::create_dir_all(&player_dir)
                .wrap_error_with_message("creating per-player sandbox directory")?;
            let file_name = source
                .file_name()
                .ok_or_else(|| anyhow!("bot source for position {position} has no file name"))?;
            let dest = player_dir.join(file_name);
            fs::copy(source, &dest).wrap_error_with_message(format!(
                "copying bot source for position {position} into sandbox"
            ))?;

            let library = unsafe { Library::new(&dest) }
                .wrap_error_with_message(format!("loading bot library for position {position}"))?;
            let instance = unsafe {
                let create_bot: libloading::Symbol<CreateBotFn> = library
                    .get(b"create_bot")
                    .wrap_error_with_message(format!(
                        "resolving create_bot symbol for position {position}"
                    ))?;
                create_bot()
            };
            bots.push(LoadedBot {
                _library: Some(library),
                instance,
            });
        }

        Ok(Self { battle_dir, bots })
    }

    /// Constructs a host directly from already-instantiated bots, bypassing dynamic-library
    /// loading entirely.
    ///
    /// Used by integration tests to drive the referee against scripted `AvalonBot` fakes without
    /// compiling real plugin binaries. There is no sandbox directory to purge on drop.
    pub fn from_instances(bots: Vec<Box<dyn AvalonBot>>) -> Self {
        Self {
            battle_dir: PathBuf::new(),
            bots: bots
                .into_iter()
                .map(|instance| LoadedBot {
                    _library: None,
                    instance,
                })
                .collect(),
        }
    }

    /// Returns the bot instance at the given 1-indexed position.
    pub fn bot_mut(&mut self, position: u8) -> Option<&mut (dyn AvalonBot + 'static)> {
        self.bots
            .get_mut(position as usize - 1)
            .map(|loaded| loaded.instance.as_mut())
    }

    /// Runs `f` against the bot at `position` on a blocking thread, under a wall-clock deadline.
    ///
    /// Per `spec.md` §4.2, every bot entry point runs synchronously and must not block the
    /// referee's async loop or the worker pool's other battles; this parks the bot's instance by
    /// value into `tokio::task::spawn_blocking`, runs `f`, and hands the instance back on
    /// success. A deadline breach leaves [`UnavailableBot`] in the slot: the underlying blocking
    /// task is not cancelled (`spawn_blocking` never is), so the real instance cannot be safely
    /// reclaimed, and a breach is fatal to the whole battle regardless (`critical_player_ERROR`).
    pub async fn call_blocking<F, T>(&mut self, position: u8, deadline: Duration, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn AvalonBot) -> T + Send + 'static,
        T: Send + 'static,
    {
        let index = position as usize - 1;
        let slot = self
            .bots
            .get_mut(index)
            .ok_or_else(|| anyhow!("no bot loaded at position {position}"))?;
        let mut instance: Box<dyn AvalonBot> = mem::replace(&mut slot.instance, Box::new(UnavailableBot));

        let joined = tokio::task::spawn_blocking(move || {
            let result = f(instance.as_mut());
            (instance, result)
        });

        match tokio::time::timeout(deadline, joined).await {
            Ok(Ok((instance, result))) => {
                self.bots[index].instance = instance;
                Ok(result)
            }
            Ok(Err(join_err)) => Err(anyhow!("bot at position {position} panicked: {join_err}")),
            Err(_) => Err(anyhow!(
                "bot at position {position} exceeded its {deadline:?} call deadline"
            )),
        }
    }
}

impl Drop for BotHost {
    fn drop(&mut self) {
        if self.battle_dir.as_os_str().is_empty() {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.battle_dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "failed to purge sandbox directory {}: {err}",
                    self.battle_dir.display()
                );
            }
        }
    }
}
