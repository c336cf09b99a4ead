use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Mutex,
};

use anyhow::Result;
use async_trait::async_trait;
use avalon_data::AiCodeResolver;
use uuid::Uuid;

/// An [`AiCodeResolver`] backed by an in-memory map, for tests that never touch the filesystem.
#[derive(Default)]
pub struct FakeAiCodeResolver {
    paths: Mutex<HashMap<Uuid, PathBuf>>,
}

impl FakeAiCodeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ai_code_id: Uuid, path: PathBuf) {
        self.paths.lock().unwrap().insert(ai_code_id, path);
    }
}

#[async_trait]
impl AiCodeResolver for FakeAiCodeResolver {
    async fn path_for(&self, ai_code_id: Uuid) -> Result<Option<PathBuf>> {
        Ok(self.paths.lock().unwrap().get(&ai_code_id).cloned())
    }
}
