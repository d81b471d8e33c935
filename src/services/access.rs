//! Resolves the locator a reader should use for a file right now.

use crate::errors::EngineResult;
use crate::models::{FileObject, Tier};
use crate::stores::ObjectStore;
use std::sync::Arc;

/// Picks the tier that serves a file and asks it for a locator.
///
/// Expiring locators are never reused: anything not yet `REMOTE` gets a
/// fresh Fast-tier locator, and a `REMOTE` file gets a fresh Durable one when
/// the Durable tier presigns. Otherwise the stored `REMOTE` locator is stable
/// and returned as is.
#[derive(Clone)]
pub struct AccessResolver {
    fast: Arc<dyn ObjectStore>,
    durable: Arc<dyn ObjectStore>,
}

impl AccessResolver {
    pub fn new(fast: Arc<dyn ObjectStore>, durable: Arc<dyn ObjectStore>) -> Self {
        Self { fast, durable }
    }

    pub async fn resolve(&self, file: &FileObject) -> EngineResult<String> {
        match file.tier {
            Tier::Remote if self.durable.locators_expire() => {
                Ok(self.durable.url_for(&file.object_key).await?)
            }
            Tier::Remote => Ok(file.access_locator.clone()),
            // The Fast copy stays authoritative until commit.
            Tier::Local | Tier::Syncing => Ok(self.fast.url_for(&file.object_key).await?),
        }
    }

    /// Copy of `file` with `access_locator` replaced by a fresh one.
    pub async fn with_fresh_locator(&self, mut file: FileObject) -> EngineResult<FileObject> {
        file.access_locator = self.resolve(&file).await?;
        Ok(file)
    }
}
