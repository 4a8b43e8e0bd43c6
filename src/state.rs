// Shared state management for models
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::config::Settings;
use crate::models::{parse_device, ClipDetector, ImageDetector, RobertaDetector, TextDetector};

/// A model handle that is filled exactly once, by a background loader.
pub struct ModelSlot<T: ?Sized> {
    inner: OnceLock<Arc<T>>,
}

impl<T: ?Sized> ModelSlot<T> {
    pub fn empty() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    /// Stores the loaded model. Returns false if the slot was already filled.
    pub fn fill(&self, model: Arc<T>) -> bool {
        self.inner.set(model).is_ok()
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.get().cloned()
    }

    pub fn status(&self) -> ModelStatus {
        match self.inner.get() {
            Some(_) => ModelStatus::Running,
            None => ModelStatus::Loading,
        }
    }
}

impl<T: ?Sized> Default for ModelSlot<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Loading,
    Running,
}

#[derive(Default)]
pub struct AppState {
    pub image_model: ModelSlot<dyn ImageDetector>,
    pub text_model: ModelSlot<dyn TextDetector>,
}

impl AppState {
    /// State with both models still loading.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts loading both models on the blocking pool and returns immediately.
    ///
    /// A failed load is logged and leaves its slot empty.
    pub fn spawn_loaders(self: &Arc<Self>, settings: &Settings) {
        let state = Arc::clone(self);
        let device = settings.device.clone();
        let source = settings.clip_source();
        tokio::task::spawn_blocking(move || {
            let loaded = timed_load("CLIP model", || {
                ClipDetector::load(&source, parse_device(&device)?)
            });
            if let Some(model) = loaded {
                state.image_model.fill(Arc::new(model));
            }
        });

        let state = Arc::clone(self);
        let device = settings.device.clone();
        let options = settings.text_options();
        tokio::task::spawn_blocking(move || {
            let loaded = timed_load("text model", || {
                RobertaDetector::load(&options, parse_device(&device)?)
            });
            if let Some(model) = loaded {
                state.text_model.fill(Arc::new(model));
            }
        });
    }
}

fn timed_load<T>(name: &str, load: impl FnOnce() -> anyhow::Result<T>) -> Option<T> {
    log::info!("loading {name}");
    let start = Instant::now();
    match load() {
        Ok(model) => {
            log::info!("{name} loaded in {:.1?}", start.elapsed());
            Some(model)
        }
        Err(e) => {
            log::error!("failed to load {name}: {e:#}");
            None
        }
    }
}
