// SPDX-License-Identifier: GPL-3.0-only

//! Camera observer registry
//!
//! Independent UI panels register a [`CameraObserver`] to follow
//! configuration and availability changes. Every hook is optional; the
//! default implementation means "not interested". Fan-out runs in
//! registration order and one misbehaving observer never stops the others.

use crate::backends::camera::types::CameraConfig;
use crate::errors::{ObserverError, panic_message};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error};

/// Asynchronous part of an observer hook
pub type ObserverFuture = BoxFuture<'static, Result<(), ObserverError>>;

/// Receiver of camera configuration and availability changes
pub trait CameraObserver: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "camera-observer"
    }

    /// A configuration is about to be attempted
    fn on_trying_new_config(&self, _config: &CameraConfig) -> Option<ObserverFuture> {
        None
    }

    /// A configuration was realized; availability flips only after the
    /// returned future completes
    fn on_update_config(&self, _config: &CameraConfig) -> Option<ObserverFuture> {
        None
    }

    fn on_camera_available(&self) -> Result<(), ObserverError> {
        Ok(())
    }

    fn on_camera_unavailable(&self) -> Result<(), ObserverError> {
        Ok(())
    }
}

/// Handle returned by [`ObserverRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Entry = (ObserverId, Arc<dyn CameraObserver>);

/// Publish/subscribe fan-out for camera observers
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer; it is notified after all previously registered ones
    pub fn register(&self, observer: Arc<dyn CameraObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(observer = observer.name(), ?id, "Registering camera observer");
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Remove an observer; returns false if it was not registered
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(entry_id, _)| *entry_id != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Observers are called outside the lock so they may (un)register
    fn snapshot(&self) -> Vec<Entry> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn trying_new_config(&self, config: &CameraConfig) {
        self.fan_out_async("on_trying_new_config", |observer| {
            observer.on_trying_new_config(config)
        })
        .await;
    }

    /// Notify a realized configuration and wait for every observer update
    pub async fn update_config(&self, config: &CameraConfig) {
        self.fan_out_async("on_update_config", |observer| observer.on_update_config(config))
            .await;
    }

    pub fn camera_available(&self) {
        self.fan_out_sync("on_camera_available", |observer| {
            observer.on_camera_available()
        });
    }

    pub fn camera_unavailable(&self) {
        self.fan_out_sync("on_camera_unavailable", |observer| {
            observer.on_camera_unavailable()
        });
    }

    fn fan_out_sync<F>(&self, hook: &'static str, call: F)
    where
        F: Fn(&dyn CameraObserver) -> Result<(), ObserverError>,
    {
        for (_, observer) in self.snapshot() {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| call(observer.as_ref())))
                .unwrap_or_else(|payload| {
                    Err(ObserverError::Panicked(panic_message(payload.as_ref())))
                });
            if let Err(err) = result {
                error!(observer = observer.name(), hook, error = %err, "Camera observer failed");
            }
        }
    }

    async fn fan_out_async<F>(&self, hook: &'static str, call: F)
    where
        F: Fn(&dyn CameraObserver) -> Option<ObserverFuture>,
    {
        let mut pending: Vec<BoxFuture<'static, ()>> = Vec::new();

        // Synchronous parts run in registration order before anything is awaited
        for (_, observer) in self.snapshot() {
            let name = observer.name().to_string();
            match std::panic::catch_unwind(AssertUnwindSafe(|| call(observer.as_ref()))) {
                Ok(Some(future)) => pending.push(
                    AssertUnwindSafe(future)
                        .catch_unwind()
                        .map(move |result| {
                            let result = result.unwrap_or_else(|payload| {
                                Err(ObserverError::Panicked(panic_message(payload.as_ref())))
                            });
                            if let Err(err) = result {
                                error!(observer = %name, hook, error = %err, "Camera observer failed");
                            }
                        })
                        .boxed(),
                ),
                Ok(None) => {}
                Err(payload) => {
                    let err = ObserverError::Panicked(panic_message(payload.as_ref()));
                    error!(observer = %name, hook, error = %err, "Camera observer failed");
                }
            }
        }

        join_all(pending).await;
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{CaptureMode, Facing};
    use std::sync::Mutex;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        tag: &'static str,
        log: Log,
        fail: bool,
        delay: Option<Duration>,
    }

    impl Recorder {
        fn new(tag: &'static str, log: &Log) -> Arc<Self> {
            Arc::new(Self {
                tag,
                log: Arc::clone(log),
                fail: false,
                delay: None,
            })
        }
    }

    impl CameraObserver for Recorder {
        fn name(&self) -> &str {
            self.tag
        }

        fn on_update_config(&self, config: &CameraConfig) -> Option<ObserverFuture> {
            let log = Arc::clone(&self.log);
            let tag = self.tag;
            let device = config.device_id.clone();
            let delay = self.delay;
            let fail = self.fail;
            Some(
                async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    if fail {
                        return Err(ObserverError::from("update failed"));
                    }
                    log.lock().unwrap().push(format!("{}:update:{}", tag, device));
                    Ok(())
                }
                .boxed(),
            )
        }

        fn on_camera_available(&self) -> Result<(), ObserverError> {
            if self.fail {
                panic!("observer exploded");
            }
            self.log.lock().unwrap().push(format!("{}:available", self.tag));
            Ok(())
        }
    }

    /// Implements nothing; every hook falls back to the default
    struct Silent;
    impl CameraObserver for Silent {}

    fn config() -> CameraConfig {
        CameraConfig {
            device_id: "cam".to_string(),
            facing: Facing::User,
            mode: CaptureMode::Photo,
        }
    }

    #[test]
    fn test_sync_fan_out_in_registration_order() {
        let log: Log = Arc::default();
        let registry = ObserverRegistry::new();
        registry.register(Recorder::new("a", &log));
        registry.register(Arc::new(Silent));
        registry.register(Recorder::new("b", &log));

        registry.camera_available();
        registry.camera_unavailable();

        assert_eq!(*log.lock().unwrap(), vec!["a:available", "b:available"]);
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        let log: Log = Arc::default();
        let registry = ObserverRegistry::new();
        registry.register(Arc::new(Recorder {
            tag: "bad",
            log: Arc::clone(&log),
            fail: true,
            delay: None,
        }));
        registry.register(Recorder::new("good", &log));

        registry.camera_available();

        assert_eq!(*log.lock().unwrap(), vec!["good:available"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_config_awaits_all_updates() {
        let log: Log = Arc::default();
        let registry = ObserverRegistry::new();
        registry.register(Arc::new(Recorder {
            tag: "slow",
            log: Arc::clone(&log),
            fail: false,
            delay: Some(Duration::from_millis(500)),
        }));
        registry.register(Arc::new(Recorder {
            tag: "broken",
            log: Arc::clone(&log),
            fail: true,
            delay: None,
        }));
        registry.register(Recorder::new("fast", &log));

        registry.update_config(&config()).await;

        // Fast completes first, slow is still awaited, broken is skipped
        assert_eq!(*log.lock().unwrap(), vec!["fast:update:cam", "slow:update:cam"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_config_runs_on_spawned_task() {
        let log: Log = Arc::default();
        let registry = Arc::new(ObserverRegistry::new());
        registry.register(Arc::new(Recorder {
            tag: "spawned",
            log: Arc::clone(&log),
            fail: false,
            delay: Some(Duration::from_millis(10)),
        }));

        // The controller drives fan-out from spawned attempt tasks
        let task = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let config = config();
                registry.trying_new_config(&config).await;
                registry.update_config(&config).await;
            })
        };
        task.await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["spawned:update:cam"]);
    }

    #[test]
    fn test_unregister() {
        let log: Log = Arc::default();
        let registry = ObserverRegistry::new();
        let a = registry.register(Recorder::new("a", &log));
        registry.register(Recorder::new("b", &log));

        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));
        assert_eq!(registry.len(), 1);

        registry.camera_available();
        assert_eq!(*log.lock().unwrap(), vec!["b:available"]);
    }
}
