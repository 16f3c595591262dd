//! Engine lifecycle and hot reload.
//!
//! The container owns exactly one [`EngineHandle`] at a time. Requests read
//! the current handle once at dispatch and keep it to completion, so a
//! reload never transplants an in-flight request onto the new engine. The
//! swap is a single atomic publish; readers never take a lock.

use crate::engine::{Engine, EngineFactory};
use crate::error::ServerError;
use crate::options::ServerOptions;
use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::info;

/// One immutable engine instance plus the options snapshot it was built from.
pub struct EngineHandle {
    engine: Arc<dyn Engine>,
    options: Arc<ServerOptions>,
}

impl EngineHandle {
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn options(&self) -> &Arc<ServerOptions> {
        &self.options
    }
}

/// Holds the current engine handle and rebuilds it on reload.
pub struct Container {
    factory: Arc<dyn EngineFactory>,
    current: ArcSwap<EngineHandle>,
}

impl Container {
    /// Build the first engine handle from `options`.
    ///
    /// At least one resource package must be configured; an empty package
    /// list is a fatal configuration error surfaced here, at startup, not
    /// per-request.
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        options: ServerOptions,
    ) -> Result<Self, ServerError> {
        let handle = build_handle(factory.as_ref(), options)?;
        Ok(Self {
            factory,
            current: ArcSwap::from_pointee(handle),
        })
    }

    /// Current engine handle.
    ///
    /// Callers keep the returned handle for the whole request; a concurrent
    /// reload does not affect them.
    pub fn handle(&self) -> Arc<EngineHandle> {
        self.current.load_full()
    }

    /// Options snapshot embedded in the current handle.
    pub fn configuration(&self) -> Arc<ServerOptions> {
        self.current.load().options.clone()
    }

    /// Rebuild the engine from the current configuration and publish it.
    pub fn reload(&self) -> Result<(), ServerError> {
        let options = self.configuration().as_ref().clone();
        self.reload_with(options)
    }

    /// Build a new engine handle from `options` and publish it atomically.
    ///
    /// On failure the previous handle stays current and keeps serving.
    pub fn reload_with(&self, options: ServerOptions) -> Result<(), ServerError> {
        let handle = build_handle(self.factory.as_ref(), options)?;
        self.current.store(Arc::new(handle));
        info!("engine reloaded; new handle published");
        Ok(())
    }
}

fn build_handle(
    factory: &dyn EngineFactory,
    options: ServerOptions,
) -> Result<EngineHandle, ServerError> {
    let packages = options.packages();
    if packages.is_empty() {
        return Err(ServerError::Configuration(
            "no resource packages configured".to_string(),
        ));
    }
    let engine = factory
        .build(&options)
        .map_err(|e| ServerError::Configuration(format!("engine factory failed: {e}")))?;
    info!(packages = ?packages, "engine handle built");
    Ok(EngineHandle {
        engine,
        options: Arc::new(options),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Completion, Dispatch, FnEngine};
    use crate::http::{BridgeRequest, BridgeResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_factory(builds: Arc<AtomicUsize>) -> Arc<dyn EngineFactory> {
        Arc::new(move |_opts: &ServerOptions| {
            let generation = builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FnEngine::new(
                move |_req: BridgeRequest, _c: Completion| {
                    Dispatch::Done(BridgeResponse::json(
                        200,
                        &serde_json::json!({ "generation": generation }),
                    ))
                },
            )) as Arc<dyn Engine>)
        })
    }

    fn options_with_package() -> ServerOptions {
        let mut opts = ServerOptions::default();
        opts.add_package("app.resources");
        opts
    }

    #[test]
    fn test_init_requires_a_resource_package() {
        let builds = Arc::new(AtomicUsize::new(0));
        let err = Container::new(counting_factory(builds.clone()), ServerOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Configuration(_)));
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reload_publishes_a_new_handle() {
        let builds = Arc::new(AtomicUsize::new(0));
        let container =
            Container::new(counting_factory(builds.clone()), options_with_package()).unwrap();
        let before = container.handle();
        container.reload().unwrap();
        let after = container.handle();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_reload_keeps_the_previous_handle() {
        let builds = Arc::new(AtomicUsize::new(0));
        let container =
            Container::new(counting_factory(builds.clone()), options_with_package()).unwrap();
        let before = container.handle();
        // Reloading into a configuration with no packages must not publish.
        let err = container.reload_with(ServerOptions::default()).err().unwrap();
        assert!(matches!(err, ServerError::Configuration(_)));
        assert!(Arc::ptr_eq(&before, &container.handle()));
    }

    #[test]
    fn test_configuration_returns_the_snapshot() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut opts = options_with_package();
        opts.port = 9090;
        let container = Container::new(counting_factory(builds), opts).unwrap();
        assert_eq!(container.configuration().port, 9090);
    }
}
