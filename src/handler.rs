use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

/// A job implementation. `set_up` runs before `perform`; `tear_down` runs
/// after it whenever `set_up` succeeded, even if `perform` failed. Any error
/// from the three marks the job failed.
#[async_trait]
pub trait JobHandler: Send {
    async fn set_up(&mut self, _args: &Value) -> Result<()> {
        Ok(())
    }

    async fn perform(&mut self, args: &Value) -> Result<()>;

    async fn tear_down(&mut self, _args: &Value) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn JobHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn JobHandler")
    }
}

type HandlerFactory = Box<dyn Fn() -> Box<dyn JobHandler> + Send + Sync>;

/// Maps the handler name carried in a payload to a factory that builds a
/// fresh handler instance per execution. Payloads naming an unregistered
/// handler fail with [`Error::UnknownHandler`] and go to the failure backend
/// like any other failed job.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: Arc<RwLock<HashMap<String, HandlerFactory>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, H>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: JobHandler + 'static,
    {
        let mut factories = match self.factories.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        factories.insert(name.into(), Box::new(move || Box::new(factory())));
    }

    pub fn resolve(&self, name: &str) -> Result<Box<dyn JobHandler>> {
        let factories = match self.factories.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownHandler(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        match self.factories.read() {
            Ok(guard) => guard.contains_key(name),
            Err(poisoned) => poisoned.into_inner().contains_key(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for CountingJob {
        async fn perform(&mut self, _args: &Value) -> Result<()> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn resolve_builds_a_fresh_instance() {
        let registry = HandlerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = counter.clone();
            registry.register("CountingJob", move || CountingJob {
                counter: counter.clone(),
            });
        }
        assert!(registry.contains("CountingJob"));

        let mut handler = registry.resolve("CountingJob").unwrap();
        handler.perform(&Value::Null).await.unwrap();
        let mut another = registry.resolve("CountingJob").unwrap();
        another.perform(&Value::Null).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_handler_is_an_error() {
        let registry = HandlerRegistry::new();
        let err = registry.resolve("Nope").unwrap_err();
        assert!(matches!(err, Error::UnknownHandler(name) if name == "Nope"));
        assert!(!registry.contains("Nope"));
    }

    #[tokio::test]
    async fn default_set_up_and_tear_down_are_noops() {
        struct Bare;
        #[async_trait]
        impl JobHandler for Bare {
            async fn perform(&mut self, _args: &Value) -> Result<()> {
                Ok(())
            }
        }
        let mut bare = Bare;
        bare.set_up(&Value::Null).await.unwrap();
        bare.perform(&Value::Null).await.unwrap();
        bare.tear_down(&Value::Null).await.unwrap();
    }
}
