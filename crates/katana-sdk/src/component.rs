use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::action::Action;
use crate::error::{Result, SdkError};
use crate::middleware::Exchange;

/// Handler for a service action.
pub type ActionHandler = dyn Fn(&mut Action) -> Result<()> + Send + Sync;

/// Handler for a middleware action.
pub type MiddlewareHandler = dyn Fn(Exchange) -> Result<Exchange> + Send + Sync;

/// Startup and shutdown callback.
pub type LifecycleCallback = dyn Fn(&Component) -> Result<()> + Send + Sync;

/// Callback for errors raised by handlers.
pub type ErrorCallback = dyn Fn(&SdkError) -> Result<()> + Send + Sync;

/// A shared resource, downcast on read.
pub type Resource = Arc<dyn Any + Send + Sync>;

/// Kind of component, used to name its default socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Service,
    Middleware,
}

impl ComponentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Service => "service",
            ComponentKind::Middleware => "middleware",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered action handler.
#[derive(Clone)]
pub enum Handler {
    Action(Arc<ActionHandler>),
    Middleware(Arc<MiddlewareHandler>),
}

/// A service or middleware definition: action handlers, lifecycle
/// callbacks and shared resources.
///
/// ```
/// use katana_sdk::Component;
///
/// let service = Component::service().action("read", |action| {
///     action.set_property("seen", "yes")?;
///     Ok(())
/// });
/// assert!(service.has_action("read"));
/// ```
pub struct Component {
    kind: ComponentKind,
    handlers: HashMap<String, Handler>,
    startup: Option<Box<LifecycleCallback>>,
    shutdown: Option<Box<LifecycleCallback>>,
    error: Option<Box<ErrorCallback>>,
    resources: RwLock<HashMap<String, Resource>>,
}

impl Component {
    pub fn service() -> Self {
        Self::new(ComponentKind::Service)
    }

    pub fn middleware() -> Self {
        Self::new(ComponentKind::Middleware)
    }

    fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            handlers: HashMap::new(),
            startup: None,
            shutdown: None,
            error: None,
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// Register a service action handler.
    pub fn action<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Action) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .insert(name.into(), Handler::Action(Arc::new(handler)));
        self
    }

    /// Register a middleware handler.
    pub fn middleware_action<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Exchange) -> Result<Exchange> + Send + Sync + 'static,
    {
        self.handlers
            .insert(name.into(), Handler::Middleware(Arc::new(handler)));
        self
    }

    /// Run before the server starts. A failure aborts startup.
    pub fn on_startup<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Component) -> Result<()> + Send + Sync + 'static,
    {
        self.startup = Some(Box::new(callback));
        self
    }

    /// Run after the server stops.
    pub fn on_shutdown<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Component) -> Result<()> + Send + Sync + 'static,
    {
        self.shutdown = Some(Box::new(callback));
        self
    }

    /// Called with every error a handler returns or panic it raises.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SdkError) -> Result<()> + Send + Sync + 'static,
    {
        self.error = Some(Box::new(callback));
        self
    }

    /// Register a resource while building.
    pub fn with_resource<T: Any + Send + Sync>(self, name: impl Into<String>, value: T) -> Self {
        self.set_resource(name, value);
        self
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered action names, sorted.
    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn handler(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(name)
    }

    /// Store a shared resource, replacing any previous one with this name.
    pub fn set_resource<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(value));
    }

    pub fn has_resource(&self, name: &str) -> bool {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// A stored resource, if it exists and has type `T`.
    pub fn resource<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let resource = self
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| SdkError::ResourceNotFound(name.to_string()))?;
        resource.downcast::<T>().map_err(|_| {
            SdkError::invalid(format!("Resource \"{name}\" has a different type"))
        })
    }

    /// Run the startup callback, if any.
    pub fn startup(&self) -> Result<()> {
        match &self.startup {
            Some(callback) => callback(self),
            None => Ok(()),
        }
    }

    /// Run the shutdown callback, if any.
    pub fn shutdown(&self) -> Result<()> {
        match &self.shutdown {
            Some(callback) => callback(self),
            None => Ok(()),
        }
    }

    /// Report a handler error to the error callback. Callback failures are
    /// logged and dropped.
    pub fn report_error(&self, err: &SdkError) {
        if let Some(callback) = &self.error {
            if let Err(callback_err) = callback(err) {
                warn!(error = %callback_err, "error callback failed");
            }
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("kind", &self.kind)
            .field("actions", &self.action_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn registers_handlers() {
        let component = Component::service()
            .action("read", |_| Ok(()))
            .action("list", |_| Ok(()));
        assert_eq!(component.kind(), ComponentKind::Service);
        assert_eq!(component.action_names(), vec!["list", "read"]);
        assert!(matches!(component.handler("read"), Some(Handler::Action(_))));
        assert!(component.handler("write").is_none());

        let middleware = Component::middleware().middleware_action("auth", Ok);
        assert_eq!(middleware.kind().to_string(), "middleware");
        assert!(matches!(
            middleware.handler("auth"),
            Some(Handler::Middleware(_))
        ));
    }

    #[test]
    fn resources_downcast() {
        let component = Component::service().with_resource("pool", 42usize);
        assert!(component.has_resource("pool"));
        let pool = component
            .resource::<usize>("pool")
            .expect("resource should exist");
        assert_eq!(*pool, 42);

        assert!(component.resource::<String>("pool").is_err());
        let err = component
            .resource::<usize>("missing")
            .expect_err("missing resource should fail");
        assert_eq!(err.to_string(), "Resource \"missing\" not found");
    }

    #[test]
    fn lifecycle_callbacks_run() {
        let component = Component::service()
            .on_startup(|component| {
                component.set_resource("started", true);
                Ok(())
            })
            .on_shutdown(|_| Err(SdkError::invalid("shutdown failed")));
        component.startup().expect("startup should succeed");
        assert!(component.has_resource("started"));
        assert!(component.shutdown().is_err());
    }

    #[test]
    fn error_callback_failures_are_swallowed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let component = Component::service().on_error(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(SdkError::invalid("callback broke"))
        });
        component.report_error(&SdkError::invalid("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
