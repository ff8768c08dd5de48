//! Components and their remotely callable methods.
//!
//! A [`Component`] registers an allow-list of methods once, when it is
//! published. Incoming commands are looked up by name in that table; any
//! other name is answered with a `MethodCallError` instead of reaching the
//! component.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::codec::Value;
use crate::message::Arguments;

/// Liveness check every published component answers
pub const PING: &str = "ping";

/// Graceful shutdown request every published component answers
pub const EXIT: &str = "exit";

/// Error class reported for names missing from the method table
pub const METHOD_CALL_ERROR: &str = "MethodCallError";

/// Failure of a remote method, carried back to the caller in an error box
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{class}: {message}")]
pub struct MethodError {
    pub class: String,
    pub message: String,
}

impl MethodError {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }
}

impl From<crate::Error> for MethodError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::Remote { class, message } => Self::new(class, message),
            other => Self::new(other.class_name(), other.to_string()),
        }
    }
}

pub type MethodResult = std::result::Result<Value, MethodError>;

/// A named local object whose methods are made remotely callable
#[async_trait::async_trait]
pub trait Component: Send + Sync + 'static {
    /// Stable name, the socket endpoint is derived from it
    fn name(&self) -> &str;

    /// Register the methods peers may call
    fn register(_methods: &mut Methods<Self>)
    where
        Self: Sized,
    {
    }

    /// Answer a liveness check
    async fn ping(&self) -> bool {
        true
    }

    /// Shut the component down on a peer's request
    async fn exit(&self) {}
}

type Handler<C> = Box<dyn Fn(Arc<C>, Arguments) -> BoxFuture<'static, MethodResult> + Send + Sync>;

/// Allow-list of callable methods for a component type
pub struct Methods<C> {
    handlers: HashMap<String, Handler<C>>,
}

impl<C: Component> Default for Methods<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C: Component> Methods<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method under `name`
    ///
    /// The built-in `ping` and `exit` cannot be replaced.
    pub fn add<F, Fut, T>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(Arc<C>, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, MethodError>> + Send + 'static,
        T: Into<Value> + Send + 'static,
    {
        if name == PING || name == EXIT {
            tracing::warn!("refusing to shadow built-in method '{}'", name);
            return self;
        }
        self.handlers.insert(
            name.to_string(),
            Box::new(move |component, args| {
                let fut = handler(component, args);
                Box::pin(async move { fut.await.map(Into::into) })
            }),
        );
        self
    }

    /// Registered method names, built-ins excluded
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// Server-side entry point of a connection
#[async_trait::async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, method: &str, args: Arguments) -> MethodResult;
}

/// Method table bound to one component instance
pub struct Dispatcher<C> {
    component: Arc<C>,
    methods: Methods<C>,
}

impl<C: Component> Dispatcher<C> {
    /// Build the method table of `component`
    pub fn new(component: Arc<C>) -> Self {
        let mut methods = Methods::new();
        C::register(&mut methods);
        Self { component, methods }
    }

    pub fn methods(&self) -> &Methods<C> {
        &self.methods
    }
}

#[async_trait::async_trait]
impl<C: Component> Dispatch for Dispatcher<C> {
    async fn dispatch(&self, method: &str, args: Arguments) -> MethodResult {
        match method {
            PING => Ok(Value::Bool(self.component.ping().await)),
            EXIT => {
                self.component.exit().await;
                Ok(Value::None)
            }
            _ => match self.methods.handlers.get(method) {
                Some(handler) => handler(Arc::clone(&self.component), args).await,
                None => Err(MethodError::new(
                    METHOD_CALL_ERROR,
                    format!("Forbidden method '{}' on {}", method, self.component.name()),
                )),
            },
        }
    }
}
