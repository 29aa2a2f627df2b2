//! Runtime for KATANA services and middlewares.
//!
//! A [`Component`] registers named handlers. The [`Dispatcher`] accepts
//! framed requests on the component socket, runs each handler on a worker
//! pool under a time budget and writes back a framed reply whose metadata
//! flags describe what the reply carries.
//!
//! Service handlers work on an [`Action`], a view over the request's
//! [`Transport`] document. Middleware handlers receive an [`Exchange`].

pub mod action;
pub mod component;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod file;
pub mod middleware;
pub mod param;
pub mod pool;
pub mod processor;
pub mod runtime;
pub mod transport;

pub use action::Action;
pub use component::{Component, ComponentKind, Handler};
pub use config::{DispatcherConfig, DEFAULT_TIMEOUT};
pub use context::{log_string, ComponentInfo, Context};
pub use dispatcher::{Dispatcher, StopHandle};
pub use error::{HandlerError, Result, SdkError, DEFAULT_ERROR_STATUS};
pub use file::File;
pub use middleware::{Exchange, HttpRequest, HttpResponse, Request, Response};
pub use param::{Param, ParamType};
pub use pool::WorkerPool;
pub use processor::{Processor, Reply};
pub use runtime::{RuntimeCall, RuntimeCaller, RuntimeReply, SocketRuntimeCaller};
pub use transport::{TransactionKind, Transport};
