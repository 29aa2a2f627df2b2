use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use katana_frame::{RequestFrame, ResponseFrame, ResponseMeta};
use katana_payload::{codec, wire_map, FieldNames, Map, Path, PathDocument, Value};
use tracing::{debug, error, warn};

use crate::action::Action;
use crate::component::{ActionHandler, Handler, MiddlewareHandler};
use crate::context::{log_string, Context};
use crate::error::{HandlerError, Result, SdkError};
use crate::middleware::{self, Exchange};
use crate::param::Param;
use crate::transport::Transport;

/// Reply text when a frame cannot be handled at all.
pub const FRAME_FAILED: &str = "Failed to handle request";

/// Reply text when the command payload cannot be read.
pub const COMMUNICATION_FAILED: &str = "Internal communication failed";

/// Reply text when a handler panics.
pub const COMPONENT_FAILED: &str = "Component failed";

/// A processed request, ready to be framed.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub meta: ResponseMeta,
    /// The `{command_reply: ...}` document.
    pub document: Value,
}

impl Reply {
    /// An error reply: `{command_reply: {result: {error: {...}}}}`.
    pub fn error(names: Option<&FieldNames>, message: &str) -> Self {
        let err = HandlerError::new(message);
        let error = wire_map(
            names,
            [
                ("message", Value::from(err.message)),
                ("code", Value::from(err.code)),
                ("status", Value::from(err.status)),
            ],
        );
        let result = wire_map(names, [("error", error)]);
        Self {
            meta: ResponseMeta::empty(),
            document: wire_map(names, [("command_reply", wire_map(names, [("result", result)]))]),
        }
    }

    fn success(names: Option<&FieldNames>, meta: ResponseMeta, name: &str, result: Value) -> Self {
        let reply = wire_map(names, [("name", Value::from(name)), ("result", result)]);
        Self {
            meta,
            document: wire_map(names, [("command_reply", reply)]),
        }
    }

    /// Encode as a response frame.
    pub fn into_frame(self, request_id: u32, names: Option<&FieldNames>) -> ResponseFrame {
        match codec::pack(&self.document) {
            Ok(result) => ResponseFrame::new(request_id, self.meta, result),
            Err(err) => {
                error!(request_id, error = %err, "failed to encode reply");
                let fallback = Reply::error(names, FRAME_FAILED);
                let result = codec::pack(&fallback.document).unwrap_or_default();
                ResponseFrame::new(request_id, fallback.meta, result)
            }
        }
    }
}

/// Turns requests into replies by running the component's handlers.
///
/// Every failure is reported as an error reply, never returned.
#[derive(Debug, Clone)]
pub struct Processor {
    context: Arc<Context>,
}

impl Processor {
    pub fn new(context: Arc<Context>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    fn names(&self) -> Option<&FieldNames> {
        self.context.field_names()
    }

    /// Handle one request frame.
    pub fn process_frame(&self, request: &RequestFrame) -> ResponseFrame {
        let reply = self.process_request(request);
        reply.into_frame(request.request_id, self.names())
    }

    fn process_request(&self, request: &RequestFrame) -> Reply {
        if let Some(mappings) = &request.mappings {
            if let Err(err) = self.context.registry().update_from_bytes(mappings) {
                warn!(request_id = request.request_id, error = %err, "failed to update schema mappings");
            }
        }

        if !self.context.component().has_action(&request.action) {
            return self.invalid_action(&request.action);
        }

        match codec::unpack_document(&request.command, self.names().cloned()) {
            Ok(command) => self.process(&request.action, &command),
            Err(err) => {
                error!(request_id = request.request_id, error = %err, "failed to unpack command");
                Reply::error(self.names(), COMMUNICATION_FAILED)
            }
        }
    }

    /// Run the handler for `action` on an unpacked command document.
    pub fn process(&self, action: &str, command: &PathDocument) -> Reply {
        let Some(handler) = self.context.component().handler(action) else {
            return self.invalid_action(action);
        };

        let Some(arguments) = command.get("command/arguments").and_then(Value::as_map) else {
            error!(action, "command has no arguments");
            return Reply::error(self.names(), COMMUNICATION_FAILED);
        };
        let arguments = PathDocument::from_map(arguments.clone(), self.names().cloned());
        let name = command
            .get("command/name")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if self.context.is_debug() {
            let arguments = log_string(&Value::Map(arguments.as_map().clone()));
            debug!(action, %arguments, "processing command");
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match handler {
            Handler::Action(handler) => self.run_action(handler.as_ref(), action, &arguments),
            Handler::Middleware(handler) => self.run_middleware(handler.as_ref(), action, &arguments),
        }));

        match outcome {
            Ok(Ok((meta, result))) => Reply::success(self.names(), meta, name, result),
            Ok(Err(err)) => {
                error!(action, error = %err, "failed to process command");
                Reply::error(self.names(), COMMUNICATION_FAILED)
            }
            Err(payload) => {
                let err = SdkError::Panic(panic_message(payload.as_ref()));
                error!(action, error = %err, "handler panicked");
                self.context.component().report_error(&err);
                Reply::error(self.names(), COMPONENT_FAILED)
            }
        }
    }

    fn invalid_action(&self, action: &str) -> Reply {
        let message = format!(
            "Invalid action for component \"{}\" (\"{}\"): \"{action}\"",
            self.context.name(),
            self.context.version()
        );
        warn!(action, "{message}");
        Reply::error(self.names(), &message)
    }

    fn run_action(
        &self,
        handler: &ActionHandler,
        action: &str,
        arguments: &PathDocument,
    ) -> Result<(ResponseMeta, Value)> {
        let names = self.names();
        let transport = match arguments.get("transport") {
            Some(value) => Transport::from_value(value.clone(), names.cloned())?,
            None => Transport::new(names.cloned()),
        };
        let params = arguments
            .get("params")
            .and_then(Value::as_array)
            .map(|params| {
                params
                    .iter()
                    .map(|param| Param::from_value(param, names))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let mut api = Action::new(Arc::clone(&self.context), action, transport.clone(), params);
        let (transport, return_value) = match handler(&mut api) {
            Ok(()) => api.into_parts(),
            Err(err) => {
                error!(action, error = %err, "action failed");
                self.context.component().report_error(&err);
                // Changes made before the failure are dropped.
                let mut transport = transport;
                let address = transport.gateway_address().to_string();
                transport.push_error(
                    &address,
                    self.context.name(),
                    self.context.version(),
                    &err.to_handler_error(),
                )?;
                (transport, None)
            }
        };

        let meta = transport.response_meta(self.context.name(), self.context.version());
        let mut result = PathDocument::from_map(Map::new(), names.cloned());
        result.set("transport", transport.into_value())?;
        if let Some(value) = return_value {
            result.set(Path::default().raw("return"), value)?;
        }
        Ok((meta, result.into_value()))
    }

    fn run_middleware(
        &self,
        handler: &MiddlewareHandler,
        action: &str,
        arguments: &PathDocument,
    ) -> Result<(ResponseMeta, Value)> {
        let names = self.names();
        let exchange = Exchange::from_arguments(Arc::clone(&self.context), arguments)?;
        let version = exchange.http_version().to_string();

        let result = match handler(exchange) {
            Ok(exchange) => exchange.to_value(names)?,
            Err(err) => {
                error!(action, error = %err, "middleware failed");
                self.context.component().report_error(&err);
                middleware::error_response(&version, &err.to_handler_error().message, names)?
            }
        };
        Ok((ResponseMeta::empty(), result))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
