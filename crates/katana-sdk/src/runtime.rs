use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use katana_frame::{FrameConfig, FrameReader, FrameWriter, RequestFrame};
use katana_payload::{codec, FieldNames, Map, PathDocument, Value};
use katana_transport::{connect, Endpoint};
use tracing::debug;

use crate::error::{Result, SdkError};
use crate::file::{files_to_value, File};
use crate::param::Param;

/// Action name used for runtime call requests.
pub const RUNTIME_CALL: &str = "runtime-call";

const KTP_SCHEME: &str = "ktp://";

/// An immediate call to another service, made from inside an action.
#[derive(Debug, Clone)]
pub struct RuntimeCall {
    /// Name of the calling action.
    pub action: String,
    pub service: String,
    pub version: String,
    pub target_action: String,
    /// The caller's transport at the time of the call.
    pub transport: Map,
    pub params: Vec<Param>,
    pub files: Vec<File>,
    pub timeout: Option<Duration>,
}

impl RuntimeCall {
    /// Command document sent to the runtime.
    pub fn to_command(&self, names: Option<&FieldNames>) -> Result<PathDocument> {
        let mut command = PathDocument::from_map(Map::new(), names.cloned());
        command.set("command/name", RUNTIME_CALL)?;
        command.set("command/arguments/action", self.action.as_str())?;
        command.set(
            "command/arguments/callee",
            vec![
                Value::from(self.service.as_str()),
                Value::from(self.version.as_str()),
                Value::from(self.target_action.as_str()),
            ],
        )?;
        command.set("command/arguments/transport", self.transport.clone())?;
        if !self.params.is_empty() {
            let params: Vec<Value> = self.params.iter().map(|p| p.to_value(names)).collect();
            command.set("command/arguments/params", params)?;
        }
        if !self.files.is_empty() {
            command.set("command/arguments/files", files_to_value(&self.files, names))?;
        }
        if let Some(timeout) = self.timeout {
            let millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
            command.set("command/arguments/timeout", millis)?;
        }
        Ok(command)
    }
}

/// What a runtime call returns: the callee's transport and return value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeReply {
    pub transport: Map,
    pub return_value: Value,
}

impl RuntimeReply {
    /// Read a `command_reply` document.
    pub fn from_reply(reply: &PathDocument) -> Result<Self> {
        if let Some(message) = reply
            .get("command_reply/result/error/message")
            .and_then(Value::as_str)
        {
            return Err(SdkError::Runtime(message.to_string()));
        }
        let transport = reply
            .get("command_reply/result/transport")
            .and_then(Value::as_map)
            .cloned()
            .ok_or_else(|| SdkError::Runtime("reply without a transport".to_string()))?;
        let return_value = reply
            .get("command_reply/result/return")
            .cloned()
            .unwrap_or_default();
        Ok(Self {
            transport,
            return_value,
        })
    }
}

/// Performs runtime calls on behalf of actions.
pub trait RuntimeCaller: Send + Sync {
    /// Run `call` through the gateway at `gateway`.
    fn call(&self, gateway: &str, call: &RuntimeCall) -> Result<RuntimeReply>;
}

/// A [`RuntimeCaller`] that sends each call as a frame over a fresh
/// connection to the gateway's internal address.
#[derive(Debug)]
pub struct SocketRuntimeCaller {
    names: Option<FieldNames>,
    frame_config: FrameConfig,
    next_id: AtomicU32,
}

impl SocketRuntimeCaller {
    pub fn new(names: Option<FieldNames>) -> Self {
        Self {
            names,
            frame_config: FrameConfig::default(),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn with_frame_config(mut self, config: FrameConfig) -> Self {
        self.frame_config = config;
        self
    }
}

impl RuntimeCaller for SocketRuntimeCaller {
    fn call(&self, gateway: &str, call: &RuntimeCall) -> Result<RuntimeReply> {
        let endpoint: Endpoint = match gateway.strip_prefix(KTP_SCHEME) {
            Some(address) => format!("tcp://{address}").parse()?,
            None => gateway.parse()?,
        };
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut config = self.frame_config.clone();
        if call.timeout.is_some() {
            config.read_timeout = call.timeout;
        }

        let stream = connect(&endpoint)?;
        let reader_stream = stream.try_clone()?;
        let mut writer = FrameWriter::with_config_ipc(stream, config.clone())?;
        let mut reader = FrameReader::with_config_ipc(reader_stream, config)?;

        let command = codec::pack_document(&call.to_command(self.names.as_ref())?)?;
        let request = RequestFrame::new(request_id, RUNTIME_CALL, command);
        writer.write_request(&request)?;
        debug!(
            %endpoint,
            request_id,
            service = %call.service,
            version = %call.version,
            action = %call.target_action,
            "runtime call sent"
        );

        let response = reader.read_response()?;
        if response.request_id != request_id {
            return Err(SdkError::Runtime(format!(
                "reply for request {} while waiting for {request_id}",
                response.request_id
            )));
        }
        let reply = codec::unpack_document(&response.result, self.names.clone())?;
        RuntimeReply::from_reply(&reply)
    }
}
