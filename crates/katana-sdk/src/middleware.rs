use std::collections::BTreeMap;
use std::sync::Arc;

use katana_payload::{FieldNames, Map, Path, PathDocument, Value};

use crate::context::Context;
use crate::error::{Result, SdkError, DEFAULT_ERROR_STATUS};
use crate::param::{Param, ParamType};
use crate::transport::Transport;

/// `meta/type` of a request middleware call.
pub const REQUEST_MIDDLEWARE: i64 = 1;

/// `meta/type` of a response middleware call.
pub const RESPONSE_MIDDLEWARE: i64 = 2;

/// Protocol reported by HTTP gateways.
pub const HTTP_PROTOCOL: &str = "urn:katana:protocol:http";

const DEFAULT_HTTP_VERSION: &str = "1.1";

/// Multi-valued HTTP fields: headers, query and post parameters.
pub type MultiMap = BTreeMap<String, Vec<String>>;

/// What a middleware handler receives and returns.
#[derive(Debug)]
pub enum Exchange {
    Request(Request),
    Response(Response),
}

impl Exchange {
    /// Build from `command/arguments`, selecting the kind by `meta/type`.
    pub fn from_arguments(context: Arc<Context>, arguments: &PathDocument) -> Result<Self> {
        match arguments.get("meta/type").and_then(Value::as_i64) {
            Some(REQUEST_MIDDLEWARE) => Ok(Exchange::Request(Request::from_arguments(context, arguments)?)),
            Some(RESPONSE_MIDDLEWARE) => Ok(Exchange::Response(Response::from_arguments(context, arguments)?)),
            other => Err(SdkError::invalid(format!(
                "Invalid middleware type: {}",
                other.map_or_else(|| "none".to_string(), |t| t.to_string())
            ))),
        }
    }

    /// Result document: `{call: ...}` for requests, `{response: ...}` for
    /// responses.
    pub fn to_value(&self, names: Option<&FieldNames>) -> Result<Value> {
        match self {
            Exchange::Request(request) => request.to_value(names),
            Exchange::Response(response) => response.to_value(names),
        }
    }

    /// HTTP version of the exchange, for error responses.
    pub fn http_version(&self) -> &str {
        match self {
            Exchange::Request(request) => request
                .http_request()
                .map_or(DEFAULT_HTTP_VERSION, HttpRequest::version),
            Exchange::Response(response) => response.http_response().version(),
        }
    }
}

/// A 500 response whose body is `message`.
pub fn error_response(version: &str, message: &str, names: Option<&FieldNames>) -> Result<Value> {
    let response = HttpResponse {
        version: version.to_string(),
        status: DEFAULT_ERROR_STATUS.to_string(),
        headers: MultiMap::new(),
        body: message.to_string(),
    };
    response_value(&response, names)
}

fn response_value(response: &HttpResponse, names: Option<&FieldNames>) -> Result<Value> {
    let mut doc = PathDocument::from_map(Map::new(), names.cloned());
    doc.set("response/version", response.version())?;
    doc.set("response/status", response.status())?;
    doc.set("response/body", response.body())?;
    if !response.headers().is_empty() {
        doc.set("response/headers", multimap_value(response.headers()))?;
    }
    Ok(doc.into_value())
}

/// The HTTP request a gateway received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    method: String,
    url: String,
    version: String,
    query: MultiMap,
    headers: MultiMap,
    post_data: MultiMap,
    body: String,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            version: DEFAULT_HTTP_VERSION.to_string(),
            ..Self::default()
        }
    }

    fn from_document(doc: &PathDocument) -> Option<Self> {
        if !doc.exists("request") {
            return None;
        }
        let text = |path: &str| doc.get(path).and_then(Value::as_str).unwrap_or_default().to_string();
        let body = match doc.get("request/body") {
            Some(Value::Binary(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
            Some(Value::String(text)) => text.clone(),
            _ => String::new(),
        };
        let version = match text("request/version") {
            version if version.is_empty() => DEFAULT_HTTP_VERSION.to_string(),
            version => version,
        };
        Some(Self {
            method: text("request/method"),
            url: text("request/url"),
            version,
            query: multimap(doc.get("request/query")),
            headers: multimap(doc.get("request/headers")),
            post_data: multimap(doc.get("request/post_data")),
            body,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn is_method(&self, method: &str) -> bool {
        self.method.eq_ignore_ascii_case(method)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// First value of a header. Names are case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        first_ignore_case(&self.headers, name)
    }

    pub fn headers(&self) -> &MultiMap {
        &self.headers
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).and_then(|values| values.first()).map(String::as_str)
    }

    pub fn query(&self) -> &MultiMap {
        &self.query
    }

    pub fn post_param(&self, name: &str) -> Option<&str> {
        self.post_data
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn post_data(&self) -> &MultiMap {
        &self.post_data
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// The HTTP response a gateway will send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    version: String,
    status: String,
    headers: MultiMap,
    body: String,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new(200, "OK")
    }
}

impl HttpResponse {
    pub fn new(code: u16, text: &str) -> Self {
        Self {
            version: DEFAULT_HTTP_VERSION.to_string(),
            status: format!("{code} {text}"),
            headers: MultiMap::new(),
            body: String::new(),
        }
    }

    fn from_document(doc: &PathDocument) -> Self {
        let mut response = Self::default();
        if !doc.exists("response") {
            return response;
        }
        if let Some(version) = doc.get("response/version").and_then(Value::as_str) {
            response.version = version.to_string();
        }
        if let Some(status) = doc.get("response/status").and_then(Value::as_str) {
            response.status = status.to_string();
        }
        response.headers = multimap(doc.get("response/headers"));
        response.body = match doc.get("response/body") {
            Some(Value::Binary(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
            Some(Value::String(text)) => text.clone(),
            _ => String::new(),
        };
        response
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: &str) -> &mut Self {
        self.version = version.to_string();
        self
    }

    /// Status line, like `200 OK`.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status
            .split_once(' ')
            .map_or(self.status.as_str(), |(code, _)| code)
            .parse()
            .unwrap_or(0)
    }

    pub fn status_text(&self) -> &str {
        self.status.split_once(' ').map_or("", |(_, text)| text)
    }

    pub fn is_status(&self, status: &str) -> bool {
        self.status == status
    }

    pub fn set_status(&mut self, code: u16, text: &str) -> &mut Self {
        self.status = format!("{code} {text}");
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        first_ignore_case(&self.headers, name)
    }

    pub fn headers(&self) -> &MultiMap {
        &self.headers
    }

    /// Add a value to a header.
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: &str) -> &mut Self {
        self.body = body.to_string();
        self
    }
}

/// A request middleware call: the service call the gateway is about to
/// make, which the handler may redirect or turn into a response.
#[derive(Debug)]
pub struct Request {
    context: Arc<Context>,
    service: String,
    version: String,
    action: String,
    params: Vec<Param>,
    protocol: String,
    gateway: Vec<String>,
    client: String,
    http: Option<HttpRequest>,
}

impl Request {
    fn from_arguments(context: Arc<Context>, doc: &PathDocument) -> Result<Self> {
        let text = |path: &str| doc.get(path).and_then(Value::as_str).unwrap_or_default().to_string();
        let names = doc.names();
        let params = doc
            .get("call/params")
            .and_then(Value::as_array)
            .map(|params| {
                params
                    .iter()
                    .map(|param| Param::from_value(param, names))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            service: text("call/service"),
            version: text("call/version"),
            action: text("call/action"),
            params,
            protocol: text("meta/protocol"),
            gateway: strings(doc.get("meta/gateway")),
            client: text("meta/client"),
            http: HttpRequest::from_document(doc),
            context,
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }

    pub fn set_service_name(&mut self, service: &str) -> &mut Self {
        self.service = service.to_string();
        self
    }

    pub fn service_version(&self) -> &str {
        &self.version
    }

    pub fn set_service_version(&mut self, version: &str) -> &mut Self {
        self.version = version.to_string();
        self
    }

    pub fn action_name(&self) -> &str {
        &self.action
    }

    pub fn set_action_name(&mut self, action: &str) -> &mut Self {
        self.action = action.to_string();
        self
    }

    pub fn gateway_protocol(&self) -> &str {
        &self.protocol
    }

    /// Public address of the gateway.
    pub fn gateway_address(&self) -> &str {
        self.gateway.get(1).map_or("", String::as_str)
    }

    pub fn client_address(&self) -> &str {
        &self.client
    }

    pub fn http_request(&self) -> Option<&HttpRequest> {
        self.http.as_ref()
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|param| param.name() == name)
    }

    pub fn param(&self, name: &str) -> Param {
        self.params
            .iter()
            .find(|param| param.name() == name)
            .cloned()
            .unwrap_or_else(|| Param::missing(name))
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Add or replace a parameter.
    pub fn set_param(&mut self, param: Param) -> &mut Self {
        match self.params.iter_mut().find(|p| p.name() == param.name()) {
            Some(existing) => *existing = param,
            None => self.params.push(param),
        }
        self
    }

    pub fn new_param(
        &self,
        name: &str,
        value: impl Into<Value>,
        param_type: Option<ParamType>,
    ) -> Result<Param> {
        match param_type {
            Some(param_type) => Param::typed(name, value, param_type),
            None => Ok(Param::new(name, value)),
        }
    }

    /// Answer the request without calling the service. Status is only
    /// meaningful for HTTP gateways; it defaults to `200 OK`.
    pub fn new_response(&self, code: Option<u16>, text: Option<&str>) -> Response {
        let mut http_response = HttpResponse::default();
        if self.protocol == HTTP_PROTOCOL {
            http_response.set_status(code.unwrap_or(200), text.unwrap_or("OK"));
        }
        if let Some(request) = &self.http {
            http_response.set_version(request.version());
        }
        Response {
            context: Arc::clone(&self.context),
            transport: Transport::new(self.context.field_names().cloned()),
            return_value: None,
            protocol: self.protocol.clone(),
            gateway: self.gateway.clone(),
            http_request: self.http.clone(),
            http_response,
        }
    }

    fn to_value(&self, names: Option<&FieldNames>) -> Result<Value> {
        let mut doc = PathDocument::from_map(Map::new(), names.cloned());
        doc.set("call/service", self.service.as_str())?;
        doc.set("call/version", self.version.as_str())?;
        doc.set("call/action", self.action.as_str())?;
        let params: Vec<Value> = self.params.iter().map(|p| p.to_value(names)).collect();
        doc.set("call/params", params)?;
        Ok(doc.into_value())
    }
}

/// A response middleware call: the gateway's response, and the transport
/// and return value it was built from.
#[derive(Debug)]
pub struct Response {
    context: Arc<Context>,
    transport: Transport,
    return_value: Option<Value>,
    protocol: String,
    gateway: Vec<String>,
    http_request: Option<HttpRequest>,
    http_response: HttpResponse,
}

impl Response {
    fn from_arguments(context: Arc<Context>, doc: &PathDocument) -> Result<Self> {
        let names = doc.names().cloned();
        let transport = match doc.get("transport") {
            Some(value) => Transport::from_value(value.clone(), names)?,
            None => Transport::new(names),
        };
        Ok(Self {
            transport,
            return_value: doc.get(Path::default().raw("return")).cloned(),
            protocol: doc
                .get("meta/protocol")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            gateway: strings(doc.get("meta/gateway")),
            http_request: HttpRequest::from_document(doc),
            http_response: HttpResponse::from_document(doc),
            context,
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The transport of the request, read-only.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn has_return(&self) -> bool {
        self.return_value.is_some()
    }

    pub fn return_value(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }

    pub fn gateway_protocol(&self) -> &str {
        &self.protocol
    }

    pub fn gateway_address(&self) -> &str {
        self.gateway.get(1).map_or("", String::as_str)
    }

    pub fn http_request(&self) -> Option<&HttpRequest> {
        self.http_request.as_ref()
    }

    pub fn http_response(&self) -> &HttpResponse {
        &self.http_response
    }

    pub fn http_response_mut(&mut self) -> &mut HttpResponse {
        &mut self.http_response
    }

    fn to_value(&self, names: Option<&FieldNames>) -> Result<Value> {
        response_value(&self.http_response, names)
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Read `{name: [values]}`; single string values are accepted too.
fn multimap(value: Option<&Value>) -> MultiMap {
    let Some(map) = value.and_then(Value::as_map) else {
        return MultiMap::new();
    };
    map.iter()
        .map(|(name, values)| {
            let values = match values {
                Value::String(text) => vec![text.clone()],
                other => strings(Some(other)),
            };
            (name.clone(), values)
        })
        .collect()
}

fn multimap_value(map: &MultiMap) -> Value {
    map.iter()
        .map(|(name, values)| {
            let values: Vec<Value> = values.iter().map(|v| Value::from(v.as_str())).collect();
            (name.clone(), Value::Array(values))
        })
        .collect()
}

fn first_ignore_case<'a>(map: &'a MultiMap, name: &str) -> Option<&'a str> {
    map.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}
