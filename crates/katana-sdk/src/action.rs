use std::sync::Arc;
use std::time::{Duration, Instant};

use katana_payload::{FieldNames, Map, PathDocument, Value};
use katana_schema::SchemaSnapshot;
use tracing::debug;

use crate::context::Context;
use crate::error::{HandlerError, Result, SdkError};
use crate::file::{files_to_value, File};
use crate::param::{Param, ParamType};
use crate::runtime::{RuntimeCall, RuntimeReply};
use crate::transport::{TransactionKind, Transport};

const KTP_SCHEME: &str = "ktp";

/// The API a service action handler works with.
///
/// Reads come from the request's parameters, files and transport; writes
/// go into the transport, which is returned to the framework when the
/// handler finishes.
pub struct Action {
    context: Arc<Context>,
    schemas: Arc<SchemaSnapshot>,
    action_name: String,
    transport: Transport,
    params: Vec<Param>,
    return_value: Option<Value>,
}

impl Action {
    pub fn new(
        context: Arc<Context>,
        action_name: impl Into<String>,
        transport: Transport,
        params: Vec<Param>,
    ) -> Self {
        let schemas = context.registry().snapshot();
        Self {
            context,
            schemas,
            action_name: action_name.into(),
            transport,
            params,
            return_value: None,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn name(&self) -> &str {
        self.context.name()
    }

    pub fn version(&self) -> &str {
        self.context.version()
    }

    pub fn framework_version(&self) -> &str {
        self.context.framework_version()
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    pub fn is_debug(&self) -> bool {
        self.context.is_debug()
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.context.variable(name)
    }

    pub fn resource<T: std::any::Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.context.resource(name)
    }

    pub fn log(&self, value: &Value) {
        self.context.log(value);
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn into_transport(self) -> Transport {
        self.transport
    }

    pub fn return_value(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }

    /// Split into the transport and the return value, if one was set.
    pub fn into_parts(self) -> (Transport, Option<Value>) {
        (self.transport, self.return_value)
    }

    fn names(&self) -> Option<&FieldNames> {
        self.context.field_names()
    }

    /// Public address of the gateway that received the request.
    fn address(&self) -> &str {
        self.transport.gateway_address()
    }

    /// Whether this action is the one the gateway called first.
    pub fn is_origin(&self) -> bool {
        self.transport.origin() == [self.name(), self.version(), self.action_name()]
    }

    pub fn set_property(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        self.transport.set_property(name, value)?;
        Ok(self)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|param| param.name() == name)
    }

    /// The named parameter, or a placeholder with `exists() == false`.
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

    /// Build a parameter for a call. Without a type, it is inferred.
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

    /// Files sent to this action.
    pub fn files(&self) -> Vec<File> {
        let files = self
            .transport
            .files(&[self.address(), self.name(), self.version(), self.action_name()]);
        files
            .as_map()
            .into_iter()
            .flatten()
            .filter_map(|(_, value)| File::from_value(value, self.names()).ok())
            .collect()
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.files().iter().any(|file| file.name() == name)
    }

    pub fn file(&self, name: &str) -> Option<File> {
        self.files().into_iter().find(|file| file.name() == name)
    }

    pub fn new_file(&self, name: &str, path: &str, mime: Option<&str>) -> Result<File> {
        let file = File::new(name, path)?;
        Ok(match mime {
            Some(mime) => file.with_mime(mime),
            None => file,
        })
    }

    /// Register a file for the gateway to send back as the response body.
    pub fn set_download(&mut self, file: &File) -> Result<&mut Self> {
        if self.schemas.has_mappings() {
            let has_file_server = self
                .schemas
                .service_schema(self.name(), self.version())
                .map(|schema| schema.has_file_server())
                .unwrap_or(false);
            if !has_file_server {
                return Err(self.no_file_server());
            }
        }
        self.transport.set_download(file)?;
        Ok(self)
    }

    pub fn set_entity(&mut self, entity: impl Into<Value>) -> Result<&mut Self> {
        let entity = entity.into();
        if entity.as_map().is_none() {
            return Err(SdkError::invalid("Entity must be an object"));
        }
        let (address, name, version) = self.target();
        self.transport
            .push_entity(&address, &name, &version, &self.action_name, entity)?;
        Ok(self)
    }

    pub fn set_collection(&mut self, collection: Vec<Value>) -> Result<&mut Self> {
        if collection.iter().any(|entity| entity.as_map().is_none()) {
            return Err(SdkError::invalid("Collection entities must be objects"));
        }
        let (address, name, version) = self.target();
        self.transport
            .push_collection(&address, &name, &version, &self.action_name, collection)?;
        Ok(self)
    }

    pub fn relate_one(&mut self, primary_key: &str, service: &str, foreign_key: &str) -> Result<&mut Self> {
        let address = self.address().to_string();
        self.relate(primary_key, &address, service, Value::from(foreign_key))
    }

    pub fn relate_many(
        &mut self,
        primary_key: &str,
        service: &str,
        foreign_keys: &[&str],
    ) -> Result<&mut Self> {
        let address = self.address().to_string();
        self.relate(primary_key, &address, service, key_list(foreign_keys))
    }

    pub fn relate_one_remote(
        &mut self,
        primary_key: &str,
        address: &str,
        service: &str,
        foreign_key: &str,
    ) -> Result<&mut Self> {
        self.relate(primary_key, address, service, Value::from(foreign_key))
    }

    pub fn relate_many_remote(
        &mut self,
        primary_key: &str,
        address: &str,
        service: &str,
        foreign_keys: &[&str],
    ) -> Result<&mut Self> {
        self.relate(primary_key, address, service, key_list(foreign_keys))
    }

    fn relate(
        &mut self,
        primary_key: &str,
        remote_address: &str,
        service: &str,
        foreign: Value,
    ) -> Result<&mut Self> {
        let (address, name, _) = self.target();
        self.transport
            .set_relation(&address, &name, primary_key, remote_address, service, foreign)?;
        Ok(self)
    }

    pub fn set_link(&mut self, link: &str, uri: &str) -> Result<&mut Self> {
        let (address, name, _) = self.target();
        self.transport.set_link(&address, &name, link, uri)?;
        Ok(self)
    }

    /// Register an action to run when the request succeeds.
    pub fn commit(&mut self, action: &str, params: &[Param]) -> Result<&mut Self> {
        self.transaction(TransactionKind::Commit, action, params)
    }

    /// Register an action to run when the request fails.
    pub fn rollback(&mut self, action: &str, params: &[Param]) -> Result<&mut Self> {
        self.transaction(TransactionKind::Rollback, action, params)
    }

    /// Register an action to run when the request ends either way.
    pub fn complete(&mut self, action: &str, params: &[Param]) -> Result<&mut Self> {
        self.transaction(TransactionKind::Complete, action, params)
    }

    fn transaction(&mut self, kind: TransactionKind, action: &str, params: &[Param]) -> Result<&mut Self> {
        let mut entry = self.entry();
        entry.set("service", self.name())?;
        entry.set("version", self.version())?;
        entry.set("action", action)?;
        self.set_params(&mut entry, params)?;
        self.transport.push_transaction(kind, entry.into_value())?;
        Ok(self)
    }

    /// Register a deferred call, run by the gateway after this action.
    pub fn call(
        &mut self,
        service: &str,
        version: &str,
        action: &str,
        params: &[Param],
        files: &[File],
    ) -> Result<&mut Self> {
        let mut entry = self.entry();
        entry.set("name", service)?;
        entry.set("version", version)?;
        entry.set("action", action)?;
        self.set_params(&mut entry, params)?;
        self.register_call(service, version, action, entry, files)
    }

    /// Register a deferred call to a service behind another gateway.
    pub fn call_remote(
        &mut self,
        address: &str,
        service: &str,
        version: &str,
        action: &str,
        params: &[Param],
        files: &[File],
    ) -> Result<&mut Self> {
        let address = if address.starts_with(KTP_SCHEME) {
            address.to_string()
        } else {
            format!("{KTP_SCHEME}://{address}")
        };

        let mut entry = self.entry();
        entry.set("gateway", address)?;
        entry.set("name", service)?;
        entry.set("version", version)?;
        entry.set("action", action)?;
        self.set_params(&mut entry, params)?;
        self.register_call(service, version, action, entry, files)
    }

    /// Call another service now and return its return value.
    ///
    /// The callee's changes to data, relations, links, calls,
    /// transactions and errors are merged into this transport.
    pub fn call_runtime(
        &mut self,
        service: &str,
        version: &str,
        action: &str,
        params: &[Param],
        files: &[File],
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let runtime = self
            .context
            .runtime()
            .cloned()
            .ok_or_else(|| SdkError::Runtime("no runtime caller configured".to_string()))?;
        self.check_files(files)?;

        let gateway = self
            .transport
            .document()
            .get("meta/gateway")
            .and_then(Value::as_array)
            .and_then(|addresses| addresses.first())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let sent = self.transport.as_map().clone();
        let call = RuntimeCall {
            action: self.action_name.clone(),
            service: service.to_string(),
            version: version.to_string(),
            target_action: action.to_string(),
            transport: sent.clone(),
            params: params.to_vec(),
            files: files.to_vec(),
            timeout,
        };

        let started = Instant::now();
        let RuntimeReply {
            transport,
            return_value,
        } = runtime.call(&gateway, &call)?;
        let duration = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        debug!(service, version, action, duration, "runtime call finished");

        let mut entry = self.entry();
        entry.set("name", service)?;
        entry.set("version", version)?;
        entry.set("action", action)?;
        self.set_params(&mut entry, params)?;
        entry.set(katana_payload::Path::default().raw("duration"), duration)?;
        if let Some(timeout) = timeout {
            let millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
            entry.set("timeout", millis)?;
        }
        let (name, own_version) = (self.name().to_string(), self.version().to_string());
        self.transport.push_call(&name, &own_version, entry.into_value())?;

        self.transport.merge_call_result(&sent, transport)?;
        Ok(return_value)
    }

    /// Record an error for this service without failing the action.
    pub fn error(&mut self, error: HandlerError) -> Result<&mut Self> {
        let (address, name, version) = self.target();
        self.transport.push_error(&address, &name, &version, &error)?;
        Ok(self)
    }

    pub fn set_return(&mut self, value: impl Into<Value>) -> &mut Self {
        self.return_value = Some(value.into());
        self
    }

    fn register_call(
        &mut self,
        service: &str,
        version: &str,
        action: &str,
        entry: PathDocument,
        files: &[File],
    ) -> Result<&mut Self> {
        if !files.is_empty() {
            self.check_files(files)?;
            let address = self.address().to_string();
            let files = files_to_value(files, self.names());
            self.transport
                .set_files(&address, service, version, action, files)?;
        }
        let (_, name, own_version) = self.target();
        self.transport.push_call(&name, &own_version, entry.into_value())?;
        Ok(self)
    }

    /// Local files need a file server. Without schemas, one is assumed.
    fn check_files(&self, files: &[File]) -> Result<()> {
        if !files.iter().any(File::is_local) {
            return Ok(());
        }
        let has_file_server = self
            .schemas
            .service_schema(self.name(), self.version())
            .map(|schema| schema.has_file_server())
            .unwrap_or(true);
        if has_file_server {
            Ok(())
        } else {
            Err(self.no_file_server())
        }
    }

    fn no_file_server(&self) -> SdkError {
        SdkError::NoFileServer {
            service: self.name().to_string(),
            version: self.version().to_string(),
        }
    }

    fn entry(&self) -> PathDocument {
        PathDocument::from_map(Map::new(), self.names().cloned())
    }

    fn set_params(&self, entry: &mut PathDocument, params: &[Param]) -> Result<()> {
        if !params.is_empty() {
            let params: Vec<Value> = params.iter().map(|p| p.to_value(self.names())).collect();
            entry.set("params", params)?;
        }
        Ok(())
    }

    /// Owned `(address, service, version)` for transport writes.
    fn target(&self) -> (String, String, String) {
        (
            self.address().to_string(),
            self.name().to_string(),
            self.version().to_string(),
        )
    }
}

fn key_list(keys: &[&str]) -> Value {
    Value::Array(keys.iter().map(|key| Value::from(*key)).collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use katana_payload::Path;

    use super::*;
    use crate::component::Component;
    use crate::config::DispatcherConfig;
    use crate::context::ComponentInfo;
    use crate::runtime::RuntimeCaller;

    const ADDRESS: &str = "http://127.0.0.1:80";

    fn context() -> Context {
        Context::new(
            Arc::new(Component::service()),
            ComponentInfo::new("users", "1.0", "3.0.0"),
            DispatcherConfig::default(),
        )
    }

    fn transport() -> Transport {
        let mut map = PathDocument::with_names(FieldNames::compact());
        map.set(
            "meta/gateway",
            vec![Value::from("ktp://10.0.0.1:77"), Value::from(ADDRESS)],
        )
        .expect("meta should be writable");
        map.set(
            "meta/origin",
            vec![Value::from("users"), Value::from("1.0"), Value::from("read")],
        )
        .expect("meta should be writable");
        Transport::from_map(map.into_map(), Some(FieldNames::compact()))
    }

    fn action_with(context: Context, name: &str) -> Action {
        Action::new(
            Arc::new(context),
            name,
            transport(),
            vec![Param::new("id", 7)],
        )
    }

    fn action(name: &str) -> Action {
        action_with(context(), name)
    }

    fn calls(action: &Action) -> Vec<Value> {
        action
            .transport()
            .calls(None, Some("users"))
            .get("users")
            .and_then(|v| v.get("1.0"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    #[test]
    fn origin_and_properties() {
        let mut origin = action("read");
        assert!(origin.is_origin());
        origin.set_property("x", "y").expect("property should be set");
        assert_eq!(origin.transport().property("x", ""), "y");

        assert!(!action("list").is_origin());
    }

    #[test]
    fn params_lookup() {
        let action = action("read");
        assert!(action.has_param("id"));
        assert_eq!(action.param("id").value(), &Value::from(7));
        let missing = action.param("limit");
        assert!(!missing.exists());
        assert!(action
            .new_param("n", "ten", Some(ParamType::Integer))
            .is_err());
        assert_eq!(
            action
                .new_param("n", 10, None)
                .expect("inferred param should build")
                .param_type(),
            ParamType::Integer
        );
    }

    #[test]
    fn entity_and_collection_validation() {
        let mut action = action("read");
        assert!(action.set_entity(Value::from(1)).is_err());
        assert!(action.set_collection(vec![Value::from(1)]).is_err());

        let entity: Value = [("id", 1)].into_iter().collect();
        action.set_entity(entity.clone()).expect("entity should be set");
        action
            .set_collection(vec![entity.clone()])
            .expect("collection should be set");
        assert_eq!(
            action.transport().data(&[ADDRESS, "users", "1.0", "read"]),
            Value::Array(vec![entity.clone(), Value::Array(vec![entity])])
        );
    }

    #[test]
    fn relations_use_local_or_remote_address() {
        let mut action = action("read");
        action.relate_one("1", "posts", "10").expect("relation should be set");
        action
            .relate_many_remote("1", "ktp://other:1", "tags", &["a", "b"])
            .expect("relation should be set");

        let relations = action.transport().relations(&[ADDRESS, "users"]);
        let one = relations.get("1").expect("primary key should exist");
        assert_eq!(
            one.get(ADDRESS).and_then(|r| r.get("posts")),
            Some(&Value::from("10"))
        );
        assert_eq!(
            one.get("ktp://other:1").and_then(|r| r.get("tags")),
            Some(&Value::Array(vec![Value::from("a"), Value::from("b")]))
        );
    }

    #[test]
    fn transactions_carry_params() {
        let mut action = action("read");
        action
            .commit("save", &[Param::new("id", 1)])
            .expect("commit should register")
            .rollback("undo", &[])
            .expect("rollback should register");
        let transactions = action.transport().transactions(Some("users"));
        let commit = transactions
            .get("commit")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .expect("commit should be listed");
        let commit = PathDocument::from_value(commit.clone(), Some(FieldNames::compact()))
            .expect("entry should be a mapping");
        assert_eq!(commit.get("action"), Some(&Value::from("save")));
        assert!(commit.exists("params"));
        assert!(transactions.get("rollback").is_some());
    }

    #[test]
    fn calls_accumulate() {
        let mut action = action("read");
        action
            .call("posts", "1.2", "list", &[], &[])
            .expect("call should register");
        action
            .call_remote("other:9000", "comments", "1.0", "list", &[], &[])
            .expect("remote call should register");

        let calls = calls(&action);
        assert_eq!(calls.len(), 2);
        let remote = PathDocument::from_value(calls[1].clone(), Some(FieldNames::compact()))
            .expect("entry should be a mapping");
        assert_eq!(remote.get("gateway"), Some(&Value::from("ktp://other:9000")));
        assert_eq!(
            action.transport().response_meta("users", "1.0").flags(),
            &[katana_frame::SERVICE_CALL]
        );
    }

    #[test]
    fn call_files_need_a_file_server() {
        let context = context();
        let mut mappings = PathDocument::with_names(FieldNames::compact());
        mappings
            .set(Path::default().raw("users").raw("1.0").key("files"), false)
            .expect("mappings should be writable");
        context.registry().update(mappings.into_map());

        let mut action = action_with(context, "read");
        let local = File::new("avatar", "/tmp/avatar.png").expect("file should be valid");
        let err = action
            .call("posts", "1.0", "upload", &[], &[local])
            .map(|_| ())
            .expect_err("local file without file server should fail");
        assert_eq!(err.to_string(), "File server not configured: \"users\" (1.0)");

        let remote = File::new("avatar", "http://files/avatar.png")
            .expect("file should be valid")
            .with_token("t");
        action
            .call("posts", "1.0", "upload", &[], &[remote])
            .expect("remote file should be allowed");
        assert!(action
            .transport()
            .response_meta("users", "1.0")
            .contains(katana_frame::FILES));
    }

    #[test]
    fn local_files_allowed_without_schemas() {
        let mut action = action("read");
        let local = File::new("avatar", "/tmp/avatar.png").expect("file should be valid");
        action
            .call("posts", "1.0", "upload", &[], &[local])
            .expect("no schemas means a file server is assumed");
    }

    #[test]
    fn download_needs_file_server_when_schemas_exist() {
        let file = File::new("report", "/tmp/report.csv").expect("file should be valid");

        let mut unchecked = action("read");
        unchecked.set_download(&file).expect("no schemas means no check");
        assert!(unchecked.transport().has_download());

        let context = context();
        let mut mappings = PathDocument::with_names(FieldNames::compact());
        mappings
            .set(Path::default().raw("posts").raw("1.0").key("files"), true)
            .expect("mappings should be writable");
        context.registry().update(mappings.into_map());
        let mut checked = action_with(context, "read");
        assert!(matches!(
            checked.set_download(&file),
            Err(SdkError::NoFileServer { .. })
        ));
    }

    #[test]
    fn errors_and_return_value() {
        let mut action = action("read");
        action
            .error(HandlerError::new("bad input").with_code(3).with_status("400 Bad Request"))
            .expect("error should be recorded");
        action.set_return(true);
        assert_eq!(action.return_value(), Some(&Value::from(true)));

        let (transport, value) = action.into_parts();
        assert_eq!(value, Some(Value::from(true)));
        let errors = transport.errors(&[ADDRESS, "users", "1.0"]);
        assert_eq!(errors.as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn files_sent_to_the_action() {
        let mut transport = transport();
        let file = File::new("doc", "http://files/doc.txt")
            .expect("file should be valid")
            .with_token("t");
        transport
            .set_files(ADDRESS, "users", "1.0", "read", files_to_value(&[file.clone()], None))
            .expect("files should be set");
        let action = Action::new(Arc::new(context()), "read", transport, Vec::new());
        assert!(action.has_file("doc"));
        assert_eq!(action.file("doc"), Some(file));
        assert!(action.file("other").is_none());
    }

    struct FakeRuntime {
        seen: Mutex<Vec<String>>,
    }

    impl RuntimeCaller for FakeRuntime {
        fn call(&self, gateway: &str, call: &RuntimeCall) -> Result<RuntimeReply> {
            self.seen.lock().expect("lock should not be poisoned").push(gateway.to_string());

            let mut transport = Transport::from_map(call.transport.clone(), Some(FieldNames::compact()));
            transport
                .push_entity(ADDRESS, &call.service, &call.version, &call.target_action, Value::map())
                .expect("entity should be pushed");
            transport
                .set_property("callee", "yes")
                .expect("property should be set");
            Ok(RuntimeReply {
                transport: transport.into_map(),
                return_value: Value::from(5),
            })
        }
    }

    #[test]
    fn runtime_call_merges_callee_transport() {
        let runtime = Arc::new(FakeRuntime {
            seen: Mutex::new(Vec::new()),
        });
        let context = context().with_runtime(runtime.clone());
        let mut action = action_with(context, "read");
        action.set_property("caller", "yes").expect("property should be set");

        let value = action
            .call_runtime("posts", "1.0", "list", &[], &[], Some(Duration::from_secs(1)))
            .expect("runtime call should succeed");
        assert_eq!(value, Value::from(5));
        assert_eq!(
            runtime.seen.lock().expect("lock should not be poisoned").as_slice(),
            ["ktp://10.0.0.1:77"]
        );

        let transport = action.transport();
        assert_eq!(
            transport.data(&[ADDRESS, "posts", "1.0", "list"]),
            Value::Array(vec![Value::map()])
        );
        assert_eq!(transport.property("callee", "no"), "no");
        assert_eq!(transport.property("caller", ""), "yes");

        let calls = calls(&action);
        assert_eq!(calls.len(), 1);
        let call = PathDocument::from_value(calls[0].clone(), Some(FieldNames::compact()))
            .expect("entry should be a mapping");
        assert!(call.get(Path::default().raw("duration")).is_some());
        assert_eq!(call.get("timeout"), Some(&Value::from(1000)));
    }

    #[test]
    fn runtime_call_without_caller_fails() {
        let mut action = action("read");
        assert!(matches!(
            action.call_runtime("posts", "1.0", "list", &[], &[], None),
            Err(SdkError::Runtime(_))
        ));
    }
}
