use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use katana_frame::{FrameConfig, FrameReader, FrameWriter, RequestFrame, ResponseFrame};
use katana_payload::{codec, FieldNames, Map, Path, PathDocument, Value};
use katana_sdk::{
    Component, ComponentInfo, Context, Dispatcher, DispatcherConfig, Param, Processor,
    RuntimeCall, RuntimeCaller, RuntimeReply, Transport,
};
use katana_transport::{Endpoint, IpcStream};

struct Client {
    reader: FrameReader<IpcStream>,
    writer: FrameWriter<IpcStream>,
    server: JoinHandle<()>,
}

impl Client {
    fn send(&mut self, request_id: u32, action: &str, command: &PathDocument) {
        let command = codec::pack_document(command).expect("command should encode");
        self.writer
            .write_request(&RequestFrame::new(request_id, action, command))
            .expect("request should be written");
    }

    fn receive(&mut self) -> (ResponseFrame, PathDocument) {
        let response = self.reader.read_response().expect("reply should arrive");
        let doc = codec::unpack_document(&response.result, Some(FieldNames::compact()))
            .expect("reply should decode");
        (response, doc)
    }

    fn close(self) {
        self.writer
            .get_ref()
            .shutdown()
            .expect("client should shut down");
        self.server.join().expect("server thread should finish");
    }
}

fn context(component: Component, config: &DispatcherConfig) -> Context {
    Context::new(
        Arc::new(component),
        ComponentInfo::new("dummy", "1.0", "3.0.0"),
        config.clone(),
    )
}

fn serve(context: Context, config: DispatcherConfig, read_timeout: Duration) -> Client {
    let endpoint = Endpoint::Tcp("127.0.0.1:0".to_string());
    let dispatcher = Dispatcher::bind(&endpoint, Processor::new(Arc::new(context)), config)
        .expect("dispatcher should bind");

    let (server, client) = UnixStream::pair().expect("pair should be created");
    let server = thread::spawn(move || {
        dispatcher
            .serve_stream(IpcStream::from_unix(server))
            .expect("connection should end cleanly");
    });

    let client = IpcStream::from_unix(client);
    let config = FrameConfig {
        read_timeout: Some(read_timeout),
        ..FrameConfig::default()
    };
    let reader = FrameReader::with_config_ipc(
        client.try_clone().expect("stream should clone"),
        config.clone(),
    )
    .expect("reader should be created");
    let writer = FrameWriter::with_config_ipc(client, config).expect("writer should be created");
    Client {
        reader,
        writer,
        server,
    }
}

fn test_command() -> PathDocument {
    let names = FieldNames::compact();
    let mut command = PathDocument::with_names(names.clone());
    command.set("command/name", "dummy").expect("command should be writable");
    command
        .set(
            "command/arguments/transport/meta/origin",
            vec![Value::from("dummy"), Value::from("1.0"), Value::from("test")],
        )
        .expect("command should be writable");
    command
        .set(
            "command/arguments/transport/meta/gateway",
            vec![Value::from("ktp://127.0.0.1:9999"), Value::from("http://public:80")],
        )
        .expect("command should be writable");
    let foo = Param::typed("foo", 1, katana_sdk::ParamType::Integer)
        .expect("param should be typed");
    command
        .set("command/arguments/params", vec![foo.to_value(Some(&names))])
        .expect("command should be writable");
    command
}

fn returned_transport(doc: &PathDocument) -> Transport {
    let transport = doc
        .get("command_reply/result/transport")
        .cloned()
        .expect("reply should carry a transport");
    Transport::from_value(transport, Some(FieldNames::compact())).expect("transport should be a map")
}

#[test]
fn origin_action_sets_property() {
    let config = DispatcherConfig::default().with_workers(2);
    let component = Component::service().action("test", |action| {
        assert!(action.is_origin());
        assert_eq!(action.param("foo").value(), &Value::from(1));
        action.set_property("x", "y")?;
        Ok(())
    });
    let mut client = serve(context(component, &config), config, Duration::from_secs(5));

    client.send(1, "test", &test_command());
    let (response, doc) = client.receive();
    assert_eq!(response.request_id, 1);
    assert!(response.meta.is_empty());
    assert_eq!(doc.get("command_reply/name"), Some(&Value::from("dummy")));
    assert_eq!(returned_transport(&doc).property("x", ""), "y");

    client.close();
}

#[test]
fn unknown_action_reply_has_empty_meta() {
    let config = DispatcherConfig::default().with_workers(1);
    let component = Component::service().action("test", |_| Ok(()));
    let mut client = serve(context(component, &config), config, Duration::from_secs(5));

    client.send(2, "missing", &test_command());
    let (response, doc) = client.receive();
    assert_eq!(response.meta.to_bytes().as_ref(), &[0u8]);
    assert_eq!(
        doc.get("command_reply/result/error/message"),
        Some(&Value::from(
            "Invalid action for component \"dummy\" (\"1.0\"): \"missing\""
        ))
    );

    client.close();
}

#[test]
fn slow_handler_times_out_once() {
    let config = DispatcherConfig::default()
        .with_workers(1)
        .with_timeout(Duration::from_millis(100));
    let component = Component::service().action("test", |action| {
        thread::sleep(Duration::from_millis(500));
        action.set_return("late");
        Ok(())
    });
    let mut client = serve(context(component, &config), config, Duration::from_secs(2));

    client.send(3, "test", &test_command());
    let (response, doc) = client.receive();
    assert_eq!(response.request_id, 3);
    let message = doc
        .get("command_reply/result/error/message")
        .and_then(Value::as_str)
        .expect("reply should be an error");
    assert!(message.contains("timed out"), "unexpected message: {message}");

    // The handler finishes within the read timeout, but its result is dropped.
    assert!(client.reader.read_frame().is_err());

    client.close();
}

#[test]
fn replies_complete_out_of_order() {
    let config = DispatcherConfig::default().with_workers(2);
    let component = Component::service()
        .action("slow", |action| {
            thread::sleep(Duration::from_millis(200));
            action.set_return("slow");
            Ok(())
        })
        .action("fast", |action| {
            action.set_return("fast");
            Ok(())
        });
    let mut client = serve(context(component, &config), config, Duration::from_secs(5));

    client.send(10, "slow", &test_command());
    client.send(11, "fast", &test_command());

    let returned = |doc: &PathDocument| {
        doc.get(Path::default().key("command_reply").key("result").raw("return"))
            .cloned()
    };
    let (first, doc) = client.receive();
    assert_eq!(first.request_id, 11);
    assert_eq!(returned(&doc), Some(Value::from("fast")));
    let (second, doc) = client.receive();
    assert_eq!(second.request_id, 10);
    assert_eq!(returned(&doc), Some(Value::from("slow")));

    client.close();
}

#[test]
fn reused_in_flight_id_is_refused() {
    let config = DispatcherConfig::default().with_workers(2);
    let component = Component::service().action("slow", |action| {
        thread::sleep(Duration::from_millis(200));
        action.set_return("slow");
        Ok(())
    });
    let mut client = serve(context(component, &config), config, Duration::from_secs(1));

    client.send(7, "slow", &test_command());
    client.send(7, "slow", &test_command());

    let (refused, doc) = client.receive();
    assert_eq!(refused.request_id, 7);
    assert_eq!(
        doc.get("command_reply/result/error/message")
            .and_then(Value::as_str),
        Some("Failed to handle request")
    );

    // Only the first request is answered with a result.
    let (answered, doc) = client.receive();
    assert_eq!(answered.request_id, 7);
    assert_eq!(
        doc.get(Path::default().key("command_reply").key("result").raw("return")),
        Some(&Value::from("slow"))
    );
    assert!(client.reader.read_frame().is_err());

    client.close();
}

struct EchoRuntime;

impl RuntimeCaller for EchoRuntime {
    fn call(&self, gateway: &str, call: &RuntimeCall) -> katana_sdk::Result<RuntimeReply> {
        assert_eq!(gateway, "ktp://127.0.0.1:9999");
        let mut transport =
            Transport::from_map(call.transport.clone(), Some(FieldNames::compact()));
        let mut entity = Map::new();
        entity.insert("id".to_string(), Value::from(7));
        transport
            .push_entity(
                "http://public:80",
                &call.service,
                &call.version,
                &call.target_action,
                Value::Map(entity),
            )
            .expect("entity should be stored");
        transport
            .set_property("callee", "changed")
            .expect("property should be stored");
        Ok(RuntimeReply {
            transport: transport.into_map(),
            return_value: Value::from(42),
        })
    }
}

#[test]
fn runtime_call_merges_callee_transport() {
    let config = DispatcherConfig::default().with_workers(1);
    let component = Component::service().action("test", |action| {
        let returned = action.call_runtime("posts", "2.0", "list", &[], &[], None)?;
        action.set_return(returned);
        Ok(())
    });
    let context = context(component, &config).with_runtime(Arc::new(EchoRuntime));
    let mut client = serve(context, config, Duration::from_secs(5));

    client.send(5, "test", &test_command());
    let (response, doc) = client.receive();
    assert!(response.meta.contains(katana_frame::SERVICE_CALL));
    assert_eq!(
        doc.get(Path::default().key("command_reply").key("result").raw("return")),
        Some(&Value::from(42))
    );

    let transport = returned_transport(&doc);
    let data = transport.data(&["http://public:80", "posts", "2.0", "list"]);
    assert_eq!(data.as_array().map(Vec::len), Some(1));
    // Meta is never merged back.
    assert_eq!(transport.property("callee", "kept"), "kept");

    let calls = transport.calls(None, Some("dummy"));
    let call = calls
        .get("dummy")
        .and_then(|versions| versions.get("1.0"))
        .and_then(Value::as_array)
        .and_then(|calls| calls.first())
        .cloned()
        .expect("runtime call should be recorded");
    let call = PathDocument::from_value(call, Some(FieldNames::compact()))
        .expect("call should be a map");
    assert_eq!(call.get("name"), Some(&Value::from("posts")));
    assert!(call.exists(Path::default().raw("duration")));

    client.close();
}
