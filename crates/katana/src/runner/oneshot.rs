use std::io::{Read, Write};

use katana_payload::{PathDocument, Value};
use katana_sdk::Processor;
use tracing::debug;

use super::exit::{io_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS};

/// Run `action` once on a JSON command document read from `input`, and
/// write the reply document to `output` as JSON.
///
/// The exit code is [`FAILURE`] when the reply is an error.
pub fn run(processor: &Processor, action: &str, input: impl Read, mut output: impl Write) -> CliResult<i32> {
    let json: serde_json::Value = serde_json::from_reader(input)
        .map_err(|err| CliError::context(DATA_INVALID, "invalid command JSON", err))?;
    let names = processor.context().field_names().cloned();
    let command = PathDocument::from_value(Value::from(json), names)
        .map_err(|err| CliError::context(DATA_INVALID, "invalid command", err))?;

    debug!(action, "running one-shot command");
    let reply = processor.process(action, &command);
    let reply = PathDocument::from_value(reply.document, processor.context().field_names().cloned())
        .map_err(|err| CliError::context(FAILURE, "invalid reply", err))?;
    let failed = reply.exists("command_reply/result/error");

    serde_json::to_writer(&mut output, reply.as_map())
        .map_err(|err| CliError::context(FAILURE, "failed to write reply", err))?;
    writeln!(output).map_err(|err| io_error("failed to write reply", err))?;

    Ok(if failed { FAILURE } else { SUCCESS })
}
