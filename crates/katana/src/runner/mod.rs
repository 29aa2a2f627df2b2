//! Process runner for components.
//!
//! Parses the command line the framework starts a component with, sets up
//! logging and serves the component until interrupted:
//!
//! ```no_run
//! use katana::runner;
//! use katana::Component;
//!
//! let component = Component::service().action("read", |action| {
//!     action.set_return(true);
//!     Ok(())
//! });
//! std::process::exit(runner::run(component));
//! ```

mod args;
mod exit;
mod logging;
mod oneshot;

use std::io;
use std::sync::Arc;

use clap::Parser;
use katana_sdk::{
    Component, ComponentInfo, ComponentKind, Context, Dispatcher, DispatcherConfig, Processor,
    SocketRuntimeCaller, StopHandle,
};
use tracing::{info, warn};

pub use args::{ComponentArg, RunnerArgs};
pub use exit::{
    CliError, CliResult, DATA_INVALID, FAILURE, INTERNAL, IO_ERROR, PERMISSION_DENIED, SUCCESS,
    UNAVAILABLE, USAGE,
};
pub use logging::{init_logging, LogFormat, LogLevel};

/// Run `component` with arguments from the process command line and
/// return the exit code.
pub fn run(component: Component) -> i32 {
    run_with_args(component, RunnerArgs::parse())
}

/// Run `component` with already parsed arguments.
pub fn run_with_args(component: Component, args: RunnerArgs) -> i32 {
    init_logging(args.log_format, args.log_level());
    match execute(component, &args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            err.code
        }
    }
}

fn execute(component: Component, args: &RunnerArgs) -> CliResult<i32> {
    let kind = ComponentKind::from(args.component);
    if component.kind() != kind {
        return Err(CliError::new(
            USAGE,
            format!("component is a {}, started as a {kind}", component.kind()),
        ));
    }

    let config = args.dispatcher_config();
    let processor = processor(component, args, &config);
    let component = Arc::clone(processor.context().component());

    component
        .startup()
        .map_err(|err| exit::sdk_error("startup failed", err))?;

    let outcome = match &args.action {
        Some(action) => oneshot::run(&processor, action, io::stdin().lock(), io::stdout().lock()),
        None => listen(processor, args, config),
    };

    if let Err(err) = component.shutdown() {
        warn!(error = %err, "shutdown failed");
    }
    outcome
}

fn processor(component: Component, args: &RunnerArgs, config: &DispatcherConfig) -> Processor {
    let info = ComponentInfo::new(&args.name, &args.version, &args.framework_version);
    let runtime = SocketRuntimeCaller::new(config.field_names.clone())
        .with_frame_config(config.frame.clone());
    let context = Context::new(Arc::new(component), info, config.clone()).with_runtime(Arc::new(runtime));
    Processor::new(Arc::new(context))
}

fn listen(processor: Processor, args: &RunnerArgs, config: DispatcherConfig) -> CliResult<i32> {
    let endpoint = args.endpoint()?;
    let dispatcher = Dispatcher::bind(&endpoint, processor, config)
        .map_err(|err| exit::sdk_error("bind failed", err))?;
    install_ctrlc_handler(dispatcher.stop_handle())?;

    info!(
        name = %args.name,
        version = %args.version,
        endpoint = %dispatcher.endpoint(),
        "component started"
    );
    dispatcher
        .run()
        .map_err(|err| exit::sdk_error("dispatcher failed", err))?;
    Ok(SUCCESS)
}

fn install_ctrlc_handler(stop: StopHandle) -> CliResult<()> {
    ctrlc::set_handler(move || {
        stop.stop();
    })
    .map_err(|err| CliError::context(INTERNAL, "signal handler setup failed", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mismatch_is_a_usage_error() {
        let args = RunnerArgs::try_parse_from([
            "users", "-c", "middleware", "-n", "users", "-v", "1.0", "-p", "3.0.0",
        ])
        .expect("runner args should parse");
        let err = execute(Component::service(), &args).expect_err("kind mismatch should fail");
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn startup_failure_skips_serving() {
        let args = RunnerArgs::try_parse_from([
            "users", "-n", "users", "-v", "1.0", "-p", "3.0.0", "-t", "1",
        ])
        .expect("runner args should parse");
        let component = Component::service()
            .on_startup(|_| Err(katana_sdk::SdkError::invalid("no database")));
        let err = execute(component, &args).expect_err("startup failure should abort");
        assert_eq!(err.code, FAILURE);
        assert_eq!(err.message, "startup failed: no database");
    }
}
