//! Demo service that answers every action with the parameters it received.
//!
//! ```text
//! katana-echo -n echo -v 1.0.0 -p 3.0.0 -t 5010
//! ```

use katana::payload::{Map, Value};
use katana::runner;
use katana::Component;

fn main() {
    let component = Component::service()
        .action("echo", |action| {
            let params: Map = action
                .params()
                .iter()
                .map(|param| (param.name().to_string(), param.value().clone()))
                .collect();
            action.log(&Value::Map(params.clone()));
            action.set_entity(params)?;
            Ok(())
        })
        .action("whoami", |action| {
            let origin = action.transport().origin().join("/");
            action.set_return(origin);
            Ok(())
        });

    std::process::exit(runner::run(component));
}
