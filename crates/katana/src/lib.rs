//! SDK for writing KATANA services and middlewares.
//!
//! # Crate Structure
//!
//! - [`transport`]: component sockets (Unix, abstract namespace, TCP)
//! - [`frame`]: multipart request and response framing
//! - [`payload`]: path documents, field-name table and the wire codec
//! - [`schema`]: service schema mappings and version resolution
//! - [`sdk`]: components, the action API and the request dispatcher
//! - [`runner`]: command-line process runner (behind the `cli` feature)

/// Re-export transport types.
pub mod transport {
    pub use katana_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use katana_frame::*;
}

/// Re-export payload types.
pub mod payload {
    pub use katana_payload::*;
}

/// Re-export schema types.
pub mod schema {
    pub use katana_schema::*;
}

/// Re-export runtime types.
pub mod sdk {
    pub use katana_sdk::*;
}

#[cfg(feature = "cli")]
pub mod runner;

pub use katana_payload::{Path, PathDocument, Value};
pub use katana_sdk::{
    Action, Component, Exchange, File, HandlerError, Param, ParamType, Request, Response,
    SdkError, Transport,
};
