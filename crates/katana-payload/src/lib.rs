//! Payload model shared by every KATANA SDK component.
//!
//! - [`Value`]: the dynamic value tree carried on the wire
//! - [`FieldNames`]: long field name to compact wire code table
//! - [`PathDocument`]: get/set/delete/push/merge by `/`-delimited path
//! - [`codec`]: MessagePack pack/unpack with decimal and date markers
//!
//! A document only translates field names when it was built with a
//! [`FieldNames`] table. Segments prefixed with `!` are never translated,
//! which keeps user identifiers (service, action, entity names) intact.

pub mod codec;
pub mod document;
pub mod error;
pub mod names;
pub mod path;
pub mod value;

pub use codec::{pack, pack_document, unpack, unpack_document, MAX_DEPTH};
pub use document::{merge_maps, PathDocument};
pub use error::{CodecError, InvalidDecimal, PathError};
pub use names::{wire_map, FieldNames};
pub use path::{nomap, Path, Segment, DELIMITER, NOMAP_PREFIX};
pub use value::{Decimal, Map, Value, DATETIME_FORMAT, DATE_FORMAT};
