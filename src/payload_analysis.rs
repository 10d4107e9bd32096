//! Payload classification and console rendering.
//!
//! The single consumer of the record queue: each [`ReassembledRecord`] is
//! classified into one [`ContentKind`] and written as one text block.
//!
//! [`ReassembledRecord`]: crate::data_capture::ReassembledRecord

pub mod classifier;
pub mod hex_dump;
pub mod record_processor;
pub mod renderer;

pub use classifier::{classify, ContentKind};
pub use hex_dump::hex_dump;
pub use record_processor::RecordProcessor;
pub use renderer::{render_record, RenderOptions};
