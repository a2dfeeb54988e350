pub mod encoding;
pub mod reader;

pub use encoding::TextEncoding;
pub use reader::{read_full, EncodingOptions, FullRead, TailBatch, TailReader};
