pub mod bits;
pub mod reader;
pub mod writer;

pub use reader::Reader;
pub use writer::Writer;
