pub mod protocol;
pub mod reader;
pub mod serializer;


pub use protocol::StagingBuffer;
pub use reader::{ProtocolReader, Record};
pub use serializer::{DataExtractor, ExtractorSettings, ExtractorState};
