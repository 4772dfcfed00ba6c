//! Embedder/Generator/Metadata Extractor contracts plus a reference HTTP
//! adapter pair.

pub mod http;
pub mod traits;

pub use http::{HttpEmbedder, HttpEndpointConfig, HttpGenerator};
pub use traits::{
    Embedder, ExtractedMetadata, GenerateWithToolsResponse, GenerationOptions, Generator, Message,
    MetadataExtractor, Role, StreamCallback, StreamEvent, ToolCallRequest, ToolChoice,
};
