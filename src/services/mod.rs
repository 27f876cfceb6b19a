pub mod fanout;
pub mod generation_service;
pub mod response_parser;

pub use fanout::{FanoutGenerator, RecordGenerator};
pub use generation_service::{GenerationService, GenerationSettings};
pub use response_parser::ResponseParser;
