mod api_types;

pub use api_types::*;
