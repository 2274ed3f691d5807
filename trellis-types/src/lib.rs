pub mod frame;
pub mod query;
pub mod result;
pub mod settings;
