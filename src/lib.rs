pub mod dsl;
pub mod resolver;
