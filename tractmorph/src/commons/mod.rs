pub mod basic_functions;
pub mod visualization;
