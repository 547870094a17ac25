pub mod acs;
pub mod global_variables;
pub mod http;
pub mod overpass;
pub mod quadkey;
pub mod tiger;
