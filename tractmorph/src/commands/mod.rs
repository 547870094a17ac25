pub mod cn;
pub mod footprints;
pub mod tracts;
pub mod us;
