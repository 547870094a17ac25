pub mod building;
pub mod city_footprint;
pub mod population;
pub mod raster;
pub mod region;
pub mod source;
