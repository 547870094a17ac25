pub mod aggregate;
pub mod export;
pub mod normalize;

pub use aggregate::{aggregate, Aggregation, JoinStats, RegionFeatureAggregator, RegionFeatureTable};
pub use export::{FeatureExporter, FeatureSchema, RegionRecord};
pub use normalize::{standardize, ColumnScaler};
