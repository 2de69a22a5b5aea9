//! Model training: clustering, tree ensembles, forecasting, and the
//! shared evaluation plumbing.

pub mod boosting;
pub mod clustering;
pub mod decision_tree;
pub mod forecast;
pub mod metrics;
pub mod random_forest;
pub mod split;

pub use boosting::{BoostedTreesRegressor, BoostingConfig};
pub use clustering::KMeans;
pub use decision_tree::RegressionTree;
pub use forecast::SeasonalForecaster;
pub use metrics::{ForecastReport, RegressionReport};
pub use random_forest::RandomForestRegressor;
pub use split::stratified_split;
