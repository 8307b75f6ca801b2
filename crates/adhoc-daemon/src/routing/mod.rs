mod agent;
mod table;

pub use agent::{
    ActionSelector,
    ValueEstimator,
};
pub use table::RoutingTable;
