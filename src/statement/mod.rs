pub mod change;
pub mod dependency;
pub mod errors;
pub mod filter;
pub mod ordering;
pub mod selection;
pub mod value;

pub use change::{NodeChange, NodeChangeAggregation, NodeCreation, NodeDeletion, NodeUpdate};
pub use dependency::DependencyGraph;
pub use errors::StatementError;
pub use filter::{
    BooleanFilter, CountOperator, EdgeExistsFilter, FilterKind, LeafFilter, LeafOperator,
    ReverseEdgeCountFilter, ReverseEdgeExistsFilter,
};
pub use ordering::{
    LeafOrdering, OrderingDirection, OrderingExpression, ReverseEdgeCountOrdering, SortExpression,
};
pub use selection::{
    EdgeHeadSelection, LeafSelection, NodeSelection, ReverseEdgeCountSelection,
    ReverseEdgeMultipleHeadSelection, ReverseEdgeUniqueHeadSelection, SelectionExpression,
};
pub use value::{NodeValue, Value};
