pub mod aggregate;
pub mod assemble;
pub mod calculate;
pub mod dataset;
pub mod error;
pub mod formula;
pub mod normalize;
pub mod preview;
pub mod region;
pub mod sandbox;

pub use assemble::{AggregationPolicy, Script, ScriptAssembler};
pub use calculate::{CalculationRequest, CalculationState, calculate, calculate_days};
pub use error::{Error, Result};
pub use normalize::normalize;
pub use preview::{PreviewDebouncer, PreviewRow, PreviewTicket, run_preview};
pub use region::RegionProfile;
pub use sandbox::{DayBindings, RowBindings, RowOutcome, Sandbox};
