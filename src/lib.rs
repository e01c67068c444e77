//! Schema-driven capital gains tax engine.
//!
//! Three declarative documents drive every computation: a form schema
//! describing fields and their bindings, one schedule schema per asset class
//! holding aggregate expressions over entry lists, and a rate table carrying
//! the progressive brackets plus the per-class long-term holding deduction
//! limits. [`compute`] runs the whole pipeline over a set of schedule
//! entries and either returns a sealed, ordered result or refuses with a
//! structural error; there are no partial results.
//!
//! All money is exact decimal arithmetic. Rate products round half away
//! from zero to the whole currency unit at each bracket step.

pub mod cmd;
pub mod engine;
pub mod entry;
pub mod expr;
pub mod rates;
pub mod schema;

pub use engine::{compute, ComputationResult, EngineError, FieldValue};
pub use entry::ScheduleEntry;
pub use expr::{Expr, ExprError};
pub use rates::{RateTable, RateTableDocument, RateTableError};
pub use schema::{AssetClass, FormSchema, ScheduleSchema};
