pub mod lifecycle;

pub use lifecycle::{CloseAllReport, Lifecycle, RESIDUAL_EPSILON};
