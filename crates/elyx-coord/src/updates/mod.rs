//! The four local update phases of one ADMM iteration.
//!
//! Every phase reads iteration k and writes iteration k+1 of the owning
//! agent's store, for its owned units, and never blocks on peers; peer
//! input arrives only through merges performed by the coordinator between
//! phases.

mod dual_update;
mod s_update;
mod x_update;
mod y_update;

pub use dual_update::dual_update;
pub use s_update::s_update;
pub use x_update::{rto_x_update, swo_x_update, RtoXContext};
pub use y_update::swo_y_update;
