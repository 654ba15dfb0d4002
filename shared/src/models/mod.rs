//! Domain models for the OA platform

mod attendance;
mod display_file;
mod employee;
mod expense;
mod inquiry;
mod inspection;
mod machine;
mod order;

pub use attendance::*;
pub use display_file::*;
pub use employee::*;
pub use expense::*;
pub use inquiry::*;
pub use inspection::*;
pub use machine::*;
pub use order::*;
