//! TRAP — entry, dispatch, and the user-level page-fault upcall (§4.4).

pub mod dispatch;
pub mod frame;
pub mod pagefault;

pub use dispatch::trap;
