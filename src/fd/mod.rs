//! Raw fd-relative filesystem primitives: the process-scoped root
//! descriptor, the fd-bounded open helper, and per-task resource ownership.

mod open_guard;
mod retry;
mod root;

pub use open_guard::{
    OpenBounded, OpenBoundedOwned, OpenModeFlags, ResourceSet, open_bounded, open_bounded_owned,
};
pub use root::RootDir;
pub(crate) use retry::wake_all as wake_parked_opens;
