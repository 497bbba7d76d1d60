//! Runner Registry and Long-Poll Protocol (spec §4.2).

mod longpoll;
mod registry;

pub use longpoll::poll_for_job;
pub use registry::RunnerRegistry;
