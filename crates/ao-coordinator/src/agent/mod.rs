//! Agent blueprint management: declarative templates for how to run a class
//! of agents (spec §3, §4.6).

mod repository;
mod service;

pub use repository::AgentRepository;
pub use service::AgentService;
