//! The agent loop: the heart of Stepwise.
//!
//! A task runs as a bounded **Reason → Act → Observe** cycle:
//!
//! 1. **Seed** history with a system instruction and the task
//! 2. **Reason**: send history plus capability descriptors to the engine
//! 3. **Act**: dispatch each requested capability through the registry
//! 4. **Observe**: append request/result pairs and loop back to step 2
//! 5. **Stop** on a plain answer, an exhausted budget, or the step limit
//!
//! Capability failures never stop the loop; they are fed back to the engine
//! as tool results so it can recover.

pub mod loop_runner;
pub mod roles;
pub mod scripted;
pub mod state;

pub use loop_runner::LoopController;
pub use roles::{AgentRole, RoleAgent, RoleOutput};
pub use scripted::{Script, ScriptStep, ScriptedCall, ScriptedProvider};
pub use state::{TaskState, TaskStatus, ToolRecord};
