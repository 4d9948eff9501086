//! Harness registry & profiles (sits under the Agent Invoker, §4.1 / §6).
//!
//! ```text
//!               +----------------+
//!  Invoker  --->| HarnessRegistry|---> Box<dyn Harness> (by agent name)
//!               +----------------+
//!                       |
//!                       v
//!              +-----------------+        spawn/events/send/kill
//!              | ProcessHarness  |  <----  one per AgentProfile
//!              +-----------------+
//!                       |
//!                 child process (claude|codex|gemini)
//! ```
//!
//! A single `Harness` implementation may have many invocations in flight at
//! once, each identified by an [`AgentHandle`]; the only shared resource is
//! the process table, matching §4.1's "no locking beyond what the OS
//! provides" concurrency note.

mod process;
mod profiles;
mod registry;
mod trait_def;

pub use process::ProcessHarness;
pub use profiles::AgentProfile;
pub use registry::HarnessRegistry;
pub use trait_def::{AgentEvent, AgentHandle, Harness, NoopHarness};
