//! Builds the `HarnessRegistry` the `run`/`resume` commands drive, wiring
//! each default [`AgentProfile`] to a real [`ProcessHarness`] with the
//! configured binary override. The registry is rebuilt once per command
//! invocation — there's no resident daemon to keep one alive across calls.

use foreman_core::config::OrchestratorConfig;
use foreman_core::harness::{AgentProfile, HarnessRegistry, ProcessHarness};

pub fn build(config: &OrchestratorConfig) -> HarnessRegistry {
    let mut registry = HarnessRegistry::new();
    for profile in AgentProfile::defaults() {
        let binary = config.binary_for(profile.name);
        registry.register(Box::new(ProcessHarness::new(profile, binary)));
    }
    registry
}
