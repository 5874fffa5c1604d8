// Route handlers are split by area; they share this module's scope.
include!("http/core.rs");
include!("http/metrics.rs");
include!("http/policies.rs");
include!("http/simulator.rs");
