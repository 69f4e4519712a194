// Single integration test harness for the crate; everything lives under
// `suite/` so only one test binary is linked.
mod suite;
