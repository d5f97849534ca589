// PHI audit: static analysis tests that scan all Rust source files for
// tracing:: calls containing clinical-text field patterns. Keeps record
// contents out of logs.
