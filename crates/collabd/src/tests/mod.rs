//! Test suites for the server lifecycle.

mod support;
