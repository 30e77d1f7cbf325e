//! Cross-module scenario tests, driven by in-memory fakes.

mod support;

mod lifecycle_tests;
