//! Mock implementations and test utilities for the task platform
//!
//! This crate provides the testing infrastructure shared by unit and
//! integration tests:
//! - An in-memory store implementing every repository trait
//! - A recording event bus and email sender with error injection
//! - A scripted language-model client
//! - Builders for test data construction

pub mod builders;
pub mod bus;
pub mod clients;
pub mod repository;

pub use builders::{TaskBuilder, UserBuilder};
pub use bus::RecordingEventBus;
pub use clients::{RecordingEmailSender, ScriptedLlmClient};
pub use repository::InMemoryStore;
