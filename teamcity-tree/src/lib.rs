// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! `teamcity-tree` tracks the tree of suites and tests in a test run and reports every change to
//! it as a TeamCity [service message](https://www.jetbrains.com/help/teamcity/service-messages.html),
//! the line-oriented protocol that IDE test consoles read from a test runner's standard output.
//!
//! The core type is [`Tree`]. A test framework adapter adds suites and tests to it as they are
//! discovered, and drives each node through its lifecycle:
//!
//! ```text
//! Created ──register──▶ Registered ──start──▶ Started ──finish──▶ Finished
//!    │                       │                                       ▲
//!    └─────────start─────────┼───────────────────────────────────────┤
//!                            └───────────────finish──────────────────┘
//! ```
//!
//! Each transition is validated, and illegal calls return a [`TreeError`] without writing
//! anything. Suites finish themselves once all of their children are done, and
//! [`Tree::finish_if_started`] closes out a subtree when a session ends abruptly.
//!
//! # Examples
//!
//! ```
//! use teamcity_tree::{Locator, NodeId, TestOutcome, TestReport, Tree};
//!
//! let mut tree = Tree::new(Vec::new());
//! tree.begin_session()?;
//! let suite = tree.add_suite(
//!     NodeId::ROOT,
//!     "Login Tests",
//!     None,
//!     Some(Locator::new("file", "/src/login.test.js")),
//! )?;
//! let test = tree.add_test(suite, "renders form", None, None)?;
//!
//! tree.start(suite)?;
//! tree.start(test)?;
//! let mut report = TestReport::new(TestOutcome::Failed);
//! report.set_message("expected 'Log in'").set_duration_millis(7);
//! tree.set_outcome(test, report)?;
//! tree.finish(test, true)?;
//! tree.session_finished()?;
//!
//! let output = String::from_utf8(tree.into_sink()).unwrap();
//! assert!(output.contains("##teamcity[testFailed nodeId='2' duration='7' message='expected |'Log in|'']"));
//! # Ok::<(), teamcity_tree::TreeError>(())
//! ```
//!
//! # Configuration
//!
//! A [`TreeConfig`] can be read from a TOML file and `TEAMCITY_TREE_*` environment variables with
//! [`TreeConfig::from_sources`]. See [`TreeConfig::DEFAULT_CONFIG`] for the available keys.

mod config;
pub mod errors;
mod escape;
mod message;
mod node;
mod tree;

pub use config::TreeConfig;
pub use errors::{Operation, TreeError, UnescapeError};
pub use escape::{escape, unescape};
pub use node::{Locator, NodeId, NodeKind, NodeState, TestOutcome, TestReport};
pub use tree::{NodeRef, Tree};
