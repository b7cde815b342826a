// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The data model for nodes in a [`Tree`](crate::Tree).

use smallvec::SmallVec;
use std::{collections::HashMap, fmt};

/// A handle to a node in a [`Tree`](crate::Tree).
///
/// Ids are allocated by the tree in strictly increasing order and are never reused. The numeric
/// value is the one written out in service messages, optionally namespaced by the tree's id prefix.
///
/// A handle also remembers which tree allocated it, so it can't be used with a different tree.
/// [`NodeId::ROOT`] is the exception: every tree has a root.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId {
    // 0 for the root, which belongs to all trees.
    tree: u64,
    value: u64,
}

impl NodeId {
    /// The id of the root suite. This is also the parent id written out for top-level nodes.
    pub const ROOT: NodeId = NodeId { tree: 0, value: 0 };

    pub(crate) fn new(tree: u64, value: u64) -> Self {
        Self { tree, value }
    }

    /// Returns the numeric value of this id.
    pub fn get(self) -> u64 {
        self.value
    }

    /// Returns true if this is the id of the root suite.
    pub fn is_root(self) -> bool {
        self.value == 0
    }

    #[inline]
    pub(crate) fn tree(self) -> u64 {
        self.tree
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.value as usize
    }
}

/// The lifecycle state of a node.
///
/// Transitions are monotonic: `Created` → (`Registered` →) `Started` → `Finished`, or
/// `Registered` → `Finished` directly.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NodeState {
    /// The node exists in memory but nothing has been reported for it.
    Created,
    /// The node has been reported to the IDE, but is not running yet.
    Registered,
    /// The node is running.
    Started,
    /// The node is done. This state is terminal.
    Finished,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Created => write!(f, "created"),
            NodeState::Registered => write!(f, "registered"),
            NodeState::Started => write!(f, "started"),
            NodeState::Finished => write!(f, "finished"),
        }
    }
}

/// The two kinds of nodes in a tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum NodeKind {
    /// A composite node with children.
    Suite,
    /// A single test, carrying an outcome.
    Test,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Suite => write!(f, "suite"),
            NodeKind::Test => write!(f, "test"),
        }
    }
}

/// A navigation hint for the IDE, written out as `<protocol>://<path>`.
///
/// For example, `file:///src/login.test.js` or `js_test://login/renders form`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Locator {
    /// The protocol, such as `file` or `suite`.
    pub protocol: String,

    /// The protocol-specific path.
    pub path: String,
}

impl Locator {
    /// Creates a new `Locator`.
    pub fn new(protocol: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.path)
    }
}

/// The terminal classification of a test.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TestOutcome {
    /// The test passed.
    Success,
    /// The test was not run.
    Skipped,
    /// The test failed an assertion.
    Failed,
    /// The test failed with an unexpected error.
    Error,
}

impl TestOutcome {
    /// Returns the name of the message written out when a test with this outcome finishes.
    pub fn finish_command(self) -> &'static str {
        match self {
            TestOutcome::Success => crate::message::TEST_FINISHED,
            TestOutcome::Skipped => crate::message::TEST_IGNORED,
            TestOutcome::Failed | TestOutcome::Error => crate::message::TEST_FAILED,
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Success => write!(f, "success"),
            TestOutcome::Skipped => write!(f, "skipped"),
            TestOutcome::Failed => write!(f, "failed"),
            TestOutcome::Error => write!(f, "error"),
        }
    }
}

/// The result of a single test, passed to [`Tree::set_outcome`](crate::Tree::set_outcome).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestReport {
    /// The outcome of the test.
    pub outcome: TestOutcome,

    /// The time taken by the test, in milliseconds, as reported by the test framework.
    pub duration_millis: Option<i64>,

    /// A human-readable failure (or skip) message.
    pub message: Option<String>,

    /// Details for the failure, typically a stack trace.
    pub details: Option<String>,

    /// The expected value of a failed comparison.
    pub expected: Option<String>,

    /// The actual value of a failed comparison.
    pub actual: Option<String>,

    /// A file containing the expected value of a failed comparison.
    pub expected_file: Option<String>,

    /// A file containing the actual value of a failed comparison.
    pub actual_file: Option<String>,
}

impl TestReport {
    /// Creates a new `TestReport` with the given outcome and no other data.
    pub fn new(outcome: TestOutcome) -> Self {
        Self {
            outcome,
            duration_millis: None,
            message: None,
            details: None,
            expected: None,
            actual: None,
            expected_file: None,
            actual_file: None,
        }
    }

    /// Sets the time taken, in milliseconds.
    pub fn set_duration_millis(&mut self, duration_millis: i64) -> &mut Self {
        self.duration_millis = Some(duration_millis);
        self
    }

    /// Sets the failure message.
    pub fn set_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the failure details.
    pub fn set_details(&mut self, details: impl Into<String>) -> &mut Self {
        self.details = Some(details.into());
        self
    }

    /// Sets the expected and actual values of a failed comparison.
    pub fn set_comparison(
        &mut self,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> &mut Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }

    /// Sets the files containing the expected and actual values of a failed comparison.
    pub fn set_comparison_files(
        &mut self,
        expected_file: impl Into<String>,
        actual_file: impl Into<String>,
    ) -> &mut Self {
        self.expected_file = Some(expected_file.into());
        self.actual_file = Some(actual_file.into());
        self
    }
}

// ---
// Storage
// ---

#[derive(Debug)]
pub(crate) struct NodeData {
    pub(crate) id: NodeId,
    pub(crate) parent: Option<NodeId>,
    pub(crate) name: String,
    pub(crate) node_type: Option<String>,
    pub(crate) locator: Option<Locator>,
    pub(crate) state: NodeState,
    pub(crate) inner: NodeInner,
}

impl NodeData {
    pub(crate) fn new(
        id: NodeId,
        parent: Option<NodeId>,
        name: String,
        node_type: Option<String>,
        locator: Option<Locator>,
        kind: NodeKind,
    ) -> Self {
        let inner = match kind {
            NodeKind::Suite => NodeInner::Suite(SuiteData::default()),
            NodeKind::Test => NodeInner::Test(TestData::default()),
        };
        Self {
            id,
            parent,
            name,
            node_type,
            locator,
            state: NodeState::Created,
            inner,
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match &self.inner {
            NodeInner::Suite(_) => NodeKind::Suite,
            NodeInner::Test(_) => NodeKind::Test,
        }
    }
}

#[derive(Debug)]
pub(crate) enum NodeInner {
    Suite(SuiteData),
    Test(TestData),
}

#[derive(Debug, Default)]
pub(crate) struct SuiteData {
    /// Children in insertion order, which is also report order.
    pub(crate) children: Vec<NodeId>,
    /// Children by name. Names may repeat, e.g. for retried tests.
    pub(crate) by_name: HashMap<String, SmallVec<[NodeId; 1]>>,
    /// Invariant: `finished_children <= children.len()`.
    pub(crate) finished_children: usize,
}

impl SuiteData {
    pub(crate) fn add_child(&mut self, id: NodeId, name: &str) {
        self.children.push(id);
        self.by_name.entry(name.to_owned()).or_default().push(id);
    }
}

#[derive(Debug, Default)]
pub(crate) struct TestData {
    pub(crate) report: Option<TestReport>,
    pub(crate) metadata: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(TestOutcome::Success, "testFinished")]
    #[test_case(TestOutcome::Skipped, "testIgnored")]
    #[test_case(TestOutcome::Failed, "testFailed")]
    #[test_case(TestOutcome::Error, "testFailed")]
    fn finish_command(outcome: TestOutcome, expected: &str) {
        assert_eq!(outcome.finish_command(), expected);
    }

    #[test]
    fn locator_display() {
        let locator = Locator::new("js_test", "Login Tests.renders form");
        assert_eq!(locator.to_string(), "js_test://Login Tests.renders form");
    }

    #[test]
    fn suite_data_indexes_duplicates_in_order() {
        let mut suite = SuiteData::default();
        suite.add_child(NodeId::new(1, 1), "case A");
        suite.add_child(NodeId::new(1, 2), "case B");
        suite.add_child(NodeId::new(1, 3), "case A");

        assert_eq!(
            suite.children,
            [NodeId::new(1, 1), NodeId::new(1, 2), NodeId::new(1, 3)]
        );
        assert_eq!(
            suite.by_name["case A"].as_slice(),
            [NodeId::new(1, 1), NodeId::new(1, 3)]
        );
        assert_eq!(suite.by_name["case B"].as_slice(), [NodeId::new(1, 2)]);
    }
}
