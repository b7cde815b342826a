// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test tree for a single reporting session.

use crate::{
    config::TreeConfig,
    errors::{Operation, TreeError},
    message::{self, ServiceMessage},
    node::{
        Locator, NodeData, NodeId, NodeInner, NodeKind, NodeState, TestOutcome, TestReport,
    },
};
use debug_ignore::DebugIgnore;
use std::{
    io,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::{debug, trace, warn};

/// The name of the root suite. It is never written out.
static ROOT_SUITE_NAME: &str = "ROOT-SUITE";

/// Serial numbers for trees, so that each tree can recognize its own node ids. 0 is reserved for
/// the root.
static NEXT_TREE_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Allocates node ids for a tree, and renders them for the protocol.
#[derive(Debug)]
struct IdAllocator {
    serial: u64,
    prefix: Option<String>,
    next: u64,
}

impl IdAllocator {
    fn new(prefix: Option<String>) -> Self {
        Self {
            serial: NEXT_TREE_SERIAL.fetch_add(1, Ordering::Relaxed),
            prefix,
            // 0 is the root.
            next: 1,
        }
    }

    fn next_id(&mut self) -> NodeId {
        let id = NodeId::new(self.serial, self.next);
        self.next += 1;
        id
    }

    fn owns(&self, id: NodeId) -> bool {
        id.is_root() || id.tree() == self.serial
    }

    fn render(&self, id: NodeId) -> String {
        match &self.prefix {
            Some(prefix) if !id.is_root() => format!("{prefix}-{}", id.get()),
            _ => id.get().to_string(),
        }
    }
}

/// An in-memory tree of suites and tests for one reporting session.
///
/// Every state transition is validated and written out to the sink as a service message, one line
/// per event, in call order. The root suite is created with the tree and is never itself reported:
/// top-level nodes are added to [`NodeId::ROOT`].
///
/// Suites finish themselves once all of their children have finished with propagation enabled, so
/// a caller only needs to finish leaves explicitly.
///
/// # Examples
///
/// ```
/// use teamcity_tree::{NodeId, TestOutcome, TestReport, Tree};
///
/// let mut tree = Tree::with_id_prefix("1", Vec::new());
/// let suite = tree.add_suite(NodeId::ROOT, "Login Tests", None, None)?;
/// let test = tree.add_test(suite, "renders form", None, None)?;
///
/// tree.start(suite)?;
/// tree.start(test)?;
/// let mut report = TestReport::new(TestOutcome::Success);
/// report.set_duration_millis(42);
/// tree.set_outcome(test, report)?;
/// tree.finish(test, true)?;
///
/// let output = String::from_utf8(tree.into_sink()).unwrap();
/// assert_eq!(output.lines().last(), Some("##teamcity[testSuiteFinished nodeId='1-1']"));
/// # Ok::<(), teamcity_tree::TreeError>(())
/// ```
#[derive(Debug)]
pub struct Tree<W> {
    ids: IdAllocator,
    emit_handshake: bool,
    /// Indexed by node id; the root suite is at index 0.
    nodes: Vec<NodeData>,
    sink: DebugIgnore<W>,
}

impl<W: io::Write> Tree<W> {
    /// Creates a new tree with the default configuration, writing messages to `sink`.
    pub fn new(sink: W) -> Self {
        Self::with_config(&TreeConfig::default(), sink)
    }

    /// Creates a new tree whose node ids are rendered as `<prefix>-<n>`.
    pub fn with_id_prefix(prefix: impl Into<String>, sink: W) -> Self {
        let config = TreeConfig {
            id_prefix: Some(prefix.into()),
            ..TreeConfig::default()
        };
        Self::with_config(&config, sink)
    }

    /// Creates a new tree from the given configuration, writing messages to `sink`.
    pub fn with_config(config: &TreeConfig, sink: W) -> Self {
        let root = NodeData::new(
            NodeId::ROOT,
            None,
            ROOT_SUITE_NAME.to_owned(),
            None,
            None,
            NodeKind::Suite,
        );
        Self {
            ids: IdAllocator::new(config.id_prefix.clone()),
            emit_handshake: config.emit_handshake,
            nodes: vec![root],
            sink: DebugIgnore(sink),
        }
    }

    /// Returns the sink that messages are written to.
    pub fn sink(&self) -> &W {
        &self.sink
    }

    /// Returns a mutable reference to the sink that messages are written to.
    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    /// Consumes the tree, returning the sink.
    pub fn into_sink(self) -> W {
        self.sink.0
    }

    /// Returns the id of the root suite.
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Returns the id of a node as written out in service messages.
    pub fn protocol_id(&self, id: NodeId) -> String {
        self.ids.render(id)
    }

    /// Returns a read-only view of the node with the given id.
    pub fn node(&self, id: NodeId) -> Result<NodeRef<'_>, TreeError> {
        let data = self.data(id)?;
        Ok(NodeRef { data })
    }

    // ---
    // Session messages
    // ---

    /// Writes the handshake that tells the IDE a session is starting.
    pub fn emit_handshake(&mut self) -> Result<(), TreeError> {
        write_message(
            &mut *self.sink,
            &ServiceMessage::new(message::ENTERED_THE_MATRIX),
        )
    }

    /// Writes the name of the root of the test tree, with optional extra information.
    pub fn set_root_metadata(
        &mut self,
        name: &str,
        comment: Option<&str>,
        location: Option<&Locator>,
    ) -> Result<(), TreeError> {
        let mut message = ServiceMessage::new(message::ROOT_NAME);
        message
            .push_attribute("name", name)
            .push_optional("comment", comment)
            .push_optional("location", location.map(|l| l.to_string()));
        write_message(&mut *self.sink, &message)
    }

    /// Writes the total number of tests expected in this session.
    ///
    /// Nothing is written if `count` is zero.
    pub fn set_total_count(&mut self, count: usize) -> Result<(), TreeError> {
        if count == 0 {
            return Ok(());
        }
        let mut message = ServiceMessage::new(message::TEST_COUNT);
        message.push_attribute("count", count.to_string());
        write_message(&mut *self.sink, &message)
    }

    /// Writes the message marking the start of the test run.
    pub fn session_started(&mut self) -> Result<(), TreeError> {
        write_message(&mut *self.sink, &ServiceMessage::new(message::TESTING_STARTED))
    }

    /// Writes the message marking the end of the test run.
    pub fn session_finished(&mut self) -> Result<(), TreeError> {
        write_message(
            &mut *self.sink,
            &ServiceMessage::new(message::TESTING_FINISHED),
        )
    }

    /// Writes the handshake (unless disabled in the config), then marks the run as started.
    pub fn begin_session(&mut self) -> Result<(), TreeError> {
        if self.emit_handshake {
            self.emit_handshake()?;
        }
        self.session_started()
    }

    // ---
    // Building the tree
    // ---

    /// Adds a suite as the last child of `parent`.
    pub fn add_suite(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        node_type: Option<&str>,
        locator: Option<Locator>,
    ) -> Result<NodeId, TreeError> {
        self.add_child(parent, name.into(), node_type, locator, NodeKind::Suite)
    }

    /// Adds a test as the last child of `parent`.
    pub fn add_test(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        node_type: Option<&str>,
        locator: Option<Locator>,
    ) -> Result<NodeId, TreeError> {
        self.add_child(parent, name.into(), node_type, locator, NodeKind::Test)
    }

    fn add_child(
        &mut self,
        parent: NodeId,
        name: String,
        node_type: Option<&str>,
        locator: Option<Locator>,
        kind: NodeKind,
    ) -> Result<NodeId, TreeError> {
        let parent_data = self.data(parent)?;
        if parent_data.state == NodeState::Finished {
            return Err(self.illegal_state(parent_data, Operation::AddChild));
        }
        if !matches!(parent_data.inner, NodeInner::Suite(_)) {
            return Err(self.unsupported(parent_data, Operation::AddChild));
        }

        let id = self.ids.next_id();
        debug_assert_eq!(id.index(), self.nodes.len(), "ids are allocated densely");

        let NodeInner::Suite(suite) = &mut self.nodes[parent.index()].inner else {
            unreachable!("parent was checked to be a suite above");
        };
        suite.add_child(id, &name);

        trace!(
            "added {kind} `{name}` ({}) under {}",
            self.ids.render(id),
            self.ids.render(parent),
        );
        self.nodes.push(NodeData::new(
            id,
            Some(parent),
            name,
            node_type.map(|t| t.to_owned()),
            locator,
            kind,
        ));
        Ok(id)
    }

    /// Finds a child of `suite` by name.
    ///
    /// If several children share the name, the first suite among them is preferred; otherwise the
    /// first match in insertion order is returned.
    pub fn find_child_by_name(
        &self,
        suite: NodeId,
        name: &str,
    ) -> Result<Option<NodeId>, TreeError> {
        let data = self.data(suite)?;
        let NodeInner::Suite(suite_data) = &data.inner else {
            return Err(self.unsupported(data, Operation::FindChild));
        };
        let Some(matches) = suite_data.by_name.get(name) else {
            return Ok(None);
        };

        let found = matches
            .iter()
            .copied()
            .find(|child| self.nodes[child.index()].kind() == NodeKind::Suite)
            .or_else(|| matches.first().copied());
        Ok(found)
    }

    // ---
    // Lifecycle
    // ---

    /// Reports a node to the IDE without marking it as running.
    ///
    /// Only legal for nodes that have just been created.
    pub fn register(&mut self, id: NodeId) -> Result<(), TreeError> {
        let data = self.reportable(id, Operation::Register)?;
        if data.state != NodeState::Created {
            return Err(self.illegal_state(data, Operation::Register));
        }

        let data = &self.nodes[id.index()];
        let message = init_message(&self.ids, data, false);
        write_message(&mut *self.sink, &message)?;
        self.transition(id, NodeState::Registered);
        Ok(())
    }

    /// Marks a node as running.
    ///
    /// A created node is reported and marked as running in one message. Starting a node that is
    /// already running does nothing.
    pub fn start(&mut self, id: NodeId) -> Result<(), TreeError> {
        let state = self.reportable(id, Operation::Start)?.state;
        let data = &self.nodes[id.index()];
        let message = match state {
            NodeState::Created => init_message(&self.ids, data, true),
            NodeState::Registered => {
                let mut message = ServiceMessage::new(start_command(data));
                message
                    .push_attribute("nodeId", self.ids.render(id))
                    .push_attribute("running", "true");
                message
            }
            NodeState::Started => return Ok(()),
            NodeState::Finished => return Err(self.illegal_state(data, Operation::Start)),
        };

        write_message(&mut *self.sink, &message)?;
        self.transition(id, NodeState::Started);
        Ok(())
    }

    /// Finishes a registered or started node.
    ///
    /// Tests must have an outcome set with [`set_outcome`](Self::set_outcome) first. If
    /// `propagate_to_parent` is true, the parent suite is told that a child has finished, and
    /// finishes itself once all of its children are done.
    ///
    /// Finishing the root suite does nothing.
    ///
    /// If this node's own finish message is written but an automatic finish of an ancestor then
    /// fails, the error is returned and that ancestor stays open. The ancestor can be finished
    /// explicitly once the sink recovers.
    pub fn finish(&mut self, id: NodeId, propagate_to_parent: bool) -> Result<(), TreeError> {
        let data = self.data(id)?;
        if id.is_root() {
            return Ok(());
        }
        if !matches!(data.state, NodeState::Registered | NodeState::Started) {
            return Err(self.illegal_state(data, Operation::Finish));
        }
        if let NodeInner::Test(test) = &data.inner
            && test.report.is_none()
        {
            return Err(TreeError::OutcomeNotSet {
                node: self.ids.render(id),
            });
        }

        self.finish_impl(id)?;
        if propagate_to_parent {
            self.notify_parent(id)?;
        }
        Ok(())
    }

    /// Finishes every node in the subtree rooted at `id` that hasn't finished yet, children before
    /// their parents.
    ///
    /// This is meant for abrupt termination of a session, and guarantees that every node reaches
    /// the finished state exactly once. Nodes that were never reported are registered first, before
    /// any of their children. Tests without an outcome are finished without one. Parents are not
    /// notified.
    pub fn finish_if_started(&mut self, id: NodeId) -> Result<(), TreeError> {
        let data = self.data(id)?;
        let needs_finish = !id.is_root() && data.state != NodeState::Finished;
        if needs_finish {
            warn!(
                "forcing {} `{}` ({}) to finish from state {}",
                data.kind(),
                data.name,
                self.ids.render(id),
                data.state,
            );
            if data.state == NodeState::Created {
                self.register(id)?;
            }
        }

        if let NodeInner::Suite(suite) = &self.nodes[id.index()].inner {
            // Finishing a child never adds children to this suite.
            let children = suite.children.clone();
            for child in children {
                self.finish_if_started(child)?;
            }
        }

        if needs_finish {
            self.finish_impl(id)?;
        }
        Ok(())
    }

    /// Writes the finish message for a node that is known to be registered or started.
    fn finish_impl(&mut self, id: NodeId) -> Result<(), TreeError> {
        let data = &self.nodes[id.index()];
        let message = finish_message(&self.ids, data);
        write_message(&mut *self.sink, &message)?;
        self.transition(id, NodeState::Finished);
        Ok(())
    }

    fn notify_parent(&mut self, id: NodeId) -> Result<(), TreeError> {
        let Some(parent) = self.nodes[id.index()].parent else {
            return Ok(());
        };
        if parent.is_root() {
            return Ok(());
        }

        let parent_data = &mut self.nodes[parent.index()];
        let NodeInner::Suite(suite) = &mut parent_data.inner else {
            unreachable!("parents are always suites");
        };
        suite.finished_children += 1;
        debug_assert!(
            suite.finished_children <= suite.children.len(),
            "each child finishes at most once"
        );

        if suite.finished_children == suite.children.len()
            && parent_data.state != NodeState::Finished
        {
            debug!(
                "all {} children of suite `{}` finished, finishing it",
                suite.children.len(),
                parent_data.name,
            );
            self.finish(parent, true)?;
        }
        Ok(())
    }

    // ---
    // Test payloads
    // ---

    /// Sets the outcome of a test. This can only be done once per test.
    ///
    /// A skipped test without a message gets a default `Pending test '<name>'` message.
    pub fn set_outcome(&mut self, id: NodeId, mut report: TestReport) -> Result<(), TreeError> {
        let data = self.reportable(id, Operation::SetOutcome)?;
        let NodeInner::Test(test) = &data.inner else {
            return Err(self.unsupported(data, Operation::SetOutcome));
        };
        if test.report.is_some() {
            return Err(TreeError::OutcomeAlreadySet {
                node: self.ids.render(id),
            });
        }
        if data.state == NodeState::Finished {
            return Err(self.illegal_state(data, Operation::SetOutcome));
        }

        if report.outcome == TestOutcome::Skipped && report.message.is_none() {
            report.message = Some(format!("Pending test '{}'", data.name));
        }

        if let NodeInner::Test(test) = &mut self.nodes[id.index()].inner {
            test.report = Some(report);
        }
        Ok(())
    }

    /// Attaches free-form metadata to a test, written out when the test is reported.
    pub fn set_metadata(
        &mut self,
        id: NodeId,
        metadata: impl Into<String>,
    ) -> Result<(), TreeError> {
        let data = self.reportable(id, Operation::SetMetadata)?;
        if !matches!(data.inner, NodeInner::Test(_)) {
            return Err(self.unsupported(data, Operation::SetMetadata));
        }

        if let NodeInner::Test(test) = &mut self.nodes[id.index()].inner {
            test.metadata = Some(metadata.into());
        }
        Ok(())
    }

    /// Writes output that a test printed to standard output.
    ///
    /// Output is independent of the test's lifecycle and may be written at any time, including
    /// after the test has finished. Empty output is ignored.
    pub fn add_stdout(&mut self, id: NodeId, text: &str) -> Result<(), TreeError> {
        self.add_output(id, message::TEST_STD_OUT, text)
    }

    /// Writes output that a test printed to standard error.
    ///
    /// Output is independent of the test's lifecycle and may be written at any time, including
    /// after the test has finished. Empty output is ignored.
    pub fn add_stderr(&mut self, id: NodeId, text: &str) -> Result<(), TreeError> {
        self.add_output(id, message::TEST_STD_ERR, text)
    }

    fn add_output(
        &mut self,
        id: NodeId,
        command: &'static str,
        text: &str,
    ) -> Result<(), TreeError> {
        let data = self.reportable(id, Operation::AddOutput)?;
        if !matches!(data.inner, NodeInner::Test(_)) {
            return Err(self.unsupported(data, Operation::AddOutput));
        }
        if text.is_empty() {
            return Ok(());
        }

        let mut message = ServiceMessage::new(command);
        message
            .push_attribute("nodeId", self.ids.render(id))
            .push_attribute("out", text);
        write_message(&mut *self.sink, &message)
    }

    // ---
    // Helpers
    // ---

    fn data(&self, id: NodeId) -> Result<&NodeData, TreeError> {
        let data = self.ids.owns(id).then(|| self.nodes.get(id.index())).flatten();
        data.ok_or_else(|| TreeError::UnknownNode {
            node: self.ids.render(id),
        })
    }

    /// Looks up a node that can be the subject of a message: anything but the root.
    fn reportable(&self, id: NodeId, operation: Operation) -> Result<&NodeData, TreeError> {
        let data = self.data(id)?;
        if id.is_root() {
            return Err(self.unsupported(data, operation));
        }
        Ok(data)
    }

    fn transition(&mut self, id: NodeId, state: NodeState) {
        let data = &mut self.nodes[id.index()];
        debug_assert!(data.state < state, "state transitions are monotonic");
        debug!(
            "{} `{}` ({}): {} -> {}",
            data.kind(),
            data.name,
            self.ids.render(id),
            data.state,
            state,
        );
        data.state = state;
    }

    fn illegal_state(&self, data: &NodeData, operation: Operation) -> TreeError {
        TreeError::IllegalState {
            node: self.ids.render(data.id),
            operation,
            state: data.state,
        }
    }

    fn unsupported(&self, data: &NodeData, operation: Operation) -> TreeError {
        TreeError::UnsupportedOperation {
            node: self.ids.render(data.id),
            kind: data.kind(),
            operation,
        }
    }
}

/// A read-only view of a node in a [`Tree`].
#[derive(Clone, Copy, Debug)]
pub struct NodeRef<'a> {
    data: &'a NodeData,
}

impl<'a> NodeRef<'a> {
    /// Returns the id of this node.
    pub fn id(&self) -> NodeId {
        self.data.id
    }

    /// Returns the parent of this node, or `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.data.parent
    }

    /// Returns the display name of this node.
    pub fn name(&self) -> &'a str {
        &self.data.name
    }

    /// Returns whether this node is a suite or a test.
    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }

    /// Returns the lifecycle state of this node.
    pub fn state(&self) -> NodeState {
        self.data.state
    }

    /// Returns true if this node has finished.
    pub fn is_finished(&self) -> bool {
        self.data.state == NodeState::Finished
    }

    /// Returns the semantic type of this node, such as `suite` or `spec`.
    pub fn node_type(&self) -> Option<&'a str> {
        self.data.node_type.as_deref()
    }

    /// Returns the navigation hint for this node.
    pub fn locator(&self) -> Option<&'a Locator> {
        self.data.locator.as_ref()
    }

    /// Returns the children of this node in insertion order. Tests have no children.
    pub fn children(&self) -> &'a [NodeId] {
        match &self.data.inner {
            NodeInner::Suite(suite) => &suite.children,
            NodeInner::Test(_) => &[],
        }
    }

    /// Returns the outcome report of this node, if it is a test and its outcome was set.
    pub fn report(&self) -> Option<&'a TestReport> {
        match &self.data.inner {
            NodeInner::Suite(_) => None,
            NodeInner::Test(test) => test.report.as_ref(),
        }
    }

    /// Returns the outcome of this node, if it is a test and its outcome was set.
    pub fn outcome(&self) -> Option<TestOutcome> {
        self.report().map(|report| report.outcome)
    }

    /// Returns the metadata attached to this node, if it is a test.
    pub fn metadata(&self) -> Option<&'a str> {
        match &self.data.inner {
            NodeInner::Suite(_) => None,
            NodeInner::Test(test) => test.metadata.as_deref(),
        }
    }
}

// ---
// Message construction
// ---

fn start_command(data: &NodeData) -> &'static str {
    match data.inner {
        NodeInner::Suite(_) => message::TEST_SUITE_STARTED,
        NodeInner::Test(_) => message::TEST_STARTED,
    }
}

/// The message that introduces a node to the IDE.
fn init_message<'a>(ids: &IdAllocator, data: &'a NodeData, running: bool) -> ServiceMessage<'a> {
    let parent = data.parent.unwrap_or(NodeId::ROOT);
    let metadata = match &data.inner {
        NodeInner::Suite(_) => None,
        NodeInner::Test(test) => test.metadata.as_deref(),
    };

    let mut message = ServiceMessage::new(start_command(data));
    message
        .push_attribute("nodeId", ids.render(data.id))
        .push_attribute("parentNodeId", ids.render(parent))
        .push_attribute("name", data.name.as_str())
        .push_attribute("running", if running { "true" } else { "false" })
        .push_optional("nodeType", data.node_type.as_deref())
        .push_optional("locationHint", data.locator.as_ref().map(|l| l.to_string()))
        .push_optional("metainfo", metadata);
    message
}

fn finish_message<'a>(ids: &IdAllocator, data: &'a NodeData) -> ServiceMessage<'a> {
    let node_id = ids.render(data.id);
    match &data.inner {
        NodeInner::Suite(_) => {
            let mut message = ServiceMessage::new(message::TEST_SUITE_FINISHED);
            message.push_attribute("nodeId", node_id);
            message
        }
        NodeInner::Test(test) => match &test.report {
            Some(report) => {
                let mut message = ServiceMessage::new(report.outcome.finish_command());
                message
                    .push_attribute("nodeId", node_id)
                    .push_optional("duration", report.duration_millis.map(|d| d.to_string()))
                    .push_optional(
                        "error",
                        (report.outcome == TestOutcome::Error).then_some("true"),
                    )
                    .push_optional("message", report.message.as_deref())
                    .push_optional("details", report.details.as_deref())
                    .push_optional("expected", report.expected.as_deref())
                    .push_optional("actual", report.actual.as_deref())
                    .push_optional("expectedFile", report.expected_file.as_deref())
                    .push_optional("actualFile", report.actual_file.as_deref());
                message
            }
            // Only reachable when a session is terminated abruptly.
            None => {
                let mut message = ServiceMessage::new(message::TEST_FINISHED);
                message.push_attribute("nodeId", node_id);
                message
            }
        },
    }
}

fn write_message<W: io::Write>(
    sink: &mut W,
    message: &ServiceMessage<'_>,
) -> Result<(), TreeError> {
    trace!("writing service message: {message}");
    writeln!(sink, "{message}").map_err(TreeError::Write)
}
