// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by teamcity-tree.

use crate::node::{NodeKind, NodeState};
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{fmt, io};
use thiserror::Error;

/// An operation on a [`Tree`](crate::Tree) node, used in error messages.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Operation {
    /// [`Tree::register`](crate::Tree::register).
    Register,
    /// [`Tree::start`](crate::Tree::start).
    Start,
    /// [`Tree::finish`](crate::Tree::finish), or the automatic finish of a suite once all its
    /// children are done.
    Finish,
    /// [`Tree::add_suite`](crate::Tree::add_suite) or [`Tree::add_test`](crate::Tree::add_test).
    AddChild,
    /// [`Tree::find_child_by_name`](crate::Tree::find_child_by_name).
    FindChild,
    /// [`Tree::set_outcome`](crate::Tree::set_outcome).
    SetOutcome,
    /// [`Tree::set_metadata`](crate::Tree::set_metadata).
    SetMetadata,
    /// [`Tree::add_stdout`](crate::Tree::add_stdout) or
    /// [`Tree::add_stderr`](crate::Tree::add_stderr).
    AddOutput,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Register => "register",
            Operation::Start => "start",
            Operation::Finish => "finish",
            Operation::AddChild => "add child",
            Operation::FindChild => "find child",
            Operation::SetOutcome => "set outcome",
            Operation::SetMetadata => "set metadata",
            Operation::AddOutput => "add output",
        };
        f.write_str(s)
    }
}

/// An error returned by an operation on a [`Tree`](crate::Tree).
///
/// Apart from [`TreeError::Write`], all of these indicate that the caller broke the call discipline
/// expected by the tree: for example, finishing a node before it was registered or started.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TreeError {
    /// The operation is not allowed in the node's current lifecycle state.
    #[error("cannot {operation} node `{node}` in state {state}")]
    IllegalState {
        /// The protocol id of the node.
        node: String,
        /// The operation that was attempted.
        operation: Operation,
        /// The state the node was in.
        state: NodeState,
    },

    /// The outcome of a test was already set.
    #[error("outcome of test `{node}` was already set")]
    OutcomeAlreadySet {
        /// The protocol id of the test.
        node: String,
    },

    /// A test was finished explicitly before its outcome was set.
    #[error("cannot finish test `{node}`: outcome was not set")]
    OutcomeNotSet {
        /// The protocol id of the test.
        node: String,
    },

    /// The operation has no meaning for this kind of node.
    #[error("cannot {operation} {kind} node `{node}`")]
    UnsupportedOperation {
        /// The protocol id of the node.
        node: String,
        /// The kind of the node.
        kind: NodeKind,
        /// The operation that was attempted.
        operation: Operation,
    },

    /// The node id was not allocated by this tree.
    #[error("node `{node}` does not belong to this tree")]
    UnknownNode {
        /// The protocol id of the node.
        node: String,
    },

    /// Writing a message to the output sink failed.
    #[error("error writing service message")]
    Write(#[source] io::Error),
}

/// An error that occurs while reversing [`escape`](crate::escape).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum UnescapeError {
    /// A `|` at the end of the input.
    #[error("dangling escape character at byte {position}")]
    Dangling {
        /// The byte offset of the `|`.
        position: usize,
    },

    /// A `|` followed by a character that is not a known substitute.
    #[error("unknown escape sequence `|{sub}` at byte {position}")]
    UnknownSubstitute {
        /// The byte offset of the `|`.
        position: usize,
        /// The character following the `|`.
        sub: char,
    },
}

/// An error that occurred while reading a [`TreeConfig`](crate::TreeConfig).
#[derive(Debug, Error)]
#[error(
    "failed to parse teamcity-tree config{}",
    .config_file.as_ref().map_or_else(String::new, |file| format!(" at `{file}`"))
)]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Option<Utf8PathBuf>,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: Option<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self { config_file, kind }
    }

    /// Returns the config file that was being read, if one was specified.
    pub fn config_file(&self) -> Option<&Utf8PathBuf> {
        self.config_file.as_ref()
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while reading a [`TreeConfig`](crate::TreeConfig).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the layered config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}
