// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Service messages: one `##teamcity[...]` line per event.

use crate::escape::escape;
use std::{borrow::Cow, fmt};

pub(crate) static ENTERED_THE_MATRIX: &str = "enteredTheMatrix";
pub(crate) static ROOT_NAME: &str = "rootName";
pub(crate) static TEST_COUNT: &str = "testCount";
pub(crate) static TESTING_STARTED: &str = "testingStarted";
pub(crate) static TESTING_FINISHED: &str = "testingFinished";
pub(crate) static TEST_SUITE_STARTED: &str = "testSuiteStarted";
pub(crate) static TEST_SUITE_FINISHED: &str = "testSuiteFinished";
pub(crate) static TEST_STARTED: &str = "testStarted";
pub(crate) static TEST_FINISHED: &str = "testFinished";
pub(crate) static TEST_IGNORED: &str = "testIgnored";
pub(crate) static TEST_FAILED: &str = "testFailed";
pub(crate) static TEST_STD_OUT: &str = "testStdOut";
pub(crate) static TEST_STD_ERR: &str = "testStdErr";

const MESSAGE_PREFIX: &str = "##teamcity[";

/// A single service message: a command followed by `key='value'` attributes.
///
/// Attributes are written out in the order they were added, and every value is escaped with
/// [`escape`] when the message is displayed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ServiceMessage<'a> {
    command: &'static str,
    attributes: Vec<(&'static str, Cow<'a, str>)>,
}

impl<'a> ServiceMessage<'a> {
    pub(crate) fn new(command: &'static str) -> Self {
        Self {
            command,
            attributes: Vec::new(),
        }
    }

    pub(crate) fn push_attribute(
        &mut self,
        key: &'static str,
        value: impl Into<Cow<'a, str>>,
    ) -> &mut Self {
        self.attributes.push((key, value.into()));
        self
    }

    /// Appends an attribute if `value` is set.
    pub(crate) fn push_optional(
        &mut self,
        key: &'static str,
        value: Option<impl Into<Cow<'a, str>>>,
    ) -> &mut Self {
        if let Some(value) = value {
            self.push_attribute(key, value);
        }
        self
    }
}

impl fmt::Display for ServiceMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{MESSAGE_PREFIX}{}", self.command)?;
        for (key, value) in &self.attributes {
            write!(f, " {key}='{}'", escape(value))?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn no_attributes() {
        let message = ServiceMessage::new(ENTERED_THE_MATRIX);
        assert_eq!(message.to_string(), "##teamcity[enteredTheMatrix]");
    }

    #[test]
    fn attributes_in_order_and_escaped() {
        let mut message = ServiceMessage::new(TEST_FAILED);
        message
            .push_attribute("nodeId", "1-2")
            .push_optional("duration", None::<String>)
            .push_attribute("message", "expected [1] but got '2'")
            .push_optional("details", Some("at line 1\nat line 2"));

        assert_eq!(
            message.to_string(),
            "##teamcity[testFailed nodeId='1-2' message='expected |[1|] but got |'2|'' \
             details='at line 1|nat line 2']"
        );
        assert_eq!(
            message.attributes[1],
            ("message", Cow::Borrowed("expected [1] but got '2'")),
            "values are stored unescaped"
        );
        assert_eq!(message.attributes.len(), 3, "unset optional attributes are skipped");
    }
}
