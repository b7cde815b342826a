// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Whole-session transcripts, as an IDE test console would read them.

use pretty_assertions::assert_eq;
use teamcity_tree::{
    Locator, NodeId, NodeState, TestOutcome, TestReport, Tree, TreeConfig, unescape,
};
use test_case::test_case;
use tracing_subscriber::filter::LevelFilter;

fn init_tracing() {
    // Several tests race to install the subscriber; only the first one wins.
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .try_init();
}

fn output(tree: Tree<Vec<u8>>) -> String {
    String::from_utf8(tree.into_sink()).expect("service messages are UTF-8")
}

fn passed(duration_millis: i64) -> TestReport {
    let mut report = TestReport::new(TestOutcome::Success);
    report.set_duration_millis(duration_millis);
    report
}

#[test]
fn single_passing_test() {
    init_tracing();
    let mut tree = Tree::with_id_prefix("1", Vec::new());

    tree.begin_session().unwrap();
    tree.set_total_count(1).unwrap();
    let suite = tree
        .add_suite(NodeId::ROOT, "Login Tests", None, None)
        .unwrap();
    let test = tree.add_test(suite, "renders form", None, None).unwrap();
    tree.start(suite).unwrap();
    tree.start(test).unwrap();
    tree.set_outcome(test, passed(42)).unwrap();
    tree.finish(test, true).unwrap();
    tree.session_finished().unwrap();

    insta::assert_snapshot!(output(tree).trim_end(), @r"
    ##teamcity[enteredTheMatrix]
    ##teamcity[testingStarted]
    ##teamcity[testCount count='1']
    ##teamcity[testSuiteStarted nodeId='1-1' parentNodeId='0' name='Login Tests' running='true']
    ##teamcity[testStarted nodeId='1-2' parentNodeId='1-1' name='renders form' running='true']
    ##teamcity[testFinished nodeId='1-2' duration='42']
    ##teamcity[testSuiteFinished nodeId='1-1']
    ##teamcity[testingFinished]
    ");
}

#[test]
fn interrupted_session() {
    init_tracing();
    let mut tree = Tree::with_id_prefix("1", Vec::new());
    let checkout = tree
        .add_suite(
            NodeId::ROOT,
            "Checkout",
            Some("describe"),
            Some(Locator::new("file", "/src/checkout.spec.ts")),
        )
        .unwrap();
    let adds_item = tree.add_test(checkout, "adds item", None, None).unwrap();
    let applies_coupon = tree
        .add_test(checkout, "applies coupon", None, None)
        .unwrap();
    let pays = tree.add_test(checkout, "pays", None, None).unwrap();
    let refunds = tree.add_suite(checkout, "Refunds", None, None).unwrap();
    let full_refund = tree.add_test(refunds, "full refund", None, None).unwrap();

    tree.start(checkout).unwrap();
    tree.start(adds_item).unwrap();
    tree.set_outcome(adds_item, passed(3)).unwrap();
    tree.finish(adds_item, true).unwrap();
    tree.start(applies_coupon).unwrap();
    tree.add_stderr(applies_coupon, "Segmentation fault\n").unwrap();

    // The test process died here.
    tree.finish_if_started(tree.root()).unwrap();
    tree.session_finished().unwrap();

    for id in [checkout, adds_item, applies_coupon, pays, refunds, full_refund] {
        assert_eq!(tree.node(id).unwrap().state(), NodeState::Finished);
    }

    insta::assert_snapshot!(output(tree).trim_end(), @r"
    ##teamcity[testSuiteStarted nodeId='1-1' parentNodeId='0' name='Checkout' running='true' nodeType='describe' locationHint='file:///src/checkout.spec.ts']
    ##teamcity[testStarted nodeId='1-2' parentNodeId='1-1' name='adds item' running='true']
    ##teamcity[testFinished nodeId='1-2' duration='3']
    ##teamcity[testStarted nodeId='1-3' parentNodeId='1-1' name='applies coupon' running='true']
    ##teamcity[testStdErr nodeId='1-3' out='Segmentation fault|n']
    ##teamcity[testFinished nodeId='1-3']
    ##teamcity[testStarted nodeId='1-4' parentNodeId='1-1' name='pays' running='false']
    ##teamcity[testFinished nodeId='1-4']
    ##teamcity[testSuiteStarted nodeId='1-5' parentNodeId='1-1' name='Refunds' running='false']
    ##teamcity[testStarted nodeId='1-6' parentNodeId='1-5' name='full refund' running='false']
    ##teamcity[testFinished nodeId='1-6']
    ##teamcity[testSuiteFinished nodeId='1-5']
    ##teamcity[testSuiteFinished nodeId='1-1']
    ##teamcity[testingFinished]
    ");
}

#[test]
fn registered_up_front() {
    init_tracing();
    let config = TreeConfig::from_toml_str(
        r#"
        id-prefix = "karma"
        emit-handshake = false
        "#,
    )
    .unwrap();
    let mut tree = Tree::with_config(&config, Vec::new());

    tree.begin_session().unwrap();
    let suite = tree.add_suite(NodeId::ROOT, "math", None, None).unwrap();
    let add = tree.add_test(suite, "adds", None, None).unwrap();
    let div = tree.add_test(suite, "divides", None, None).unwrap();
    for id in [suite, add, div] {
        tree.register(id).unwrap();
    }

    tree.start(add).unwrap();
    tree.set_outcome(add, passed(1)).unwrap();
    tree.finish(add, true).unwrap();

    let mut report = TestReport::new(TestOutcome::Failed);
    report
        .set_message("expected 0.5 to equal 2")
        .set_comparison("2", "0.5");
    tree.start(div).unwrap();
    tree.set_outcome(div, report).unwrap();
    tree.finish(div, true).unwrap();
    tree.session_finished().unwrap();

    insta::assert_snapshot!(output(tree).trim_end(), @r"
    ##teamcity[testingStarted]
    ##teamcity[testSuiteStarted nodeId='karma-1' parentNodeId='0' name='math' running='false']
    ##teamcity[testStarted nodeId='karma-2' parentNodeId='karma-1' name='adds' running='false']
    ##teamcity[testStarted nodeId='karma-3' parentNodeId='karma-1' name='divides' running='false']
    ##teamcity[testStarted nodeId='karma-2' running='true']
    ##teamcity[testFinished nodeId='karma-2' duration='1']
    ##teamcity[testStarted nodeId='karma-3' running='true']
    ##teamcity[testFailed nodeId='karma-3' message='expected 0.5 to equal 2' expected='2' actual='0.5']
    ##teamcity[testSuiteFinished nodeId='karma-1']
    ##teamcity[testingFinished]
    ");
}

/// Returns the raw (still escaped) value of `key` in a service message line.
fn raw_attribute<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!(" {key}='");
    let start = line.find(&needle)? + needle.len();
    let mut chars = line[start..].char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '|' => {
                chars.next();
            }
            '\'' => return Some(&line[start..start + i]),
            _ => {}
        }
    }
    None
}

#[test_case("plain name" ; "plain")]
#[test_case("it's [really] 100% | done" ; "reserved characters")]
#[test_case("multi\nline\r\nname" ; "line breaks")]
#[test_case("next\u{85}line\u{2028}sep\u{2029}para" ; "unicode separators")]
#[test_case("ends with a pipe |" ; "trailing pipe")]
fn names_survive_the_protocol(name: &str) {
    let mut tree = Tree::new(Vec::new());
    let suite = tree.add_suite(NodeId::ROOT, name, None, None).unwrap();
    let test = tree.add_test(suite, name, None, None).unwrap();
    tree.start(suite).unwrap();
    tree.start(test).unwrap();
    let mut report = TestReport::new(TestOutcome::Error);
    report.set_message(name).set_details(name);
    tree.set_outcome(test, report).unwrap();
    tree.finish(test, true).unwrap();

    let transcript = output(tree);
    let lines: Vec<_> = transcript.lines().collect();
    assert_eq!(lines.len(), 4, "one line per message:\n{transcript}");
    for line in &lines {
        assert!(
            line.starts_with("##teamcity[") && line.ends_with(']'),
            "malformed line: {line}"
        );
    }

    for (line, key) in [(lines[0], "name"), (lines[1], "name"), (lines[2], "message")] {
        let raw = raw_attribute(line, key).unwrap_or_else(|| panic!("`{key}` in {line}"));
        assert_eq!(unescape(raw).unwrap(), name);
    }
}

#[test]
fn lookup_by_name_across_retries() {
    let mut tree = Tree::new(Vec::new());
    let suite = tree.add_suite(NodeId::ROOT, "flaky", None, None).unwrap();

    // A retried test is reported once per attempt under the same name.
    let attempts: Vec<_> = (1..=2)
        .map(|attempt| {
            let test = tree.add_test(suite, "sometimes", None, None).unwrap();
            tree.set_metadata(test, format!("attempt {attempt}"))
                .unwrap();
            test
        })
        .collect();
    assert_eq!(
        tree.find_child_by_name(suite, "sometimes").unwrap(),
        Some(attempts[0])
    );

    tree.start(suite).unwrap();
    for (&test, outcome) in attempts
        .iter()
        .zip([TestOutcome::Failed, TestOutcome::Success])
    {
        assert!(!tree.node(suite).unwrap().is_finished());
        tree.start(test).unwrap();
        tree.set_outcome(test, TestReport::new(outcome)).unwrap();
        tree.finish(test, true).unwrap();
    }
    assert!(tree.node(suite).unwrap().is_finished());

    let transcript = output(tree);
    assert!(
        transcript.contains("metainfo='attempt 2'"),
        "second attempt carries its metadata:\n{transcript}"
    );
    assert!(transcript.ends_with("##teamcity[testSuiteFinished nodeId='1']\n"));
}
