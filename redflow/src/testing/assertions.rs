//! Test assertions for stage outputs.

use crate::core::{DocKind, Document, ExitStatus, StopDoc};

/// Asserts that `docs` is one well-formed run: a start, a descriptor before
/// any event, events with increasing `seq_num`, and a closing stop that
/// points back at the start.
pub fn assert_protocol(docs: &[Document]) {
    let kinds: Vec<DocKind> = docs.iter().map(Document::kind).collect();
    assert!(docs.len() >= 2, "Expected at least start and stop, got {kinds:?}");
    let Some(Document::Start(start)) = docs.first() else {
        panic!("Expected a start document first, got {kinds:?}");
    };
    let Some(Document::Stop(stop)) = docs.last() else {
        panic!("Expected a stop document last, got {kinds:?}");
    };
    assert_eq!(stop.run_start, start.uid, "Stop does not close the run's start");

    let mut descriptors = Vec::new();
    let mut last_seq = None;
    for doc in &docs[1..docs.len() - 1] {
        match doc {
            Document::Descriptor(d) => {
                assert_eq!(d.run_start, start.uid, "Descriptor belongs to another run");
                descriptors.push(d.uid.as_str());
            }
            Document::Event(e) => {
                assert!(
                    descriptors.contains(&e.descriptor.as_str()),
                    "Event {} references unknown descriptor {}",
                    e.seq_num,
                    e.descriptor
                );
                if let Some(prev) = last_seq {
                    assert!(e.seq_num > prev, "Event seq_num {} follows {prev}", e.seq_num);
                }
                last_seq = Some(e.seq_num);
            }
            other => panic!("Unexpected {} inside the run: {kinds:?}", other.name()),
        }
    }
}

/// Asserts the output start lists `expected` as its parents, in order.
pub fn assert_parents(docs: &[Document], expected: &[&str]) {
    let start = docs
        .first()
        .and_then(Document::as_start)
        .unwrap_or_else(|| panic!("Expected a start document first"));
    assert_eq!(start.parents, expected, "Parents do not match the inputs");
}

fn stop_of(docs: &[Document]) -> &StopDoc {
    docs.last()
        .and_then(Document::as_stop)
        .unwrap_or_else(|| panic!("Expected a stop document last"))
}

/// Asserts the run ended successfully and returns its stop.
pub fn assert_success(docs: &[Document]) -> &StopDoc {
    let stop = stop_of(docs);
    assert_eq!(
        stop.exit_status,
        ExitStatus::Success,
        "Expected success, got reason: {:?}",
        stop.reason
    );
    stop
}

/// Asserts the run failed with a non-empty reason and returns its stop.
pub fn assert_failure(docs: &[Document]) -> &StopDoc {
    let stop = stop_of(docs);
    assert_eq!(stop.exit_status, ExitStatus::Failure, "Expected failure");
    assert!(
        stop.reason.as_deref().is_some_and(|r| !r.is_empty()),
        "Expected a failure reason"
    );
    stop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RunBuilder;

    #[test]
    fn test_assertions_accept_built_run() {
        let run = RunBuilder::new().scalar_events("x", &[1.0, 2.0, 3.0]).build();
        let docs = run.documents();
        assert_protocol(&docs);
        assert_parents(&docs, &[]);
        assert_success(&docs);
    }

    #[test]
    #[should_panic(expected = "stop document last")]
    fn test_protocol_rejects_truncated_run() {
        let mut docs = RunBuilder::new().scalar_events("x", &[1.0]).build().documents();
        docs.pop();
        assert_protocol(&docs);
    }

    #[test]
    #[should_panic(expected = "Expected failure")]
    fn test_failure_rejects_success() {
        let docs = RunBuilder::new().build().documents();
        assert_failure(&docs);
    }
}
