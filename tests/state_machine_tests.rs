use courtsign::error::{FailureKind, SignError};
use courtsign::request::{Actor, RequestStatus};

use RequestStatus::*;

/// Every legal edge, with the actor allowed to take it.
const EDGES: &[(RequestStatus, RequestStatus, Actor)] = &[
    (Unsigned, ReadyForSignature, Actor::Endpoint),
    (ReadyForSignature, Rejected, Actor::Endpoint),
    (ReadyForSignature, Delegated, Actor::Endpoint),
    (ReadyForSignature, InProcess, Actor::Pipeline),
    (Delegated, InProcess, Actor::Pipeline),
    (InProcess, Signed, Actor::Pipeline),
    (Signed, ReadyForDispatch, Actor::Endpoint),
    (ReadyForDispatch, Dispatched, Actor::Endpoint),
];

#[test]
fn test_status_codes_are_stable() {
    let codes: Vec<u8> = RequestStatus::ALL.iter().map(|s| s.code()).collect();
    assert_eq!(codes, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    for status in RequestStatus::ALL {
        assert_eq!(RequestStatus::from_code(status.code()), Some(status));
    }
    assert_eq!(RequestStatus::from_code(8), None);
}

#[test]
fn test_transition_table_is_exact() {
    for from in RequestStatus::ALL {
        for to in RequestStatus::ALL {
            for actor in [Actor::Pipeline, Actor::Endpoint] {
                let expected = EDGES.contains(&(from, to, actor));
                assert_eq!(
                    from.can_transition(to, actor),
                    expected,
                    "{} -> {} by {:?}",
                    from,
                    to,
                    actor
                );
            }
        }
    }
}

#[test]
fn test_terminal_states_have_no_exits() {
    for status in [Rejected, Dispatched] {
        assert!(status.is_terminal());
        for to in RequestStatus::ALL {
            assert!(!status.can_transition(to, Actor::Endpoint));
            assert!(!status.can_transition(to, Actor::Pipeline));
        }
    }
}

#[test]
fn test_endpoints_cannot_drive_signing() {
    assert!(!ReadyForSignature.can_transition(InProcess, Actor::Endpoint));
    assert!(!InProcess.can_transition(Signed, Actor::Endpoint));
    assert!(!Unsigned.can_transition(ReadyForSignature, Actor::Pipeline));
}

#[test]
fn test_illegal_transition_is_permanent() {
    let err = Signed.transition(InProcess, Actor::Pipeline).unwrap_err();
    assert!(matches!(
        err,
        SignError::IllegalTransition {
            from: Signed,
            to: InProcess
        }
    ));
    assert_eq!(err.kind(), FailureKind::Permanent);

    assert_eq!(
        Delegated.transition(InProcess, Actor::Pipeline).unwrap(),
        InProcess
    );
}

#[test]
fn test_wire_names() {
    assert_eq!(
        serde_json::to_string(&ReadyForSignature).unwrap(),
        "\"readyForSignature\""
    );
    assert_eq!(
        serde_json::from_str::<RequestStatus>("\"inProcess\"").unwrap(),
        InProcess
    );
    assert_eq!(ReadyForDispatch.to_string(), "readyForDispatch");
}

#[test]
fn test_only_waiting_states_hold_an_assignee() {
    let holding: Vec<RequestStatus> = RequestStatus::ALL
        .into_iter()
        .filter(|s| s.holds_assignee())
        .collect();
    assert_eq!(holding, vec![ReadyForSignature, Delegated]);
}
