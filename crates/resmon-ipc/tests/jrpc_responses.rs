use resmon_ipc::jrpc::{self, DissectError};
use serde_json::json;

#[test]
fn result_response_dissects() {
    let resp = jrpc::dissect_response(&json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": true,
    }))
    .unwrap();

    assert_eq!(resp.id, json!(1));
    assert!(!resp.is_error);
    assert_eq!(resp.payload, json!(true));
}

#[test]
fn error_response_dissects() {
    let resp = jrpc::dissect_response(&json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": {"code": -32601, "message": "Method not found", "data": "frob"},
    }))
    .unwrap();
    assert!(resp.is_error);

    let err = jrpc::dissect_error(&resp.payload).unwrap();
    assert_eq!(err.code, -32601);
    assert_eq!(err.message, "Method not found");
    assert_eq!(err.data, Some(json!("frob")));
}

#[test]
fn both_result_and_error_is_rejected() {
    let err = jrpc::dissect_response(&json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": true,
        "error": {"code": 1, "message": "x"},
    }))
    .unwrap_err();
    assert_eq!(
        err,
        DissectError("Both error and result present in jsonrpc response".into())
    );
}

#[test]
fn neither_result_nor_error_is_rejected() {
    let err = jrpc::dissect_response(&json!({
        "jsonrpc": "2.0",
        "id": 1,
    }))
    .unwrap_err();
    assert_eq!(
        err,
        DissectError("Neither error nor result present in jsonrpc response".into())
    );
}

#[test]
fn error_member_must_be_an_object() {
    let err = jrpc::dissect_response(&json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": "nope",
    }))
    .unwrap_err();
    assert_eq!(
        err,
        DissectError("The member error is expected to be an object, but is string".into())
    );
}

#[test]
fn error_object_requires_code_and_message() {
    assert!(jrpc::dissect_error(&json!({"message": "x"})).is_err());
    assert!(jrpc::dissect_error(&json!({"code": 1})).is_err());
    assert!(jrpc::dissect_error(&json!({"code": 1, "message": "x", "junk": 0})).is_err());
}

#[test]
fn stats_result_dissects() {
    let counters = jrpc::dissect_stats(&json!({
        "counters": [
            {"name": "LPM_IPV4", "descr": "IPv4 LPM", "value": 3, "capacity": 10000},
            {"name": "TOTAL", "descr": "Total", "value": 3, "capacity": 10000},
        ],
    }))
    .unwrap();

    assert_eq!(counters.len(), 2);
    assert_eq!(counters[0].name, "LPM_IPV4");
    assert_eq!(counters[0].value, 3);
    assert_eq!(counters[1].capacity, 10000);
}

#[test]
fn stats_result_rejects_odd_shapes() {
    assert!(jrpc::dissect_stats(&json!({})).is_err());
    assert!(jrpc::dissect_stats(&json!({"counters": 4})).is_err());
    assert!(jrpc::dissect_stats(&json!({"counters": [], "junk": 1})).is_err());
    assert!(jrpc::dissect_stats(&json!({
        "counters": [{"name": "X", "descr": "x", "value": 1}],
    }))
    .is_err());
}

#[test]
fn built_envelopes_dissect_back() {
    let req = jrpc::request(7, "stats", None);
    let parsed = jrpc::dissect_request(&req).unwrap();
    assert_eq!(parsed.method, "stats");
    assert_eq!(parsed.id, json!(7));

    let ok = jrpc::result_response(&json!(7), json!({"k": "v"}));
    let parsed = jrpc::dissect_response(&ok).unwrap();
    assert!(!parsed.is_error);

    let bad = jrpc::error_response(&json!(7), jrpc::INVALID_PARAMS, "Invalid params", None);
    let parsed = jrpc::dissect_response(&bad).unwrap();
    assert!(parsed.is_error);
    let err = jrpc::dissect_error(&parsed.payload).unwrap();
    assert_eq!(err.code, jrpc::INVALID_PARAMS);
    assert_eq!(err.data, None);
}
