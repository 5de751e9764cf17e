//! Query Server Protocol Tests
//!
//! Whole sessions driven through in-memory input and output:
//! - reset, add_fun and map_doc
//! - reduce and rereduce envelopes
//! - log frames ordering
//! - error frames and fatal protocol errors

use serde_json::{json, Value};
use solidb_viewserver::{QueryServer, ServerConfig};

/// Run a session and return the raw output.
fn run_session(input: &str) -> String {
    let mut server = QueryServer::new(ServerConfig::default()).expect("Failed to create server");
    let mut output = Vec::new();
    server
        .run(input.as_bytes(), &mut output)
        .expect("Session failed");
    String::from_utf8(output).expect("Output is not UTF-8")
}

/// Run a session expected to end with a fatal error; returns the output lines.
fn run_fatal_session(input: &str) -> Vec<Value> {
    let mut server = QueryServer::new(ServerConfig::default()).expect("Failed to create server");
    let mut output = Vec::new();
    let result = server.run(input.as_bytes(), &mut output);
    assert!(result.is_err(), "session should have failed");
    parse_lines(&String::from_utf8(output).unwrap())
}

fn parse_lines(output: &str) -> Vec<Value> {
    output
        .lines()
        .map(|line| serde_json::from_str(line).expect(&format!("Invalid frame: {}", line)))
        .collect()
}

// ==================== Literal sessions ====================

#[test]
fn test_reset() {
    assert_eq!(run_session("[\"reset\"]\n"), "true\n");
}

#[test]
fn test_add_fun() {
    assert_eq!(
        run_session("[\"add_fun\", \"def fun(doc): yield None, doc\"]\n"),
        "true\n"
    );
}

#[test]
fn test_map_doc() {
    let output = run_session(
        "[\"add_fun\", \"def fun(doc): yield None, doc\"]\n\
         [\"map_doc\", {\"foo\": \"bar\"}]\n",
    );
    assert_eq!(output, "true\n[[[null, {\"foo\": \"bar\"}]]]\n");
}

#[test]
fn test_i18n() {
    let output = run_session(
        "[\"add_fun\", \"def fun(doc): yield doc[\\\"test\\\"], doc\"]\n\
         [\"map_doc\", {\"test\": \"b\u{e5}r\"}]\n",
    );
    assert_eq!(
        output,
        "true\n[[[\"b\u{e5}r\", {\"test\": \"b\u{e5}r\"}]]]\n"
    );
}

#[test]
fn test_map_doc_with_logging() {
    let output = run_session(
        "[\"add_fun\", \"def fun(doc): log('running'); yield None, doc\"]\n\
         [\"map_doc\", {\"foo\": \"bar\"}]\n",
    );
    assert_eq!(
        output,
        "true\n{\"log\": \"running\"}\n[[[null, {\"foo\": \"bar\"}]]]\n"
    );
}

#[test]
fn test_map_doc_with_logging_json() {
    let output = run_session(
        "[\"add_fun\", \"def fun(doc): log([1, 2, 3]); yield None, doc\"]\n\
         [\"map_doc\", {\"foo\": \"bar\"}]\n",
    );
    assert_eq!(
        output,
        "true\n{\"log\": \"[1, 2, 3]\"}\n[[[null, {\"foo\": \"bar\"}]]]\n"
    );
}

#[test]
fn test_reduce() {
    let output = run_session(
        "[\"reduce\", [\"def fun(keys, values): return sum(values)\"], [[null, 1], [null, 2], [null, 3]]]\n",
    );
    assert_eq!(output, "[true, [6]]\n");
}

#[test]
fn test_reduce_with_logging() {
    let output = run_session(
        "[\"reduce\", [\"def fun(keys, values): log('Summing %r' % (values,)); return sum(values)\"], [[null, 1], [null, 2], [null, 3]]]\n",
    );
    assert_eq!(output, "{\"log\": \"Summing (1, 2, 3)\"}\n[true, [6]]\n");
}

#[test]
fn test_rereduce() {
    let output = run_session(
        "[\"rereduce\", [\"def fun(keys, values, rereduce): return sum(values)\"], [1, 2, 3]]\n",
    );
    assert_eq!(output, "[true, [6]]\n");
}

#[test]
fn test_reduce_empty() {
    let output =
        run_session("[\"reduce\", [\"def fun(keys, values): return sum(values)\"], []]\n");
    assert_eq!(output, "[true, [0]]\n");
}

#[test]
fn test_update() {
    let commands = [
        json!([
            "ddoc",
            "new",
            "_design/test_update",
            {
                "_id": "_design/test_update",
                "_rev": "8-d7379de23a751dc2a19e5638a7bbc5cc",
                "language": "python",
                "updates": {
                    "inc": {
                        "map": "def fun(obj, req):\n    if obj is not None:\n        obj['field'] += 1\n    return [obj, {\"body\": \".\"}]\n"
                    }
                }
            }
        ]),
        json!(["ddoc", "_design/test_update", ["updates", "inc"], [null, {}]]),
        json!([
            "ddoc",
            "_design/test_update",
            ["updates", "inc"],
            [{"field": 41, "other_field": "x"}, {}]
        ]),
    ];
    // No trailing newline after the last command
    let input = commands
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("\n");

    let results = parse_lines(&run_session(&input));
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], json!(true));
    assert_eq!(results[1], json!(["up", null, {"body": "."}]));
    assert_eq!(
        results[2],
        json!(["up", {"field": 42, "other_field": "x"}, {"body": "."}])
    );
}

// ==================== Session properties ====================

#[test]
fn test_reset_empties_map_functions() {
    let output = run_session(
        "[\"add_fun\", \"def fun(doc): yield 1, 1\"]\n\
         [\"add_fun\", \"def fun(doc): yield 2, 2\"]\n\
         [\"map_doc\", {}]\n\
         [\"reset\"]\n\
         [\"map_doc\", {}]\n",
    );
    assert_eq!(output, "true\ntrue\n[[[1, 1]], [[2, 2]]]\ntrue\n[]\n");
}

#[test]
fn test_reduce_then_rereduce_agree() {
    let sum = "def fun(keys, values, rereduce): return sum(values)";
    let whole = json!(["reduce", [sum], [[1, 1], [2, 2], [3, 3], [4, 4]]]);
    let left = json!(["reduce", [sum], [[1, 1], [2, 2]]]);
    let right = json!(["reduce", [sum], [[3, 3], [4, 4]]]);
    let input = format!("{}\n{}\n{}\n", whole, left, right);

    let results = parse_lines(&run_session(&input));
    assert_eq!(results[0], json!([true, [10]]));

    let parts = [results[1][1][0].clone(), results[2][1][0].clone()];
    let rereduce = json!(["rereduce", [sum], parts]);
    let results = parse_lines(&run_session(&format!("{}\n", rereduce)));
    assert_eq!(results[0], json!([true, [10]]));
}

#[test]
fn test_multiple_reduce_functions() {
    let output = run_session(
        "[\"reduce\", [\"def fun(keys, values): return sum(values)\", \"def fun(keys, values): return max(values)\", \"def fun(keys, values): return [k for k in keys]\"], [[\"a\", 1], [\"b\", 5]]]\n",
    );
    assert_eq!(output, "[true, [6, 5, [\"a\", \"b\"]]]\n");
}

#[test]
fn test_blank_lines_are_ignored() {
    let output = run_session("\n[\"reset\"]\n   \n[\"reset\"]\n");
    assert_eq!(output, "true\ntrue\n");
}

#[test]
fn test_non_log_frames_match_command_count() {
    let input = "[\"add_fun\", \"def fun(doc): log(doc); yield doc['k'], None\"]\n\
                 [\"map_doc\", {\"k\": 1}]\n\
                 [\"map_doc\", {\"k\": 2}]\n\
                 [\"reduce\", [\"def fun(keys, values): log('r'); return len(values)\"], [[1, null]]]\n";
    let frames = parse_lines(&run_session(input));
    let results: Vec<_> = frames
        .iter()
        .filter(|frame| frame.get("log").is_none())
        .collect();
    assert_eq!(results.len(), 4);
    assert_eq!(frames.len(), 7);
    assert_eq!(frames[1], json!({"log": "{\"k\": 1}"}));
}

// ==================== Error frames ====================

#[test]
fn test_add_fun_compile_error() {
    let frames = parse_lines(&run_session(
        "[\"add_fun\", \"def fun(doc) yield doc\"]\n[\"map_doc\", {}]\n",
    ));
    assert_eq!(frames[0]["error"]["id"], json!("map_compilation_error"));
    assert!(frames[0]["error"]["reason"]
        .as_str()
        .unwrap()
        .starts_with("SyntaxError"));
    // The failed function was not added
    assert_eq!(frames[1], json!([]));
}

#[test]
fn test_add_fun_not_a_function() {
    let frames = parse_lines(&run_session("[\"add_fun\", \"x = 1\"]\n"));
    assert_eq!(
        frames[0],
        json!({"error": {
            "id": "map_compilation_error",
            "reason": "string must eval to a function (ex: \"def fun(doc): return 1\")"
        }})
    );
}

#[test]
fn test_map_runtime_error_is_logged() {
    let frames = parse_lines(&run_session(
        "[\"add_fun\", \"def fun(doc): yield doc['missing'], 1\"]\n\
         [\"add_fun\", \"def fun(doc): yield 'ok', 1\"]\n\
         [\"map_doc\", {\"_id\": \"d1\"}]\n\
         [\"map_doc\", {\"_id\": \"d2\", \"missing\": 0}]\n",
    ));
    assert_eq!(frames.len(), 5);
    assert!(frames[2]["log"].as_str().unwrap().contains("KeyError"));
    assert_eq!(frames[3], json!([[], [["ok", 1]]]));
    assert_eq!(frames[4], json!([[[0, 1]], [["ok", 1]]]));
}

#[test]
fn test_reduce_errors() {
    let frames = parse_lines(&run_session(
        "[\"reduce\", [\"def fun(keys values): return 1\"], []]\n\
         [\"rereduce\", [\"def fun(keys, values, rereduce): return values[10]\"], [1]]\n\
         [\"reset\"]\n",
    ));
    assert_eq!(frames[0]["error"]["id"], json!("reduce_compilation_error"));
    assert_eq!(frames[1]["error"]["id"], json!("runtime_error"));
    assert_eq!(
        frames[1]["error"]["reason"],
        json!("IndexError: list index out of range (line 1)")
    );
    assert_eq!(frames[2], json!(true));
}

#[test]
fn test_logs_precede_error_frames() {
    let frames = parse_lines(&run_session(
        "[\"reduce\", [\"def fun(keys, values): log('before'); return 1 / 0\"], [[null, 1]]]\n",
    ));
    assert_eq!(frames[0], json!({"log": "before"}));
    assert_eq!(frames[1]["error"]["id"], json!("runtime_error"));
}

#[test]
fn test_runaway_functions_produce_error_frames() {
    let deep_source = format!("def fun(doc): return {}1{}", "(".repeat(1000), ")".repeat(1000));
    let input = [
        json!(["reduce", ["def fun(keys, values): return [0] * (2 ** 62)"], [[null, 1]]]),
        json!(["rereduce", ["def fun(keys, values): return len(range(-9223372036854775807, 9223372036854775807))"], [1]]),
        json!(["add_fun", deep_source]),
        json!(["add_fun", "def fun(doc):\n    x = [doc]\n    x.append(x)\n    yield x, 1\n"]),
        json!(["map_doc", {"_id": "cyclic"}]),
    ]
    .iter()
    .map(|command| command.to_string())
    .collect::<Vec<_>>()
    .join("\n");

    let frames = parse_lines(&run_session(&input));
    assert_eq!(frames.len(), 6);
    assert_eq!(frames[0]["error"]["id"], json!("runtime_error"));
    assert!(frames[0]["error"]["reason"].as_str().unwrap().starts_with("MemoryError"));
    assert_eq!(frames[1]["error"]["id"], json!("runtime_error"));
    assert_eq!(frames[2]["error"]["id"], json!("map_compilation_error"));
    assert_eq!(frames[3], json!(true));
    assert!(frames[4]["log"]
        .as_str()
        .unwrap()
        .contains("Circular reference detected"));
    assert_eq!(frames[5], json!([[]]));
}

// ==================== Fatal errors ====================

#[test]
fn test_invalid_json_is_fatal() {
    let frames = run_fatal_session("[\"reset\"]\n{not json\n[\"reset\"]\n");
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], json!(true));
    assert_eq!(frames[1]["error"]["id"], json!("query_server_error"));
}

#[test]
fn test_unknown_command_is_fatal() {
    let frames = run_fatal_session("[\"explode\", 1]\n");
    assert_eq!(
        frames,
        vec![json!({"error": {
            "id": "query_server_error",
            "reason": "Protocol error: unknown command 'explode'"
        }})]
    );
}

#[test]
fn test_wrong_shape_is_fatal() {
    let frames = run_fatal_session("[\"map_doc\"]\n");
    assert_eq!(frames[0]["error"]["id"], json!("query_server_error"));

    let frames = run_fatal_session("{\"reset\": true}\n");
    assert_eq!(frames[0]["error"]["id"], json!("query_server_error"));
}

#[test]
fn test_invalid_utf8_is_fatal() {
    let mut server = QueryServer::new(ServerConfig::default()).unwrap();
    let mut output = Vec::new();
    let input: &[u8] = b"[\"reset\"]\n[\"add_fun\", \"\xff\"]\n";
    let err = server.run(input, &mut output).unwrap_err();
    assert!(err.is_fatal());

    let frames = parse_lines(&String::from_utf8(output).unwrap());
    assert_eq!(frames[0], json!(true));
    assert_eq!(frames[1]["error"]["id"], json!("query_server_error"));
}
