//! Unit tests for the pyfun interpreter.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value as Json};

use super::*;

fn run(source: &str, args: Vec<Json>) -> PyfunResult<Json> {
    let interpreter = Interpreter::new();
    let program = interpreter.load(source)?;
    let args = args.iter().map(Value::from_json).collect();
    interpreter.call(&program, args)?.to_json()
}

fn eval(expression: &str) -> Json {
    run(&format!("def fun(): return {}", expression), vec![]).unwrap()
}

#[test]
fn test_map_generator_yields_pairs() {
    let result = run("def fun(doc): yield None, doc", vec![json!({"foo": "bar"})]).unwrap();
    assert_eq!(result, json!([[null, {"foo": "bar"}]]));
}

#[test]
fn test_generator_with_loop_and_condition() {
    let source = "\
def fun(doc):
    for tag in doc.get('tags', []):
        if tag.startswith('_'):
            continue
        yield tag, 1
";
    let result = run(source, vec![json!({"tags": ["a", "_hidden", "b"]})]).unwrap();
    assert_eq!(result, json!([["a", 1], ["b", 1]]));
}

#[test]
fn test_reduce_sum() {
    let interpreter = Interpreter::new();
    let program = interpreter
        .load("def fun(keys, values): return sum(values)")
        .unwrap();
    assert_eq!(program.arity(), 2);
    assert!(!program.is_generator());

    let values = Value::tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let keys = Value::tuple(vec![Value::None, Value::None, Value::None]);
    let result = interpreter.call(&program, vec![keys, values]).unwrap();
    assert_eq!(result, Value::Int(6));
}

#[test]
fn test_update_function_mutates_document() {
    let source = "\
def fun(obj, req):
    if obj is not None:
        obj['field'] += 1
    return [obj, {\"body\": \".\"}]
";
    let result = run(source, vec![json!({"field": 41, "other_field": "x"}), json!({})]).unwrap();
    assert_eq!(
        result,
        json!([{"field": 42, "other_field": "x"}, {"body": "."}])
    );

    let result = run(source, vec![json!(null), json!({})]).unwrap();
    assert_eq!(result, json!([null, {"body": "."}]));
}

#[test]
fn test_source_must_define_exactly_one_function() {
    let interpreter = Interpreter::new();
    assert!(matches!(
        interpreter.load("x = 1").err(),
        Some(PyfunError::NotAFunction)
    ));
    assert!(matches!(
        interpreter.load("def a(): pass\ndef b(): pass").err(),
        Some(PyfunError::NotAFunction)
    ));
    assert!(matches!(
        interpreter.load("").err(),
        Some(PyfunError::NotAFunction)
    ));
    // Comprehension variables do not leak into module scope
    assert!(interpreter
        .load("squares = [i * i for i in range(3)]")
        .is_err());
    assert!(interpreter
        .load("[i for i in range(3)]\ndef fun(doc): return doc")
        .is_ok());
}

#[test]
fn test_module_level_errors_surface_on_load() {
    let interpreter = Interpreter::new();
    let err = interpreter.load("x = 1 / 0").err().unwrap();
    assert_eq!(err.kind(), "ZeroDivisionError");

    let err = interpreter.load("def fun(doc) return 1").err().unwrap();
    assert_eq!(err.kind(), "SyntaxError");
}

#[test]
fn test_natives_are_callable() {
    let messages = Rc::new(RefCell::new(Vec::new()));
    let sink = messages.clone();

    let mut interpreter = Interpreter::new();
    interpreter.register_native("log", move |args| {
        sink.borrow_mut()
            .push(args.first().map(Value::to_str).unwrap_or_default());
        Ok(Value::None)
    });

    let program = interpreter
        .load("def fun(doc): log('running'); log([1, 2, 3]); return 1")
        .unwrap();
    interpreter.call(&program, vec![Value::None]).unwrap();
    assert_eq!(*messages.borrow(), vec!["running", "[1, 2, 3]"]);
}

#[test]
fn test_runtime_error_reports_line() {
    let source = "def fun(doc):\n    x = 1\n    return doc['missing']\n";
    let err = run(source, vec![json!({})]).unwrap_err();
    assert_eq!(err.to_string(), "KeyError: 'missing' (line 3)");
}

#[test]
fn test_try_except_and_reraise() {
    let source = "\
def fun(doc):
    try:
        return doc['x']
    except KeyError as e:
        return 'missing ' + str(e)
";
    assert_eq!(run(source, vec![json!({})]).unwrap(), json!("missing 'x'"));

    let source = "\
def fun(doc):
    try:
        doc['x']
    except KeyError:
        raise
";
    assert_eq!(run(source, vec![json!({})]).unwrap_err().kind(), "KeyError");

    let source = "\
def fun(doc):
    try:
        raise ValueError('bad')
    except (KeyError, TypeError):
        return 1
";
    let err = run(source, vec![json!({})]).unwrap_err();
    assert_eq!(err.to_string(), "ValueError: bad (line 3)");
}

#[test]
fn test_finally_runs() {
    let source = "\
def fun(doc):
    seen = []
    try:
        seen.append(1)
    finally:
        seen.append(2)
    return seen
";
    assert_eq!(run(source, vec![json!(null)]).unwrap(), json!([1, 2]));
}

#[test]
fn test_raise_custom_rejection() {
    let source = "def fun(newdoc, olddoc, userctx):\n    raise Forbidden('no way')\n";
    let err = run(source, vec![json!({}), json!(null), json!({})]).unwrap_err();
    assert_eq!(err.kind(), "Forbidden");
    assert_eq!(err.message(), "no way");
}

#[test]
fn test_expressions() {
    assert_eq!(eval("7 // 2, -7 // 2, 7 % -3, 2 ** 10"), json!([3, -4, -2, 1024]));
    assert_eq!(eval("1 < 2 < 3, 1 < 3 < 2"), json!([true, false]));
    assert_eq!(eval("'b' in 'abc', 3 not in [1, 2]"), json!([true, true]));
    assert_eq!(eval("0 or 'x', 1 and 2, not []"), json!(["x", 2, true]));
    assert_eq!(eval("'yes' if 1 else 'no'"), json!("yes"));
    assert_eq!(eval("[x * 2 for x in range(4) if x % 2]"), json!([2, 6]));
    assert_eq!(eval("{str(k): k for k in range(2)}"), json!({"0": 0, "1": 1}));
    assert_eq!(eval("(lambda a, b=2: a * b)(3)"), json!(6));
    assert_eq!(eval("'%s-%d' % ('a', 5)"), json!("a-5"));
    assert_eq!(eval("'{}:{}'.format('a', 1)"), json!("a:1"));
    assert_eq!(eval("'a,b,,c'.split(',')"), json!(["a", "b", "", "c"]));
    assert_eq!(eval("' '.join(['x', 'y'])"), json!("x y"));
    assert_eq!(eval("[1, 2, 3][::-1]"), json!([3, 2, 1]));
}

#[test]
fn test_builtins() {
    assert_eq!(eval("len('bår'), len([1]), len({})"), json!([3, 1, 0]));
    assert_eq!(eval("sorted([3, 1, 2], reverse=True)"), json!([3, 2, 1]));
    assert_eq!(
        eval("sorted(['bb', 'a', 'ccc'], key=len)"),
        json!(["a", "bb", "ccc"])
    );
    assert_eq!(eval("max([1, 5, 3]), min(4, 2)"), json!([5, 2]));
    assert_eq!(eval("max([], default=0)"), json!(0));
    assert_eq!(eval("list(zip([1, 2], 'ab'))"), json!([[1, "a"], [2, "b"]]));
    assert_eq!(eval("list(enumerate('ab', 1))"), json!([[1, "a"], [2, "b"]]));
    assert_eq!(eval("round(2.5), round(3.5), round(1.25, 1)"), json!([2, 4, 1.2]));
    assert_eq!(eval("int('42'), float('1.5'), str(1.0)"), json!([42, 1.5, "1.0"]));
    assert_eq!(eval("isinstance(True, int), isinstance('a', (list, dict))"), json!([true, false]));
    assert_eq!(eval("sum([0.5, 1]), sum([[1], [2]], [])"), json!([1.5, [1, 2]]));
    assert_eq!(eval("dict([('a', 1)], b=2)"), json!({"a": 1, "b": 2}));
    assert_eq!(eval("any([0, '']), all([])"), json!([false, true]));
}

#[test]
fn test_list_and_dict_methods() {
    let source = "\
def fun(doc):
    items = doc.setdefault('items', [])
    items.append(3)
    items.extend([1, 2])
    items.sort()
    doc.update(count=len(items))
    removed = doc.pop('unused', None)
    return doc, removed, list(doc.keys())
";
    let result = run(source, vec![json!({"name": "n"})]).unwrap();
    assert_eq!(
        result,
        json!([
            {"name": "n", "items": [1, 2, 3], "count": 3},
            null,
            ["name", "items", "count"]
        ])
    );
}

#[test]
fn test_aliasing_is_shared() {
    let source = "\
def fun(doc):
    alias = doc
    alias['touched'] = True
    tags = doc['tags']
    tags += ['z']
    return doc
";
    let result = run(source, vec![json!({"tags": ["a"]})]).unwrap();
    assert_eq!(result, json!({"tags": ["a", "z"], "touched": true}));
}

#[test]
fn test_closures_and_recursion() {
    let source = "\
def fun(n):
    base = 10
    def add(x):
        return x + base
    return add(n)
";
    assert_eq!(run(source, vec![json!(5)]).unwrap(), json!(15));

    let interpreter = Interpreter::new().with_recursion_limit(20);
    let program = interpreter
        .load("def fun(n):\n    return fun(n + 1)\n")
        .unwrap();
    let err = interpreter.call(&program, vec![Value::Int(0)]).unwrap_err();
    assert_eq!(err.kind(), "RecursionError");
}

#[test]
fn test_nested_helpers_see_enclosing_scope_when_called() {
    let recursive = "\
def fun(n):
    def fact(k):
        if k <= 1:
            return 1
        return k * fact(k - 1)
    return fact(n)
";
    assert_eq!(run(recursive, vec![json!(5)]).unwrap(), json!(120));

    let assigned_later = "\
def fun():
    def get():
        return x
    x = 5
    return get()
";
    assert_eq!(run(assigned_later, vec![]).unwrap(), json!(5));

    let rebound = "\
def fun():
    total = 1
    read = lambda: total
    total = 2
    return read()
";
    assert_eq!(run(rebound, vec![]).unwrap(), json!(2));
}

#[test]
fn test_closures_outlive_their_call() {
    let source = "\
def fun(n):
    def make(k):
        def add(x):
            return x + k
        return add
    def counter():
        def count(k):
            return 0 if k == 0 else 1 + count(k - 1)
        return count
    add2 = make(2)
    return [add2(n), make(10)(n), counter()(n)]
";
    assert_eq!(run(source, vec![json!(3)]).unwrap(), json!([5, 13, 3]));
}

#[test]
fn test_range_bounds() {
    assert_eq!(eval("len(range(5, -5, -3))"), json!(4));
    assert_eq!(eval("range(-3, 3, 2)"), json!([-3, -1, 1]));

    let err = run(
        "def fun(): return len(range(-9223372036854775807, 9223372036854775807))",
        vec![],
    )
    .unwrap_err();
    assert_eq!(err.kind(), "MemoryError");

    let err = run(
        "def fun(): return range(9223372036854775807, -9223372036854775807, -1)",
        vec![],
    )
    .unwrap_err();
    assert_eq!(err.kind(), "MemoryError");
}

#[test]
fn test_oversized_repetition_raises() {
    let err = run("def fun(keys, values): return [0] * (2 ** 62)", vec![json!(null), json!([])])
        .unwrap_err();
    assert_eq!(err.kind(), "MemoryError");

    let caught = "\
def fun():
    try:
        return 'x' * 9223372036854775807
    except MemoryError:
        return 'caught'
";
    assert_eq!(run(caught, vec![]).unwrap(), json!("caught"));
}

#[test]
fn test_self_containing_results() {
    let source = "\
def fun():
    x = [1]
    x.append(x)
    return x
";
    let err = run(source, vec![]).unwrap_err();
    assert_eq!(err.to_string(), "ValueError: Circular reference detected");

    let source = "\
def fun():
    d = {}
    d['self'] = d
    return ['%r' % (d,), repr([d])]
";
    assert_eq!(
        run(source, vec![]).unwrap(),
        json!(["{'self': {...}}", "[{'self': {...}}]"])
    );
}

#[test]
fn test_while_with_break() {
    let source = "\
def fun(limit):
    total = 0
    i = 0
    while True:
        i += 1
        if i > limit:
            break
        total += i
    return total
";
    assert_eq!(run(source, vec![json!(4)]).unwrap(), json!(10));
}

#[test]
fn test_unpacking_errors() {
    let source = "def fun(doc):\n    a, b = doc\n    return a\n";
    let err = run(source, vec![json!([1, 2, 3])]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "ValueError: too many values to unpack (expected 2) (line 2)"
    );
}

#[test]
fn test_call_argument_errors() {
    let err = run("def fun(a): return a", vec![json!(1), json!(2)]).unwrap_err();
    assert_eq!(
        err.message(),
        "fun() takes 1 positional argument but 2 were given"
    );

    let err = run("def fun(a, b): return a", vec![json!(1)]).unwrap_err();
    assert_eq!(
        err.message(),
        "fun() missing 1 required positional argument: 'b'"
    );
}

#[test]
fn test_attribute_errors() {
    let err = run("def fun(doc): return doc.field", vec![json!({})]).unwrap_err();
    assert_eq!(
        err.message(),
        "'dict' object has no attribute 'field'"
    );
}

#[test]
fn test_non_json_results_fail_conversion() {
    let err = run("def fun(doc): return len", vec![json!({})]).unwrap_err();
    assert_eq!(err.kind(), "TypeError");

    let err = run("def fun(doc): return float('nan')", vec![json!({})]).unwrap_err();
    assert_eq!(err.kind(), "ValueError");
}
