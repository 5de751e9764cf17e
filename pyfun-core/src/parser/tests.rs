//! Unit tests for the pyfun parser.

use super::*;

fn single_function(source: &str) -> Rc<FunctionDef> {
    let module = parse(source).unwrap();
    assert_eq!(module.body.len(), 1);
    match &module.body[0].kind {
        StmtKind::FunctionDef(def) => def.clone(),
        other => panic!("expected function definition, got {:?}", other),
    }
}

#[test]
fn test_parse_one_line_generator() {
    let def = single_function("def fun(doc): yield None, doc");
    assert_eq!(def.name, "fun");
    assert_eq!(def.params.len(), 1);
    assert!(def.is_generator);
    assert!(matches!(
        &def.body[0].kind,
        StmtKind::Yield(Some(Expr::Tuple(items))) if items.len() == 2
    ));
}

#[test]
fn test_parse_semicolon_separated_body() {
    let def = single_function("def fun(doc): log('running'); yield None, doc");
    assert_eq!(def.body.len(), 2);
    assert!(matches!(&def.body[0].kind, StmtKind::Expr(Expr::Call { .. })));
}

#[test]
fn test_parse_reduce_function() {
    let def = single_function("def fun(keys, values, rereduce): return sum(values)");
    assert_eq!(def.params.len(), 3);
    assert!(!def.is_generator);
    assert!(matches!(&def.body[0].kind, StmtKind::Return(Some(_))));
}

#[test]
fn test_parse_indented_update_function() {
    let source = "def fun(obj, req):\n    if obj is not None:\n        obj['field'] += 1\n    return [obj, {\"body\": \".\"}]\n";
    let def = single_function(source);
    assert_eq!(def.body.len(), 2);

    match &def.body[0].kind {
        StmtKind::If { branches, orelse } => {
            assert_eq!(branches.len(), 1);
            assert!(orelse.is_empty());
            assert!(matches!(
                &branches[0].0,
                Expr::Compare { comparisons, .. } if comparisons[0].0 == CompareOperator::IsNot
            ));
            assert!(matches!(
                &branches[0].1[0].kind,
                StmtKind::AugAssign { op: BinaryOperator::Add, target: Expr::Subscript { .. }, .. }
            ));
        }
        other => panic!("expected if statement, got {:?}", other),
    }
    assert_eq!(def.body[1].line, 4);
}

#[test]
fn test_parse_if_elif_else() {
    let source = "def f(x):\n    if x > 1:\n        return 'a'\n    elif x == 1:\n        return 'b'\n    else:\n        return 'c'\n";
    let def = single_function(source);
    match &def.body[0].kind {
        StmtKind::If { branches, orelse } => {
            assert_eq!(branches.len(), 2);
            assert_eq!(orelse.len(), 1);
        }
        other => panic!("expected if statement, got {:?}", other),
    }
}

#[test]
fn test_parse_for_with_unpacking() {
    let source = "def f(doc):\n    for k, v in doc.items():\n        yield k, v\n";
    let def = single_function(source);
    match &def.body[0].kind {
        StmtKind::For { target, .. } => {
            assert!(matches!(target, Expr::Tuple(items) if items.len() == 2));
        }
        other => panic!("expected for statement, got {:?}", other),
    }
}

#[test]
fn test_parse_try_except() {
    let source = "def f(doc):\n    try:\n        return doc['x']\n    except (KeyError, TypeError) as e:\n        return None\n    finally:\n        pass\n";
    let def = single_function(source);
    match &def.body[0].kind {
        StmtKind::Try {
            handlers, finally, ..
        } => {
            assert_eq!(handlers[0].classes, vec!["KeyError", "TypeError"]);
            assert_eq!(handlers[0].binding.as_deref(), Some("e"));
            assert_eq!(finally.len(), 1);
        }
        other => panic!("expected try statement, got {:?}", other),
    }
}

#[test]
fn test_parse_comprehensions() {
    let def = single_function("def f(values): return sum(v * 2 for v in values if v)");
    match &def.body[0].kind {
        StmtKind::Return(Some(Expr::Call { args, .. })) => {
            assert!(matches!(&args[0], Expr::ListComp { generators, .. } if generators[0].conditions.len() == 1));
        }
        other => panic!("unexpected {:?}", other),
    }

    let def = single_function("def f(d): return {k: v for k, v in d.items()}");
    assert!(matches!(
        &def.body[0].kind,
        StmtKind::Return(Some(Expr::DictComp { .. }))
    ));
}

#[test]
fn test_parse_keyword_arguments_and_lambda() {
    let def = single_function("def f(xs): return sorted(xs, key=lambda x: -x, reverse=True)");
    match &def.body[0].kind {
        StmtKind::Return(Some(Expr::Call { args, kwargs, .. })) => {
            assert_eq!(args.len(), 1);
            assert_eq!(kwargs.len(), 2);
            assert!(matches!(&kwargs[0].1, Expr::Lambda(_)));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_parse_slices() {
    let def = single_function("def f(s): return s[1:], s[::-1], s[:2]");
    match &def.body[0].kind {
        StmtKind::Return(Some(Expr::Tuple(items))) => {
            assert_eq!(items.len(), 3);
            assert!(items.iter().all(|item| matches!(item, Expr::Slice { .. })));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_parse_power_binds_tighter_than_unary_minus() {
    let def = single_function("def f(x): return -x ** 2");
    assert!(matches!(
        &def.body[0].kind,
        StmtKind::Return(Some(Expr::Unary { op: UnaryOperator::Negate, operand })) if matches!(**operand, Expr::Binary { op: BinaryOperator::Power, .. })
    ));
}

#[test]
fn test_parse_adjacent_strings() {
    let module = parse("x = 'a' 'b'").unwrap();
    assert!(matches!(
        &module.body[0].kind,
        StmtKind::Assign { value: Expr::Literal(Literal::Str(s)), .. } if &**s == "ab"
    ));
}

#[test]
fn test_parse_chained_assignment() {
    let module = parse("a = b = 1").unwrap();
    assert!(matches!(
        &module.body[0].kind,
        StmtKind::Assign { targets, .. } if targets.len() == 2
    ));
}

#[test]
fn test_parse_errors() {
    assert!(parse("def fun(doc) yield doc").is_err());
    assert!(parse("return 1").is_err());
    assert!(parse("yield 1").is_err());
    assert!(parse("import os").is_err());
    assert!(parse("def f(x):\n    break\n").is_err());
    assert!(parse("def f(x=1, y): pass").is_err());
    assert!(parse("def f(x): x.y = 1").is_err());
    assert!(parse("def f(x): return {1, 2}").is_err());
    assert!(parse("def f(x):\nreturn x").is_err());
    assert!(parse("f(x) = 1").is_err());
}

#[test]
fn test_nesting_depth_is_limited() {
    let nested = |depth: usize| {
        format!(
            "def fun(keys, values): return {}1{}",
            "(".repeat(depth),
            ")".repeat(depth)
        )
    };
    assert!(parse(&nested(40)).is_ok());

    let err = parse(&nested(1000)).unwrap_err();
    assert_eq!(err.kind(), "SyntaxError");
    assert!(err.message().starts_with("too many nested"));

    let chain = format!("def fun(doc): return 1{}", " + 1".repeat(5000));
    assert_eq!(parse(&chain).unwrap_err().kind(), "SyntaxError");
    assert!(parse(&format!("def fun(doc): return 1{}", " + 1".repeat(20))).is_ok());

    for unary in ["not ", "-"] {
        let source = format!("def fun(doc): return {}1", unary.repeat(5000));
        assert_eq!(parse(&source).unwrap_err().kind(), "SyntaxError");
    }

    let mut blocks = String::from("def fun(doc):\n");
    for depth in 1..=150 {
        blocks.push_str(&format!("{}if doc:\n", "    ".repeat(depth)));
    }
    blocks.push_str(&format!("{}pass\n", "    ".repeat(151)));
    assert_eq!(parse(&blocks).unwrap_err().kind(), "SyntaxError");
}

#[test]
fn test_nested_function_does_not_make_outer_generator() {
    let source = "def outer(doc):\n    def inner(x):\n        yield x\n    return list(inner(doc))\n";
    let def = single_function(source);
    assert!(!def.is_generator);
    match &def.body[0].kind {
        StmtKind::FunctionDef(inner) => assert!(inner.is_generator),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_syntax_error_reports_line() {
    let err = parse("def f(x):\n    y = (\n        1 +\n    ]\n").unwrap_err();
    assert_eq!(err.kind(), "SyntaxError");
}
