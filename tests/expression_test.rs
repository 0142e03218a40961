//! Wire-format and evaluation properties of the expression language.

use std::collections::HashMap;

use proptest::prelude::*;
use serde_json::json;

use kasane::context;
use kasane::{
    decode, decode_domain, encode, encode_domain, Domain, Expression, ExpressionEvaluator,
    Literal, Operator, Value,
};

#[test]
fn variable_reference_wire_shape() {
    let expr = decode(&json!({"op": "eval", "path": "service"})).unwrap();
    assert_eq!(expr, Expression::eval("service"));
    assert_eq!(encode(&expr), json!({"op": "eval", "path": "service"}));
}

#[test]
fn operator_wire_shape() {
    let wire = json!({"op": ">", "args": [{"op": "eval", "path": "age"}, 18]});
    let expr = decode(&wire).unwrap();
    assert_eq!(
        expr,
        Expression::op(
            Operator::GreaterThan,
            vec![Expression::eval("age"), Expression::from(18)],
        )
    );
    assert_eq!(encode(&expr), wire);
}

#[test]
fn domain_resolution_equivalence() {
    // [("age", ">", Eval(min_age))] against {min_age: 18} -> [("age", ">", 18)]
    let domain = decode_domain(&json!([["age", ">", {"op": "eval", "path": "min_age"}]])).unwrap();

    let scope = context::push(HashMap::from([(
        "min_age".to_string(),
        Value::Integer(18),
    )]))
    .unwrap();
    let resolved = ExpressionEvaluator::new()
        .evaluate_domain(&domain, &context::current())
        .unwrap();
    scope.release().unwrap();

    assert_eq!(encode_domain(&resolved), json!([["age", ">", 18]]));
}

#[test]
fn decoded_expression_evaluates_like_the_original() {
    let expr = Expression::op(
        Operator::And,
        vec![
            Expression::op(
                Operator::GreaterThanEqual,
                vec![Expression::eval("qty"), Expression::from(10)],
            ),
            Expression::op(Operator::Bool, vec![Expression::eval("active")]),
        ],
    );
    let decoded = decode(&encode(&expr)).unwrap();

    let scope = context::push(HashMap::from([
        ("qty".to_string(), Value::Integer(25)),
        ("active".to_string(), Value::Boolean(true)),
    ]))
    .unwrap();
    let evaluator = ExpressionEvaluator::new();
    let context = context::current();
    assert_eq!(
        evaluator.evaluate(&expr, &context).unwrap(),
        evaluator.evaluate(&decoded, &context).unwrap()
    );
    assert_eq!(
        evaluator.evaluate(&decoded, &context).unwrap(),
        Value::Boolean(true)
    );
    scope.release().unwrap();
}

fn literal_strategy() -> impl Strategy<Value = Literal> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(Literal::Integer),
        (-1.0e9f64..1.0e9f64).prop_map(Literal::Float),
        "[a-z ]{0,8}".prop_map(Literal::String),
        any::<bool>().prop_map(Literal::Boolean),
        Just(Literal::Null),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Literal::List),
            prop::collection::btree_map("[a-z]{1,4}|op", inner, 0..4).prop_map(Literal::Map),
        ]
    })
}

fn operator_strategy() -> impl Strategy<Value = Operator> {
    prop::sample::select(vec![
        Operator::Add,
        Operator::Subtract,
        Operator::Multiply,
        Operator::Divide,
        Operator::Equal,
        Operator::NotEqual,
        Operator::LessThan,
        Operator::GreaterThan,
        Operator::LessThanEqual,
        Operator::GreaterThanEqual,
        Operator::And,
        Operator::Or,
        Operator::Not,
        Operator::Bool,
        Operator::In,
        Operator::If,
    ])
}

fn expression_strategy() -> impl Strategy<Value = Expression> {
    let leaf = prop_oneof![
        literal_strategy().prop_map(Expression::Literal),
        r"[a-z]{1,6}(\.[a-z]{1,6}){0,2}".prop_map(|path| Expression::eval(&path)),
    ];
    leaf.prop_recursive(3, 24, 3, |inner| {
        (operator_strategy(), prop::collection::vec(inner, 1..4))
            .prop_map(|(op, args)| Expression::Op { op, args })
    })
}

proptest! {
    #[test]
    fn decode_inverts_encode(expr in expression_strategy()) {
        prop_assert_eq!(decode(&encode(&expr)).unwrap(), expr);
    }

    #[test]
    fn serde_roundtrip_through_text(expr in expression_strategy()) {
        let text = serde_json::to_string(&expr).unwrap();
        let parsed: Expression = serde_json::from_str(&text).unwrap();
        prop_assert_eq!(parsed, expr);
    }

    #[test]
    fn domain_roundtrip(
        clauses in prop::collection::vec(
            (r"[a-z]{1,6}(\.[a-z]{1,6}){0,1}", "=|!=|<|>|like", expression_strategy()),
            1..4,
        )
    ) {
        let mut domain = Domain::new();
        for (path, operator, operand) in clauses {
            domain = domain.with_clause(path, operator, operand);
        }
        prop_assert_eq!(decode_domain(&encode_domain(&domain)).unwrap(), domain);
    }
}
