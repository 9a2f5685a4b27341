//! Interpreter behaviour through the public API.

use std::sync::Arc;

use ecofed::config::InterpreterConfig;
use ecofed::{
    AggregateFunction, FilterOp, FilterValue, Interpreter, Operation, QueryError, Role,
    RoleContext, SchemaCatalog,
};
use pretty_assertions::assert_eq;

fn interpreter() -> Interpreter {
    Interpreter::new(Arc::new(SchemaCatalog::builtin()), &InterpreterConfig::default())
}

fn as_role(interpreter: &Interpreter, role: Role) -> RoleContext {
    RoleContext::for_role(role, interpreter.catalog())
}

#[test]
fn test_dashboard_questions() {
    let interp = interpreter();
    let role = as_role(&interp, Role::Researcher);

    let intent = interp
        .interpret("average temperature in Amazon Basin", &role)
        .unwrap();
    assert_eq!(intent.entity, "Climate");
    assert_eq!(intent.operation, Operation::Aggregate);
    let aggregation = intent.aggregation.unwrap();
    assert_eq!(aggregation.function, AggregateFunction::Average);
    assert_eq!(aggregation.field.as_deref(), Some("temperature"));
    assert_eq!(intent.filters.len(), 1);
    assert_eq!(intent.filters[0].field, "region_name");
    assert_eq!(intent.filters[0].op, FilterOp::Equals);
    assert_eq!(intent.filters[0].value, FilterValue::Text("Amazon Basin".into()));
    assert_eq!(intent.confidence, 1.0);

    let intent = interp
        .interpret("climate with rainfall greater than 200", &role)
        .unwrap();
    assert_eq!(intent.operation, Operation::Filter);
    assert_eq!(intent.filters[0].op, FilterOp::GreaterThan);
    assert_eq!(intent.filters[0].value, FilterValue::Number(200.0));
}

#[test]
fn test_interpretation_is_deterministic() {
    let interp = interpreter();
    let role = as_role(&interp, Role::Researcher);
    let questions = [
        "average temperature by region",
        "how many sensors per status",
        "max aqi by region where level is Moderate top 5",
        "humidity between 40 and 70",
    ];
    for question in questions {
        let first = interp.interpret(question, &role).unwrap();
        for _ in 0..5 {
            assert_eq!(interp.interpret(question, &role).unwrap(), first);
        }
    }
}

#[test]
fn test_confidence_stays_in_range() {
    let interp = interpreter();
    let role = as_role(&interp, Role::Researcher);
    for question in [
        "climate",
        "average temperature gizmo",
        "climate foo bar baz qux zap zip zop wibble wobble",
    ] {
        let intent = interp.interpret(question, &role).unwrap();
        assert!((0.0..=1.0).contains(&intent.confidence), "{question}");
    }
}

#[test]
fn test_unrecognized_question_is_ambiguous() {
    let interp = interpreter();
    let role = as_role(&interp, Role::Administrator);
    assert!(matches!(
        interp.interpret("show me stuff", &role),
        Err(QueryError::AmbiguousQuery(_))
    ));
}

#[test]
fn test_role_restrictions() {
    let interp = interpreter();
    let provider = as_role(&interp, Role::DataProvider);
    assert!(matches!(
        interp.interpret("average co2 level in sensor readings", &provider),
        Err(QueryError::Forbidden { .. })
    ));

    let researcher = as_role(&interp, Role::Researcher);
    let intent = interp
        .interpret("average co2 level in sensor readings", &researcher)
        .unwrap();
    assert_eq!(intent.entity, "SensorReading");
}
