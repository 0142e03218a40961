use super::expression::ExpressionEvaluator;
use super::EvalResult;
use crate::ast::{Domain, DomainClause, DomainEntry, Expression, Literal};
use crate::context::Context;

impl ExpressionEvaluator {
    /// Resolve a stored filter into a concrete one: every expression-valued
    /// operand is replaced by its evaluated literal, while field paths,
    /// operator tags and the clause structure stay untouched. The external
    /// query layer receives a domain it can apply without any context.
    pub fn evaluate_domain(&self, domain: &Domain, context: &Context) -> EvalResult<Domain> {
        let mut entries = Vec::with_capacity(domain.entries().len());
        for entry in domain.entries() {
            entries.push(match entry {
                DomainEntry::Clause(clause) => {
                    let value = self.evaluate(&clause.operand, context)?;
                    DomainEntry::Clause(DomainClause {
                        path: clause.path.clone(),
                        operator: clause.operator.clone(),
                        operand: Expression::Literal(Literal::try_from(&value)?),
                    })
                }
                DomainEntry::Nested { combinator, domain } => DomainEntry::Nested {
                    combinator: *combinator,
                    domain: self.evaluate_domain(domain, context)?,
                },
            });
        }
        Ok(Domain(entries))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::expression::Value;
    use super::super::EvalError;
    use super::*;
    use crate::ast::{Combinator, Operator};

    fn context_with(entries: Vec<(&str, Value)>) -> Context {
        Context::default().overlay(
            entries
                .into_iter()
                .map(|(key, value)| (key.to_string(), value)),
        )
    }

    #[test]
    fn test_operands_resolve_to_literals() {
        let evaluator = ExpressionEvaluator::new();
        let context = context_with(vec![("min_age", Value::Integer(18))]);
        let domain = Domain::new().with_clause("age", ">", Expression::eval("min_age"));

        let resolved = evaluator.evaluate_domain(&domain, &context).unwrap();
        assert_eq!(resolved, Domain::new().with_clause("age", ">", 18));
    }

    #[test]
    fn test_shape_is_preserved() {
        let evaluator = ExpressionEvaluator::new();
        let context = context_with(vec![("threshold", Value::Integer(10))]);
        let domain = Domain::new()
            .with_clause("state", "=", "open")
            .with_nested(
                Combinator::Or,
                Domain::new()
                    .with_clause(
                        "qty",
                        ">=",
                        Expression::op(
                            Operator::Multiply,
                            vec![Expression::eval("threshold"), Expression::from(2)],
                        ),
                    )
                    .with_clause("priority", "=", Expression::eval("threshold")),
            );

        let resolved = evaluator.evaluate_domain(&domain, &context).unwrap();
        assert_eq!(
            resolved,
            Domain::new().with_clause("state", "=", "open").with_nested(
                Combinator::Or,
                Domain::new()
                    .with_clause("qty", ">=", 20)
                    .with_clause("priority", "=", 10)
            )
        );
    }

    #[test]
    fn test_unresolved_operand_fails() {
        let evaluator = ExpressionEvaluator::new();
        let context = Context::default();
        let domain = Domain::new().with_clause("age", ">", Expression::eval("min_age"));
        let result = evaluator.evaluate_domain(&domain, &context);
        assert!(matches!(
            result,
            Err(EvalError::UnresolvedVariable { path }) if path == "min_age"
        ));
    }

    #[test]
    fn test_literal_operands_pass_through() {
        let evaluator = ExpressionEvaluator::new();
        let context = Context::default();
        let domain = Domain::new().with_clause("active", "=", true);
        let resolved = evaluator.evaluate_domain(&domain, &context).unwrap();
        assert_eq!(resolved, domain);
    }
}
