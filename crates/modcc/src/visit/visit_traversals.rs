use super::Visit;
use hcl::{
    template::{Directive, Element},
    Expression, Operation, Template, Traversal, TraversalOperator,
};

/// Recursively visit all [hcl::Traversal]s
///
/// Standalone variables count as traversals with no operators so the same
/// visitor sees every symbol reference in an expression.
pub trait VisitTraversals {
    fn visit_traversals(&self, visitor: &mut dyn Visit<Traversal>);
}

impl VisitTraversals for Expression {
    fn visit_traversals(&self, visitor: &mut dyn Visit<Traversal>) {
        match self {
            Expression::Variable(variable) => {
                // a standalone variable is a traversal with no operators...kind of
                let traversal = Traversal::new(
                    Expression::Variable(variable.clone()),
                    Vec::<TraversalOperator>::new(),
                );
                visitor.visit(&traversal);
            }
            Expression::Traversal(traversal) => {
                visitor.visit(traversal);
                traversal.expr.visit_traversals(visitor);
                for operator in &traversal.operators {
                    if let TraversalOperator::Index(expr) = operator {
                        expr.visit_traversals(visitor);
                    }
                }
            }
            Expression::Array(array) => {
                for expr in array {
                    expr.visit_traversals(visitor);
                }
            }
            Expression::Object(object) => {
                for value in object.values() {
                    value.visit_traversals(visitor);
                }
            }
            Expression::TemplateExpr(template_expr) => {
                if let Ok(template) = Template::from_expr(template_expr) {
                    template.visit_traversals(visitor);
                }
            }
            Expression::FuncCall(func_call) => {
                for arg in &func_call.args {
                    arg.visit_traversals(visitor);
                }
            }
            Expression::Parenthesis(expr) => {
                expr.visit_traversals(visitor);
            }
            Expression::Conditional(cond) => {
                cond.cond_expr.visit_traversals(visitor);
                cond.true_expr.visit_traversals(visitor);
                cond.false_expr.visit_traversals(visitor);
            }
            Expression::Operation(operation) => match operation.as_ref() {
                Operation::Binary(binop) => {
                    binop.lhs_expr.visit_traversals(visitor);
                    binop.rhs_expr.visit_traversals(visitor);
                }
                Operation::Unary(unop) => {
                    unop.expr.visit_traversals(visitor);
                }
            },
            Expression::ForExpr(forexpr) => {
                forexpr
                    .cond_expr
                    .iter()
                    .for_each(|e| e.visit_traversals(visitor));
                forexpr
                    .key_expr
                    .iter()
                    .for_each(|e| e.visit_traversals(visitor));
                forexpr.value_expr.visit_traversals(visitor);
                forexpr.collection_expr.visit_traversals(visitor);
            }
            _ => {}
        }
    }
}

impl VisitTraversals for Template {
    fn visit_traversals(&self, visitor: &mut dyn Visit<Traversal>) {
        for element in self.elements() {
            match element {
                Element::Interpolation(interpolation) => {
                    interpolation.expr.visit_traversals(visitor);
                }
                Element::Directive(directive) => match directive {
                    Directive::If(ifdir) => {
                        ifdir.cond_expr.visit_traversals(visitor);
                        ifdir.true_template.visit_traversals(visitor);
                        ifdir
                            .false_template
                            .iter()
                            .for_each(|t| t.visit_traversals(visitor));
                    }
                    Directive::For(fordir) => {
                        fordir.collection_expr.visit_traversals(visitor);
                        fordir.template.visit_traversals(visitor);
                    }
                },
                Element::Literal(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn collect(expr: &Expression) -> Vec<Traversal> {
        let mut found = Vec::new();
        expr.visit_traversals(&mut |t: &Traversal| found.push(t.clone()));
        found
    }

    #[test]
    fn standalone_variable_is_visited() {
        let expr = Expression::Variable(hcl::Variable::unchecked("region"));
        assert_eq!(collect(&expr).len(), 1);
    }

    #[test]
    fn traversals_inside_templates_are_visited() {
        let expr: hcl_edit::expr::Expression = r#""${var.region}-suffix""#.parse().unwrap();
        let expr: Expression = expr.into();
        let found = collect(&expr);
        assert_eq!(found.len(), 1);
    }
}
