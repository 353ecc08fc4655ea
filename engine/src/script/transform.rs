use super::ast::{Handler, Program, Stmt, StmtKind};

/// Turn every program-level `return` into a `Produce` statement.
///
/// Blocks of `if`, `while`, `for`, `try` and `with` are followed; `def` and
/// `class` bodies are left alone, so a `return` there stays an ordinary
/// function return. Programs without a program-level `return` come back
/// unchanged.
pub fn transform(program: Program) -> Program {
    Program {
        body: rewrite_block(program.body),
    }
}

fn rewrite_block(body: Vec<Stmt>) -> Vec<Stmt> {
    body.into_iter().map(rewrite).collect()
}

fn rewrite(stmt: Stmt) -> Stmt {
    let kind = match stmt.kind {
        StmtKind::Return(value) => StmtKind::Produce(value),
        StmtKind::If { branches, orelse } => StmtKind::If {
            branches: branches
                .into_iter()
                .map(|(cond, body)| (cond, rewrite_block(body)))
                .collect(),
            orelse: rewrite_block(orelse),
        },
        StmtKind::While { cond, body } => StmtKind::While {
            cond,
            body: rewrite_block(body),
        },
        StmtKind::For { vars, iter, body } => StmtKind::For {
            vars,
            iter,
            body: rewrite_block(body),
        },
        StmtKind::Try {
            body,
            handler,
            finally,
        } => StmtKind::Try {
            body: rewrite_block(body),
            handler: handler.map(|h| Handler {
                name: h.name,
                body: rewrite_block(h.body),
            }),
            finally: rewrite_block(finally),
        },
        StmtKind::With {
            context,
            name,
            body,
        } => StmtKind::With {
            context,
            name,
            body: rewrite_block(body),
        },
        other => other,
    };
    Stmt {
        line: stmt.line,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_program;

    #[test]
    fn nested_blocks_are_rewritten_at_same_line() {
        let src = "if ok {\n  while x {\n    return img\n  }\n}\n";
        let program = transform(parse_program(src).unwrap());
        let StmtKind::If { branches, .. } = &program.body[0].kind else {
            panic!("expected if");
        };
        let StmtKind::While { body, .. } = &branches[0].1[0].kind else {
            panic!("expected while");
        };
        assert_eq!(body[0].line, 3);
        assert!(matches!(body[0].kind, StmtKind::Produce(Some(_))));
    }

    #[test]
    fn except_and_finally_blocks_are_rewritten() {
        let src = "try { x() } except { return None } finally { return }";
        let program = transform(parse_program(src).unwrap());
        let StmtKind::Try {
            handler, finally, ..
        } = &program.body[0].kind
        else {
            panic!("expected try");
        };
        assert!(matches!(
            handler.as_ref().unwrap().body[0].kind,
            StmtKind::Produce(Some(_))
        ));
        assert!(matches!(finally[0].kind, StmtKind::Produce(None)));
    }
}
