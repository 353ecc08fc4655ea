use engine::script::ast::{Expr, StmtKind};
use engine::script::{parse_program, transform};

const NO_TOP_LEVEL_RETURN: &str = "
def build(base) {
    if base { return base }
    return None
}
class Recipes {
    def tag() { return 'latest' }
}
for i in range(3) { print(i) }
";

#[test]
fn programs_without_top_level_return_are_unchanged() {
    let program = parse_program(NO_TOP_LEVEL_RETURN).unwrap();
    let once = transform(program.clone());
    assert_eq!(once, program);
    assert_eq!(transform(once.clone()), once);
}

#[test]
fn function_and_class_bodies_are_never_rewritten() {
    let source = format!("{}return build('x')\n", NO_TOP_LEVEL_RETURN);
    let program = transform(parse_program(&source).unwrap());

    let last = program.body.last().unwrap();
    assert!(matches!(&last.kind, StmtKind::Produce(Some(Expr::Call { .. }))));

    let StmtKind::Def(def) = &program.body[0].kind else {
        panic!("expected def first");
    };
    assert!(matches!(def.body.last().unwrap().kind, StmtKind::Return(_)));

    let StmtKind::Class { body, .. } = &program.body[1].kind else {
        panic!("expected class second");
    };
    let StmtKind::Def(method) = &body[0].kind else {
        panic!("expected method");
    };
    assert!(matches!(method.body[0].kind, StmtKind::Return(_)));
}

#[test]
fn transform_is_idempotent_after_rewriting() {
    let program = transform(parse_program("while True {\n    return None\n}\n").unwrap());
    assert_eq!(transform(program.clone()), program);
    let StmtKind::While { body, .. } = &program.body[0].kind else {
        panic!("expected while");
    };
    assert_eq!(body[0].line, 2);
    assert!(matches!(body[0].kind, StmtKind::Produce(None)));
}

#[test]
fn runaway_nesting_is_a_parse_error() {
    let parens = format!("x = {}1{}\n", "(".repeat(200_000), ")".repeat(200_000));
    let err = parse_program(&parens).unwrap_err();
    assert_eq!(err.line, 1);
    assert_eq!(err.message, "expression nested too deeply");

    let blocks = format!("{}{}", "if True {\n".repeat(1_000), "}\n".repeat(1_000));
    let err = parse_program(&blocks).unwrap_err();
    assert!(err.message.ends_with("nested too deeply"), "{}", err.message);
    assert!(err.line > 1);

    let modest = format!("{}{}", "if True {\n".repeat(20), "}\n".repeat(20));
    assert!(parse_program(&modest).is_ok());
}
