use capsules_buildah::testing::StubRunner;
use capsules_buildah::Buildah;
use engine::{BuildScript, Capabilities, EngineError, ExecError, Literal, Outcome};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::rc::Rc;

#[derive(Clone, Default)]
struct Output(Rc<RefCell<Vec<u8>>>);

impl Output {
    fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Harness {
    stub: Rc<StubRunner>,
    out: Output,
    caps: Capabilities,
}

impl Harness {
    fn new() -> Self {
        Self::with_stub(StubRunner::new())
    }

    fn with_stub(stub: StubRunner) -> Self {
        let stub = Rc::new(stub);
        let out = Output::default();
        let caps = Capabilities::new(Buildah::new(stub.clone())).with_output(out.clone());
        Self { stub, out, caps }
    }

    fn run(&self, source: &str, raw: &[(&str, &str)]) -> Result<Outcome, EngineError> {
        let script = BuildScript::parse(source)?;
        let raw: BTreeMap<String, String> = raw
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let params = script.bind(&raw)?;
        Ok(script.execute(&params, &self.caps)?)
    }
}

const FRONT_MATTER: &str = "\
#| pip: requests
#| arg: count:int=3
";

fn bound(raw: &[(&str, &str)]) -> BTreeMap<String, Literal> {
    let script = BuildScript::parse(FRONT_MATTER).unwrap();
    let raw = raw
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    script.bind(&raw).unwrap()
}

#[test]
fn declared_parameters_bind_with_defaults_casts_and_passthrough() {
    assert_eq!(
        bound(&[]),
        BTreeMap::from([("count".to_string(), Literal::Int(3))])
    );
    assert_eq!(
        bound(&[("count", "7")]),
        BTreeMap::from([("count".to_string(), Literal::Int(7))])
    );
    assert_eq!(
        bound(&[("extra", "x")]),
        BTreeMap::from([
            ("count".to_string(), Literal::Int(3)),
            ("extra".to_string(), Literal::Str("x".to_string())),
        ])
    );
}

#[test]
fn committed_container_is_produced_after_a_single_minimal_config_call() {
    let h = Harness::new();
    let source = "\
#| arg: base = 'docker.io/library/alpine:3.20'
c = Container(base)
c.environ['X'] = '1'
return c.commit()
";
    let outcome = h.run(source, &[]).unwrap();

    let image = outcome.image().expect("an image is produced");
    assert_eq!(image.id(), "sha256:image2");
    assert_eq!(
        h.stub.calls_for("config"),
        vec![vec![
            "config".to_string(),
            "--env".to_string(),
            "X=1".to_string(),
            "working-container-1".to_string(),
        ]]
    );
    assert_eq!(h.stub.count("commit"), 1);
}

#[test]
fn producing_an_uncommitted_container_is_an_artifact_error() {
    let h = Harness::new();
    let err = h
        .run("c = Container('alpine')\nreturn c\n", &[])
        .unwrap_err();

    match err {
        EngineError::Exec(ExecError::UncommittedContainer { line }) => assert_eq!(line, 2),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.stub.count("rm"), 1, "the working container is still removed");
}

#[test]
fn script_without_top_level_return_produces_nothing() {
    let h = Harness::new();
    let source = "
def helper() {
    return 'not an artifact'
}
class Steps {
    def build() { return 1 }
}
x = helper()
";
    assert_eq!(h.run(source, &[]).unwrap(), Outcome::Empty);
    assert!(h.stub.calls().is_empty());
}

#[test]
fn containers_are_released_when_the_script_fails() {
    let h = Harness::new();
    let source = "
a = Container('alpine')
b = Container('alpine')
missing_name + 1
";
    let err = h.run(source, &[]).unwrap_err();
    assert!(err.to_string().contains("NameError"), "{}", err);
    assert_eq!(h.stub.count("rm"), 2);
    assert_eq!(h.caps.open_containers(), 0);
}

#[test]
fn external_tool_failures_are_catchable() {
    let h = Harness::with_stub(StubRunner::new().fail_on("commit"));
    let source = "
c = Container('alpine')
try {
    c.commit()
} except as err {
    print(err.startswith('ToolError'))
}
";
    assert_eq!(h.run(source, &[]).unwrap(), Outcome::Empty);
    assert_eq!(h.out.text(), "True\n");
}

#[test]
fn uncaught_tool_failures_keep_their_line() {
    let h = Harness::with_stub(StubRunner::new().fail_on("commit"));
    let err = h
        .run("c = Container('alpine')\n\nc.commit()\n", &[])
        .unwrap_err();
    match err {
        EngineError::Exec(exec @ ExecError::Tool { .. }) => {
            assert_eq!(exec.line(), 3);
            assert_eq!(exec.code(), "BUILDAH_COMMAND_FAILED");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn parameters_are_visible_as_globals() {
    let h = Harness::new();
    let source = "\
#| arg: count:int=3
#| arg: tags:list
for i in range(count) { print(i, end=' ') }
print(tags)
";
    h.run(source, &[("tags", "a, b")]).unwrap();
    assert_eq!(h.out.text(), "0 1 2 ['a', 'b']\n");
}

#[test]
fn run_output_can_be_captured() {
    let h = Harness::with_stub(StubRunner::new().with_captured_output("hello\n"));
    let source = "
c = Container('alpine')
out = c.run(['echo', 'hello'], capture=True)
print(out.strip())
";
    h.run(source, &[]).unwrap();
    assert_eq!(h.out.text(), "hello\n");
    assert_eq!(h.stub.count("run"), 1);
}

#[test]
fn bad_caster_input_fails_before_anything_runs() {
    let h = Harness::new();
    let err = h
        .run("#| arg: count:int\nc = Container('alpine')\n", &[("count", "many")])
        .unwrap_err();
    assert!(matches!(err, EngineError::Bind(_)));
    assert!(h.stub.calls().is_empty());
}

#[test]
fn oversized_repeats_are_catchable_memory_errors() {
    let h = Harness::new();
    let source = "
try { x = 'ab' * 9223372036854775807 } except as e { print(e) }
try { y = [1, 2] * 9223372036854775807 } except as e { print(e) }
print(len('ab' * 3), len([0] * -1))
";
    assert_eq!(h.run(source, &[]).unwrap(), Outcome::Empty);
    assert_eq!(
        h.out.text(),
        "MemoryError: repeated string too large\nMemoryError: repeated list too large\n6 0\n"
    );
}

#[test]
fn self_referencing_list_prints_and_compares() {
    let h = Harness::new();
    let source = "
c = Container('alpine')
a = [1]
a.append(a)
print(a)
print(a == a, a in a)
";
    assert_eq!(h.run(source, &[]).unwrap(), Outcome::Empty);
    assert_eq!(h.out.text(), "[1, [...]]\nTrue True\n");
    assert_eq!(h.stub.count("rm"), 1);
}

#[test]
fn with_block_releases_its_container_on_exit() {
    let h = Harness::new();
    let source = "
with Container('alpine') as c {
    c.environ['A'] = '1'
}
d = Container('alpine')
";
    assert_eq!(h.run(source, &[]).unwrap(), Outcome::Empty);
    assert_eq!(
        h.stub.subcommands(),
        vec!["from", "inspect", "rm", "from", "inspect", "rm"]
    );
    assert_eq!(
        h.stub.calls_for("rm"),
        vec![
            vec!["rm".to_string(), "working-container-1".to_string()],
            vec!["rm".to_string(), "working-container-2".to_string()],
        ]
    );
}

#[test]
fn with_block_releases_its_container_when_the_body_fails() {
    let h = Harness::new();
    let source = "
try {
    with Container('alpine') as c {
        missing + 1
    }
} except as e {
    print(e)
}
";
    assert_eq!(h.run(source, &[]).unwrap(), Outcome::Empty);
    assert_eq!(h.out.text(), "NameError: name 'missing' is not defined\n");
    assert_eq!(h.stub.subcommands(), vec!["from", "inspect", "rm"]);
}

#[test]
fn finally_runs_before_a_failure_propagates() {
    let h = Harness::with_stub(StubRunner::new().fail_on("commit"));
    let source = "
c = Container('alpine')
try {
    c.commit()
} finally {
    print('finally ran')
}
print('unreachable')
";
    let err = h.run(source, &[]).unwrap_err();
    match err {
        EngineError::Exec(exec @ ExecError::Tool { .. }) => assert_eq!(exec.line(), 4),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.out.text(), "finally ran\n");
    assert_eq!(h.stub.count("rm"), 1);

    let h = Harness::new();
    assert_eq!(h.run("try { x = 1 } finally { }\n", &[]).unwrap(), Outcome::Empty);
}

#[test]
fn runaway_recursion_is_a_catchable_recursion_error() {
    let h = Harness::new();
    let source = "
def down(n) { return down(n + 1) }
try { down(0) } except as e { print(e) }
";
    assert_eq!(h.run(source, &[]).unwrap(), Outcome::Empty);
    assert_eq!(h.out.text(), "RecursionError: maximum call depth exceeded\n");
}

#[test]
fn copy_out_copies_from_the_mounted_container() {
    let rootfs = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(rootfs.path().join("etc")).unwrap();
    std::fs::write(rootfs.path().join("etc/app.conf"), "listen 80\n").unwrap();
    let host = tempfile::tempdir().unwrap();
    let dest = host.path().join("app.conf");

    let h = Harness::with_stub(StubRunner::new().with_mount_root(rootfs.path()));
    let source = "\
#| arg: dest
c = Container('alpine')
c.copy_out('/etc/app.conf', dest)
";
    h.run(source, &[("dest", dest.to_str().unwrap())]).unwrap();

    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "listen 80\n");
    assert_eq!(h.stub.count("mount"), 1);
    assert_eq!(h.stub.count("umount"), 1);
}
