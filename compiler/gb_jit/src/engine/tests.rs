//! Engine tests against a scripted toolchain.
//!
//! The fake `mlir-opt` echoes its input (failing on `--fail*` passes and
//! spelling type stubs as `llvm.func`). The fake `mlir-translate` emits the
//! LLVM IR embedded in `// llvm:` comments, or for wrapper units, the LLVM IR
//! in `wrapper.ll`.

use std::path::Path;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use super::*;
use crate::value::{Output, Scalar, Value};

const OPT: &str = r#"for last; do :; done
for a in "$@"; do
  case "$a" in
    --fail*) echo "error: $a rejected the input" >&2; exit 1 ;;
  esac
done
sed 's/^func private @__gb_lower_/llvm.func @__gb_lower_/' "$last"
"#;

fn translate_script(dir: &Path) -> String {
    let dir = dir.display();
    format!(
        r#"for last; do :; done
if grep -q "wrapper(" "$last"; then
  cp "$last" "{dir}/wrapper-input.mlir"
  cat "{dir}/wrapper.ll"
else
  sed -n 's|^// llvm: ||p' "$last"
fi
"#
    )
}

struct Fixture {
    dir: TempDir,
    engine: Engine,
}

fn fixture() -> Option<Fixture> {
    if !Path::new("/bin/sh").exists() {
        return None;
    }
    let dir = tempfile::tempdir().unwrap();
    let opt = dir.path().join("opt.sh");
    let translate = dir.path().join("translate.sh");
    std::fs::write(&opt, OPT).unwrap();
    std::fs::write(&translate, translate_script(dir.path())).unwrap();
    let config = EngineConfig::new()
        .with_mlir_opt("/bin/sh")
        .with_mlir_translate("/bin/sh")
        .with_opt_args([opt.display().to_string()])
        .with_translate_args([translate.display().to_string()])
        .with_opt_level(0);
    let engine = Engine::new(config).ok()?;
    Some(Fixture { dir, engine })
}

fn passes() -> Vec<String> {
    vec!["--convert-to-llvm".to_string()]
}

fn add(engine: &mut Engine, ir: &str) -> JitResult<Vec<String>> {
    let outcome = engine.add(ir, &passes(), &AddOptions::new())?;
    Ok(outcome.names().unwrap().to_vec())
}

fn registered(engine: &Engine) -> Vec<String> {
    engine.names().map(ToString::to_string).collect()
}

const ADD_ONE: &str = r"
func @add_one(%x: i64) -> i64 {
  %c1 = arith.constant 1 : i64
  %r = arith.addi %x, %c1 : i64
  return %r : i64
}
// llvm: define i64 @add_one(i64 %x) {
// llvm:   %r = add i64 %x, 1
// llvm:   ret i64 %r
// llvm: }
";

const PAIR: &str = r"
func @pair(%x: i64) -> (i64, f64) {
  %c = arith.constant 1.5 : f64
  return %x, %c : i64, f64
}
// llvm: define { i64, double } @pair(i64 %x) {
// llvm:   %a = insertvalue { i64, double } undef, i64 %x, 0
// llvm:   %b = insertvalue { i64, double } %a, double 1.5, 1
// llvm:   ret { i64, double } %b
// llvm: }
";

const PAIR_WRAPPER_LL: &str = r"
declare { i64, double } @pair(i64)

define void @pairwrapper(ptr %first, ptr %second, i64 %x) {
  %r = call { i64, double } @pair(i64 %x)
  %r0 = extractvalue { i64, double } %r, 0
  %r1 = extractvalue { i64, double } %r, 1
  store i64 %r0, ptr %first
  store double %r1, ptr %second
  ret void
}
";

#[test]
fn add_one_returns_six() {
    let Some(Fixture { dir: _dir, mut engine }) = fixture() else { return };
    assert_eq!(add(&mut engine, ADD_ONE).unwrap(), vec!["add_one"]);

    let add_one = engine.get("add_one").unwrap();
    assert_eq!(add_one.arity(), 1);
    let out = add_one.call(&[Value::from(5i64)]).unwrap();
    assert_eq!(out.into_single().unwrap().as_scalar(), Some(Scalar::I64(6)));
}

#[test]
fn multiple_results_come_back_as_a_tuple() {
    let Some(Fixture { dir, mut engine }) = fixture() else { return };
    std::fs::write(dir.path().join("wrapper.ll"), PAIR_WRAPPER_LL).unwrap();
    assert_eq!(add(&mut engine, PAIR).unwrap(), vec!["pair"]);

    let wrapper_input = std::fs::read_to_string(dir.path().join("wrapper-input.mlir")).unwrap();
    assert!(wrapper_input.contains("func @pairwrapper("), "{wrapper_input}");
    assert!(wrapper_input.contains("call @pair(%x)"), "{wrapper_input}");

    let values = engine
        .get("pair")
        .unwrap()
        .call(&[Value::from(3i64)])
        .unwrap()
        .into_tuple()
        .unwrap();
    let scalars: Vec<_> = values.iter().map(|v| v.as_scalar().unwrap()).collect();
    assert_eq!(scalars, vec![Scalar::I64(3), Scalar::F64(1.5)]);
}

#[test]
fn no_results_is_none() {
    let Some(Fixture { dir: _dir, mut engine }) = fixture() else { return };
    add(
        &mut engine,
        "func @noop() {\n  return\n}\n// llvm: define void @noop() {\n// llvm:   ret void\n// llvm: }\n",
    )
    .unwrap();
    assert!(matches!(engine.get("noop").unwrap().call(&[]).unwrap(), Output::None));
}

#[test]
fn wrong_arity_leaves_the_engine_unchanged() {
    let Some(Fixture { dir: _dir, mut engine }) = fixture() else { return };
    add(&mut engine, ADD_ONE).unwrap();
    let before = registered(&engine);

    let add_one = engine.get("add_one").unwrap();
    let err = add_one
        .call(&[Value::from(1i64), Value::from(2i64)])
        .unwrap_err();
    match err {
        JitError::ArityMismatch {
            name,
            expected,
            got,
        } => {
            assert_eq!(name, "add_one");
            assert_eq!((expected, got), (1, 2));
        }
        other => panic!("expected an arity mismatch, got {other}"),
    }
    assert_eq!(registered(&engine), before);
    let out = add_one.call(&[Value::from(1i64)]).unwrap();
    assert_eq!(out.into_single().unwrap().as_scalar(), Some(Scalar::I64(2)));
}

#[test]
fn redefinitions_are_rejected() {
    let Some(Fixture { dir: _dir, mut engine }) = fixture() else { return };
    add(&mut engine, ADD_ONE).unwrap();
    let before = registered(&engine);

    let err = add(&mut engine, ADD_ONE).unwrap_err();
    assert!(matches!(err, JitError::DuplicateDefinition { ref name } if name == "add_one"), "{err}");
    assert_eq!(registered(&engine), before);

    let twice = "func @twice() {\n  return\n}\nfunc @twice() {\n  return\n}\n";
    let err = add(&mut engine, twice).unwrap_err();
    assert!(matches!(err, JitError::DuplicateDefinition { ref name } if name == "twice"), "{err}");
    assert_eq!(registered(&engine), before);
}

#[test]
fn wrapper_names_may_not_be_taken() {
    let Some(Fixture { dir: _dir, mut engine }) = fixture() else { return };
    let ir = format!("{PAIR}\nfunc private @pairwrapper() {{\n  return\n}}\n");
    let err = add(&mut engine, &ir).unwrap_err();
    assert!(
        matches!(err, JitError::WrapperNameCollision { ref name, ref wrapper }
            if name == "pair" && wrapper == "pairwrapper"),
        "{err}"
    );
    assert!(registered(&engine).is_empty());
}

#[test]
fn loaded_wrappers_keep_their_names() {
    let Some(Fixture { dir, mut engine }) = fixture() else { return };
    std::fs::write(dir.path().join("wrapper.ll"), PAIR_WRAPPER_LL).unwrap();
    add(&mut engine, PAIR).unwrap();
    let before = registered(&engine);

    let shadow = r"
func @pairwrapper(%x: i64) -> i64 {
  return %x : i64
}
// llvm: define i64 @pairwrapper(i64 %x) {
// llvm:   ret i64 %x
// llvm: }
";
    let err = add(&mut engine, shadow).unwrap_err();
    assert!(
        matches!(err, JitError::WrapperNameCollision { ref name, ref wrapper }
            if name == "pair" && wrapper == "pairwrapper"),
        "{err}"
    );
    assert_eq!(registered(&engine), before);
    assert!(!engine.contains("pairwrapper"));
}

#[test]
fn only_public_definitions_are_registered() {
    let Some(Fixture { dir: _dir, mut engine }) = fixture() else { return };
    let ir = format!(
        "{ADD_ONE}
func private @helper(%x: i64) -> i64 {{
  return %x : i64
}}
// llvm: define internal i64 @helper(i64 %x) {{
// llvm:   ret i64 %x
// llvm: }}
func @external(%x: i64) -> i64
"
    );
    assert_eq!(add(&mut engine, &ir).unwrap(), vec!["add_one"]);
    assert!(!engine.contains("helper"));
    assert!(!engine.contains("external"));
}

#[test]
fn debug_mode_reports_the_failing_pass() {
    let Some(Fixture { dir: _dir, mut engine }) = fixture() else { return };
    let passes = vec!["--ok".to_string(), "--fail-sparsify".to_string()];
    let outcome = engine
        .add(ADD_ONE, &passes, &AddOptions::new().with_debug(true))
        .unwrap();
    let result = outcome.into_debug().unwrap();
    assert_eq!(result.failed_pass(), Some("--fail-sparsify"));
    assert!(registered(&engine).is_empty());

    let err = engine.add(ADD_ONE, &passes, &AddOptions::new()).unwrap_err();
    assert!(matches!(err, JitError::Lowering { .. }), "{err}");
}

#[test]
fn profile_dir_requires_profiling() {
    let Some(Fixture { dir, mut engine }) = fixture() else { return };
    let options = AddOptions::new().with_profile_dir(dir.path());
    let err = engine.add(ADD_ONE, &passes(), &options).unwrap_err();
    assert!(matches!(err, JitError::InvalidArgument { .. }), "{err}");
}

#[test]
fn callables_outlive_the_engine() {
    let Some(Fixture { dir: _dir, mut engine }) = fixture() else { return };
    add(&mut engine, ADD_ONE).unwrap();
    let add_one = engine.get("add_one").unwrap().clone();
    drop(engine);
    let out = add_one.call(&[Value::from(41i64)]).unwrap();
    assert_eq!(out.into_single().unwrap().as_scalar(), Some(Scalar::I64(42)));
}

#[test]
fn later_modules_see_earlier_functions() {
    let Some(Fixture { dir: _dir, mut engine }) = fixture() else { return };
    add(&mut engine, ADD_ONE).unwrap();
    add(
        &mut engine,
        r"
func private @add_one(%x: i64) -> i64
func @add_two(%x: i64) -> i64 {
  %a = call @add_one(%x) : (i64) -> i64
  %b = call @add_one(%a) : (i64) -> i64
  return %b : i64
}
// llvm: declare i64 @add_one(i64)
// llvm: define i64 @add_two(i64 %x) {
// llvm:   %a = call i64 @add_one(i64 %x)
// llvm:   %b = call i64 @add_one(i64 %a)
// llvm:   ret i64 %b
// llvm: }
",
    )
    .unwrap();
    let out = engine.get("add_two").unwrap().call(&[Value::from(1i64)]).unwrap();
    assert_eq!(out.into_single().unwrap().as_scalar(), Some(Scalar::I64(3)));
    assert_eq!(registered(&engine), vec!["add_one", "add_two"]);
}
