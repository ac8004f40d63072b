use super::*;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// A driver whose tools are shell scripts run through `/bin/sh`. The last
/// argument is always the input file.
fn scripted(opt_script: &str, translate_script: &str) -> (TempDir, LoweringDriver) {
    let dir = tempfile::tempdir().unwrap();
    let opt = dir.path().join("opt.sh");
    let translate = dir.path().join("translate.sh");
    std::fs::write(&opt, opt_script).unwrap();
    std::fs::write(&translate, translate_script).unwrap();
    let config = EngineConfig::new()
        .with_mlir_opt("/bin/sh")
        .with_mlir_translate("/bin/sh")
        .with_opt_args([opt.display().to_string()])
        .with_translate_args([translate.display().to_string()]);
    (dir, LoweringDriver::new(&config))
}

const ECHO_PASSES: &str = r#"for last; do :; done
for a in "$@"; do
  case "$a" in
    --fail*) echo "error: $a rejected the input" >&2; exit 1 ;;
    --*) echo "// $a" ;;
  esac
done
cat "$last"
"#;

const ECHO_TRANSLATE: &str = r#"for last; do :; done
if grep -q "bad-translation" "$last"; then echo "cannot translate" >&2; exit 3; fi
echo "; translated"
cat "$last"
"#;

fn passes(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

fn unix_shell_available() -> bool {
    Path::new("/bin/sh").exists()
}

#[test]
fn passes_run_in_order() {
    if !unix_shell_available() {
        return;
    }
    let (_dir, driver) = scripted(ECHO_PASSES, ECHO_TRANSLATE);
    let out = driver
        .apply_passes("func @f() { return }", &passes(&["--a", "--b"]))
        .unwrap();
    assert_eq!(out, "// --a\n// --b\nfunc @f() { return }");
}

#[test]
fn failing_pass_is_a_lowering_error() {
    if !unix_shell_available() {
        return;
    }
    let (_dir, driver) = scripted(ECHO_PASSES, ECHO_TRANSLATE);
    let err = driver
        .apply_passes("func @f() { return }", &passes(&["--fail-here"]))
        .unwrap_err();
    match err {
        JitError::Lowering { diagnostic } => {
            assert_eq!(diagnostic, "error: --fail-here rejected the input");
        }
        other => panic!("expected a lowering error, got {other}"),
    }
}

#[test]
fn translation_errors_carry_the_input() {
    if !unix_shell_available() {
        return;
    }
    let (_dir, driver) = scripted(ECHO_PASSES, ECHO_TRANSLATE);
    let ok = driver.lower_and_translate("x", &passes(&["--a"])).unwrap();
    assert_eq!(ok, "; translated\n// --a\nx");

    let err = driver.translate("bad-translation").unwrap_err();
    match err {
        JitError::Translation { diagnostic, input } => {
            assert_eq!(diagnostic, "cannot translate");
            assert_eq!(input, "bad-translation");
        }
        other => panic!("expected a translation error, got {other}"),
    }
}

#[test]
fn missing_tools_are_reported() {
    let driver = LoweringDriver::new(
        &EngineConfig::new().with_mlir_opt("/nonexistent/bin/mlir-opt"),
    );
    let err = driver.apply_passes("", &[]).unwrap_err();
    assert!(matches!(err, JitError::ToolMissing { .. }), "{err}");
}

#[test]
fn debug_replay_stops_at_the_failing_pass() {
    if !unix_shell_available() {
        return;
    }
    let (_dir, driver) = scripted(ECHO_PASSES, ECHO_TRANSLATE);
    let result = driver.debug("input", &passes(&["--a", "--fail-b", "--c"]));
    assert_eq!(result.failed_pass(), Some("--fail-b"));
    assert_eq!(
        result.diagnostic(),
        Some("error: --fail-b rejected the input")
    );
    let stage_passes: Vec<_> = result.stages().iter().map(|s| s.pass.clone()).collect();
    assert_eq!(stage_passes, vec![None, Some("--a".to_string())]);
    assert_eq!(result.last_valid_text(), "// --a\ninput");

    let report = result.explain();
    assert!(report.starts_with("failed at pass '--fail-b':"), "{report}");
    assert!(report.contains("===== after --a ====="), "{report}");
}

#[test]
fn stub_lines_parse() {
    assert_eq!(
        parse_stub("  llvm.func @__gb_lower_3() -> i64 attributes {sym_visibility = \"private\"}"),
        Some((3, "i64".to_string()))
    );
    assert_eq!(
        parse_stub("llvm.func private @__gb_lower_0() -> !llvm.struct<(ptr, ptr, i64, array<1 x i64>, array<1 x i64>)>"),
        Some((
            0,
            "!llvm.struct<(ptr, ptr, i64, array<1 x i64>, array<1 x i64>)>".to_string()
        ))
    );
    assert_eq!(parse_stub("llvm.func @user_fn() -> i64"), None);
    assert_eq!(parse_stub("module {"), None);
}

const LOWERED_STUBS: &str = r#"cat <<'EOF'
module attributes {llvm.data_layout = ""} {
  llvm.func @__gb_lower_0() -> i64 attributes {sym_visibility = "private"}
  llvm.func @__gb_lower_1() -> !llvm.struct<(ptr<f64>, ptr<f64>, i64, array<1 x i64>, array<1 x i64>)> attributes {sym_visibility = "private"}
}
EOF
"#;

#[test]
fn lower_types_maps_back_by_position() {
    if !unix_shell_available() {
        return;
    }
    let (_dir, driver) = scripted(LOWERED_STUBS, ECHO_TRANSLATE);
    let memref = gb_ir::parse_type("memref<?xf64>").unwrap();
    let types = [IrType::integer(64), memref, IrType::integer(64)];
    let lowered = driver
        .lower_types(&types, &passes(&["--convert-func-to-llvm"]), FuncKeyword::Func)
        .unwrap();
    assert_eq!(
        lowered,
        vec![
            "i64".to_string(),
            "!llvm.struct<(ptr<f64>, ptr<f64>, i64, array<1 x i64>, array<1 x i64>)>".to_string(),
            "i64".to_string(),
        ]
    );
    assert!(driver
        .lower_types(&[], &[], FuncKeyword::Func)
        .unwrap()
        .is_empty());
}

#[test]
fn profile_input_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = persist_profile_input(dir.path(), "func @f() { return }").unwrap();
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("prof-") && name.ends_with(".mlir"), "{name}");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "func @f() { return }");
}
