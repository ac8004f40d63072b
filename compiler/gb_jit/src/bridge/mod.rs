//! Multi-value return bridge.
//!
//! The native calling convention returns at most one aggregate, but an IR
//! function may declare several results. For every such function `f` the
//! bridge emits `fwrapper(%out_1, ..., %out_N, args...) -> ()`, which calls
//! `f`, unpacks its results and stores each through its out-pointer:
//!
//! ```text
//! func private @f(%a: i64) -> (i64, f64)
//!
//! func @fwrapper(%var0: !llvm.ptr<i64>, %var1: !llvm.ptr<f64>, %a: i64) -> () {
//!   %var2:2 = call @f(%a) : (i64) -> (i64, f64)
//!   llvm.store %var2#0, %var0 : !llvm.ptr<i64>
//!   llvm.store %var2#1, %var1 : !llvm.ptr<f64>
//!   return
//! }
//! ```
//!
//! Stores must name the *lowered* result types, which only the pass
//! pipeline knows; callers obtain them with
//! [`LoweringDriver::lower_types`](crate::lowering::LoweringDriver::lower_types).
//! Generation itself is a pure function of the signatures.

use std::fmt::Write as _;

use gb_ir::{FuncKeyword, FunctionSignature};
use rustc_hash::FxHashSet;

use crate::config::PointerStyle;
use crate::error::{JitError, JitResult};
use crate::lowering::LoweringDriver;

/// Suffix appended to a multi-result function's name to name its wrapper.
pub const WRAPPER_SUFFIX: &str = "wrapper";

pub fn wrapper_name(name: &str) -> String {
    format!("{name}{WRAPPER_SUFFIX}")
}

/// Reject wrapper names that are already taken.
///
/// `taken` answers whether a name is registered or defined in the
/// submitted text.
pub fn check_wrapper_names<'a>(
    functions: impl IntoIterator<Item = &'a FunctionSignature>,
    taken: impl Fn(&str) -> bool,
) -> JitResult<()> {
    for sig in functions {
        let wrapper = wrapper_name(&sig.name);
        if taken(&wrapper) {
            return Err(JitError::WrapperNameCollision {
                name: sig.name.clone(),
                wrapper,
            });
        }
    }
    Ok(())
}

/// Lower the result types of `functions` and build the wrapper unit.
#[tracing::instrument(level = "debug", skip_all, fields(count = functions.len()))]
pub fn build_wrappers(
    driver: &LoweringDriver,
    functions: &[&FunctionSignature],
    passes: &[String],
    style: PointerStyle,
    keyword: FuncKeyword,
) -> JitResult<String> {
    let result_types: Vec<_> = functions
        .iter()
        .flat_map(|sig| sig.results.iter().cloned())
        .collect();
    let mut lowered = driver.lower_types(&result_types, passes, keyword)?.into_iter();

    let mut text = String::new();
    for sig in functions {
        let results: Vec<String> = lowered.by_ref().take(sig.results.len()).collect();
        text.push_str(&synthesize_wrapper(sig, &results, style, keyword));
    }
    Ok(text)
}

/// Wrapper text for one multi-result function given its lowered result
/// spellings.
pub fn synthesize_wrapper(
    sig: &FunctionSignature,
    lowered_results: &[String],
    style: PointerStyle,
    keyword: FuncKeyword,
) -> String {
    let arg_names: FxHashSet<&str> = sig.args.iter().map(|a| a.name.as_str()).collect();
    let mut fresh = (0..)
        .map(|i| format!("var{i}"))
        .filter(|name| !arg_names.contains(name.as_str()));

    let out_names: Vec<String> = fresh.by_ref().take(lowered_results.len()).collect();
    let aggregate = fresh.next().unwrap_or_default();

    let joined_results = lowered_results.join(", ");
    let joined_args = join(sig.args.iter().map(ToString::to_string));
    let arg_types = join(sig.args.iter().map(|a| a.ty.to_string()));
    let arg_values = join(sig.args.iter().map(|a| format!("%{}", a.name)));

    let mut params: Vec<String> = out_names
        .iter()
        .zip(lowered_results)
        .map(|(name, ty)| format!("%{name}: {}", pointer_to(ty, style)))
        .collect();
    if !joined_args.is_empty() {
        params.push(joined_args.clone());
    }

    let kw = keyword.as_str();
    let mut text = String::new();
    let _ = writeln!(text);
    let _ = writeln!(
        text,
        "{kw} private @{}({joined_args}) -> ({joined_results})",
        sig.name
    );
    let _ = writeln!(text);
    let _ = writeln!(
        text,
        "{kw} @{}({}) -> () {{",
        wrapper_name(&sig.name),
        params.join(", ")
    );
    let _ = writeln!(
        text,
        "  %{aggregate}:{} = {} @{}({arg_values}) : ({arg_types}) -> ({joined_results})",
        lowered_results.len(),
        keyword.call_op(),
        sig.name,
    );
    for (i, (name, ty)) in out_names.iter().zip(lowered_results).enumerate() {
        let _ = writeln!(
            text,
            "  llvm.store %{aggregate}#{i}, %{name} : {}",
            store_suffix(ty, style)
        );
    }
    let _ = writeln!(text, "  {}", keyword.return_op());
    let _ = writeln!(text, "}}");
    text
}

fn pointer_to(ty: &str, style: PointerStyle) -> String {
    match style {
        PointerStyle::Typed => format!("!llvm.ptr<{ty}>"),
        PointerStyle::Opaque => "!llvm.ptr".to_string(),
    }
}

fn store_suffix(ty: &str, style: PointerStyle) -> String {
    match style {
        PointerStyle::Typed => pointer_to(ty, style),
        PointerStyle::Opaque => format!("{ty}, !llvm.ptr"),
    }
}

fn join(items: impl Iterator<Item = String>) -> String {
    items.collect::<Vec<_>>().join(", ")
}
