//! Host-callable handles to compiled functions.

use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use crate::call::NativeFunction;
use crate::engine::EngineState;
use crate::error::{JitError, JitResult};
use crate::profile::{profiled_call, ProfileReport};
use crate::value::{Output, Value};

/// Where profiled calls put their artifacts, and the symbol to annotate.
#[derive(Clone, Debug)]
pub(crate) struct ProfileTarget {
    pub(crate) dir: PathBuf,
    pub(crate) symbol: String,
}

struct CallableInner {
    function: NativeFunction,
    profile: Option<ProfileTarget>,
    /// Keeps the compiled code mapped.
    _engine: Rc<EngineState>,
}

/// A compiled function bound to its argument encoders and result decoders.
///
/// Cloning is cheap. Every clone keeps the engine's compiled code alive, so
/// a callable stays valid after the [`Engine`](crate::Engine) is dropped.
#[derive(Clone)]
pub struct Callable {
    inner: Rc<CallableInner>,
}

impl Callable {
    pub(crate) fn new(
        engine: Rc<EngineState>,
        function: NativeFunction,
        profile: Option<ProfileTarget>,
    ) -> Self {
        Self {
            inner: Rc::new(CallableInner {
                function,
                profile,
                _engine: engine,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.function.name()
    }

    /// Number of positional arguments the IR function declares.
    pub fn arity(&self) -> usize {
        self.inner.function.abi().args.len()
    }

    /// Whether calls run under the sampling profiler.
    pub fn is_profiled(&self) -> bool {
        self.inner.profile.is_some()
    }

    /// Call with positional arguments.
    ///
    /// A function with no results returns [`Output::None`], one result
    /// [`Output::Single`], several [`Output::Tuple`] in declaration order.
    pub fn call(&self, args: &[Value]) -> JitResult<Output> {
        self.call_with_report(args).map(|(output, _)| output)
    }

    /// Call, also returning the profile report for profiled callables.
    #[tracing::instrument(level = "debug", skip_all, fields(name = %self.name(), args = args.len()))]
    pub fn call_with_report(&self, args: &[Value]) -> JitResult<(Output, Option<ProfileReport>)> {
        let inner = &*self.inner;
        let arity = self.arity();
        if args.len() != arity {
            return Err(JitError::ArityMismatch {
                name: self.name().to_string(),
                expected: arity,
                got: args.len(),
            });
        }
        match &inner.profile {
            None => {
                // SAFETY: the function was prepared from the signature it
                // was compiled from, and `_engine` keeps its code mapped.
                let output = unsafe { inner.function.invoke(args) }?;
                Ok((output, None))
            }
            Some(target) => {
                // SAFETY: as above; the profile library is owned by the
                // engine state.
                let (output, report) =
                    unsafe { profiled_call(&inner.function, &target.symbol, args, &target.dir) }?;
                Ok((output, Some(report)))
            }
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.name())
            .field("arity", &self.arity())
            .field("profile", &self.inner.profile)
            .finish_non_exhaustive()
    }
}
