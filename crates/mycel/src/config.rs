//! Interpreter-wide tuning knobs (spec.md §4.8–§4.11 promotion thresholds,
//! §5 resource limits). A host builds one of these (directly, or via
//! `mycel-cli`'s `clap` flags) and passes it to [`crate::Interpreter::new`].

/// Default number of times a call site is interpreted before it is compiled
/// to bytecode (spec.md §4.8 "warm" threshold).
pub const DEFAULT_WARM_THRESHOLD: u32 = 10;

/// Default number of bytecode executions before a call site becomes a JIT
/// trace candidate (spec.md §4.8 "hot" threshold).
pub const DEFAULT_HOT_THRESHOLD: u32 = 100;

/// Default number of consecutive samples a call site's observed argument
/// types must agree on before a trace is considered stable enough to record
/// (spec.md §4.10).
pub const DEFAULT_TYPE_STABILITY_WINDOW: u32 = 20;

/// Default max call depth before `runtime/stack_overflow` is raised
/// (spec.md §5).
pub const DEFAULT_MAX_CALL_DEPTH: usize = 4096;

/// Default number of adaptive-executor ticks a call site may go without
/// being called before its count decays and it can drop back to `Cold`
/// (spec.md §4.8 "counts age each adaptive-executor tick").
pub const DEFAULT_DECAY_AFTER_TICKS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierPolicy {
    /// Run every call site through the full adaptive pipeline.
    Adaptive,
    /// Tree-walk only — useful for debugging and for `mycel-cli --tier=ast`.
    TreeWalkOnly,
    /// Stop promotion at the bytecode tier; never trace or JIT.
    BytecodeOnly,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self::Adaptive
    }
}

/// Interpreter configuration. `Default` matches the values spec.md's design
/// notes recommend; a host overrides individual fields (e.g. `mycel-cli`'s
/// `--warm-threshold`) rather than replacing the whole struct.
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    pub warm_threshold: u32,
    pub hot_threshold: u32,
    pub type_stability_window: u32,
    pub max_call_depth: usize,
    /// Ticks a call site may go uncalled before its execution count decays
    /// (spec.md §4.8 decay).
    pub decay_after_ticks: u32,
    pub tier_policy: TierPolicy,
    /// Emit stack traces on uncaught errors (spec.md §4.7).
    pub stack_traces_enabled: bool,
    /// Colorize console error reports.
    pub color_output: bool,
    /// Enable the native-function capability sandbox (spec.md §6).
    pub capability_sandbox_enabled: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            warm_threshold: DEFAULT_WARM_THRESHOLD,
            hot_threshold: DEFAULT_HOT_THRESHOLD,
            type_stability_window: DEFAULT_TYPE_STABILITY_WINDOW,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            decay_after_ticks: DEFAULT_DECAY_AFTER_TICKS,
            tier_policy: TierPolicy::default(),
            stack_traces_enabled: true,
            color_output: false,
            capability_sandbox_enabled: false,
        }
    }
}

impl InterpreterConfig {
    pub fn new() -> Self {
        Self::default()
    }
}
