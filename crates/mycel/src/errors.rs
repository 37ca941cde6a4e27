//! Structured error/exception machinery (spec.md §3, §4.7, §7).
//!
//! Error codes are grouped by thousand-range exactly as in the original
//! implementation's `error_system.h`: 1000s syntax, 2000s semantic, 3000s
//! type, 4000s runtime, 5000s memory, 6000s I/O, 7000s system, 8000s user.
//! Category and default severity both derive from the code's range.

use std::fmt;

use crate::ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Syntax,
    Semantic,
    Type,
    Runtime,
    Memory,
    Io,
    System,
    User,
}

impl ErrorCategory {
    pub fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Memory | Self::System => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Error,
        }
    }
}

macro_rules! error_codes {
    ($($variant:ident = $code:expr => $category:ident, $message:expr, $suggestion:expr;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u32)]
        pub enum ErrorCode {
            $($variant = $code,)*
        }

        impl ErrorCode {
            pub fn category(self) -> ErrorCategory {
                match self {
                    $(Self::$variant => ErrorCategory::$category,)*
                }
            }

            pub fn default_message(self) -> &'static str {
                match self {
                    $(Self::$variant => $message,)*
                }
            }

            pub fn suggestion(self) -> &'static str {
                match self {
                    $(Self::$variant => $suggestion,)*
                }
            }
        }
    };
}

error_codes! {
    SyntaxUnexpectedToken = 1001 => Syntax, "unexpected token", "check for a missing operator or punctuation before this point";
    SyntaxMissingToken = 1002 => Syntax, "missing token", "insert the expected token shown in the message";
    SyntaxInvalidExpression = 1003 => Syntax, "invalid expression", "check the expression's operands and operators";
    SyntaxUnclosedString = 1004 => Syntax, "unterminated string literal", "add the closing double quote";
    SyntaxUnclosedComment = 1005 => Syntax, "unterminated block comment", "add the closing */";
    SyntaxInvalidNumber = 1006 => Syntax, "invalid number literal", "check digit grouping, decimal point, and exponent";
    SyntaxInvalidIdentifier = 1007 => Syntax, "invalid identifier", "identifiers must start with a letter or underscore";

    SemanticUndefinedVariable = 2001 => Semantic, "undefined variable", "declare the variable with `let` before using it";
    SemanticUndefinedFunction = 2002 => Semantic, "undefined function", "check the function name and that it is in scope";
    SemanticUndefinedClass = 2003 => Semantic, "undefined class", "check the class name and that it has been declared";
    SemanticRedeclaration = 2004 => Semantic, "name already declared in this scope", "use a different name or remove the earlier declaration";
    SemanticInvalidOperation = 2005 => Semantic, "invalid operation for this context", "check the surrounding control flow";
    SemanticMissingReturn = 2006 => Semantic, "function is missing a return value", "add a `return` statement on every path";
    SemanticUnreachableCode = 2007 => Semantic, "unreachable code", "remove or move the code after the return/break/continue";
    SemanticCircularDependency = 2008 => Semantic, "circular module dependency", "break the cycle by removing one of the imports";
    SemanticImmutableAssignment = 2009 => Semantic, "cannot assign to an immutable binding", "declare the variable with `let mut` if it needs to change";

    TypeMismatch = 3001 => Type, "type mismatch", "check the types of both operands";
    TypeIncompatible = 3002 => Type, "incompatible types for this operation", "convert one operand to match the other's type";
    TypeMissingAnnotation = 3003 => Type, "missing type annotation", "add a `: Type` annotation";
    TypeInvalidCast = 3004 => Type, "invalid type cast", "check that the source and target types are convertible";
    TypeAmbiguous = 3005 => Type, "ambiguous type", "add an explicit type annotation to disambiguate";
    TypeCircularDependency = 3006 => Type, "circular type dependency", "break the cycle in the type definitions";

    RuntimeDivisionByZero = 4001 => Runtime, "division or modulo by zero", "check the divisor before dividing";
    RuntimeIndexOutOfBounds = 4002 => Runtime, "index out of bounds", "check the collection's length before indexing";
    RuntimeNullPointer = 4003 => Runtime, "null value used where a value was required", "check for null before use";
    RuntimeStackOverflow = 4004 => Runtime, "stack overflow", "check for unbounded recursion";
    RuntimeRecursionLimit = 4005 => Runtime, "recursion limit exceeded", "reduce recursion depth or raise the configured limit";
    RuntimeTimeout = 4006 => Runtime, "operation timed out", "check for an unterminated loop or blocking call";
    RuntimeAssertionFailed = 4007 => Runtime, "assertion failed", "check the asserted condition";
    RuntimeInvalidState = 4008 => Runtime, "no pattern matched and no default case was provided", "add a wildcard `_` case or a root case to the spore";
    RuntimeInterrupted = 4009 => Runtime, "async task was cancelled", "handle cancellation at the next await point";

    MemoryOutOfMemory = 5001 => Memory, "out of memory", "reduce allocation or increase available memory";
    MemoryLeak = 5002 => Memory, "memory leak detected", "check for reference cycles (see design notes on cycle handling)";
    MemoryDoubleFree = 5003 => Memory, "double free", "this is an interpreter bug; please report it";
    MemoryCorruption = 5004 => Memory, "heap corruption detected", "this is an interpreter bug; please report it";
    MemoryAccessViolation = 5005 => Memory, "invalid heap access", "this is an interpreter bug; please report it";

    IoFileNotFound = 6001 => Io, "file not found", "check the file path";
    IoPermissionDenied = 6002 => Io, "permission denied", "check file permissions";
    IoDiskFull = 6003 => Io, "disk full", "free up disk space";
    IoReadError = 6004 => Io, "read error", "check that the file is readable and not corrupted";
    IoWriteError = 6005 => Io, "write error", "check that the destination is writable";
    IoNetworkError = 6006 => Io, "network error", "check connectivity and retry";

    SystemProcessFailed = 7001 => System, "subprocess failed", "check the subprocess's exit status and stderr";
    SystemSignalReceived = 7002 => System, "signal received", "handle or ignore the signal as appropriate";
    SystemResourceExhausted = 7003 => System, "system resource exhausted", "reduce concurrent resource usage";

    UserDefined = 8001 => User, "user-defined error", "see the thrown value for details";
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", *self as u32)
    }
}

/// One frame of the active call stack, used for stack traces (spec.md §3
/// `CallFrame`).
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub function_name: String,
    pub file_name: Option<String>,
    pub line: u32,
}

/// A fully structured runtime/compile-time error (spec.md §3 `ErrorInfo`).
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub severity: ErrorSeverity,
    pub category: ErrorCategory,
    pub message: String,
    pub suggestion: Option<String>,
    pub file_name: Option<String>,
    pub line: u32,
    pub column: u32,
    pub source_line: Option<String>,
    pub stack_trace: Vec<CallFrame>,
    pub context: Option<String>,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            severity: code.category().default_severity(),
            category: code.category(),
            message: message.into(),
            suggestion: Some(code.suggestion().to_owned()),
            file_name: None,
            line: span.line,
            column: span.column,
            source_line: None,
            stack_trace: Vec::new(),
            context: None,
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: Vec<CallFrame>) -> Self {
        self.stack_trace = stack_trace;
        self
    }

    /// Renders `"Error: <msg> (Line L, Column C) [E<code>]\nHint: <suggestion>"`,
    /// optionally preceded by a traceback, per spec.md §4.7/§7.
    pub fn render(&self, color: bool, traceback: bool) -> String {
        let mut out = String::new();
        if traceback && !self.stack_trace.is_empty() {
            out.push_str("Traceback (most recent call last):\n");
            for frame in &self.stack_trace {
                out.push_str(&format!(
                    "  File \"{}\", line {}, in {}\n",
                    frame.file_name.as_deref().unwrap_or("<unknown>"),
                    frame.line,
                    frame.function_name
                ));
            }
        }
        let head = format!("Error: {} (Line {}, Column {}) [{}]", self.message, self.line, self.column, self.code);
        if color {
            out.push_str(&format!("\u{1b}[31m{head}\u{1b}[0m\n"));
        } else {
            out.push_str(&head);
            out.push('\n');
        }
        if let Some(suggestion) = &self.suggestion {
            out.push_str(&format!("Hint: {suggestion}"));
        }
        out
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(false, false))
    }
}

impl std::error::Error for ErrorInfo {}

/// The try/catch/finally bookkeeping active for the current (single) fiber
/// (spec.md §3 `ExceptionContext`).
#[derive(Debug, Default)]
pub struct ExceptionContext {
    pub current_error: Option<ErrorInfo>,
    pub in_try: bool,
    pub in_catch: bool,
    pub in_finally: bool,
    pub try_depth: u32,
    pub catch_variable: Option<String>,
}

/// A handler invoked on every thrown error, before it unwinds — e.g. a host
/// logging sink. Registered handlers cannot suppress or alter the error.
pub type ErrorHandler = Box<dyn FnMut(&ErrorInfo)>;

/// The process-wide error log and exception context, reframed per spec.md §9
/// as an explicit component owned by the `Interpreter` rather than a global
/// singleton, and threaded through the evaluator/bytecode engine instead of
/// reached via a global.
pub struct ErrorSystem {
    pub log: Vec<ErrorInfo>,
    pub context: ExceptionContext,
    handlers: Vec<ErrorHandler>,
    pub stack_traces_enabled: bool,
    pub color_output: bool,
}

impl Default for ErrorSystem {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            context: ExceptionContext::default(),
            handlers: Vec::new(),
            stack_traces_enabled: true,
            color_output: false,
        }
    }
}

impl ErrorSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&mut self, handler: ErrorHandler) {
        self.handlers.push(handler);
    }

    /// Throw semantics (spec.md §4.7): record the error, set it as current,
    /// and invoke every registered handler.
    pub fn throw(&mut self, error: ErrorInfo) {
        for handler in &mut self.handlers {
            handler(&error);
        }
        self.log.push(error.clone());
        self.context.current_error = Some(error);
    }

    /// Catch semantics: clears the current error and returns it.
    pub fn catch(&mut self) -> Option<ErrorInfo> {
        self.context.current_error.take()
    }

    pub fn default_console_report(&self, error: &ErrorInfo) -> String {
        error.render(self.color_output, self.stack_traces_enabled && !self.context.in_try)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_ranges_map_to_category() {
        assert_eq!(ErrorCode::SyntaxUnexpectedToken.category(), ErrorCategory::Syntax);
        assert_eq!(ErrorCode::SemanticUndefinedVariable.category(), ErrorCategory::Semantic);
        assert_eq!(ErrorCode::RuntimeDivisionByZero.category(), ErrorCategory::Runtime);
        assert_eq!(ErrorCode::MemoryOutOfMemory.default_severity_for_category(), ErrorSeverity::Fatal);
    }

    #[test]
    fn render_matches_expected_shape() {
        let err = ErrorInfo::new(ErrorCode::SemanticUndefinedVariable, "undefined variable 'x'", Span::new(3, 7));
        let rendered = err.render(false, false);
        assert!(rendered.starts_with("Error: undefined variable 'x' (Line 3, Column 7) [E2001]"));
        assert!(rendered.contains("Hint:"));
    }

    #[test]
    fn throw_then_catch_round_trip() {
        let mut sys = ErrorSystem::new();
        sys.throw(ErrorInfo::new(ErrorCode::RuntimeDivisionByZero, "division by zero", Span::default()));
        assert!(sys.context.current_error.is_some());
        let caught = sys.catch();
        assert!(caught.is_some());
        assert!(sys.context.current_error.is_none());
    }
}

impl ErrorCode {
    fn default_severity_for_category(self) -> ErrorSeverity {
        self.category().default_severity()
    }
}
