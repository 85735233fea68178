//! Unified compiler error type used across all phases.
//!
//! `CompilerErrorKind` backs the stable error codes from the specification
//! with a real `thiserror` derive; `CompilerError` wraps a kind with the
//! phase it was raised in and an optional source span.

use std::fmt;

use crate::ir::validate::ValidationError;
use crate::parse::ast::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Parse,
    Normalize,
    Lower,
    IrValidate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Parse => write!(f, "Parse"),
            Phase::Normalize => write!(f, "Normalize"),
            Phase::Lower => write!(f, "Lower"),
            Phase::IrValidate => write!(f, "IR Validate"),
        }
    }
}

/// The stable, documented error codes, plus an internal catch-all for
/// invariant violations that indicate a bug in this crate rather than an
/// unsupported source program.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CompilerErrorKind {
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unexpected error: {0}")]
    UnexpectedError(String),
    #[error("classes are not supported")]
    ClassesAreNotSupported,
    #[error("a thrown value must be `new Error(msg)`, `Error(msg)`, or `new StepFunctionError(name, cause)`")]
    StepFunctionThrowMustBeErrorOrStepFunctionErrorClass,
    #[error("Step Functions does not support `undefined`")]
    StepFunctionsDoesNotSupportUndefined,
    #[error("Step Functions property names must be constant")]
    StepFunctionsPropertyNamesMustBeConstant,
    #[error("invalid collection access")]
    StepFunctionsInvalidCollectionAccess,
    #[error("cannot perform `{0}` arithmetic or bitwise computations in a Step Function")]
    CannotPerformAllArithmeticOrBitwiseComputationsOnVariablesInStepFunction(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl CompilerErrorKind {
    /// The stable error code string, as documented in the specification.
    pub fn code(&self) -> &'static str {
        match self {
            CompilerErrorKind::UnsupportedFeature(_) => "Unsupported_Feature",
            CompilerErrorKind::InvalidInput(_) => "Invalid_Input",
            CompilerErrorKind::UnexpectedError(_) => "Unexpected_Error",
            CompilerErrorKind::ClassesAreNotSupported => "Classes_are_not_supported",
            CompilerErrorKind::StepFunctionThrowMustBeErrorOrStepFunctionErrorClass => {
                "StepFunction_Throw_must_be_Error_or_StepFunctionError_class"
            }
            CompilerErrorKind::StepFunctionsDoesNotSupportUndefined => {
                "Step_Functions_does_not_support_undefined"
            }
            CompilerErrorKind::StepFunctionsPropertyNamesMustBeConstant => {
                "StepFunctions_property_names_must_be_constant"
            }
            CompilerErrorKind::StepFunctionsInvalidCollectionAccess => {
                "StepFunctions_Invalid_collection_access"
            }
            CompilerErrorKind::CannotPerformAllArithmeticOrBitwiseComputationsOnVariablesInStepFunction(_) => {
                "Cannot_perform_all_arithmetic_or_bitwise_computations_on_variables_in_Step_Function"
            }
            CompilerErrorKind::Internal(_) => "Internal_Error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompilerError {
    pub kind: CompilerErrorKind,
    pub phase: Phase,
    pub span: Option<Span>,
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some(span) => write!(
                f,
                "[{}:{}] {} (at {}:{})",
                self.phase,
                self.kind.code(),
                self.kind,
                span.line,
                span.column
            ),
            None => write!(f, "[{}:{}] {}", self.phase, self.kind.code(), self.kind),
        }
    }
}

impl std::error::Error for CompilerError {}

impl From<ValidationError> for CompilerError {
    fn from(e: ValidationError) -> Self {
        CompilerError {
            kind: CompilerErrorKind::Internal(e.message),
            phase: Phase::IrValidate,
            span: None,
        }
    }
}

impl CompilerError {
    pub fn new(kind: CompilerErrorKind, phase: Phase, span: Option<Span>) -> Self {
        CompilerError { kind, phase, span }
    }

    pub fn unsupported(message: impl Into<String>, span: Option<Span>) -> Self {
        CompilerError::new(
            CompilerErrorKind::UnsupportedFeature(message.into()),
            Phase::Normalize,
            span,
        )
    }

    pub fn invalid_input(message: impl Into<String>, span: Option<Span>) -> Self {
        CompilerError::new(CompilerErrorKind::InvalidInput(message.into()), Phase::Lower, span)
    }

    pub fn lower(kind: CompilerErrorKind, span: Option<Span>) -> Self {
        CompilerError::new(kind, Phase::Lower, span)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        CompilerError::new(
            CompilerErrorKind::InvalidInput(message.into()),
            Phase::Parse,
            None,
        )
    }
}
