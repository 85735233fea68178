//! Error Router (C9): for any throwing site, decides whether it terminates
//! the machine (`Fail`) or transitions to an enclosing `catch` (§4.9).
//!
//! The `finally`-specific "stash the error so a non-terminal finally can
//! re-throw it" mechanic (§4.7, §4.9 point 4's second bullet) is handled
//! locally by the statement lowerer's try/finally composition, not here —
//! this module answers only the question "does a handler exist, and if so
//! what `ResultPath` should the transition to `__catch` carry".

use crate::lower::context::Frame;

#[derive(Debug, Clone, PartialEq)]
pub enum ThrowRoute {
    /// No reachable handler: the throw emits a terminal `Fail` state.
    Terminal,
    /// A handler exists in the same closure: transition to `__catch`.
    /// `result_path` is `Some` when the catch clause declared a variable
    /// (so the `{Error, Cause}` envelope is visible to the clause body),
    /// or `None` to mean `ResultPath: null` (discard the envelope).
    ToCatch { result_path: Option<String> },
}

/// Walks the enclosing-scope stack from innermost outward (§4.9 points
/// 1-2). A `try` with an active `catch` found before any `Map`/`Parallel`
/// worker boundary routes there (point 4). A worker boundary found first
/// means the handler, if any, lives outside the closure and is
/// unreachable — terminal (point 5). No handler at all is also terminal
/// (point 3).
pub fn route_throw(frames: &[Frame]) -> ThrowRoute {
    for frame in frames.iter().rev() {
        match frame {
            Frame::TryCatch { catch_var_path } => {
                return ThrowRoute::ToCatch { result_path: catch_var_path.clone() };
            }
            Frame::ClosureBoundary => return ThrowRoute::Terminal,
            Frame::Loop | Frame::Finally { .. } => {}
        }
    }
    ThrowRoute::Terminal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_frames_is_terminal() {
        assert_eq!(route_throw(&[]), ThrowRoute::Terminal);
    }

    #[test]
    fn try_catch_in_scope_routes() {
        let frames = vec![Frame::TryCatch { catch_var_path: Some("$.e".into()) }];
        assert_eq!(route_throw(&frames), ThrowRoute::ToCatch { result_path: Some("$.e".into()) });
    }

    #[test]
    fn closure_boundary_before_catch_is_terminal() {
        let frames = vec![Frame::TryCatch { catch_var_path: None }, Frame::ClosureBoundary];
        assert_eq!(route_throw(&frames), ThrowRoute::Terminal);
    }

    #[test]
    fn catch_before_closure_boundary_routes() {
        let frames = vec![Frame::ClosureBoundary, Frame::TryCatch { catch_var_path: None }];
        assert_eq!(route_throw(&frames), ThrowRoute::ToCatch { result_path: None });
    }
}
