//! Assertions that cannot be perturbed by injected failures
//!
//! Operands are evaluated where the caller wrote them, exposed to injection
//! as usual. The comparison and any failure message run under a forever
//! guard, which also closes if the assertion unwinds.

/// `assert!` evaluated with injection disarmed
#[macro_export]
macro_rules! oom_safe_assert {
    ($session:expr, $cond:expr $(,)?) => {{
        let cond: bool = $cond;
        let _oom_guard = $session.forever();
        ::core::assert!(cond, "{}", ::core::stringify!($cond));
    }};
    ($session:expr, $cond:expr, $($arg:tt)+) => {{
        let cond: bool = $cond;
        let _oom_guard = $session.forever();
        ::core::assert!(cond, $($arg)+);
    }};
}

/// `assert_eq!` evaluated with injection disarmed
#[macro_export]
macro_rules! oom_safe_assert_eq {
    ($session:expr, $left:expr, $right:expr $(,)?) => {{
        let left = $left;
        let right = $right;
        let _oom_guard = $session.forever();
        ::core::assert_eq!(left, right);
    }};
    ($session:expr, $left:expr, $right:expr, $($arg:tt)+) => {{
        let left = $left;
        let right = $right;
        let _oom_guard = $session.forever();
        ::core::assert_eq!(left, right, $($arg)+);
    }};
}

/// `assert_ne!` evaluated with injection disarmed
#[macro_export]
macro_rules! oom_safe_assert_ne {
    ($session:expr, $left:expr, $right:expr $(,)?) => {{
        let left = $left;
        let right = $right;
        let _oom_guard = $session.forever();
        ::core::assert_ne!(left, right);
    }};
    ($session:expr, $left:expr, $right:expr, $($arg:tt)+) => {{
        let left = $left;
        let right = $right;
        let _oom_guard = $session.forever();
        ::core::assert_ne!(left, right, $($arg)+);
    }};
}
