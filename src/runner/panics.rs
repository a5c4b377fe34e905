//! Panic isolation for test attempts.
//!
//! A single process-wide hook is installed the first time an attempt runs.
//! It chains to whatever hook was there before, except on threads that are
//! inside [`catch`]: there it records where the panic happened (and a
//! backtrace when `RUST_BACKTRACE` asks for one) instead of printing to the
//! real stderr.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::case::TestFault;

/// Panic messages produced by the standard library for runtime faults, as
/// opposed to a test rejecting a value.
const RUNTIME_FAULTS: &[&str] = &[
    "index out of bounds",
    "range start index",
    "range end index",
    "byte index",
    "called `Option::unwrap()`",
    "called `Result::unwrap()`",
    "called `Result::unwrap_err()`",
    "attempt to ",
    "already borrowed",
    "already mutably borrowed",
    "not implemented",
    "not yet implemented",
    "internal error: entered unreachable code",
];

/// Where a captured panic happened.
#[derive(Debug, Clone, Default)]
struct PanicSite {
    location: Option<String>,
    backtrace: Option<String>,
}

thread_local! {
    static CATCHING: Cell<bool> = const { Cell::new(false) };
    static LAST_SITE: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

fn install_hook() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !CATCHING.with(Cell::get) {
                previous(info);
                return;
            }
            let backtrace = Backtrace::capture();
            let site = PanicSite {
                location: info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
                backtrace: (backtrace.status() == BacktraceStatus::Captured)
                    .then(|| backtrace.to_string()),
            };
            LAST_SITE.with(|last| *last.borrow_mut() = Some(site));
        }));
    });
}

/// Marks the current thread as catching until dropped.
struct CatchScope {
    was_catching: bool,
}

impl CatchScope {
    fn enter() -> Self {
        let was_catching = CATCHING.with(|c| c.replace(true));
        LAST_SITE.with(|last| last.borrow_mut().take());
        Self { was_catching }
    }
}

impl Drop for CatchScope {
    fn drop(&mut self) {
        CATCHING.with(|c| c.set(self.was_catching));
    }
}

/// Run `f`, turning a panic into a fault. The panic is not printed; its
/// message, location and any backtrace end up in the fault detail.
pub(crate) fn catch<F>(f: F) -> Result<(), TestFault>
where
    F: FnOnce() -> Result<(), TestFault>,
{
    install_hook();
    let outcome = {
        let _scope = CatchScope::enter();
        panic::catch_unwind(AssertUnwindSafe(f))
    };
    match outcome {
        Ok(result) => result,
        Err(payload) => {
            let site = LAST_SITE.with(|last| last.borrow_mut().take()).unwrap_or_default();
            Err(fault_from_panic(payload.as_ref(), &site))
        }
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some((*s).to_string())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}

/// Is this the message of a standard library runtime fault?
fn is_runtime_fault(message: &str) -> bool {
    RUNTIME_FAULTS.iter().any(|prefix| message.starts_with(prefix))
}

/// Classify a panic. `panic_any(TestFault)` is taken as is. Runtime faults
/// from the standard library are errors; every other panic, which includes
/// the whole `assert!` family with or without a custom message, is a failure.
fn fault_from_panic(payload: &(dyn Any + Send), site: &PanicSite) -> TestFault {
    if let Some(fault) = payload.downcast_ref::<TestFault>() {
        return fault.clone();
    }

    let Some(message) = payload_message(payload) else {
        return TestFault::Error(with_site(
            "panicked with a non-string payload".to_string(),
            site,
        ));
    };

    if is_runtime_fault(&message) {
        TestFault::Error(with_site(format!("panicked: {}", message), site))
    } else {
        TestFault::Failure(with_site(message, site))
    }
}

fn with_site(mut detail: String, site: &PanicSite) -> String {
    if let Some(location) = &site.location {
        detail.push_str("\n  at ");
        detail.push_str(location);
    }
    if let Some(backtrace) = &site.backtrace {
        detail.push_str("\n\nstack backtrace:\n");
        detail.push_str(backtrace);
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_assert_message_is_failure() {
        let status = 500;
        let result = catch(|| {
            assert!(status == 200, "expected 200, got {}", status);
            Ok(())
        });
        match result {
            Err(TestFault::Failure(detail)) => {
                assert!(detail.starts_with("expected 200, got 500"));
                assert!(detail.contains(concat!(file!(), ":")));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_assert_ne_is_failure() {
        let result = catch(|| {
            assert_ne!(1, 1, "ids must differ");
            Ok(())
        });
        assert!(matches!(result, Err(TestFault::Failure(_))));
    }

    #[test]
    fn test_location_points_at_the_panic() {
        let line = line!() + 2;
        let result = catch(|| {
            assert_eq!(1 + 1, 3);
            Ok(())
        });
        match result {
            Err(TestFault::Failure(detail)) => {
                assert!(detail.contains(&format!("{}:{}:", file!(), line)))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_runtime_faults_are_errors() {
        let empty: Vec<u32> = Vec::new();
        let index = catch(|| {
            let _ = std::hint::black_box(empty[3]);
            Ok(())
        });
        let unwrap = catch(|| {
            let missing: Option<u32> = None;
            missing.unwrap();
            Ok(())
        });

        for result in [index, unwrap] {
            match result {
                Err(TestFault::Error(detail)) => assert!(detail.starts_with("panicked: ")),
                other => panic!("unexpected result: {:?}", other),
            }
        }
    }

    #[test]
    fn test_typed_fault_payload_is_kept() {
        let result = catch(|| std::panic::panic_any(TestFault::error("database down")));
        assert_eq!(result, Err(TestFault::error("database down")));
    }

    #[test]
    fn test_non_string_payload_is_error() {
        let result = catch(|| std::panic::panic_any(42_u32));
        match result {
            Err(TestFault::Error(detail)) => {
                assert!(detail.starts_with("panicked with a non-string payload"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_returned_faults_pass_through() {
        assert_eq!(catch(|| Ok(())), Ok(()));
        assert_eq!(
            catch(|| Err(TestFault::failure("nope"))),
            Err(TestFault::failure("nope"))
        );
    }

    #[test]
    fn test_scope_is_released_after_catch() {
        let _ = catch(|| panic!("boom"));
        assert!(!CATCHING.with(Cell::get));
    }
}
