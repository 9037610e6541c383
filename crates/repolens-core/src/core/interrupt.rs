use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static CANCEL_TOKEN: OnceLock<CancellationToken> = OnceLock::new();

fn root_token() -> &'static CancellationToken {
    CANCEL_TOKEN.get_or_init(CancellationToken::new)
}

/// Installs the Ctrl+C handler.
///
/// The first Ctrl+C cancels [`token`]; a second one exits with code 130.
///
/// # Errors
/// Returns an error if a handler is already installed or the platform
/// refuses the registration.
pub fn init() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(trigger_ctrl_c)
}

/// Triggers an interrupt as if Ctrl+C was pressed.
pub fn trigger_ctrl_c() {
    if INTERRUPTED.swap(true, Ordering::SeqCst) {
        std::process::exit(130);
    }
    root_token().cancel();
}

/// Checks if an interrupt has been requested.
pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// A token cancelled by the first Ctrl+C.
pub fn token() -> CancellationToken {
    root_token().child_token()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_interrupt_cancels_tokens() {
        let token = token();
        assert!(!token.is_cancelled());

        trigger_ctrl_c();

        assert!(is_interrupted());
        assert!(token.is_cancelled());
        assert!(super::token().is_cancelled());
    }
}
