//! Integration tests for nixfleet

mod support;
mod test_checks;
mod test_secrets;
mod test_selector;
mod test_shell;
