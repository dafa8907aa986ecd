// Test-only logging. Expands to nothing outside the test harness, so
// handler code can narrate freely without polluting normal runs.
#[macro_export]
macro_rules! trace(
    ( $($arg:expr),* ) => { if cfg!(test) { eprintln! { $($arg),* } } };
);
