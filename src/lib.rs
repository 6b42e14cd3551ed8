//! Sample Composita programs for the `cvm` driver.

pub mod demos;
