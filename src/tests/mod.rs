#[cfg(not(feature = "loom"))]
mod correctness;
#[cfg(feature = "loom")]
mod models;
#[cfg(not(feature = "loom"))]
mod unit_tests;
