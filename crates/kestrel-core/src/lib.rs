pub mod bus;
pub mod cache;
pub mod event;
pub mod pdk;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod window;
