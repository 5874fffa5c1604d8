pub(crate) mod http;
pub mod clock;

#[doc(hidden)]
pub mod test_support;
