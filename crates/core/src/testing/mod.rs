//! Testing utilities and mock implementations.
//!
//! # Example
//!
//! ```rust,ignore
//! use transmute_core::testing::MockConverter;
//!
//! let image = Arc::new(MockConverter::new("image"));
//! let failing = Arc::new(MockConverter::new("audio").failing("corrupt header"));
//!
//! let mut dispatch = ConverterDispatch::new();
//! dispatch.register_category(Category::Image, image.clone());
//! dispatch.register_category(Category::Audio, failing);
//! ```

mod mock_converter;

pub use mock_converter::MockConverter;
