//! Mock converter for testing.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::converter::{ConversionRequest, Converter, ConverterError};

#[derive(Debug, Clone)]
enum MockBehavior {
    Succeed,
    Fail(String),
    Unsupported,
    Panic(String),
}

/// Mock implementation of the Converter trait.
///
/// Provides controllable behavior for testing:
/// - Track conversion requests for assertions
/// - Simulate success, failure, "not implemented", or a plugin that panics
/// - Simulate slow plugins and observe overlap between calls
///
/// On success the mock writes `converted by <name>` to the requested output path.
///
/// # Example
///
/// ```rust,ignore
/// use transmute_core::testing::MockConverter;
///
/// let converter = Arc::new(MockConverter::new("image").with_delay(Duration::from_millis(50)));
/// dispatch.register_category(Category::Image, converter.clone());
///
/// // ... run a conversion ...
///
/// assert_eq!(converter.call_count(), 1);
/// ```
#[derive(Debug)]
pub struct MockConverter {
    name: String,
    behavior: MockBehavior,
    delay: Duration,
    requests: Arc<RwLock<Vec<ConversionRequest>>>,
    next_error: Arc<RwLock<Option<ConverterError>>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockConverter {
    /// Create a mock converter that succeeds immediately.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behavior: MockBehavior::Succeed,
            delay: Duration::ZERO,
            requests: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Every call fails with a conversion failure carrying `reason`.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.behavior = MockBehavior::Fail(reason.into());
        self
    }

    /// Every call declines the pair as not implemented.
    pub fn unsupported(mut self) -> Self {
        self.behavior = MockBehavior::Unsupported;
        self
    }

    /// Every call panics with `message` instead of returning.
    pub fn panicking(mut self, message: impl Into<String>) -> Self {
        self.behavior = MockBehavior::Panic(message.into());
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Configure the next call to fail with the given error.
    pub async fn set_next_error(&self, error: ConverterError) {
        *self.next_error.write().await = Some(error);
    }

    /// Number of calls that reached the plugin.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Get all recorded requests.
    pub async fn recorded_requests(&self) -> Vec<ConversionRequest> {
        self.requests.read().await.clone()
    }

    async fn run(&self, request: &ConversionRequest) -> Result<PathBuf, ConverterError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        match &self.behavior {
            MockBehavior::Fail(reason) => {
                return Err(ConverterError::conversion_failed(reason.clone(), None))
            }
            MockBehavior::Unsupported => {
                return Err(ConverterError::unsupported(
                    &request.source_format,
                    &request.target_format,
                ))
            }
            MockBehavior::Panic(message) => panic!("{}", message),
            MockBehavior::Succeed => {}
        }

        if !request.input_path.exists() {
            return Err(ConverterError::InputNotFound {
                path: request.input_path.clone(),
            });
        }

        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(
            &request.output_path,
            format!("converted by {}", self.name),
        )
        .await?;

        Ok(request.output_path.clone())
    }
}

#[async_trait]
impl Converter for MockConverter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn convert(&self, request: ConversionRequest) -> Result<PathBuf, ConverterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        self.requests.write().await.push(request.clone());
        let result = self.run(&request).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
