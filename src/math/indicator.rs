use serde::{Deserialize, Serialize};

use crate::ring_buffer::RingBuffer;

/// A trait for incremental indicators.
/// Designed to be object-safe so detectors can hold `Box<dyn StreamingIndicator>`.
pub trait StreamingIndicator: std::fmt::Debug + Send + Sync {
    /// Update the indicator with the latest scalar value (e.g., a velocity sample).
    /// Returns `Some(value)` if the indicator is warm (enough data seen), otherwise `None`.
    fn update(&mut self, value: f64) -> Option<f64>;

    /// Reset the internal state to clear history.
    fn reset(&mut self);
}

// ================================================================================================
// SMA: Simple Moving Average
// ================================================================================================

/// Simple moving average over a fixed window, backed by a [`RingBuffer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingSma {
    window: RingBuffer<f64>,
    sum: f64,
}

impl StreamingSma {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: RingBuffer::new(window_size),
            sum: 0.0,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window.capacity()
    }

    /// Current mean, if the window is full.
    pub fn value(&self) -> Option<f64> {
        self.window
            .is_full()
            .then(|| self.sum / self.window.len() as f64)
    }
}

impl StreamingIndicator for StreamingSma {
    fn update(&mut self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return self.value();
        }

        // 1. Evict the value that is about to be overwritten
        if self.window.is_full() {
            if let Some(oldest) = self.window.get(self.window.len() - 1) {
                self.sum -= oldest;
            }
        }

        // 2. Add new value to window
        self.window.push(value);
        self.sum += value;

        // 3. Check readiness
        self.value()
    }

    fn reset(&mut self) {
        self.window.clear();
        self.sum = 0.0;
    }
}

// ================================================================================================
// EMA: Exponential Moving Average
// ================================================================================================

/// Exponential moving average with `alpha = 2 / (span + 1)`.
///
/// Implements the recursive formula: $y_t = \alpha * x_t + (1 - \alpha) * y_{t-1}$,
/// initialized with the first value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingEma {
    alpha: f64,
    current_mean: f64,
    span: usize,
    count: usize,
}

impl StreamingEma {
    pub fn new(span: usize) -> Self {
        let span = span.max(1);
        Self {
            alpha: 2.0 / (span as f64 + 1.0),
            current_mean: 0.0,
            span,
            count: 0,
        }
    }

    pub fn value(&self) -> Option<f64> {
        (self.count >= self.span).then_some(self.current_mean)
    }
}

impl StreamingIndicator for StreamingEma {
    fn update(&mut self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return self.value();
        }

        if self.count == 0 {
            self.current_mean = value;
        } else {
            self.current_mean = self.alpha * value + (1.0 - self.alpha) * self.current_mean;
        }
        self.count = self.count.saturating_add(1);

        self.value()
    }

    fn reset(&mut self) {
        self.current_mean = 0.0;
        self.count = 0;
    }
}
