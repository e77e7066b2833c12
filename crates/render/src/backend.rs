use crate::error::{RenderError, RenderResult};

/// One object-list draw: where the list lives in the physical arena and how
/// many ids it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub list_address: usize,
    pub count: usize,
}

/// The draw primitive of the GPU binding layer.
///
/// Called only from the GPU-submission thread, once per non-empty front
/// list per frame. Implementations read ids from arena memory that has
/// already been flushed.
pub trait GpuBackend {
    fn draw(&mut self, call: DrawCall) -> RenderResult<()>;
}

/// Backend that keeps every draw call; used by tests and the CLI.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Vec<DrawCall>,
    reject: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that refuses every draw.
    pub fn rejecting() -> Self {
        Self {
            calls: Vec::new(),
            reject: true,
        }
    }

    pub fn calls(&self) -> &[DrawCall] {
        &self.calls
    }

    pub fn last(&self) -> Option<DrawCall> {
        self.calls.last().copied()
    }

    /// Ids drawn across every recorded call.
    pub fn objects_drawn(&self) -> usize {
        self.calls.iter().map(|c| c.count).sum()
    }

    pub fn summary(&self) -> String {
        format!("draws={} objects={}", self.calls.len(), self.objects_drawn())
    }
}

impl GpuBackend for RecordingBackend {
    fn draw(&mut self, call: DrawCall) -> RenderResult<()> {
        if self.reject {
            return Err(RenderError::Backend("recording backend set to reject".into()));
        }
        self.calls.push(call);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_in_order() {
        let mut backend = RecordingBackend::new();
        backend.draw(DrawCall { list_address: 0, count: 3 }).unwrap();
        backend.draw(DrawCall { list_address: 64, count: 2 }).unwrap();
        assert_eq!(backend.calls().len(), 2);
        assert_eq!(backend.last(), Some(DrawCall { list_address: 64, count: 2 }));
        assert_eq!(backend.summary(), "draws=2 objects=5");
    }

    #[test]
    fn rejecting_backend_errors() {
        let mut backend = RecordingBackend::rejecting();
        assert!(matches!(
            backend.draw(DrawCall { list_address: 0, count: 1 }),
            Err(RenderError::Backend(_))
        ));
        assert!(backend.calls().is_empty());
    }
}
