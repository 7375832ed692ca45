use std::sync::atomic::{AtomicI64, Ordering};

/// Requests seen since the last report
#[derive(Debug, Default)]
pub struct RequestCounter {
    count: AtomicI64,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn current(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    /// Read and reset in one step; no arrival is lost or counted twice
    pub fn take(&self) -> i64 {
        self.count.swap(0, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_take_resets() {
        let counter = RequestCounter::new();
        counter.record();
        counter.record();
        assert_eq!(counter.take(), 2);
        assert_eq!(counter.take(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_not_lost() {
        let counter = Arc::new(RequestCounter::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    counter.record();
                }
            }));
        }

        let mut taken = 0;
        for handle in handles {
            taken += counter.take();
            handle.await.unwrap();
        }
        taken += counter.take();

        assert_eq!(taken, 8000);
    }
}
