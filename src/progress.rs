/// Snapshot handed to a progress callback while an image is streamed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
    pub description: Option<String>,
}

impl Progress {
    #[must_use]
    pub fn new(current: u64, total: u64, description: impl Into<String>) -> Self {
        Self {
            current,
            total,
            description: Some(description.into()),
        }
    }

    /// Completed fraction in `0.0..=1.0`. An empty job counts as done.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.current.min(self.total) as f64) / (self.total as f64)
        }
    }
}

/// Callback signature accepted by the writer and the patch driver.
pub type ProgressFn<'a> = dyn FnMut(&Progress) + 'a;

/// A callback that ignores every update.
pub fn silent(_: &Progress) {}

#[cfg(test)]
mod tests {
    use super::Progress;

    #[test]
    fn ratio_is_clamped_and_empty_jobs_are_complete() {
        assert_eq!(Progress::default().ratio(), 1.0);
        assert_eq!(Progress::new(1, 4, "copy").ratio(), 0.25);
        assert_eq!(Progress::new(9, 4, "copy").ratio(), 1.0);
    }
}
