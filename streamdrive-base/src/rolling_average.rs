/// Average over the last `window` samples. Storage is allocated once up front.
#[derive(Debug, Clone)]
pub struct RollingAverage {
    samples: Vec<f64>,
    next: usize,
    filled: usize,
    total_count: u64,
}

impl RollingAverage {
    pub fn new(window: usize) -> Self {
        RollingAverage {
            samples: vec![0.0; window.max(1)],
            next: 0,
            filled: 0,
            total_count: 0,
        }
    }

    pub fn push(
        &mut self,
        sample: f64,
    ) {
        self.samples[self.next] = sample;
        self.next = (self.next + 1) % self.samples.len();
        self.filled = (self.filled + 1).min(self.samples.len());
        self.total_count += 1;
    }

    pub fn average(&self) -> Option<f64> {
        if self.filled == 0 {
            return None;
        }

        let sum: f64 = self.samples[..self.filled].iter().sum();
        Some(sum / self.filled as f64)
    }

    /// Sum of the samples currently in the window
    pub fn window_sum(&self) -> f64 {
        self.samples[..self.filled].iter().sum()
    }

    /// Number of samples ever pushed, including ones that have fallen out of the window
    pub fn total_count(&self) -> u64 {
        self.total_count
    }
}
