/// Running mean and variance (Welford)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Averager {
    pub mean: f64,
    pub count: u64,
    m2: f64,
}

impl Averager {
    /// Builds new Averager
    pub fn new() -> Self {
        Self::default()
    }

    /// Push new value into [Averager]
    pub fn add(&mut self, x: f64) {
        self.count += 1;
        let k = self.count as f64;
        let delta = x - self.mean;
        self.mean += delta / k;
        self.m2 += delta * (x - self.mean);
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Sample standard deviation
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Reset [Averager]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod test {
    use super::Averager;

    #[test]
    fn test_averager() {
        let mut avg = Averager::new();

        for (x_i, mean, variance) in [(1.0, 1.0, 0.0), (0.5, 0.75, 0.125), (1.5, 1.0, 0.25)] {
            avg.add(x_i);
            assert_eq!(avg.mean, mean);
            assert!((avg.variance() - variance).abs() < 1E-12);
        }

        avg.reset();
        assert_eq!(avg.count, 0);
        assert_eq!(avg.std_dev(), 0.0);
    }
}
