use std::time::Duration;

/// Aggregated round-trip times, fed by ConnectedPong replies.
#[derive(Debug, Clone, Copy, Default)]
pub struct Latency {
    pub total: Duration,
    pub average: Duration,
    pub last: Duration,
    pub lowest: Duration,
    pub highest: Duration,
    samples: u32,
}

impl Latency {
    pub fn add_raw(&mut self, raw: Duration) {
        self.last = raw;

        if self.samples == 0 {
            self.lowest = raw;
            self.highest = raw;
        } else {
            if raw < self.lowest {
                self.lowest = raw;
            }
            if raw > self.highest {
                self.highest = raw;
            }
        }

        self.samples += 1;
        self.total += raw;
        self.average = self.total / self.samples;
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }
}
