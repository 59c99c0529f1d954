//! Hardware tick unwrapping
//!
//! The server reports a 32-bit free-running tick per result. Within one
//! session ticks only move forward, so a raw value that does not exceed the
//! last corrected value means the counter wrapped.

use protocol::ExtendedResult;

/// Modulus of the hardware tick counter
pub const TICK_MODULUS: u64 = 1 << 32;

/// Reconstructs a monotonic tick from wrapping hardware ticks
#[derive(Debug, Clone, Default)]
pub struct TickUnwrapper {
    /// Smallest corrected tick the next batch may contain
    next_min_tick: Option<u64>,
}

impl TickUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the watermark; required whenever a session restarts
    pub fn reset(&mut self) {
        self.next_min_tick = None;
    }

    pub fn next_min_tick(&self) -> Option<u64> {
        self.next_min_tick
    }

    /// Unwrap one batch of raw ticks in place
    ///
    /// Every value in the batch is corrected against the watermark left by
    /// the previous batch, so sensors reporting slightly different ticks in
    /// the same frame do not push each other over a wrap.
    pub fn unwrap_ticks(&mut self, ticks: &mut [u64]) {
        if ticks.is_empty() {
            return;
        }

        if let Some(min_tick) = self.next_min_tick {
            let epoch = min_tick - min_tick % TICK_MODULUS;
            for tick in ticks.iter_mut() {
                let mut corrected = epoch + *tick % TICK_MODULUS;
                if corrected < min_tick {
                    corrected += TICK_MODULUS;
                }
                *tick = corrected;
            }
        }

        let max_tick = ticks.iter().copied().max().unwrap_or_default();
        self.next_min_tick = Some(max_tick + 1);
    }

    /// Unwrap the ticks of one extended result and refresh `tick_time`
    pub fn unwrap_results(&mut self, results: &mut ExtendedResult, ticks_per_second: u64) {
        let mut ticks: Vec<u64> = results
            .iter()
            .flat_map(|group| group.values().map(|r| r.tick))
            .collect();

        self.unwrap_ticks(&mut ticks);

        let tps = ticks_per_second.max(1) as f64;
        for (result, tick) in results
            .iter_mut()
            .flat_map(|group| group.values_mut())
            .zip(ticks)
        {
            result.tick = tick;
            result.tick_time = tick as f64 / tps;
        }
    }
}
