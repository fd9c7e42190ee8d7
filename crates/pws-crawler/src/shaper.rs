use std::time::Duration;

use rand::Rng;

use crate::config::PacingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    /// 0-based index of the logical request within its run
    pub sequence: usize,
}

/// Decides how long to wait before each request. Knows nothing about transport.
#[derive(Debug, Clone, Copy)]
pub struct RateShaper {
    config: PacingConfig,
}

impl RateShaper {
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    pub fn delay_before_request<R: Rng + ?Sized>(
        &self,
        ctx: &RequestContext,
        rng: &mut R,
    ) -> Duration {
        if ctx.sequence == 0 && !self.config.delay_first {
            return Duration::ZERO;
        }

        let mut delay = self.config.delay.sample(rng);
        if let Some(every) = self.config.pause_every {
            if ctx.sequence > 0 && ctx.sequence % every.get() == 0 {
                delay += self.config.pause.sample(rng);
            }
        }
        if let Some(behavior) = self.config.behavior {
            delay += behavior.sample(rng);
        }
        delay
    }
}
