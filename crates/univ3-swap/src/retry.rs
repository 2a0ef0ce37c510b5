use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Number of full rounds. Each round tries every endpoint once.
    pub rounds: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter (`0..=jitter_max_ms`) added to each backoff sleep.
    pub jitter_max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(4),
            jitter_max_ms: 250,
        }
    }
}

impl BackoffConfig {
    fn delay_after(&self, round: usize) -> Duration {
        let shift = u32::try_from(round.min(16)).unwrap_or(16_u32);
        let factor = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let ms = base_ms.saturating_mul(factor).min(max_ms);
        let jitter = if self.jitter_max_ms == 0 {
            0
        } else {
            rand::random::<u64>() % self.jitter_max_ms.saturating_add(1).max(1)
        };
        Duration::from_millis(ms.saturating_add(jitter))
    }
}

/// A contract call the node executed and rejected. Every endpoint would answer the same.
pub fn is_revert(err: &eyre::Report) -> bool {
    format!("{err:#}")
        .to_lowercase()
        .contains("execution reverted")
}

/// Run `op` against each endpoint in order until one succeeds. A round that fails on every
/// endpoint is followed by an exponential backoff sleep before the next round. A revert is
/// returned at once.
pub async fn first_ok_with_backoff<I, T, Fut>(
    endpoints: &[I],
    cfg: &BackoffConfig,
    mut op: impl FnMut(&I) -> Fut + Send,
    label: &'static str,
) -> eyre::Result<T>
where
    I: Sync,
    Fut: std::future::Future<Output = eyre::Result<T>> + Send,
{
    if endpoints.is_empty() {
        eyre::bail!("no rpc endpoints configured");
    }
    if cfg.rounds == 0 {
        eyre::bail!("invalid backoff config: rounds=0");
    }

    let mut last_err: Option<eyre::Report> = None;
    for round in 0..cfg.rounds {
        for ep in endpoints {
            match op(ep).await {
                Ok(v) => return Ok(v),
                Err(e) if is_revert(&e) => return Err(e.wrap_err(label)),
                Err(e) => {
                    tracing::debug!(op = label, round, error = %format!("{e:#}"), "endpoint attempt failed");
                    last_err = Some(e);
                }
            }
        }
        if round + 1 < cfg.rounds {
            tokio::time::sleep(cfg.delay_after(round)).await;
        }
    }

    Err(last_err
        .unwrap_or_else(|| eyre::eyre!("unknown error"))
        .wrap_err(label))
}
