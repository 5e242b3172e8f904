/// Milliseconds since the Unix epoch. Round start times are stamped with this
/// so every client derives its countdown from the same reference.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Whole seconds left on a round timer, clamped at zero.
pub fn remaining_secs(round_start_ms: u64, timer_secs: u32, now_ms: u64) -> u32 {
    let elapsed_ms = now_ms.saturating_sub(round_start_ms);
    let total_ms = u64::from(timer_secs) * 1000;
    let left_ms = total_ms.saturating_sub(elapsed_ms);
    left_ms.div_ceil(1000) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_counts_down_and_clamps() {
        assert_eq!(remaining_secs(1_000, 120, 1_000), 120);
        assert_eq!(remaining_secs(1_000, 120, 31_000), 90);
        assert_eq!(remaining_secs(1_000, 120, 31_500), 90);
        assert_eq!(remaining_secs(1_000, 120, 121_000), 0);
        assert_eq!(remaining_secs(1_000, 120, 500_000), 0);
    }

    #[test]
    fn clock_skew_before_start_gives_full_timer() {
        assert_eq!(remaining_secs(10_000, 60, 5_000), 60);
    }
}
