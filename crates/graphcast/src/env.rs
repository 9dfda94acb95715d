use std::env;
use std::sync::OnceLock;

static GRAPHCAST_PASS_STATS: OnceLock<bool> = OnceLock::new();
static GRAPHCAST_FIXED_POINT_ITERS: OnceLock<Option<usize>> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_count(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|count| *count > 0)
}

/// Emits per-pass summaries at `info` level when set.
pub(crate) fn pass_stats_enabled() -> bool {
    *GRAPHCAST_PASS_STATS.get_or_init(|| match env::var("GRAPHCAST_PASS_STATS") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// Overrides the iteration bound of fixed-point pipeline steps.
pub(crate) fn fixed_point_iters() -> Option<usize> {
    *GRAPHCAST_FIXED_POINT_ITERS.get_or_init(|| match env::var("GRAPHCAST_FIXED_POINT_ITERS") {
        Ok(value) => parse_count(&value),
        Err(_) => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flag_spellings() {
        assert!(parse_bool(" Yes "));
        assert!(parse_bool("1"));
        assert!(!parse_bool("off"));
        assert_eq!(parse_count("8"), Some(8));
        assert_eq!(parse_count("0"), None);
        assert_eq!(parse_count("many"), None);
    }
}
