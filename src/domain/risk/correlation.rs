//! Static correlation-group partition: at most one open position per group.
//! Literal symbol sets and group names resolved from operator policy.

use std::collections::HashMap;

pub fn group_for(symbol: &str) -> Option<&'static str> {
    static GROUPS: &[(&str, &str)] = &[
        ("cmt_btcusdt", "A"),
        ("cmt_ethusdt", "A"),
        ("cmt_solusdt", "B"),
        ("cmt_dogeusdt", "B"),
        ("cmt_bnbusdt", "C"),
        ("cmt_ltcusdt", "C"),
        ("cmt_xrpusdt", "D"),
        ("cmt_adausdt", "D"),
    ];
    GROUPS.iter().find(|(s, _)| *s == symbol).map(|(_, g)| *g)
}

/// Minimum tradable order size per symbol, in base-asset units.
pub fn min_order_size(symbol: &str) -> Option<rust_decimal::Decimal> {
    use rust_decimal_macros::dec;
    match symbol {
        "cmt_btcusdt" => Some(dec!(0.001)),
        "cmt_ethusdt" => Some(dec!(0.01)),
        "cmt_solusdt" => Some(dec!(0.1)),
        "cmt_dogeusdt" => Some(dec!(10.0)),
        "cmt_xrpusdt" => Some(dec!(1.0)),
        "cmt_adausdt" => Some(dec!(1.0)),
        "cmt_bnbusdt" => Some(dec!(0.01)),
        "cmt_ltcusdt" => Some(dec!(0.01)),
        _ => None,
    }
}

/// Returns the symbol, if any, among `open_symbols` sharing `candidate`'s
/// correlation group.
pub fn conflicting_symbol<'a>(candidate: &str, open_symbols: impl IntoIterator<Item = &'a String>) -> Option<String> {
    let group = group_for(candidate)?;
    open_symbols
        .into_iter()
        .find(|s| s.as_str() != candidate && group_for(s) == Some(group))
        .cloned()
}

pub fn all_groups() -> HashMap<&'static str, Vec<&'static str>> {
    let mut map: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
    for symbol in [
        "cmt_btcusdt",
        "cmt_ethusdt",
        "cmt_solusdt",
        "cmt_dogeusdt",
        "cmt_bnbusdt",
        "cmt_ltcusdt",
        "cmt_xrpusdt",
        "cmt_adausdt",
    ] {
        if let Some(g) = group_for(symbol) {
            map.entry(g).or_default().push(symbol);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_group_symbols_conflict() {
        let open = vec!["cmt_btcusdt".to_string()];
        assert_eq!(conflicting_symbol("cmt_ethusdt", open.iter()), Some("cmt_btcusdt".to_string()));
    }

    #[test]
    fn different_group_symbols_do_not_conflict() {
        let open = vec!["cmt_btcusdt".to_string()];
        assert_eq!(conflicting_symbol("cmt_solusdt", open.iter()), None);
    }

    #[test]
    fn min_order_sizes_cover_all_known_symbols() {
        for (symbol, _) in all_groups().values().flatten().map(|s| (*s, ())) {
            assert!(min_order_size(symbol).is_some());
        }
    }
}
