use web3::types::{
    Address,
    U256,
};

pub const MON_DECIMALS: usize = 18;

fn wei_per_mon() -> U256 {
    U256::exp10(MON_DECIMALS)
}

/// Render a wei amount in MON.
///
/// Amounts of at least one MON get thousands separators and at most four fractional
/// digits, rounded half up. Smaller amounts keep full precision without trailing zeros.
pub fn format_mon(wei: U256) -> String {
    if wei.is_zero() {
        return "0".to_string();
    }
    if wei < wei_per_mon() {
        let fraction = format!("{:0>width$}", wei.to_string(), width = MON_DECIMALS);
        return format!("0.{}", fraction.trim_end_matches('0'));
    }

    let unit = U256::exp10(MON_DECIMALS - 4);
    let scaled = wei.saturating_add(unit / 2) / unit;
    let whole = scaled / U256::from(10_000);
    let fraction = (scaled % U256::from(10_000)).low_u64();
    let whole = group_thousands(&whole.to_string());
    if fraction == 0 {
        whole
    } else {
        let fraction = format!("{fraction:04}");
        format!("{whole}.{}", fraction.trim_end_matches('0'))
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `0x1234...abcd`
pub fn shorten_address(address: &Address) -> String {
    let full = format!("{address:?}");
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}

/// Coarse remaining time, e.g. `6d 23h`, `4h 10m`, `12m`, `30s`.
pub fn format_remaining(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    match (days, hours, minutes) {
        (0, 0, 0) => format!("{seconds}s"),
        (0, 0, m) => format!("{m}m"),
        (0, h, m) => format!("{h}h {m}m"),
        (d, h, _) => format!("{d}d {h}h"),
    }
}
