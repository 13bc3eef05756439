use std::time::Duration;

use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

impl Trend {
    pub fn arrow(&self) -> &'static str {
        match self {
            Trend::Up => "▲",
            Trend::Down => "▼",
            Trend::Flat => "•",
        }
    }
}

fn fixed(value: Decimal, dp: u32) -> String {
    let mut value = value;
    value.rescale(dp);
    value.to_string()
}

fn group_thousands(text: &str) -> String {
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text),
    };
    let (int, frac) = match unsigned.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(int.len() + int.len() / 3);
    for (i, ch) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    match frac {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}

/// More decimals the cheaper the asset: 2 from $1000, 4 from $1, 6 from
/// one cent, 8 below.
pub fn format_price(price: Decimal) -> String {
    let abs = price.abs();
    if abs >= Decimal::ONE_THOUSAND {
        format!("${}", group_thousands(&fixed(price, 2)))
    } else if abs >= Decimal::ONE {
        format!("${}", fixed(price, 4))
    } else if abs >= Decimal::new(1, 2) {
        format!("${}", fixed(price, 6))
    } else {
        format!("${}", fixed(price, 8))
    }
}

pub fn format_change(change: Decimal) -> (String, Trend) {
    let rounded = fixed(change, 2);
    if change > Decimal::ZERO {
        (format!("+{rounded}%"), Trend::Up)
    } else if change < Decimal::ZERO {
        (format!("{rounded}%"), Trend::Down)
    } else {
        ("0.00%".to_string(), Trend::Flat)
    }
}

/// 1.23B, 45.60M, 7.89K, or the plain amount below a thousand.
pub fn format_volume(volume: Decimal) -> String {
    let units = [
        (Decimal::from(1_000_000_000u64), "B"),
        (Decimal::from(1_000_000u64), "M"),
        (Decimal::ONE_THOUSAND, "K"),
    ];
    for (size, suffix) in units {
        if volume.abs() >= size {
            return format!("{}{suffix}", fixed(volume / size, 2));
        }
    }
    fixed(volume, 2)
}

pub fn format_age(age: Option<Duration>) -> String {
    match age.map(|a| a.as_secs()) {
        None => "never".to_string(),
        Some(s) if s < 60 => format!("{s}s ago"),
        Some(s) if s < 3600 => format!("{}m ago", s / 60),
        Some(s) => format!("{}h ago", s / 3600),
    }
}
