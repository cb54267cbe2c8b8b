//! Resource quantity arithmetic for gang minimum resources.
//!
//! Kubernetes quantities are strings (`"500m"`, `"2Gi"`, `"1e3"`). They are
//! parsed into milli-units so that sums over many pods stay exact, then
//! rendered back into a canonical quantity string.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, PodSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::warn;

/// Resource name to amount in milli-units.
pub type MilliResources = BTreeMap<String, i128>;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ei", 60),
    ("Pi", 50),
    ("Ti", 40),
    ("Gi", 30),
    ("Mi", 20),
    ("Ki", 10),
];

/// Parse a quantity string into milli-units, rounding up to the next milli.
///
/// Returns `None` when the string is not a valid Kubernetes quantity.
pub fn parse_milli(value: &str) -> Option<i128> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);

    let (negative, number) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let digits = format!("{whole}{fraction}");
    let mantissa: i128 = digits.parse().ok()?;
    let scale = u32::try_from(fraction.len()).ok()?;

    // Value in milli-units is mantissa * numerator / denominator.
    let (numerator, denominator) = suffix_factor(suffix)?;
    let denominator = denominator.checked_mul(10i128.checked_pow(scale)?)?;
    let product = mantissa.checked_mul(numerator)?;
    let milli = (product + denominator - 1) / denominator;

    Some(if negative { -milli } else { milli })
}

/// Multiplier for a suffix, expressed as a milli-unit fraction.
fn suffix_factor(suffix: &str) -> Option<(i128, i128)> {
    let decimal = |exp: u32| Some((10i128.pow(exp + 3), 1));
    match suffix {
        "" => decimal(0),
        "m" => Some((1, 1)),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        _ => {
            if let Some((_, shift)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
                return Some(((1i128 << shift) * 1000, 1));
            }
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?;
            let exponent: i32 = exponent.parse().ok()?;
            let exponent = exponent.checked_add(3)?;
            if exponent >= 0 {
                Some((10i128.checked_pow(exponent as u32)?, 1))
            } else {
                Some((1, 10i128.checked_pow(exponent.unsigned_abs())?))
            }
        }
    }
}

/// Render milli-units back into a quantity string.
pub fn format_milli(milli: i128) -> String {
    if milli % 1000 != 0 {
        return format!("{milli}m");
    }
    let units = milli / 1000;
    if units != 0 {
        for (suffix, shift) in BINARY_SUFFIXES {
            let base = 1i128 << shift;
            if units.abs() >= base && units % base == 0 {
                return format!("{}{suffix}", units / base);
            }
        }
    }
    units.to_string()
}

pub fn to_quantities(resources: &MilliResources) -> BTreeMap<String, Quantity> {
    resources
        .iter()
        .map(|(name, milli)| (name.clone(), Quantity(format_milli(*milli))))
        .collect()
}

pub fn from_quantities(quantities: &BTreeMap<String, Quantity>) -> MilliResources {
    let mut out = MilliResources::new();
    for (name, quantity) in quantities {
        match parse_milli(&quantity.0) {
            Some(milli) => {
                out.insert(name.clone(), milli);
            }
            None => warn!(resource = %name, quantity = %quantity.0, "skipping unparseable quantity"),
        }
    }
    out
}

/// Add `other` scaled by `factor` into `acc`.
pub fn add_scaled(acc: &mut MilliResources, other: &MilliResources, factor: i128) {
    for (name, milli) in other {
        *acc.entry(name.clone()).or_insert(0) += milli * factor;
    }
}

fn container_requests(container: &Container) -> MilliResources {
    let Some(resources) = container.resources.as_ref() else {
        return MilliResources::new();
    };
    // A missing request defaults to the limit.
    let mut effective = resources.limits.clone().unwrap_or_default();
    if let Some(requests) = resources.requests.as_ref() {
        effective.extend(requests.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    from_quantities(&effective)
}

/// Effective resource request of a single pod.
///
/// Regular containers run together and are summed; init containers run one
/// at a time so only the largest counts. Pod overhead is added on top.
pub fn pod_requests(spec: &PodSpec) -> MilliResources {
    let mut total = MilliResources::new();
    for container in &spec.containers {
        add_scaled(&mut total, &container_requests(container), 1);
    }

    for init in spec.init_containers.iter().flatten() {
        for (name, milli) in container_requests(init) {
            let entry = total.entry(name).or_insert(0);
            if milli > *entry {
                *entry = milli;
            }
        }
    }

    if let Some(overhead) = spec.overhead.as_ref() {
        add_scaled(&mut total, &from_quantities(overhead), 1);
    }
    total
}
