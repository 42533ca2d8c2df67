//! Merge, dedupe and grouping of provider samples.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;

use super::model::{
    Reading, SampleWithProvider, SensorCategory, SensorChipGroup, SensorData, SensorKind,
    SensorSample,
};
use super::providers::lm_sensors::{self, parse_sensors_json, take_timestamp};

/// Flatten the last known samples of every provider into one list.
///
/// Providers are visited in `precedence` order; any provider with samples
/// but missing from that list is visited afterwards in name order. The
/// first sample seen for a `(kind, id)` key wins.
pub fn merge_samples(
    by_provider: &HashMap<&'static str, Vec<SensorSample>>,
    precedence: &[&'static str],
) -> Vec<SampleWithProvider> {
    let mut order: Vec<&'static str> = precedence
        .iter()
        .copied()
        .filter(|name| by_provider.contains_key(name))
        .collect();
    let mut rest: Vec<&'static str> = by_provider
        .keys()
        .copied()
        .filter(|name| !precedence.contains(name))
        .collect();
    rest.sort_unstable();
    order.extend(rest);

    let mut seen: HashSet<(SensorKind, &str)> = HashSet::new();
    let mut merged = Vec::new();
    for provider in order {
        for sample in &by_provider[provider] {
            if seen.insert((sample.kind, sample.id.as_str())) {
                merged.push(SampleWithProvider {
                    provider,
                    sample: sample.clone(),
                });
            }
        }
    }
    merged
}

/// Bucket samples into `chipId:category` groups sorted for display.
pub fn build_groups(samples: &[SampleWithProvider]) -> Vec<SensorChipGroup> {
    let mut buckets: BTreeMap<String, SensorChipGroup> = BTreeMap::new();

    for SampleWithProvider { provider, sample } in samples {
        if !sample.value.is_finite() {
            continue;
        }

        let category: SensorCategory = sample.effective_category();
        let chip_id = sample
            .chip_id
            .clone()
            .unwrap_or_else(|| provider.to_string());
        let id = format!("{}:{}", chip_id, category.as_str());

        let group = buckets.entry(id.clone()).or_insert_with(|| {
            let name = sample.chip_name.clone().unwrap_or_else(|| chip_id.clone());
            SensorChipGroup {
                id,
                label: sample.chip_label.clone().unwrap_or_else(|| name.clone()),
                name,
                category,
                readings: Vec::new(),
                source: Some(provider.to_string()),
            }
        });

        group.readings.push(Reading {
            label: sample.label.clone(),
            input: sample.value,
            min: sample.min,
            max: sample.max,
            critical: sample.critical,
            unit: sample
                .unit
                .clone()
                .or_else(|| sample.kind.default_unit().map(str::to_string)),
        });
    }

    let mut groups: Vec<SensorChipGroup> = buckets
        .into_values()
        .filter(|g| !g.readings.is_empty())
        .collect();
    for group in &mut groups {
        group.readings.sort_by(|a, b| natural_cmp(&a.label, &b.label));
    }
    groups.sort_by(|a, b| natural_cmp(&a.label, &b.label).then_with(|| a.id.cmp(&b.id)));
    groups
}

/// Merge and group in one step.
pub fn aggregate(
    by_provider: &HashMap<&'static str, Vec<SensorSample>>,
    precedence: &[&'static str],
    timestamp: Option<i64>,
) -> SensorData {
    SensorData {
        groups: build_groups(&merge_samples(by_provider, precedence)),
        timestamp,
    }
}

/// Parse a raw lm-sensors style payload, optionally carrying a top-level
/// `timestamp`, into grouped data.
pub fn parse_sensor_data(raw: &str) -> Result<SensorData, serde_json::Error> {
    let mut root: Value = serde_json::from_str(raw)?;
    let timestamp = root.as_object_mut().and_then(take_timestamp);

    let samples: Vec<SampleWithProvider> = parse_sensors_json(&root)
        .into_iter()
        .map(|sample| SampleWithProvider {
            provider: lm_sensors::NAME,
            sample,
        })
        .collect();

    Ok(SensorData {
        groups: build_groups(&samples),
        timestamp,
    })
}

/// Case-insensitive comparison that orders digit runs by numeric value,
/// so `Core 2` sorts before `Core 10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let lhs = take_digits(&mut left);
                let rhs = take_digits(&mut right);
                let lhs_trimmed = lhs.trim_start_matches('0');
                let rhs_trimmed = rhs.trim_start_matches('0');
                let ord = lhs_trimmed
                    .len()
                    .cmp(&rhs_trimmed.len())
                    .then_with(|| lhs_trimmed.cmp(rhs_trimmed));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                let ord = x.to_lowercase().cmp(y.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits<I: Iterator<Item = char>>(chars: &mut std::iter::Peekable<I>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        digits.push(c);
        chars.next();
    }
    digits
}
