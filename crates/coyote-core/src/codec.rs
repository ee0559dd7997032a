//! DungeonLab `.pulse` export parser.
//!
//! The export format is richer than what the device queue accepts, so this is
//! an approximation: only the strength points after the `/` of every section
//! are kept (e.g. `100.00-1` → 100%), grouped four at a time into pulse
//! operations at a fixed 80 Hz frequency.

use crate::types::{PULSE_STRENGTH_RANGE, PulseOperation};

const HEADER: &str = "Dungeonlab+pulse";
const SECTION_DELIMITER: &str = "+section+";
const FIXED_FREQUENCY: i64 = 80;

/// Upper bound on operations produced per preset. The device accepts at most
/// 86 operations per `pulse-*` message; keep a margin below that.
pub const MAX_PRESET_PULSES: usize = 80;

/// Parse a DungeonLab export into pulse operations.
///
/// Lenient: unparsable tokens are skipped, and any structural problem yields
/// an empty sequence rather than an error.
pub fn parse_dungeonlab_pulse(text: &str) -> Vec<PulseOperation> {
    if !text.starts_with(HEADER) {
        return Vec::new();
    }
    let Some((_, body)) = text.split_once(':') else {
        return Vec::new();
    };

    let strengths: Vec<f64> = body
        .split(SECTION_DELIMITER)
        .filter_map(|section| section.split_once('/').map(|(_, points)| points))
        .flat_map(|points| points.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(parse_point)
        .collect();

    strengths
        .chunks(4)
        .take(MAX_PRESET_PULSES)
        .map(|chunk| {
            let last = chunk[chunk.len() - 1];
            let mut group = [last; 4];
            group[..chunk.len()].copy_from_slice(chunk);
            PulseOperation::new([FIXED_FREQUENCY; 4], group.map(to_percent))
        })
        .collect()
}

/// `"100.00-1"` → `100.0`. The suffix after `-` is a flag we ignore.
fn parse_point(token: &str) -> Option<f64> {
    let value = token.split('-').next()?.trim();
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn to_percent(v: f64) -> i64 {
    v.round_ties_even()
        .clamp(*PULSE_STRENGTH_RANGE.start() as f64, *PULSE_STRENGTH_RANGE.end() as f64)
        as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_points_into_groups_of_four() {
        let text = "Dungeonlab+pulse:seg+section+x/10.00-1,20.00-1,30.00-1,40.00-1,50.00-1";
        let ops = parse_dungeonlab_pulse(text);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].frequency, [80, 80, 80, 80]);
        assert_eq!(ops[0].strength, [10, 20, 30, 40]);
        assert_eq!(ops[1].frequency, [80, 80, 80, 80]);
        assert_eq!(ops[1].strength, [50, 50, 50, 50]);
    }

    #[test]
    fn requires_header() {
        assert!(parse_dungeonlab_pulse("").is_empty());
        assert!(parse_dungeonlab_pulse("pulse:seg+section+x/10.00-1").is_empty());
        assert!(parse_dungeonlab_pulse(" Dungeonlab+pulse:x/10.00-1").is_empty());
    }

    #[test]
    fn header_without_body_is_empty() {
        assert!(parse_dungeonlab_pulse("Dungeonlab+pulse").is_empty());
        assert!(parse_dungeonlab_pulse("Dungeonlab+pulse:no-slash-here").is_empty());
    }

    #[test]
    fn skips_unparsable_tokens_and_clamps() {
        let text = "Dungeonlab+pulse:a/abc-1,,150.0-1, 12.5-0 ,-3-1,nan-1,99.5-1";
        let ops = parse_dungeonlab_pulse(text);
        assert_eq!(ops.len(), 1);
        // 150 clamps to 100; 12.5 and 99.5 round half to even.
        assert_eq!(ops[0].strength, [100, 12, 100, 100]);
    }

    #[test]
    fn multiple_sections_are_concatenated() {
        let text = "Dungeonlab+pulse:head=1+section+s1/1.0-1,2.0-1+section+s2/3.0-1,4.0-1";
        let ops = parse_dungeonlab_pulse(text);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].strength, [1, 2, 3, 4]);
    }

    #[test]
    fn output_is_capped() {
        let points: Vec<String> = (0..400).map(|i| format!("{}.00-1", i % 100)).collect();
        let text = format!("Dungeonlab+pulse:x/{}", points.join(","));
        let ops = parse_dungeonlab_pulse(&text);
        assert_eq!(ops.len(), MAX_PRESET_PULSES);
        assert_eq!(ops[0].strength, [0, 1, 2, 3]);
    }
}
