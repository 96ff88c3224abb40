mod deglue;
mod lines;
mod zones;

use std::{collections::BTreeSet, sync::LazyLock};

use regex::Regex;
use tracing::instrument;

pub use deglue::{deglue, digit_runs, DigitRun};
pub use lines::{cluster_lines, Line};
pub use zones::{
    assign_zones, find_markers, Assignment, Group, LineGroups, Marker, Zone, BACK_RANGE, FRONT_RANGE,
};

use crate::{config::ParserConfig, error::ParseError, ParsedTicket, TextToken};
use zones::{BACK_COUNT, FRONT_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub token: usize,
    pub offset: usize,
}

static PERIOD_AFTER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:第|期号|期次|period|issue)\s*(?:no\.?)?\s*[:：#]?\s*(\d{5})(?:\D|$)")
        .expect("period regex")
});
static PERIOD_BEFORE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)(\d{5})\s*期").expect("period suffix regex"));
static PERIOD_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:连续|连买|追号|期数|多期|consecutive|count)\s*[:：x×]?\s*(\d{1,2})(?:\D|$)")
        .expect("period count regex")
});

pub struct TicketParser {
    config: ParserConfig,
}

impl TicketParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    #[instrument(level = "debug", skip_all, fields(tokens = tokens.len()))]
    pub fn parse(&self, tokens: &[TextToken]) -> Result<ParsedTicket, ParseError> {
        validate(tokens)?;

        let kept: Vec<&TextToken> = tokens
            .iter()
            .filter(|it| !it.text.trim().is_empty())
            .filter(|it| it.confidence >= self.config.confidence_threshold)
            .filter(|it| !self.config.is_noise(&it.text))
            .collect();
        log::debug!("{} of {} tokens survived noise filtering", kept.len(), tokens.len());

        let lines = cluster_lines(&kept);
        let texts: Vec<String> = lines.iter().map(Line::text).collect();
        let mut consumed = vec![false; lines.len()];

        let mut ticket = ParsedTicket::default();

        match find_period(&texts) {
            Some((line, period)) => {
                consumed[line] = true;
                ticket.period_number = Some(period);
            }
            None => ticket.warnings.push("period number not found".to_string()),
        }
        if let Some((line, count)) = find_period_count(&texts) {
            consumed[line] = true;
            ticket.period_count = count.clamp(1, self.config.max_period_count.max(1));
            if ticket.period_count != count {
                log::debug!("Clamped period count {count} to {}", ticket.period_count);
            }
        }

        let valid = |n: u8| FRONT_RANGE.contains(&n) || BACK_RANGE.contains(&n);
        let groups: Vec<LineGroups> = lines
            .iter()
            .zip(&consumed)
            .map(|(line, consumed)| {
                if *consumed {
                    return LineGroups::default();
                }
                let groups = digit_runs(line)
                    .into_iter()
                    .flat_map(|run| {
                        deglue(&run.digits, valid)
                            .into_iter()
                            .map(move |value| Group {
                                value,
                                at: run.start,
                            })
                    })
                    .collect();
                LineGroups {
                    groups,
                    markers: find_markers(line),
                }
            })
            .collect();

        let assignment = assign_zones(&groups);
        collect_zone(&mut ticket.front_numbers, &assignment.front, "front", &mut ticket.warnings);
        collect_zone(&mut ticket.back_numbers, &assignment.back, "back", &mut ticket.warnings);
        ticket.warnings.extend(
            assignment
                .out_of_range
                .iter()
                .map(|(zone, value)| format!("{zone} zone number {value:02} is out of range")),
        );
        if !assignment.ambiguous.is_empty() {
            let listed = assignment
                .ambiguous
                .iter()
                .map(|n| format!("{n:02}"))
                .collect::<Vec<_>>()
                .join(", ");
            ticket
                .warnings
                .push(format!("could not tell which zone these numbers belong to: {listed}"));
        }
        ticket
            .warnings
            .extend(shortfall("front", ticket.front_numbers.len(), FRONT_COUNT));
        ticket
            .warnings
            .extend(shortfall("back", ticket.back_numbers.len(), BACK_COUNT));

        log::debug!("Parsed ticket: {ticket:?}");
        Ok(ticket)
    }
}

fn validate(tokens: &[TextToken]) -> Result<(), ParseError> {
    for (index, token) in tokens.iter().enumerate() {
        if !token.confidence.is_finite() {
            return Err(ParseError::InvalidConfidence { index });
        }
        if !token.bounds.is_finite() {
            return Err(ParseError::InvalidBounds { index });
        }
    }
    Ok(())
}

fn find_period(lines: &[String]) -> Option<(usize, String)> {
    lines.iter().enumerate().find_map(|(index, text)| {
        [&*PERIOD_AFTER_MARKER, &*PERIOD_BEFORE_MARKER]
            .iter()
            .filter_map(|regex| regex.captures(text)?.get(1))
            .min_by_key(|digits| digits.start())
            .map(|digits| (index, digits.as_str().to_string()))
    })
}

fn find_period_count(lines: &[String]) -> Option<(usize, u8)> {
    lines.iter().enumerate().find_map(|(index, text)| {
        let digits = PERIOD_COUNT.captures(text)?.get(1)?;
        Some((index, digits.as_str().parse().ok()?))
    })
}

fn collect_zone(target: &mut BTreeSet<u8>, values: &[u8], zone: &str, warnings: &mut Vec<String>) {
    for &value in values {
        if !target.insert(value) {
            warnings.push(format!("{zone} zone repeats number {value:02}"));
        }
    }
}

fn shortfall(zone: &str, found: usize, expected: usize) -> Option<String> {
    match found.cmp(&expected) {
        std::cmp::Ordering::Less => Some(format!("{zone} zone has {found} of {expected} numbers")),
        std::cmp::Ordering::Greater => {
            Some(format!("{zone} zone has {found} numbers, expected {expected}"))
        }
        std::cmp::Ordering::Equal => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;

    fn rows(rows: &[&[&str]]) -> Vec<TextToken> {
        rows.iter()
            .enumerate()
            .flat_map(|(row, texts)| {
                texts.iter().enumerate().map(move |(col, text)| {
                    TextToken::new(
                        *text,
                        BoundingBox::new(10.0 + col as f32 * 40.0, 10.0 + row as f32 * 30.0, 34.0, 18.0),
                        0.95,
                    )
                })
            })
            .collect()
    }

    fn parse(tokens: &[TextToken]) -> ParsedTicket {
        TicketParser::new(ParserConfig::default())
            .parse(tokens)
            .expect("well-formed tokens")
    }

    #[test]
    fn complete_ticket_has_no_warnings() {
        let ticket = parse(&rows(&[
            &["第", "25102", "期"],
            &["前区", "03", "11", "19", "27", "33"],
            &["后区", "05", "08"],
        ]));
        assert_eq!(ticket.period_number.as_deref(), Some("25102"));
        assert_eq!(ticket.front_numbers, [3, 11, 19, 27, 33].into());
        assert_eq!(ticket.back_numbers, [5, 8].into());
        assert_eq!(ticket.period_count, 1);
        assert!(ticket.warnings.is_empty(), "{:?}", ticket.warnings);
    }

    #[test]
    fn empty_input_is_all_warnings() {
        let ticket = parse(&[]);
        assert_eq!(ticket.period_number, None);
        assert!(ticket.front_numbers.is_empty() && ticket.back_numbers.is_empty());
        assert_eq!(
            ticket.warnings,
            [
                "period number not found",
                "front zone has 0 of 5 numbers",
                "back zone has 0 of 2 numbers"
            ]
        );
    }

    #[test]
    fn missing_front_number_is_reported() {
        let ticket = parse(&rows(&[
            &["第25102期"],
            &["前区", "03", "11", "19", "27"],
            &["后区", "05 08"],
        ]));
        assert_eq!(ticket.front_numbers, [3, 11, 19, 27].into());
        assert_eq!(ticket.back_numbers, [5, 8].into());
        assert_eq!(ticket.warnings, ["front zone has 4 of 5 numbers"]);
    }

    #[test]
    fn period_marker_variants() {
        for text in ["第25102期", "期号:25102", "25102期", "Issue 25102"] {
            let ticket = parse(&rows(&[&[text]]));
            assert_eq!(ticket.period_number.as_deref(), Some("25102"), "{text}");
        }
        let ticket = parse(&rows(&[&["第251020期"]]));
        assert_eq!(ticket.period_number, None);
        assert_eq!(ticket.warnings[0], "period number not found");
    }

    #[test]
    fn first_period_in_reading_order_wins() {
        let ticket = parse(&rows(&[&["开奖", "第25102期"], &["第25103期"]]));
        assert_eq!(ticket.period_number.as_deref(), Some("25102"));
    }

    #[test]
    fn period_count_is_clamped() {
        let count = |text: &str| parse(&rows(&[&[text]])).period_count;
        assert_eq!(count("连续 5 期"), 5);
        assert_eq!(count("期数:45"), 30);
        assert_eq!(count("追号0"), 1);
        assert_eq!(count("nothing here"), 1);
    }

    #[test]
    fn blacklisted_tokens_are_ignored_everywhere() {
        let config = ParserConfig::default();
        for entry in &config.blacklist {
            let tokens = rows(&[&[entry.as_str(), "03"], &["第25102期"]]);
            let ticket = TicketParser::new(config.clone()).parse(&tokens).expect("parse");
            assert_eq!(ticket.period_number.as_deref(), Some("25102"), "{entry}");
            assert_eq!(ticket.front_numbers.len() + ticket.back_numbers.len(), 0, "{entry}");
        }

        let custom = ParserConfig {
            blacklist: vec!["25102".into()],
            ..Default::default()
        };
        let ticket = TicketParser::new(custom)
            .parse(&rows(&[&["第", "25102", "期"]]))
            .expect("parse");
        assert_eq!(ticket.period_number, None);

        let custom = ParserConfig {
            blacklist: vec!["07".into()],
            ..Default::default()
        };
        let ticket = TicketParser::new(custom)
            .parse(&rows(&[&["前区", "03", "07", "11"]]))
            .expect("parse");
        assert_eq!(ticket.front_numbers, [3, 11].into());
    }

    #[test]
    fn low_confidence_tokens_are_dropped() {
        let mut tokens = rows(&[&["01", "02", "03", "04", "05"]]);
        tokens[4].confidence = 0.1;
        let ticket = parse(&tokens);
        assert_eq!(ticket.front_numbers.len(), 0);
        assert!(ticket
            .warnings
            .iter()
            .any(|it| it.starts_with("could not tell which zone")));
    }

    #[test]
    fn glued_numbers_are_split() {
        let ticket = parse(&rows(&[
            &["第25102期"],
            &["0311192733+0508"],
        ]));
        assert_eq!(ticket.front_numbers, [3, 11, 19, 27, 33].into());
        assert_eq!(ticket.back_numbers, [5, 8].into());
        assert!(ticket.warnings.is_empty(), "{:?}", ticket.warnings);
    }

    #[test]
    fn duplicates_are_reported() {
        let ticket = parse(&rows(&[
            &["第25102期"],
            &["前区", "03", "11", "11", "27", "33"],
            &["后区", "05", "08"],
        ]));
        assert_eq!(ticket.front_numbers, [3, 11, 27, 33].into());
        assert_eq!(
            ticket.warnings,
            ["front zone repeats number 11", "front zone has 4 of 5 numbers"]
        );
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let mut tokens = rows(&[&["03"]]);
        tokens[0].confidence = f32::NAN;
        let err = TicketParser::new(ParserConfig::default())
            .parse(&tokens)
            .unwrap_err();
        assert_eq!(err, ParseError::InvalidConfidence { index: 0 });
    }

    #[test]
    fn marked_values_outside_the_zone_range_are_flagged() {
        let ticket = parse(&rows(&[
            &["第25102期"],
            &["前区", "03", "11", "19", "27", "33"],
            &["后区", "05", "28"],
        ]));
        assert_eq!(ticket.front_numbers, [3, 11, 19, 27, 33].into());
        assert_eq!(ticket.back_numbers, [5].into());
        assert_eq!(
            ticket.warnings,
            ["back zone number 28 is out of range", "back zone has 1 of 2 numbers"]
        );
    }
}
